use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use tracing::warn;

const DEV_SECRET: &str = "dev-secret-change-me";

pub struct Config {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub addr: SocketAddr,
}

impl Config {
    /// Read `ZENZONE_*` variables. Call after `dotenvy::dotenv()`.
    pub fn from_env() -> anyhow::Result<Self> {
        let jwt_secret = std::env::var("ZENZONE_JWT_SECRET").unwrap_or_else(|_| {
            warn!("ZENZONE_JWT_SECRET not set, using the development secret");
            DEV_SECRET.into()
        });
        let db_path = std::env::var("ZENZONE_DB_PATH").unwrap_or_else(|_| "zenzone.db".into());
        let host = std::env::var("ZENZONE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = std::env::var("ZENZONE_PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .context("ZENZONE_PORT must be a port number")?;

        let addr = format!("{}:{}", host, port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", host, port))?;

        Ok(Self {
            jwt_secret,
            db_path: PathBuf::from(db_path),
            addr,
        })
    }
}
