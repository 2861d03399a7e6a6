//! Client side of the appointment chat: REST and realtime transports, the
//! conversation view state machine and locally persisted preferences.

pub mod conversation;
pub mod error;
pub mod preferences;
pub mod realtime;
pub mod rest;
pub mod session;
pub mod typing;

pub use error::ClientError;
