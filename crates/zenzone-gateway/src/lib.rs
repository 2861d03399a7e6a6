pub mod broker;
pub mod connection;
