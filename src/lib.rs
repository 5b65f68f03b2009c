pub mod client;
pub mod config;
pub mod error;
pub mod network;
pub mod server;
pub mod service;
pub mod transfer;

pub use error::{RelayError, Result};
