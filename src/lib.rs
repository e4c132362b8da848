pub mod auth;
pub mod cgi;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod listener;
pub mod path;
pub mod server;
pub mod signal;
pub mod static_responder;
pub mod timers;
pub mod transport;

pub use config::Config;
pub use error::{Error, Result};
pub use server::Server;
