// Core library modules
pub mod brightness;
pub mod component;
pub mod config;
pub mod cursor;
pub mod discovery;
pub mod distribution;
pub mod error;
pub mod host;
pub mod ipc;
pub mod lock;
pub mod registry;
pub mod wamp;

pub use error::{Error, Result};
