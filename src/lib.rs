pub mod alloc;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod port;
pub mod process;
pub mod utils;

pub use config::Settings;
pub use error::{Error, Result};
