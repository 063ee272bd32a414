// lampctl - shared library
// Configuration and the console front end used by `lampctl serve`

pub mod config;
pub mod console;

pub use config::{Config, ConfigError};
