pub mod commands;
pub mod config;
pub mod downloader;
pub mod error;
pub mod logger;
pub mod protocol;
pub mod system;
pub mod themes;

pub use commands::ThemeLoader;
pub use config::Config;
pub use error::{ThemeError, ThemeResult};
