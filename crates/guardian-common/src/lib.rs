pub mod config;
pub mod error;
pub mod time_window;
pub mod types;

pub use error::{Error, Result};
pub use types::*;
