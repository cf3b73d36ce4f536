pub mod admin;
pub mod config;
pub mod error;
pub mod fate;
pub mod keyword;
pub mod logging;
pub mod ui;

pub use error::{FateError, Result};
