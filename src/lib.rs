pub mod capture;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod face;
pub mod gallery;
mod metrics;
pub mod profile;
pub mod recognition;
pub mod server;
pub mod students;
pub mod task;
pub mod utils;

pub use config::Opts;
pub use error::{KioskError, Result};
