//! Client core for the fiction-forge writing platform: typed REST access,
//! the realtime generation-job channel, optimistic list reordering and
//! word-count progress.

pub mod config;
pub mod error;
pub mod models;
pub mod preferences;
pub mod routes;
pub mod services;
pub mod session;
pub mod utils;

pub use config::Config;
pub use error::{ForgeError, ReorderError, Result};
