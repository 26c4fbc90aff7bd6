//! Core library: tag identity resolution, scan routing, tag provisioning and backup tiering.

pub mod app;
pub mod backup;
pub mod config;
pub mod error;
pub mod files;
pub mod models;
pub mod playback;
pub mod resolver;
pub mod routing;
pub mod settings;
pub mod store;
pub mod writer;

#[cfg(test)]
mod testing;

pub use error::{CoreError, Result};
