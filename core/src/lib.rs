pub mod cache;
pub mod clock;
pub mod dashboard;
pub mod db;
pub mod error;
pub mod metrics;
pub mod models;
pub mod mutation;
pub mod service;
pub mod store;

#[cfg(test)]
mod testing;

pub use error::{Result, TrackerError};
