//! Engine Core Library
//!
//! Shared types, configuration, and event definitions for the polystrat
//! multi-strategy trading engine.

pub mod config;
pub mod error;
pub mod events;
pub mod types;

pub use error::{Error, Result};
