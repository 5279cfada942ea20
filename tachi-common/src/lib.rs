//! # Tachi Common Library
//!
//! Shared code for the Tachi score services including:
//! - Database initialization and runtime settings
//! - Event types (ScoreEvent enum) and the EventBus
//! - Configuration loading and root folder resolution
//! - Timestamp helpers

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod time;

pub use error::{Error, Result};
pub use events::{EventBus, ScoreEvent};
