//! # besouro-core
//!
//! Core library for besouro - an episode classifier for IDE developer activity.
//!
//! This library provides:
//! - Domain types for developer actions and recognized episodes
//! - Per-file action linking for size and structure deltas
//! - Fact projection and a forward-chaining rule engine
//! - The streaming episode classifier
//! - Configuration management and logging infrastructure
//!
//! ## Architecture
//!
//! Actions flow through the classifier stream:
//! - **Link:** each file action is chained to the previous action on the same path
//! - **Buffer:** actions accumulate until a passing test session
//! - **Classify:** the buffer is projected to facts, rules run, and the
//!   classification query yields the episodes for the window
//!
//! ## Example
//!
//! ```rust,no_run
//! use besouro_core::{EditAction, EpisodeClassifierStream, UnitTestSessionAction};
//! use chrono::Utc;
//!
//! let mut stream = EpisodeClassifierStream::new().expect("built-in rules should load");
//! stream
//!     .add_action(EditAction::new(Utc::now(), "src/Foo.java").with_size(50).into())
//!     .expect("edit should be accepted");
//! stream
//!     .add_action(UnitTestSessionAction::new(Utc::now(), true).into())
//!     .expect("classification should succeed");
//!
//! for episode in stream.recognized_episodes() {
//!     println!("{episode}");
//! }
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use error::{Error, Result};
pub use facts::{Fact, Value};
pub use inference::{InferenceEngine, QueryResult, QueryRow, RuleEngine, RuleSet};
pub use link::ActionLinker;
pub use stream::EpisodeClassifierStream;
pub use types::*;

// Public modules
pub mod config;
pub mod error;
pub mod facts;
pub mod inference;
pub mod ingest;
pub mod link;
pub mod logging;
pub mod stream;
pub mod types;
