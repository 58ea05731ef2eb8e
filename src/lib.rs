//! Personalized feed ranking engine.
//!
//! Ranks a corpus of articles per user by combining a base popularity term
//! with configurable relevancy levers. Ranking behavior is declared in
//! variant documents, compiled once per process, and executed either in
//! memory or as a single compiled SQL statement.

pub mod config;
pub mod corpus;
pub mod error;
pub mod models;
pub mod services;

pub use config::Settings;
pub use error::{FeedError, Result};
pub use models::{Article, FeedPage, UserContext};
pub use services::{FeedService, FeedStrategy, QueryOptions, Timeframe};
