//! Narrow interfaces to the engine's external collaborators.
//!
//! The engine never owns persistence: it consumes a corpus provider (evaluates
//! filter + score + sort + limit/offset over the article corpus), a
//! relationship facts provider, and an experiment bucket provider. Executor
//! failures cross these seams unchanged.

pub mod in_memory;
pub mod sql;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{Article, UserContext};
use crate::services::weighted_query::FeedQuery;

/// Evaluates feed queries against the article corpus. Execution is the
/// engine's single blocking point; everything before it is synchronous
/// CPU-bound work.
#[async_trait]
pub trait ArticleCorpus: Send + Sync {
    /// Return the ordered page described by the query.
    async fn execute(&self, query: &FeedQuery) -> Result<Vec<Article>>;

    /// Fast tag lookup when the corpus maintains one. `Ok(None)` means the
    /// capability is unavailable for this tag and the caller should fall back
    /// to a generic filtered query.
    async fn tagged(&self, tag: &str) -> Result<Option<Vec<Article>>>;
}

/// Supplies per-user relationship facts (follows, blocks, tag affinities).
#[async_trait]
pub trait RelationshipProvider: Send + Sync {
    async fn relationships(&self, user_id: Uuid) -> Result<UserContext>;
}

/// Reports which named variant, if any, a user is currently bucketed into.
#[async_trait]
pub trait ExperimentBucketProvider: Send + Sync {
    async fn bucket_for(&self, user_id: Uuid) -> Result<Option<String>>;
}
