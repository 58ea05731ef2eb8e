//! In-process corpus executor and providers.
//!
//! Evaluates the full filter -> score -> sort -> paginate pipeline over an
//! in-memory article set. Suited to small corpora and tests; shares its query
//! semantics with the SQL compiler through the FeedQuery model.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::corpus::{ArticleCorpus, ExperimentBucketProvider, RelationshipProvider};
use crate::error::Result;
use crate::models::{Article, UserContext};
use crate::services::weighted_query::FeedQuery;

/// Article corpus held in memory.
#[derive(Default)]
pub struct InMemoryCorpus {
    articles: RwLock<Vec<Article>>,
    /// Tags with a maintained fast-lookup index. Tags outside this set report
    /// the capability as unavailable.
    indexed_tags: RwLock<HashSet<String>>,
}

impl InMemoryCorpus {
    pub fn new(articles: Vec<Article>) -> Self {
        Self {
            articles: RwLock::new(articles),
            indexed_tags: RwLock::new(HashSet::new()),
        }
    }

    pub async fn insert(&self, article: Article) {
        self.articles.write().await.push(article);
    }

    /// Mark a tag as having a fast index.
    pub async fn index_tag(&self, tag: &str) {
        self.indexed_tags.write().await.insert(tag.to_lowercase());
    }

    pub async fn len(&self) -> usize {
        self.articles.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.articles.read().await.is_empty()
    }
}

#[async_trait]
impl ArticleCorpus for InMemoryCorpus {
    async fn execute(&self, query: &FeedQuery) -> Result<Vec<Article>> {
        let articles = self.articles.read().await;

        let mut scored: Vec<(Article, f64)> = articles
            .iter()
            .filter(|article| query.matches(article))
            .map(|article| (article.clone(), query.score(article)))
            .filter(|(_, score)| query.clears_floor(*score))
            .collect();

        query.sort(&mut scored);

        let ordered: Vec<Article> = scored.into_iter().map(|(article, _)| article).collect();
        let page = query.paginate(ordered);

        debug!(
            candidates = articles.len(),
            returned = page.len(),
            "executed in-memory feed query"
        );
        Ok(page)
    }

    async fn tagged(&self, tag: &str) -> Result<Option<Vec<Article>>> {
        let tag = tag.to_lowercase();
        if !self.indexed_tags.read().await.contains(&tag) {
            return Ok(None);
        }

        let articles = self.articles.read().await;
        let mut tagged: Vec<Article> = articles
            .iter()
            .filter(|a| a.published_at.is_some() && a.has_tag(&tag))
            .cloned()
            .collect();
        tagged.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        Ok(Some(tagged))
    }
}

/// Relationship facts held in memory, keyed by user id.
#[derive(Default)]
pub struct InMemoryRelationships {
    contexts: RwLock<HashMap<Uuid, UserContext>>,
}

impl InMemoryRelationships {
    pub async fn insert(&self, context: UserContext) {
        if let Some(user_id) = context.user_id {
            self.contexts.write().await.insert(user_id, context);
        }
    }
}

#[async_trait]
impl RelationshipProvider for InMemoryRelationships {
    async fn relationships(&self, user_id: Uuid) -> Result<UserContext> {
        Ok(self
            .contexts
            .read()
            .await
            .get(&user_id)
            .cloned()
            .unwrap_or_else(|| UserContext::for_user(user_id)))
    }
}

/// Static experiment bucket assignments.
#[derive(Default)]
pub struct InMemoryBuckets {
    assignments: RwLock<HashMap<Uuid, String>>,
}

impl InMemoryBuckets {
    pub async fn assign(&self, user_id: Uuid, variant: &str) {
        self.assignments
            .write()
            .await
            .insert(user_id, variant.to_string());
    }
}

#[async_trait]
impl ExperimentBucketProvider for InMemoryBuckets {
    async fn bucket_for(&self, user_id: Uuid) -> Result<Option<String>> {
        Ok(self.assignments.read().await.get(&user_id).cloned())
    }
}

/// Convenience bundle wiring the three in-memory providers together.
pub struct InMemoryBackend {
    pub corpus: Arc<InMemoryCorpus>,
    pub relationships: Arc<InMemoryRelationships>,
    pub buckets: Arc<InMemoryBuckets>,
}

impl InMemoryBackend {
    pub fn new(articles: Vec<Article>) -> Self {
        Self {
            corpus: Arc::new(InMemoryCorpus::new(articles)),
            relationships: Arc::new(InMemoryRelationships::default()),
            buckets: Arc::new(InMemoryBuckets::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::services::variants::assemble;
    use crate::services::weighted_query::{build_query, QueryOptions};
    use chrono::{Duration, Utc};

    fn article(hotness: f64, days_ago: i64) -> Article {
        Article {
            id: Uuid::new_v4(),
            author_id: Uuid::new_v4(),
            published_at: Some(Utc::now() - Duration::days(days_ago)),
            hotness_score: hotness,
            ..Article::default()
        }
    }

    #[tokio::test]
    async fn test_execute_orders_by_score_desc() {
        let corpus = InMemoryCorpus::new(vec![
            article(1.0, 2),
            article(9.0, 2),
            article(5.0, 2),
        ]);
        let variant = assemble("base", &Settings::default(), None).unwrap().unwrap();
        let query = build_query(
            &variant,
            &UserContext::anonymous(),
            &Settings::default(),
            &QueryOptions::default(),
        );

        let page = corpus.execute(&query).await.unwrap();
        assert_eq!(page.len(), 3);
        assert!(page[0].hotness_score >= page[1].hotness_score);
        assert!(page[1].hotness_score >= page[2].hotness_score);
    }

    #[tokio::test]
    async fn test_execute_applies_minimum_score_floor() {
        let corpus = InMemoryCorpus::new(vec![article(-4.0, 1), article(4.0, 1)]);
        let variant = assemble("base", &Settings::default(), None).unwrap().unwrap();
        let query = build_query(
            &variant,
            &UserContext::anonymous(),
            &Settings::default(),
            &QueryOptions::default(),
        );

        let page = corpus.execute(&query).await.unwrap();
        // base variant floor is 0: the negative-hotness article is dropped.
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].hotness_score, 4.0);
    }

    #[tokio::test]
    async fn test_tagged_unavailable_without_index() {
        let mut a = article(1.0, 1);
        a.tags = vec!["rust".to_string()];
        let corpus = InMemoryCorpus::new(vec![a]);

        assert!(corpus.tagged("rust").await.unwrap().is_none());

        corpus.index_tag("rust").await;
        let tagged = corpus.tagged("Rust").await.unwrap().unwrap();
        assert_eq!(tagged.len(), 1);
    }

    #[tokio::test]
    async fn test_relationships_default_for_unknown_user() {
        let provider = InMemoryRelationships::default();
        let user_id = Uuid::new_v4();
        let context = provider.relationships(user_id).await.unwrap();
        assert_eq!(context.user_id, Some(user_id));
        assert!(context.followed_users.is_empty());
    }
}
