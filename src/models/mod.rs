use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// A content item as seen by the ranking engine. Read-only here: articles are
/// authored and mutated by an external subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: Uuid,
    pub author_id: Uuid,
    pub organization_id: Option<Uuid>,
    /// None while unpublished.
    pub published_at: Option<DateTime<Utc>>,
    /// Stored lowercase; tag matching is case-insensitive.
    pub tags: Vec<String>,
    /// Author/moderator-adjusted quality score, can be negative.
    pub base_score: f64,
    /// Externally time-decayed popularity.
    pub hotness_score: f64,
    pub comments_count: u32,
    /// 0-10, may be fractional.
    pub experience_level_rating: f64,
    pub lead_image_present: bool,
}

impl Default for Article {
    /// The non-persisted sentinel returned when a featured-story lookup finds
    /// nothing: attribute-empty, never null.
    fn default() -> Self {
        Self {
            id: Uuid::nil(),
            author_id: Uuid::nil(),
            organization_id: None,
            published_at: None,
            tags: Vec::new(),
            base_score: 0.0,
            hotness_score: 0.0,
            comments_count: 0,
            experience_level_rating: 0.0,
            lead_image_present: false,
        }
    }
}

impl Article {
    pub fn is_sentinel(&self) -> bool {
        self.id.is_nil()
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        let tag = tag.to_lowercase();
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(&tag))
    }

    /// Whole days since publication, relative to `now`. Unpublished articles
    /// report an arbitrarily large age so recency levers never credit them.
    pub fn days_since_published(&self, now: DateTime<Utc>) -> i64 {
        match self.published_at {
            Some(published) => (now - published).num_days().max(0),
            None => i64::MAX,
        }
    }
}

/// Default experience level assumed for users who never set one (midpoint of
/// the 0-10 rating scale).
pub const EXPERIENCE_LEVEL_MIDPOINT: f64 = 5.0;

/// Per-user relationship facts consumed by scoring. Supplied by the
/// relationship facts provider; absent user_id means an anonymous feed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserContext {
    pub user_id: Option<Uuid>,
    /// Followed user id -> follow weight (1.0 unless explicitly weighted).
    pub followed_users: HashMap<Uuid, f64>,
    pub followed_organizations: HashSet<Uuid>,
    /// Followed tag -> explicit weight (1.0 unless specified).
    pub followed_tags: HashMap<String, f64>,
    pub antifollowed_tags: HashSet<String>,
    pub blocked_authors: HashSet<Uuid>,
    pub experience_level: Option<f64>,
    pub comment_weight: f64,
}

impl UserContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn for_user(user_id: Uuid) -> Self {
        Self {
            user_id: Some(user_id),
            ..Self::default()
        }
    }

    pub fn experience_level_or_default(&self) -> f64 {
        self.experience_level.unwrap_or(EXPERIENCE_LEVEL_MIDPOINT)
    }

    pub fn follow_weight(&self, author_id: Uuid) -> f64 {
        self.followed_users.get(&author_id).copied().unwrap_or(0.0)
    }
}

/// One ordered, bounded page of ranked articles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedPage {
    pub articles: Vec<Article>,
    pub page: usize,
    pub per_page: usize,
}

impl FeedPage {
    pub fn new(articles: Vec<Article>, page: usize, per_page: usize) -> Self {
        Self {
            articles,
            page,
            per_page,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.articles.is_empty()
    }
}
