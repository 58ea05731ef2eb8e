//! Compiled weighted feed queries.
//!
//! Turns a variant's levers plus a mandatory base popularity term into one
//! composite per-item score, combined with the exclusion filter, publication
//! window and pagination into a single executable query. The corpus executor
//! (in-memory or SQL-compiling) evaluates the query without re-deriving any of
//! these semantics.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use tracing::debug;
use uuid::Uuid;

use crate::config::Settings;
use crate::models::{Article, UserContext};
use crate::services::variants::{BaseTerm, VariantConfig};

use crate::services::levers::RelevancyLever;

/// Composite score expression: base term plus every enabled lever. The base
/// term is always present, so a feed never degrades to "no score" for items
/// with no matching facets.
#[derive(Debug, Clone)]
pub struct CompiledScorer {
    pub base: BaseTerm,
    pub levers: Vec<RelevancyLever>,
}

impl CompiledScorer {
    pub fn evaluate(&self, user: &UserContext, article: &Article, now: DateTime<Utc>) -> f64 {
        let base = match self.base {
            BaseTerm::Hotness => article.hotness_score,
            BaseTerm::BaseScore => article.base_score,
        };
        base + self
            .levers
            .iter()
            .map(|lever| lever.score(user, article, now))
            .sum::<f64>()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedOrder {
    /// Composite score descending, publication recency as tie-break.
    ScoreDesc,
    /// Publication time descending.
    PublishedDesc,
}

/// Exclusion and window predicates, normalized at build time.
#[derive(Debug, Clone)]
pub struct FeedFilter {
    pub blocked_authors: HashSet<Uuid>,
    pub antifollowed_tags: HashSet<String>,
    /// Composite-score floor; None when only_featured mode replaces it.
    pub minimum_score: Option<f64>,
    /// Require a lead image instead of the score floor.
    pub only_featured: bool,
    /// Explicit omission set, already stripped of null entries.
    pub omit_ids: HashSet<Uuid>,
    pub published_after: DateTime<Utc>,
    pub required_tag: Option<String>,
}

/// One executable feed query: filter + score + sort + limit/offset.
#[derive(Debug, Clone)]
pub struct FeedQuery {
    pub user: UserContext,
    pub scorer: Option<CompiledScorer>,
    pub filter: FeedFilter,
    pub order: FeedOrder,
    pub limit: usize,
    pub offset: usize,
    pub now: DateTime<Utc>,
}

/// Caller-facing knobs for one query build.
#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub number_of_articles: usize,
    /// 1-based page number.
    pub page: usize,
    /// Explicit omission list. Null entries are a no-op, not an error:
    /// callers legitimately pass `[None]` when a featured-story lookup found
    /// nothing.
    pub omit: Option<Vec<Option<Uuid>>>,
    pub only_featured: bool,
    pub required_tag: Option<String>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            number_of_articles: 30,
            page: 1,
            omit: None,
            only_featured: false,
            required_tag: None,
        }
    }
}

/// Normalize an omission list: drop null entries so an empty or all-null list
/// behaves identically to no list at all.
pub fn normalize_omit(omit: &Option<Vec<Option<Uuid>>>) -> HashSet<Uuid> {
    omit.iter().flatten().flatten().copied().collect()
}

/// Build the executable query for a compiled variant.
///
/// The lookback window is read here, at query-build time, so operational
/// overrides of the engine setting take effect without a process restart.
pub fn build_query(
    variant: &VariantConfig,
    user: &UserContext,
    settings: &Settings,
    options: &QueryOptions,
) -> FeedQuery {
    let lookback_days = variant.lookback_days.unwrap_or_else(|| settings.lookback_days());
    let now = Utc::now();

    let minimum_score = if options.only_featured {
        None
    } else {
        Some(variant.minimum_score)
    };

    let query = FeedQuery {
        user: user.clone(),
        scorer: Some(CompiledScorer {
            base: variant.base,
            levers: variant.levers.clone(),
        }),
        filter: FeedFilter {
            blocked_authors: user.blocked_authors.clone(),
            antifollowed_tags: user
                .antifollowed_tags
                .iter()
                .map(|t| t.to_lowercase())
                .collect(),
            minimum_score,
            only_featured: options.only_featured,
            omit_ids: normalize_omit(&options.omit),
            published_after: now - Duration::days(lookback_days),
            required_tag: options.required_tag.as_ref().map(|t| t.to_lowercase()),
        },
        order: FeedOrder::ScoreDesc,
        limit: options.number_of_articles,
        offset: (options.page.max(1) - 1) * options.number_of_articles,
        now,
    };

    debug!(
        variant = %variant.name,
        lookback_days,
        limit = query.limit,
        offset = query.offset,
        omitted = query.filter.omit_ids.len(),
        "built weighted feed query"
    );

    query
}

impl FeedQuery {
    /// Structural filter: everything except the composite-score floor, which
    /// needs the score itself.
    pub fn matches(&self, article: &Article) -> bool {
        let published_at = match article.published_at {
            Some(ts) => ts,
            None => return false,
        };
        if published_at < self.filter.published_after {
            return false;
        }
        if self.filter.blocked_authors.contains(&article.author_id) {
            return false;
        }
        if article
            .tags
            .iter()
            .any(|tag| self.filter.antifollowed_tags.contains(&tag.to_lowercase()))
        {
            return false;
        }
        if self.filter.omit_ids.contains(&article.id) {
            return false;
        }
        if let Some(tag) = &self.filter.required_tag {
            if !article.has_tag(tag) {
                return false;
            }
        }
        if self.filter.only_featured && !article.lead_image_present {
            return false;
        }
        true
    }

    /// Composite score under this query. Unscored queries fall back to the raw
    /// quality score so the minimum-score floor still has something to bite on.
    pub fn score(&self, article: &Article) -> f64 {
        match &self.scorer {
            Some(scorer) => scorer.evaluate(&self.user, article, self.now),
            None => article.base_score,
        }
    }

    /// True when the scored article clears the floor (or no floor applies).
    pub fn clears_floor(&self, score: f64) -> bool {
        match self.filter.minimum_score {
            Some(floor) => score >= floor,
            None => true,
        }
    }

    /// Order a scored candidate set: primary key per `order`, publication
    /// recency descending as tie-break.
    pub fn sort(&self, scored: &mut [(Article, f64)]) {
        match self.order {
            FeedOrder::ScoreDesc => scored.sort_by(|a, b| {
                b.1.partial_cmp(&a.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| b.0.published_at.cmp(&a.0.published_at))
            }),
            FeedOrder::PublishedDesc => {
                scored.sort_by(|a, b| b.0.published_at.cmp(&a.0.published_at))
            }
        }
    }

    /// Apply limit/offset to an already-ordered candidate set.
    pub fn paginate(&self, ordered: Vec<Article>) -> Vec<Article> {
        ordered
            .into_iter()
            .skip(self.offset)
            .take(self.limit)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::variants::assemble;

    fn base_variant() -> std::sync::Arc<VariantConfig> {
        assemble("base", &Settings::default(), None).unwrap().unwrap()
    }

    fn published(days_ago: i64) -> Article {
        Article {
            id: Uuid::new_v4(),
            author_id: Uuid::new_v4(),
            published_at: Some(Utc::now() - Duration::days(days_ago)),
            ..Article::default()
        }
    }

    #[test]
    fn test_normalize_omit_edge_cases() {
        assert!(normalize_omit(&None).is_empty());
        assert!(normalize_omit(&Some(vec![])).is_empty());
        assert!(normalize_omit(&Some(vec![None])).is_empty());

        let id = Uuid::new_v4();
        let set = normalize_omit(&Some(vec![None, Some(id), None]));
        assert_eq!(set.len(), 1);
        assert!(set.contains(&id));
    }

    #[test]
    fn test_unpublished_never_matches() {
        let variant = base_variant();
        let query = build_query(
            &variant,
            &UserContext::anonymous(),
            &Settings::default(),
            &QueryOptions::default(),
        );
        let article = Article::default();
        assert!(!query.matches(&article));
    }

    #[test]
    fn test_window_excludes_old_articles() {
        let variant = base_variant();
        let settings = Settings::default();
        let query = build_query(
            &variant,
            &UserContext::anonymous(),
            &settings,
            &QueryOptions::default(),
        );
        assert!(query.matches(&published(1)));
        assert!(!query.matches(&published(settings.default_lookback_days + 1)));
    }

    #[test]
    fn test_blocked_author_excluded() {
        let variant = base_variant();
        let article = published(1);
        let mut user = UserContext::anonymous();
        user.blocked_authors.insert(article.author_id);

        let query = build_query(&variant, &user, &Settings::default(), &QueryOptions::default());
        assert!(!query.matches(&article));
    }

    #[test]
    fn test_antifollowed_tag_excluded() {
        let variant = base_variant();
        let mut article = published(1);
        article.tags = vec!["crypto".to_string()];
        let mut user = UserContext::anonymous();
        user.antifollowed_tags.insert("Crypto".to_string());

        let query = build_query(&variant, &user, &Settings::default(), &QueryOptions::default());
        assert!(!query.matches(&article));
    }

    #[test]
    fn test_only_featured_requires_lead_image_and_drops_floor() {
        let variant = base_variant();
        let options = QueryOptions {
            only_featured: true,
            ..QueryOptions::default()
        };
        let query = build_query(
            &variant,
            &UserContext::anonymous(),
            &Settings::default(),
            &options,
        );

        let mut article = published(1);
        assert!(!query.matches(&article));
        article.lead_image_present = true;
        assert!(query.matches(&article));

        assert!(query.filter.minimum_score.is_none());
        assert!(query.clears_floor(-100.0));
    }

    #[test]
    fn test_pagination_offset_math() {
        let variant = base_variant();
        let options = QueryOptions {
            number_of_articles: 10,
            page: 3,
            ..QueryOptions::default()
        };
        let query = build_query(
            &variant,
            &UserContext::anonymous(),
            &Settings::default(),
            &options,
        );
        assert_eq!(query.limit, 10);
        assert_eq!(query.offset, 20);
    }

    #[test]
    fn test_score_includes_base_even_with_no_matching_facets() {
        let variant = base_variant();
        let mut article = published(30);
        article.hotness_score = 7.0;
        article.published_at = Some(Utc::now() - Duration::days(10));
        article.experience_level_rating = 9.0;

        let query = build_query(
            &variant,
            &UserContext::anonymous(),
            &Settings::default(),
            &QueryOptions::default(),
        );
        // No follows, no tags, stale recency, delta too large: only the base
        // term contributes.
        assert_eq!(query.score(&article), 7.0);
    }

    #[test]
    fn test_sort_tie_breaks_by_recency() {
        let variant = base_variant();
        let query = build_query(
            &variant,
            &UserContext::anonymous(),
            &Settings::default(),
            &QueryOptions::default(),
        );

        let older = published(5);
        let newer = published(1);
        let mut scored = vec![(older.clone(), 3.0), (newer.clone(), 3.0)];
        query.sort(&mut scored);
        assert_eq!(scored[0].0.id, newer.id);
        assert_eq!(scored[1].0.id, older.id);
    }
}
