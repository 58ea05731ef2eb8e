//! Feed strategies and the public engine surface.
//!
//! Six strategies share one pipeline (filter -> score -> sort -> paginate ->
//! shuffle -> feature-extract) and differ only in policy: which window, which
//! ordering, whether scoring is compiled, per-user, or skipped. Each request
//! is an independent, stateless computation; the only shared state is the
//! process-wide variant cache.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::Settings;
use crate::corpus::{ArticleCorpus, ExperimentBucketProvider, RelationshipProvider};
use crate::error::{FeedError, Result};
use crate::models::{Article, UserContext};
use crate::services::featured_story::find_featured_story;
use crate::services::score_calculator;
use crate::services::shuffler::shuffle_page;
use crate::services::variants::{self, BaseTerm, VariantOverrides, EXPERIMENT_VARIANTS};
use crate::services::weighted_query::{
    build_query, normalize_omit, CompiledScorer, FeedFilter, FeedOrder, FeedQuery, QueryOptions,
};

/// Caller-supplied time window label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeframe {
    Day,
    Week,
    Month,
    Year,
    Infinity,
}

impl Timeframe {
    pub fn parse(label: &str) -> Result<Self> {
        match label {
            "day" => Ok(Timeframe::Day),
            "week" => Ok(Timeframe::Week),
            "month" => Ok(Timeframe::Month),
            "year" => Ok(Timeframe::Year),
            "infinity" => Ok(Timeframe::Infinity),
            other => Err(FeedError::Configuration(format!(
                "unknown timeframe label '{}'",
                other
            ))),
        }
    }

    pub fn days(&self) -> i64 {
        match self {
            Timeframe::Day => 1,
            Timeframe::Week => 7,
            Timeframe::Month => 30,
            Timeframe::Year => 365,
            Timeframe::Infinity => 365 * 100,
        }
    }
}

/// One feed flavor. Strategies are policy selectors over the shared pipeline,
/// not independent implementations.
#[derive(Debug, Clone)]
pub enum FeedStrategy {
    /// Hotness order for anonymous users; hotness blended with follow and
    /// tag-follow factors for signed-in users.
    Basic,
    /// No scoring; minimum-score floor only; publish time descending.
    Latest,
    /// Window-scoped, quality-score descending.
    Timeframe(Timeframe),
    /// Scoped to one tag, published-only.
    Tag(String),
    /// Full compiled path for a named variant, shuffled.
    Custom { variant: String },
    /// Experiment-bucketed variant selection with a calculator fallback.
    Experimental,
}

/// Candidate pool size for strategies that re-rank in memory. Independent of
/// the requested page so every page paginates one consistent ordering.
const IN_MEMORY_CANDIDATE_POOL: usize = 500;

/// The ranking engine's orchestration layer.
pub struct FeedService {
    corpus: Arc<dyn ArticleCorpus>,
    relationships: Arc<dyn RelationshipProvider>,
    buckets: Arc<dyn ExperimentBucketProvider>,
    settings: Settings,
}

impl FeedService {
    pub fn new(
        corpus: Arc<dyn ArticleCorpus>,
        relationships: Arc<dyn RelationshipProvider>,
        buckets: Arc<dyn ExperimentBucketProvider>,
        settings: Settings,
    ) -> Self {
        Self {
            corpus,
            relationships,
            buckets,
            settings,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Run one strategy through the shared pipeline.
    pub async fn fetch(
        &self,
        strategy: FeedStrategy,
        user: Option<&UserContext>,
        options: QueryOptions,
    ) -> Result<Vec<Article>> {
        match strategy {
            FeedStrategy::Latest => self.latest(user, options).await,
            FeedStrategy::Timeframe(timeframe) => self.timeframe(user, timeframe, options).await,
            FeedStrategy::Tag(tag) => self.tag(user, &tag, options).await,
            FeedStrategy::Basic => self.basic(user, options).await,
            FeedStrategy::Custom { variant } => {
                Ok(self.custom(user, &variant, None, options).await?.unwrap_or_default())
            }
            FeedStrategy::Experimental => self.experimental(user, options).await,
        }
    }

    /// Public engine surface: one ranked, paginated feed.
    ///
    /// A variant override routes to the custom compiled path; otherwise
    /// signed-in users go through the experimental strategy and anonymous
    /// requests fall back to the basic hotness feed.
    pub async fn feed(
        &self,
        user_id: Option<Uuid>,
        number_of_articles: usize,
        page: usize,
        variant_override: Option<&str>,
    ) -> Result<Vec<Article>> {
        let user = self.resolve_user(user_id).await?;
        let options = QueryOptions {
            number_of_articles,
            page,
            ..QueryOptions::default()
        };

        match (variant_override, &user) {
            (Some(variant), _) => Ok(self
                .custom(user.as_ref(), variant, None, options)
                .await?
                .unwrap_or_default()),
            (None, Some(_)) => self.experimental(user.as_ref(), options).await,
            (None, None) => self.basic(None, options).await,
        }
    }

    /// Public engine surface: the featured story plus the default feed with
    /// the featured item removed from the body list.
    pub async fn featured_story_and_feed(
        &self,
        user_id: Option<Uuid>,
        signed_in: bool,
        ranking: Option<&str>,
    ) -> Result<(Article, Vec<Article>)> {
        let user = self.resolve_user(user_id).await?;
        let per_page = self.settings.default_feed_size;

        let featured_candidates = self
            .featured_candidates(user.as_ref(), per_page)
            .await?;
        let featured = find_featured_story(&featured_candidates);

        // A sentinel featured story contributes a null omission entry, which
        // normalizes to a no-op downstream.
        let featured_id = if featured.is_sentinel() {
            None
        } else {
            Some(featured.id)
        };
        let options = QueryOptions {
            number_of_articles: per_page,
            page: 1,
            omit: Some(vec![featured_id]),
            ..QueryOptions::default()
        };

        let body = if signed_in {
            match ranking {
                Some(variant) => self
                    .custom(user.as_ref(), variant, None, options)
                    .await?
                    .unwrap_or_default(),
                None => self.experimental(user.as_ref(), options).await?,
            }
        } else {
            self.basic(None, options).await?
        };

        Ok((featured, body))
    }

    /// In-memory calculator ranking: the degraded-mode path used when no
    /// compiled variant is available. Sorts by the lightweight composite
    /// (hotness base), tie-breaking on recency.
    pub fn rank_and_sort_articles(&self, user: &UserContext, articles: Vec<Article>) -> Vec<Article> {
        let mut scored: Vec<(Article, f64)> = articles
            .into_iter()
            .map(|article| {
                let score = score_calculator::composite(user, &article, BaseTerm::Hotness);
                (article, score)
            })
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.0.published_at.cmp(&a.0.published_at))
        });

        scored.into_iter().map(|(article, _)| article).collect()
    }

    async fn resolve_user(&self, user_id: Option<Uuid>) -> Result<Option<UserContext>> {
        match user_id {
            Some(id) => Ok(Some(self.relationships.relationships(id).await?)),
            None => Ok(None),
        }
    }

    async fn latest(&self, user: Option<&UserContext>, options: QueryOptions) -> Result<Vec<Article>> {
        let query = self.unscored_query(
            user,
            FeedOrder::PublishedDesc,
            Some(0.0),
            None,
            &options,
        );
        self.corpus.execute(&query).await
    }

    async fn timeframe(
        &self,
        user: Option<&UserContext>,
        timeframe: Timeframe,
        options: QueryOptions,
    ) -> Result<Vec<Article>> {
        let query = self.unscored_query(
            user,
            FeedOrder::ScoreDesc,
            None,
            Some(timeframe.days()),
            &options,
        );
        self.corpus.execute(&query).await
    }

    async fn tag(
        &self,
        user: Option<&UserContext>,
        tag: &str,
        options: QueryOptions,
    ) -> Result<Vec<Article>> {
        let mut options = options;
        options.required_tag = Some(tag.to_string());
        let query = self.unscored_query(user, FeedOrder::PublishedDesc, None, None, &options);

        // Prefer the corpus's fast tag index when it maintains one. Indexed
        // candidates still pass through the same exclusion filter as the
        // generic branch, so index availability never changes the result set.
        if let Some(tagged) = self.corpus.tagged(tag).await? {
            debug!(tag, candidates = tagged.len(), "tag feed served from index");
            let filtered: Vec<Article> = tagged
                .into_iter()
                .filter(|a| query.matches(a))
                .collect();
            return Ok(query.paginate(filtered));
        }

        self.corpus.execute(&query).await
    }

    async fn basic(&self, user: Option<&UserContext>, options: QueryOptions) -> Result<Vec<Article>> {
        let hotness_query = |user: &UserContext, options: &QueryOptions, limit, offset| FeedQuery {
            user: user.clone(),
            scorer: Some(CompiledScorer {
                base: BaseTerm::Hotness,
                levers: Vec::new(),
            }),
            filter: self.open_filter(user, options, None),
            order: FeedOrder::ScoreDesc,
            limit,
            offset,
            now: Utc::now(),
        };

        match user {
            None => {
                let anonymous = UserContext::anonymous();
                let query = hotness_query(
                    &anonymous,
                    &options,
                    options.number_of_articles,
                    (options.page.max(1) - 1) * options.number_of_articles,
                );
                self.corpus.execute(&query).await
            }
            Some(user) => {
                // Pull a page-independent candidate pool, then blend hotness
                // with the follow and tag-follow calculator factors in memory.
                // Pagination applies to the one blended ordering, so pages
                // stay disjoint.
                let query = hotness_query(user, &options, IN_MEMORY_CANDIDATE_POOL, 0);
                let candidates = self.corpus.execute(&query).await?;

                let mut scored: Vec<(Article, f64)> = candidates
                    .into_iter()
                    .map(|article| {
                        let score = article.hotness_score
                            + score_calculator::followed_author(user, &article)
                            + score_calculator::followed_tags(user, &article);
                        (article, score)
                    })
                    .collect();
                scored.sort_by(|a, b| {
                    b.1.partial_cmp(&a.1)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| b.0.published_at.cmp(&a.0.published_at))
                });

                Ok(scored
                    .into_iter()
                    .map(|(article, _)| article)
                    .skip((options.page.max(1) - 1) * options.number_of_articles)
                    .take(options.number_of_articles)
                    .collect())
            }
        }
    }

    /// Full compiled path. Ok(None) when the variant or the user is absent:
    /// an explicit early-exit, not an error. Configuration errors from
    /// assembly propagate unmodified regardless of the user.
    async fn custom(
        &self,
        user: Option<&UserContext>,
        variant_name: &str,
        overrides: Option<&VariantOverrides>,
        options: QueryOptions,
    ) -> Result<Option<Vec<Article>>> {
        let variant = match variants::assemble(variant_name, &self.settings, overrides)? {
            Some(variant) => variant,
            None => {
                debug!(variant = variant_name, "variant absent, empty custom feed");
                return Ok(None);
            }
        };
        let user = match user {
            Some(user) => user,
            None => {
                debug!(variant = variant_name, "user absent, empty custom feed");
                return Ok(None);
            }
        };

        let query = build_query(&variant, user, &self.settings, &options);
        let mut page = self.corpus.execute(&query).await?;

        // Variants may pin their own shuffle scope; otherwise the engine
        // setting applies. Zero disables the shuffle.
        let top_n = variant
            .randomize_top_n
            .unwrap_or(self.settings.shuffle_top_n);
        if top_n > 0 {
            shuffle_page(
                &mut page,
                Duration::days(self.settings.freshness_window_days),
                top_n,
                query.now,
            );
        }

        Ok(Some(page))
    }

    async fn experimental(
        &self,
        user: Option<&UserContext>,
        options: QueryOptions,
    ) -> Result<Vec<Article>> {
        let user = match user {
            Some(user) => user,
            None => return self.basic(None, options).await,
        };

        let bucket = match user.user_id {
            Some(user_id) => self.buckets.bucket_for(user_id).await?,
            None => None,
        };

        let variant_name = bucket
            .filter(|name| EXPERIMENT_VARIANTS.contains(&name.as_str()))
            .unwrap_or_else(|| self.settings.default_variant.clone());

        match self.custom(Some(user), &variant_name, None, options.clone()).await? {
            Some(page) => Ok(page),
            None => {
                // Compiled variant unavailable: degrade to the in-memory
                // calculator ranking over a wide candidate pull.
                warn!(
                    variant = %variant_name,
                    "compiled variant unavailable, using calculator fallback"
                );
                let query = self.unscored_query(
                    Some(user),
                    FeedOrder::PublishedDesc,
                    None,
                    None,
                    &QueryOptions {
                        number_of_articles: IN_MEMORY_CANDIDATE_POOL,
                        page: 1,
                        omit: options.omit.clone(),
                        ..QueryOptions::default()
                    },
                );
                let candidates = self.corpus.execute(&query).await?;
                let ranked = self.rank_and_sort_articles(user, candidates);
                Ok(ranked
                    .into_iter()
                    .skip((options.page.max(1) - 1) * options.number_of_articles)
                    .take(options.number_of_articles)
                    .collect())
            }
        }
    }

    async fn featured_candidates(
        &self,
        user: Option<&UserContext>,
        limit: usize,
    ) -> Result<Vec<Article>> {
        let variant = variants::assemble(&self.settings.default_variant, &self.settings, None)?;
        let anonymous = UserContext::anonymous();
        let user = user.unwrap_or(&anonymous);
        let options = QueryOptions {
            number_of_articles: limit,
            page: 1,
            only_featured: true,
            ..QueryOptions::default()
        };

        let query = match variant {
            Some(variant) => build_query(&variant, user, &self.settings, &options),
            None => self.unscored_query(Some(user), FeedOrder::ScoreDesc, None, None, &options),
        };
        self.corpus.execute(&query).await
    }

    /// Query without a compiled scorer: the composite falls back to the raw
    /// quality score, which is what the floor (when present) applies to.
    fn unscored_query(
        &self,
        user: Option<&UserContext>,
        order: FeedOrder,
        minimum_score: Option<f64>,
        window_days: Option<i64>,
        options: &QueryOptions,
    ) -> FeedQuery {
        let anonymous = UserContext::anonymous();
        let user = user.unwrap_or(&anonymous);
        let mut filter = self.open_filter(user, options, window_days);
        filter.minimum_score = minimum_score;

        FeedQuery {
            user: user.clone(),
            scorer: None,
            filter,
            order,
            limit: options.number_of_articles,
            offset: (options.page.max(1) - 1) * options.number_of_articles,
            now: Utc::now(),
        }
    }

    fn open_filter(
        &self,
        user: &UserContext,
        options: &QueryOptions,
        window_days: Option<i64>,
    ) -> FeedFilter {
        let published_after = match window_days {
            Some(days) => Utc::now() - Duration::days(days),
            None => DateTime::<Utc>::MIN_UTC,
        };
        FeedFilter {
            blocked_authors: user.blocked_authors.clone(),
            antifollowed_tags: user
                .antifollowed_tags
                .iter()
                .map(|t| t.to_lowercase())
                .collect::<HashSet<_>>(),
            minimum_score: None,
            only_featured: options.only_featured,
            omit_ids: normalize_omit(&options.omit),
            published_after,
            required_tag: options.required_tag.as_ref().map(|t| t.to_lowercase()),
        }
    }
}
