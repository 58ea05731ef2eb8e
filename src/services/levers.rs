//! Relevancy levers: single named scoring factors.
//!
//! A lever maps a raw input value (comment count, days since publish, follow
//! weight, ...) to a numeric weight through ordered case-matching with a
//! fallback. Levers are declared in variant documents and compiled once per
//! variant; clause resolution is validated at compile time so a bad deploy
//! fails the whole variant instead of silently degrading rankings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{FeedError, Result};
use crate::models::{Article, UserContext};

/// Known raw-input sources a lever clause may read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Clause {
    CommentsCount,
    DaysSincePublished,
    FollowWeight,
    TagMatch,
    OrganizationMatch,
    ExperienceDelta,
}

impl Clause {
    /// Parse a clause identifier from a variant document. Unknown identifiers
    /// fail here, at variant-compile time, never at per-item evaluation time.
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "comments_count" => Ok(Clause::CommentsCount),
            "days_since_published" => Ok(Clause::DaysSincePublished),
            "follow_weight" => Ok(Clause::FollowWeight),
            "tag_match" => Ok(Clause::TagMatch),
            "organization_match" => Ok(Clause::OrganizationMatch),
            "experience_delta" => Ok(Clause::ExperienceDelta),
            other => Err(FeedError::Configuration(format!(
                "unknown lever clause '{}'",
                other
            ))),
        }
    }

    /// Resolve the raw input value for one (user, article) pair.
    pub fn resolve(&self, user: &UserContext, article: &Article, now: DateTime<Utc>) -> f64 {
        match self {
            Clause::CommentsCount => article.comments_count as f64,
            Clause::DaysSincePublished => {
                let days = article.days_since_published(now);
                if days == i64::MAX {
                    f64::MAX
                } else {
                    days as f64
                }
            }
            Clause::FollowWeight => user.follow_weight(article.author_id),
            Clause::TagMatch => article
                .tags
                .iter()
                .filter_map(|tag| user.followed_tags.get(&tag.to_lowercase()))
                .sum(),
            Clause::OrganizationMatch => match article.organization_id {
                Some(org) if user.followed_organizations.contains(&org) => 1.0,
                _ => 0.0,
            },
            Clause::ExperienceDelta => {
                (article.experience_level_rating - user.experience_level_or_default()).abs()
            }
        }
    }
}

/// Declarative match condition for one lever case.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CaseMatch {
    /// Exact-match on a single value.
    Exactly(f64),
    /// Set membership.
    AnyOf(Vec<f64>),
    /// Numeric range: inclusive lower bound, exclusive upper bound unless
    /// `inclusive_max` is set.
    Range {
        min: f64,
        max: f64,
        #[serde(default)]
        inclusive_max: bool,
    },
    /// Open-ended threshold, inclusive.
    AtLeast { at_least: f64 },
}

impl CaseMatch {
    pub fn matches(&self, value: f64) -> bool {
        match self {
            CaseMatch::Exactly(expected) => value == *expected,
            CaseMatch::AnyOf(set) => set.iter().any(|v| *v == value),
            CaseMatch::Range {
                min,
                max,
                inclusive_max,
            } => {
                if value < *min {
                    false
                } else if *inclusive_max {
                    value <= *max
                } else {
                    value < *max
                }
            }
            CaseMatch::AtLeast { at_least } => value >= *at_least,
        }
    }
}

/// File/document form of a lever, before compilation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeverSpec {
    pub clause: String,
    /// Ordered (match, weight) pairs; first match wins.
    #[serde(default)]
    pub cases: Vec<(CaseMatch, f64)>,
    pub fallback: Option<f64>,
}

/// A compiled scoring factor.
#[derive(Debug, Clone)]
pub struct RelevancyLever {
    pub key: String,
    pub clause: Clause,
    cases: Vec<(CaseMatch, f64)>,
    fallback: f64,
}

impl RelevancyLever {
    /// Compile a declarative spec. Fails with a Configuration error when the
    /// clause is unknown or the declaration has no cases and no fallback.
    pub fn compile(key: &str, spec: &LeverSpec) -> Result<Self> {
        let clause = Clause::parse(&spec.clause).map_err(|e| {
            FeedError::Configuration(format!("lever '{}': {}", key, e))
        })?;

        if spec.cases.is_empty() && spec.fallback.is_none() {
            return Err(FeedError::Configuration(format!(
                "lever '{}' declares no cases and no fallback",
                key
            )));
        }

        Ok(Self {
            key: key.to_string(),
            clause,
            cases: spec.cases.clone(),
            fallback: spec.fallback.unwrap_or(0.0),
        })
    }

    /// Weight for a raw input value: cases in declaration order, first match
    /// wins, fallback otherwise.
    pub fn weight(&self, raw: f64) -> f64 {
        for (case, weight) in &self.cases {
            if case.matches(raw) {
                return *weight;
            }
        }
        self.fallback
    }

    /// Resolve the clause input and apply the weight in one step.
    pub fn score(&self, user: &UserContext, article: &Article, now: DateTime<Utc>) -> f64 {
        self.weight(self.clause.resolve(user, article, now))
    }

    /// Ordered cases plus the fallback weight, for executors that re-encode
    /// the matching policy in their own expression language.
    pub fn cases_and_fallback(&self) -> (&[(CaseMatch, f64)], f64) {
        (&self.cases, self.fallback)
    }
}
