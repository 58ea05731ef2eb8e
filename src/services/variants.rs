//! Variant configuration assembly.
//!
//! A variant is a named bundle of levers plus structural parameters (minimum
//! score, lookback window, shuffle size) defining one feed flavor. Assembly
//! merges three layers, lowest to highest: built-in default levers, the named
//! variant document, caller-supplied runtime overrides. Compiled variants are
//! memoized process-wide by name; override assemblies always rebuild and never
//! touch the shared cache.

use dashmap::DashMap;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::Settings;
use crate::error::{FeedError, Result};
use crate::services::levers::{CaseMatch, LeverSpec, RelevancyLever};

/// Mandatory base popularity term of a composite score. Always present even
/// when every optional lever is disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaseTerm {
    Hotness,
    BaseScore,
}

impl BaseTerm {
    fn parse(raw: &str) -> Result<Self> {
        match raw {
            "hotness" => Ok(BaseTerm::Hotness),
            "base_score" => Ok(BaseTerm::BaseScore),
            other => Err(FeedError::Configuration(format!(
                "unknown base term '{}'",
                other
            ))),
        }
    }
}

/// Per-lever entry in a variant document: `true` inherits the built-in lever
/// of the same key, an object overrides it, `false` disables it (as does
/// omitting the key entirely).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LeverSetting {
    Enabled(bool),
    Spec(LeverSpec),
}

/// A variant definition document, as parsed from JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantSpec {
    pub name: String,
    #[serde(default)]
    pub levers: BTreeMap<String, LeverSetting>,
    pub minimum_score: Option<f64>,
    pub lookback_days: Option<i64>,
    pub randomize_top_n: Option<usize>,
    pub base: Option<String>,
}

/// Runtime overrides applied key-by-key on top of a variant document. Used for
/// testing and experimentation; assemblies with overrides bypass the cache.
#[derive(Debug, Clone, Default)]
pub struct VariantOverrides {
    pub levers: BTreeMap<String, LeverSetting>,
    pub minimum_score: Option<f64>,
    pub lookback_days: Option<i64>,
    pub randomize_top_n: Option<usize>,
}

/// A fully compiled variant.
#[derive(Debug, Clone)]
pub struct VariantConfig {
    pub name: String,
    pub levers: Vec<RelevancyLever>,
    pub minimum_score: f64,
    /// None defers to the live engine setting at query-build time.
    pub lookback_days: Option<i64>,
    /// None defers to the engine's shuffle setting; Some(0) disables the
    /// shuffle entirely.
    pub randomize_top_n: Option<usize>,
    pub base: BaseTerm,
}

pub const DEFAULT_RANDOMIZE_TOP_N: usize = 5;

/// Variant names the experimental strategy may bucket users into.
pub const EXPERIMENT_VARIANTS: &[&str] = &["base", "more_comments", "more_tags"];

static VARIANT_CACHE: Lazy<DashMap<String, Arc<VariantConfig>>> = Lazy::new(DashMap::new);

/// Variant documents registered at runtime (operator-supplied or test
/// fixtures). Shadowed by nothing; shadows built-ins of the same name.
static REGISTERED_SPECS: Lazy<DashMap<String, VariantSpec>> = Lazy::new(DashMap::new);

/// Register a variant document programmatically. Any previously cached compile
/// of the same name is dropped so the new document takes effect.
pub fn register_variant(spec: VariantSpec) {
    VARIANT_CACHE.remove(&spec.name);
    REGISTERED_SPECS.insert(spec.name.clone(), spec);
}

/// Assemble a named variant.
///
/// Returns Ok(None) when no document of that name exists (callers treat an
/// absent variant as "nothing to rank", not an error). A document that fails
/// to compile returns a Configuration error and is never cached as valid.
pub fn assemble(
    name: &str,
    settings: &Settings,
    overrides: Option<&VariantOverrides>,
) -> Result<Option<Arc<VariantConfig>>> {
    if overrides.is_none() {
        if let Some(cached) = VARIANT_CACHE.get(name) {
            return Ok(Some(cached.value().clone()));
        }
    }

    let spec = match lookup_spec(name, settings)? {
        Some(spec) => spec,
        None => return Ok(None),
    };

    let compiled = Arc::new(compile(&spec, overrides)?);
    debug!(variant = name, levers = compiled.levers.len(), "assembled variant");

    if overrides.is_none() {
        // Atomic insert-if-absent: concurrent first-requests converge on one
        // compiled instance.
        return Ok(Some(
            VARIANT_CACHE
                .entry(name.to_string())
                .or_insert(compiled)
                .value()
                .clone(),
        ));
    }

    Ok(Some(compiled))
}

fn lookup_spec(name: &str, settings: &Settings) -> Result<Option<VariantSpec>> {
    if let Some(spec) = REGISTERED_SPECS.get(name) {
        return Ok(Some(spec.value().clone()));
    }

    if let Some(dir) = &settings.variant_dir {
        let path = std::path::Path::new(dir).join(format!("{}.json", name));
        if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            let spec: VariantSpec = serde_json::from_str(&raw).map_err(|e| {
                FeedError::Configuration(format!("variant document '{}': {}", name, e))
            })?;
            if spec.name != name {
                warn!(
                    file = %path.display(),
                    declared = %spec.name,
                    "variant document name does not match file name"
                );
            }
            return Ok(Some(spec));
        }
    }

    Ok(builtin_variant(name))
}

fn compile(spec: &VariantSpec, overrides: Option<&VariantOverrides>) -> Result<VariantConfig> {
    let defaults = default_levers();

    let mut settings_by_key: BTreeMap<String, LeverSetting> = spec.levers.clone();
    if let Some(ov) = overrides {
        for (key, setting) in &ov.levers {
            settings_by_key.insert(key.clone(), setting.clone());
        }
    }

    let mut levers = Vec::new();
    for (key, setting) in &settings_by_key {
        match setting {
            LeverSetting::Enabled(false) => continue,
            LeverSetting::Enabled(true) => {
                let default = defaults.get(key.as_str()).ok_or_else(|| {
                    FeedError::Configuration(format!(
                        "variant '{}' enables lever '{}' but no built-in default exists",
                        spec.name, key
                    ))
                })?;
                levers.push(RelevancyLever::compile(key, default)?);
            }
            LeverSetting::Spec(lever_spec) => {
                levers.push(RelevancyLever::compile(key, lever_spec)?);
            }
        }
    }

    let base = match &spec.base {
        Some(raw) => BaseTerm::parse(raw)?,
        None => BaseTerm::Hotness,
    };

    let ov = overrides;
    Ok(VariantConfig {
        name: spec.name.clone(),
        levers,
        minimum_score: ov
            .and_then(|o| o.minimum_score)
            .or(spec.minimum_score)
            .unwrap_or(0.0),
        lookback_days: ov.and_then(|o| o.lookback_days).or(spec.lookback_days),
        randomize_top_n: ov.and_then(|o| o.randomize_top_n).or(spec.randomize_top_n),
        base,
    })
}

fn range(min: f64, max: f64) -> CaseMatch {
    CaseMatch::Range {
        min,
        max,
        inclusive_max: false,
    }
}

fn at_least(v: f64) -> CaseMatch {
    CaseMatch::AtLeast { at_least: v }
}

fn lever(clause: &str, cases: Vec<(CaseMatch, f64)>, fallback: f64) -> LeverSpec {
    LeverSpec {
        clause: clause.to_string(),
        cases,
        fallback: Some(fallback),
    }
}

/// Built-in default lever set, inherited by levers keyed `true` in variant
/// documents.
pub fn default_levers() -> BTreeMap<&'static str, LeverSpec> {
    let mut levers = BTreeMap::new();
    levers.insert(
        "follow_factor",
        lever(
            "follow_weight",
            vec![(at_least(2.0), 2.0), (at_least(1.0), 1.0)],
            0.0,
        ),
    );
    levers.insert(
        "tag_follow_factor",
        lever(
            "tag_match",
            vec![(at_least(3.0), 2.0), (at_least(1.0), 1.0)],
            0.0,
        ),
    );
    levers.insert(
        "organization_follow_factor",
        lever("organization_match", vec![(CaseMatch::Exactly(1.0), 1.0)], 0.0),
    );
    levers.insert(
        "comments_count_factor",
        lever(
            "comments_count",
            vec![
                (at_least(25.0), 1.0),
                (range(10.0, 25.0), 0.75),
                (range(1.0, 10.0), 0.25),
            ],
            0.0,
        ),
    );
    levers.insert(
        "recency_factor",
        lever(
            "days_since_published",
            vec![
                (range(0.0, 1.0), 1.0),
                (range(1.0, 4.0), 0.5),
                (range(4.0, 8.0), 0.25),
            ],
            0.0,
        ),
    );
    levers.insert(
        "experience_factor",
        lever(
            "experience_delta",
            vec![(range(0.0, 1.0), 1.0), (range(1.0, 3.0), 0.5)],
            0.0,
        ),
    );
    levers
}

fn all_default_levers_enabled() -> BTreeMap<String, LeverSetting> {
    default_levers()
        .keys()
        .map(|key| (key.to_string(), LeverSetting::Enabled(true)))
        .collect()
}

fn builtin_variant(name: &str) -> Option<VariantSpec> {
    match name {
        "base" => Some(VariantSpec {
            name: "base".to_string(),
            levers: all_default_levers_enabled(),
            minimum_score: Some(0.0),
            lookback_days: None,
            randomize_top_n: Some(DEFAULT_RANDOMIZE_TOP_N),
            base: Some("hotness".to_string()),
        }),
        "more_comments" => {
            let mut levers = all_default_levers_enabled();
            levers.insert(
                "comments_count_factor".to_string(),
                LeverSetting::Spec(lever(
                    "comments_count",
                    vec![
                        (at_least(25.0), 2.0),
                        (range(10.0, 25.0), 1.5),
                        (range(1.0, 10.0), 0.5),
                    ],
                    0.0,
                )),
            );
            Some(VariantSpec {
                name: "more_comments".to_string(),
                levers,
                minimum_score: Some(0.0),
                lookback_days: None,
                randomize_top_n: Some(DEFAULT_RANDOMIZE_TOP_N),
                base: Some("hotness".to_string()),
            })
        }
        "more_tags" => {
            let mut levers = all_default_levers_enabled();
            levers.insert(
                "tag_follow_factor".to_string(),
                LeverSetting::Spec(lever(
                    "tag_match",
                    vec![(at_least(3.0), 4.0), (at_least(1.0), 2.0)],
                    0.0,
                )),
            );
            Some(VariantSpec {
                name: "more_tags".to_string(),
                levers,
                minimum_score: Some(0.0),
                lookback_days: None,
                randomize_top_n: Some(DEFAULT_RANDOMIZE_TOP_N),
                base: Some("hotness".to_string()),
            })
        }
        _ => None,
    }
}
