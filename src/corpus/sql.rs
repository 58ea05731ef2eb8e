//! ClickHouse-dialect compilation of a feed query.
//!
//! Large corpora cannot afford row-by-row application-level scoring, so the
//! same lever/variant model that drives the in-memory executor compiles here
//! into one SELECT: lever cases become `multiIf` chains, exclusions become
//! WHERE clauses, and ordering/pagination ride along. The emitted statement
//! expects an `articles` table joined against per-user relationship rows
//! (`user_follows`, `user_tag_follows`, `user_org_follows`).

use uuid::Uuid;

use crate::services::levers::{CaseMatch, Clause, RelevancyLever};
use crate::services::variants::BaseTerm;
use crate::services::weighted_query::{FeedOrder, FeedQuery};

/// Compile a feed query into a single ClickHouse SELECT returning ordered
/// article ids.
pub fn compile_sql(query: &FeedQuery) -> String {
    let user_id = query.user.user_id.unwrap_or(Uuid::nil());
    let user_level = query.user.experience_level_or_default();

    let score_expr = match &query.scorer {
        Some(scorer) => {
            let base = base_sql(scorer.base);
            let levers: Vec<String> = scorer
                .levers
                .iter()
                .map(|lever| lever_sql(lever, user_level))
                .collect();
            if levers.is_empty() {
                base.to_string()
            } else {
                format!("{} + {}", base, levers.join(" + "))
            }
        }
        None => base_sql(BaseTerm::BaseScore).to_string(),
    };

    let mut conditions = vec![
        "a.published_at IS NOT NULL".to_string(),
        format!(
            "a.published_at >= toDateTime('{}')",
            query.filter.published_after.format("%Y-%m-%d %H:%M:%S")
        ),
    ];
    if !query.filter.blocked_authors.is_empty() {
        conditions.push(format!(
            "a.author_id NOT IN ({})",
            id_list(query.filter.blocked_authors.iter())
        ));
    }
    if !query.filter.antifollowed_tags.is_empty() {
        conditions.push(format!(
            "NOT hasAny(a.tags, [{}])",
            string_list(query.filter.antifollowed_tags.iter())
        ));
    }
    if !query.filter.omit_ids.is_empty() {
        conditions.push(format!(
            "a.id NOT IN ({})",
            id_list(query.filter.omit_ids.iter())
        ));
    }
    if let Some(tag) = &query.filter.required_tag {
        conditions.push(format!("has(a.tags, '{}')", escape(tag)));
    }
    if query.filter.only_featured {
        conditions.push("a.lead_image_present = 1".to_string());
    }

    let floor = match query.filter.minimum_score {
        Some(floor) => format!("WHERE score >= {}", fmt_f64(floor)),
        None => String::new(),
    };

    let order = match query.order {
        FeedOrder::ScoreDesc => "ORDER BY score DESC, published_at DESC",
        FeedOrder::PublishedDesc => "ORDER BY published_at DESC",
    };

    format!(
        r#"SELECT id FROM (
    SELECT
        a.id AS id,
        a.published_at AS published_at,
        {score_expr} AS score
    FROM articles a
    LEFT JOIN user_follows uf ON uf.user_id = '{user_id}' AND uf.followed_id = a.author_id
    LEFT JOIN user_tag_follows tf ON tf.user_id = '{user_id}' AND hasAny(a.tags, [tf.tag])
    LEFT JOIN user_org_follows uo ON uo.user_id = '{user_id}' AND uo.organization_id = a.organization_id
    WHERE {conditions}
)
{floor}
{order}
LIMIT {limit} OFFSET {offset}"#,
        score_expr = score_expr,
        user_id = user_id,
        conditions = conditions.join("\n      AND "),
        floor = floor,
        order = order,
        limit = query.limit,
        offset = query.offset,
    )
}

fn base_sql(base: BaseTerm) -> &'static str {
    match base {
        BaseTerm::Hotness => "a.hotness_score",
        BaseTerm::BaseScore => "a.base_score",
    }
}

fn clause_sql(clause: Clause, user_level: f64) -> String {
    match clause {
        Clause::CommentsCount => "a.comments_count".to_string(),
        Clause::DaysSincePublished => "dateDiff('day', a.published_at, now())".to_string(),
        Clause::FollowWeight => "coalesce(uf.follow_weight, 0)".to_string(),
        Clause::TagMatch => "coalesce(tf.tag_weight, 0)".to_string(),
        Clause::OrganizationMatch => "if(uo.organization_id IS NOT NULL, 1, 0)".to_string(),
        Clause::ExperienceDelta => format!(
            "abs(a.experience_level_rating - {})",
            fmt_f64(user_level)
        ),
    }
}

/// One lever as a multiIf chain: conditions in declaration order, fallback
/// weight last, matching the in-process first-match-wins semantics.
fn lever_sql(lever: &RelevancyLever, user_level: f64) -> String {
    let input = clause_sql(lever.clause, user_level);
    let cases = lever.cases_and_fallback();

    if cases.0.is_empty() {
        return fmt_f64(cases.1);
    }

    let mut args = Vec::new();
    for (case, weight) in cases.0 {
        args.push(case_sql(case, &input));
        args.push(fmt_f64(*weight));
    }
    args.push(fmt_f64(cases.1));
    format!("multiIf({})", args.join(", "))
}

fn case_sql(case: &CaseMatch, input: &str) -> String {
    match case {
        CaseMatch::Exactly(v) => format!("{} = {}", input, fmt_f64(*v)),
        CaseMatch::AnyOf(set) => format!(
            "{} IN ({})",
            input,
            set.iter().map(|v| fmt_f64(*v)).collect::<Vec<_>>().join(", ")
        ),
        CaseMatch::Range {
            min,
            max,
            inclusive_max,
        } => {
            let upper = if *inclusive_max { "<=" } else { "<" };
            format!(
                "({input} >= {} AND {input} {} {})",
                fmt_f64(*min),
                upper,
                fmt_f64(*max),
                input = input
            )
        }
        CaseMatch::AtLeast { at_least } => format!("{} >= {}", input, fmt_f64(*at_least)),
    }
}

fn fmt_f64(v: f64) -> String {
    if v == v.trunc() && v.abs() < 1e15 {
        format!("{:.1}", v)
    } else {
        format!("{}", v)
    }
}

fn id_list<'a>(ids: impl Iterator<Item = &'a Uuid>) -> String {
    ids.map(|id| format!("'{}'", id))
        .collect::<Vec<_>>()
        .join(", ")
}

fn string_list<'a>(values: impl Iterator<Item = &'a String>) -> String {
    let mut list: Vec<String> = values.map(|v| format!("'{}'", escape(v))).collect();
    list.sort();
    list.join(", ")
}

// Backslashes first, or an escaped quote could be re-broken by a later pass.
fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}
