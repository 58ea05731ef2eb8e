//! Lightweight per-user factor scores.
//!
//! Five independent, pure functions over (user, article), used by feed
//! strategies that rank in memory instead of compiling a full variant. No
//! caching, no locking: safe to call concurrently for different articles.

use crate::models::{Article, UserContext};
use crate::services::variants::BaseTerm;

/// 1.0 when the article's author is followed, else 0.0.
pub fn followed_author(user: &UserContext, article: &Article) -> f64 {
    if user.followed_users.contains_key(&article.author_id) {
        1.0
    } else {
        0.0
    }
}

/// 1.0 when the article's organization is present and followed, else 0.0.
pub fn followed_organization(user: &UserContext, article: &Article) -> f64 {
    match article.organization_id {
        Some(org) if user.followed_organizations.contains(&org) => 1.0,
        _ => 0.0,
    }
}

/// Sum of followed-tag weights over the article's tags. Antifollowed and
/// unfollowed tags earn nothing.
pub fn followed_tags(user: &UserContext, article: &Article) -> f64 {
    article
        .tags
        .iter()
        .filter_map(|tag| user.followed_tags.get(&tag.to_lowercase()))
        .sum()
}

/// Experience-level proximity: 0 at an exact match, increasingly negative as
/// the article's rating drifts from the user's level (midpoint 5 when unset).
/// Fractional ratings are exact, no rounding.
pub fn experience_level(user: &UserContext, article: &Article) -> f64 {
    -(article.experience_level_rating - user.experience_level_or_default()).abs() / 2.0
}

/// Comment-volume preference: zero whenever the user's preference is zero,
/// regardless of comment count.
pub fn comments(user: &UserContext, article: &Article) -> f64 {
    user.comment_weight * article.comments_count as f64
}

/// Composite for the lightweight path: the five factor scores plus the chosen
/// base popularity term.
pub fn composite(user: &UserContext, article: &Article, base: BaseTerm) -> f64 {
    let base_term = match base {
        BaseTerm::Hotness => article.hotness_score,
        BaseTerm::BaseScore => article.base_score,
    };

    base_term
        + followed_author(user, article)
        + followed_organization(user, article)
        + followed_tags(user, article)
        + experience_level(user, article)
        + comments(user, article)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn article() -> Article {
        Article {
            id: Uuid::new_v4(),
            author_id: Uuid::new_v4(),
            ..Article::default()
        }
    }

    #[test]
    fn test_followed_author_is_binary() {
        let mut a = article();
        let mut user = UserContext::anonymous();
        assert_eq!(followed_author(&user, &a), 0.0);

        user.followed_users.insert(a.author_id, 3.0);
        assert_eq!(followed_author(&user, &a), 1.0);

        a.author_id = Uuid::new_v4();
        assert_eq!(followed_author(&user, &a), 0.0);
    }

    #[test]
    fn test_followed_organization_absent_org() {
        let a = article();
        let mut user = UserContext::anonymous();
        user.followed_organizations.insert(Uuid::new_v4());
        assert_eq!(followed_organization(&user, &a), 0.0);
    }

    #[test]
    fn test_followed_organization_match() {
        let org = Uuid::new_v4();
        let mut a = article();
        a.organization_id = Some(org);
        let mut user = UserContext::anonymous();
        user.followed_organizations.insert(org);
        assert_eq!(followed_organization(&user, &a), 1.0);
    }

    #[test]
    fn test_followed_tags_no_follows_is_zero() {
        let mut a = article();
        a.tags = vec!["rust".to_string(), "webdev".to_string()];
        let user = UserContext::anonymous();
        assert_eq!(followed_tags(&user, &a), 0.0);
    }

    #[test]
    fn test_followed_tags_sums_weights() {
        let mut a = article();
        a.tags = vec!["rust".to_string(), "webdev".to_string(), "go".to_string()];
        let mut user = UserContext::anonymous();
        user.followed_tags.insert("rust".to_string(), 2.0);
        user.followed_tags.insert("webdev".to_string(), 0.5);
        user.antifollowed_tags.insert("go".to_string());
        assert_eq!(followed_tags(&user, &a), 2.5);
    }

    #[test]
    fn test_experience_level_antisymmetric_around_midpoint() {
        let mut a = article();
        let mut user = UserContext::anonymous();

        user.experience_level = Some(1.0);
        a.experience_level_rating = 7.0;
        assert_eq!(experience_level(&user, &a), -3.0);

        a.experience_level_rating = 8.5;
        assert_eq!(experience_level(&user, &a), -3.75);

        // Absent user level defaults to the midpoint 5.
        user.experience_level = None;
        a.experience_level_rating = 8.0;
        assert_eq!(experience_level(&user, &a), -1.5);

        a.experience_level_rating = 2.0;
        assert_eq!(experience_level(&user, &a), -1.5);
    }

    #[test]
    fn test_experience_level_never_positive() {
        let mut a = article();
        let user = UserContext::anonymous();
        for rating in [0.0, 2.5, 5.0, 7.5, 10.0] {
            a.experience_level_rating = rating;
            assert!(experience_level(&user, &a) <= 0.0);
        }
    }

    #[test]
    fn test_comments_weight_scenarios() {
        let mut a = article();
        a.comments_count = 5;

        let mut user = UserContext::anonymous();
        user.comment_weight = 1.0;
        assert_eq!(comments(&user, &a), 5.0);

        user.comment_weight = 0.0;
        assert_eq!(comments(&user, &a), 0.0);

        a.comments_count = 10_000;
        assert_eq!(comments(&user, &a), 0.0);
    }

    #[test]
    fn test_composite_includes_base_term() {
        let mut a = article();
        a.hotness_score = 10.0;
        a.base_score = 4.0;
        a.experience_level_rating = 5.0;
        let user = UserContext::anonymous();

        assert_eq!(composite(&user, &a, BaseTerm::Hotness), 10.0);
        assert_eq!(composite(&user, &a, BaseTerm::BaseScore), 4.0);
    }
}
