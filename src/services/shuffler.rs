//! Anti-staleness shuffle.
//!
//! Repeated requests for the same feed would otherwise show an identical top
//! of page. When every item on the page is fresh, the leading items are
//! interchangeable enough to permute; a single older item anywhere on the page
//! disqualifies it, so an old item is never miscast as top-ranked.

use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::models::Article;

/// Randomly permute the first `top_n` items of `page` in place, but only when
/// every item was published within `freshness_window` of `now`. Items beyond
/// `top_n` keep their score order. Pages shorter than `top_n` are fully
/// eligible.
///
/// The RNG is seeded fresh per call so concurrent requests never share
/// mutable randomness state.
pub fn shuffle_page(
    page: &mut [Article],
    freshness_window: Duration,
    top_n: usize,
    now: DateTime<Utc>,
) {
    shuffle_page_with(page, freshness_window, top_n, now, &mut StdRng::from_entropy());
}

/// RNG-injected variant backing `shuffle_page`; deterministic under a seeded
/// generator, which the tests rely on.
pub fn shuffle_page_with<R: Rng>(
    page: &mut [Article],
    freshness_window: Duration,
    top_n: usize,
    now: DateTime<Utc>,
    rng: &mut R,
) {
    if page.is_empty() {
        return;
    }

    let cutoff = now - freshness_window;
    let all_fresh = page
        .iter()
        .all(|article| matches!(article.published_at, Some(ts) if ts >= cutoff));

    if !all_fresh {
        debug!(page_len = page.len(), "page not fresh, skipping shuffle");
        return;
    }

    let scope = top_n.min(page.len());
    page[..scope].shuffle(rng);
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn article(days_ago: i64, hotness: f64) -> Article {
        Article {
            id: Uuid::new_v4(),
            published_at: Some(Utc::now() - Duration::days(days_ago)),
            hotness_score: hotness,
            ..Article::default()
        }
    }

    fn fresh_page(len: usize) -> Vec<Article> {
        (0..len).map(|i| article(1, (len - i) as f64)).collect()
    }

    #[test]
    fn test_tail_keeps_score_order_when_fresh() {
        let now = Utc::now();
        let mut page = fresh_page(10);
        let original_tail: Vec<Uuid> = page[5..].iter().map(|a| a.id).collect();

        let mut rng = StdRng::seed_from_u64(42);
        shuffle_page_with(&mut page, Duration::days(7), 5, now, &mut rng);

        let tail: Vec<Uuid> = page[5..].iter().map(|a| a.id).collect();
        assert_eq!(tail, original_tail, "items beyond top_n must keep order");
    }

    #[test]
    fn test_top_n_gets_permuted_eventually() {
        let now = Utc::now();
        let original: Vec<Uuid> = fresh_page(10).iter().map(|a| a.id).collect();

        // Across several seeds at least one must change the top-5 order.
        let mut any_changed = false;
        for seed in 0..20 {
            let mut page = fresh_page(10);
            let before: Vec<Uuid> = page[..5].iter().map(|a| a.id).collect();
            let mut rng = StdRng::seed_from_u64(seed);
            shuffle_page_with(&mut page, Duration::days(7), 5, now, &mut rng);
            let after: Vec<Uuid> = page[..5].iter().map(|a| a.id).collect();
            if before != after {
                any_changed = true;
            }
            // The top-5 stay the same set of items.
            let mut b = before.clone();
            let mut a = after.clone();
            b.sort();
            a.sort();
            assert_eq!(a, b);
        }
        assert!(any_changed);
        assert_eq!(original.len(), 10);
    }

    #[test]
    fn test_stale_item_disables_shuffle_entirely() {
        let now = Utc::now();
        let mut page = fresh_page(6);
        page.push(article(30, 0.5));
        let original: Vec<Uuid> = page.iter().map(|a| a.id).collect();

        let mut rng = StdRng::seed_from_u64(7);
        shuffle_page_with(&mut page, Duration::days(7), 5, now, &mut rng);

        let after: Vec<Uuid> = page.iter().map(|a| a.id).collect();
        assert_eq!(after, original, "a page with any stale item stays in exact order");
    }

    #[test]
    fn test_unpublished_item_counts_as_stale() {
        let now = Utc::now();
        let mut page = fresh_page(3);
        page.push(Article::default());
        let original: Vec<Uuid> = page.iter().map(|a| a.id).collect();

        let mut rng = StdRng::seed_from_u64(3);
        shuffle_page_with(&mut page, Duration::days(7), 5, now, &mut rng);
        let after: Vec<Uuid> = page.iter().map(|a| a.id).collect();
        assert_eq!(after, original);
    }

    #[test]
    fn test_short_page_fully_eligible() {
        let now = Utc::now();
        let mut page = fresh_page(3);
        let before: Vec<Uuid> = page.iter().map(|a| a.id).collect();

        let mut rng = StdRng::seed_from_u64(11);
        shuffle_page_with(&mut page, Duration::days(7), 5, now, &mut rng);

        let mut after: Vec<Uuid> = page.iter().map(|a| a.id).collect();
        let mut expected = before;
        after.sort();
        expected.sort();
        assert_eq!(after, expected, "short pages permute as a whole set");
    }

    #[test]
    fn test_empty_page_is_noop() {
        let mut page: Vec<Article> = Vec::new();
        shuffle_page(&mut page, Duration::days(7), 5, Utc::now());
        assert!(page.is_empty());
    }
}
