//! Featured story selection.

use crate::models::Article;

/// Pick the lead item from an already-ranked candidate set: the first
/// candidate with a lead image, else the first candidate, else the
/// non-persisted sentinel article. Candidate order is the ranking engine's
/// own; nothing is re-sorted here.
pub fn find_featured_story(candidates: &[Article]) -> Article {
    candidates
        .iter()
        .find(|article| article.lead_image_present)
        .or_else(|| candidates.first())
        .cloned()
        .unwrap_or_default()
}
