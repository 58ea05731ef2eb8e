pub mod featured_story;
pub mod feed_service;
pub mod levers;
pub mod score_calculator;
pub mod shuffler;
pub mod variants;
pub mod weighted_query;

pub use featured_story::find_featured_story;
pub use feed_service::{FeedService, FeedStrategy, Timeframe};
pub use levers::{CaseMatch, Clause, LeverSpec, RelevancyLever};
pub use shuffler::shuffle_page;
pub use variants::{
    assemble, register_variant, BaseTerm, VariantConfig, VariantOverrides, VariantSpec,
    EXPERIMENT_VARIANTS,
};
pub use weighted_query::{
    build_query, CompiledScorer, FeedFilter, FeedOrder, FeedQuery, QueryOptions,
};
