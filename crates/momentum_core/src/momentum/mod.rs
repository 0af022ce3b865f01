//! Momentum scoring, project state transitions and task ranking.
//!
//! # Responsibility
//! - Turn store contents and the activity log into per-project momentum.
//! - Drive `active -> at_risk -> stalled` transitions and restart tasks.
//! - Answer "what should I do next" with a deterministic ranking.
//!
//! # Invariants
//! - All thresholds and weights come from explicit config values.
//! - Every score is in `[0, 1]`.

pub mod engine;
pub mod ranking;
pub mod score;
pub mod state;
pub mod unstuck;

pub use engine::{MomentumEngine, ProjectScore, RecomputeReport, StatusTransition};
pub use ranking::{rank_candidates, rank_tasks, RankFilters, RankTier, RankedTask};
pub use score::{compute_factors, MomentumFactors};
pub use unstuck::{RestartSuggester, RuleBasedSuggester, SuggestResult};
