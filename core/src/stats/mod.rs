mod aggregator;
mod classifier;

pub use aggregator::{AggregateOutcome, StatsAggregator, build_kill_transaction};
pub use classifier::classify;
