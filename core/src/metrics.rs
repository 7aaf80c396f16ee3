//! Process-wide counters for conditions that are logged but never fatal.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::game_log::ParseOutcome;

macro_rules! counters {
    ($($(#[$meta:meta])* $name:ident),* $(,)?) => {
        #[derive(Debug, Default)]
        pub struct Metrics {
            $($(#[$meta])* $name: AtomicU64,)*
        }

        /// Point-in-time copy of [`Metrics`].
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
        pub struct MetricsSnapshot {
            $(pub $name: u64,)*
        }

        impl Metrics {
            $(
                pub fn $name(&self) -> u64 {
                    self.$name.load(Ordering::Relaxed)
                }
            )*

            pub fn snapshot(&self) -> MetricsSnapshot {
                MetricsSnapshot {
                    $($name: self.$name.load(Ordering::Relaxed),)*
                }
            }
        }
    };
}

counters! {
    lines_read,
    events_parsed,
    unrecognized_lines,
    /// Known line shapes whose payload could not be extracted.
    malformed_lines,
    kills_recorded,
    /// Kills skipped because their dedup key was already stored.
    duplicate_kills,
    failed_aggregations,
    remote_queries,
    remote_failures,
    watch_errors,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_parse_outcome(&self, outcome: ParseOutcome) {
        self.unrecognized_lines
            .fetch_add(outcome.unrecognized, Ordering::Relaxed);
        self.malformed_lines
            .fetch_add(outcome.malformed, Ordering::Relaxed);
    }

    /// Lines dropped before parsing, such as ones longer than the read limit.
    pub fn add_malformed(&self, lines: u64) {
        self.malformed_lines.fetch_add(lines, Ordering::Relaxed);
    }

    pub fn add_lines(&self, lines: u64, events: u64) {
        self.lines_read.fetch_add(lines, Ordering::Relaxed);
        self.events_parsed.fetch_add(events, Ordering::Relaxed);
    }

    pub fn kill_recorded(&self) {
        self.kills_recorded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn duplicate_kill(&self) {
        self.duplicate_kills.fetch_add(1, Ordering::Relaxed);
    }

    pub fn aggregation_failed(&self) {
        self.failed_aggregations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn remote_query(&self) {
        self.remote_queries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn remote_failed(&self) {
        self.remote_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn watch_error(&self) {
        self.watch_errors.fetch_add(1, Ordering::Relaxed);
    }
}
