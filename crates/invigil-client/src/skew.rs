//! Local clock offset against the store's clock

use chrono::{DateTime, Utc};

/// Tracks `server_time - local_now` from the most recent sample
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SkewTracker {
    offset: chrono::Duration,
    samples: u32,
}

impl SkewTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, server: DateTime<Utc>, local: DateTime<Utc>) {
        self.offset = server - local;
        self.samples = self.samples.saturating_add(1);
    }

    pub fn offset(&self) -> chrono::Duration {
        self.offset
    }

    pub fn has_sample(&self) -> bool {
        self.samples > 0
    }

    /// Local time shifted onto the store's clock
    pub fn adjust(&self, local: DateTime<Utc>) -> DateTime<Utc> {
        local + self.offset
    }
}
