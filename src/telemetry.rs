//! Telemetry utilities for event timing and span construction.

use std::time::Instant;

/// Guard for timing event handling and recording metrics.
///
/// Records latency when dropped.
pub struct EventTimer {
    kind: &'static str,
    start: Instant,
}

impl EventTimer {
    /// Start timing an event.
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            start: Instant::now(),
        }
    }
}

impl Drop for EventTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        crate::metrics::record_event(self.kind, duration);
    }
}

/// Standardized span constructors.
pub mod spans {
    use tracing::{Span, info_span};

    /// Span for one inbound event.
    pub fn event(kind: &str, guild_id: u64, user_id: u64) -> Span {
        info_span!("event", kind = %kind, guild = guild_id, user = user_id)
    }

    /// Span for a background job run.
    pub fn job(name: &str) -> Span {
        info_span!("job", name = %name)
    }
}
