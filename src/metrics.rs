//! Prometheus metrics collection for guildkeeper.
//!
//! - `guildkeeper_events_total{kind}` - inbound events by kind
//! - `guildkeeper_event_duration_seconds{kind}` - event handling latency
//! - `guildkeeper_engine_errors_total{kind,code}` - engine outcomes that were not a success
//! - `guildkeeper_platform_failures_total{action}` - outbound calls that failed

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

pub fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

// ========================================================================
// Counters
// ========================================================================

/// Inbound events by kind.
pub static EVENTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Total XP granted by message activity.
pub static XP_AWARDED: OnceLock<IntCounter> = OnceLock::new();

/// Upward level crossings.
pub static LEVEL_UPS: OnceLock<IntCounter> = OnceLock::new();

pub static TICKETS_OPENED: OnceLock<IntCounter> = OnceLock::new();

pub static TICKETS_CLOSED: OnceLock<IntCounter> = OnceLock::new();

/// Sum of review settlements, in cents.
pub static SETTLEMENT_CENTS: OnceLock<IntCounter> = OnceLock::new();

pub static BUMPS: OnceLock<IntCounter> = OnceLock::new();

/// Engine errors by kind and code.
pub static ENGINE_ERRORS: OnceLock<IntCounterVec> = OnceLock::new();

/// Failed outbound platform calls by action.
pub static PLATFORM_FAILURES: OnceLock<IntCounterVec> = OnceLock::new();

// ========================================================================
// Gauges
// ========================================================================

/// Review tickets not yet closed.
pub static ACTIVE_TICKETS: OnceLock<IntGauge> = OnceLock::new();

// ========================================================================
// Histograms
// ========================================================================

pub static EVENT_LATENCY: OnceLock<HistogramVec> = OnceLock::new();

/// Initialize the Prometheus metrics registry.
///
/// Must be called once at startup before any metrics are recorded.
pub fn init() {
    let r = registry();

    macro_rules! register {
        ($metric:ident, $init:expr) => {
            let m = $init.expect(concat!(stringify!($metric), " creation failed"));
            if let Err(e) = r.register(Box::new(m.clone())) {
                tracing::warn!(error = %e, concat!("Failed to register metric ", stringify!($metric)));
            }
            let _ = $metric.set(m);
        };
    }

    register!(EVENTS_TOTAL, IntCounterVec::new(Opts::new("guildkeeper_events_total", "Inbound events by kind"), &["kind"]));
    register!(EVENT_LATENCY, HistogramVec::new(
        HistogramOpts::new("guildkeeper_event_duration_seconds", "Event handling latency by kind")
            .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        &["kind"]));
    register!(XP_AWARDED, IntCounter::new("guildkeeper_xp_awarded_total", "XP granted by message activity"));
    register!(LEVEL_UPS, IntCounter::new("guildkeeper_level_ups_total", "Upward level crossings"));
    register!(TICKETS_OPENED, IntCounter::new("guildkeeper_review_tickets_opened_total", "Review tickets opened"));
    register!(TICKETS_CLOSED, IntCounter::new("guildkeeper_review_tickets_closed_total", "Review tickets closed"));
    register!(SETTLEMENT_CENTS, IntCounter::new("guildkeeper_review_settlement_cents_total", "Review settlements credited, in cents"));
    register!(BUMPS, IntCounter::new("guildkeeper_bumps_total", "Server bumps recorded"));
    register!(ENGINE_ERRORS, IntCounterVec::new(Opts::new("guildkeeper_engine_errors_total", "Engine errors by kind and code"), &["kind", "code"]));
    register!(PLATFORM_FAILURES, IntCounterVec::new(Opts::new("guildkeeper_platform_failures_total", "Failed platform calls by action"), &["action"]));
    register!(ACTIVE_TICKETS, IntGauge::new("guildkeeper_review_tickets_active", "Review tickets not yet closed"));
}

/// Gather all metrics and encode them in Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = registry().gather();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode Prometheus metrics");
        return String::new();
    }
    match String::from_utf8(buffer) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Prometheus metrics were not valid UTF-8");
            String::new()
        }
    }
}

// ============================================================================
// Recorders
// ============================================================================

/// Record a handled event with latency.
#[inline]
pub fn record_event(kind: &str, duration_secs: f64) {
    if let Some(c) = EVENTS_TOTAL.get() {
        c.with_label_values(&[kind]).inc();
    }
    if let Some(h) = EVENT_LATENCY.get() {
        h.with_label_values(&[kind]).observe(duration_secs);
    }
}

#[inline]
pub fn record_xp_awarded(gain: u64) {
    if let Some(c) = XP_AWARDED.get() {
        c.inc_by(gain);
    }
}

#[inline]
pub fn record_level_up() {
    if let Some(c) = LEVEL_UPS.get() {
        c.inc();
    }
}

#[inline]
pub fn record_ticket_opened() {
    if let Some(c) = TICKETS_OPENED.get() {
        c.inc();
    }
    if let Some(g) = ACTIVE_TICKETS.get() {
        g.inc();
    }
}

/// Record a closed ticket and the settlement credited for it.
#[inline]
pub fn record_ticket_closed(settlement_cents: i64) {
    if let Some(c) = TICKETS_CLOSED.get() {
        c.inc();
    }
    if let Some(c) = SETTLEMENT_CENTS.get() {
        c.inc_by(settlement_cents.max(0) as u64);
    }
    if let Some(g) = ACTIVE_TICKETS.get() {
        g.dec();
    }
}

/// Tickets dropped without settlement (session reset).
#[inline]
pub fn record_tickets_discarded(count: usize) {
    if let Some(g) = ACTIVE_TICKETS.get() {
        g.sub(count as i64);
    }
}

#[inline]
pub fn record_bump() {
    if let Some(c) = BUMPS.get() {
        c.inc();
    }
}

#[inline]
pub fn record_engine_error(kind: &str, code: &str) {
    if let Some(c) = ENGINE_ERRORS.get() {
        c.with_label_values(&[kind, code]).inc();
    }
}

#[inline]
pub fn record_platform_failure(action: &str) {
    if let Some(c) = PLATFORM_FAILURES.get() {
        c.with_label_values(&[action]).inc();
    }
}
