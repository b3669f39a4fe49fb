//! Relay metrics tracking using OpenTelemetry.

use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Histogram, Meter, UpDownCounter};
use std::time::Instant;

/// Metrics collector for the notification and cache paths.
///
/// # Examples
///
/// ```rust,no_run
/// use hotswap_relay::metrics::RelayMetrics;
/// use opentelemetry::global;
///
/// let metrics = RelayMetrics::new(global::meter("hotswap-relay"));
///
/// let timer = metrics.start_poll();
/// // ... request parks and completes ...
/// metrics.record_poll_completed(timer, true);
/// ```
#[derive(Clone)]
pub struct RelayMetrics {
    parked_polls: UpDownCounter<i64>,
    poll_outcomes: Counter<u64>,
    poll_duration: Histogram<f64>,
    wakeups: Counter<u64>,
    batched_wakeups: Counter<u64>,
    cache_lookups: Counter<u64>,
    cache_invalidations: Counter<u64>,
}

impl RelayMetrics {
    /// Create a new metrics collector with the provided meter.
    pub fn new(meter: Meter) -> Self {
        let parked_polls = meter
            .i64_up_down_counter("hotswap_relay.poll.parked")
            .with_description("Long polls currently waiting for a change")
            .build();

        let poll_outcomes = meter
            .u64_counter("hotswap_relay.poll.completed")
            .with_description("Completed long polls by outcome")
            .build();

        let poll_duration = meter
            .f64_histogram("hotswap_relay.poll.duration")
            .with_description("Time a long poll spent parked in seconds")
            .with_unit("s")
            .build();

        let wakeups = meter
            .u64_counter("hotswap_relay.wakeups")
            .with_description("Parked polls woken by change events")
            .build();

        let batched_wakeups = meter
            .u64_counter("hotswap_relay.wakeups.batched")
            .with_description("Change events whose wake-up was handed to the batch worker")
            .build();

        let cache_lookups = meter
            .u64_counter("hotswap_relay.cache.lookups")
            .with_description("Config file cache lookups by result")
            .build();

        let cache_invalidations = meter
            .u64_counter("hotswap_relay.cache.invalidations")
            .with_description("Cache entries removed by change events")
            .build();

        Self {
            parked_polls,
            poll_outcomes,
            poll_duration,
            wakeups,
            batched_wakeups,
            cache_lookups,
            cache_invalidations,
        }
    }

    /// A poll was parked. Pass the returned `Instant` to
    /// [`record_poll_completed`](Self::record_poll_completed).
    pub fn start_poll(&self) -> Instant {
        self.parked_polls.add(1, &[]);
        Instant::now()
    }

    /// A parked poll finished, either with changes or by timing out.
    pub fn record_poll_completed(&self, start: Instant, changed: bool) {
        let outcome = if changed { "changed" } else { "not_modified" };
        self.parked_polls.add(-1, &[]);
        self.poll_outcomes
            .add(1, &[KeyValue::new("outcome", outcome)]);
        self.poll_duration
            .record(start.elapsed().as_secs_f64(), &[]);
    }

    /// `count` parked polls were woken by one event.
    pub fn record_wakeups(&self, count: usize, batched: bool) {
        self.wakeups.add(count as u64, &[]);
        if batched {
            self.batched_wakeups.add(1, &[]);
        }
    }

    /// A cache lookup was served from the cache (`hit`) or rendered.
    pub fn record_cache_lookup(&self, hit: bool) {
        let result = if hit { "hit" } else { "miss" };
        self.cache_lookups
            .add(1, &[KeyValue::new("result", result)]);
    }

    /// `count` cache entries were invalidated by a change event.
    pub fn record_cache_invalidations(&self, count: usize) {
        self.cache_invalidations.add(count as u64, &[]);
    }
}
