use std::sync::Arc;
use std::sync::atomic::AtomicUsize;

use once_cell::sync::Lazy;

/// Global runtime metrics for the capture pipeline.
///
/// Purpose:
/// - Track active collectors and browser contexts
/// - Track interception throughput (responses, frames, dispatches)
/// - Track error pressure (parse errors, retries, failed navigations)
///
/// Design:
/// - Lock-free (Atomics)
/// - Cheap to update from interception callbacks
/// - Safe in async + multithreaded contexts
#[derive(Default)]
pub struct RuntimeMetrics {
    // High-level
    pub collectors_active: AtomicUsize,
    pub contexts_active: AtomicUsize,

    // Interception
    pub responses_seen: AtomicUsize,
    pub responses_matched: AtomicUsize,
    pub ws_frames_seen: AtomicUsize,
    pub events_dispatched: AtomicUsize,

    // Persistence
    pub records_upserted: AtomicUsize,

    // Errors / recovery
    pub parse_errors: AtomicUsize,
    pub handler_errors: AtomicUsize,
    pub navigation_failures: AtomicUsize,
    pub collector_retries: AtomicUsize,
    pub page_refreshes: AtomicUsize,
}

/// Global metrics registry (singleton)
pub static METRICS: Lazy<Arc<RuntimeMetrics>> =
    Lazy::new(|| Arc::new(RuntimeMetrics::default()));
