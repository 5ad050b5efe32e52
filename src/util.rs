/// Utility helpers used across the capture pipeline.
///
/// This module contains:
/// - Time helpers
/// - Small identifier helpers shared by collectors
///
/// IMPORTANT:
/// - No source-specific business logic should live here.
/// - This module must remain lightweight and deterministic.
use std::time::{SystemTime, UNIX_EPOCH};

/// Returns the current Unix timestamp in milliseconds.
///
/// Used across the pipeline for:
/// - `received_at` stamps on intercepted events
/// - Retry scheduling bookkeeping exposed via status snapshots
///
/// PANIC:
/// - Panics if system time is before UNIX_EPOCH (should never happen).
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("System time is before UNIX_EPOCH")
        .as_millis() as i64
}

/// Collector id for the live tracker of a sport.
///
/// Example: "football" -> "live_football"
pub fn live_collector_id(sport: &str) -> String {
    format!("live_{}", sport)
}

/// Collector id for a daily collector over a date range.
///
/// Example: ("football", 2026-08-20, 2026-08-24)
///          -> "daily_football_2026-08-20_2026-08-24"
pub fn daily_collector_id(
    sport: &str,
    start: chrono::NaiveDate,
    end: chrono::NaiveDate,
) -> String {
    format!("daily_{}_{}_{}", sport, start, end)
}
