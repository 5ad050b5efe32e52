// ------------------------------------------------------------
// Module declarations
// ------------------------------------------------------------
//
// Each module represents a well-defined responsibility:
//
// - config:      Configuration structs loaded from JSON
// - error:       Unified error taxonomy (recoverable vs. terminal)
// - util:        Shared helper utilities (time, collector ids)
// - metrics:     Global runtime counters
// - schema:      Normalized record definitions and field catalogs
// - parsers:     Pure payload-to-record parsers
// - storage:     In-memory store behind a single-writer task
// - dispatch:    URL pattern registry and handler dispatch
// - engine:      Browser engine capability traits + CDP backend
// - intercept:   HTTP response and WebSocket interceptors
// - ratelimit:   Self-imposed per-source pacing gates
// - pool:        Per-source browser context ownership
// - handlers:    Interception-to-persistence glue
// - collector:   Collector state machine and strategies
// - coordinator: Collector registry and lifecycle orchestration
//
mod collector;
mod config;
mod coordinator;
mod dispatch;
mod engine;
mod error;
mod handlers;
mod intercept;
mod metrics;
mod parsers;
mod pool;
mod ratelimit;
mod schema;
mod storage;
mod util;

// ------------------------------------------------------------
// External dependencies
// ------------------------------------------------------------

use rustls::crypto::{CryptoProvider, ring};

use config::Config;
use coordinator::Coordinator;
use engine::cdp::CdpEngine;
use metrics::METRICS;
use pool::BrowserContextPool;
use storage::StoreHandle;

use std::fs;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::time::sleep;

// ------------------------------------------------------------
// Application entry point
// ------------------------------------------------------------
//
// This is the main runtime for the sports-data capture pipeline.
//
// Responsibilities:
// - Initialize cryptography backend (rustls)
// - Load configuration
// - Connect to the already-running browser engine
// - Start one live tracker per enabled sport
// - Run until interrupted, then tear everything down in order
//
// Single cooperative scheduler: every task in the pipeline is
// non-blocking, and the only real parallelism lives inside the
// browser engine.
#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    // --------------------------------------------------------
    // IMPORTANT:
    // rustls >= 0.23 requires an explicit CryptoProvider
    // installation. This must be executed exactly once and
    // as early as possible in the process lifecycle.
    //
    // Using the `ring` provider for performance and stability.
    // --------------------------------------------------------
    CryptoProvider::install_default(ring::default_provider())
        .expect("failed to install rustls CryptoProvider");

    // --------------------------------------------------------
    // Load configuration from disk
    // --------------------------------------------------------
    let config: Config = load_config("config.json")?;

    // --------------------------------------------------------
    // Connect to the browser engine
    //
    // The engine is an already-running Chromium exposing its
    // DevTools WebSocket endpoint; this process never spawns or
    // supervises the browser itself.
    // --------------------------------------------------------
    let engine = CdpEngine::connect(&config.browser.cdp_url).await?;
    let pool = Arc::new(BrowserContextPool::new(
        engine,
        config.browser.navigation_timeout(),
    ));

    // --------------------------------------------------------
    // Persistence: one store, one writer task
    // --------------------------------------------------------
    let store = StoreHandle::spawn();

    // --------------------------------------------------------
    // Start metrics reporter (periodic, low-noise)
    // --------------------------------------------------------
    tokio::spawn(async {
        loop {
            sleep(Duration::from_secs(10)).await;

            log::info!(
                "[METRICS] col={} ctx={} resp={} matched={} frames={} disp={} upserts={} parse_err={} handler_err={} nav_fail={} retries={} refreshes={}",
                METRICS.collectors_active.load(Ordering::Relaxed),
                METRICS.contexts_active.load(Ordering::Relaxed),
                METRICS.responses_seen.load(Ordering::Relaxed),
                METRICS.responses_matched.load(Ordering::Relaxed),
                METRICS.ws_frames_seen.load(Ordering::Relaxed),
                METRICS.events_dispatched.load(Ordering::Relaxed),
                METRICS.records_upserted.load(Ordering::Relaxed),
                METRICS.parse_errors.load(Ordering::Relaxed),
                METRICS.handler_errors.load(Ordering::Relaxed),
                METRICS.navigation_failures.load(Ordering::Relaxed),
                METRICS.collector_retries.load(Ordering::Relaxed),
                METRICS.page_refreshes.load(Ordering::Relaxed),
            );
        }
    });

    // --------------------------------------------------------
    // Start one live tracker per enabled sport
    // --------------------------------------------------------
    let coordinator = Coordinator::new(config, pool, store);
    coordinator.add_live_trackers_for_all_sports();

    // --------------------------------------------------------
    // Run until Ctrl-C, then shut down cleanly
    //
    // All collectors run in background tasks; the coordinator
    // cancels and joins every one of them on the way out.
    // --------------------------------------------------------
    coordinator.run_forever().await;

    Ok(())
}

// ------------------------------------------------------------
// Configuration loader
// ------------------------------------------------------------
//
// Reads a JSON configuration file from disk and deserializes
// it into the strongly typed `Config` structure.
//
// TODO:
// - Support CLI override (e.g. --config path)
//
fn load_config(path: &str) -> anyhow::Result<Config> {
    let data = fs::read_to_string(path)?;
    let cfg = serde_json::from_str(&data)?;
    Ok(cfg)
}
