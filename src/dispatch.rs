use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use regex::Regex;
use serde_json::Value;

use crate::error::CollectError;
use crate::metrics::METRICS;
use crate::util;

/// Origin of an intercepted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSource {
    /// HTTP response observed on the page
    Http,
    /// WebSocket frame observed on the page
    Ws,
}

/// A structured record derived from observing network traffic the
/// browser engine already received.
///
/// Value object: produced by interceptors, consumed by handlers,
/// never persisted directly.
#[derive(Debug, Clone)]
pub struct InterceptedEvent {
    pub source: EventSource,
    pub pattern: String,
    /// Numbered capture groups (1..) of the matching pattern
    pub groups: Vec<String>,
    pub body: Value,
    /// Unix milliseconds at interception time
    pub received_at: i64,
}

/// Handler invoked for every event matching its pattern.
///
/// CONTRACT:
/// - Must be quick: parse + handoff only, slow work goes through a
///   channel so interception is never blocked.
/// - Must not panic; fallible work is logged inside the handler.
///   One handler's logged failure never prevents the remaining
///   handlers from running.
pub type PatternHandler = Arc<dyn Fn(&InterceptedEvent) + Send + Sync>;

/// A named URL pattern. Immutable once registered; names are unique.
struct InterceptPattern {
    name: String,
    regex: Regex,
}

/// Classifies intercepted URLs against named patterns and invokes
/// registered handlers.
///
/// DESIGN:
/// - Explicit registry object, owned by the collector that built it
///   and shared with interceptors by reference. No ambient globals.
/// - Dispatch-to-all-matches: an URL matching several patterns fires
///   every matching pattern's handlers, in registration order. This
///   favors composability over first-match semantics.
/// - Built mutably during collector setup, then shared immutably
///   behind an `Arc` for the lifetime of the page. No locking on the
///   dispatch path.
pub struct PatternDispatcher {
    patterns: Vec<InterceptPattern>,
    handlers: HashMap<String, Vec<PatternHandler>>,
}

/// A single pattern match for a URL.
pub struct PatternMatch {
    pub pattern: String,
    pub groups: Vec<String>,
}

impl PatternDispatcher {
    pub fn new() -> Self {
        Self {
            patterns: Vec::new(),
            handlers: HashMap::new(),
        }
    }

    /// A dispatcher pre-loaded with the full interception catalog.
    pub fn with_default_patterns() -> Self {
        let mut d = Self::new();
        for (name, pattern) in DEFAULT_PATTERNS {
            d.register(name, pattern)
                .expect("default pattern catalog is valid");
        }
        d
    }

    /// Register a named pattern.
    ///
    /// Fails if `name` is already registered or the expression does
    /// not compile. Patterns are immutable once registered.
    pub fn register(&mut self, name: &str, pattern: &str) -> Result<(), CollectError> {
        if self.patterns.iter().any(|p| p.name == name) {
            return Err(CollectError::PatternRegistry(format!(
                "pattern '{}' already registered",
                name
            )));
        }
        let regex = Regex::new(pattern).map_err(|e| {
            CollectError::PatternRegistry(format!("pattern '{}' invalid: {}", name, e))
        })?;
        self.patterns.push(InterceptPattern {
            name: name.to_string(),
            regex,
        });
        self.handlers.insert(name.to_string(), Vec::new());
        Ok(())
    }

    /// Append a handler to a pattern's handler list.
    ///
    /// Fails if `name` is unknown. Handlers run in registration order.
    pub fn on(&mut self, name: &str, handler: PatternHandler) -> Result<(), CollectError> {
        match self.handlers.get_mut(name) {
            Some(list) => {
                list.push(handler);
                log::debug!("registered handler for pattern '{}'", name);
                Ok(())
            }
            None => Err(CollectError::PatternRegistry(format!(
                "unknown pattern '{}'",
                name
            ))),
        }
    }

    /// Evaluate a URL against every registered pattern.
    ///
    /// Returns all matches, in pattern registration order. Used by
    /// interceptors to decide whether a body is worth parsing before
    /// paying the parsing cost.
    pub fn match_url(&self, url: &str) -> Vec<PatternMatch> {
        let mut matches = Vec::new();
        for pattern in &self.patterns {
            if let Some(caps) = pattern.regex.captures(url) {
                let groups = caps
                    .iter()
                    .skip(1)
                    .map(|g| g.map(|m| m.as_str().to_string()).unwrap_or_default())
                    .collect();
                matches.push(PatternMatch {
                    pattern: pattern.name.clone(),
                    groups,
                });
            }
        }
        matches
    }

    /// Whether any handler exists for any pattern matching this URL.
    pub fn wants(&self, url: &str) -> bool {
        self.match_url(url)
            .iter()
            .any(|m| !self.handlers[&m.pattern].is_empty())
    }

    /// Dispatch a parsed body to the handlers of every pattern the
    /// URL matches.
    ///
    /// An URL matching zero patterns is a no-op, not an error.
    /// Returns the number of handlers invoked.
    pub fn dispatch(&self, source: EventSource, url: &str, body: &Value) -> usize {
        let mut invoked = 0;
        for m in self.match_url(url) {
            let event = InterceptedEvent {
                source,
                pattern: m.pattern.clone(),
                groups: m.groups,
                body: body.clone(),
                received_at: util::now_ms(),
            };
            for handler in &self.handlers[&m.pattern] {
                handler(&event);
                invoked += 1;
            }
        }
        if invoked > 0 {
            METRICS.events_dispatched.fetch_add(invoked, Ordering::Relaxed);
        }
        invoked
    }

    pub fn pattern_names(&self) -> Vec<&str> {
        self.patterns.iter().map(|p| p.name.as_str()).collect()
    }
}

impl Default for PatternDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// The interception catalog.
///
/// These target an external, uncontrolled surface; the shapes mirror
/// the site's API paths as observed, not a protocol we define.
///
/// NOTE:
/// - `scheduled` is end-anchored so it cannot also swallow the
///   `/inverse` variant (the `regex` crate has no lookahead).
pub const DEFAULT_PATTERNS: &[(&str, &str)] = &[
    (
        "scheduled",
        r"/api/v1/sport/([\w-]+)/scheduled-events/(\d{4}-\d{2}-\d{2})$",
    ),
    (
        "inverse",
        r"/api/v1/sport/([\w-]+)/scheduled-events/(\d{4}-\d{2}-\d{2})/inverse",
    ),
    ("live", r"/api/v1/sport/([\w-]+)/events/live"),
    ("featured", r"/api/v1/odds/\d+/featured-events/([\w-]+)"),
    ("event", r"/api/v1/event/(\d+)$"),
    ("statistics", r"/api/v1/event/(\d+)/statistics"),
    ("incidents", r"/api/v1/event/(\d+)/incidents"),
    ("lineups", r"/api/v1/event/(\d+)/lineups"),
    ("h2h", r"/api/v1/event/(\d+)/h2h"),
    ("odds", r"/api/v1/event/(\d+)/odds/\d+/all"),
    ("team", r"/api/v1/team/(\d+)$"),
    ("league", r"/api/v1/unique-tournament/(\d+)$"),
];

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    fn recording_handler(log: Arc<Mutex<Vec<String>>>, tag: &str) -> PatternHandler {
        let tag = tag.to_string();
        Arc::new(move |event| {
            log.lock()
                .unwrap()
                .push(format!("{}:{}", tag, event.pattern));
        })
    }

    #[test]
    fn duplicate_registration_fails() {
        let mut d = PatternDispatcher::new();
        d.register("live", r"/events/live").unwrap();
        assert!(d.register("live", r"/other").is_err());
    }

    #[test]
    fn handler_for_unknown_pattern_fails() {
        let mut d = PatternDispatcher::new();
        let res = d.on("nope", Arc::new(|_| {}));
        assert!(res.is_err());
    }

    #[test]
    fn non_matching_url_is_noop() {
        let mut d = PatternDispatcher::new();
        d.register("live", r"/events/live").unwrap();
        d.on("live", Arc::new(|_| panic!("must not run"))).unwrap();
        let n = d.dispatch(EventSource::Http, "/api/v1/odds", &json!({}));
        assert_eq!(n, 0);
    }

    #[test]
    fn all_matching_patterns_fire_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut d = PatternDispatcher::new();
        d.register("broad", r"/api/v1/sport/(\w+)").unwrap();
        d.register("narrow", r"/api/v1/sport/(\w+)/events/live")
            .unwrap();
        d.on("broad", recording_handler(log.clone(), "a")).unwrap();
        d.on("narrow", recording_handler(log.clone(), "b")).unwrap();
        d.on("narrow", recording_handler(log.clone(), "c")).unwrap();

        let n = d.dispatch(
            EventSource::Http,
            "https://x/api/v1/sport/tennis/events/live",
            &json!({}),
        );
        assert_eq!(n, 3);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["a:broad", "b:narrow", "c:narrow"]
        );
    }

    // The worked example: live pattern, football URL, two events.
    #[test]
    fn live_pattern_example() {
        let seen: Arc<Mutex<Vec<(Vec<String>, usize)>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_in = seen.clone();

        let mut d = PatternDispatcher::new();
        d.register("live", r"/sport/(\w+)/events/live").unwrap();
        d.on(
            "live",
            Arc::new(move |event| {
                let events = event.body["events"].as_array().map(|a| a.len()).unwrap_or(0);
                seen_in
                    .lock()
                    .unwrap()
                    .push((event.groups.clone(), events));
            }),
        )
        .unwrap();

        d.dispatch(
            EventSource::Http,
            "https://www.example.com/sport/football/events/live",
            &json!({"events": [{"id": 1}, {"id": 2}]}),
        );

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0[0], "football");
        assert_eq!(seen[0].1, 2);
    }

    #[test]
    fn default_catalog_separates_scheduled_and_inverse() {
        let d = PatternDispatcher::with_default_patterns();

        let plain = d.match_url("https://x/api/v1/sport/football/scheduled-events/2026-08-24");
        assert_eq!(plain.len(), 1);
        assert_eq!(plain[0].pattern, "scheduled");
        assert_eq!(plain[0].groups, vec!["football", "2026-08-24"]);

        let inverse =
            d.match_url("https://x/api/v1/sport/football/scheduled-events/2026-08-24/inverse");
        assert_eq!(inverse.len(), 1);
        assert_eq!(inverse[0].pattern, "inverse");
    }

    #[test]
    fn default_catalog_detail_patterns() {
        let d = PatternDispatcher::with_default_patterns();
        for (url, expected) in [
            ("https://x/api/v1/event/1234", "event"),
            ("https://x/api/v1/event/1234/statistics", "statistics"),
            ("https://x/api/v1/event/1234/incidents", "incidents"),
            ("https://x/api/v1/event/1234/lineups", "lineups"),
            ("https://x/api/v1/event/1234/h2h", "h2h"),
            ("https://x/api/v1/event/1234/odds/1/all", "odds"),
            ("https://x/api/v1/team/42", "team"),
            ("https://x/api/v1/unique-tournament/17", "league"),
        ] {
            let matches = d.match_url(url);
            assert_eq!(matches.len(), 1, "url {}", url);
            assert_eq!(matches[0].pattern, expected, "url {}", url);
        }
    }
}
