//! Routes stored events to the plugins registered for their stream,
//! with a per-delivery timeout and a graceful drain on shutdown.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::domain::engine::{Emitter, EventSink};
use crate::domain::event::{Actor, Event, EventType};
use crate::plugin::host::PluginHost;
use crate::plugin::wire::PluginEventWire;

/// Default bound on how long a single plugin delivery may take before
/// it is abandoned.
pub const DEFAULT_DELIVERY_TIMEOUT_MS: u64 = 5_000;

struct Registration {
    pattern: String,
    plugin_name: String,
}

/// `pattern` matches `stream` exactly, or as a prefix when `pattern`
/// ends in `*` (e.g. `"room:*"` matches `"room:1"` and `"room:lobby"`,
/// `"*"` matches everything).
fn pattern_matches(pattern: &str, stream: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => stream.starts_with(prefix),
        None => pattern == stream,
    }
}

/// Plugin names registered under a pattern matching `stream`, deduped
/// so a plugin registered under two overlapping patterns is still
/// delivered to at most once per event.
fn matching_plugins(registrations: &[Registration], stream: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    registrations
        .iter()
        .filter(|r| pattern_matches(&r.pattern, stream))
        .map(|r| r.plugin_name.clone())
        .filter(|name| seen.insert(name.clone()))
        .collect()
}

pub struct PluginSubscriber {
    host: Arc<PluginHost>,
    emitter: Arc<dyn Emitter>,
    registrations: RwLock<Vec<Registration>>,
    tracker: TaskTracker,
    token: CancellationToken,
    timeout: Duration,
}

impl PluginSubscriber {
    pub fn new(host: Arc<PluginHost>, emitter: Arc<dyn Emitter>, timeout: Duration) -> Self {
        Self {
            host,
            emitter,
            registrations: RwLock::new(Vec::new()),
            tracker: TaskTracker::new(),
            token: CancellationToken::new(),
            timeout,
        }
    }

    /// Route events whose stream matches `pattern` to `plugin_name`.
    /// An empty plugin name or pattern is rejected with a warning and
    /// ignored; subscribing a not-yet-loaded plugin is permitted (it
    /// simply never matches `host.has` until the plugin loads).
    pub fn register(&self, pattern: impl Into<String>, plugin_name: impl Into<String>) {
        let pattern = pattern.into();
        let plugin_name = plugin_name.into();
        if pattern.is_empty() || plugin_name.is_empty() {
            warn!(plugin = %plugin_name, pattern = %pattern, "refusing to register an empty plugin name or pattern");
            return;
        }
        if !self.host.has(&plugin_name) {
            debug!(plugin = %plugin_name, pattern = %pattern, "subscribing a not-yet-loaded plugin");
        }
        self.registrations.write().push(Registration { pattern, plugin_name });
    }

    /// Spawn a delivery task for every registration whose pattern
    /// matches `event`'s stream. Each delivery runs independently and
    /// fire-and-forget: a slow or failing plugin never blocks the
    /// engine that produced the event.
    pub fn handle_event(&self, event: Event) {
        if self.token.is_cancelled() {
            warn!(event_id = %event.id, stream = %event.stream, event_type = ?event.event_type, "dropping event: plugin subscriber stopped");
            return;
        }

        let plugins = matching_plugins(&self.registrations.read(), &event.stream);
        if plugins.is_empty() {
            return;
        }

        let wire = PluginEventWire::from_event(&event);
        for plugin_name in plugins {
            let host = self.host.clone();
            let emitter = self.emitter.clone();
            let parent = self.token.clone();
            let timeout = self.timeout;
            let wire = wire.clone();
            self.tracker.spawn(async move {
                deliver_one(host, emitter, parent, timeout, plugin_name, wire).await;
            });
        }
    }

    /// Stop accepting new registrations' effects and wait for every
    /// in-flight delivery to finish (or be cancelled by its timeout).
    pub async fn stop(&self) {
        self.token.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

impl EventSink for PluginSubscriber {
    fn on_event(&self, event: &Event) {
        self.handle_event(event.clone());
    }
}

async fn deliver_one(host: Arc<PluginHost>, emitter: Arc<dyn Emitter>, parent: CancellationToken, timeout: Duration, plugin_name: String, wire: PluginEventWire) {
    let child = parent.child_token();
    let outcome = tokio::select! {
        _ = child.cancelled() => {
            debug!(plugin = %plugin_name, "delivery cancelled before completion");
            return;
        }
        result = tokio::time::timeout(timeout, host.deliver(&plugin_name, &wire)) => result,
    };

    let response = match outcome {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => {
            warn!(plugin = %plugin_name, error = %e, "plugin delivery failed");
            return;
        }
        Err(_) => {
            warn!(plugin = %plugin_name, "plugin delivery timed out");
            return;
        }
    };

    if parent.is_cancelled() {
        warn!(plugin = %plugin_name, emit_count = response.emissions.len(), "shutdown in progress, dropping plugin emissions");
        return;
    }

    let emit_count = response.emissions.len();
    let mut failures = 0usize;
    for (emit_index, emission) in response.emissions.into_iter().enumerate() {
        if emission.stream.is_empty() {
            warn!(plugin = %plugin_name, emit_index, emit_count, "plugin emission has an empty stream, dropping");
            failures += 1;
            continue;
        }
        let Some(event_type) = EventType::parse(&emission.event_type) else {
            warn!(plugin = %plugin_name, emit_index, emit_count, emitted_type = %emission.event_type, "plugin emitted an unknown event type, dropping");
            failures += 1;
            continue;
        };
        let payload = emission.payload.into_bytes();
        if let Err(e) = emitter
            .emit(&emission.stream, event_type, Actor::plugin(&plugin_name), payload)
            .await
        {
            warn!(plugin = %plugin_name, emit_index, emit_count, emitted_stream = %emission.stream, emitted_type = %emission.event_type, error = %e, "plugin emission rejected");
            failures += 1;
        }
    }
    if failures > 0 {
        warn!(plugin = %plugin_name, failures, emit_count, "one or more plugin emissions failed");
    }
}
