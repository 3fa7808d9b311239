//! Heuristic "page settled" signal from filtered request traffic.
//!
//! The monitor mirrors CDP network events into a pending-request set and
//! reports stability once that set has been empty for a configured idle
//! window. It is a best-effort readiness heuristic, not a proof that the
//! page is interactive.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use headless_chrome::Tab;
use headless_chrome::protocol::cdp::Network;
use headless_chrome::protocol::cdp::Network::ResourceType;
use headless_chrome::protocol::cdp::types::Event;
use log::{debug, warn};

use crate::error::{BrowserError, Result};

/// Responses larger than this never gate page readiness.
const MAX_GATING_BODY_BYTES: u64 = 5 * 1024 * 1024;

/// URL fragments whose requests never count: analytics, ads, social and
/// chat widgets, push/heartbeat endpoints, large CDNs.
const IGNORED_URL_FRAGMENTS: &[&str] = &[
    "google-analytics",
    "googletagmanager",
    "doubleclick",
    "adservice",
    "googlesyndication",
    "facebook.com/tr",
    "connect.facebook.net",
    "analytics",
    "hotjar",
    "mixpanel",
    "segment.io",
    "amplitude",
    "fullstory",
    "clarity.ms",
    "sentry.io",
    "intercom",
    "drift.com",
    "crisp.chat",
    "tawk.to",
    "livechat",
    "onesignal",
    "pushwoosh",
    "heartbeat",
    "/beacon",
    "/ping",
    "cloudfront.net",
    "fastly.net",
];

/// Content-type prefixes that gate readiness.
const RELEVANT_CONTENT_PREFIXES: &[&str] = &[
    "text/html",
    "text/css",
    "text/javascript",
    "application/javascript",
    "application/json",
    "image/",
    "font/",
    "application/font",
];

/// Content-type fragments that mark open-ended streams.
const STREAMING_CONTENT_FRAGMENTS: &[&str] =
    &["eventstream", "event-stream", "websocket", "video/", "audio/", "grpc"];

/// Fetch purposes that mark speculative or media traffic.
const IGNORED_FETCH_PURPOSES: &[&str] = &["prefetch", "video", "audio"];

/// Resource types that gate readiness. CDP folds subframe documents into
/// `Document`; streaming and socket-like types are deliberately absent.
pub fn is_tracked_resource(resource_type: &ResourceType) -> bool {
    matches!(
        resource_type,
        ResourceType::Document
            | ResourceType::Stylesheet
            | ResourceType::Image
            | ResourceType::Font
            | ResourceType::Script
    )
}

fn is_ignored_url(url: &str) -> bool {
    if url.starts_with("data:") || url.starts_with("blob:") {
        return true;
    }
    let lower = url.to_ascii_lowercase();
    IGNORED_URL_FRAGMENTS
        .iter()
        .any(|fragment| lower.contains(fragment))
}

fn is_relevant_content_type(mime: &str) -> bool {
    let lower = mime.to_ascii_lowercase();
    RELEVANT_CONTENT_PREFIXES
        .iter()
        .any(|prefix| lower.starts_with(prefix))
}

fn is_streaming_content_type(mime: &str) -> bool {
    let lower = mime.to_ascii_lowercase();
    STREAMING_CONTENT_FRAGMENTS
        .iter()
        .any(|fragment| lower.contains(fragment))
}

fn is_ignored_purpose(purpose: &str) -> bool {
    let lower = purpose.to_ascii_lowercase();
    IGNORED_FETCH_PURPOSES
        .iter()
        .any(|ignored| lower.contains(ignored))
}

/// Case-insensitive header lookup over the CDP header map.
fn header_value(headers: &Network::Headers, names: &[&str]) -> Option<String> {
    let value = serde_json::to_value(headers).ok()?;
    let object = value.as_object()?;
    for (key, entry) in object {
        let key = key.to_ascii_lowercase();
        if names.contains(&key.as_str()) {
            return entry.as_str().map(str::to_string);
        }
    }
    None
}

struct PendingState {
    requests: HashMap<String, String>,
    last_activity: Instant,
}

/// Tracks in-flight page-shaping requests for one tab.
pub struct NetworkIdleMonitor {
    state: Mutex<PendingState>,
}

impl NetworkIdleMonitor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(PendingState {
                requests: HashMap::new(),
                last_activity: Instant::now(),
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, PendingState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Enable the Network domain and start mirroring its events.
    pub fn attach(self: &Arc<Self>, tab: &Arc<Tab>) -> Result<()> {
        tab.call_method(Network::Enable {
            max_total_buffer_size: None,
            max_resource_buffer_size: None,
            max_post_data_size: None,
            report_direct_socket_traffic: None,
            enable_durable_messages: None,
        })
        .map_err(|e| BrowserError::TabOperationFailed(format!("Network.enable failed: {e}")))?;

        let monitor = Arc::clone(self);
        tab.add_event_listener(Arc::new(move |event: &Event| match event {
            Event::NetworkRequestWillBeSent(e) => {
                let purpose = header_value(
                    &e.params.request.headers,
                    &["purpose", "x-purpose", "sec-purpose", "sec-fetch-dest"],
                );
                monitor.on_request(
                    &e.params.request_id,
                    &e.params.request.url,
                    e.params.Type.as_ref(),
                    purpose.as_deref(),
                );
            }
            Event::NetworkResponseReceived(e) => {
                let content_length = header_value(
                    &e.params.response.headers,
                    &["content-length"],
                )
                .and_then(|v| v.parse::<u64>().ok());
                monitor.on_response(
                    &e.params.request_id,
                    &e.params.response.mime_type,
                    content_length,
                );
            }
            Event::NetworkLoadingFinished(e) => {
                monitor.on_finished(&e.params.request_id);
            }
            Event::NetworkLoadingFailed(e) => {
                monitor.on_failed(&e.params.request_id);
            }
            _ => {}
        }))
        .map_err(|e| {
            BrowserError::TabOperationFailed(format!("network listener registration failed: {e}"))
        })?;
        Ok(())
    }

    /// A request went out. Adds it to the pending set when it qualifies.
    pub fn on_request(
        &self,
        request_id: &str,
        url: &str,
        resource_type: Option<&ResourceType>,
        fetch_purpose: Option<&str>,
    ) {
        match resource_type {
            Some(t) if is_tracked_resource(t) => {}
            _ => return,
        }
        if is_ignored_url(url) {
            return;
        }
        if fetch_purpose.is_some_and(is_ignored_purpose) {
            return;
        }
        let mut state = self.lock();
        state
            .requests
            .insert(request_id.to_string(), url.to_string());
        state.last_activity = Instant::now();
    }

    /// Response headers arrived. Disqualified responses (streaming or
    /// irrelevant content, oversized bodies) leave the pending set without
    /// refreshing the idle clock.
    pub fn on_response(&self, request_id: &str, mime_type: &str, content_length: Option<u64>) {
        let disqualified = !is_relevant_content_type(mime_type)
            || is_streaming_content_type(mime_type)
            || content_length.is_some_and(|len| len > MAX_GATING_BODY_BYTES);
        if !disqualified {
            return;
        }
        let mut state = self.lock();
        if state.requests.remove(request_id).is_some() {
            debug!("dropped non-gating response ({mime_type}) from pending set");
        }
    }

    /// The body finished loading: qualifying activity.
    pub fn on_finished(&self, request_id: &str) {
        let mut state = self.lock();
        if state.requests.remove(request_id).is_some() {
            state.last_activity = Instant::now();
        }
    }

    /// The request died; it no longer gates readiness.
    pub fn on_failed(&self, request_id: &str) {
        self.lock().requests.remove(request_id);
    }

    pub fn pending_count(&self) -> usize {
        self.lock().requests.len()
    }

    pub fn pending_urls(&self) -> Vec<String> {
        self.lock().requests.values().cloned().collect()
    }

    /// Seconds since the pending set last changed in a qualifying way.
    pub fn quiet_for(&self) -> Duration {
        self.lock().last_activity.elapsed()
    }

    /// Wait until the pending set has been empty for `idle_window`.
    ///
    /// Gives up after `max_wait`, logging what was still in flight, and
    /// returns whether the network actually settled.
    pub async fn wait_for_idle(&self, idle_window: Duration, max_wait: Duration) -> bool {
        let started = Instant::now();
        loop {
            {
                let state = self.lock();
                if state.requests.is_empty() && state.last_activity.elapsed() >= idle_window {
                    return true;
                }
            }
            if started.elapsed() >= max_wait {
                let pending = self.pending_urls();
                warn!(
                    "network never settled after {:.1}s; still pending: {:?}",
                    max_wait.as_secs_f64(),
                    pending
                );
                return false;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}
