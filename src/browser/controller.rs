//! Page controller: attach/detach, load synchronization, snapshot refresh,
//! and the action surface handed to the decision loop.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use headless_chrome::Tab;
use headless_chrome::protocol::cdp::Page;
use log::{debug, warn};
use serde::Deserialize;

use crate::browser::host::{DomScriptHost, HostScripter};
use crate::browser::interaction::{DropdownOption, DropdownSelection, InteractionExecutor};
use crate::browser::network::NetworkIdleMonitor;
use crate::browser::session::BrowserSession;
use crate::config::AutomationConfig;
use crate::dom::node::{DomTree, SelectorMap};
use crate::dom::snapshot::DomSnapshotBuilder;
use crate::error::{BrowserError, Result};

/// One fully rebuilt perception of the page at a point in time.
///
/// Replaced wholesale on successful refresh; the previous value survives a
/// failed refresh so callers always see the last known good state.
#[derive(Debug)]
pub struct PageState {
    pub tree: DomTree,
    pub selector_map: SelectorMap,
    pub tab_id: String,
    pub url: String,
    pub title: String,
    /// Base64 PNG, captured on request.
    pub screenshot: Option<String>,
    pub pixels_above: f64,
    pub pixels_below: f64,
}

impl PageState {
    /// The placeholder used before the first refresh and for ineligible
    /// targets.
    pub fn empty() -> Self {
        Self {
            tree: DomTree::empty(),
            selector_map: SelectorMap::new(),
            tab_id: String::new(),
            url: String::new(),
            title: String::new(),
            screenshot: None,
            pixels_above: 0.0,
            pixels_below: 0.0,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.tab_id.is_empty() && self.selector_map.is_empty()
    }

    /// One line per indexed element, the form the decision loop consumes.
    pub fn interactive_elements_summary(&self) -> Vec<String> {
        self.selector_map
            .iter()
            .filter_map(|(index, id)| {
                let element = self.tree.element(id)?;
                let mut hints = String::new();
                for attr in ["aria-label", "placeholder", "type"] {
                    if let Some(value) = element.get_attribute(attr) {
                        hints.push_str(&format!(" {attr}={value:?}"));
                    }
                }
                let mut text = self.tree.visible_text(id);
                if text.chars().count() > 80 {
                    text = text.chars().take(77).collect::<String>() + "...";
                }
                Some(format!("[{index}]<{}{hints}> {text}", element.tag()))
            })
            .collect()
    }
}

/// A target qualifies for automation only when it has a tab identity and an
/// http(s) URL; browser-internal pages never do.
pub fn is_automatable(tab_id: &str, url: &str) -> bool {
    !tab_id.is_empty() && (url.starts_with("http://") || url.starts_with("https://"))
}

/// Normalize shorthand URLs the way a address bar would.
pub fn normalize_url(url: &str) -> String {
    let trimmed = url.trim();

    for prefix in [
        "http://",
        "https://",
        "file://",
        "data:",
        "about:",
        "chrome://",
        "chrome-extension://",
    ] {
        if trimmed.starts_with(prefix) {
            return trimmed.to_string();
        }
    }

    if trimmed.starts_with('/') || trimmed.starts_with("./") || trimmed.starts_with("../") {
        return trimmed.to_string();
    }

    if trimmed.starts_with("localhost") || trimmed.starts_with("127.0.0.1") {
        return format!("http://{trimmed}");
    }

    if trimmed.contains('.') {
        return format!("https://{trimmed}");
    }

    // Bare word: treat it as a .com domain.
    format!("https://www.{trimmed}.com")
}

/// Shim suite installed once per attach and re-run on every new document:
/// hide the automation marker, keep permission probes benign, and force
/// shadow roots open so extraction can see into them.
const NEW_DOCUMENT_SHIMS_JS: &str = r#"(function () {
    try {
        Object.defineProperty(navigator, "webdriver", {
            get: function () { return undefined; },
            configurable: true,
        });
    } catch (e) {}
    try {
        if (window.navigator.permissions && window.navigator.permissions.query) {
            const originalQuery =
                window.navigator.permissions.query.bind(window.navigator.permissions);
            window.navigator.permissions.query = function (parameters) {
                if (parameters && parameters.name === "notifications") {
                    return Promise.resolve({ state: Notification.permission });
                }
                return originalQuery(parameters);
            };
        }
    } catch (e) {}
    try {
        if (Element.prototype.attachShadow) {
            const nativeAttachShadow = Element.prototype.attachShadow;
            Element.prototype.attachShadow = function (init) {
                return nativeAttachShadow.call(
                    this, Object.assign({}, init, { mode: "open" }));
            };
        }
    } catch (e) {}
})()"#;

const SCROLL_STATE_JS: &str = r#"JSON.stringify({
    above: window.scrollY,
    below: Math.max(0,
        document.documentElement.scrollHeight - window.innerHeight - window.scrollY)
})"#;

struct Attachment {
    tab: Arc<Tab>,
    monitor: Arc<NetworkIdleMonitor>,
    builder: DomSnapshotBuilder,
    executor: InteractionExecutor,
}

/// Orchestrates perception and action for one tab.
///
/// One action or snapshot in flight at a time; the `&mut self` surface
/// leaves serialization to the caller, which is the decision loop's job.
pub struct PageController {
    session: BrowserSession,
    config: AutomationConfig,
    custom_host: Option<Arc<dyn HostScripter>>,
    attachment: Option<Attachment>,
    state: Arc<PageState>,
    recovered_once: bool,
}

impl PageController {
    pub fn new(session: BrowserSession, config: AutomationConfig) -> Self {
        Self {
            session,
            config,
            custom_host: None,
            attachment: None,
            state: Arc::new(PageState::empty()),
            recovered_once: false,
        }
    }

    /// Substitute the last-resort scripting capability (for example
    /// OS-level automation) before attaching.
    pub fn with_host_scripter(mut self, host: Arc<dyn HostScripter>) -> Self {
        self.custom_host = Some(host);
        self
    }

    pub fn is_attached(&self) -> bool {
        self.attachment.is_some()
    }

    pub fn session(&self) -> &BrowserSession {
        &self.session
    }

    /// Last known good state, without touching the page.
    pub fn current_state(&self) -> Arc<PageState> {
        Arc::clone(&self.state)
    }

    /// Open the automation transport on the active tab. Idempotent.
    pub async fn attach(&mut self) -> Result<()> {
        if self.attachment.is_some() {
            return Ok(());
        }
        let tab = self.session.active_tab()?;
        self.attach_to(tab)
    }

    fn attach_to(&mut self, tab: Arc<Tab>) -> Result<()> {
        install_new_document_shims(&tab)?;

        let monitor = NetworkIdleMonitor::new();
        monitor.attach(&tab)?;

        let host: Arc<dyn HostScripter> = match &self.custom_host {
            Some(host) => Arc::clone(host),
            None => Arc::new(DomScriptHost::new(Arc::clone(&tab))),
        };
        let executor = InteractionExecutor::new(
            Arc::clone(&tab),
            self.config.include_dynamic_attributes,
            host,
            Arc::clone(&monitor),
        );
        self.attachment = Some(Attachment {
            builder: DomSnapshotBuilder::new(&self.config),
            tab,
            monitor,
            executor,
        });
        Ok(())
    }

    /// Disconnect and forget everything about the page.
    pub fn detach(&mut self) {
        self.attachment = None;
        self.state = Arc::new(PageState::empty());
        self.recovered_once = false;
    }

    fn attachment(&self) -> Result<&Attachment> {
        self.attachment
            .as_ref()
            .ok_or(BrowserError::TransportNotConnected)
    }

    /// Refresh and return the page state.
    ///
    /// Ineligible targets (no tab identity, non-http URL) get the empty
    /// placeholder without error. A failed refresh keeps the previous
    /// state. A stale document triggers exactly one recovery attempt.
    pub async fn get_state(&mut self, include_screenshot: bool) -> Result<Arc<PageState>> {
        let (tab, monitor, builder) = self.handles()?;

        let tab_id = tab.get_target_id().to_string();
        let url = tab.get_url();
        if !is_automatable(&tab_id, &url) {
            debug!("target '{url}' is not automatable; returning placeholder");
            return Ok(Arc::new(PageState::empty()));
        }

        self.wait_for_page_load(&monitor).await;

        if let Err(e) = builder.remove_highlights(&tab) {
            debug!("overlay removal failed: {e}");
        }

        match builder.capture(&tab, None).await {
            Ok((tree, map)) => {
                let state = self
                    .compose_state(&tab, tree, map, include_screenshot)
                    .await;
                self.state = Arc::new(state);
                self.recovered_once = false;
                Ok(Arc::clone(&self.state))
            }
            Err(e) => {
                warn!("snapshot refresh failed, keeping previous state: {e}");
                if tab.evaluate("1", false).is_err() {
                    self.recover_stale_target()?;
                    let (tab, _, builder) = self.handles()?;
                    if let Ok((tree, map)) = builder.capture(&tab, None).await {
                        let state = self
                            .compose_state(&tab, tree, map, include_screenshot)
                            .await;
                        self.state = Arc::new(state);
                    }
                }
                Ok(Arc::clone(&self.state))
            }
        }
    }

    fn handles(&self) -> Result<(Arc<Tab>, Arc<NetworkIdleMonitor>, DomSnapshotBuilder)> {
        let att = self.attachment()?;
        Ok((
            Arc::clone(&att.tab),
            Arc::clone(&att.monitor),
            att.builder.clone(),
        ))
    }

    /// Adopt any surviving tab after the attached document vanished.
    /// One attempt per incident: a second loss before a successful refresh
    /// escalates to `NoValidPages`, as does an empty tab list.
    fn recover_stale_target(&mut self) -> Result<()> {
        if self.recovered_once {
            return Err(BrowserError::NoValidPages);
        }
        self.recovered_once = true;
        warn!("attached document is stale; switching to a surviving tab");
        let replacement = self.session.any_live_tab()?;
        self.attachment = None;
        self.attach_to(replacement)
    }

    async fn compose_state(
        &self,
        tab: &Arc<Tab>,
        tree: DomTree,
        selector_map: SelectorMap,
        include_screenshot: bool,
    ) -> PageState {
        let title = tab.get_title().unwrap_or_default();
        let screenshot = if include_screenshot {
            match tab.capture_screenshot(
                Page::CaptureScreenshotFormatOption::Png,
                None,
                None,
                true,
            ) {
                Ok(bytes) => Some(BASE64.encode(bytes)),
                Err(e) => {
                    debug!("screenshot capture failed: {e}");
                    None
                }
            }
        } else {
            None
        };
        let (pixels_above, pixels_below) = self.scroll_state(tab).unwrap_or((0.0, 0.0));

        PageState {
            tree,
            selector_map,
            tab_id: tab.get_target_id().to_string(),
            url: tab.get_url(),
            title,
            screenshot,
            pixels_above,
            pixels_below,
        }
    }

    fn scroll_state(&self, tab: &Arc<Tab>) -> Result<(f64, f64)> {
        #[derive(Deserialize)]
        struct ScrollState {
            above: f64,
            below: f64,
        }
        let result = tab
            .evaluate(SCROLL_STATE_JS, false)
            .map_err(|e| BrowserError::EvaluationFailed(e.to_string()))?;
        let payload: String = result
            .value
            .and_then(|v| serde_json::from_value(v).ok())
            .ok_or_else(|| {
                BrowserError::EvaluationFailed("scroll state probe returned nothing".to_string())
            })?;
        let state: ScrollState = serde_json::from_str(&payload)
            .map_err(|e| BrowserError::EvaluationFailed(format!("bad scroll state: {e}")))?;
        Ok((state.above, state.below))
    }

    /// Minimum settle delay, then network idle, capped by the maximum.
    /// Timeouts here are soft: logged and execution continues.
    async fn wait_for_page_load(&self, monitor: &Arc<NetworkIdleMonitor>) {
        let minimum = Duration::from_secs_f64(self.config.minimum_wait_page_load_time);
        let idle_window = Duration::from_secs_f64(self.config.wait_for_network_idle_page_load_time);
        let maximum = Duration::from_secs_f64(self.config.maximum_wait_page_load_time);

        tokio::time::sleep(minimum).await;
        let budget = maximum.saturating_sub(minimum);
        if budget.is_zero() {
            return;
        }
        if !monitor.wait_for_idle(idle_window, budget).await {
            warn!(
                "{}",
                BrowserError::NavigationTimeout(format!(
                    "network still busy after {:.1}s",
                    maximum.as_secs_f64()
                ))
            );
        }
    }

    /// Rebuild perception around one element before acting on it: its
    /// xpath and attributes may have changed since the last snapshot.
    async fn refresh_for_action(&mut self, focus_index: usize) -> Result<()> {
        let (tab, _, builder) = self.handles()?;
        if let Err(e) = builder.remove_highlights(&tab) {
            debug!("overlay removal failed: {e}");
        }
        match builder.capture(&tab, Some(focus_index)).await {
            Ok((tree, map)) => {
                let state = self.compose_state(&tab, tree, map, false).await;
                self.state = Arc::new(state);
                Ok(())
            }
            Err(e) => {
                warn!("pre-action refresh failed, acting on previous snapshot: {e}");
                Ok(())
            }
        }
    }

    /// Click the element currently indexed `index`.
    pub async fn click(&mut self, index: usize) -> Result<String> {
        self.refresh_for_action(index).await?;
        let state = Arc::clone(&self.state);
        let id = state.selector_map.get(index).ok_or_else(|| {
            BrowserError::ElementNotFound(format!("no element at index {index} after refresh"))
        })?;
        self.attachment()?.executor.click(&state.tree, id).await
    }

    /// Clear and type into the element currently indexed `index`.
    pub async fn input_text(&mut self, index: usize, text: &str) -> Result<String> {
        self.refresh_for_action(index).await?;
        let state = Arc::clone(&self.state);
        let id = state.selector_map.get(index).ok_or_else(|| {
            BrowserError::ElementNotFound(format!("no element at index {index} after refresh"))
        })?;
        self.attachment()?
            .executor
            .input_text(&state.tree, id, text)
            .await
    }

    /// Select a `<select>` option by exact trimmed text.
    pub async fn select_dropdown_option(
        &mut self,
        index: usize,
        text: &str,
    ) -> Result<DropdownSelection> {
        let state = Arc::clone(&self.state);
        let id = state.selector_map.get(index).ok_or_else(|| {
            BrowserError::ElementNotFound(format!("no element at index {index}"))
        })?;
        self.attachment()?
            .executor
            .select_dropdown_option(&state.tree, id, text)
            .await
    }

    /// List the options of the `<select>` at `index`.
    pub async fn get_dropdown_options(&mut self, index: usize) -> Result<Vec<DropdownOption>> {
        let state = Arc::clone(&self.state);
        let id = state.selector_map.get(index).ok_or_else(|| {
            BrowserError::ElementNotFound(format!("no element at index {index}"))
        })?;
        self.attachment()?
            .executor
            .get_dropdown_options(&state.tree, id)
            .await
    }

    /// Scroll until `text` is visible; `Ok(false)` when absent.
    pub async fn scroll_to_text(&mut self, text: &str) -> Result<bool> {
        self.attachment()?.executor.scroll_to_text(text).await
    }

    pub async fn scroll_down(&mut self, amount: Option<i64>) -> Result<()> {
        self.attachment()?.executor.scroll_down(amount).await
    }

    pub async fn scroll_up(&mut self, amount: Option<i64>) -> Result<()> {
        self.attachment()?.executor.scroll_up(amount).await
    }

    /// Send a key combo such as `"Control+a"` or `"Enter"`.
    pub async fn send_keys(&mut self, combo: &str) -> Result<String> {
        self.attachment()?.executor.send_keys(combo).await
    }

    /// Navigate to `url` (normalized), with soft load synchronization.
    pub async fn navigate(&mut self, url: &str) -> Result<()> {
        let (tab, monitor, _) = self.handles()?;
        let normalized = normalize_url(url);
        tab.navigate_to(&normalized)
            .map_err(|e| BrowserError::NavigationFailed(format!("{normalized}: {e}")))?;
        if let Err(e) = tab.wait_until_navigated() {
            warn!("{}", BrowserError::NavigationTimeout(e.to_string()));
        }
        self.wait_for_page_load(&monitor).await;
        Ok(())
    }

    pub async fn go_back(&mut self) -> Result<()> {
        self.history_step("window.history.back()").await
    }

    pub async fn go_forward(&mut self) -> Result<()> {
        self.history_step("window.history.forward()").await
    }

    async fn history_step(&mut self, script: &str) -> Result<()> {
        let (tab, monitor, _) = self.handles()?;
        tab.evaluate(script, false)
            .map_err(|e| BrowserError::NavigationFailed(e.to_string()))?;
        self.wait_for_page_load(&monitor).await;
        Ok(())
    }

    /// On-demand markdown rendition of the current document.
    pub async fn extract_markdown(&mut self) -> Result<String> {
        let (tab, _, _) = self.handles()?;
        let result = tab
            .evaluate("document.documentElement.outerHTML", false)
            .map_err(|e| BrowserError::EvaluationFailed(e.to_string()))?;
        let html: String = result
            .value
            .and_then(|v| serde_json::from_value(v).ok())
            .ok_or_else(|| {
                BrowserError::EvaluationFailed("document HTML unavailable".to_string())
            })?;
        let markdown = html2md::parse_html(&html);
        let title = tab.get_title().unwrap_or_default();
        if title.is_empty() {
            Ok(markdown)
        } else {
            Ok(format!("# {title}\n\n{markdown}"))
        }
    }
}

fn install_new_document_shims(tab: &Arc<Tab>) -> Result<()> {
    tab.call_method(Page::AddScriptToEvaluateOnNewDocument {
        source: NEW_DOCUMENT_SHIMS_JS.to_string(),
        world_name: None,
        include_command_line_api: None,
        run_immediately: None,
    })
    .map_err(|e| {
        BrowserError::TabOperationFailed(format!("new-document shim install failed: {e}"))
    })?;
    // The current document missed the new-document hook; shim it directly.
    tab.evaluate(NEW_DOCUMENT_SHIMS_JS, false)
        .map_err(|e| BrowserError::EvaluationFailed(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eligibility_requires_tab_id_and_http_url() {
        assert!(is_automatable("CAFE01", "https://example.com"));
        assert!(is_automatable("CAFE01", "http://example.com"));
        assert!(!is_automatable("", "https://example.com"));
        assert!(!is_automatable("CAFE01", "chrome://settings"));
        assert!(!is_automatable("CAFE01", "about:blank"));
        assert!(!is_automatable("CAFE01", ""));
    }

    #[test]
    fn placeholder_shape_is_stable() {
        let a = PageState::empty();
        let b = PageState::empty();
        assert!(a.is_placeholder());
        assert_eq!(a.tab_id, b.tab_id);
        assert_eq!(a.url, b.url);
        assert_eq!(a.title, b.title);
        assert!(a.screenshot.is_none());
        assert_eq!(a.pixels_above, 0.0);
        assert_eq!(a.pixels_below, 0.0);
        assert!(a.selector_map.is_empty());
        assert!(a.tree.is_empty());
        assert!(a.interactive_elements_summary().is_empty());
    }

    #[test]
    fn url_normalization() {
        assert_eq!(normalize_url("https://example.com"), "https://example.com");
        assert_eq!(normalize_url("example.com/path"), "https://example.com/path");
        assert_eq!(normalize_url("localhost:3000"), "http://localhost:3000");
        assert_eq!(normalize_url("127.0.0.1:8080"), "http://127.0.0.1:8080");
        assert_eq!(normalize_url("google"), "https://www.google.com");
        assert_eq!(normalize_url("about:blank"), "about:blank");
        assert_eq!(normalize_url("/relative"), "/relative");
        assert_eq!(normalize_url("  example.com  "), "https://example.com");
    }

    #[test]
    fn summary_lines_carry_index_tag_and_text() {
        let (tree, map) = crate::dom::snapshot::parse_payload(
            r#"{
                "root": {
                    "type": "element", "tagName": "body", "xpath": "/body[1]",
                    "isVisible": true,
                    "children": [{
                        "type": "element", "tagName": "button",
                        "xpath": "/body[1]/button[1]",
                        "attributes": {"aria-label": "Search"},
                        "isVisible": true, "isInteractive": true,
                        "isTopElement": true, "highlightIndex": 0,
                        "children": [{"type": "text", "text": "Go", "isVisible": true}]
                    }]
                }
            }"#,
        )
        .unwrap();
        let state = PageState {
            tree,
            selector_map: map,
            tab_id: "T".to_string(),
            url: "https://example.com".to_string(),
            title: "Example".to_string(),
            screenshot: None,
            pixels_above: 0.0,
            pixels_below: 0.0,
        };
        let summary = state.interactive_elements_summary();
        assert_eq!(summary.len(), 1);
        assert!(summary[0].starts_with("[0]<button"));
        assert!(summary[0].contains("aria-label=\"Search\""));
        assert!(summary[0].contains("Go"));
    }
}
