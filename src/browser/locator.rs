//! Element location: snapshot node -> live, stabilized handle.
//!
//! A handle is a re-locatable address (iframe selector chain + the selector
//! strategy that won), not a retained protocol object: it survives reflow
//! and can be re-queried per action step. Frame descent is strict: an
//! unresolvable or cross-origin frame fails the whole locate rather than
//! guessing.

use std::sync::Arc;
use std::time::{Duration, Instant};

use headless_chrome::Tab;
use log::debug;
use serde::Deserialize;
use serde_json::json;

use crate::dom::node::{DomTree, ElementData, NodeId};
use crate::dom::selector::{css_selector_for, is_sentinel_selector};
use crate::error::{BrowserError, Result};

const STABILIZATION_TIMEOUT: Duration = Duration::from_millis(2500);
const STABILIZATION_POLL: Duration = Duration::from_millis(100);

/// Shared in-page worker: descends the iframe chain, resolves the selector,
/// and runs one operation on the unique match.
const FRAME_QUERY_JS: &str = r#"(function (chain, kind, selector, mode, value) {
    let doc = document;
    for (const frameSelector of chain) {
        let frame = null;
        try { frame = doc.querySelector(frameSelector); } catch (e) { frame = null; }
        if (!frame) return JSON.stringify({ status: "frame-missing", frame: frameSelector });
        let inner = null;
        try { inner = frame.contentDocument; } catch (e) { inner = null; }
        if (!inner) return JSON.stringify({ status: "frame-blocked", frame: frameSelector });
        doc = inner;
    }

    let matches = [];
    if (kind === "css") {
        try { matches = Array.from(doc.querySelectorAll(selector)); }
        catch (e) { return JSON.stringify({ status: "bad-selector" }); }
    } else {
        try {
            const found = doc.evaluate(selector, doc, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null);
            for (let i = 0; i < found.snapshotLength; i++) matches.push(found.snapshotItem(i));
        } catch (e) { return JSON.stringify({ status: "bad-selector" }); }
    }

    if (mode === "count" || matches.length !== 1) {
        return JSON.stringify({ status: "ok", count: matches.length });
    }
    const el = matches[0];
    const win = doc.defaultView || window;

    function fireInputEvents() {
        el.dispatchEvent(new Event("input", { bubbles: true }));
        el.dispatchEvent(new Event("change", { bubbles: true }));
    }

    if (mode === "status") {
        const rect = el.getBoundingClientRect();
        const style = win.getComputedStyle(el);
        return JSON.stringify({
            status: "ok",
            count: 1,
            width: rect.width,
            height: rect.height,
            hidden: style.visibility === "hidden" || style.display === "none",
            opacity: parseFloat(style.opacity || "1"),
            inViewport:
                rect.top >= 0 && rect.left >= 0 &&
                rect.bottom <= win.innerHeight && rect.right <= win.innerWidth,
        });
    }
    if (mode === "scroll") {
        el.scrollIntoView({ block: "center", inline: "center", behavior: "instant" });
        return JSON.stringify({ status: "ok", count: 1 });
    }
    if (mode === "click") {
        el.click();
        return JSON.stringify({ status: "ok", count: 1 });
    }
    if (mode === "clear" || mode === "setvalue") {
        el.focus && el.focus();
        const next = mode === "clear" ? "" : value;
        if ("value" in el) {
            el.value = next;
        } else if (el.isContentEditable) {
            el.textContent = next;
        } else {
            return JSON.stringify({ status: "ok", count: 1, found: false });
        }
        fireInputEvents();
        return JSON.stringify({ status: "ok", count: 1, found: true });
    }
    if (mode === "options") {
        const options = Array.from(el.options || []).map(function (o, i) {
            return { index: i, text: o.text, value: o.value };
        });
        return JSON.stringify({ status: "ok", count: 1, options: options });
    }
    if (mode === "select") {
        const texts = Array.from(el.options).map(function (o) { return o.text; });
        let matchIndex = -1;
        for (let i = 0; i < el.options.length; i++) {
            if (el.options[i].text.trim() === value) { matchIndex = i; break; }
        }
        if (matchIndex < 0) {
            return JSON.stringify({ status: "ok", count: 1, found: false, options: texts });
        }
        const next = el.options[matchIndex].value;
        let changed = false;
        if (el.value !== next) {
            el.value = next;
            changed = true;
            el.dispatchEvent(new Event("change", { bubbles: true }));
            el.dispatchEvent(new Event("input", { bubbles: true }));
        }
        return JSON.stringify({ status: "ok", count: 1, found: true, value: next, changed: changed });
    }
    return JSON.stringify({ status: "bad-mode" });
})"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorKind {
    Css,
    XPath,
}

impl SelectorKind {
    fn as_str(self) -> &'static str {
        match self {
            SelectorKind::Css => "css",
            SelectorKind::XPath => "xpath",
        }
    }
}

/// Re-locatable address of a resolved element.
#[derive(Debug, Clone)]
pub struct LiveHandle {
    /// Synthesized selectors of the `<iframe>` ancestors, outermost first.
    pub frame_chain: Vec<String>,
    pub kind: SelectorKind,
    pub selector: String,
    /// Which ladder rung produced the selector.
    pub strategy: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct QueryReply {
    status: String,
    #[serde(default)]
    count: Option<usize>,
    #[serde(default)]
    frame: Option<String>,
    #[serde(default)]
    width: Option<f64>,
    #[serde(default)]
    height: Option<f64>,
    #[serde(default)]
    hidden: Option<bool>,
    #[serde(default)]
    opacity: Option<f64>,
    #[serde(default)]
    in_viewport: Option<bool>,
    #[serde(default)]
    pub(crate) found: Option<bool>,
    #[serde(default)]
    pub(crate) changed: Option<bool>,
    #[serde(default)]
    pub(crate) options: Option<serde_json::Value>,
}

impl QueryReply {
    pub(crate) fn count(&self) -> usize {
        self.count.unwrap_or(0)
    }
}

pub struct ElementLocator {
    tab: Arc<Tab>,
    include_dynamic_attributes: bool,
}

impl ElementLocator {
    pub fn new(tab: Arc<Tab>, include_dynamic_attributes: bool) -> Self {
        Self {
            tab,
            include_dynamic_attributes,
        }
    }

    /// Resolve `id` to a live handle, stabilized and ready to act on.
    pub async fn locate(&self, tree: &DomTree, id: NodeId) -> Result<LiveHandle> {
        let element = tree
            .element(id)
            .ok_or_else(|| BrowserError::ElementNotFound(format!("node {id:?} is not an element")))?;
        let frame_chain = self.frame_chain(tree, id)?;
        let candidates = candidate_strategies(element, self.include_dynamic_attributes);
        if candidates.is_empty() {
            return Err(BrowserError::ElementNotFound(format!(
                "<{}> offers nothing to locate by",
                element.tag()
            )));
        }

        let mut attempted: Vec<String> = Vec::new();
        for (strategy, kind, selector) in candidates {
            let reply = match self.run_query(&frame_chain, kind, &selector, "count", None).await {
                Ok(reply) => reply,
                Err(e @ BrowserError::ElementNotFound(_)) => return Err(e),
                Err(e) => {
                    debug!("locate strategy {strategy} errored: {e}");
                    attempted.push(strategy.to_string());
                    continue;
                }
            };
            match reply.count() {
                1 => {
                    let handle = LiveHandle {
                        frame_chain: frame_chain.clone(),
                        kind,
                        selector,
                        strategy,
                    };
                    self.wait_for_stable(&handle).await?;
                    return Ok(handle);
                }
                n => {
                    debug!("locate strategy {strategy} matched {n} nodes");
                    attempted.push(format!("{strategy}:{n}"));
                }
            }
        }

        Err(BrowserError::ElementNotFound(format!(
            "<{}> index {}: all strategies exhausted [{}]",
            element.tag(),
            element
                .highlight_index
                .map(|i| i.to_string())
                .unwrap_or_else(|| "-".to_string()),
            attempted.join(", ")
        )))
    }

    /// Synthesize selectors for the `<iframe>` ancestors, outermost first.
    /// A frame that cannot be addressed fails the locate outright.
    fn frame_chain(&self, tree: &DomTree, id: NodeId) -> Result<Vec<String>> {
        let mut chain = Vec::new();
        for frame_id in tree.iframe_ancestors(id) {
            let frame = tree.element(frame_id).ok_or_else(|| {
                BrowserError::ElementNotFound("iframe ancestor vanished from tree".to_string())
            })?;
            let selector = css_selector_for(frame, self.include_dynamic_attributes);
            if is_sentinel_selector(&selector) {
                return Err(BrowserError::ElementNotFound(format!(
                    "cannot address intermediate <iframe> ({})",
                    frame.xpath
                )));
            }
            chain.push(selector);
        }
        Ok(chain)
    }

    /// Poll until the handle has size, is not hidden, and sits fully inside
    /// the viewport; request a centered scroll when it does not.
    pub(crate) async fn wait_for_stable(&self, handle: &LiveHandle) -> Result<()> {
        let deadline = Instant::now() + STABILIZATION_TIMEOUT;
        loop {
            let status = self
                .run_on_handle(handle, "status", None)
                .await?;
            if status.count() == 1 {
                let sized = status.width.unwrap_or(0.0) > 0.0 && status.height.unwrap_or(0.0) > 0.0;
                let hidden = status.hidden.unwrap_or(true) || status.opacity.unwrap_or(0.0) <= 0.0;
                if sized && !hidden {
                    if status.in_viewport.unwrap_or(false) {
                        return Ok(());
                    }
                    // Off-screen but otherwise ready: bring it to center
                    // and re-check on the next tick.
                    let _ = self.run_on_handle(handle, "scroll", None).await;
                }
            }
            if Instant::now() >= deadline {
                return Err(BrowserError::VisibilityTimeout(format!(
                    "{} '{}' not stable within {:.1}s",
                    handle.strategy,
                    handle.selector,
                    STABILIZATION_TIMEOUT.as_secs_f64()
                )));
            }
            tokio::time::sleep(STABILIZATION_POLL).await;
        }
    }

    /// Run one operation on an already-located handle.
    pub(crate) async fn run_on_handle(
        &self,
        handle: &LiveHandle,
        mode: &str,
        value: Option<&str>,
    ) -> Result<QueryReply> {
        self.run_query(&handle.frame_chain, handle.kind, &handle.selector, mode, value)
            .await
    }

    async fn run_query(
        &self,
        frame_chain: &[String],
        kind: SelectorKind,
        selector: &str,
        mode: &str,
        value: Option<&str>,
    ) -> Result<QueryReply> {
        let script = format!(
            "{FRAME_QUERY_JS}({}, {}, {}, {}, {})",
            json!(frame_chain),
            json!(kind.as_str()),
            json!(selector),
            json!(mode),
            json!(value.unwrap_or_default()),
        );
        let result = self
            .tab
            .evaluate(&script, false)
            .map_err(|e| BrowserError::EvaluationFailed(e.to_string()))?;
        let payload: String = result
            .value
            .and_then(|v| serde_json::from_value(v).ok())
            .ok_or_else(|| {
                BrowserError::EvaluationFailed("frame query returned nothing".to_string())
            })?;
        let reply: QueryReply = serde_json::from_str(&payload)
            .map_err(|e| BrowserError::EvaluationFailed(format!("bad frame query reply: {e}")))?;

        match reply.status.as_str() {
            "ok" => Ok(reply),
            "frame-missing" => Err(BrowserError::ElementNotFound(format!(
                "intermediate frame '{}' not found",
                reply.frame.as_deref().unwrap_or("?")
            ))),
            "frame-blocked" => Err(BrowserError::ElementNotFound(format!(
                "intermediate frame '{}' is not accessible",
                reply.frame.as_deref().unwrap_or("?")
            ))),
            "bad-selector" => Err(BrowserError::EvaluationFailed(format!(
                "selector '{selector}' did not parse"
            ))),
            other => Err(BrowserError::EvaluationFailed(format!(
                "frame query reported '{other}'"
            ))),
        }
    }
}

/// Ordered locate strategies for one element. Later rungs are independent
/// of the synthesized selector so they survive attribute churn.
fn candidate_strategies(
    element: &ElementData,
    include_dynamic_attributes: bool,
) -> Vec<(&'static str, SelectorKind, String)> {
    let mut out: Vec<(&'static str, SelectorKind, String)> = Vec::new();
    let mut push = |entry: (&'static str, SelectorKind, String)| {
        if !out.iter().any(|(_, k, s)| *k == entry.1 && *s == entry.2) {
            out.push(entry);
        }
    };

    let synthesized = css_selector_for(element, include_dynamic_attributes);
    if !is_sentinel_selector(&synthesized) {
        push(("css", SelectorKind::Css, synthesized));
    }
    if !element.xpath.is_empty() {
        push(("xpath", SelectorKind::XPath, element.xpath.clone()));
    }
    if let Some(id) = element.get_attribute("id") {
        if is_plain_attribute_value(id) {
            push(("id", SelectorKind::Css, format!("[id=\"{id}\"]")));
        }
    }
    if let Some(name) = element.get_attribute("name") {
        if is_plain_attribute_value(name) {
            push((
                "name",
                SelectorKind::Css,
                format!("{}[name=\"{name}\"]", element.tag()),
            ));
        }
    }
    if let Some(label) = element.get_attribute("aria-label") {
        if is_plain_attribute_value(label) {
            push((
                "aria-label",
                SelectorKind::Css,
                format!("{}[aria-label=\"{label}\"]", element.tag()),
            ));
        }
    }
    out
}

fn is_plain_attribute_value(value: &str) -> bool {
    !value.is_empty()
        && !value
            .chars()
            .any(|c| matches!(c, '"' | '\'' | '<' | '>' | '\\') || c.is_control())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::hash::HashCell;
    use std::collections::HashMap;

    fn element(tag: &str, attrs: &[(&str, &str)], xpath: &str) -> ElementData {
        ElementData {
            tag_name: Some(tag.to_string()),
            xpath: xpath.to_string(),
            attributes: attrs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            children: Vec::new(),
            is_visible: true,
            is_interactive: true,
            is_top_element: true,
            is_shadow_host: false,
            highlight_index: Some(0),
            viewport_coordinates: None,
            page_coordinates: None,
            viewport_info: None,
            parent: None,
            hash_cell: HashCell::new(),
        }
    }

    #[test]
    fn strategy_order_css_then_xpath_then_attributes() {
        let el = element(
            "input",
            &[("id", "q"), ("name", "q"), ("aria-label", "Search")],
            "/form[1]/input[1]",
        );
        let strategies = candidate_strategies(&el, true);
        let labels: Vec<&str> = strategies.iter().map(|(l, _, _)| *l).collect();
        assert_eq!(labels, vec!["css", "xpath", "id", "name", "aria-label"]);
        assert_eq!(strategies[0].2, "input#q");
        assert_eq!(strategies[1].1, SelectorKind::XPath);
        assert_eq!(strategies[2].2, "[id=\"q\"]");
        assert_eq!(strategies[3].2, "input[name=\"q\"]");
    }

    #[test]
    fn sentinel_synthesis_is_not_a_strategy() {
        let el = element("canvas", &[], "");
        let strategies = candidate_strategies(&el, true);
        assert!(strategies.is_empty());
    }

    #[test]
    fn duplicate_selectors_collapse() {
        // Synthesized selector and the name rung produce the same string.
        let el = element("input", &[("name", "q")], "");
        let strategies = candidate_strategies(&el, true);
        let selectors: Vec<&str> = strategies.iter().map(|(_, _, s)| s.as_str()).collect();
        assert_eq!(selectors, vec!["input[name=\"q\"]"]);
    }

    #[test]
    fn unsafe_attribute_values_are_skipped() {
        let el = element("button", &[("aria-label", "say \"hi\"")], "/button[1]");
        let strategies = candidate_strategies(&el, true);
        assert!(strategies.iter().all(|(l, _, _)| *l != "aria-label"));
    }

    #[test]
    fn query_reply_parses_status_payload() {
        let reply: QueryReply = serde_json::from_str(
            r#"{"status":"ok","count":1,"width":120.0,"height":40.0,"hidden":false,"opacity":1.0,"inViewport":true}"#,
        )
        .unwrap();
        assert_eq!(reply.status, "ok");
        assert_eq!(reply.count(), 1);
        assert_eq!(reply.in_viewport, Some(true));
    }
}
