//! Interaction verbs: click, type, select, scroll, key combos.
//!
//! Every verb is a fallback ladder: an ordered list of independent
//! attempts tried until one succeeds, with per-rung failures logged and
//! swallowed. Only full exhaustion surfaces, carrying the attempted-rung
//! trail for diagnosis.

use std::sync::Arc;
use std::time::Duration;

use headless_chrome::Tab;
use log::debug;
use serde::Deserialize;

use crate::browser::host::{HostScripter, HostTarget};
use crate::browser::input::{self, parse_key_combo};
use crate::browser::locator::{ElementLocator, LiveHandle, SelectorKind};
use crate::browser::network::NetworkIdleMonitor;
use crate::dom::node::{DomTree, ElementData, NodeId};
use crate::error::{BrowserError, Result};

const NATIVE_CLICK_TIMEOUT: Duration = Duration::from_millis(1000);
const KEY_SETTLE_WINDOW: Duration = Duration::from_millis(250);
const KEY_SETTLE_CAP: Duration = Duration::from_secs(2);

/// One `<option>` of a `<select>` control.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DropdownOption {
    pub index: usize,
    pub text: String,
    pub value: String,
}

/// Outcome of a dropdown selection. A missing option text is an outcome,
/// not an error; only structural problems raise.
#[derive(Debug, Clone)]
pub struct DropdownSelection {
    pub found: bool,
    pub message: String,
    /// All option texts, populated when the wanted text was absent.
    pub available: Vec<String>,
}

/// Result of one ladder rung.
pub(crate) enum RungOutcome {
    /// The rung did the job; carries the outcome message.
    Done(String),
    /// The rung ran but could not act (element gone, nothing to act on).
    NotFound,
}

/// Bookkeeping for one fallback ladder run: rung order, short-circuit,
/// diagnostics for the exhaustion error.
pub(crate) struct Ladder {
    action: &'static str,
    attempted: Vec<&'static str>,
}

impl Ladder {
    pub(crate) fn new(action: &'static str) -> Self {
        Self {
            action,
            attempted: Vec::new(),
        }
    }

    /// Record one rung's outcome. `Some` means the ladder is finished.
    pub(crate) fn observe(
        &mut self,
        rung: &'static str,
        outcome: Result<RungOutcome>,
    ) -> Option<String> {
        self.attempted.push(rung);
        match outcome {
            Ok(RungOutcome::Done(message)) => Some(message),
            Ok(RungOutcome::NotFound) => {
                debug!("{} rung {rung}: target not actionable", self.action);
                None
            }
            Err(e) => {
                debug!("{} rung {rung} failed: {e}", self.action);
                None
            }
        }
    }

    pub(crate) fn attempted(&self) -> &[&'static str] {
        &self.attempted
    }

    /// Consume the ladder into the exhaustion error.
    pub(crate) fn exhausted(self, tag: &str, index: usize) -> BrowserError {
        BrowserError::ActionFailed {
            action: self.action,
            tag: tag.to_string(),
            index,
            attempted: self.attempted.join(" -> "),
        }
    }
}

pub struct InteractionExecutor {
    tab: Arc<Tab>,
    locator: ElementLocator,
    host: Arc<dyn HostScripter>,
    monitor: Arc<NetworkIdleMonitor>,
}

impl InteractionExecutor {
    pub fn new(
        tab: Arc<Tab>,
        include_dynamic_attributes: bool,
        host: Arc<dyn HostScripter>,
        monitor: Arc<NetworkIdleMonitor>,
    ) -> Self {
        let locator = ElementLocator::new(Arc::clone(&tab), include_dynamic_attributes);
        Self {
            tab,
            locator,
            host,
            monitor,
        }
    }

    fn element_of<'t>(&self, tree: &'t DomTree, id: NodeId) -> Result<&'t ElementData> {
        tree.element(id)
            .ok_or_else(|| BrowserError::ElementNotFound(format!("node {id:?} is not an element")))
    }

    /// Click the element behind `id`.
    ///
    /// Ladder: native click (short timeout) -> script click -> trusted
    /// mouse click at snapshot viewport center -> at page coordinates
    /// corrected by the current scroll -> host scripting.
    pub async fn click(&self, tree: &DomTree, id: NodeId) -> Result<String> {
        let element = self.element_of(tree, id)?;
        let tag = element.tag().to_string();
        let index = element.highlight_index.unwrap_or(usize::MAX);
        let mut ladder = Ladder::new("click");

        match self.locator.locate(tree, id).await {
            Ok(handle) => {
                if handle.frame_chain.is_empty() && handle.kind == SelectorKind::Css {
                    let outcome = self.native_click(&handle.selector);
                    if let Some(message) = ladder.observe("native-click", outcome) {
                        return Ok(message);
                    }
                }
                let outcome = self.script_click(&handle).await;
                if let Some(message) = ladder.observe("script-click", outcome) {
                    return Ok(message);
                }
            }
            Err(e) => {
                ladder.observe("locate", Err(e));
            }
        }

        if let Some(center) = element.viewport_center() {
            let outcome = input::mouse_click(&self.tab, center.x, center.y)
                .map(|()| RungOutcome::Done(format!("clicked <{tag}> index {index} at viewport point")));
            if let Some(message) = ladder.observe("viewport-coords", outcome) {
                return Ok(message);
            }
        }

        if let Some(center) = element.page_center() {
            let outcome = match self.current_scroll().await {
                Ok((scroll_x, scroll_y)) => {
                    input::mouse_click(&self.tab, center.x - scroll_x, center.y - scroll_y).map(
                        |()| RungOutcome::Done(format!("clicked <{tag}> index {index} at page point")),
                    )
                }
                Err(e) => Err(e),
            };
            if let Some(message) = ladder.observe("page-coords", outcome) {
                return Ok(message);
            }
        }

        let target = HostTarget::from_element(element);
        let outcome = self.host.click(&target).await.map(|found| {
            if found {
                RungOutcome::Done(format!("clicked <{tag}> index {index} via host scripting"))
            } else {
                RungOutcome::NotFound
            }
        });
        if let Some(message) = ladder.observe("host-script", outcome) {
            return Ok(message);
        }

        Err(ladder.exhausted(&tag, index))
    }

    fn native_click(&self, selector: &str) -> Result<RungOutcome> {
        let element = self
            .tab
            .wait_for_element_with_custom_timeout(selector, NATIVE_CLICK_TIMEOUT)
            .map_err(|e| BrowserError::ElementNotFound(e.to_string()))?;
        element
            .click()
            .map_err(|e| BrowserError::EvaluationFailed(e.to_string()))?;
        Ok(RungOutcome::Done(format!(
            "clicked '{selector}' natively"
        )))
    }

    async fn script_click(&self, handle: &LiveHandle) -> Result<RungOutcome> {
        let reply = self.locator.run_on_handle(handle, "click", None).await?;
        if reply.count() == 1 {
            Ok(RungOutcome::Done(format!(
                "clicked '{}' via script",
                handle.selector
            )))
        } else {
            Ok(RungOutcome::NotFound)
        }
    }

    /// Clear the field behind `id` and type `text` into it.
    pub async fn input_text(&self, tree: &DomTree, id: NodeId, text: &str) -> Result<String> {
        let element = self.element_of(tree, id)?;
        let tag = element.tag().to_string();
        let index = element.highlight_index.unwrap_or(usize::MAX);
        let mut ladder = Ladder::new("input");

        match self.locator.locate(tree, id).await {
            Ok(handle) => {
                // Reset first: empty value plus input/change events.
                let _ = self.locator.run_on_handle(&handle, "clear", None).await;

                if handle.frame_chain.is_empty() && handle.kind == SelectorKind::Css {
                    let outcome = self.native_type(&handle.selector, text);
                    if let Some(message) = ladder.observe("native-type", outcome) {
                        return Ok(message);
                    }
                }
                let outcome = self
                    .locator
                    .run_on_handle(&handle, "setvalue", Some(text))
                    .await
                    .map(|reply| {
                        if reply.count() == 1 && reply.found.unwrap_or(false) {
                            RungOutcome::Done(format!(
                                "set value of <{tag}> index {index} via script"
                            ))
                        } else {
                            RungOutcome::NotFound
                        }
                    });
                if let Some(message) = ladder.observe("script-set-value", outcome) {
                    return Ok(message);
                }
            }
            Err(e) => {
                ladder.observe("locate", Err(e));
            }
        }

        let mut target = HostTarget::from_element(element);
        if target.role.is_none() {
            target.role = Some("combobox".to_string());
        }
        let outcome = self.host.set_value(&target, text).await.map(|found| {
            if found {
                RungOutcome::Done(format!(
                    "set value of <{tag}> index {index} via host scripting"
                ))
            } else {
                RungOutcome::NotFound
            }
        });
        if let Some(message) = ladder.observe("host-script", outcome) {
            return Ok(message);
        }

        Err(ladder.exhausted(&tag, index))
    }

    fn native_type(&self, selector: &str, text: &str) -> Result<RungOutcome> {
        let element = self
            .tab
            .wait_for_element_with_custom_timeout(selector, NATIVE_CLICK_TIMEOUT)
            .map_err(|e| BrowserError::ElementNotFound(e.to_string()))?;
        // Focus first; some widgets only accept keys while focused.
        let _ = element.click();
        element
            .type_into(text)
            .map_err(|e| BrowserError::EvaluationFailed(e.to_string()))?;
        Ok(RungOutcome::Done(format!(
            "typed {} chars into '{selector}'",
            text.chars().count()
        )))
    }

    /// Select the option whose trimmed text equals `text`.
    pub async fn select_dropdown_option(
        &self,
        tree: &DomTree,
        id: NodeId,
        text: &str,
    ) -> Result<DropdownSelection> {
        let element = self.element_of(tree, id)?;
        let index = element.highlight_index.unwrap_or(usize::MAX);
        require_select(element, index)?;

        let handle = self.locator.locate(tree, id).await?;
        let wanted = text.trim();
        let reply = self
            .locator
            .run_on_handle(&handle, "select", Some(wanted))
            .await?;
        if reply.count() != 1 {
            return Err(BrowserError::ElementNotFound(format!(
                "<select> index {index} disappeared during selection"
            )));
        }

        let available: Vec<String> = reply
            .options
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();
        Ok(describe_selection(
            wanted,
            reply.found.unwrap_or(false),
            reply.changed.unwrap_or(false),
            available,
        ))
    }

    /// List the options of the `<select>` behind `id`.
    pub async fn get_dropdown_options(
        &self,
        tree: &DomTree,
        id: NodeId,
    ) -> Result<Vec<DropdownOption>> {
        let element = self.element_of(tree, id)?;
        let index = element.highlight_index.unwrap_or(usize::MAX);
        require_select(element, index)?;

        let handle = self.locator.locate(tree, id).await?;
        let reply = self.locator.run_on_handle(&handle, "options", None).await?;
        if reply.count() != 1 {
            return Err(BrowserError::ElementNotFound(format!(
                "<select> index {index} disappeared while reading options"
            )));
        }
        let options: Vec<DropdownOption> = reply
            .options
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();
        if options.is_empty() {
            return Err(BrowserError::ElementNotFound(format!(
                "<select> index {index} has an empty option list"
            )));
        }
        Ok(options)
    }

    /// Scroll the first element containing `text` into view. `Ok(false)`
    /// means no match; only transport failures raise.
    pub async fn scroll_to_text(&self, text: &str) -> Result<bool> {
        let script = format!("{SCROLL_TO_TEXT_JS}({})", serde_json::json!(text));
        let result = self
            .tab
            .evaluate(&script, false)
            .map_err(|e| BrowserError::EvaluationFailed(e.to_string()))?;
        Ok(result
            .value
            .and_then(|v| v.as_bool())
            .unwrap_or(false))
    }

    /// Scroll down by `amount` pixels, or one viewport height.
    pub async fn scroll_down(&self, amount: Option<i64>) -> Result<()> {
        self.scroll_by(amount, 1).await
    }

    /// Scroll up by `amount` pixels, or one viewport height.
    pub async fn scroll_up(&self, amount: Option<i64>) -> Result<()> {
        self.scroll_by(amount, -1).await
    }

    async fn scroll_by(&self, amount: Option<i64>, sign: i64) -> Result<()> {
        let script = match amount {
            Some(pixels) => format!("window.scrollBy(0, {})", sign * pixels),
            None => format!("window.scrollBy(0, {sign} * window.innerHeight)"),
        };
        self.tab
            .evaluate(&script, false)
            .map_err(|e| BrowserError::EvaluationFailed(e.to_string()))?;
        Ok(())
    }

    /// Send a key combo like `"Control+Shift+T"` or `"Enter"`.
    ///
    /// Modifiers go down in the given order; the main key press races a
    /// short page-settle wait (navigation may legitimately replace the
    /// document); modifiers are released in reverse order even when the
    /// main press failed.
    pub async fn send_keys(&self, combo: &str) -> Result<String> {
        let (modifiers, key) = parse_key_combo(combo)?;

        let mut held = Vec::with_capacity(modifiers.len());
        let mut mask = 0u32;
        let mut result = Ok(());
        for modifier in &modifiers {
            match input::modifier_down(&self.tab, *modifier, mask) {
                Ok(()) => {
                    mask |= modifier.bit();
                    held.push(*modifier);
                }
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }

        if result.is_ok() {
            result = input::key_down(&self.tab, &key, mask)
                .and_then(|()| input::key_up(&self.tab, &key, mask));
            if result.is_ok() {
                // The press may trigger navigation; give the page a bounded
                // chance to settle but never hang on it.
                let _ = tokio::time::timeout(
                    KEY_SETTLE_CAP,
                    self.monitor.wait_for_idle(KEY_SETTLE_WINDOW, KEY_SETTLE_CAP),
                )
                .await;
            }
        }

        // Guaranteed cleanup: whatever happened above, release what we hold.
        for modifier in held.iter().rev() {
            mask &= !modifier.bit();
            if let Err(e) = input::modifier_up(&self.tab, *modifier, mask) {
                log::warn!("failed to release modifier {modifier:?}: {e}");
            }
        }

        result.map(|()| format!("sent keys '{combo}'"))
    }

    pub(crate) async fn current_scroll(&self) -> Result<(f64, f64)> {
        let result = self
            .tab
            .evaluate(
                "JSON.stringify({x: window.scrollX, y: window.scrollY})",
                false,
            )
            .map_err(|e| BrowserError::EvaluationFailed(e.to_string()))?;
        let payload: String = result
            .value
            .and_then(|v| serde_json::from_value(v).ok())
            .ok_or_else(|| BrowserError::EvaluationFailed("scroll probe returned nothing".to_string()))?;

        #[derive(Deserialize)]
        struct Scroll {
            x: f64,
            y: f64,
        }
        let scroll: Scroll = serde_json::from_str(&payload)
            .map_err(|e| BrowserError::EvaluationFailed(format!("bad scroll probe reply: {e}")))?;
        Ok((scroll.x, scroll.y))
    }
}

/// Structural gate for dropdown verbs: raised before any resolution.
fn require_select(element: &ElementData, index: usize) -> Result<()> {
    if element.is_tag("select") {
        Ok(())
    } else {
        Err(BrowserError::NotADropdown {
            index,
            actual: element.tag().to_string(),
        })
    }
}

/// Describe a selection outcome; never an error.
fn describe_selection(
    wanted: &str,
    found: bool,
    changed: bool,
    available: Vec<String>,
) -> DropdownSelection {
    if found {
        let message = if changed {
            format!("selected option '{wanted}'")
        } else {
            format!("option '{wanted}' was already selected")
        };
        DropdownSelection {
            found: true,
            message,
            available: Vec::new(),
        }
    } else {
        let listed = available
            .iter()
            .map(|t| format!("'{}'", t.trim()))
            .collect::<Vec<_>>()
            .join(", ");
        DropdownSelection {
            found: false,
            message: format!("option text '{wanted}' not found; available options: [{listed}]"),
            available,
        }
    }
}

const SCROLL_TO_TEXT_JS: &str = r#"(function (needle) {
    function literal(s) {
        if (s.indexOf("'") < 0) return "'" + s + "'";
        return "concat(" + s.split("'").map(function (p) {
            return "'" + p + "'";
        }).join(", \"'\", ") + ")";
    }
    function firstMatch(xpath) {
        try {
            const found = document.evaluate(
                xpath, document, null, XPathResult.FIRST_ORDERED_NODE_TYPE, null);
            return found.singleNodeValue;
        } catch (e) {
            return null;
        }
    }
    const exact = firstMatch("//*[text()=" + literal(needle) + "]");
    const lower = needle.toLowerCase();
    const upperAlpha = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    const lowerAlpha = "abcdefghijklmnopqrstuvwxyz";
    const el = exact || firstMatch(
        "//*[contains(translate(text(), '" + upperAlpha + "', '" + lowerAlpha + "'), "
        + literal(lower) + ")]");
    if (!el) return false;
    el.scrollIntoView({ block: "center", inline: "center", behavior: "instant" });
    return true;
})"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::hash::HashCell;
    use std::collections::HashMap;

    fn element(tag: &str, index: Option<usize>) -> ElementData {
        ElementData {
            tag_name: Some(tag.to_string()),
            xpath: format!("/{tag}[1]"),
            attributes: HashMap::new(),
            children: Vec::new(),
            is_visible: true,
            is_interactive: true,
            is_top_element: true,
            is_shadow_host: false,
            highlight_index: index,
            viewport_coordinates: None,
            page_coordinates: None,
            viewport_info: None,
            parent: None,
            hash_cell: HashCell::new(),
        }
    }

    #[test]
    fn dropdown_gate_rejects_non_select_before_resolution() {
        let div = element("div", Some(3));
        let err = require_select(&div, 3).unwrap_err();
        match err {
            BrowserError::NotADropdown { index, actual } => {
                assert_eq!(index, 3);
                assert_eq!(actual, "div");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let select = element("select", Some(4));
        assert!(require_select(&select, 4).is_ok());
    }

    #[test]
    fn absent_option_text_is_an_outcome_not_an_error() {
        let selection = describe_selection(
            "Cherry",
            false,
            false,
            vec!["Apple".to_string(), "Banana ".to_string()],
        );
        assert!(!selection.found);
        assert_eq!(selection.available.len(), 2);
        assert!(selection.message.contains("'Cherry' not found"));
        assert!(selection.message.contains("'Apple'"));
        assert!(selection.message.contains("'Banana'"));
    }

    #[test]
    fn selection_messages_distinguish_noop() {
        let changed = describe_selection("B", true, true, Vec::new());
        assert!(changed.found);
        assert_eq!(changed.message, "selected option 'B'");

        let noop = describe_selection("B", true, false, Vec::new());
        assert!(noop.found);
        assert!(noop.message.contains("already selected"));
    }

    #[test]
    fn ladder_short_circuits_after_earlier_failures() {
        let mut ladder = Ladder::new("click");

        // Native and script rungs fail, the coordinate rung succeeds.
        assert!(
            ladder
                .observe(
                    "native-click",
                    Err(BrowserError::ElementNotFound("gone".to_string())),
                )
                .is_none()
        );
        assert!(ladder.observe("script-click", Ok(RungOutcome::NotFound)).is_none());
        let message = ladder
            .observe(
                "viewport-coords",
                Ok(RungOutcome::Done("clicked at viewport point".to_string())),
            )
            .expect("coordinate rung should short-circuit");
        assert!(message.contains("viewport point"));
        assert_eq!(
            ladder.attempted(),
            ["native-click", "script-click", "viewport-coords"]
        );
    }

    #[test]
    fn ladder_exhaustion_carries_the_trail() {
        let mut ladder = Ladder::new("click");
        ladder.observe(
            "native-click",
            Err(BrowserError::ElementNotFound("gone".to_string())),
        );
        ladder.observe("script-click", Ok(RungOutcome::NotFound));
        let err = ladder.exhausted("button", 5);
        match err {
            BrowserError::ActionFailed {
                action,
                tag,
                index,
                attempted,
            } => {
                assert_eq!(action, "click");
                assert_eq!(tag, "button");
                assert_eq!(index, 5);
                assert_eq!(attempted, "native-click -> script-click");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn dropdown_option_payload_parses() {
        let options: Vec<DropdownOption> = serde_json::from_str(
            r#"[{"index":0,"text":"Apple","value":"a"},{"index":1,"text":"Banana","value":"b"}]"#,
        )
        .unwrap();
        assert_eq!(options.len(), 2);
        assert_eq!(options[1].text, "Banana");
        assert_eq!(options[1].value, "b");
    }
}
