//! Last-resort host scripting.
//!
//! When every transport-level strategy has failed, the engine hands the
//! problem to a host-level scripting capability: something that can find an
//! element by id, name, aria-label or screen point and click it or set its
//! value. Embedders may plug OS-level automation here; the default
//! implementation works through document-level script evaluation, which is
//! still independent of the synthesized selectors that just failed.

use std::sync::Arc;

use async_trait::async_trait;
use headless_chrome::Tab;
use serde_json::json;

use crate::dom::node::ElementData;
use crate::error::{BrowserError, Result};

/// Lookup hints for a host-level search, in preference order.
#[derive(Debug, Clone, Default)]
pub struct HostTarget {
    pub id: Option<String>,
    pub name: Option<String>,
    pub aria_label: Option<String>,
    pub role: Option<String>,
    /// Viewport point, used when attribute lookups find nothing.
    pub point: Option<(f64, f64)>,
}

impl HostTarget {
    pub fn from_element(element: &ElementData) -> Self {
        Self {
            id: element.get_attribute("id").map(str::to_string),
            name: element.get_attribute("name").map(str::to_string),
            aria_label: element.get_attribute("aria-label").map(str::to_string),
            role: element.get_attribute("role").map(str::to_string),
            point: element.viewport_center().map(|c| (c.x, c.y)),
        }
    }

    fn as_json(&self) -> serde_json::Value {
        json!({
            "id": self.id,
            "name": self.name,
            "ariaLabel": self.aria_label,
            "role": self.role,
            "point": self.point.map(|(x, y)| json!({"x": x, "y": y})),
        })
    }
}

/// Host-level scripting capability consumed as a last-resort rung.
#[async_trait]
pub trait HostScripter: Send + Sync {
    /// Find the target and click/focus it. `Ok(false)` means "not found",
    /// which the ladder treats as this rung failing.
    async fn click(&self, target: &HostTarget) -> Result<bool>;

    /// Find the target and set its value (or text content for editable
    /// regions), dispatching input/change events.
    async fn set_value(&self, target: &HostTarget, value: &str) -> Result<bool>;
}

const HOST_LOOKUP_JS: &str = r#"(function (target, action, value) {
    function locate() {
        if (target.id) {
            const el = document.getElementById(target.id);
            if (el) return el;
        }
        if (target.name) {
            const el = document.getElementsByName(target.name)[0];
            if (el) return el;
        }
        if (target.ariaLabel) {
            const el = document.querySelector('[aria-label="' + target.ariaLabel + '"]');
            if (el) return el;
        }
        if (target.role === "combobox") {
            const el = document.querySelector('[role="combobox"]');
            if (el) return el;
        }
        if (target.point) {
            const el = document.elementFromPoint(target.point.x, target.point.y);
            if (el) return el;
        }
        return null;
    }

    const el = locate();
    if (!el) return JSON.stringify({ found: false });

    if (action === "click") {
        el.focus && el.focus();
        el.click();
    } else {
        el.focus && el.focus();
        if ("value" in el) {
            el.value = value;
        } else if (el.isContentEditable) {
            el.textContent = value;
        } else {
            return JSON.stringify({ found: false });
        }
        el.dispatchEvent(new Event("input", { bubbles: true }));
        el.dispatchEvent(new Event("change", { bubbles: true }));
    }
    return JSON.stringify({ found: true });
})"#;

/// Default `HostScripter` backed by in-document script evaluation.
pub struct DomScriptHost {
    tab: Arc<Tab>,
}

impl DomScriptHost {
    pub fn new(tab: Arc<Tab>) -> Self {
        Self { tab }
    }

    fn run(&self, target: &HostTarget, action: &str, value: &str) -> Result<bool> {
        let script = format!(
            "{HOST_LOOKUP_JS}({}, {}, {})",
            target.as_json(),
            json!(action),
            json!(value),
        );
        let result = self
            .tab
            .evaluate(&script, false)
            .map_err(|e| BrowserError::EvaluationFailed(e.to_string()))?;
        let payload: String = result
            .value
            .and_then(|v| serde_json::from_value(v).ok())
            .ok_or_else(|| {
                BrowserError::EvaluationFailed("host lookup returned nothing".to_string())
            })?;
        let outcome: serde_json::Value = serde_json::from_str(&payload)
            .map_err(|e| BrowserError::EvaluationFailed(format!("bad host lookup result: {e}")))?;
        Ok(outcome["found"].as_bool().unwrap_or(false))
    }
}

#[async_trait]
impl HostScripter for DomScriptHost {
    async fn click(&self, target: &HostTarget) -> Result<bool> {
        self.run(target, "click", "")
    }

    async fn set_value(&self, target: &HostTarget, value: &str) -> Result<bool> {
        self.run(target, "set-value", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::hash::HashCell;
    use crate::dom::node::{CoordinateSet, Coordinates};
    use std::collections::HashMap;

    #[test]
    fn target_prefers_attributes_and_falls_back_to_point() {
        let element = ElementData {
            tag_name: Some("input".to_string()),
            xpath: "/input[1]".to_string(),
            attributes: HashMap::from([
                ("id".to_string(), "q".to_string()),
                ("aria-label".to_string(), "Search".to_string()),
            ]),
            children: Vec::new(),
            is_visible: true,
            is_interactive: true,
            is_top_element: true,
            is_shadow_host: false,
            highlight_index: Some(0),
            viewport_coordinates: Some(CoordinateSet {
                top_left: Coordinates { x: 0.0, y: 0.0 },
                bottom_right: Coordinates { x: 10.0, y: 10.0 },
                center: Coordinates { x: 5.0, y: 5.0 },
                width: 10.0,
                height: 10.0,
            }),
            page_coordinates: None,
            viewport_info: None,
            parent: None,
            hash_cell: HashCell::new(),
        };

        let target = HostTarget::from_element(&element);
        assert_eq!(target.id.as_deref(), Some("q"));
        assert_eq!(target.aria_label.as_deref(), Some("Search"));
        assert_eq!(target.point, Some((5.0, 5.0)));
        assert!(target.name.is_none());

        let encoded = target.as_json();
        assert_eq!(encoded["id"], "q");
        assert_eq!(encoded["point"]["x"], 5.0);
    }
}
