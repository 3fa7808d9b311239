//! Snapshot extraction: live document -> element tree + selector map.
//!
//! The heavy lifting happens in the page itself: `snapshot.js` walks the
//! document (including open shadow roots and same-origin iframes) and
//! returns a JSON payload. This module turns that payload into the arena
//! tree and the index map. Extraction failures are soft: the caller keeps
//! its previous state.

use std::collections::HashMap;
use std::sync::Arc;

use headless_chrome::Tab;
use serde::Deserialize;

use crate::config::AutomationConfig;
use crate::dom::hash::HashCell;
use crate::dom::node::{
    CoordinateSet, DomNode, DomTree, ElementData, NodeId, SelectorMap, TextData, ViewportInfo,
};
use crate::error::{BrowserError, Result};

const SNAPSHOT_JS: &str = include_str!("snapshot.js");

pub(crate) const REMOVE_HIGHLIGHTS_JS: &str = r#"(function () {
    const container = document.getElementById("pagepilot-highlight-container");
    if (container) container.remove();
    return true;
})()"#;

/// Raw node as emitted by the extraction script.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum RawNode {
    #[serde(rename = "element", rename_all = "camelCase")]
    Element {
        tag_name: Option<String>,
        #[serde(default)]
        xpath: String,
        #[serde(default)]
        attributes: HashMap<String, String>,
        #[serde(default)]
        children: Vec<RawNode>,
        #[serde(default)]
        is_visible: bool,
        #[serde(default)]
        is_interactive: bool,
        #[serde(default)]
        is_top_element: bool,
        #[serde(default)]
        is_shadow_host: bool,
        highlight_index: Option<usize>,
        viewport_coordinates: Option<CoordinateSet>,
        page_coordinates: Option<CoordinateSet>,
        viewport_info: Option<ViewportInfo>,
    },
    #[serde(rename = "text")]
    Text {
        text: String,
        #[serde(rename = "isVisible", default)]
        is_visible: bool,
    },
}

#[derive(Debug, Deserialize)]
struct RawPayload {
    root: Option<RawNode>,
}

/// Builds indexed snapshots from the live document.
#[derive(Debug, Clone)]
pub struct DomSnapshotBuilder {
    highlight_elements: bool,
    viewport_expansion: i64,
}

impl DomSnapshotBuilder {
    pub fn new(config: &AutomationConfig) -> Self {
        Self {
            highlight_elements: config.highlight_elements,
            viewport_expansion: config.viewport_expansion,
        }
    }

    /// Run the extraction script and parse the result.
    ///
    /// `focus_index` restricts highlight drawing to one element; indexing
    /// itself always covers the whole document.
    pub async fn capture(
        &self,
        tab: &Arc<Tab>,
        focus_index: Option<usize>,
    ) -> Result<(DomTree, SelectorMap)> {
        let args = serde_json::json!({
            "highlightElements": self.highlight_elements,
            "viewportExpansion": self.viewport_expansion,
            "focusIndex": focus_index.map(|i| i as i64).unwrap_or(-1),
        });
        let script = format!("{SNAPSHOT_JS}({args})");

        let result = tab.evaluate(&script, false).map_err(|e| {
            BrowserError::SnapshotExtractionFailed(format!("extraction script failed: {e}"))
        })?;
        let value = result.value.ok_or_else(|| {
            BrowserError::SnapshotExtractionFailed("extraction script returned nothing".to_string())
        })?;
        let payload: String = serde_json::from_value(value).map_err(|e| {
            BrowserError::SnapshotExtractionFailed(format!("payload was not a string: {e}"))
        })?;

        parse_payload(&payload)
    }

    /// Drop any overlay left behind by a previous capture.
    pub fn remove_highlights(&self, tab: &Arc<Tab>) -> Result<()> {
        tab.evaluate(REMOVE_HIGHLIGHTS_JS, false)
            .map_err(|e| BrowserError::EvaluationFailed(e.to_string()))?;
        Ok(())
    }
}

/// Parse an extraction payload into the arena tree and the selector map.
pub fn parse_payload(payload: &str) -> Result<(DomTree, SelectorMap)> {
    let raw: RawPayload = serde_json::from_str(payload)
        .map_err(|e| BrowserError::SnapshotExtractionFailed(format!("bad payload: {e}")))?;
    let root = raw.root.ok_or_else(|| {
        BrowserError::SnapshotExtractionFailed("document has no extractable root".to_string())
    })?;

    let mut nodes = Vec::new();
    let mut map = SelectorMap::new();
    let root_id = fold(root, None, &mut nodes, &mut map)?;
    Ok((DomTree::from_parts(nodes, root_id), map))
}

fn fold(
    raw: RawNode,
    parent: Option<NodeId>,
    nodes: &mut Vec<DomNode>,
    map: &mut SelectorMap,
) -> Result<NodeId> {
    match raw {
        RawNode::Text { text, is_visible } => {
            let id = NodeId(nodes.len());
            nodes.push(DomNode::Text(TextData {
                text,
                is_visible,
                parent,
            }));
            Ok(id)
        }
        RawNode::Element {
            tag_name,
            xpath,
            attributes,
            children,
            is_visible,
            is_interactive,
            is_top_element,
            is_shadow_host,
            highlight_index,
            viewport_coordinates,
            page_coordinates,
            viewport_info,
        } => {
            let id = NodeId(nodes.len());
            nodes.push(DomNode::Element(ElementData {
                tag_name,
                xpath,
                attributes,
                children: Vec::new(),
                is_visible,
                is_interactive,
                is_top_element,
                is_shadow_host,
                highlight_index,
                viewport_coordinates,
                page_coordinates,
                viewport_info,
                parent,
                hash_cell: HashCell::new(),
            }));

            if let Some(index) = highlight_index {
                if !map.insert(index, id) {
                    return Err(BrowserError::SnapshotExtractionFailed(format!(
                        "highlight index {index} assigned twice"
                    )));
                }
            }

            let mut child_ids = Vec::with_capacity(children.len());
            for child in children {
                child_ids.push(fold(child, Some(id), nodes, map)?);
            }
            if let Some(DomNode::Element(data)) = nodes.get_mut(id.0) {
                data.children = child_ids;
            }
            Ok(id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "root": {
            "type": "element",
            "tagName": "body",
            "xpath": "/body[1]",
            "attributes": {},
            "isVisible": true,
            "children": [
                {
                    "type": "element",
                    "tagName": "div",
                    "xpath": "/body[1]/div[1]",
                    "attributes": {"class": "hidden-note"},
                    "isVisible": false,
                    "children": [
                        {"type": "text", "text": "context only", "isVisible": false}
                    ]
                },
                {
                    "type": "element",
                    "tagName": "button",
                    "xpath": "/body[1]/div[2]/button[1]",
                    "attributes": {"id": "go"},
                    "isVisible": true,
                    "isInteractive": true,
                    "isTopElement": true,
                    "highlightIndex": 0,
                    "viewportCoordinates": {
                        "topLeft": {"x": 10.0, "y": 20.0},
                        "bottomRight": {"x": 110.0, "y": 60.0},
                        "center": {"x": 60.0, "y": 40.0},
                        "width": 100.0,
                        "height": 40.0
                    },
                    "pageCoordinates": {
                        "topLeft": {"x": 10.0, "y": 520.0},
                        "bottomRight": {"x": 110.0, "y": 560.0},
                        "center": {"x": 60.0, "y": 540.0},
                        "width": 100.0,
                        "height": 40.0
                    },
                    "viewportInfo": {"scrollX": 0.0, "scrollY": 500.0, "width": 1280.0, "height": 720.0},
                    "children": [
                        {"type": "text", "text": "Go", "isVisible": true}
                    ]
                },
                {
                    "type": "element",
                    "tagName": "a",
                    "xpath": "/body[1]/a[1]",
                    "attributes": {"href": "/next"},
                    "isVisible": true,
                    "isInteractive": true,
                    "isTopElement": true,
                    "highlightIndex": 1,
                    "children": []
                }
            ]
        }
    }"#;

    #[test]
    fn selector_map_is_a_bijection_over_indexed_nodes() {
        let (tree, map) = parse_payload(SAMPLE).unwrap();

        // Every map entry resolves to a node carrying exactly that index.
        for (index, id) in map.iter() {
            let element = tree.element(id).unwrap();
            assert_eq!(element.highlight_index, Some(index));
        }

        // Every indexed node in the tree appears in the map.
        let indexed: Vec<usize> = tree
            .iter_elements()
            .filter_map(|(_, e)| e.highlight_index)
            .collect();
        assert_eq!(indexed.len(), map.len());
        for index in &indexed {
            assert!(map.contains(*index));
        }

        // Indices are unique.
        let mut sorted = indexed.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), indexed.len());
    }

    #[test]
    fn invisible_elements_are_kept_but_not_indexed() {
        let (tree, map) = parse_payload(SAMPLE).unwrap();
        let (hidden_id, hidden) = tree
            .iter_elements()
            .find(|(_, e)| e.get_attribute("class") == Some("hidden-note"))
            .unwrap();
        assert!(!hidden.is_visible);
        assert!(hidden.highlight_index.is_none());
        assert_eq!(tree.visible_text(hidden_id), "");
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn geometry_round_trips() {
        let (tree, map) = parse_payload(SAMPLE).unwrap();
        let button = tree.element(map.get(0).unwrap()).unwrap();
        let viewport = button.viewport_coordinates.as_ref().unwrap();
        assert_eq!(viewport.center.x, 60.0);
        assert_eq!(viewport.center.y, 40.0);
        let page = button.page_coordinates.as_ref().unwrap();
        assert_eq!(page.center.y, 540.0);
        assert_eq!(button.viewport_info.unwrap().scroll_y, 500.0);
    }

    #[test]
    fn parents_link_back_to_owners() {
        let (tree, map) = parse_payload(SAMPLE).unwrap();
        let button_id = map.get(0).unwrap();
        let parent = tree.parent(button_id).unwrap();
        assert_eq!(parent, tree.root());
        assert!(tree.branch_path(button_id).ends_with(&["button".to_string()]));
    }

    #[test]
    fn duplicate_highlight_index_is_rejected() {
        let payload = r#"{
            "root": {
                "type": "element", "tagName": "body", "xpath": "/body[1]",
                "isVisible": true,
                "children": [
                    {"type": "element", "tagName": "a", "xpath": "/body[1]/a[1]",
                     "isVisible": true, "isInteractive": true, "highlightIndex": 0, "children": []},
                    {"type": "element", "tagName": "a", "xpath": "/body[1]/a[2]",
                     "isVisible": true, "isInteractive": true, "highlightIndex": 0, "children": []}
                ]
            }
        }"#;
        let err = parse_payload(payload).unwrap_err();
        assert!(matches!(err, BrowserError::SnapshotExtractionFailed(_)));
    }

    #[test]
    fn missing_root_is_soft_failure() {
        let err = parse_payload(r#"{"root": null}"#).unwrap_err();
        assert!(matches!(err, BrowserError::SnapshotExtractionFailed(_)));
        let err = parse_payload("not json").unwrap_err();
        assert!(matches!(err, BrowserError::SnapshotExtractionFailed(_)));
    }

    #[test]
    fn button_text_is_reachable() {
        let (tree, map) = parse_payload(SAMPLE).unwrap();
        let button_id = map.get(0).unwrap();
        assert_eq!(tree.visible_text(button_id), "Go");
    }
}
