//! DOM perception: snapshot model, extraction, identity and selectors.
//!
//! - [`node`]: arena-backed element tree, geometry, selector map
//! - [`snapshot`]: extraction from the live document
//! - [`hash`]: navigation-stable element identity with single-flight caching
//! - [`selector`]: CSS selector synthesis for re-location

pub mod hash;
pub mod node;
pub mod selector;
pub mod snapshot;

pub use hash::{HashCell, HashedDomElement};
pub use node::{
    CoordinateSet, Coordinates, DomNode, DomTree, ElementData, NodeId, SelectorMap, TextData,
    ViewportInfo,
};
pub use selector::{css_selector_for, is_sentinel_selector, sentinel_selector, xpath_to_css};
pub use snapshot::{DomSnapshotBuilder, parse_payload};
