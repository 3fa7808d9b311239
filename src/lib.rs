//! # pagepilot
//!
//! A browser perception and action engine over the Chrome DevTools
//! Protocol. It lets an external decision-making process see a live,
//! mutating web page as a stable, indexed structural snapshot and act on
//! it (click, type, select, scroll, navigate) despite dynamic identifiers,
//! reflow, iframes and shadow trees.
//!
//! ## How it fits together
//!
//! Perception flows one way: document -> snapshot -> index map. The
//! extraction script walks the live DOM (shadow roots and same-origin
//! iframes included) and assigns a `highlightIndex` to every actionable
//! element; the [`dom`] module turns the payload into an arena tree plus a
//! selector map.
//!
//! Action flows the other way: index -> locate -> interact -> verify with
//! a fresh snapshot. Location and every interaction verb are fallback
//! ladders (ordered independent strategies tried until one succeeds),
//! ending in a host-scripting escape hatch.
//!
//! ## Example
//!
//! ```rust,no_run
//! use pagepilot::{AutomationConfig, BrowserSession, LaunchOptions, PageController};
//!
//! # async fn run() -> pagepilot::Result<()> {
//! let session = BrowserSession::launch(LaunchOptions::default())?;
//! let mut page = PageController::new(session, AutomationConfig::default());
//!
//! page.attach().await?;
//! page.navigate("https://example.com").await?;
//!
//! let state = page.get_state(false).await?;
//! for line in state.interactive_elements_summary() {
//!     println!("{line}");
//! }
//!
//! // Indices come from the snapshot; actions re-resolve them live.
//! page.click(0).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Module overview
//!
//! - [`browser`]: session, controller, locator, interactions, network idle
//! - [`dom`]: snapshot model, extraction, identity hashing, selectors
//! - [`config`]: perception/action knobs and session options
//! - [`error`]: error taxonomy and result alias

pub mod browser;
pub mod config;
pub mod dom;
pub mod error;

pub use browser::{
    BrowserSession, DomScriptHost, DropdownOption, DropdownSelection, HostScripter, HostTarget,
    NetworkIdleMonitor, PageController, PageState, is_automatable, normalize_url,
};
pub use config::{AutomationConfig, ConnectionOptions, LaunchOptions};
pub use dom::{
    CoordinateSet, Coordinates, DomNode, DomSnapshotBuilder, DomTree, ElementData,
    HashedDomElement, NodeId, SelectorMap, TextData, ViewportInfo,
};
pub use error::{BrowserError, Result};
