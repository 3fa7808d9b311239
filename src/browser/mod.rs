//! Browser side of the engine: transport, perception orchestration and
//! action execution.
//!
//! - [`session`]: launching/connecting Chrome, tab selection
//! - [`controller`]: attach/detach, load sync, snapshot refresh, actions
//! - [`locator`]: snapshot node -> live handle resolution
//! - [`interaction`]: click/type/select/scroll/key fallback ladders
//! - [`network`]: network-idle readiness heuristic
//! - [`input`]: raw CDP mouse/keyboard dispatch
//! - [`host`]: last-resort host scripting seam

pub mod controller;
pub mod host;
pub mod input;
pub mod interaction;
pub mod locator;
pub mod network;
pub mod session;

pub use controller::{PageController, PageState, is_automatable, normalize_url};
pub use host::{DomScriptHost, HostScripter, HostTarget};
pub use input::{KeySpec, ModifierKey, parse_key_combo};
pub use interaction::{DropdownOption, DropdownSelection, InteractionExecutor};
pub use locator::{ElementLocator, LiveHandle, SelectorKind};
pub use network::NetworkIdleMonitor;
pub use session::BrowserSession;
