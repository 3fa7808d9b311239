//! Browser session: launching or connecting to Chrome and picking tabs.

use std::ffi::OsStr;
use std::sync::Arc;
use std::time::Duration;

use headless_chrome::{Browser, Tab};
use log::debug;

use crate::config::{ConnectionOptions, LaunchOptions};
use crate::error::{BrowserError, Result};

/// Owns the Chrome/Chromium instance the engine automates.
pub struct BrowserSession {
    browser: Browser,
}

impl BrowserSession {
    /// Launch a fresh browser instance.
    pub fn launch(options: LaunchOptions) -> Result<Self> {
        let mut launch_opts = headless_chrome::LaunchOptions::default();

        // Strip the automation banner and its JS-visible marker; anti-bot
        // checks key on both.
        launch_opts
            .ignore_default_args
            .push(OsStr::new("--enable-automation"));
        launch_opts
            .args
            .push(OsStr::new("--disable-blink-features=AutomationControlled"));

        // The default 30s idle timeout kills long-lived perception sessions.
        launch_opts.idle_browser_timeout = Duration::from_secs(60 * 60);

        launch_opts.headless = options.headless;
        launch_opts.window_size = Some((options.window_width, options.window_height));
        launch_opts.sandbox = options.sandbox;
        if let Some(path) = options.chrome_path {
            launch_opts.path = Some(path);
        }
        if let Some(dir) = options.user_data_dir {
            launch_opts.user_data_dir = Some(dir);
        }

        let browser =
            Browser::new(launch_opts).map_err(|e| BrowserError::LaunchFailed(e.to_string()))?;
        browser
            .new_tab()
            .map_err(|e| BrowserError::LaunchFailed(format!("initial tab failed: {e}")))?;

        Ok(Self { browser })
    }

    /// Attach to an already-running browser over its WebSocket endpoint.
    pub fn connect(options: ConnectionOptions) -> Result<Self> {
        let browser = Browser::connect(options.ws_url)
            .map_err(|e| BrowserError::ConnectionFailed(e.to_string()))?;
        Ok(Self { browser })
    }

    pub fn browser(&self) -> &Browser {
        &self.browser
    }

    /// Every open tab, in creation order.
    pub fn tabs(&self) -> Result<Vec<Arc<Tab>>> {
        let tabs = self
            .browser
            .get_tabs()
            .lock()
            .map_err(|e| BrowserError::TabOperationFailed(format!("tab list poisoned: {e}")))?
            .clone();
        Ok(tabs)
    }

    /// Open a new tab.
    pub fn new_tab(&self) -> Result<Arc<Tab>> {
        self.browser
            .new_tab()
            .map_err(|e| BrowserError::TabOperationFailed(format!("new tab failed: {e}")))
    }

    /// The tab the user is looking at.
    ///
    /// Two probes: first a tab that is both visible and focused, then any
    /// visible one. Tabs whose document cannot be asked are skipped.
    pub fn active_tab(&self) -> Result<Arc<Tab>> {
        let tabs = self.tabs()?;

        for probe in [
            "document.visibilityState === 'visible' && document.hasFocus()",
            "document.visibilityState === 'visible'",
        ] {
            for tab in &tabs {
                match tab.evaluate(probe, false) {
                    Ok(remote) => {
                        if remote.value.and_then(|v| v.as_bool()).unwrap_or(false) {
                            return Ok(Arc::clone(tab));
                        }
                    }
                    Err(e) => {
                        debug!("tab probe failed: {e}");
                        continue;
                    }
                }
            }
        }

        Err(BrowserError::TabOperationFailed(
            "no active tab found".to_string(),
        ))
    }

    /// Any tab that still answers a trivial evaluation. Used to adopt a
    /// replacement after the attached document goes stale.
    pub fn any_live_tab(&self) -> Result<Arc<Tab>> {
        for tab in self.tabs()? {
            if tab.evaluate("1", false).is_ok() {
                return Ok(tab);
            }
        }
        Err(BrowserError::NoValidPages)
    }

    /// Close every tab; the browser itself dies with the session drop.
    pub fn close(&self) -> Result<()> {
        for tab in self.tabs()? {
            let _ = tab.close(false);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConnectionOptions, LaunchOptions};

    #[test]
    fn launch_options_defaults_are_headless() {
        let opts = LaunchOptions::default();
        assert!(opts.headless);
        assert!(opts.sandbox);
        assert!(opts.chrome_path.is_none());
    }

    #[test]
    fn connection_options_roundtrip() {
        let opts = ConnectionOptions::new("ws://127.0.0.1:9222/devtools").timeout(1000);
        assert_eq!(opts.ws_url, "ws://127.0.0.1:9222/devtools");
        assert_eq!(opts.timeout, 1000);
    }

    // Integration tests that need a local Chrome live in tests/ and are
    // ignored by default.
    #[test]
    #[ignore]
    fn launch_and_probe_active_tab() {
        let session =
            BrowserSession::launch(LaunchOptions::new().headless(true)).expect("launch failed");
        let tab = session.active_tab();
        assert!(tab.is_ok());
    }
}
