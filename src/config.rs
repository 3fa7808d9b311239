use std::path::PathBuf;

/// Knobs for snapshot extraction and load synchronization.
#[derive(Debug, Clone)]
pub struct AutomationConfig {
    /// Draw numbered overlay boxes over indexed elements during extraction.
    pub highlight_elements: bool,

    /// Index elements up to this many pixels beyond the viewport edges.
    /// A negative value disables the viewport filter entirely.
    pub viewport_expansion: i64,

    /// Allow class names and test attributes (`data-testid` etc.) in
    /// selector synthesis. Disable on sites that randomize them per render.
    pub include_dynamic_attributes: bool,

    /// Unconditional settle delay after navigation, in seconds.
    pub minimum_wait_page_load_time: f64,

    /// Idle window the network monitor must observe before the page counts
    /// as loaded, in seconds.
    pub wait_for_network_idle_page_load_time: f64,

    /// Hard cap on the whole load wait, in seconds.
    pub maximum_wait_page_load_time: f64,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            highlight_elements: true,
            viewport_expansion: 500,
            include_dynamic_attributes: true,
            minimum_wait_page_load_time: 0.25,
            wait_for_network_idle_page_load_time: 0.5,
            maximum_wait_page_load_time: 5.0,
        }
    }
}

impl AutomationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn highlight_elements(mut self, enabled: bool) -> Self {
        self.highlight_elements = enabled;
        self
    }

    pub fn viewport_expansion(mut self, pixels: i64) -> Self {
        self.viewport_expansion = pixels;
        self
    }

    pub fn include_dynamic_attributes(mut self, enabled: bool) -> Self {
        self.include_dynamic_attributes = enabled;
        self
    }

    pub fn minimum_wait_page_load_time(mut self, seconds: f64) -> Self {
        self.minimum_wait_page_load_time = seconds;
        self
    }

    pub fn wait_for_network_idle_page_load_time(mut self, seconds: f64) -> Self {
        self.wait_for_network_idle_page_load_time = seconds;
        self
    }

    pub fn maximum_wait_page_load_time(mut self, seconds: f64) -> Self {
        self.maximum_wait_page_load_time = seconds;
        self
    }
}

/// Options for launching a fresh Chrome/Chromium instance.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub headless: bool,
    pub window_width: u32,
    pub window_height: u32,
    pub chrome_path: Option<PathBuf>,
    pub user_data_dir: Option<PathBuf>,
    pub sandbox: bool,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            headless: true,
            window_width: 1280,
            window_height: 1024,
            chrome_path: None,
            user_data_dir: None,
            sandbox: true,
        }
    }
}

impl LaunchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    pub fn window_size(mut self, width: u32, height: u32) -> Self {
        self.window_width = width;
        self.window_height = height;
        self
    }

    pub fn chrome_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.chrome_path = Some(path.into());
        self
    }

    pub fn user_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.user_data_dir = Some(dir.into());
        self
    }

    pub fn sandbox(mut self, sandbox: bool) -> Self {
        self.sandbox = sandbox;
        self
    }
}

/// Options for attaching to an already-running browser over WebSocket.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub ws_url: String,
    pub timeout: u64,
}

impl ConnectionOptions {
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            timeout: 30_000,
        }
    }

    pub fn timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout = timeout_ms;
        self
    }
}
