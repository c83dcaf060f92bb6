//! Runtime configuration.
//!
//! A [`Config`] is an immutable snapshot taken once at process start from
//! environment variables. Nothing mutates it afterwards; the one hardware
//! override (panel dimensions reported by the driver) is applied inside the
//! display controller when the panel initializes, never written back here.
//!
//! Recognized environment variables:
//!
//! | Variable | Default | Purpose |
//! |----------|---------|---------|
//! | `DASHBOARD_URL` | *(empty)* | Page the render session keeps open |
//! | `DASHBOARD_MODE` | `interactive` | `interactive` or `static` |
//! | `UPDATE_INTERVAL` | `60` | Seconds between display updates |
//! | `PARTIAL_REFRESH_LIMIT` | `60` | Partial refreshes before a forced full |
//! | `DISPLAY_WIDTH` / `DISPLAY_HEIGHT` | `400` / `200` | Configured panel size |
//! | `DISPLAY_ROTATION` | `0` | 0, 90, 180 or 270 degrees |
//! | `PANEL_MODE` | `bw` | `bw` or `gray16` |
//! | `PANEL_DRIVER` | `it8951` | `it8951` or `sim` |
//! | `VCOM` | `-2.06` | Panel VCOM voltage |
//! | `BROWSER_TIMEOUT` | `60` | Screenshot operation timeout, seconds |
//! | `CHROME_PATH` | *(auto)* | Chromium executable override |
//! | `ARTIFACT_DIR` | `/tmp/paperdash` | Debug frame dumps and metrics |
//! | `DEBUG` | `false` | Verbose logging |

use std::path::PathBuf;
use std::time::Duration;

use crate::error::Error;

/// Default number of captures before the page is reloaded in place
/// (once per day at one-minute cadence).
pub const DEFAULT_RELOAD_THRESHOLD: u32 = 1440;

/// Default number of session start attempts per cycle.
pub const DEFAULT_START_ATTEMPTS: u32 = 3;

/// Default delay between session start attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Default screenshot operation timeout.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(60);

/// Default page navigation timeout.
pub const DEFAULT_NAVIGATION_TIMEOUT: Duration = Duration::from_secs(180);

/// How the dashboard page behaves, which decides capture timing.
///
/// Interactive dashboards pull remote content after each minute boundary,
/// so captures are delayed a few seconds past the boundary to let the page
/// settle. Static pages are captured on the boundary itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DashboardMode {
    /// Remote-content dashboard; capture a fixed offset after the boundary
    Interactive,
    /// Self-contained page; capture on the boundary
    Static,
}

/// Gray-level reduction applied before the panel write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelMode {
    /// Two-level output with error-diffusion dithering
    BlackWhite,
    /// 16-level grayscale, quantized by the panel controller
    Gray16,
}

/// Panel rotation in 90-degree steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    /// No rotation
    None,
    /// 90 degrees clockwise
    Cw90,
    /// 180 degrees
    Cw180,
    /// 270 degrees clockwise
    Cw270,
}

impl Rotation {
    /// Parse a rotation from degrees.
    pub fn from_degrees(degrees: u32) -> Option<Self> {
        match degrees {
            0 => Some(Rotation::None),
            90 => Some(Rotation::Cw90),
            180 => Some(Rotation::Cw180),
            270 => Some(Rotation::Cw270),
            _ => None,
        }
    }

    /// True for rotations that swap width and height.
    pub fn swaps_axes(self) -> bool {
        matches!(self, Rotation::Cw90 | Rotation::Cw270)
    }
}

/// Which panel driver to construct at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverKind {
    /// IT8951 controller over SPI
    It8951,
    /// Filesystem-backed simulation
    Simulated,
}

/// Immutable configuration snapshot for one process lifetime.
#[derive(Debug, Clone)]
pub struct Config {
    /// Page the render session keeps open
    pub dashboard_url: String,
    /// Interactive or static capture timing
    pub dashboard_mode: DashboardMode,
    /// Seconds between display updates
    pub update_interval: u32,
    /// Partial refreshes before a forced full refresh
    pub partial_refresh_limit: u32,
    /// Configured panel width (hardware may override at init)
    pub display_width: u32,
    /// Configured panel height (hardware may override at init)
    pub display_height: u32,
    /// Panel rotation
    pub rotation: Rotation,
    /// Gray-level reduction mode
    pub panel_mode: PanelMode,
    /// Driver selection
    pub driver: DriverKind,
    /// Panel VCOM voltage
    pub vcom: f32,
    /// Screenshot operation timeout
    pub operation_timeout: Duration,
    /// Page navigation timeout
    pub navigation_timeout: Duration,
    /// Captures before the page is reloaded in place
    pub reload_threshold: u32,
    /// Session start attempts per cycle
    pub start_attempts: u32,
    /// Delay between session start attempts
    pub retry_delay: Duration,
    /// Chromium executable override
    pub chrome_path: Option<String>,
    /// Browser profile directory
    pub profile_dir: PathBuf,
    /// Debug frame dumps and metrics snapshots
    pub artifact_dir: PathBuf,
    /// Verbose logging and per-cycle frame dumps
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dashboard_url: String::new(),
            dashboard_mode: DashboardMode::Interactive,
            update_interval: 60,
            partial_refresh_limit: 60,
            display_width: 400,
            display_height: 200,
            rotation: Rotation::None,
            panel_mode: PanelMode::BlackWhite,
            driver: DriverKind::It8951,
            vcom: -2.06,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            navigation_timeout: DEFAULT_NAVIGATION_TIMEOUT,
            reload_threshold: DEFAULT_RELOAD_THRESHOLD,
            start_attempts: DEFAULT_START_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
            chrome_path: None,
            profile_dir: std::env::temp_dir().join("paperdash-profile"),
            artifact_dir: PathBuf::from("/tmp/paperdash"),
            debug: false,
        }
    }
}

fn env_str(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_u32(name: &str, default: u32) -> u32 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_f32(name: &str, default: f32) -> f32 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => matches!(
            v.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => default,
    }
}

impl Config {
    /// Load a snapshot from the environment, falling back to defaults for
    /// anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Config::default();

        let dashboard_mode = match env_str("DASHBOARD_MODE", "interactive").as_str() {
            "static" => DashboardMode::Static,
            _ => DashboardMode::Interactive,
        };
        let panel_mode = match env_str("PANEL_MODE", "bw").as_str() {
            "gray16" => PanelMode::Gray16,
            _ => PanelMode::BlackWhite,
        };
        let driver = match env_str("PANEL_DRIVER", "it8951").as_str() {
            "sim" | "simulated" | "mock" => DriverKind::Simulated,
            _ => DriverKind::It8951,
        };
        let rotation = Rotation::from_degrees(env_u32("DISPLAY_ROTATION", 0))
            .unwrap_or(Rotation::None);

        Self {
            dashboard_url: env_str("DASHBOARD_URL", ""),
            dashboard_mode,
            update_interval: env_u32("UPDATE_INTERVAL", defaults.update_interval),
            partial_refresh_limit: env_u32(
                "PARTIAL_REFRESH_LIMIT",
                defaults.partial_refresh_limit,
            ),
            display_width: env_u32("DISPLAY_WIDTH", defaults.display_width),
            display_height: env_u32("DISPLAY_HEIGHT", defaults.display_height),
            rotation,
            panel_mode,
            driver,
            vcom: env_f32("VCOM", defaults.vcom),
            operation_timeout: Duration::from_secs(u64::from(env_u32(
                "BROWSER_TIMEOUT",
                DEFAULT_OPERATION_TIMEOUT.as_secs() as u32,
            ))),
            artifact_dir: PathBuf::from(env_str("ARTIFACT_DIR", "/tmp/paperdash")),
            chrome_path: std::env::var("CHROME_PATH").ok(),
            debug: env_bool("DEBUG", defaults.debug),
            ..defaults
        }
    }

    /// Check the snapshot for values the daemon cannot run with.
    pub fn validate(&self) -> Result<(), Error> {
        let mut errors = Vec::new();

        if self.dashboard_url.is_empty() && self.driver != DriverKind::Simulated {
            errors.push("DASHBOARD_URL is required".to_string());
        }
        if self.update_interval == 0 {
            errors.push("UPDATE_INTERVAL must be positive".to_string());
        }
        if self.partial_refresh_limit == 0 {
            errors.push("PARTIAL_REFRESH_LIMIT must be positive".to_string());
        }
        if self.display_width == 0 || self.display_height == 0 {
            errors.push("display dimensions must be positive".to_string());
        }
        if self.operation_timeout.is_zero() {
            errors.push("BROWSER_TIMEOUT must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Config(errors.join("; ")))
        }
    }

    /// Set the dashboard URL.
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.dashboard_url = url.into();
        self
    }

    /// Set the configured panel dimensions.
    #[must_use]
    pub fn with_panel_size(mut self, width: u32, height: u32) -> Self {
        self.display_width = width;
        self.display_height = height;
        self
    }

    /// Set the partial refresh limit.
    #[must_use]
    pub fn with_partial_refresh_limit(mut self, limit: u32) -> Self {
        self.partial_refresh_limit = limit;
        self
    }

    /// Set the panel mode.
    #[must_use]
    pub fn with_panel_mode(mut self, mode: PanelMode) -> Self {
        self.panel_mode = mode;
        self
    }

    /// Select the panel driver.
    #[must_use]
    pub fn with_driver(mut self, driver: DriverKind) -> Self {
        self.driver = driver;
        self
    }

    /// Set the artifact directory.
    #[must_use]
    pub fn with_artifact_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifact_dir = dir.into();
        self
    }

    /// Set the delay between session start attempts.
    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }
}
