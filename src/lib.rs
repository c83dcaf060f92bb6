//! # paperdash
//!
//! A web-dashboard daemon for e-paper panels. It keeps one headless
//! Chromium tab open on a dashboard page, periodically screenshots it,
//! normalizes the bitmap for the panel (resize, grayscale, rotation,
//! error-diffusion dithering) and commits it to an IT8951 controller over
//! SPI, or to a filesystem simulation when no hardware is present.
//!
//! Built for unattended operation on a small single-board computer: the
//! browser session is recycled on failure and reloaded daily to bound
//! memory growth, partial panel refreshes are rationed to limit ghosting,
//! and updates stay aligned to wall-clock minute boundaries without
//! accumulating drift.
//!
//! ## Pipeline
//!
//! ```text
//! Schedule -> Orchestrator -> RenderSession -> processor -> DisplayController -> panel
//! ```
//!
//! ## Module Overview
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`session`] | Persistent headless-browser capture |
//! | [`processor`] | Resize, grayscale, rotation, dithering |
//! | [`display`] | Partial-vs-full refresh controller |
//! | [`driver`] | Panel hardware boundary and simulation |
//! | [`schedule`] | Minute-aligned update timing |
//! | [`orchestrator`] | The render-process-display cycle |
//! | [`telemetry`] | Timings and counters |
//! | [`artifacts`] | Debug frame dumps |
//! | [`config`] | Environment-based configuration snapshot |
//! | [`error`] | Error taxonomy |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use paperdash::{Config, DisplayController, MetricsRecorder, Orchestrator, RenderSession};
//!
//! let config = Config::from_env();
//! config.validate()?;
//!
//! let mut display = DisplayController::new(paperdash::create_driver(&config), &config);
//! display.initialize()?;
//!
//! let session_config = config.clone();
//! let mut orchestrator = Orchestrator::new(
//!     &config,
//!     display,
//!     Box::new(MetricsRecorder::new()),
//!     move || RenderSession::start(&session_config),
//! );
//! orchestrator.run_continuous();
//! ```
//!
//! ## Feature Flags
//!
//! - `hardware` - IT8951 SPI driver (Raspberry Pi); without it the IT8951
//!   selection falls back to the simulated panel

pub mod artifacts;
pub mod config;
pub mod display;
pub mod driver;
pub mod error;
pub mod frame;
pub mod orchestrator;
pub mod processor;
pub mod schedule;
pub mod session;
pub mod telemetry;

pub use artifacts::ArtifactSink;
pub use config::{Config, DashboardMode, DriverKind, PanelMode, Rotation};
pub use display::{DisplayController, RefreshKind, RefreshStats};
pub use driver::{create_driver, PanelDriver, Region, SimulatedDriver};
pub use error::{DisplayError, Error, SessionError};
pub use frame::{Frame, FrameOrigin};
pub use orchestrator::Orchestrator;
pub use schedule::{measure_offset, next_update, Schedule};
pub use session::{Liveness, RenderSession, RenderSource};
pub use telemetry::{LogSink, MetricsRecorder, TelemetrySink};

#[cfg(feature = "hardware")]
pub use driver::It8951Driver;
