//! Display refresh controller: partial-vs-full cadence over a panel driver.
//!
//! E-paper partial refreshes are fast but accumulate ghosting; the
//! controller books how many have happened and forces a high-quality full
//! refresh when the configured limit is reached. The same bookkeeping runs
//! against hardware and the simulated panel.

use chrono::{DateTime, Utc};
use image::{GrayImage, Luma};
use serde::Serialize;

use crate::artifacts::ArtifactSink;
use crate::config::{Config, PanelMode, Rotation};
use crate::driver::{PanelDriver, Region};
use crate::error::DisplayError;
use crate::frame::Frame;
use crate::processor;

/// Which waveform a commit used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshKind {
    /// High-quality write; clears ghosting and resets the partial counter
    Full,
    /// Fast write; increments the partial counter
    Partial,
}

impl RefreshKind {
    /// Label for logs and telemetry.
    pub fn as_str(self) -> &'static str {
        match self {
            RefreshKind::Full => "full",
            RefreshKind::Partial => "partial",
        }
    }
}

/// Refresh bookkeeping snapshot for logs.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshStats {
    /// Partial refreshes since the last full refresh
    pub partial_refresh_count: u32,
    /// Configured partial refresh limit
    pub partial_refresh_limit: u32,
    /// Completion time of the last successful commit
    pub last_update_time: Option<DateTime<Utc>>,
    /// Whether the driver initialized
    pub hardware_ready: bool,
}

/// Owns the panel driver and decides partial vs full per commit.
pub struct DisplayController {
    driver: Box<dyn PanelDriver>,
    width: u32,
    height: u32,
    rotation: Rotation,
    mode: PanelMode,
    partial_refresh_limit: u32,
    partial_refresh_count: u32,
    last_committed: Option<Frame>,
    last_update_time: Option<DateTime<Utc>>,
    hardware_ready: bool,
    debug_sink: Option<ArtifactSink>,
}

impl DisplayController {
    /// Create an uninitialized controller over `driver`.
    pub fn new(driver: Box<dyn PanelDriver>, config: &Config) -> Self {
        Self {
            driver,
            width: config.display_width,
            height: config.display_height,
            rotation: config.rotation,
            mode: config.panel_mode,
            partial_refresh_limit: config.partial_refresh_limit,
            partial_refresh_count: 0,
            last_committed: None,
            last_update_time: None,
            hardware_ready: false,
            debug_sink: None,
        }
    }

    /// Also persist every processed frame as a debug artifact.
    #[must_use]
    pub fn with_debug_sink(mut self, sink: ArtifactSink) -> Self {
        self.debug_sink = Some(sink);
        self
    }

    /// Initialize the driver, adopting hardware-reported dimensions when
    /// they differ from the configured ones.
    pub fn initialize(&mut self) -> Result<(), DisplayError> {
        let (width, height) = self.driver.initialize()?;
        if (width, height) != (self.width, self.height) {
            tracing::warn!(
                configured_width = self.width,
                configured_height = self.height,
                hardware_width = width,
                hardware_height = height,
                "panel size mismatch, adopting hardware dimensions"
            );
            self.width = width;
            self.height = height;
        }
        self.hardware_ready = true;
        Ok(())
    }

    /// Panel width after any hardware override.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Panel height after any hardware override.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Partial refreshes since the last full refresh.
    pub fn partial_refresh_count(&self) -> u32 {
        self.partial_refresh_count
    }

    /// Whether the driver initialized.
    pub fn is_ready(&self) -> bool {
        self.hardware_ready
    }

    /// Refresh bookkeeping snapshot.
    pub fn refresh_stats(&self) -> RefreshStats {
        RefreshStats {
            partial_refresh_count: self.partial_refresh_count,
            partial_refresh_limit: self.partial_refresh_limit,
            last_update_time: self.last_update_time,
            hardware_ready: self.hardware_ready,
        }
    }

    /// A refresh is full when the caller forces it, when no committed frame
    /// exists yet, or when this write would reach the partial limit.
    fn decide(&self, force_full: bool) -> RefreshKind {
        if force_full
            || self.last_committed.is_none()
            || self.partial_refresh_count + 1 >= self.partial_refresh_limit
        {
            RefreshKind::Full
        } else {
            RefreshKind::Partial
        }
    }

    /// Normalize `frame` to the panel and write it.
    ///
    /// Counters and the committed-frame record advance only on success, so
    /// a failed write leaves the refresh cadence untouched.
    pub fn commit(
        &mut self,
        frame: &Frame,
        force_full: bool,
        region: Option<Region>,
    ) -> Result<RefreshKind, DisplayError> {
        if frame.is_empty() {
            return Err(DisplayError::NullFrame);
        }
        if !self.hardware_ready {
            return Err(DisplayError::HardwareNotReady);
        }

        if let Some(r) = region {
            if !r.fits_within(self.width, self.height) {
                return Err(DisplayError::InvalidRegion {
                    x: r.x,
                    y: r.y,
                    width: r.width,
                    height: r.height,
                });
            }
        }

        let kind = self.decide(force_full);

        // Pre-rotation target size, so the rotated result matches the panel
        let (target_width, target_height) = if self.rotation.swaps_axes() {
            (self.height, self.width)
        } else {
            (self.width, self.height)
        };
        let processed =
            processor::normalize(frame, target_width, target_height, self.rotation, self.mode);

        tracing::info!(
            refresh = kind.as_str(),
            count = self.partial_refresh_count,
            region = region.is_some(),
            "updating display"
        );

        match kind {
            RefreshKind::Full => {
                self.driver.write_full(processed.pixels())?;
                self.partial_refresh_count = 0;
                tracing::debug!("full refresh completed, partial count reset");
            }
            RefreshKind::Partial => {
                self.driver.write_partial(processed.pixels(), region)?;
                self.partial_refresh_count += 1;
                tracing::debug!(
                    count = self.partial_refresh_count,
                    "partial refresh completed"
                );
            }
        }

        if let Some(sink) = &self.debug_sink {
            if let Err(e) = sink.save(processed.pixels(), kind.as_str()) {
                tracing::warn!(error = %e, "failed to save debug capture");
            }
        }

        self.last_committed = Some(processed);
        self.last_update_time = Some(Utc::now());
        Ok(kind)
    }

    /// Force a full white-frame refresh and reset the partial counter.
    /// Used at startup/shutdown boundaries.
    pub fn clear(&mut self) -> Result<(), DisplayError> {
        if !self.hardware_ready {
            tracing::warn!("clear requested before panel init, resetting counters only");
            self.partial_refresh_count = 0;
            return Ok(());
        }
        let white = GrayImage::from_pixel(self.width, self.height, Luma([255]));
        self.driver.write_full(&white)?;
        self.partial_refresh_count = 0;
        tracing::info!("display cleared");
        Ok(())
    }

    /// Put the panel into its low-power state.
    pub fn sleep(&mut self) {
        self.driver.sleep();
    }

    /// Release the driver; the controller is unusable afterwards.
    pub fn close(&mut self) {
        self.driver.close();
        self.hardware_ready = false;
    }
}
