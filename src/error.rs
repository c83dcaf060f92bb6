//! Error types for the dashboard daemon.

use thiserror::Error;

/// Errors from the persistent render session.
///
/// Session errors are recoverable: the orchestrator retries session startup
/// a bounded number of times before giving up on the current cycle.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The browser process could not be launched
    #[error("failed to launch browser: {0}")]
    Launch(String),

    /// Navigation to the dashboard URL failed
    #[error("navigation failed: {0}")]
    Navigation(String),

    /// An operation was requested while the session is not running
    #[error("render session is not running")]
    NotRunning,

    /// The screenshot or navigation exceeded its bounded timeout
    #[error("capture timed out after {0}s")]
    CaptureTimeout(u64),

    /// Taking a screenshot failed below the timeout
    #[error("screenshot failed: {0}")]
    Capture(String),

    /// The post-start verification capture did not produce an image
    #[error("verification capture failed: {0}")]
    VerificationFailed(String),

    /// Screenshot bytes could not be decoded
    #[error("screenshot decode failed: {0}")]
    Decode(String),
}

/// Errors from the display refresh controller and panel drivers.
///
/// Display errors are not retried internally; they surface as a failed
/// cycle and the orchestrator moves on to the next scheduled update.
#[derive(Debug, Error)]
pub enum DisplayError {
    /// Hardware was expected but is not initialized
    #[error("display hardware not ready")]
    HardwareNotReady,

    /// `commit` was called with an empty frame
    #[error("cannot update display with an empty frame")]
    NullFrame,

    /// A region update falls outside the panel bounds
    #[error("region {width}x{height}+{x}+{y} exceeds panel bounds")]
    InvalidRegion {
        /// Region x offset
        x: u32,
        /// Region y offset
        y: u32,
        /// Region width
        width: u32,
        /// Region height
        height: u32,
    },

    /// SPI bus transfer failed
    #[error("SPI transfer failed: {0}")]
    Spi(String),

    /// GPIO access failed
    #[error("GPIO access failed: {0}")]
    Gpio(String),

    /// The panel controller did not become ready within the bounded wait
    #[error("panel busy-wait timed out")]
    BusyTimeout,

    /// Writing a simulation artifact failed
    #[error("failed to write simulation artifact: {0}")]
    Artifact(String),
}

/// Top-level error for one dashboard cycle.
#[derive(Debug, Error)]
pub enum Error {
    /// Render session failure
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Display commit failure
    #[error(transparent)]
    Display(#[from] DisplayError),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SessionError::CaptureTimeout(60);
        assert!(err.to_string().contains("60s"));

        let err = DisplayError::InvalidRegion {
            x: 10,
            y: 20,
            width: 100,
            height: 50,
        };
        assert!(err.to_string().contains("100x50+10+20"));

        let err = Error::Config("bad interval".to_string());
        assert!(err.to_string().contains("bad interval"));
    }

    #[test]
    fn test_error_conversion() {
        let err: Error = SessionError::NotRunning.into();
        assert!(matches!(err, Error::Session(_)));

        let err: Error = DisplayError::HardwareNotReady.into();
        assert!(matches!(err, Error::Display(_)));
    }
}
