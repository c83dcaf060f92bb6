//! Persistent headless-browser render session.
//!
//! One Chromium instance and one tab stay open across cycles, so each
//! capture costs a screenshot instead of a cold browser launch. The session
//! owns a dedicated tokio runtime and drives the browser over CDP; every
//! public method blocks with a bounded timeout, so async never crosses the
//! module boundary.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use tokio::runtime::Runtime;

use crate::config::Config;
use crate::error::SessionError;
use crate::frame::Frame;

/// Chromium flags tuned for small single-board computers.
const CHROME_ARGS: &[&str] = &[
    "--disable-gpu",
    "--disable-dev-shm-usage",
    "--disable-extensions",
    "--disable-plugins",
    "--disable-background-networking",
    "--disable-renderer-backgrounding",
    "--disable-background-timer-throttling",
    "--disable-features=Translate,BackForwardCache,AcceptCHFrame,MediaRouter,OptimizationHints,PaintHolding",
    "--hide-scrollbars",
    "--mute-audio",
    "--no-first-run",
    "--no-default-browser-check",
    "--disable-software-rasterizer",
    "--disk-cache-size=0",
    "--memory-pressure-off",
    "--force-device-scale-factor=1",
];

/// Injected after every navigation: stop content moving between captures.
const EINK_STYLE_JS: &str = r#"
(() => {
  const style = document.createElement('style');
  style.textContent = `
    * {
      animation: none !important;
      transition: none !important;
      animation-duration: 0s !important;
      transition-duration: 0s !important;
    }
    video, audio {
      display: none !important;
    }
    .slideshow, .carousel {
      animation: none !important;
    }
  `;
  document.head.appendChild(style);
})()
"#;

/// Injected after every navigation: normalize scroll position and zoom.
const EINK_RESET_JS: &str = "window.scrollTo(0, 0); \
    document.body.style.zoom = '100%'; \
    document.documentElement.style.zoom = '100%';";

/// Lifecycle state of a render session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// No browser resources held
    Stopped,
    /// Browser launching, not yet verified
    Starting,
    /// Verified and serving captures
    Running,
    /// A capture failed; the session needs a stop/start cycle
    Degraded,
}

/// The render-source seam the orchestrator drives.
///
/// [`RenderSession`] is the production implementation; tests exercise the
/// orchestrator's recovery policy with fakes.
pub trait RenderSource {
    /// Take a full-page screenshot of the current content.
    fn capture(&mut self) -> Result<Frame, SessionError>;

    /// Re-navigate the existing tab and re-apply the e-ink normalization.
    fn reload(&mut self) -> Result<(), SessionError>;

    /// Release all resources unconditionally; idempotent.
    fn stop(&mut self);

    /// Current lifecycle state.
    fn liveness(&self) -> Liveness;

    /// Captures served since the last reload (or start).
    fn renders_since_reload(&self) -> u32;
}

/// A persistent Chromium tab pointed at the dashboard URL.
pub struct RenderSession {
    runtime: Runtime,
    browser: Option<Browser>,
    page: Option<Page>,
    liveness: Liveness,
    target_url: String,
    renders_since_reload: u32,
    operation_timeout: Duration,
    navigation_timeout: Duration,
    viewport: (u32, u32),
    chrome_path: Option<String>,
    profile_dir: PathBuf,
}

impl RenderSession {
    /// Launch the browser, navigate to the dashboard and verify with one
    /// capture. On any failure all resources are released before returning.
    pub fn start(config: &Config) -> Result<Self, SessionError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .map_err(|e| SessionError::Launch(e.to_string()))?;

        let mut session = Self {
            runtime,
            browser: None,
            page: None,
            liveness: Liveness::Starting,
            target_url: config.dashboard_url.clone(),
            renders_since_reload: 0,
            operation_timeout: config.operation_timeout,
            navigation_timeout: config.navigation_timeout,
            viewport: (config.display_width, config.display_height),
            chrome_path: config.chrome_path.clone(),
            profile_dir: config.profile_dir.clone(),
        };

        tracing::info!(url = %session.target_url, "starting render session");
        if let Err(e) = session.launch() {
            session.shutdown();
            return Err(e);
        }

        session.liveness = Liveness::Running;
        tracing::info!("render session ready");
        Ok(session)
    }

    fn launch(&mut self) -> Result<(), SessionError> {
        let (width, height) = self.viewport;
        let chrome_path = self.chrome_path.clone();
        let profile_dir = self.profile_dir.clone();
        let operation_timeout = self.operation_timeout;

        let (browser, page) = self.runtime.block_on(async move {
            let mut builder = BrowserConfig::builder()
                .no_sandbox()
                .window_size(width, height)
                .user_data_dir(&profile_dir)
                .request_timeout(operation_timeout)
                .args(CHROME_ARGS.iter().map(|arg| arg.to_string()));
            if let Some(path) = &chrome_path {
                builder = builder.chrome_executable(PathBuf::from(path));
            }
            let browser_config = builder.build().map_err(SessionError::Launch)?;

            let (browser, mut handler) = Browser::launch(browser_config)
                .await
                .map_err(|e| SessionError::Launch(e.to_string()))?;

            // The handler stream must be polled for the browser to make
            // progress; it lives on the session's worker threads.
            tokio::spawn(async move {
                while let Some(event) = handler.next().await {
                    if event.is_err() {
                        break;
                    }
                }
            });

            let page = browser
                .new_page("about:blank")
                .await
                .map_err(|e| SessionError::Launch(e.to_string()))?;

            Ok::<_, SessionError>((browser, page))
        })?;

        self.browser = Some(browser);
        self.page = Some(page);

        self.navigate()?;

        // One verification capture before declaring readiness
        self.screenshot()
            .map_err(|e| SessionError::VerificationFailed(e.to_string()))?;
        Ok(())
    }

    /// Navigate the existing tab to the target URL and re-apply the e-ink
    /// normalization.
    fn navigate(&mut self) -> Result<(), SessionError> {
        let Some(page) = self.page.clone() else {
            return Err(SessionError::NotRunning);
        };
        let url = self.target_url.clone();
        let navigation_timeout = self.navigation_timeout;

        self.runtime.block_on(async {
            let navigation = async {
                page.goto(url.as_str()).await?;
                page.wait_for_navigation().await?;
                Ok::<_, chromiumoxide::error::CdpError>(())
            };
            match tokio::time::timeout(navigation_timeout, navigation).await {
                Err(_) => Err(SessionError::Navigation(format!(
                    "timed out after {}s",
                    navigation_timeout.as_secs()
                ))),
                Ok(Err(e)) => Err(SessionError::Navigation(e.to_string())),
                Ok(Ok(())) => Ok(()),
            }
        })?;

        self.normalize_page();
        Ok(())
    }

    /// Best-effort page normalization; a failure here degrades the capture
    /// quality, not the session.
    fn normalize_page(&self) {
        let Some(page) = self.page.clone() else {
            return;
        };
        let result = self.runtime.block_on(async {
            page.evaluate(EINK_STYLE_JS).await?;
            page.evaluate(EINK_RESET_JS).await?;
            Ok::<_, chromiumoxide::error::CdpError>(())
        });
        match result {
            Ok(()) => tracing::debug!("page normalized for e-ink capture"),
            Err(e) => tracing::warn!(error = %e, "failed to normalize page"),
        }
    }

    /// Screenshot the tab regardless of liveness; used both for captures
    /// and for the start-time verification.
    fn screenshot(&self) -> Result<Frame, SessionError> {
        let Some(page) = self.page.clone() else {
            return Err(SessionError::NotRunning);
        };
        let operation_timeout = self.operation_timeout;

        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .full_page(true)
            .build();

        let outcome = self
            .runtime
            .block_on(async { tokio::time::timeout(operation_timeout, page.screenshot(params)).await });

        match outcome {
            Err(_) => Err(SessionError::CaptureTimeout(operation_timeout.as_secs())),
            Ok(Err(e)) => Err(SessionError::Capture(e.to_string())),
            Ok(Ok(bytes)) => Frame::from_png(&bytes).map_err(SessionError::Decode),
        }
    }

    fn shutdown(&mut self) {
        self.liveness = Liveness::Stopped;
        self.page = None;
        if let Some(mut browser) = self.browser.take() {
            let result = self.runtime.block_on(async {
                browser.close().await?;
                browser.wait().await?;
                Ok::<_, chromiumoxide::error::CdpError>(())
            });
            if let Err(e) = result {
                tracing::debug!(error = %e, "browser shutdown was not clean");
            }
            tracing::info!("render session stopped");
        }
    }
}

impl RenderSource for RenderSession {
    fn capture(&mut self) -> Result<Frame, SessionError> {
        if self.liveness != Liveness::Running {
            return Err(SessionError::NotRunning);
        }

        let started = Instant::now();
        match self.screenshot() {
            Ok(frame) => {
                self.renders_since_reload += 1;
                tracing::info!(
                    elapsed_secs = started.elapsed().as_secs_f64(),
                    renders = self.renders_since_reload,
                    "captured dashboard frame"
                );
                Ok(frame)
            }
            Err(e) => {
                // The tab is in an unknown state; require a stop/start cycle
                self.liveness = Liveness::Degraded;
                tracing::warn!(error = %e, "capture failed, session degraded");
                Err(e)
            }
        }
    }

    fn reload(&mut self) -> Result<(), SessionError> {
        if self.liveness != Liveness::Running {
            return Err(SessionError::NotRunning);
        }
        tracing::info!("reloading dashboard page in place");
        self.navigate()?;
        self.renders_since_reload = 0;
        Ok(())
    }

    fn stop(&mut self) {
        self.shutdown();
    }

    fn liveness(&self) -> Liveness {
        self.liveness
    }

    fn renders_since_reload(&self) -> u32 {
        self.renders_since_reload
    }
}

impl Drop for RenderSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}
