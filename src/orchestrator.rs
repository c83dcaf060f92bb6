//! The render-process-display cycle and the continuous loop.
//!
//! One orchestrator owns the render session and the display controller for
//! the whole process lifetime. Cycles never overlap: a commit completes
//! (or fails) before the next render begins, and the stop signal is
//! honored between cycles and during sleeps, never mid-write.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::config::Config;
use crate::display::{DisplayController, RefreshKind};
use crate::error::{Error, SessionError};
use crate::frame::Frame;
use crate::processor;
use crate::schedule::{self, Schedule};
use crate::session::RenderSource;
use crate::telemetry::TelemetrySink;

/// Drives end-to-end update cycles.
///
/// Generic over the render-source seam so recovery behavior is testable
/// without a browser; `factory` builds a fresh session for cold starts.
pub struct Orchestrator<S, F>
where
    S: RenderSource,
    F: FnMut() -> Result<S, SessionError>,
{
    factory: F,
    session: Option<S>,
    display: DisplayController,
    schedule: Schedule,
    telemetry: Box<dyn TelemetrySink>,
    reload_threshold: u32,
    start_attempts: u32,
    retry_delay: Duration,
    stop: Arc<AtomicBool>,
}

impl<S, F> Orchestrator<S, F>
where
    S: RenderSource,
    F: FnMut() -> Result<S, SessionError>,
{
    /// Create an orchestrator over an initialized display controller.
    pub fn new(
        config: &Config,
        display: DisplayController,
        telemetry: Box<dyn TelemetrySink>,
        factory: F,
    ) -> Self {
        Self {
            factory,
            session: None,
            display,
            schedule: Schedule::new(config.update_interval, config.dashboard_mode),
            telemetry,
            reload_threshold: config.reload_threshold,
            start_attempts: config.start_attempts,
            retry_delay: config.retry_delay,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that ends continuous mode; share it with a signal handler.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Start a session, retrying a bounded number of times with a fixed
    /// delay between attempts.
    fn start_with_retry(&mut self) -> Result<S, SessionError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            tracing::info!(
                attempt,
                max_attempts = self.start_attempts,
                "starting render session"
            );
            match (self.factory)() {
                Ok(session) => return Ok(session),
                Err(e) => {
                    tracing::warn!(error = %e, attempt, "session start failed");
                    if attempt >= self.start_attempts {
                        tracing::error!(
                            attempts = attempt,
                            "session start failed, giving up for this cycle"
                        );
                        return Err(e);
                    }
                }
            }
            if !self.sleep_interruptible(self.retry_delay) {
                return Err(SessionError::Launch("interrupted by stop signal".to_string()));
            }
        }
    }

    /// Produce a frame, repairing the session if necessary.
    ///
    /// A failed capture on a warm session triggers exactly one stop/start
    /// cycle; a second failure abandons the cycle. The label distinguishes
    /// warm-session captures from cold ones for telemetry.
    fn capture_frame(&mut self) -> Result<(Frame, &'static str), Error> {
        if let Some(session) = self.session.as_mut() {
            if session.renders_since_reload() >= self.reload_threshold {
                if let Err(e) = session.reload() {
                    tracing::warn!(error = %e, "periodic page reload failed");
                }
            }

            let started = Instant::now();
            match session.capture() {
                Ok(frame) => {
                    self.telemetry.observe_duration(
                        "render_seconds",
                        started.elapsed().as_secs_f64(),
                        &[("type", "session")],
                    );
                    return Ok((frame, "session"));
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        liveness = ?session.liveness(),
                        "capture failed, recycling session"
                    );
                    session.stop();
                    self.session = None;
                }
            }
        }

        // Cold path: first cycle, or the warm capture just failed
        let mut session = self.start_with_retry()?;
        let started = Instant::now();
        let result = session.capture();
        let elapsed = started.elapsed().as_secs_f64();
        self.session = Some(session);

        match result {
            Ok(frame) => {
                self.telemetry
                    .observe_duration("render_seconds", elapsed, &[("type", "cold")]);
                Ok((frame, "cold"))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn cycle_inner(&mut self, force_full: bool) -> Result<RefreshKind, Error> {
        let (frame, render_type) = self.capture_frame()?;
        tracing::debug!(render_type, width = frame.width(), height = frame.height(), "frame ready");

        let started = Instant::now();
        let kind = self.display.commit(&frame, force_full, None)?;
        self.telemetry.observe_duration(
            "display_seconds",
            started.elapsed().as_secs_f64(),
            &[("refresh", kind.as_str())],
        );
        Ok(kind)
    }

    /// Run one full update cycle, recording the outcome.
    pub fn run_cycle(&mut self, force_full: bool) -> Result<(), Error> {
        let started = Instant::now();
        self.telemetry.increment("update_attempts", &[]);

        let result = self.cycle_inner(force_full);
        let elapsed = started.elapsed().as_secs_f64();

        match &result {
            Ok(kind) => {
                self.telemetry
                    .observe_duration("cycle_seconds", elapsed, &[("status", "ok")]);
                self.telemetry.increment("update_success", &[]);
                tracing::info!(
                    elapsed_secs = elapsed,
                    refresh = kind.as_str(),
                    "display update completed"
                );
            }
            Err(e) => {
                let status = match e {
                    Error::Session(_) => "session",
                    Error::Display(_) => "display",
                    Error::Config(_) => "config",
                };
                self.telemetry
                    .observe_duration("cycle_seconds", elapsed, &[("status", "failed")]);
                self.telemetry.increment("update_failure", &[("status", status)]);
                tracing::error!(error = %e, "display update failed");
            }
        }
        self.telemetry.flush();
        result.map(|_| ())
    }

    /// Commit the synthesized test pattern with a forced full refresh.
    pub fn run_test_pattern(&mut self) -> Result<(), Error> {
        tracing::info!("running display test");
        let frame = processor::test_pattern(self.display.width(), self.display.height());
        self.display.commit(&frame, true, None)?;
        Ok(())
    }

    /// Update on the configured cadence until the stop flag is raised.
    ///
    /// A cycle failure never ends the loop; the next cycle runs at its
    /// originally scheduled instant. Overruns are logged and the schedule
    /// chain catches up slot by slot without skipping.
    pub fn run_continuous(&mut self) {
        tracing::info!("starting continuous mode");

        if let Err(e) = self.run_cycle(true) {
            tracing::error!(error = %e, "initial update failed");
        }

        loop {
            if self.stop.load(Ordering::SeqCst) {
                break;
            }

            let now = Utc::now();
            let intended = self.schedule.advance(now);
            if intended > now {
                let wait = (intended - now).to_std().unwrap_or_default();
                tracing::debug!(seconds = wait.as_secs_f64(), "sleeping until next update");
                if !self.sleep_interruptible(wait) {
                    break;
                }
            } else {
                tracing::warn!(
                    overrun_secs = schedule::measure_offset(intended, now),
                    "previous cycle overran its slot, updating immediately"
                );
            }

            if self.stop.load(Ordering::SeqCst) {
                break;
            }
            let _ = self.run_cycle(false);

            let offset = schedule::measure_offset(intended, Utc::now());
            self.telemetry.set_gauge("schedule_offset_seconds", offset);
        }

        tracing::info!("continuous mode stopped");
    }

    /// Release the session and the panel.
    pub fn shutdown(&mut self) {
        tracing::info!(stats = ?self.display.refresh_stats(), "shutting down");
        if let Some(session) = self.session.as_mut() {
            session.stop();
        }
        self.session = None;

        if let Err(e) = self.display.clear() {
            tracing::warn!(error = %e, "failed to clear display during shutdown");
        }
        self.display.sleep();
        self.display.close();
    }

    /// Sleep in small slices so the stop signal interrupts promptly.
    /// Returns false when the stop flag was raised.
    fn sleep_interruptible(&self, total: Duration) -> bool {
        let deadline = Instant::now() + total;
        loop {
            if self.stop.load(Ordering::SeqCst) {
                return false;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return true;
            }
            thread::sleep(remaining.min(Duration::from_millis(250)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DriverKind;
    use crate::driver::{PanelDriver, Region};
    use crate::error::DisplayError;
    use crate::session::Liveness;
    use image::{GrayImage, Luma};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Render source with a scripted sequence of capture outcomes.
    struct FakeSession {
        script: VecDeque<Result<(), ()>>,
        liveness: Liveness,
        renders: u32,
        stops: Arc<Mutex<u32>>,
    }

    impl FakeSession {
        fn new(script: Vec<Result<(), ()>>, stops: Arc<Mutex<u32>>) -> Self {
            Self {
                script: script.into(),
                liveness: Liveness::Running,
                renders: 0,
                stops,
            }
        }

        fn frame() -> Frame {
            Frame::captured(GrayImage::from_pixel(32, 24, Luma([90])))
        }
    }

    impl RenderSource for FakeSession {
        fn capture(&mut self) -> Result<Frame, SessionError> {
            match self.script.pop_front().unwrap_or(Ok(())) {
                Ok(()) => {
                    self.renders += 1;
                    Ok(Self::frame())
                }
                Err(()) => {
                    self.liveness = Liveness::Degraded;
                    Err(SessionError::Capture("scripted failure".to_string()))
                }
            }
        }

        fn reload(&mut self) -> Result<(), SessionError> {
            self.renders = 0;
            Ok(())
        }

        fn stop(&mut self) {
            self.liveness = Liveness::Stopped;
            *self.stops.lock().unwrap() += 1;
        }

        fn liveness(&self) -> Liveness {
            self.liveness
        }

        fn renders_since_reload(&self) -> u32 {
            self.renders
        }
    }

    /// Panel driver that only counts writes.
    struct CountingDriver {
        fulls: Arc<Mutex<u32>>,
        partials: Arc<Mutex<u32>>,
    }

    impl PanelDriver for CountingDriver {
        fn initialize(&mut self) -> Result<(u32, u32), DisplayError> {
            Ok((32, 24))
        }

        fn write_full(&mut self, _frame: &GrayImage) -> Result<(), DisplayError> {
            *self.fulls.lock().unwrap() += 1;
            Ok(())
        }

        fn write_partial(
            &mut self,
            _frame: &GrayImage,
            _region: Option<Region>,
        ) -> Result<(), DisplayError> {
            *self.partials.lock().unwrap() += 1;
            Ok(())
        }

        fn sleep(&mut self) {}
        fn close(&mut self) {}

        fn name(&self) -> &'static str {
            "counting"
        }
    }

    /// Telemetry sink shared with the test for inspection.
    #[derive(Clone, Default)]
    struct SharedSink {
        counters: Arc<Mutex<std::collections::HashMap<String, u64>>>,
    }

    impl TelemetrySink for SharedSink {
        fn observe_duration(&mut self, _metric: &str, _seconds: f64, _labels: &[(&str, &str)]) {}

        fn increment(&mut self, counter: &str, labels: &[(&str, &str)]) {
            let mut key = counter.to_string();
            for (_, value) in labels {
                key.push('.');
                key.push_str(value);
            }
            *self.counters.lock().unwrap().entry(key).or_insert(0) += 1;
        }

        fn set_gauge(&mut self, _gauge: &str, _value: f64) {}
    }

    fn test_config() -> Config {
        Config::default()
            .with_driver(DriverKind::Simulated)
            .with_panel_size(32, 24)
            .with_retry_delay(Duration::ZERO)
    }

    fn ready_display(config: &Config) -> DisplayController {
        let driver = CountingDriver {
            fulls: Arc::new(Mutex::new(0)),
            partials: Arc::new(Mutex::new(0)),
        };
        let mut display = DisplayController::new(Box::new(driver), config);
        display.initialize().unwrap();
        display
    }

    #[test]
    fn test_start_retried_exactly_three_times_on_persistent_failure() {
        let config = test_config();
        let display = ready_display(&config);
        let sink = SharedSink::default();

        let attempts = Arc::new(Mutex::new(0u32));
        let attempts_in_factory = attempts.clone();
        let factory = move || -> Result<FakeSession, SessionError> {
            *attempts_in_factory.lock().unwrap() += 1;
            Err(SessionError::Launch("no browser".to_string()))
        };

        let mut orchestrator =
            Orchestrator::new(&config, display, Box::new(sink.clone()), factory);

        let err = orchestrator.run_cycle(false).unwrap_err();
        assert!(matches!(err, Error::Session(_)));
        // A fourth attempt must never occur
        assert_eq!(*attempts.lock().unwrap(), 3);
        assert_eq!(
            sink.counters.lock().unwrap()["update_failure.session"],
            1
        );
    }

    #[test]
    fn test_successful_cycle_records_outcome() {
        let config = test_config();
        let display = ready_display(&config);
        let sink = SharedSink::default();
        let stops = Arc::new(Mutex::new(0));

        let stops_in_factory = stops.clone();
        let factory = move || -> Result<FakeSession, SessionError> {
            Ok(FakeSession::new(vec![], stops_in_factory.clone()))
        };

        let mut orchestrator =
            Orchestrator::new(&config, display, Box::new(sink.clone()), factory);

        orchestrator.run_cycle(true).unwrap();

        let counters = sink.counters.lock().unwrap();
        assert_eq!(counters["update_attempts"], 1);
        assert_eq!(counters["update_success"], 1);
    }

    #[test]
    fn test_failed_capture_triggers_one_recycle() {
        let config = test_config();
        let display = ready_display(&config);
        let sink = SharedSink::default();
        let stops = Arc::new(Mutex::new(0));

        // First session: one good capture, then a failure.
        // Second session: all captures good.
        let stops_in_factory = stops.clone();
        let scripts = Arc::new(Mutex::new(VecDeque::from([
            vec![Ok(()), Err(())],
            vec![],
        ])));
        let factory = move || -> Result<FakeSession, SessionError> {
            match scripts.lock().unwrap().pop_front() {
                Some(script) => Ok(FakeSession::new(script, stops_in_factory.clone())),
                None => Err(SessionError::Launch("factory exhausted".to_string())),
            }
        };

        let mut orchestrator =
            Orchestrator::new(&config, display, Box::new(sink.clone()), factory);

        orchestrator.run_cycle(false).unwrap(); // cold start, capture ok
        orchestrator.run_cycle(false).unwrap(); // warm capture fails -> recycle -> ok

        // The degraded session was stopped exactly once
        assert_eq!(*stops.lock().unwrap(), 1);
        let counters = sink.counters.lock().unwrap();
        assert_eq!(counters["update_success"], 2);
    }

    #[test]
    fn test_failed_cycle_does_not_poison_the_next() {
        let config = test_config();
        let display = ready_display(&config);
        let sink = SharedSink::default();
        let stops = Arc::new(Mutex::new(0));

        // Session 1 fails its only capture; session 2 also fails (cycle 1
        // is abandoned); session 3 works (cycle 2 succeeds).
        let stops_in_factory = stops.clone();
        let scripts = Arc::new(Mutex::new(VecDeque::from([
            vec![Err(())],
            vec![Err(())],
            vec![],
        ])));
        let factory = move || -> Result<FakeSession, SessionError> {
            match scripts.lock().unwrap().pop_front() {
                Some(script) => Ok(FakeSession::new(script, stops_in_factory.clone())),
                None => Err(SessionError::Launch("factory exhausted".to_string())),
            }
        };

        let mut orchestrator =
            Orchestrator::new(&config, display, Box::new(sink.clone()), factory);

        assert!(orchestrator.run_cycle(false).is_err());
        orchestrator.run_cycle(false).unwrap();

        let counters = sink.counters.lock().unwrap();
        assert_eq!(counters["update_attempts"], 2);
        assert_eq!(counters["update_failure.session"], 1);
        assert_eq!(counters["update_success"], 1);
    }

    #[test]
    fn test_display_failure_marks_cycle_failed_and_preserves_cadence() {
        struct FailingDriver;
        impl PanelDriver for FailingDriver {
            fn initialize(&mut self) -> Result<(u32, u32), DisplayError> {
                Err(DisplayError::HardwareNotReady)
            }
            fn write_full(&mut self, _: &GrayImage) -> Result<(), DisplayError> {
                Err(DisplayError::HardwareNotReady)
            }
            fn write_partial(
                &mut self,
                _: &GrayImage,
                _: Option<Region>,
            ) -> Result<(), DisplayError> {
                Err(DisplayError::HardwareNotReady)
            }
            fn sleep(&mut self) {}
            fn close(&mut self) {}
            fn name(&self) -> &'static str {
                "failing"
            }
        }

        let config = test_config();
        let mut display = DisplayController::new(Box::new(FailingDriver), &config);
        assert!(display.initialize().is_err());
        let sink = SharedSink::default();
        let stops = Arc::new(Mutex::new(0));

        let stops_in_factory = stops.clone();
        let factory = move || -> Result<FakeSession, SessionError> {
            Ok(FakeSession::new(vec![], stops_in_factory.clone()))
        };

        let mut orchestrator =
            Orchestrator::new(&config, display, Box::new(sink.clone()), factory);

        let err = orchestrator.run_cycle(false).unwrap_err();
        assert!(matches!(
            err,
            Error::Display(DisplayError::HardwareNotReady)
        ));
        assert_eq!(orchestrator.display.partial_refresh_count(), 0);
        assert_eq!(
            sink.counters.lock().unwrap()["update_failure.display"],
            1
        );
    }

    #[test]
    fn test_reload_runs_at_threshold() {
        let config = Config {
            reload_threshold: 2,
            ..test_config()
        };
        let display = ready_display(&config);
        let stops = Arc::new(Mutex::new(0));

        let stops_in_factory = stops.clone();
        let factory = move || -> Result<FakeSession, SessionError> {
            Ok(FakeSession::new(vec![], stops_in_factory.clone()))
        };

        let mut orchestrator =
            Orchestrator::new(&config, display, Box::new(SharedSink::default()), factory);

        orchestrator.run_cycle(false).unwrap(); // cold, renders=1
        orchestrator.run_cycle(false).unwrap(); // renders=2
        orchestrator.run_cycle(false).unwrap(); // threshold hit, reload resets

        let session = orchestrator.session.as_ref().unwrap();
        assert_eq!(session.renders_since_reload(), 1);
    }

    #[test]
    fn test_test_pattern_commits_full() {
        let config = test_config();
        let fulls = Arc::new(Mutex::new(0));
        let driver = CountingDriver {
            fulls: fulls.clone(),
            partials: Arc::new(Mutex::new(0)),
        };
        let mut display = DisplayController::new(Box::new(driver), &config);
        display.initialize().unwrap();
        let stops = Arc::new(Mutex::new(0));

        let stops_in_factory = stops.clone();
        let factory = move || -> Result<FakeSession, SessionError> {
            Ok(FakeSession::new(vec![], stops_in_factory.clone()))
        };

        let mut orchestrator =
            Orchestrator::new(&config, display, Box::new(SharedSink::default()), factory);

        orchestrator.run_test_pattern().unwrap();
        assert_eq!(*fulls.lock().unwrap(), 1);
    }
}
