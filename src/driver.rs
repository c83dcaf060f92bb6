//! Panel drivers: the hardware boundary and its simulation twin.
//!
//! Driver selection happens exactly once at startup, from configuration.
//! Both variants implement the same [`PanelDriver`] contract, so the
//! refresh controller above them cannot tell hardware from simulation.

use image::imageops;
use image::GrayImage;

use crate::artifacts::ArtifactSink;
use crate::config::{Config, DriverKind};
use crate::error::DisplayError;

/// Rectangular sub-area of the panel, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    /// Left edge
    pub x: u32,
    /// Top edge
    pub y: u32,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl Region {
    /// Create a region.
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// True when the region lies fully inside a panel of the given size.
    pub fn fits_within(&self, panel_width: u32, panel_height: u32) -> bool {
        self.width > 0
            && self.height > 0
            && self.x.saturating_add(self.width) <= panel_width
            && self.y.saturating_add(self.height) <= panel_height
    }
}

/// The panel hardware boundary.
///
/// `write_full` is the slow high-quality mode that clears accumulated
/// ghosting; `write_partial` is the fast low-quality mode, optionally
/// restricted to a region. Drivers do not retry: failures surface to the
/// refresh controller and fail the cycle.
pub trait PanelDriver: Send {
    /// Bring up the panel and report its native `(width, height)`.
    fn initialize(&mut self) -> Result<(u32, u32), DisplayError>;

    /// Slow high-quality full-frame write.
    fn write_full(&mut self, frame: &GrayImage) -> Result<(), DisplayError>;

    /// Fast write of the whole frame, or of `region` only.
    fn write_partial(
        &mut self,
        frame: &GrayImage,
        region: Option<Region>,
    ) -> Result<(), DisplayError>;

    /// Put the panel into its low-power state.
    fn sleep(&mut self);

    /// Release the bus and pins; idempotent.
    fn close(&mut self);

    /// Driver name for logs.
    fn name(&self) -> &'static str;
}

/// Construct the configured driver.
///
/// Requesting the IT8951 driver in a build without the `hardware` feature
/// falls back to the simulated panel with a warning, so the same
/// configuration runs on development machines.
pub fn create_driver(config: &Config) -> Box<dyn PanelDriver> {
    match config.driver {
        DriverKind::Simulated => Box::new(SimulatedDriver::new(config)),
        DriverKind::It8951 => {
            #[cfg(feature = "hardware")]
            {
                Box::new(it8951::It8951Driver::new(config))
            }
            #[cfg(not(feature = "hardware"))]
            {
                tracing::warn!(
                    "built without the `hardware` feature; using the simulated panel"
                );
                Box::new(SimulatedDriver::new(config))
            }
        }
    }
}

/// Filesystem-backed panel: every write becomes a debug artifact.
///
/// Used when no hardware is present. The refresh controller advances its
/// partial-refresh counters identically in both modes, so refresh cadence
/// is testable without a panel.
pub struct SimulatedDriver {
    width: u32,
    height: u32,
    sink: ArtifactSink,
    initialized: bool,
}

impl SimulatedDriver {
    /// Create a simulated panel with the configured dimensions.
    pub fn new(config: &Config) -> Self {
        Self {
            width: config.display_width,
            height: config.display_height,
            sink: ArtifactSink::new(&config.artifact_dir),
            initialized: false,
        }
    }
}

impl PanelDriver for SimulatedDriver {
    fn initialize(&mut self) -> Result<(u32, u32), DisplayError> {
        self.initialized = true;
        tracing::info!(
            width = self.width,
            height = self.height,
            "simulated panel ready"
        );
        Ok((self.width, self.height))
    }

    fn write_full(&mut self, frame: &GrayImage) -> Result<(), DisplayError> {
        tracing::info!("simulation: full refresh");
        self.sink
            .save(frame, "full")
            .map_err(|e| DisplayError::Artifact(e.to_string()))?;
        Ok(())
    }

    fn write_partial(
        &mut self,
        frame: &GrayImage,
        region: Option<Region>,
    ) -> Result<(), DisplayError> {
        match region {
            Some(r) => {
                tracing::info!(x = r.x, y = r.y, w = r.width, h = r.height, "simulation: region refresh");
                let cropped =
                    imageops::crop_imm(frame, r.x, r.y, r.width, r.height).to_image();
                self.sink
                    .save(&cropped, "region")
                    .map_err(|e| DisplayError::Artifact(e.to_string()))?;
            }
            None => {
                tracing::info!("simulation: partial refresh");
                self.sink
                    .save(frame, "partial")
                    .map_err(|e| DisplayError::Artifact(e.to_string()))?;
            }
        }
        Ok(())
    }

    fn sleep(&mut self) {
        tracing::info!("simulation: panel sleep");
    }

    fn close(&mut self) {
        self.initialized = false;
    }

    fn name(&self) -> &'static str {
        "simulated"
    }
}

#[cfg(feature = "hardware")]
pub use it8951::It8951Driver;

#[cfg(feature = "hardware")]
mod it8951 {
    //! IT8951 e-paper controller over SPI.
    //!
    //! Protocol: every transaction starts with a 16-bit preamble (0x6000
    //! command, 0x0000 write data, 0x1000 read data) and may only begin
    //! while the HRDY line is high. Image data is loaded into the
    //! controller's buffer with `LD_IMG_AREA`/`LD_IMG_END`, then flushed to
    //! the panel with `DPY_AREA` in the requested waveform mode.

    use std::io::Write;
    use std::thread;
    use std::time::{Duration, Instant};

    use image::GrayImage;
    use linux_embedded_hal::spidev::{SpiModeFlags, Spidev, SpidevOptions, SpidevTransfer};
    use linux_embedded_hal::sysfs_gpio::{Direction, Pin};

    use super::{PanelDriver, Region};
    use crate::config::Config;
    use crate::error::DisplayError;

    const PREAMBLE_CMD: u16 = 0x6000;
    const PREAMBLE_WRITE: u16 = 0x0000;
    const PREAMBLE_READ: u16 = 0x1000;

    const CMD_SYS_RUN: u16 = 0x0001;
    const CMD_SLEEP: u16 = 0x0003;
    const CMD_REG_WR: u16 = 0x0011;
    const CMD_LD_IMG_AREA: u16 = 0x0021;
    const CMD_LD_IMG_END: u16 = 0x0022;
    const CMD_GET_DEV_INFO: u16 = 0x0302;
    const CMD_DPY_AREA: u16 = 0x0034;
    const CMD_VCOM: u16 = 0x0039;

    /// Image buffer base address register (LISAR).
    const REG_LISAR: u16 = 0x0208;

    /// High-quality 16-level waveform.
    const MODE_GC16: u16 = 2;
    /// Fast two-level waveform.
    const MODE_DU: u16 = 1;

    /// 8 bits per pixel, little-endian, no rotation.
    const LOAD_ARG_8BPP: u16 = 3 << 4;

    const SPI_DEVICE: &str = "/dev/spidev0.0";
    const SPI_HZ: u32 = 24_000_000;
    const PIN_RST: u64 = 17;
    const PIN_HRDY: u64 = 24;

    /// Words per data burst; keeps each SPI transfer under the kernel's
    /// default spidev buffer size.
    const BURST_WORDS: usize = 2048;

    const READY_TIMEOUT: Duration = Duration::from_secs(5);
    const DISPLAY_TIMEOUT: Duration = Duration::from_secs(30);

    /// Direct IT8951 controller driver.
    pub struct It8951Driver {
        spi: Option<Spidev>,
        rst: Pin,
        hrdy: Pin,
        vcom: f32,
        img_buf_addr: u32,
        width: u32,
        height: u32,
    }

    impl It8951Driver {
        /// Create an uninitialized driver; the bus opens in `initialize`.
        pub fn new(config: &Config) -> Self {
            Self {
                spi: None,
                rst: Pin::new(PIN_RST),
                hrdy: Pin::new(PIN_HRDY),
                vcom: config.vcom,
                img_buf_addr: 0,
                width: config.display_width,
                height: config.display_height,
            }
        }

        fn wait_ready(&self, timeout: Duration) -> Result<(), DisplayError> {
            let deadline = Instant::now() + timeout;
            loop {
                let level = self
                    .hrdy
                    .get_value()
                    .map_err(|e| DisplayError::Gpio(e.to_string()))?;
                if level == 1 {
                    return Ok(());
                }
                if Instant::now() >= deadline {
                    return Err(DisplayError::BusyTimeout);
                }
                thread::sleep(Duration::from_micros(100));
            }
        }

        fn spi_mut(&mut self) -> Result<&mut Spidev, DisplayError> {
            self.spi.as_mut().ok_or(DisplayError::HardwareNotReady)
        }

        fn transfer_out(&mut self, preamble: u16, words: &[u16]) -> Result<(), DisplayError> {
            self.wait_ready(READY_TIMEOUT)?;
            let mut buf = Vec::with_capacity(2 + words.len() * 2);
            buf.extend_from_slice(&preamble.to_be_bytes());
            for word in words {
                buf.extend_from_slice(&word.to_be_bytes());
            }
            self.spi_mut()?
                .write_all(&buf)
                .map_err(|e| DisplayError::Spi(e.to_string()))
        }

        fn command(&mut self, cmd: u16) -> Result<(), DisplayError> {
            self.transfer_out(PREAMBLE_CMD, &[cmd])
        }

        fn write_data(&mut self, words: &[u16]) -> Result<(), DisplayError> {
            for burst in words.chunks(BURST_WORDS) {
                self.transfer_out(PREAMBLE_WRITE, burst)?;
            }
            Ok(())
        }

        fn read_data(&mut self, count: usize) -> Result<Vec<u16>, DisplayError> {
            self.wait_ready(READY_TIMEOUT)?;
            // Preamble, two dummy bytes, then the payload
            let len = 4 + count * 2;
            let mut tx = vec![0u8; len];
            tx[..2].copy_from_slice(&PREAMBLE_READ.to_be_bytes());
            let mut rx = vec![0u8; len];
            {
                let spi = self.spi_mut()?;
                let mut xfer = SpidevTransfer::read_write(&tx, &mut rx);
                spi.transfer(&mut xfer)
                    .map_err(|e| DisplayError::Spi(e.to_string()))?;
            }
            Ok(rx[4..]
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect())
        }

        fn write_reg(&mut self, reg: u16, value: u16) -> Result<(), DisplayError> {
            self.command(CMD_REG_WR)?;
            self.write_data(&[reg, value])
        }

        fn set_vcom(&mut self) -> Result<(), DisplayError> {
            let millivolts = (self.vcom.abs() * 1000.0) as u16;
            self.command(CMD_VCOM)?;
            self.write_data(&[1, millivolts])
        }

        /// Device info block: width, height, image buffer address and
        /// firmware/LUT version strings (20 words total).
        fn read_dev_info(&mut self) -> Result<(u32, u32, u32), DisplayError> {
            self.command(CMD_GET_DEV_INFO)?;
            let info = self.read_data(20)?;
            let width = u32::from(info[0]);
            let height = u32::from(info[1]);
            let addr = u32::from(info[2]) | (u32::from(info[3]) << 16);
            Ok((width, height, addr))
        }

        fn reset(&mut self) -> Result<(), DisplayError> {
            self.rst
                .set_value(0)
                .map_err(|e| DisplayError::Gpio(e.to_string()))?;
            thread::sleep(Duration::from_millis(100));
            self.rst
                .set_value(1)
                .map_err(|e| DisplayError::Gpio(e.to_string()))?;
            thread::sleep(Duration::from_millis(100));
            Ok(())
        }

        /// Load 8bpp pixels for `region` into the controller buffer and
        /// flush that area to the panel with the given waveform mode.
        fn load_and_display(
            &mut self,
            frame: &GrayImage,
            region: Region,
            mode: u16,
        ) -> Result<(), DisplayError> {
            let addr_low = (self.img_buf_addr & 0xFFFF) as u16;
            let addr_high = (self.img_buf_addr >> 16) as u16;
            self.write_reg(REG_LISAR + 2, addr_high)?;
            self.write_reg(REG_LISAR, addr_low)?;

            self.command(CMD_LD_IMG_AREA)?;
            self.write_data(&[
                LOAD_ARG_8BPP,
                region.x as u16,
                region.y as u16,
                region.width as u16,
                region.height as u16,
            ])?;

            // Two 8bpp pixels per 16-bit word, row-major within the region
            let mut words = Vec::with_capacity((region.width * region.height) as usize / 2 + 1);
            for y in region.y..region.y + region.height {
                let mut x = region.x;
                while x < region.x + region.width {
                    let first = frame.get_pixel(x, y).0[0];
                    let second = if x + 1 < region.x + region.width {
                        frame.get_pixel(x + 1, y).0[0]
                    } else {
                        0xFF
                    };
                    words.push(u16::from(first) | (u16::from(second) << 8));
                    x += 2;
                }
            }
            self.write_data(&words)?;
            self.command(CMD_LD_IMG_END)?;

            self.command(CMD_DPY_AREA)?;
            self.write_data(&[
                region.x as u16,
                region.y as u16,
                region.width as u16,
                region.height as u16,
                mode,
            ])?;
            self.wait_ready(DISPLAY_TIMEOUT)
        }

        /// Even-align a region; the controller rejects odd 8bpp offsets.
        fn align(region: Region, width: u32, height: u32) -> Region {
            let x = region.x & !1;
            let y = region.y;
            let w = ((region.x + region.width + 1) & !1).min(width) - x;
            let h = region.height.min(height.saturating_sub(y));
            Region::new(x, y, w, h)
        }
    }

    impl PanelDriver for It8951Driver {
        fn initialize(&mut self) -> Result<(u32, u32), DisplayError> {
            let mut spi = Spidev::open(SPI_DEVICE).map_err(|e| DisplayError::Spi(e.to_string()))?;
            let options = SpidevOptions::new()
                .bits_per_word(8)
                .max_speed_hz(SPI_HZ)
                .mode(SpiModeFlags::SPI_MODE_0)
                .build();
            spi.configure(&options)
                .map_err(|e| DisplayError::Spi(e.to_string()))?;
            self.spi = Some(spi);

            for (pin, direction) in [(&self.rst, Direction::Out), (&self.hrdy, Direction::In)] {
                pin.export().map_err(|e| DisplayError::Gpio(e.to_string()))?;
                pin.set_direction(direction)
                    .map_err(|e| DisplayError::Gpio(e.to_string()))?;
            }

            self.reset()?;
            self.command(CMD_SYS_RUN)?;

            let (width, height, addr) = self.read_dev_info()?;
            self.img_buf_addr = addr;
            self.width = width;
            self.height = height;
            self.set_vcom()?;

            tracing::info!(width, height, vcom = self.vcom, "IT8951 panel ready");
            Ok((width, height))
        }

        fn write_full(&mut self, frame: &GrayImage) -> Result<(), DisplayError> {
            let region = Region::new(0, 0, self.width, self.height);
            self.load_and_display(frame, region, MODE_GC16)
        }

        fn write_partial(
            &mut self,
            frame: &GrayImage,
            region: Option<Region>,
        ) -> Result<(), DisplayError> {
            let target = match region {
                Some(r) => Self::align(r, self.width, self.height),
                None => Region::new(0, 0, self.width, self.height),
            };
            self.load_and_display(frame, target, MODE_DU)
        }

        fn sleep(&mut self) {
            if self.spi.is_some() {
                if let Err(e) = self.command(CMD_SLEEP) {
                    tracing::warn!(error = %e, "failed to put panel to sleep");
                }
            }
        }

        fn close(&mut self) {
            self.sleep();
            self.spi = None;
            for pin in [&self.rst, &self.hrdy] {
                if let Err(e) = pin.unexport() {
                    tracing::warn!(error = %e, "failed to unexport pin");
                }
            }
        }

        fn name(&self) -> &'static str {
            "it8951"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn sim_config(name: &str) -> Config {
        let dir = std::env::temp_dir()
            .join(format!("paperdash-test-{}-{}", std::process::id(), name));
        let _ = std::fs::remove_dir_all(&dir);
        Config::default()
            .with_driver(DriverKind::Simulated)
            .with_panel_size(32, 24)
            .with_artifact_dir(dir)
    }

    #[test]
    fn test_region_bounds() {
        assert!(Region::new(0, 0, 10, 10).fits_within(10, 10));
        assert!(Region::new(5, 5, 5, 5).fits_within(10, 10));
        assert!(!Region::new(5, 5, 6, 5).fits_within(10, 10));
        assert!(!Region::new(0, 0, 0, 5).fits_within(10, 10));
    }

    #[test]
    fn test_simulated_driver_reports_configured_size() {
        let config = sim_config("dims");
        let mut driver = SimulatedDriver::new(&config);
        assert_eq!(driver.initialize().unwrap(), (32, 24));
        let _ = std::fs::remove_dir_all(&config.artifact_dir);
    }

    #[test]
    fn test_simulated_writes_persist_artifacts() {
        let config = sim_config("writes");
        let mut driver = SimulatedDriver::new(&config);
        driver.initialize().unwrap();

        let frame = GrayImage::from_pixel(32, 24, Luma([0]));
        driver.write_full(&frame).unwrap();
        driver
            .write_partial(&frame, Some(Region::new(4, 4, 8, 8)))
            .unwrap();

        assert!(config.artifact_dir.join("latest.png").exists());
        let count = std::fs::read_dir(&config.artifact_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.file_name()
                    .to_str()
                    .is_some_and(|n| n.starts_with("frame_"))
            })
            .count();
        assert_eq!(count, 2);

        let _ = std::fs::remove_dir_all(&config.artifact_dir);
    }

    #[test]
    fn test_factory_honors_simulated_selection() {
        let config = sim_config("factory");
        let driver = create_driver(&config);
        assert_eq!(driver.name(), "simulated");
        let _ = std::fs::remove_dir_all(&config.artifact_dir);
    }
}
