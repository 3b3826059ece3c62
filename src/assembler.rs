/// Peripheral-side report assembly and re-broadcast.
///
/// On each tick the assembler reads every configured sensor, builds one
/// [`SensorReport`] and swaps it in as the advertised payload: stop the
/// old advertisement, start the new one. The gap in between is accepted;
/// the protocol is lossy by design.
use crate::air::level_from_slope;
use crate::config::PeripheralConfig;
use crate::report::{AirQualityLevel, ReportBytes, ReportEntry, SensorKind, SensorReport};

/// One sensor reading as returned by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reading {
    /// Digital sensor or classifier output
    Flag(bool),
    /// Raw air-quality driver slope code, mapped by the assembler
    Slope(i32),
    /// Pre-classified air-quality level
    Level(AirQualityLevel),
}

/// Synchronous "read current value" for each sensor a peripheral carries.
pub trait SensorReader {
    fn read(&mut self, kind: SensorKind) -> Reading;
}

/// Advertising half of the radio transport.
pub trait Broadcaster {
    type Error: core::fmt::Debug;

    fn stop_broadcast(&mut self) -> Result<(), Self::Error>;
    fn broadcast(&mut self, payload: &[u8]) -> Result<(), Self::Error>;
}

/// Turn a reading into the entry value for `kind`.
///
/// Air quality accepts any reading form; a flag on an air-quality sensor
/// is meaningless and maps to `None`. Boolean kinds take flags as 0/1 and
/// treat any level other than `None` as set.
pub fn entry_for(kind: SensorKind, reading: Reading) -> ReportEntry {
    match kind {
        SensorKind::AirQuality => {
            let level = match reading {
                Reading::Slope(code) => level_from_slope(code),
                Reading::Level(level) => level,
                Reading::Flag(_) => AirQualityLevel::None,
            };
            ReportEntry::air_quality(level)
        }
        _ => {
            let on = match reading {
                Reading::Flag(on) => on,
                Reading::Level(level) => level != AirQualityLevel::None,
                Reading::Slope(code) => code != 0,
            };
            ReportEntry::flag(kind, on)
        }
    }
}

/// Builds and re-broadcasts reports for one physical peripheral.
pub struct ReportAssembler {
    config: PeripheralConfig,
    last: Option<ReportBytes>,
    broadcasts: u32,
}

impl ReportAssembler {
    pub fn new(config: PeripheralConfig) -> Self {
        log::info!(
            "Peripheral {} reporting {:?} every {} ms",
            config.sender_id,
            config.sensors.as_slice(),
            config.broadcast_period_ms
        );
        Self {
            config,
            last: None,
            broadcasts: 0,
        }
    }

    pub fn config(&self) -> &PeripheralConfig {
        &self.config
    }

    /// Last successfully broadcast payload.
    pub fn last_payload(&self) -> Option<&ReportBytes> {
        self.last.as_ref()
    }

    /// Successful broadcasts since start.
    pub fn broadcast_count(&self) -> u32 {
        self.broadcasts
    }

    /// Read all configured sensors into a fresh report.
    pub fn assemble(&self, sensors: &mut impl SensorReader) -> SensorReport {
        let mut report = SensorReport::new(self.config.sender_id);
        for &kind in &self.config.sensors {
            let entry = entry_for(kind, sensors.read(kind));
            // config holds at most one entry per kind, so this cannot overflow
            let _ = report.push(entry);
        }
        report
    }

    /// One broadcast period: assemble, encode and replace the advertised
    /// payload. Transport errors are logged and the tick ends; the next
    /// tick tries again.
    pub fn tick<B: Broadcaster>(
        &mut self,
        sensors: &mut impl SensorReader,
        radio: &mut B,
    ) -> SensorReport {
        let report = self.assemble(sensors);
        let payload = report.encode();

        if let Err(e) = radio.stop_broadcast() {
            log::warn!("Stopping advertisement failed: {:?}", e);
        }
        match radio.broadcast(&payload) {
            Ok(()) => {
                self.last = Some(payload);
                self.broadcasts = self.broadcasts.wrapping_add(1);
                log::debug!("Broadcasting report {:02X?}", payload);
            }
            Err(e) => log::warn!("Advertising report failed: {:?}", e),
        }

        report
    }
}
