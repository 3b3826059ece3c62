/// Air-quality slope detection for the analog gas sensor.
///
/// The sensor driver reduces raw ADC readings to one of four codes by
/// looking at the jump since the previous reading and the offset from a
/// slowly tracked baseline ("standard voltage"). The report only carries
/// the resulting [`AirQualityLevel`]; [`level_from_slope`] is that mapping
/// and is total.
use crate::report::AirQualityLevel;

/// Driver code: reading saturated, sensor forced high
pub const FORCE_SIGNAL: i32 = 0;
/// Driver code: sharp rise or very high reading
pub const HIGH_POLLUTION: i32 = 1;
/// Driver code: moderately above baseline
pub const LOW_POLLUTION: i32 = 2;
/// Driver code: at baseline
pub const FRESH_AIR: i32 = 3;
/// Driver code: not initialized / read failure
pub const SLOPE_ERROR: i32 = -1;

/// Raw reading (10-bit scale) above which the sensor is saturated.
pub const FORCE_THRESHOLD: u16 = 1000;
/// Raw reading above which pollution is high regardless of slope.
pub const HIGH_THRESHOLD: u16 = 700;
/// Rise between consecutive readings that counts as a sharp jump.
pub const JUMP_THRESHOLD: u16 = 400;
/// Offset over baseline that counts as low pollution.
pub const BASELINE_OFFSET: u16 = 150;
/// Readings averaged into each baseline update.
pub const BASELINE_SAMPLES: u32 = 200;

/// Map a driver slope code to the level carried on the wire. Unknown
/// codes (including [`SLOPE_ERROR`]) map to `None`.
pub const fn level_from_slope(code: i32) -> AirQualityLevel {
    match code {
        FORCE_SIGNAL => AirQualityLevel::Danger,
        HIGH_POLLUTION => AirQualityLevel::High,
        LOW_POLLUTION => AirQualityLevel::Low,
        FRESH_AIR => AirQualityLevel::Fresh,
        _ => AirQualityLevel::None,
    }
}

/// Stateful slope detector fed with raw ADC readings.
#[derive(Debug, Clone)]
pub struct SlopeDetector {
    last: Option<u16>,
    baseline: Option<u16>,
    sum: u32,
    count: u32,
}

impl SlopeDetector {
    pub const fn new() -> Self {
        Self {
            last: None,
            baseline: None,
            sum: 0,
            count: 0,
        }
    }

    /// Seed the baseline with an initial clean-air reading.
    pub const fn with_baseline(baseline: u16) -> Self {
        Self {
            last: None,
            baseline: Some(baseline),
            sum: 0,
            count: 0,
        }
    }

    pub fn baseline(&self) -> Option<u16> {
        self.baseline
    }

    /// Feed one reading and return the driver slope code.
    pub fn slope(&mut self, reading: u16) -> i32 {
        let previous = self.last.replace(reading);
        self.track_baseline(reading);

        let jump = previous.map_or(0, |p| reading.saturating_sub(p));
        let baseline = self.baseline.unwrap_or(reading);

        if reading > FORCE_THRESHOLD {
            FORCE_SIGNAL
        } else if jump > JUMP_THRESHOLD || reading > HIGH_THRESHOLD {
            HIGH_POLLUTION
        } else if reading.saturating_sub(baseline) > BASELINE_OFFSET {
            LOW_POLLUTION
        } else {
            FRESH_AIR
        }
    }

    /// Feed one reading and return the wire level.
    pub fn level(&mut self, reading: u16) -> AirQualityLevel {
        level_from_slope(self.slope(reading))
    }

    fn track_baseline(&mut self, reading: u16) {
        if self.baseline.is_none() {
            self.baseline = Some(reading);
        }
        self.sum += reading as u32;
        self.count += 1;
        if self.count >= BASELINE_SAMPLES {
            self.baseline = Some((self.sum / self.count) as u16);
            self.sum = 0;
            self.count = 0;
        }
    }
}

impl Default for SlopeDetector {
    fn default() -> Self {
        Self::new()
    }
}
