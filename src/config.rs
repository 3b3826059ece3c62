/// Runtime configuration, built once at startup and passed to each
/// component. Defaults match the deployed fleet.
use heapless::Vec;

use crate::report::{SensorKind, CAPACITY, MAX_SENDER_ID};

/// BLE local name every peripheral advertises and the central filters on.
pub const ADV_NAME: &str = "SEC_MONITOR";

/// Peripheral re-broadcast period.
pub const BROADCAST_PERIOD_MS: u32 = 2_400;

/// Central scan period.
pub const SCAN_PERIOD_MS: u32 = 3_000;

/// Location refresh request period.
pub const LOCATION_PERIOD_MS: u32 = 500;

/// Alert policy evaluation period.
pub const ALERT_PERIOD_MS: u32 = 60_000;

/// Microphone sample rate.
pub const SAMPLE_RATE_HZ: u32 = 16_000;

/// Slices accumulated per model window (`W`).
pub const WINDOW_SLICES: usize = 4;

/// Samples per slice: one model window of 1 s split into `W` slices.
pub const SLICE_LEN: usize = SAMPLE_RATE_HZ as usize / WINDOW_SLICES;

/// Which sensors a peripheral carries and how it identifies itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeripheralConfig {
    /// Fixed per physical unit, 0..=7
    pub sender_id: u8,
    /// Report entries, in report order. At most one per kind.
    pub sensors: Vec<SensorKind, CAPACITY>,
    pub broadcast_period_ms: u32,
}

impl PeripheralConfig {
    /// `sender_id` is masked to 3 bits; duplicate kinds are dropped.
    pub fn new(sender_id: u8, sensors: &[SensorKind]) -> Self {
        if sender_id > MAX_SENDER_ID {
            log::warn!("sender id {} does not fit 3 bits, masking", sender_id);
        }
        let mut list = Vec::new();
        for &kind in sensors {
            if list.contains(&kind) {
                log::warn!("duplicate sensor {:?} ignored", kind);
                continue;
            }
            let _ = list.push(kind);
        }
        Self {
            sender_id: sender_id & MAX_SENDER_ID,
            sensors: list,
            broadcast_period_ms: BROADCAST_PERIOD_MS,
        }
    }

    pub fn has(&self, kind: SensorKind) -> bool {
        self.sensors.contains(&kind)
    }
}

/// Whether the aggregator attaches location once per merged entry (the
/// deployed behavior) or once per decoded report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LocationMerge {
    #[default]
    PerEntry,
    PerReport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CentralConfig {
    pub scan_name: &'static str,
    pub scan_period_ms: u32,
    pub location_period_ms: u32,
    pub alert_period_ms: u32,
    pub location_merge: LocationMerge,
}

impl CentralConfig {
    pub const fn new() -> Self {
        Self {
            scan_name: ADV_NAME,
            scan_period_ms: SCAN_PERIOD_MS,
            location_period_ms: LOCATION_PERIOD_MS,
            alert_period_ms: ALERT_PERIOD_MS,
            location_merge: LocationMerge::PerEntry,
        }
    }
}

impl Default for CentralConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Audio pipeline parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineConfig {
    /// Samples per slice (`N`)
    pub slice_len: usize,
    /// Slices per model window (`W`)
    pub window_slices: usize,
    /// Index of the label that counts as an acoustic event
    pub event_label: usize,
    /// Mean confidence the event label must exceed
    pub threshold: f32,
}

impl PipelineConfig {
    pub const fn new() -> Self {
        Self {
            slice_len: SLICE_LEN,
            window_slices: WINDOW_SLICES,
            event_label: 1,
            threshold: 0.6,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::new()
    }
}
