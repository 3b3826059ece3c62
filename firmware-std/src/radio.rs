//! NimBLE bindings for the report transport.
//!
//! The peripheral advertises its report as manufacturer-specific data next
//! to the complete local name; the central runs timed active scans and
//! keeps the custom data of every advertiser whose name matches.

use esp32_nimble::{BLEAddress, BLEAdvertisementData, BLEDevice, BLEError, BLEScan};
use esp_idf_svc::hal::task::block_on;
use secmon::adv::{AdvParser, AdvPayload};
use secmon::aggregator::{ScanFilter, ScanResults, Scanner, MAX_SCAN_RESULTS};
use secmon::assembler::Broadcaster;

// ── Advertising (peripheral) ─────────────────────────────────────────

#[cfg_attr(feature = "central", allow(dead_code))]
pub struct NimbleBroadcaster {
    device: &'static BLEDevice,
    name: &'static str,
}

#[cfg_attr(feature = "central", allow(dead_code))]
impl NimbleBroadcaster {
    pub fn new(device: &'static BLEDevice, name: &'static str) -> Self {
        Self { device, name }
    }
}

impl Broadcaster for NimbleBroadcaster {
    type Error = BLEError;

    fn stop_broadcast(&mut self) -> Result<(), BLEError> {
        self.device.get_advertising().lock().stop()
    }

    fn broadcast(&mut self, payload: &[u8]) -> Result<(), BLEError> {
        let mut adv_data = BLEAdvertisementData::new();
        adv_data.name(self.name).manufacturer_data(payload);

        let mut advertising = self.device.get_advertising().lock();
        advertising.set_data(&mut adv_data)?;
        advertising.start()
    }
}

// ── Scanning (central) ───────────────────────────────────────────────

#[cfg_attr(not(feature = "central"), allow(dead_code))]
pub struct NimbleScanner {
    device: &'static BLEDevice,
    scan: BLEScan,
    window_ms: i32,
}

#[cfg_attr(not(feature = "central"), allow(dead_code))]
impl NimbleScanner {
    /// `window_ms` is how long each `scan` call listens.
    pub fn new(device: &'static BLEDevice, window_ms: i32) -> Self {
        let mut scan = BLEScan::new();
        scan.active_scan(true).interval(100).window(99);
        Self {
            device,
            scan,
            window_ms,
        }
    }
}

impl Scanner for NimbleScanner {
    type Error = BLEError;

    fn scan(&mut self, filter: &ScanFilter<'_>, results: &mut ScanResults) -> Result<(), BLEError> {
        // One payload per advertiser per scan; repeats within the window
        // are the same report.
        let mut seen: heapless::Vec<BLEAddress, MAX_SCAN_RESULTS> = heapless::Vec::new();
        let name = filter.name;

        block_on(self.scan.start(self.device, self.window_ms, |device, data| {
            let addr = device.addr();
            if seen.contains(&addr) {
                return None::<()>;
            }
            if let Some(custom) = AdvParser::custom_data_for(data.payload(), name) {
                match AdvPayload::from_slice(custom) {
                    Ok(payload) => {
                        if results.push(payload).is_ok() {
                            let _ = seen.push(addr);
                        } else {
                            log::warn!("Scan result buffer full, ignoring {}", addr);
                        }
                    }
                    Err(_) => log::warn!("Oversized custom data from {}", addr),
                }
            }
            None::<()> // Continue scanning
        }))?;
        Ok(())
    }
}
