//! Central role: scan for peripheral reports, merge them into the state
//! store, attach the GNSS fix and raise alerts.
//!
//! Threads:
//! - `gnss`: drains NMEA from the receiver and answers fix requests
//! - main: location requests, scans and alert checks on their own timers

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::SyncSender;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use esp32_nimble::BLEDevice;
use esp_idf_svc::hal::delay::TickType;
use esp_idf_svc::hal::gpio::AnyIOPin;
use esp_idf_svc::hal::peripherals::Peripherals;
use esp_idf_svc::hal::uart::{config::Config as UartConfig, UartDriver};
use esp_idf_svc::hal::units::Hertz;
use secmon::aggregator::{baseline_report, merge_report, AggregatedState, ReportAggregator};
use secmon::alert::alert_reasons;
use secmon::config::CentralConfig;
use secmon::location::{parse_rmc, LocationCache, LocationProvider};
use secmon::protocol::{DeviceMessage, MsgBuffer};
use secmon::timer::IntervalTimer;

use crate::radio::NimbleScanner;
use crate::{emit, uptime_millis_u32, ERRORS, REPORTS};

/// Listening time per scan; shorter than the scan period so the loop
/// still gets to its other timers.
const SCAN_WINDOW_MS: i32 = 2000;

const GNSS_BAUD: u32 = 9600;

/// Without an RMC sentence for this long the fix is dropped.
const GNSS_STALE_MS: u128 = 3000;

const NMEA_LINE_LEN: usize = 96;

// ── GNSS provider ────────────────────────────────────────────────────

/// Answers fix requests from the NMEA stream of a UART GNSS receiver.
///
/// The reader thread parses every `RMC` sentence as it arrives; a pending
/// request is completed with the next one (or invalidated once the stream
/// goes quiet).
struct GnssProvider {
    pending: Arc<AtomicBool>,
}

impl GnssProvider {
    fn spawn(uart: UartDriver<'static>, cache: Arc<LocationCache>) -> anyhow::Result<Self> {
        let pending = Arc::new(AtomicBool::new(false));
        let reader_pending = Arc::clone(&pending);
        thread::Builder::new()
            .name("gnss".into())
            .stack_size(4096)
            .spawn(move || {
                gnss_thread(uart, cache, reader_pending);
            })?;
        log::info!("GNSS thread spawned");
        Ok(Self { pending })
    }
}

impl LocationProvider for GnssProvider {
    fn request_fix_async(&mut self) {
        self.pending.store(true, Ordering::Release);
    }
}

fn gnss_thread(uart: UartDriver<'static>, cache: Arc<LocationCache>, pending: Arc<AtomicBool>) {
    log::info!("GNSS thread started");

    let timeout = TickType::new_millis(100).ticks();
    let mut line: heapless::String<NMEA_LINE_LEN> = heapless::String::new();
    let mut buf = [0u8; 64];
    let mut last_sentence = Instant::now();
    let mut had_fix = false;

    loop {
        let len = match uart.read(&mut buf, timeout) {
            Ok(len) => len,
            Err(e) => {
                log::warn!("GNSS UART read failed: {:?}", e);
                0
            }
        };

        for &byte in &buf[..len] {
            match byte {
                b'\n' => {
                    if let Some((has_fix, point)) = parse_rmc(&line) {
                        last_sentence = Instant::now();
                        if has_fix != had_fix {
                            log::info!("GNSS fix {}", if has_fix { "acquired" } else { "lost" });
                            had_fix = has_fix;
                        }
                        if pending.swap(false, Ordering::AcqRel) {
                            cache.on_fix_result(has_fix, point);
                        }
                    }
                    line.clear();
                }
                b'\r' => {}
                // UART noise: the rest of this sentence has no leading
                // '$' and will not parse
                0x80..=0xFF => line.clear(),
                _ => {
                    // Overlong garbage: start over at the next '$'
                    if line.push(byte as char).is_err() {
                        line.clear();
                    }
                }
            }
        }

        if last_sentence.elapsed().as_millis() > GNSS_STALE_MS && pending.swap(false, Ordering::AcqRel) {
            if had_fix {
                log::warn!("GNSS silent, dropping fix");
                had_fix = false;
            }
            cache.invalidate();
        }
    }
}

// ── Main loop ────────────────────────────────────────────────────────

pub fn run(peripherals: Peripherals, output_tx: SyncSender<MsgBuffer>) -> anyhow::Result<()> {
    let config = CentralConfig::new();
    log::info!(
        "Central scanning for '{}' every {} ms, location merge {:?}",
        config.scan_name,
        config.scan_period_ms,
        config.location_merge
    );

    // ── Location ─────────────────────────────────────────────────────

    let location = Arc::new(LocationCache::new());
    // XIAO ESP32-S3 GPS header: TX GPIO43, RX GPIO44
    let uart = UartDriver::new(
        peripherals.uart1,
        peripherals.pins.gpio43,
        peripherals.pins.gpio44,
        Option::<AnyIOPin>::None,
        Option::<AnyIOPin>::None,
        &UartConfig::new().baudrate(Hertz(GNSS_BAUD)),
    )?;
    let mut gnss = GnssProvider::spawn(uart, Arc::clone(&location))?;

    // ── State store ──────────────────────────────────────────────────

    let mut state = AggregatedState::new();
    merge_report(&baseline_report(), None, config.location_merge, &mut state);
    emit(
        &output_tx,
        &DeviceMessage::State {
            state: &state,
            ts: uptime_millis_u32(),
        },
    );

    // ── Scan loop ────────────────────────────────────────────────────

    let ble_device: &'static BLEDevice = BLEDevice::take();
    let mut scanner = NimbleScanner::new(ble_device, SCAN_WINDOW_MS);
    let mut aggregator = ReportAggregator::new(config);

    let mut location_timer = IntervalTimer::new(config.location_period_ms);
    let mut scan_timer = IntervalTimer::new(config.scan_period_ms);
    let mut alert_timer = IntervalTimer::starting_at(config.alert_period_ms, uptime_millis_u32());
    let mut decoded: u32 = 0;

    loop {
        let now = uptime_millis_u32();

        if location_timer.due(now) {
            gnss.request_fix_async();
        }

        if scan_timer.due(now) {
            let summary = aggregator.tick(&mut scanner, &location, &mut state);
            decoded = decoded.wrapping_add(summary.decoded as u32);
            REPORTS.store(decoded, Ordering::Relaxed);
            ERRORS.store(aggregator.rejected_count(), Ordering::Relaxed);

            if summary.fields_merged > 0 {
                emit(
                    &output_tx,
                    &DeviceMessage::State {
                        state: &state,
                        ts: uptime_millis_u32(),
                    },
                );
            }
        }

        if alert_timer.due(now) {
            let reasons = alert_reasons(&state);
            if !reasons.is_empty() {
                log::warn!("Alert: {:?}", reasons);
                emit(
                    &output_tx,
                    &DeviceMessage::Alert {
                        reasons: &reasons,
                        state: &state,
                        ts: uptime_millis_u32(),
                    },
                );
            }
        }

        let now = uptime_millis_u32();
        let wait = location_timer
            .remaining_ms(now)
            .min(scan_timer.remaining_ms(now))
            .min(alert_timer.remaining_ms(now))
            .max(10);
        thread::sleep(Duration::from_millis(wait as u64));
    }
}
