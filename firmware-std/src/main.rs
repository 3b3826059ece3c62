//! secmon — ESP-IDF std firmware
//!
//! Thread-based driver for one node of the security-monitor fleet. The
//! role is chosen at build time: `peripheral` (default) samples sensors and
//! advertises reports, `central` scans, merges and raises alerts. All
//! protocol logic lives in the `secmon` library; this crate only binds it
//! to NimBLE, I2S, GPIO/ADC and UART.

#[cfg(feature = "central")]
mod central;
#[cfg(not(feature = "central"))]
mod peripheral;
mod radio;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc::{self, SyncSender};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use esp_idf_svc::hal::peripherals::Peripherals;
use esp_idf_svc::sys::esp_get_free_heap_size;
use secmon::protocol::{self, DeviceMessage, MsgBuffer, Role, VERSION};

// ── Shared counters (reported by the status thread) ─────────────────

/// Reports broadcast (peripheral) or decoded (central).
pub(crate) static REPORTS: AtomicU32 = AtomicU32::new(0);
/// Audio overruns (peripheral) or rejected broadcasts (central).
pub(crate) static ERRORS: AtomicU32 = AtomicU32::new(0);

/// Boot time, captured once in main and used for uptime calculation.
static BOOT_INSTANT: Mutex<Option<Instant>> = Mutex::new(None);

pub(crate) fn uptime_secs() -> u32 {
    BOOT_INSTANT
        .lock()
        .ok()
        .and_then(|i| i.map(|boot| boot.elapsed().as_secs() as u32))
        .unwrap_or(0)
}

/// Wrapping millisecond clock for `IntervalTimer`.
pub(crate) fn uptime_millis_u32() -> u32 {
    BOOT_INSTANT
        .lock()
        .ok()
        .and_then(|i| i.map(|boot| (boot.elapsed().as_millis() & 0xFFFF_FFFF) as u32))
        .unwrap_or(0)
}

#[cfg(feature = "central")]
const ROLE: Role = Role::Central;
#[cfg(not(feature = "central"))]
const ROLE: Role = Role::Peripheral;

fn main() -> anyhow::Result<()> {
    // Bind the ESP-IDF logger to the `log` facade
    esp_idf_svc::log::EspLogger::initialize_default();

    if let Ok(mut boot) = BOOT_INSTANT.lock() {
        *boot = Some(Instant::now());
    }

    log::info!("secmon v{} starting as {:?} (std)", VERSION, ROLE);

    let peripherals = Peripherals::take()?;

    // ── Output thread ────────────────────────────────────────────────

    let (output_tx, output_rx) = mpsc::sync_channel::<MsgBuffer>(8);
    thread::Builder::new()
        .name("output".into())
        .stack_size(4096)
        .spawn(move || {
            output_thread(output_rx);
        })?;
    log::info!("Output thread spawned");

    // ── Status thread ────────────────────────────────────────────────

    let status_output_tx = output_tx.clone();
    thread::Builder::new()
        .name("status".into())
        .stack_size(4096)
        .spawn(move || {
            status_thread(status_output_tx);
        })?;
    log::info!("Status thread spawned");

    // ── Role main loop (main thread) ─────────────────────────────────

    #[cfg(feature = "central")]
    central::run(peripherals, output_tx)?;
    #[cfg(not(feature = "central"))]
    peripheral::run(peripherals)?;

    Ok(())
}

/// Serialize `msg` and queue it for the output thread. Drops the message
/// if the queue is full.
pub(crate) fn emit(output_tx: &SyncSender<MsgBuffer>, msg: &DeviceMessage) {
    match protocol::to_msg_buffer(msg) {
        Some(buf) => {
            let _ = output_tx.try_send(buf);
        }
        None => log::warn!("Message too large for output buffer"),
    }
}

// ── Output thread ────────────────────────────────────────────────────

fn output_thread(output_rx: mpsc::Receiver<MsgBuffer>) {
    log::info!("Output thread started");

    while let Ok(msg) = output_rx.recv() {
        if let Ok(s) = std::str::from_utf8(&msg) {
            log::info!("{}", s.trim_end());
        }
    }
}

// ── Status thread ────────────────────────────────────────────────────

fn status_thread(output_tx: SyncSender<MsgBuffer>) {
    loop {
        thread::sleep(Duration::from_secs(30));

        let heap_free = unsafe { esp_get_free_heap_size() };

        let msg = DeviceMessage::Status {
            role: ROLE,
            uptime: uptime_secs(),
            heap_free,
            reports: REPORTS.load(Ordering::Relaxed),
            errors: ERRORS.load(Ordering::Relaxed),
            version: VERSION,
        };
        emit(&output_tx, &msg);
    }
}
