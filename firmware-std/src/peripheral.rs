//! Peripheral role: sample sensors, classify audio, advertise reports.
//!
//! Threads:
//! - `mic`: blocking I2S PDM reads pushed into the capture double buffer
//! - `classify`: waits for each full slice and updates the acoustic flag
//! - main: reads sensors and replaces the advertised report every period

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use esp32_nimble::BLEDevice;
use esp_idf_svc::hal::adc::attenuation::DB_11;
use esp_idf_svc::hal::adc::oneshot::config::AdcChannelConfig;
use esp_idf_svc::hal::adc::oneshot::{AdcChannelDriver, AdcDriver};
use esp_idf_svc::hal::adc::ADC1;
use esp_idf_svc::hal::delay::BLOCK;
use esp_idf_svc::hal::gpio::{Gpio1, Gpio2, Gpio3, Input, PinDriver, Pull};
use esp_idf_svc::hal::i2s::{config as i2s_config, I2sDriver, I2sRx};
use esp_idf_svc::hal::peripherals::Peripherals;
use secmon::air::{SlopeDetector, SLOPE_ERROR};
use secmon::assembler::{Reading, ReportAssembler, SensorReader};
use secmon::capture::CaptureBuffers;
use secmon::classifier::{AcousticSignal, ClassifierPipeline, PeakClassifier};
use secmon::config::{PeripheralConfig, PipelineConfig, ADV_NAME, SAMPLE_RATE_HZ};
use secmon::report::SensorKind;
use secmon::timer::IntervalTimer;

use crate::radio::NimbleBroadcaster;
use crate::{uptime_millis_u32, ERRORS, REPORTS};

/// Fixed per physical unit; must be unique within the fleet (0..=7).
const SENDER_ID: u8 = 1;

/// Sensors fitted to this unit, in report order.
const SENSORS: &[SensorKind] = &[
    SensorKind::AirQuality,
    SensorKind::Motion,
    SensorKind::MagneticContact,
    SensorKind::AcousticEvent,
];

/// RMS (in raw 16-bit sample units) at which a slice scores fully `peak`.
const REFERENCE_RMS: f32 = 3000.0;

/// Samples per I2S read.
const MIC_CHUNK: usize = 256;

type AirSensor = AdcChannelDriver<'static, Gpio3, AdcDriver<'static, ADC1>>;

/// Live sensor readings for the assembler.
struct Sensors {
    pir: PinDriver<'static, Gpio1, Input>,
    reed: PinDriver<'static, Gpio2, Input>,
    air: AirSensor,
    slope: SlopeDetector,
    acoustic: Arc<AcousticSignal>,
}

impl SensorReader for Sensors {
    fn read(&mut self, kind: SensorKind) -> Reading {
        match kind {
            SensorKind::Motion => Reading::Flag(self.pir.is_high()),
            // Reed closes to ground when the magnet is present
            SensorKind::MagneticContact => Reading::Flag(self.reed.is_low()),
            SensorKind::AcousticEvent => Reading::Flag(self.acoustic.get()),
            SensorKind::AirQuality => match self.air.read_raw() {
                // 12-bit ADC, thresholds are on the sensor's 10-bit scale
                Ok(raw) => Reading::Slope(self.slope.slope(raw >> 2)),
                Err(e) => {
                    log::warn!("Air quality read failed: {:?}", e);
                    Reading::Slope(SLOPE_ERROR)
                }
            },
        }
    }
}

pub fn run(peripherals: Peripherals) -> anyhow::Result<()> {
    let config = PeripheralConfig::new(SENDER_ID, SENSORS);
    let pipeline_config = PipelineConfig::new();
    log::info!(
        "Peripheral {} with sensors {:?}, broadcasting every {} ms",
        config.sender_id,
        config.sensors,
        config.broadcast_period_ms
    );

    // ── Audio capture ────────────────────────────────────────────────

    let capture = Arc::new(CaptureBuffers::new(pipeline_config.slice_len)?);
    let acoustic = Arc::new(AcousticSignal::new());

    let pdm_config = i2s_config::PdmRxConfig::new(
        i2s_config::Config::default(),
        i2s_config::PdmRxClkConfig::from_sample_rate_hz(SAMPLE_RATE_HZ),
        i2s_config::PdmRxSlotConfig::from_bits_per_sample_and_slot_mode(
            i2s_config::DataBitWidth::Bits16,
            i2s_config::SlotMode::Mono,
        ),
        i2s_config::PdmRxGpioConfig::new(false),
    );
    // XIAO ESP32-S3 Sense on-board microphone: CLK GPIO42, DATA GPIO41
    let mut mic = I2sDriver::<I2sRx>::new_pdm_rx(
        peripherals.i2s0,
        &pdm_config,
        peripherals.pins.gpio42,
        peripherals.pins.gpio41,
    )?;
    mic.rx_enable()?;

    let mic_capture = Arc::clone(&capture);
    thread::Builder::new()
        .name("mic".into())
        .stack_size(4096)
        .spawn(move || {
            mic_thread(mic, mic_capture);
        })?;
    log::info!("Microphone thread spawned");

    let mut pipeline =
        ClassifierPipeline::new(&pipeline_config, PeakClassifier::new(REFERENCE_RMS))?;
    let classify_capture = Arc::clone(&capture);
    let classify_signal = Arc::clone(&acoustic);
    thread::Builder::new()
        .name("classify".into())
        .stack_size(8192)
        .spawn(move || loop {
            pipeline.wait_step(&classify_capture, &classify_signal, || {
                thread::sleep(Duration::from_millis(5))
            });
        })?;
    log::info!("Classifier thread spawned");

    // ── Sensors ──────────────────────────────────────────────────────

    let pir = PinDriver::input(peripherals.pins.gpio1)?;
    let mut reed = PinDriver::input(peripherals.pins.gpio2)?;
    reed.set_pull(Pull::Up)?;

    let adc = AdcDriver::new(peripherals.adc1)?;
    let adc_config = AdcChannelConfig {
        attenuation: DB_11,
        ..Default::default()
    };
    let air = AdcChannelDriver::new(adc, peripherals.pins.gpio3, &adc_config)?;

    let mut sensors = Sensors {
        pir,
        reed,
        air,
        slope: SlopeDetector::new(),
        acoustic,
    };

    // ── Broadcast loop ───────────────────────────────────────────────

    let ble_device: &'static BLEDevice = BLEDevice::take();
    let mut radio = NimbleBroadcaster::new(ble_device, ADV_NAME);
    let mut assembler = ReportAssembler::new(config);
    let mut timer = IntervalTimer::new(assembler.config().broadcast_period_ms);
    log::info!("Advertising as '{}'", ADV_NAME);

    loop {
        if timer.due(uptime_millis_u32()) {
            let report = assembler.tick(&mut sensors, &mut radio);
            log::debug!("Report: {:?}", report);
            REPORTS.store(assembler.broadcast_count(), Ordering::Relaxed);
            ERRORS.store(capture.overrun_count(), Ordering::Relaxed);
        }
        let wait = timer.remaining_ms(uptime_millis_u32()).max(10);
        thread::sleep(Duration::from_millis(wait as u64));
    }
}

// ── Microphone thread ────────────────────────────────────────────────

fn mic_thread(mut mic: I2sDriver<'static, I2sRx>, capture: Arc<CaptureBuffers>) {
    log::info!("Microphone thread started");

    let mut raw = [0u8; MIC_CHUNK * 2];
    let mut samples = [0i16; MIC_CHUNK];

    loop {
        match mic.read(&mut raw, BLOCK) {
            Ok(len) => {
                let count = len / 2;
                for (sample, bytes) in samples.iter_mut().zip(raw[..count * 2].chunks_exact(2)) {
                    *sample = i16::from_le_bytes([bytes[0], bytes[1]]);
                }
                capture.push_samples(&samples[..count]);
            }
            Err(e) => {
                log::warn!("I2S read failed: {:?}", e);
                thread::sleep(Duration::from_millis(10));
            }
        }
    }
}
