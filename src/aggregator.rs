/// Central-side scan, decode and merge.
///
/// Every scan period the aggregator collects report payloads from the
/// transport, decodes each one and upserts one field per entry into the
/// shared state store. Merge is per field and last-write-wins by arrival
/// order; there is no history and no cross-field transaction. A bad
/// broadcast is logged and skipped, never fatal to the tick.
use core::fmt;

use heapless::{LinearMap, Vec};
use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::adv::AdvPayload;
use crate::config::{CentralConfig, LocationMerge};
use crate::location::{Fix, LocationCache};
use crate::report::{AirQualityLevel, ReportEntry, SensorKind, SensorReport};

/// At most one broadcast per sender id.
pub const MAX_SCAN_RESULTS: usize = 8;

/// Store capacity: four sensor fields plus location, with headroom.
pub const MAX_FIELDS: usize = 8;

pub const FIELD_AIR_QUALITY: &str = "aqs";
pub const FIELD_MOTION: &str = "pir";
pub const FIELD_CONTACT: &str = "magnet";
pub const FIELD_SOUND: &str = "sound";
pub const FIELD_LOCATION: &str = "loc";

/// Label for an air-quality value outside the known levels.
pub const AIR_QUALITY_ERROR: &str = "Error";

/// Scan results: one report payload per responding sender.
pub type ScanResults = Vec<AdvPayload, MAX_SCAN_RESULTS>;

/// Which broadcasts a scan should return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanFilter<'a> {
    /// Advertised local name to match
    pub name: &'a str,
}

/// Scanning half of the radio transport.
pub trait Scanner {
    type Error: fmt::Debug;

    /// Collect the report payloads of matching advertisers into `results`.
    /// Order is unspecified; an empty result is normal.
    fn scan(&mut self, filter: &ScanFilter<'_>, results: &mut ScanResults)
        -> Result<(), Self::Error>;
}

/// A merged value: a human-readable label, or the location object.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue {
    Text(&'static str),
    Location(Fix),
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FieldValue::Text(text) => serializer.serialize_str(text),
            FieldValue::Location(fix) => fix.serialize(serializer),
        }
    }
}

/// Field-level upsert into the shared store.
pub trait StateStore {
    fn merge_field(&mut self, name: &'static str, value: FieldValue);
}

/// Latest value per field name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregatedState {
    fields: LinearMap<&'static str, FieldValue, MAX_FIELDS>,
}

impl AggregatedState {
    pub fn new() -> Self {
        Self {
            fields: LinearMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(k, _)| **k == name).map(|(_, v)| v)
    }

    /// Text value of a field; `None` for missing or non-text fields.
    pub fn text(&self, name: &str) -> Option<&'static str> {
        match self.get(name) {
            Some(FieldValue::Text(text)) => Some(*text),
            _ => None,
        }
    }

    pub fn location(&self) -> Option<Fix> {
        match self.get(FIELD_LOCATION) {
            Some(FieldValue::Location(fix)) => Some(*fix),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl StateStore for AggregatedState {
    fn merge_field(&mut self, name: &'static str, value: FieldValue) {
        if self.fields.insert(name, value).is_err() {
            log::warn!("State store full, dropping field '{}'", name);
        }
    }
}

impl Serialize for AggregatedState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in self.fields.iter() {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Field name and display label for one entry.
pub fn field_for(entry: &ReportEntry) -> (&'static str, &'static str) {
    let on = entry.value != 0;
    match entry.kind {
        SensorKind::AirQuality => (
            FIELD_AIR_QUALITY,
            AirQualityLevel::from_value(entry.value)
                .map(AirQualityLevel::as_str)
                .unwrap_or(AIR_QUALITY_ERROR),
        ),
        SensorKind::Motion => (FIELD_MOTION, if on { "Detected" } else { "None" }),
        SensorKind::MagneticContact => (FIELD_CONTACT, if on { "Closed" } else { "Open" }),
        SensorKind::AcousticEvent => (FIELD_SOUND, if on { "Above" } else { "Below" }),
    }
}

/// Report merged into every store at startup so each field exists before
/// the first scan: air quality unknown, no motion, contact closed, quiet.
pub fn baseline_report() -> SensorReport {
    let mut report = SensorReport::new(0);
    for entry in [
        ReportEntry::air_quality(AirQualityLevel::None),
        ReportEntry::flag(SensorKind::Motion, false),
        ReportEntry::flag(SensorKind::MagneticContact, true),
        ReportEntry::flag(SensorKind::AcousticEvent, false),
    ] {
        let _ = report.push(entry);
    }
    report
}

/// Counters for one scan tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub received: usize,
    pub decoded: usize,
    pub rejected: usize,
    pub fields_merged: usize,
    pub locations_merged: usize,
}

/// Scans, decodes and merges on the central node.
pub struct ReportAggregator {
    config: CentralConfig,
    results: ScanResults,
    total_rejected: u32,
}

impl ReportAggregator {
    pub fn new(config: CentralConfig) -> Self {
        Self {
            config,
            results: ScanResults::new(),
            total_rejected: 0,
        }
    }

    pub fn config(&self) -> &CentralConfig {
        &self.config
    }

    /// Broadcasts rejected by the decoder since start.
    pub fn rejected_count(&self) -> u32 {
        self.total_rejected
    }

    /// One scan period.
    pub fn tick<S: Scanner>(
        &mut self,
        scanner: &mut S,
        location: &LocationCache,
        store: &mut impl StateStore,
    ) -> ScanSummary {
        let mut summary = ScanSummary::default();

        self.results.clear();
        let filter = ScanFilter {
            name: self.config.scan_name,
        };
        if let Err(e) = scanner.scan(&filter, &mut self.results) {
            log::warn!("Scan failed: {:?}", e);
            return summary;
        }

        summary.received = self.results.len();
        for payload in self.results.iter() {
            match SensorReport::decode(payload) {
                Ok(report) => {
                    summary.decoded += 1;
                    let (fields, locations) =
                        merge_report(&report, location.latest(), self.config.location_merge, store);
                    summary.fields_merged += fields;
                    summary.locations_merged += locations;
                }
                Err(e) => {
                    summary.rejected += 1;
                    self.total_rejected = self.total_rejected.wrapping_add(1);
                    log::warn!("Dropping broadcast: {}", e);
                }
            }
        }

        if summary.received > 0 {
            log::info!(
                "Scan: {} received, {} decoded, {} fields merged",
                summary.received,
                summary.decoded,
                summary.fields_merged
            );
        }
        summary
    }
}

/// Merge every entry of `report` into `store`. Returns
/// `(fields merged, location merges)`.
///
/// With [`LocationMerge::PerEntry`] the location is re-attached after each
/// entry; with `PerReport` once after the last entry. An empty report
/// merges nothing, location included.
pub fn merge_report(
    report: &SensorReport,
    location: Option<Fix>,
    policy: LocationMerge,
    store: &mut impl StateStore,
) -> (usize, usize) {
    let mut locations = 0;

    for entry in report.entries() {
        let (name, label) = field_for(entry);
        log::debug!("Sender {}: {} = {}", report.sender_id(), name, label);
        store.merge_field(name, FieldValue::Text(label));

        if let (Some(fix), LocationMerge::PerEntry) = (location, policy) {
            store.merge_field(FIELD_LOCATION, FieldValue::Location(fix));
            locations += 1;
        }
    }

    if let (Some(fix), LocationMerge::PerReport, false) = (location, policy, report.is_empty()) {
        store.merge_field(FIELD_LOCATION, FieldValue::Location(fix));
        locations += 1;
    }

    (report.entry_count(), locations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::{Reading, ReportAssembler, SensorReader};
    use crate::config::PeripheralConfig;
    use crate::report::{pack_header, REPORT_LEN};
    use proptest::prelude::*;

    /// Returns a canned list of payloads per scan.
    struct FakeScanner {
        payloads: std::vec::Vec<std::vec::Vec<u8>>,
        fail: bool,
        last_filter: Option<std::string::String>,
    }

    impl FakeScanner {
        fn with(payloads: std::vec::Vec<std::vec::Vec<u8>>) -> Self {
            Self {
                payloads,
                fail: false,
                last_filter: None,
            }
        }
    }

    impl Scanner for FakeScanner {
        type Error = &'static str;

        fn scan(&mut self, filter: &ScanFilter<'_>, results: &mut ScanResults) -> Result<(), Self::Error> {
            self.last_filter = Some(filter.name.into());
            if self.fail {
                return Err("radio off");
            }
            for p in &self.payloads {
                let _ = results.push(AdvPayload::from_slice(p).unwrap());
            }
            Ok(())
        }
    }

    /// Records every merge call in order.
    #[derive(Default)]
    struct MergeLog(std::vec::Vec<(&'static str, FieldValue)>);

    impl StateStore for MergeLog {
        fn merge_field(&mut self, name: &'static str, value: FieldValue) {
            self.0.push((name, value));
        }
    }

    fn report(sender: u8, entries: &[ReportEntry]) -> SensorReport {
        let mut r = SensorReport::new(sender);
        for e in entries {
            r.push(*e).unwrap();
        }
        r
    }

    // ── Field mapping ──────────────────────────────────────────────

    #[test]
    fn labels_per_kind() {
        let f = |kind, value| field_for(&ReportEntry::new(kind, value));
        assert_eq!(f(SensorKind::AirQuality, 1), ("aqs", "Fresh"));
        assert_eq!(f(SensorKind::AirQuality, 4), ("aqs", "Danger"));
        assert_eq!(f(SensorKind::AirQuality, 0), ("aqs", "None"));
        assert_eq!(f(SensorKind::AirQuality, 17), ("aqs", "Error"));
        assert_eq!(f(SensorKind::Motion, 1), ("pir", "Detected"));
        assert_eq!(f(SensorKind::Motion, 0), ("pir", "None"));
        assert_eq!(f(SensorKind::MagneticContact, 1), ("magnet", "Closed"));
        assert_eq!(f(SensorKind::MagneticContact, 0), ("magnet", "Open"));
        assert_eq!(f(SensorKind::AcousticEvent, 1), ("sound", "Above"));
        assert_eq!(f(SensorKind::AcousticEvent, 0), ("sound", "Below"));
    }

    // ── Merge ──────────────────────────────────────────────────────

    #[test]
    fn merge_upserts_only_reported_fields() {
        let mut state = AggregatedState::new();
        merge_report(&baseline_report(), None, LocationMerge::PerEntry, &mut state);
        assert_eq!(state.len(), 4);

        let motion = report(3, &[ReportEntry::flag(SensorKind::Motion, true)]);
        merge_report(&motion, None, LocationMerge::PerEntry, &mut state);
        assert_eq!(state.text("pir"), Some("Detected"));
        assert_eq!(state.text("magnet"), Some("Closed"));
        assert_eq!(state.text("aqs"), Some("None"));
        assert_eq!(state.len(), 4);
    }

    #[test]
    fn duplicate_kind_last_entry_wins() {
        let mut state = AggregatedState::new();
        let r = report(
            1,
            &[
                ReportEntry::flag(SensorKind::MagneticContact, true),
                ReportEntry::flag(SensorKind::MagneticContact, false),
            ],
        );
        merge_report(&r, None, LocationMerge::PerEntry, &mut state);
        assert_eq!(state.text("magnet"), Some("Open"));
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn location_attached_per_entry() {
        let fix = Fix::new(12.5, 99.0);
        let r = report(
            1,
            &[
                ReportEntry::flag(SensorKind::Motion, true),
                ReportEntry::flag(SensorKind::AcousticEvent, false),
            ],
        );
        let mut log = MergeLog::default();
        let counts = merge_report(&r, Some(fix), LocationMerge::PerEntry, &mut log);
        assert_eq!(counts, (2, 2));
        assert_eq!(
            log.0,
            [
                ("pir", FieldValue::Text("Detected")),
                ("loc", FieldValue::Location(fix)),
                ("sound", FieldValue::Text("Below")),
                ("loc", FieldValue::Location(fix)),
            ]
        );
    }

    #[test]
    fn location_attached_per_report() {
        let fix = Fix::new(1.0, 2.0);
        let r = report(
            1,
            &[
                ReportEntry::flag(SensorKind::Motion, true),
                ReportEntry::flag(SensorKind::AcousticEvent, true),
            ],
        );
        let mut log = MergeLog::default();
        assert_eq!(merge_report(&r, Some(fix), LocationMerge::PerReport, &mut log), (2, 1));
        assert_eq!(log.0.last(), Some(&("loc", FieldValue::Location(fix))));

        let mut per_entry = AggregatedState::new();
        let mut per_report = AggregatedState::new();
        merge_report(&r, Some(fix), LocationMerge::PerEntry, &mut per_entry);
        merge_report(&r, Some(fix), LocationMerge::PerReport, &mut per_report);
        assert_eq!(per_entry, per_report);
    }

    #[test]
    fn no_fix_means_no_location_field() {
        let mut state = AggregatedState::new();
        let r = report(1, &[ReportEntry::flag(SensorKind::Motion, true)]);
        assert_eq!(merge_report(&r, None, LocationMerge::PerEntry, &mut state), (1, 0));
        assert_eq!(state.location(), None);
    }

    #[test]
    fn empty_report_merges_nothing() {
        let mut log = MergeLog::default();
        let r = SensorReport::decode(&[pack_header(5, 0), 0, 0, 0, 0, 0, 0, 0, 0]).unwrap();
        let counts = merge_report(&r, Some(Fix::new(0.0, 0.0)), LocationMerge::PerReport, &mut log);
        assert_eq!(counts, (0, 0));
        assert!(log.0.is_empty());
    }

    // ── Tick ───────────────────────────────────────────────────────

    #[test]
    fn tick_skips_bad_broadcasts() {
        let good = report(1, &[ReportEntry::flag(SensorKind::Motion, true)]).encode();
        let unknown = [pack_header(2, 1), 7, 1, 0, 0, 0, 0, 0, 0];
        let short = [pack_header(3, 1), 0, 1];
        let mut scanner = FakeScanner::with(vec![short.to_vec(), unknown.to_vec(), good.to_vec()]);
        let mut agg = ReportAggregator::new(CentralConfig::default());
        let mut state = AggregatedState::new();

        let summary = agg.tick(&mut scanner, &LocationCache::new(), &mut state);
        assert_eq!(
            summary,
            ScanSummary {
                received: 3,
                decoded: 1,
                rejected: 2,
                fields_merged: 1,
                locations_merged: 0,
            }
        );
        assert_eq!(state.text("pir"), Some("Detected"));
        assert_eq!(agg.rejected_count(), 2);
        assert_eq!(scanner.last_filter.as_deref(), Some("SEC_MONITOR"));
    }

    #[test]
    fn tick_attaches_valid_fix() {
        let payload = report(1, &[ReportEntry::flag(SensorKind::MagneticContact, false)]).encode();
        let mut scanner = FakeScanner::with(vec![payload.to_vec()]);
        let mut agg = ReportAggregator::new(CentralConfig::default());
        let mut state = AggregatedState::new();
        let location = LocationCache::new();
        location.on_fix_result(true, Fix::new(40.0, -3.7));

        let summary = agg.tick(&mut scanner, &location, &mut state);
        assert_eq!(summary.locations_merged, 1);
        assert_eq!(state.location(), Some(Fix::new(40.0, -3.7)));
        assert_eq!(state.text("magnet"), Some("Open"));
    }

    #[test]
    fn failed_scan_yields_empty_tick() {
        let mut scanner = FakeScanner::with(vec![]);
        scanner.fail = true;
        let mut agg = ReportAggregator::new(CentralConfig::default());
        let mut state = AggregatedState::new();
        let summary = agg.tick(&mut scanner, &LocationCache::new(), &mut state);
        assert_eq!(summary, ScanSummary::default());
        assert!(state.is_empty());
    }

    #[test]
    fn empty_scan_is_normal() {
        let mut agg = ReportAggregator::new(CentralConfig::default());
        let mut state = AggregatedState::new();
        let summary = agg.tick(&mut FakeScanner::with(vec![]), &LocationCache::new(), &mut state);
        assert_eq!(summary.received, 0);
    }

    // ── End to end ─────────────────────────────────────────────────

    struct Scenario;

    impl SensorReader for Scenario {
        fn read(&mut self, kind: SensorKind) -> Reading {
            match kind {
                SensorKind::AirQuality => Reading::Slope(crate::air::HIGH_POLLUTION),
                _ => Reading::Flag(true),
            }
        }
    }

    #[test]
    fn peripheral_to_central_air_quality_and_motion() {
        let asm = ReportAssembler::new(PeripheralConfig::new(
            2,
            &[SensorKind::AirQuality, SensorKind::Motion],
        ));
        let sent = asm.assemble(&mut Scenario);
        let bytes = sent.encode();
        assert_eq!(bytes.len(), REPORT_LEN);

        let received = SensorReport::decode(&bytes).unwrap();
        assert_eq!(received, sent);

        let mut state = AggregatedState::new();
        merge_report(&received, None, LocationMerge::PerEntry, &mut state);
        assert_eq!(state.text("aqs"), Some("High"));
        assert_eq!(state.text("pir"), Some("Detected"));
        assert_eq!(state.len(), 2);
    }

    // ── Serialization ──────────────────────────────────────────────

    #[test]
    fn state_serializes_flat() {
        let mut state = AggregatedState::new();
        state.merge_field("aqs", FieldValue::Text("High"));
        state.merge_field("loc", FieldValue::Location(Fix::new(1.5, 2.5)));
        let mut buf = [0u8; 128];
        let len = serde_json_core::to_slice(&state, &mut buf).unwrap();
        assert_eq!(&buf[..len], br#"{"aqs":"High","loc":{"lat":1.5,"lon":2.5}}"#);
    }

    // ── Properties ─────────────────────────────────────────────────

    fn entries() -> impl Strategy<Value = std::vec::Vec<ReportEntry>> {
        proptest::collection::vec(
            (0u8..4, any::<u8>())
                .prop_map(|(t, v)| ReportEntry::new(SensorKind::from_tag(t).unwrap(), v)),
            0..=4,
        )
    }

    proptest! {
        #[test]
        fn merging_twice_equals_merging_once(
            first in entries(),
            second in entries(),
            lat in -90.0f64..90.0,
            has_fix in any::<bool>(),
        ) {
            let fix = has_fix.then(|| Fix::new(lat, 0.0));
            let mut once = AggregatedState::new();
            merge_report(&report(0, &first), fix, LocationMerge::PerEntry, &mut once);
            merge_report(&report(1, &second), fix, LocationMerge::PerEntry, &mut once);

            let mut twice = once.clone();
            merge_report(&report(1, &second), fix, LocationMerge::PerEntry, &mut twice);
            prop_assert_eq!(once, twice);
        }
    }
}
