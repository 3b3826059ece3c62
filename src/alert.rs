/// Scheduled alert policy over the aggregated state.
///
/// Checked on its own period, independent of scans. Any single alarming
/// field is enough; the alert carries the whole state.
use crate::aggregator::{AggregatedState, FIELD_AIR_QUALITY, FIELD_CONTACT, FIELD_MOTION, FIELD_SOUND};
use crate::protocol::AlertReasons;

/// Air-quality labels worth an alert.
pub const REPORTABLE_AIR_QUALITY: &[&str] = &["High", "Danger"];

/// `(field, label)` pairs that raise an alert on their own.
const ALARM_LABELS: &[(&str, &str)] = &[
    (FIELD_MOTION, "Detected"),
    (FIELD_CONTACT, "Open"),
    (FIELD_SOUND, "Above"),
];

/// Fields currently in an alarming state, in check order.
pub fn alert_reasons(state: &AggregatedState) -> AlertReasons {
    let mut reasons = AlertReasons::new();

    if let Some(aqs) = state.text(FIELD_AIR_QUALITY) {
        if REPORTABLE_AIR_QUALITY.contains(&aqs) {
            let _ = reasons.push(FIELD_AIR_QUALITY);
        }
    }
    for &(field, label) in ALARM_LABELS {
        if state.text(field) == Some(label) {
            let _ = reasons.push(field);
        }
    }

    reasons
}

pub fn should_alert(state: &AggregatedState) -> bool {
    !alert_reasons(state).is_empty()
}
