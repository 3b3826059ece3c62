/// Fixed binary sensor report carried in every peripheral broadcast.
///
/// Layout (9 bytes, identical on every node):
///
/// ```text
/// byte 0      [ entry_count:5 | sender_id:3 ]   (sender_id in the low bits)
/// byte 1..9   4 × [ kind tag, value ]
/// ```
///
/// Slots past `entry_count` are still transmitted; their content is
/// undefined and never interpreted. No checksum, no version byte.
use heapless::Vec;

/// Number of entry slots in a report.
pub const CAPACITY: usize = 4;

/// Encoded size of one entry slot.
pub const ENTRY_LEN: usize = 2;

/// Encoded size of a full report: header + all slots.
pub const REPORT_LEN: usize = 1 + CAPACITY * ENTRY_LEN;

/// Largest sender id the 3-bit header field can carry.
pub const MAX_SENDER_ID: u8 = 0x07;

/// Largest entry count the 5-bit header field can carry.
pub const MAX_ENTRY_COUNT: u8 = 0x1F;

const SENDER_MASK: u8 = 0x07;
const COUNT_SHIFT: u32 = 3;

/// Encoded report bytes.
pub type ReportBytes = [u8; REPORT_LEN];

/// Sensor carried by a report entry.
///
/// Tags are part of the wire format and must never be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SensorKind {
    /// Passive-infrared motion
    Motion = 0,
    /// Acoustic event from the audio classifier
    AcousticEvent = 1,
    /// Magnetic reed switch
    MagneticContact = 2,
    /// Air-quality slope classifier
    AirQuality = 3,
}

impl SensorKind {
    pub const ALL: [SensorKind; 4] = [
        SensorKind::Motion,
        SensorKind::AcousticEvent,
        SensorKind::MagneticContact,
        SensorKind::AirQuality,
    ];

    pub const fn tag(self) -> u8 {
        self as u8
    }

    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(SensorKind::Motion),
            1 => Some(SensorKind::AcousticEvent),
            2 => Some(SensorKind::MagneticContact),
            3 => Some(SensorKind::AirQuality),
            _ => None,
        }
    }
}

/// Discrete air-quality level carried in the value byte of an
/// [`SensorKind::AirQuality`] entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum AirQualityLevel {
    #[default]
    None = 0,
    Fresh = 1,
    Low = 2,
    High = 3,
    Danger = 4,
}

impl AirQualityLevel {
    pub const fn from_value(value: u8) -> Option<Self> {
        match value {
            0 => Some(AirQualityLevel::None),
            1 => Some(AirQualityLevel::Fresh),
            2 => Some(AirQualityLevel::Low),
            3 => Some(AirQualityLevel::High),
            4 => Some(AirQualityLevel::Danger),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            AirQualityLevel::None => "None",
            AirQualityLevel::Fresh => "Fresh",
            AirQualityLevel::Low => "Low",
            AirQualityLevel::High => "High",
            AirQualityLevel::Danger => "Danger",
        }
    }
}

/// One `(kind, value)` pair. Boolean sensors carry 0/1 in `value`,
/// air quality carries an [`AirQualityLevel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportEntry {
    pub kind: SensorKind,
    pub value: u8,
}

impl ReportEntry {
    pub const fn new(kind: SensorKind, value: u8) -> Self {
        Self { kind, value }
    }

    pub const fn flag(kind: SensorKind, on: bool) -> Self {
        Self {
            kind,
            value: on as u8,
        }
    }

    pub const fn air_quality(level: AirQualityLevel) -> Self {
        Self {
            kind: SensorKind::AirQuality,
            value: level as u8,
        }
    }
}

/// Report decode failures. Both mean "foreign or malformed broadcast".
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("report too short: {len} bytes, need {need}", need = REPORT_LEN)]
    TooShort { len: usize },
    #[error("unknown sensor kind tag {tag} in entry {index}")]
    UnknownKind { index: usize, tag: u8 },
}

/// A decoded or freshly assembled report.
///
/// `entries` holds exactly the meaningful entries; its length is the
/// header's `entry_count`. Padding slots are not represented.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorReport {
    sender_id: u8,
    entries: Vec<ReportEntry, CAPACITY>,
}

impl SensorReport {
    /// Create an empty report. `sender_id` is masked to its 3-bit field.
    pub fn new(sender_id: u8) -> Self {
        Self {
            sender_id: sender_id & SENDER_MASK,
            entries: Vec::new(),
        }
    }

    pub fn sender_id(&self) -> u8 {
        self.sender_id
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[ReportEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append an entry. Returns the entry back if all slots are used.
    pub fn push(&mut self, entry: ReportEntry) -> Result<(), ReportEntry> {
        self.entries.push(entry)
    }

    /// Serialize into the fixed wire layout. Unused slots are zero-filled.
    pub fn encode(&self) -> ReportBytes {
        let mut out = [0u8; REPORT_LEN];
        out[0] = pack_header(self.sender_id, self.entries.len() as u8);
        for (i, entry) in self.entries.iter().enumerate() {
            let at = 1 + i * ENTRY_LEN;
            out[at] = entry.kind.tag();
            out[at + 1] = entry.value;
        }
        out
    }

    /// Parse the fixed wire layout.
    ///
    /// Only the first `entry_count` slots are validated. A header that
    /// declares more entries than there are slots is clamped to
    /// [`CAPACITY`]: slots beyond the fixed length do not exist.
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < REPORT_LEN {
            return Err(DecodeError::TooShort { len: data.len() });
        }

        let (sender_id, declared) = unpack_header(data[0]);
        let count = (declared as usize).min(CAPACITY);
        if declared as usize > CAPACITY {
            log::debug!("report from {} declares {} entries, clamped", sender_id, declared);
        }

        let mut report = SensorReport::new(sender_id);
        for index in 0..count {
            let at = 1 + index * ENTRY_LEN;
            let tag = data[at];
            let kind = SensorKind::from_tag(tag).ok_or(DecodeError::UnknownKind { index, tag })?;
            let _ = report.entries.push(ReportEntry::new(kind, data[at + 1]));
        }

        Ok(report)
    }
}

/// Pack `sender_id` (low 3 bits) and `entry_count` (next 5 bits).
pub const fn pack_header(sender_id: u8, entry_count: u8) -> u8 {
    (sender_id & SENDER_MASK) | ((entry_count & MAX_ENTRY_COUNT) << COUNT_SHIFT)
}

/// Inverse of [`pack_header`]: `(sender_id, entry_count)`.
pub const fn unpack_header(header: u8) -> (u8, u8) {
    (header & SENDER_MASK, header >> COUNT_SHIFT)
}
