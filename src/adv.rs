/// BLE advertisement data carrying a sensor report.
///
/// A peripheral advertises its local name plus the encoded report as the
/// body of the manufacturer-specific AD structure ("custom data"). The
/// central matches on the name and hands the custom data to the report
/// decoder untouched.
///
/// AD structure format: [length] [type] [data...]
/// Types we care about:
///   0x01      = Flags
///   0x08/0x09 = Shortened/Complete local name
///   0xFF      = Manufacturer specific data (carries the report)
use heapless::{String, Vec};

/// Legacy advertising payload limit.
pub const MAX_ADV_LEN: usize = 31;

pub const AD_FLAGS: u8 = 0x01;
pub const AD_SHORT_NAME: u8 = 0x08;
pub const AD_COMPLETE_NAME: u8 = 0x09;
pub const AD_MANUFACTURER_DATA: u8 = 0xFF;

/// LE General Discoverable | BR/EDR not supported
pub const FLAGS_GENERAL_DISCOVERABLE: u8 = 0x06;

/// Raw advertisement payload as returned by a scan.
pub type AdvPayload = Vec<u8, MAX_ADV_LEN>;

/// Fields extracted from one advertisement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdvFields {
    pub name: String<29>,
    pub custom_data: Vec<u8, 29>,
}

/// Advertisement data encode/parse.
pub struct AdvParser;

impl AdvParser {
    /// Parse AD structures. A truncated structure ends parsing; fields
    /// found before it are kept.
    pub fn parse(ad_data: &[u8]) -> AdvFields {
        let mut fields = AdvFields::default();

        let mut pos = 0;
        while pos < ad_data.len() {
            let len = ad_data[pos] as usize;
            if len == 0 || pos + 1 + len > ad_data.len() {
                break;
            }

            let ad_type = ad_data[pos + 1];
            let data = &ad_data[pos + 2..pos + 1 + len];

            match ad_type {
                AD_SHORT_NAME | AD_COMPLETE_NAME => {
                    if let Ok(name) = core::str::from_utf8(data) {
                        fields.name.clear();
                        let _ = fields.name.push_str(name);
                    }
                }
                AD_MANUFACTURER_DATA => {
                    fields.custom_data.clear();
                    let _ = fields.custom_data.extend_from_slice(data);
                }
                _ => {}
            }

            pos += 1 + len;
        }

        fields
    }

    /// Return the custom data of an advertisement whose local name equals
    /// `name`, or `None` for any other advertiser.
    pub fn custom_data_for<'a>(ad_data: &'a [u8], name: &str) -> Option<&'a [u8]> {
        let mut matched = false;
        let mut custom = None;

        let mut pos = 0;
        while pos < ad_data.len() {
            let len = ad_data[pos] as usize;
            if len == 0 || pos + 1 + len > ad_data.len() {
                break;
            }
            let data = &ad_data[pos + 2..pos + 1 + len];
            match ad_data[pos + 1] {
                AD_SHORT_NAME | AD_COMPLETE_NAME => matched = data == name.as_bytes(),
                AD_MANUFACTURER_DATA => custom = Some(data),
                _ => {}
            }
            pos += 1 + len;
        }

        if matched {
            custom
        } else {
            None
        }
    }

    /// Build flags + complete local name + custom data. Returns `None` if
    /// the result would exceed [`MAX_ADV_LEN`].
    pub fn encode(name: &str, custom_data: &[u8]) -> Option<AdvPayload> {
        let mut out = AdvPayload::new();
        push_structure(&mut out, AD_FLAGS, &[FLAGS_GENERAL_DISCOVERABLE])?;
        push_structure(&mut out, AD_COMPLETE_NAME, name.as_bytes())?;
        push_structure(&mut out, AD_MANUFACTURER_DATA, custom_data)?;
        Some(out)
    }
}

fn push_structure(out: &mut AdvPayload, ad_type: u8, data: &[u8]) -> Option<()> {
    let len = u8::try_from(data.len() + 1).ok()?;
    out.push(len).ok()?;
    out.push(ad_type).ok()?;
    out.extend_from_slice(data).ok()
}
