/// JSON message protocol for the central node's output sink.
///
/// All messages are newline-delimited JSON (NDJSON), written to serial and
/// handed to whatever persists or forwards the state (out of scope here).
/// Uses `heapless` buffers for no_std/no-alloc operation.
use heapless::Vec;
use serde::Serialize;

use crate::aggregator::AggregatedState;

/// Node role reported in status messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Peripheral,
    Central,
}

/// Field names that triggered an alert
pub type AlertReasons = Vec<&'static str, 4>;

/// Messages emitted by a node
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum DeviceMessage<'a> {
    /// Aggregated state after a scan that merged something
    #[serde(rename = "state")]
    State {
        state: &'a AggregatedState,
        /// Uptime in milliseconds
        ts: u32,
    },
    /// Alert raised by the scheduled policy check
    #[serde(rename = "alert")]
    Alert {
        /// Fields that triggered the alert
        reasons: &'a AlertReasons,
        state: &'a AggregatedState,
        ts: u32,
    },
    /// Periodic node status
    #[serde(rename = "status")]
    Status {
        role: Role,
        /// Uptime in seconds
        uptime: u32,
        /// Free heap in bytes
        heap_free: u32,
        /// Reports broadcast (peripheral) or decoded (central)
        reports: u32,
        /// Audio overruns (peripheral) or rejected broadcasts (central)
        errors: u32,
        /// Firmware version
        version: &'static str,
    },
}

/// Firmware version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Maximum size of a serialized JSON message
pub const MAX_MSG_LEN: usize = 256;

/// Buffer type for serialized JSON messages
pub type MsgBuffer = Vec<u8, MAX_MSG_LEN>;

/// Serialize a DeviceMessage to JSON bytes and write to the output buffer.
/// Returns the number of bytes written, or None if serialization failed.
pub fn serialize_message(msg: &DeviceMessage, buf: &mut [u8]) -> Option<usize> {
    match serde_json_core::to_slice(msg, buf) {
        Ok(len) => {
            // Append newline for NDJSON
            if len < buf.len() {
                buf[len] = b'\n';
                Some(len + 1)
            } else {
                Some(len)
            }
        }
        Err(_) => None,
    }
}

/// Serialize into a fresh [`MsgBuffer`].
pub fn to_msg_buffer(msg: &DeviceMessage) -> Option<MsgBuffer> {
    let mut buf = MsgBuffer::new();
    buf.resize_default(MAX_MSG_LEN).ok()?;
    let len = serialize_message(msg, &mut buf)?;
    buf.truncate(len);
    Some(buf)
}
