//! secmon library — sensor report protocol for a BLE security-monitor fleet.
//!
//! Battery-powered peripherals sample motion, a magnetic reed contact, an
//! air-quality sensor and an audio event classifier, and re-broadcast a
//! 9-byte status report in their BLE advertisement. A central node scans
//! for those advertisements, decodes them and merges each field into a
//! shared, last-write-wins state store, optionally tagged with its own
//! location fix.
//!
//! This crate holds everything with invariants and no platform
//! dependencies, testable on any host with `cargo test`:
//! - `report`: the fixed bit-packed wire format
//! - `capture`, `classifier`: double-buffered audio handoff and the
//!   slice-windowed classification loop
//! - `assembler`: peripheral report building and re-broadcast
//! - `aggregator`, `location`, `alert`: central decode/merge, location
//!   enrichment and alert policy
//! - `adv`, `air`, `protocol`, `config`, `timer`: support
//!
//! The ESP-IDF firmware in `firmware-std/` is a thin consumer that
//! provides the radio, microphone and GPIO access.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod adv;
pub mod aggregator;
pub mod air;
pub mod alert;
pub mod assembler;
pub mod capture;
pub mod classifier;
pub mod config;
pub mod location;
pub mod protocol;
pub mod report;
pub mod timer;
