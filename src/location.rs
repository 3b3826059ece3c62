/// Location enrichment interface.
///
/// Position resolution is external: a [`LocationProvider`] is asked for a
/// fix on its own schedule and reports back into a [`LocationCache`] from
/// whatever context it completes in. The aggregator only reads the cache
/// and never waits for a fix.
use core::cell::Cell;

use critical_section::Mutex;
use serde::Serialize;

/// A resolved position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Fix {
    #[serde(rename = "lat")]
    pub latitude: f64,
    #[serde(rename = "lon")]
    pub longitude: f64,
}

impl Fix {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// Source of position fixes (GNSS receiver, cellular locate, ...).
pub trait LocationProvider {
    /// Fire-and-forget request. The result is delivered later through
    /// [`LocationCache::on_fix_result`].
    fn request_fix_async(&mut self);
}

#[derive(Clone, Copy)]
struct Cached {
    point: Fix,
    valid: bool,
}

/// Latest known fix plus whether it is currently valid.
///
/// Written from the provider's completion context, read by the aggregator.
/// Both halves are updated together under a critical section.
pub struct LocationCache {
    inner: Mutex<Cell<Cached>>,
}

impl LocationCache {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(Cell::new(Cached {
                point: Fix::new(0.0, 0.0),
                valid: false,
            })),
        }
    }

    /// Completion callback. `point` is the provider's last position
    /// estimate; it is kept but only exposed while `has_fix` holds.
    pub fn on_fix_result(&self, has_fix: bool, point: Fix) {
        critical_section::with(|cs| {
            self.inner.borrow(cs).set(Cached {
                point,
                valid: has_fix,
            })
        });
    }

    /// Mark the current fix invalid without touching the stored point.
    pub fn invalidate(&self) {
        critical_section::with(|cs| {
            let cell = self.inner.borrow(cs);
            let mut cached = cell.get();
            cached.valid = false;
            cell.set(cached);
        });
    }

    /// Latest fix if valid; `None` means "omit location this cycle".
    pub fn latest(&self) -> Option<Fix> {
        let cached = critical_section::with(|cs| self.inner.borrow(cs).get());
        cached.valid.then_some(cached.point)
    }

    pub fn has_fix(&self) -> bool {
        self.latest().is_some()
    }
}

impl Default for LocationCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse an NMEA `RMC` sentence (any talker: `$GPRMC`, `$GNRMC`, ...).
///
/// Returns `(has_fix, point)`; `has_fix` is the sentence's `A`/`V` status.
/// `None` for other sentences, bad checksums or malformed fields. A void
/// sentence with empty coordinates yields a `(false, 0,0)` point. Lines
/// with non-ASCII bytes are rejected.
pub fn parse_rmc(line: &str) -> Option<(bool, Fix)> {
    if !line.is_ascii() {
        return None;
    }
    let line = line.trim_end();
    let body = line.strip_prefix('$')?;
    let body = match body.split_once('*') {
        Some((body, checksum)) => {
            let expected = u8::from_str_radix(checksum, 16).ok()?;
            if body.bytes().fold(0u8, |acc, b| acc ^ b) != expected {
                return None;
            }
            body
        }
        None => body,
    };

    let mut fields = body.split(',');
    let kind = fields.next()?;
    if kind.len() != 5 || !kind.ends_with("RMC") {
        return None;
    }
    let _time = fields.next()?;
    let has_fix = match fields.next()? {
        "A" => true,
        "V" => false,
        _ => return None,
    };
    let lat = fields.next()?;
    let lat_hemi = fields.next()?;
    let lon = fields.next()?;
    let lon_hemi = fields.next()?;

    if !has_fix && lat.is_empty() {
        return Some((false, Fix::new(0.0, 0.0)));
    }

    let latitude = nmea_degrees(lat, 2)? * hemisphere_sign(lat_hemi, 'N', 'S')?;
    let longitude = nmea_degrees(lon, 3)? * hemisphere_sign(lon_hemi, 'E', 'W')?;
    Some((has_fix, Fix::new(latitude, longitude)))
}

/// `ddmm.mmmm` / `dddmm.mmmm` to decimal degrees.
fn nmea_degrees(field: &str, degree_digits: usize) -> Option<f64> {
    if field.len() < degree_digits + 2 {
        return None;
    }
    let deg: f64 = field.get(..degree_digits)?.parse().ok()?;
    let min: f64 = field.get(degree_digits..)?.parse().ok()?;
    Some(deg + min / 60.0)
}

fn hemisphere_sign(field: &str, positive: char, negative: char) -> Option<f64> {
    let mut chars = field.chars();
    let c = chars.next()?;
    if chars.next().is_some() {
        return None;
    }
    if c == positive {
        Some(1.0)
    } else if c == negative {
        Some(-1.0)
    } else {
        None
    }
}
