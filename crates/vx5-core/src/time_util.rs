//! Time utilities for message timestamps and request signing.
//!
//! Message timestamps use microsecond epoch integers; the login signature
//! uses an epoch-second string and the REST signer collaborator uses
//! ISO-8601 with millisecond precision.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current time as **microseconds** since Unix epoch.
#[inline]
pub fn now_us() -> u64 {
    let d = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    d.as_micros() as u64
}

/// Current time as a 10-digit epoch-second string, e.g. `"1521221737"`.
///
/// This is the timestamp format the login signature is computed over.
pub fn epoch_secs() -> String {
    let d = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    d.as_secs().to_string()
}

/// Current UTC time in ISO-8601 format with millisecond precision,
/// e.g. `"2018-03-16T18:02:48.284Z"`.
pub fn iso_time() -> String {
    let d = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    let secs = d.as_secs();
    let millis = d.subsec_millis();

    // Civil-date conversion (days since epoch → y/m/d), valid for years
    // 1970..9999.
    let days = secs / 86_400;
    let rem = secs % 86_400;
    let (year, month, day) = civil_from_days(days as i64);

    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:03}Z",
        year,
        month,
        day,
        rem / 3600,
        (rem % 3600) / 60,
        rem % 60,
        millis
    )
}

/// Convert days since 1970-01-01 to a (year, month, day) civil date.
fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    (if m <= 2 { y + 1 } else { y }, m, d)
}
