use chrono::{DateTime, FixedOffset, TimeZone, Timelike, Utc};

use crate::error::{BeadError, Result};

/// Generate a freeze-time string for the current instant:
/// `YYYYMMDDTHHMMSSNNNNNN+0000` (UTC, microsecond precision).
pub fn timestamp() -> String {
    format_timestamp(&Utc::now())
}

/// Render an instant in the bead freeze-time format.
pub fn format_timestamp(time: &DateTime<Utc>) -> String {
    time.format("%Y%m%dT%H%M%S%6f%z").to_string()
}

/// Parse a bead freeze-time string back to an instant.
///
/// Accepts `YYYYMMDDTHHMMSS[NNNNNN](+HHMM|-HHMM|Z)`; a missing microsecond
/// block counts as zero, a missing offset as UTC.
pub fn parse_timestamp(timestamp: &str) -> Result<DateTime<Utc>> {
    let invalid = || BeadError::Value(format!("Invalid timestamp: {}", timestamp));

    if !timestamp.is_ascii() || timestamp.len() < 15 {
        return Err(invalid());
    }
    if &timestamp[8..9] != "T" && &timestamp[8..9] != "t" {
        return Err(invalid());
    }

    let year = timestamp[0..4].parse::<i32>().map_err(|_| invalid())?;
    let month = timestamp[4..6].parse::<u32>().map_err(|_| invalid())?;
    let day = timestamp[6..8].parse::<u32>().map_err(|_| invalid())?;
    let hour = timestamp[9..11].parse::<u32>().map_err(|_| invalid())?;
    let minute = timestamp[11..13].parse::<u32>().map_err(|_| invalid())?;
    let second = timestamp[13..15].parse::<u32>().map_err(|_| invalid())?;

    let rest = &timestamp[15..];
    let (microsecond, offset_str) = if rest.len() >= 6 && rest[..6].bytes().all(|b| b.is_ascii_digit()) {
        (rest[..6].parse::<u32>().map_err(|_| invalid())?, &rest[6..])
    } else {
        (0, rest)
    };

    let offset_seconds = match offset_str {
        "" | "Z" | "z" => 0,
        _ => {
            if offset_str.len() != 5 {
                return Err(invalid());
            }
            let sign = match &offset_str[..1] {
                "+" => 1,
                "-" => -1,
                _ => return Err(invalid()),
            };
            let hours = offset_str[1..3].parse::<i32>().map_err(|_| invalid())?;
            let minutes = offset_str[3..5].parse::<i32>().map_err(|_| invalid())?;
            sign * (hours * 3600 + minutes * 60)
        }
    };
    let tz = FixedOffset::east_opt(offset_seconds).ok_or_else(invalid)?;

    let time = tz
        .with_ymd_and_hms(year, month, day, hour, minute, second)
        .single()
        .ok_or_else(invalid)?
        .with_nanosecond(microsecond * 1000)
        .ok_or_else(invalid)?;

    Ok(time.with_timezone(&Utc))
}

/// Microseconds since the Unix epoch, UTC. The box index compares times
/// through this representation, never through the string form.
pub fn unix_micros(time: &DateTime<Utc>) -> i64 {
    time.timestamp_micros()
}
