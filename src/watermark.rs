//! Watermark handling and the date-partition path convention.
//!
//! The watermark marks the boundary between already-processed and
//! not-yet-processed export data. It is smuggled through the remote
//! rule's free-text `description` field, so parsing it must be total:
//! a malformed description is skipped, and a segment with no parseable
//! description falls back to a configured date.
//!
//! Export partitions are laid out as `<YYYY>/<MM>/<DD>/<token>/...`
//! where the token is a fixed-width, zero-padded 10-character string
//! beginning with HHMMSS. Fixed width makes lexicographic comparison
//! equal to chronological comparison, which the whole pipeline relies
//! on; everything token-shaped is kept in this module so that
//! assumption lives in one place.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::segment::Segment;

/// Format the rule description carries, e.g. "Mar 14, 2024 at 05:23:45".
pub const DISPLAY_FORMAT: &str = "%b %d, %Y at %H:%M:%S";

/// Display format with the literal " at" stripped, used for parsing.
const PARSE_FORMAT: &str = "%b %d, %Y %H:%M:%S";

/// Width of the partition time token.
pub const TIME_TOKEN_WIDTH: usize = 10;

/// Watermark extracted from a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extracted {
    /// The watermark instant (UTC).
    pub value: DateTime<Utc>,
    /// True when no rule description parsed and the fallback was used.
    pub used_fallback: bool,
}

/// Derive the watermark from a segment's rules.
///
/// Scans `rules[]` in order and returns the first description that
/// parses as the display format. Malformed descriptions are skipped,
/// never fatal. When nothing parses, midnight of `fallback` is used.
pub fn extract(segment: &Segment, fallback: NaiveDate) -> Extracted {
    for rule in &segment.rules {
        if let Some(parsed) = rule.description.as_deref().and_then(parse_display) {
            return Extracted {
                value: parsed,
                used_fallback: false,
            };
        }
    }

    Extracted {
        value: fallback.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc(),
        used_fallback: true,
    }
}

/// Parse a display-format timestamp, treating it as UTC.
///
/// The literal " at" is stripped before parsing, per the stored format.
pub fn parse_display(text: &str) -> Option<DateTime<Utc>> {
    let cleaned = text.replace(" at", "");
    NaiveDateTime::parse_from_str(cleaned.trim(), PARSE_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Render a watermark in the display format written back to the rule.
pub fn format_display(value: DateTime<Utc>) -> String {
    value.format(DISPLAY_FORMAT).to_string()
}

/// The inclusive sequence of UTC calendar days from the watermark's day
/// through `today`. Always contains at least one day (today), even when
/// the watermark is in the future relative to `today`.
pub fn days_through_today(watermark: DateTime<Utc>, today: NaiveDate) -> Vec<NaiveDate> {
    let start = watermark.date_naive();
    if start > today {
        return vec![today];
    }

    let mut days = Vec::new();
    let mut day = start;
    while day <= today {
        days.push(day);
        match day.succ_opt() {
            Some(next) => day = next,
            None => break,
        }
    }
    days
}

/// Partition prefix for one calendar day, e.g. "2024/01/02/".
pub fn day_prefix(day: NaiveDate) -> String {
    day.format("%Y/%m/%d/").to_string()
}

/// The watermark's time-of-day as a fixed-width token, e.g. "1230450000".
///
/// Second precision is all a watermark carries, so the sub-second pad is
/// zero; a partition token equal to this is already processed, anything
/// strictly greater is new.
pub fn bound_token(watermark: DateTime<Utc>) -> String {
    format!("{}0000", watermark.format("%H%M%S"))
}

/// Intra-day lower bound for a scanned day: the watermark's token on the
/// watermark's own day, unbounded (process the whole day) otherwise.
pub fn bound_for_day(watermark: DateTime<Utc>, day: NaiveDate) -> Option<String> {
    (day == watermark.date_naive()).then(|| bound_token(watermark))
}
