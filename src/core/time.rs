use std::time::Duration;

use time::{format_description::well_known::Rfc3339, OffsetDateTime, PrimitiveDateTime};

pub(crate) fn primitive_now_utc() -> PrimitiveDateTime {
    let now = OffsetDateTime::now_utc();
    PrimitiveDateTime::new(now.date(), now.time())
}

pub(crate) fn format_primitive(value: PrimitiveDateTime) -> String {
    value.assume_utc().format(&Rfc3339).unwrap_or_else(|_| value.assume_utc().to_string())
}

/// Seconds elapsed between two UTC timestamps; negative spans clamp to zero.
pub(crate) fn elapsed_seconds(from: PrimitiveDateTime, to: PrimitiveDateTime) -> f64 {
    (to.assume_utc() - from.assume_utc()).as_seconds_f64().max(0.0)
}

pub(crate) fn subtract_std(value: PrimitiveDateTime, span: Duration) -> PrimitiveDateTime {
    let seconds = span.as_secs().min(i64::MAX as u64) as i64;
    value - time::Duration::seconds(seconds)
}
