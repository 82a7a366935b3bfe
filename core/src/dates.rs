use time::{
    format_description::well_known::Rfc3339, macros::format_description, Date, OffsetDateTime,
    UtcOffset,
};

use crate::error::{RideError, Result};

pub const UNKNOWN_DATE: &str = "Unknown Date and Time";

/// `November 25, 2023 at 3:00 PM` in the given offset.
pub fn long_date(at: OffsetDateTime, offset: UtcOffset) -> String {
    at.to_offset(offset)
        .format(format_description!(
            "[month repr:long] [day padding:none], [year] at [hour repr:12 padding:none]:[minute] [period]"
        ))
        .unwrap_or_else(|_| UNKNOWN_DATE.to_string())
}

/// `3:00 PM` in the given offset.
pub fn time_label(at: OffsetDateTime, offset: UtcOffset) -> String {
    at.to_offset(offset)
        .format(format_description!(
            "[hour repr:12 padding:none]:[minute] [period]"
        ))
        .unwrap_or_default()
}

/// Parse `+02:00`, `-07:00`, `Z` or `UTC`.
pub fn parse_offset(s: &str) -> Result<UtcOffset> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("z") || s.eq_ignore_ascii_case("utc") {
        return Ok(UtcOffset::UTC);
    }
    UtcOffset::parse(
        s,
        format_description!("[offset_hour sign:mandatory]:[offset_minute]"),
    )
    .map_err(|_| RideError::Invalid(format!("invalid UTC offset `{s}`")))
}

/// Parse an RFC 3339 timestamp and normalize it to UTC.
pub fn parse_timestamp(s: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(s.trim(), &Rfc3339)
        .map(|at| at.to_offset(UtcOffset::UTC))
        .map_err(|_| RideError::Invalid(format!("invalid timestamp `{s}`, expected RFC 3339")))
}

/// Parse a calendar date such as `2023-11-25`.
pub fn parse_date(s: &str) -> Result<Date> {
    Date::parse(s.trim(), format_description!("[year]-[month]-[day]"))
        .map_err(|_| RideError::Invalid(format!("invalid date `{s}`, expected YYYY-MM-DD")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{date, datetime, offset};

    #[test]
    fn long_form_in_display_offset() {
        let at = datetime!(2023-11-25 22:00 UTC);
        assert_eq!(long_date(at, UtcOffset::UTC), "November 25, 2023 at 10:00 PM");
        assert_eq!(long_date(at, offset!(-7)), "November 25, 2023 at 3:00 PM");
        assert_eq!(time_label(at, offset!(+1)), "11:00 PM");
        assert_eq!(time_label(datetime!(2023-11-26 09:05 UTC), UtcOffset::UTC), "9:05 AM");
    }

    #[test]
    fn parses_inputs() {
        assert_eq!(parse_offset("UTC").unwrap(), UtcOffset::UTC);
        assert_eq!(parse_offset("-07:00").unwrap(), offset!(-7));
        assert!(parse_offset("seven").is_err());
        assert_eq!(
            parse_timestamp("2023-11-25T15:00:00-07:00").unwrap(),
            datetime!(2023-11-25 22:00 UTC)
        );
        assert!(parse_timestamp("Nov 2").is_err());
        assert_eq!(parse_date("2023-11-25").unwrap(), date!(2023 - 11 - 25));
    }
}
