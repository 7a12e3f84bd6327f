// src/dates.rs

use time::Date;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;

use crate::error::DateError;

const ISO: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");
const PORTAL: &[BorrowedFormatItem<'static>] = format_description!("[month]/[day]/[year]");
const PORTAL_UNPADDED: &[BorrowedFormatItem<'static>] =
    format_description!("[month padding:none]/[day padding:none]/[year]");

/// Inclusive invoice date window, as given on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    from: Date,
    to: Date,
}

impl DateRange {
    pub fn parse(from: &str, to: &str) -> Result<Self, DateError> {
        Self::new(parse_iso(from)?, parse_iso(to)?)
    }

    pub fn new(from: Date, to: Date) -> Result<Self, DateError> {
        if from > to {
            return Err(DateError::Inverted {
                from: format_iso(from),
                to: format_iso(to),
            });
        }
        Ok(Self { from, to })
    }

    /// Both bounds in the portal's filter format.
    pub fn portal_bounds(&self) -> (String, String) {
        (format_portal(self.from), format_portal(self.to))
    }
}

pub fn parse_iso(text: &str) -> Result<Date, DateError> {
    Date::parse(text.trim(), ISO).map_err(|_| DateError::InvalidIso(text.to_string()))
}

pub fn format_iso(date: Date) -> String {
    // the ISO description only fails for years outside four digits
    date.format(ISO).unwrap_or_else(|_| date.to_string())
}

/// `MM/DD/YYYY`, the form the portal's filter fields expect.
pub fn format_portal(date: Date) -> String {
    date.format(PORTAL).unwrap_or_else(|_| date.to_string())
}

/// Dates as the portal prints them: `MM/DD/YYYY` (padded or not) or ISO.
pub fn parse_portal(text: &str) -> Option<Date> {
    let text = text.trim();
    [PORTAL, PORTAL_UNPADDED, ISO]
        .into_iter()
        .find_map(|format| Date::parse(text, format).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    fn to_portal_date(iso: &str) -> Result<String, DateError> {
        parse_iso(iso).map(format_portal)
    }

    #[test]
    fn iso_to_portal_format() {
        assert_eq!(to_portal_date("2024-03-05").unwrap(), "03/05/2024");
        assert_eq!(to_portal_date("2023-12-31").unwrap(), "12/31/2023");
    }

    #[test]
    fn portal_format_reparses_to_same_day() {
        let portal = to_portal_date("2024-03-05").unwrap();
        assert_eq!(parse_portal(&portal), Some(date!(2024 - 03 - 05)));
    }

    #[test]
    fn rejects_non_iso_input() {
        assert_eq!(
            to_portal_date("03/05/2024"),
            Err(DateError::InvalidIso("03/05/2024".into()))
        );
        assert!(to_portal_date("2024-02-30").is_err());
    }

    #[test]
    fn portal_dates_accept_unpadded_and_iso() {
        assert_eq!(parse_portal("3/5/2024"), Some(date!(2024 - 03 - 05)));
        assert_eq!(parse_portal(" 2024-03-05 "), Some(date!(2024 - 03 - 05)));
        assert_eq!(parse_portal("not a date"), None);
    }

    #[test]
    fn range_bounds_in_portal_format() {
        let range = DateRange::parse("2023-12-31", "2024-03-05").unwrap();
        assert_eq!(
            range.portal_bounds(),
            ("12/31/2023".to_string(), "03/05/2024".to_string())
        );
    }

    #[test]
    fn range_must_be_ordered() {
        assert!(DateRange::parse("2024-01-01", "2024-01-31").is_ok());
        assert!(DateRange::parse("2024-01-01", "2024-01-01").is_ok());
        assert_eq!(
            DateRange::parse("2024-02-01", "2024-01-31"),
            Err(DateError::Inverted {
                from: "2024-02-01".into(),
                to: "2024-01-31".into()
            })
        );
    }
}
