//! Holder age rules derived from the Italian fiscal code.
//!
//! The fiscal code encodes the birth date:
//!
//! ```text
//! RSSMRA 85 T 10 A562 S
//!        yy m dd
//! ```
//!
//! Digits may be replaced by letters (omocodia) when two people would
//! otherwise share a code. Women have 40 added to the day.

use chrono::{Datelike, Months, NaiveDate};

/// The main card is valid until the holder's 36th birthday.
pub const CGN_UPPER_BOUND_AGE: u32 = 36;

const MONTH_CODES: [char; 12] = ['A', 'B', 'C', 'D', 'E', 'H', 'L', 'M', 'P', 'R', 'S', 'T'];
const OMOCODIA: [char; 10] = ['L', 'M', 'N', 'P', 'Q', 'R', 'S', 'T', 'U', 'V'];

fn digit(c: char) -> Option<u32> {
    c.to_digit(10).or_else(|| {
        OMOCODIA
            .iter()
            .position(|o| *o == c)
            .and_then(|p| u32::try_from(p).ok())
    })
}

fn number(chars: &[char]) -> Option<u32> {
    chars
        .iter()
        .try_fold(0u32, |acc, c| Some(acc * 10 + digit(*c)?))
}

/// Birth date encoded in `fiscal_code`.
///
/// Two-digit years after `today`'s are read as 1900s.
pub fn birth_date(fiscal_code: &str, today: NaiveDate) -> Option<NaiveDate> {
    let chars = fiscal_code.to_ascii_uppercase().chars().collect::<Vec<_>>();
    if chars.len() != 16 {
        return None;
    }

    let yy = number(&chars[6..8])?;
    let month = MONTH_CODES.iter().position(|m| *m == chars[8])?;
    let day = number(&chars[9..11])?;
    let day = if day > 40 { day - 40 } else { day };

    let current_yy = u32::try_from(today.year().rem_euclid(100)).ok()?;
    let century = if yy > current_yy { 1900 } else { 2000 };
    let year = i32::try_from(century + yy).ok()?;
    let month = u32::try_from(month + 1).ok()?;

    NaiveDate::from_ymd_opt(year, month, day)
}

/// Whole years between `birth` and `today`.
pub fn age_on(birth: NaiveDate, today: NaiveDate) -> u32 {
    let mut years = today.year() - birth.year();
    if (today.month(), today.day()) < (birth.month(), birth.day()) {
        years -= 1;
    }
    u32::try_from(years).unwrap_or(0)
}

/// Whether the holder qualifies for the EYCA card on `today`.
pub fn is_eyca_eligible(fiscal_code: &str, today: NaiveDate, age_limit: u32) -> bool {
    birth_date(fiscal_code, today).is_some_and(|birth| age_on(birth, today) < age_limit)
}

/// The holder's `age`th birthday.
pub fn birthday_at(birth: NaiveDate, age: u32) -> Option<NaiveDate> {
    birth.checked_add_months(Months::new(age.saturating_mul(12)))
}

/// Expiration date of a card valid until the `age`th birthday.
///
/// Falls back to `age` years after `today` when the code carries no
/// readable birth date.
pub fn expiration_date(fiscal_code: &str, today: NaiveDate, age: u32) -> NaiveDate {
    birth_date(fiscal_code, today)
        .and_then(|birth| birthday_at(birth, age))
        .or_else(|| birthday_at(today, age))
        .unwrap_or(today)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_birth_date_male() {
        let today = date(2024, 6, 1);
        assert_eq!(birth_date("RSSMRA85T10A562S", today), Some(date(1985, 12, 10)));
    }

    #[test]
    fn test_birth_date_female_adds_forty() {
        let today = date(2024, 6, 1);
        assert_eq!(birth_date("RSSMRA01A41H501Z", today), Some(date(2001, 1, 1)));
    }

    #[test]
    fn test_birth_date_omocodia() {
        let today = date(2024, 6, 1);
        // 'M' for 1 and 'Q' for 4 in the year digits.
        assert_eq!(birth_date("RSSMRA0MA41H501Z", today), Some(date(2001, 1, 1)));
        assert_eq!(birth_date("RSSMRAQMA41H501Z", today), Some(date(1941, 1, 1)));
    }

    #[test]
    fn test_birth_date_rejects_garbage() {
        let today = date(2024, 6, 1);
        assert_eq!(birth_date("SHORT", today), None);
        assert_eq!(birth_date("RSSMRA85Z10A562S", today), None);
        assert_eq!(birth_date("RSSMRA85B31A562S", today), None);
    }

    #[test]
    fn test_age_on_birthday_boundary() {
        let birth = date(1993, 6, 2);
        assert_eq!(age_on(birth, date(2024, 6, 1)), 30);
        assert_eq!(age_on(birth, date(2024, 6, 2)), 31);
    }

    #[test]
    fn test_eyca_eligibility() {
        let today = date(2024, 6, 1);
        assert!(is_eyca_eligible("RSSMRA01A41H501Z", today, 31));
        assert!(!is_eyca_eligible("RSSMRA85T10A562S", today, 31));
        assert!(!is_eyca_eligible("NOT-A-CODE", today, 31));
    }

    #[test]
    fn test_expiration_date_is_birthday() {
        let today = date(2024, 6, 1);
        assert_eq!(
            expiration_date("RSSMRA01A41H501Z", today, CGN_UPPER_BOUND_AGE),
            date(2037, 1, 1)
        );
        assert_eq!(expiration_date("NOT-A-CODE", today, 36), date(2060, 6, 1));
    }
}
