//! Parsing helpers for values read from control replies and test parameters.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid integer literal: {0:?}")]
pub struct ParseIntError(pub String);

/// Parse an integer, choosing the base from its prefix.
///
/// `0x`/`0o`/`0b` select hex, octal and binary; anything else is decimal.
/// A decimal literal may not have leading zeros (except zero itself).
/// Single underscores may separate digits, and may follow a base prefix.
pub fn parse_int_auto(s: &str) -> Result<i128, ParseIntError> {
    let err = || ParseIntError(s.to_string());
    let trimmed = s.trim();
    let (negative, body) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };

    let lower = body.to_ascii_lowercase();
    let (radix, digits) = if let Some(d) = lower.strip_prefix("0x") {
        (16, d.strip_prefix('_').unwrap_or(d))
    } else if let Some(d) = lower.strip_prefix("0o") {
        (8, d.strip_prefix('_').unwrap_or(d))
    } else if let Some(d) = lower.strip_prefix("0b") {
        (2, d.strip_prefix('_').unwrap_or(d))
    } else {
        (10, lower.as_str())
    };

    let digits = strip_digit_separators(digits).ok_or_else(err)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Err(err());
    }
    let leading_zero = digits.len() > 1 && digits.starts_with('0');
    if radix == 10 && leading_zero && digits.bytes().any(|b| b != b'0') {
        return Err(err());
    }
    let value = i128::from_str_radix(&digits, radix).map_err(|_| err())?;
    Ok(if negative { -value } else { value })
}

/// Remove `_` digit separators. `None` if one leads, trails or repeats.
fn strip_digit_separators(digits: &str) -> Option<String> {
    if digits.starts_with('_') || digits.ends_with('_') || digits.contains("__") {
        return None;
    }
    Some(digits.replace('_', ""))
}

/// Parse a boolean test parameter.
///
/// Integers in any supported base are accepted (non-zero is true), then
/// the literals `True` and `False`. Anything else yields the integer error.
pub fn parse_bool(s: &str) -> Result<bool, ParseIntError> {
    let s = s.trim();
    match parse_int_auto(s) {
        Ok(v) => Ok(v != 0),
        Err(e) => match s {
            "True" => Ok(true),
            "False" => Ok(false),
            _ => Err(e),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bools_from_numbers_and_literals() {
        assert_eq!(parse_bool("1"), Ok(true));
        assert_eq!(parse_bool("0"), Ok(false));
        assert_eq!(parse_bool("0x1"), Ok(true));
        assert_eq!(parse_bool("0x0"), Ok(false));
        assert_eq!(parse_bool(" 2 "), Ok(true));
        assert_eq!(parse_bool("True"), Ok(true));
        assert_eq!(parse_bool("False"), Ok(false));
    }

    #[test]
    fn bools_reject_other_strings_with_int_error() {
        assert_eq!(parse_bool("yes"), Err(ParseIntError("yes".into())));
        assert_eq!(parse_bool("true"), Err(ParseIntError("true".into())));
        assert!(parse_bool("").is_err());
    }

    #[test]
    fn integer_bases() {
        assert_eq!(parse_int_auto("0x8000000000000000"), Ok(0x8000000000000000));
        assert_eq!(parse_int_auto("0o17"), Ok(15));
        assert_eq!(parse_int_auto("0b101"), Ok(5));
        assert_eq!(parse_int_auto("-42"), Ok(-42));
        assert_eq!(parse_int_auto("000"), Ok(0));
        assert!(parse_int_auto("010").is_err());
        assert!(parse_int_auto("0x").is_err());
        assert!(parse_int_auto("0x+5").is_err());
        assert!(parse_int_auto("12a").is_err());
    }

    #[test]
    fn digit_separators() {
        assert_eq!(parse_bool("1_0"), Ok(true));
        assert_eq!(parse_int_auto("1_000"), Ok(1000));
        assert_eq!(parse_int_auto("0x_ff"), Ok(255));
        assert_eq!(parse_int_auto("0b1_0"), Ok(2));
        assert_eq!(parse_int_auto("0_0"), Ok(0));
        for bad in ["_1", "1_", "1__0", "0x__1", "0x_", "0_7"] {
            assert_eq!(parse_int_auto(bad), Err(ParseIntError(bad.into())), "{bad}");
        }
    }
}
