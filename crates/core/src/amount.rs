//! Conversions between base units and decimal UNM strings.

use crate::params::{COIN, DECIMALS};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountError {
    #[error("empty amount")]
    Empty,
    #[error("invalid amount: {0}")]
    Invalid(String),
    #[error("more than {DECIMALS} decimal places")]
    TooPrecise,
    #[error("amount overflows")]
    Overflow,
}

/// Render base units as `whole.fraction` UNM, trimming trailing zeros.
pub fn format_amount(units: u64) -> String {
    let whole = units / COIN;
    let frac = units % COIN;
    if frac == 0 {
        return whole.to_string();
    }
    let frac = format!("{:0width$}", frac, width = DECIMALS as usize);
    format!("{}.{}", whole, frac.trim_end_matches('0'))
}

/// Parse a decimal UNM string into base units.
pub fn parse_amount(s: &str) -> Result<u64, AmountError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(AmountError::Empty);
    }
    let (whole, frac) = s.split_once('.').unwrap_or((s, ""));
    if frac.len() > DECIMALS as usize {
        return Err(AmountError::TooPrecise);
    }
    let all_digits = |p: &str| p.chars().all(|c| c.is_ascii_digit());
    if (whole.is_empty() && frac.is_empty()) || !all_digits(whole) || !all_digits(frac) {
        return Err(AmountError::Invalid(s.to_string()));
    }

    let whole: u64 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| AmountError::Overflow)?
    };
    let frac: u64 = if frac.is_empty() {
        0
    } else {
        let padded = format!("{:0<width$}", frac, width = DECIMALS as usize);
        padded.parse().map_err(|_| AmountError::Invalid(s.to_string()))?
    };

    whole
        .checked_mul(COIN)
        .and_then(|w| w.checked_add(frac))
        .ok_or(AmountError::Overflow)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(0), "0");
        assert_eq!(format_amount(40 * COIN), "40");
        assert_eq!(format_amount(50_000_000), "0.5");
        assert_eq!(format_amount(25_000_001), "0.25000001");
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("59").unwrap(), 59 * COIN);
        assert_eq!(parse_amount("0.25").unwrap(), 25_000_000);
        assert_eq!(parse_amount(".5").unwrap(), 50_000_000);
        assert_eq!(parse_amount("1.000000001"), Err(AmountError::TooPrecise));
        assert!(matches!(parse_amount("1e5"), Err(AmountError::Invalid(_))));
        assert_eq!(parse_amount("99999999999999"), Err(AmountError::Overflow));
        assert_eq!(parse_amount(""), Err(AmountError::Empty));
    }
}
