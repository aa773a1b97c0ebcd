//! Money helpers
//!
//! Amounts are `Decimal` in memory and integer cents in SQLite.

use std::str::FromStr;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::{Error, Result};

/// Round to cents using half-away-from-zero
pub fn round_cents(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Largest absolute amount whose cents fit in an `i64`
pub fn max_amount() -> Decimal {
    Decimal::new(i64::MAX, 2)
}

/// Reject amounts that cannot be stored as integer cents
pub fn ensure_in_range(amount: Decimal) -> Result<Decimal> {
    if amount.abs() > max_amount() {
        return Err(Error::Validation(format!("Amount out of range: {}", amount)));
    }
    Ok(amount)
}

/// Convert an amount to integer cents for storage
pub fn to_cents(amount: Decimal) -> Result<i64> {
    round_cents(amount)
        .checked_mul(Decimal::ONE_HUNDRED)
        .and_then(|cents| cents.to_i64())
        .ok_or_else(|| Error::Validation(format!("Amount out of range: {}", amount)))
}

/// Convert stored cents back to an amount with two decimal places
pub fn from_cents(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

/// Percentage of `difference` relative to `base`, rounded to two places.
///
/// Zero when both are zero; 100 when only the base is zero.
pub fn percent_difference(difference: Decimal, base: Decimal) -> Decimal {
    let difference = difference.abs();
    if base.is_zero() {
        return if difference.is_zero() {
            Decimal::ZERO
        } else {
            Decimal::ONE_HUNDRED
        };
    }
    (difference * Decimal::ONE_HUNDRED / base.abs())
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Parse an amount string, handling currency symbols, thousands separators,
/// decimal commas and parenthesised negatives
pub fn parse_amount(s: &str) -> Result<Decimal> {
    let trimmed = s.trim();
    let parenthesised = trimmed.starts_with('(') && trimmed.ends_with(')');

    let mut cleaned: String = trimmed
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-' | '+'))
        .collect();

    let last_dot = cleaned.rfind('.');
    let last_comma = cleaned.rfind(',');
    cleaned = match (last_dot, last_comma) {
        // "1.234,56" vs "1,234.56": the last separator is the decimal point
        (Some(dot), Some(comma)) if comma > dot => cleaned.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => cleaned.replace(',', ""),
        (None, Some(comma)) => {
            let decimals = cleaned.len() - comma - 1;
            if cleaned.matches(',').count() == 1 && (1..=2).contains(&decimals) {
                cleaned.replace(',', ".")
            } else {
                cleaned.replace(',', "")
            }
        }
        (Some(_), None) if cleaned.matches('.').count() > 1 => cleaned.replace('.', ""),
        _ => cleaned,
    };

    if cleaned.is_empty() || cleaned == "-" || cleaned == "+" {
        return Err(Error::Validation(format!("Unable to parse amount: {}", s)));
    }

    let amount = Decimal::from_str(&cleaned)
        .map_err(|_| Error::Validation(format!("Unable to parse amount: {}", s)))?;

    Ok(if parenthesised { -amount.abs() } else { amount })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("1234.56").unwrap(), Decimal::new(123456, 2));
        assert_eq!(parse_amount("$1,234.56").unwrap(), Decimal::new(123456, 2));
        assert_eq!(parse_amount("-123.45").unwrap(), Decimal::new(-12345, 2));
        assert_eq!(parse_amount("(100.00)").unwrap(), Decimal::new(-10000, 2));
    }

    #[test]
    fn test_parse_amount_decimal_comma() {
        assert_eq!(parse_amount("R$ 1.234,56").unwrap(), Decimal::new(123456, 2));
        assert_eq!(parse_amount("-89,90").unwrap(), Decimal::new(-8990, 2));
        assert_eq!(parse_amount("1,234").unwrap(), Decimal::new(1234, 0));
    }

    #[test]
    fn test_parse_amount_invalid() {
        assert!(parse_amount("").is_err());
        assert!(parse_amount("abc").is_err());
        assert!(parse_amount("-").is_err());
    }

    #[test]
    fn test_cents_conversion() {
        assert_eq!(to_cents(Decimal::new(100000, 2)).unwrap(), 100000);
        assert_eq!(to_cents(Decimal::new(12345, 3)).unwrap(), 1235);
        assert_eq!(from_cents(95000), Decimal::new(950, 0));
        assert_eq!(from_cents(95000).to_string(), "950.00");
    }

    #[test]
    fn test_cents_overflow_is_validation_error() {
        let huge = parse_amount("10000000000000000000000000000").unwrap();
        assert!(matches!(to_cents(huge), Err(Error::Validation(_))));
        assert!(matches!(ensure_in_range(huge), Err(Error::Validation(_))));
        assert!(matches!(ensure_in_range(-huge), Err(Error::Validation(_))));

        assert_eq!(to_cents(max_amount()).unwrap(), i64::MAX);
        assert!(ensure_in_range(max_amount()).is_ok());
    }

    #[test]
    fn test_percent_difference() {
        let pct = percent_difference(Decimal::new(50, 0), Decimal::new(950, 0));
        assert_eq!(pct, Decimal::new(526, 2));
        assert_eq!(
            percent_difference(Decimal::ZERO, Decimal::ZERO),
            Decimal::ZERO
        );
        assert_eq!(
            percent_difference(Decimal::ONE, Decimal::ZERO),
            Decimal::ONE_HUNDRED
        );
    }
}
