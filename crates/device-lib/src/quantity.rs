//! Kubernetes resource quantity parsing
//!
//! Converts quantity strings such as `2`, `500m`, `16Gi` or `1e3` into the
//! integer value Kubernetes reports for them, rounding fractional amounts
//! up (away from zero).

use crate::error::SyncError;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use std::collections::BTreeMap;

/// Integer value of a quantity
pub fn value(quantity: &Quantity) -> Option<i64> {
    parse(&quantity.0)
}

/// Convert a map of quantities (node status, container requests) into
/// integer values keyed by resource name
pub fn to_resource_list<'a, I>(quantities: I) -> Result<BTreeMap<String, i64>, SyncError>
where
    I: IntoIterator<Item = (&'a String, &'a Quantity)>,
{
    quantities
        .into_iter()
        .map(|(name, q)| {
            let v = value(q).ok_or_else(|| SyncError::Quantity {
                resource: name.clone(),
                value: q.0.clone(),
            })?;
            Ok((name.clone(), v))
        })
        .collect()
}

/// Parse a quantity string, returning `None` if it is malformed or does not
/// fit in an `i64`
pub fn parse(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    let (number, suffix) = split_number(raw)?;

    let (negative, digits) = match number.as_bytes().first()? {
        b'-' => (true, &number[1..]),
        b'+' => (false, &number[1..]),
        _ => (false, number),
    };

    let (int_part, frac_part) = match digits.split_once('.') {
        Some((i, f)) => (i, f),
        None => (digits, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }

    // mantissa * 10^exp10 * 2^exp2
    let mut mantissa: i128 = 0;
    for c in int_part.chars() {
        let d = c.to_digit(10)? as i128;
        mantissa = mantissa.checked_mul(10)?.checked_add(d)?;
    }
    // Fraction digits past i128 precision only matter for rounding up
    let mut kept_frac = 0i32;
    let mut dropped_nonzero = false;
    for c in frac_part.chars() {
        let d = c.to_digit(10)? as i128;
        match mantissa.checked_mul(10).and_then(|m| m.checked_add(d)) {
            Some(m) if !dropped_nonzero => {
                mantissa = m;
                kept_frac += 1;
            }
            _ => dropped_nonzero |= d != 0,
        }
    }
    let (exp10, exp2) = suffix_exponents(suffix)?;
    let exp10 = exp10 - kept_frac;

    let mut numerator = mantissa.checked_mul(1i128.checked_shl(exp2)?)?;
    let mut denominator: i128 = 1;
    if exp10 >= 0 {
        numerator = numerator.checked_mul(10i128.checked_pow(exp10 as u32)?)?;
    } else {
        match 10i128.checked_pow((-exp10) as u32) {
            Some(d) => denominator = d,
            // numerator < 10^39 <= denominator: the value lies in [0, 1)
            None => {
                let magnitude = i64::from(numerator != 0 || dropped_nonzero);
                return Some(if negative { -magnitude } else { magnitude });
            }
        }
    }

    let mut magnitude = numerator / denominator;
    if numerator % denominator != 0 || dropped_nonzero {
        magnitude += 1;
    }
    if negative {
        magnitude = -magnitude;
    }
    i64::try_from(magnitude).ok()
}

fn split_number(raw: &str) -> Option<(&str, &str)> {
    let end = raw
        .char_indices()
        .find(|(i, c)| !(c.is_ascii_digit() || *c == '.' || (*i == 0 && (*c == '-' || *c == '+'))))
        .map(|(i, _)| i)
        .unwrap_or(raw.len());
    if end == 0 {
        return None;
    }
    Some((&raw[..end], &raw[end..]))
}

/// Decimal and binary exponents for a suffix
fn suffix_exponents(suffix: &str) -> Option<(i32, u32)> {
    let exps = match suffix {
        "" => (0, 0),
        "n" => (-9, 0),
        "u" => (-6, 0),
        "m" => (-3, 0),
        "k" => (3, 0),
        "M" => (6, 0),
        "G" => (9, 0),
        "T" => (12, 0),
        "P" => (15, 0),
        "E" => (18, 0),
        "Ki" => (0, 10),
        "Mi" => (0, 20),
        "Gi" => (0, 30),
        "Ti" => (0, 40),
        "Pi" => (0, 50),
        "Ei" => (0, 60),
        s if s.starts_with('e') || s.starts_with('E') => {
            let exp: i32 = s[1..].parse().ok()?;
            (exp, 0)
        }
        _ => return None,
    };
    Some(exps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_integers() {
        assert_eq!(parse("2"), Some(2));
        assert_eq!(parse("0"), Some(0));
        assert_eq!(parse("+7"), Some(7));
        assert_eq!(parse("-3"), Some(-3));
    }

    #[test]
    fn test_decimal_suffixes() {
        assert_eq!(parse("4k"), Some(4_000));
        assert_eq!(parse("2M"), Some(2_000_000));
        assert_eq!(parse("1G"), Some(1_000_000_000));
        assert_eq!(parse("1E"), Some(1_000_000_000_000_000_000));
    }

    #[test]
    fn test_binary_suffixes() {
        assert_eq!(parse("1Ki"), Some(1024));
        assert_eq!(parse("16Gi"), Some(16 * 1024 * 1024 * 1024));
        assert_eq!(parse("1.5Gi"), Some(1610612736));
    }

    #[test]
    fn test_fractions_round_up() {
        assert_eq!(parse("100m"), Some(1));
        assert_eq!(parse("1500m"), Some(2));
        assert_eq!(parse("2000m"), Some(2));
        assert_eq!(parse("0.1"), Some(1));
        assert_eq!(parse("-100m"), Some(-1));
    }

    #[test]
    fn test_exponents() {
        assert_eq!(parse("1e3"), Some(1000));
        assert_eq!(parse("12E2"), Some(1200));
        assert_eq!(parse("5e-1"), Some(1));
    }

    #[test]
    fn test_tiny_values_round_up_to_one() {
        assert_eq!(parse("1e-50"), Some(1));
        assert_eq!(parse("-1e-50"), Some(-1));
        assert_eq!(parse("0e-50"), Some(0));
        assert_eq!(parse("0.0000000000000000000000000000000000000000001"), Some(1));
        assert_eq!(parse("0.1234567890123456789012345678901234567890123"), Some(1));
        assert_eq!(parse("2.0000000000000000000000000000000000000000000"), Some(2));
        assert_eq!(parse("2.0000000000000000000000000000000000000000001"), Some(3));
    }

    #[test]
    fn test_malformed() {
        assert_eq!(parse(""), None);
        assert_eq!(parse("abc"), None);
        assert_eq!(parse("1Xi"), None);
        assert_eq!(parse("."), None);
        assert_eq!(parse("99999999999E"), None);
    }

    #[test]
    fn test_resource_list_reports_bad_quantity() {
        let mut raw = BTreeMap::new();
        raw.insert("cpu".to_string(), Quantity("4".to_string()));
        raw.insert("gpu".to_string(), Quantity("lots".to_string()));

        let err = to_resource_list(&raw).unwrap_err();
        match err {
            SyncError::Quantity { resource, value } => {
                assert_eq!(resource, "gpu");
                assert_eq!(value, "lots");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
