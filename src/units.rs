//! Fixed-point helpers for uint256 ledger values.
//!
//! Ledger amounts and prices are 18-decimal integers; oracle answers usually carry 8.

use num_bigint::BigUint;

/// Decimals used by the ledger for amounts and `finishBet` prices.
pub const LEDGER_DECIMALS: u32 = 18;

/// Move a fixed-point integer from `from` decimals to `to` decimals.
///
/// Scaling down truncates toward zero.
pub fn rescale(value: &BigUint, from: u32, to: u32) -> BigUint {
    if to >= from {
        value * BigUint::from(10u32).pow(to - from)
    } else {
        value / BigUint::from(10u32).pow(from - to)
    }
}

/// Render a fixed-point integer as a decimal string ("1.5", "0.000001", "42").
pub fn format_units(value: &BigUint, decimals: u32) -> String {
    let digits = value.to_str_radix(10);
    if decimals == 0 {
        return digits;
    }
    let decimals = decimals as usize;
    let padded = if digits.len() <= decimals {
        format!("{}{}", "0".repeat(decimals + 1 - digits.len()), digits)
    } else {
        digits
    };
    let (whole, frac) = padded.split_at(padded.len() - decimals);
    let frac = frac.trim_end_matches('0');
    if frac.is_empty() {
        whole.to_string()
    } else {
        format!("{}.{}", whole, frac)
    }
}

/// Parse a base-10 unsigned integer. Rejects signs, whitespace and separators.
pub fn parse_uint(s: &str) -> Option<BigUint> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    BigUint::parse_bytes(s.as_bytes(), 10)
}

/// Parse a decimal number ("1850.50", "0.5", "42") into a fixed-point integer
/// with `decimals` places. Fraction digits past `decimals` are truncated.
pub fn parse_units(s: &str, decimals: u32) -> Option<BigUint> {
    let (whole, frac) = s.split_once('.').unwrap_or((s, ""));
    let is_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
    if (whole.is_empty() && frac.is_empty()) || !is_digits(whole) || !is_digits(frac) {
        return None;
    }

    let frac = &frac[..frac.len().min(decimals as usize)];
    let mut digits = String::with_capacity(whole.len() + decimals as usize);
    digits.push_str(whole);
    digits.push_str(frac);
    digits.extend(std::iter::repeat('0').take(decimals as usize - frac.len()));
    BigUint::parse_bytes(digits.as_bytes(), 10)
}

/// Serde adapter: `BigUint` as a decimal string.
pub mod decimal_string {
    use num_bigint::BigUint;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &BigUint, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_str_radix(10))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BigUint, D::Error> {
        let s = String::deserialize(deserializer)?;
        super::parse_uint(&s).ok_or_else(|| de::Error::custom(format!("not a uint: {:?}", s)))
    }
}

/// Serde adapter: `Option<BigUint>` as a decimal string or null.
pub mod option_decimal_string {
    use num_bigint::BigUint;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<BigUint>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => serializer.serialize_str(&v.to_str_radix(10)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<BigUint>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(s) => super::parse_uint(&s)
                .map(Some)
                .ok_or_else(|| de::Error::custom(format!("not a uint: {:?}", s))),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rescale_oracle_to_ledger() {
        // 1850.12345678 at 8 decimals
        let answer = BigUint::from(185_012_345_678u64);
        let scaled = rescale(&answer, 8, LEDGER_DECIMALS);
        assert_eq!(scaled.to_str_radix(10), "1850123456780000000000");
        assert_eq!(rescale(&scaled, LEDGER_DECIMALS, 8), answer);
    }

    #[test]
    fn test_rescale_down_truncates() {
        let v = BigUint::from(1_999u32);
        assert_eq!(rescale(&v, 3, 0), BigUint::from(1u32));
    }

    #[test]
    fn test_format_units() {
        let one_and_half = BigUint::from(1_500_000_000_000_000_000u64);
        assert_eq!(format_units(&one_and_half, 18), "1.5");
        assert_eq!(format_units(&BigUint::from(1u32), 6), "0.000001");
        assert_eq!(format_units(&BigUint::from(42u32), 0), "42");
        assert_eq!(format_units(&BigUint::from(0u32), 18), "0");
    }

    #[test]
    fn test_parse_uint_rejects_non_digits() {
        assert_eq!(parse_uint("1000"), Some(BigUint::from(1000u32)));
        assert!(parse_uint("").is_none());
        assert!(parse_uint("-1").is_none());
        assert!(parse_uint("1.5").is_none());
        assert!(parse_uint("abc").is_none());
    }

    #[test]
    fn test_parse_units() {
        assert_eq!(
            parse_units("1850.50", 18).unwrap().to_str_radix(10),
            "1850500000000000000000"
        );
        assert_eq!(parse_units("42", 2), Some(BigUint::from(4200u32)));
        assert_eq!(parse_units(".5", 1), Some(BigUint::from(5u32)));
        assert_eq!(parse_units("7.", 0), Some(BigUint::from(7u32)));
        assert_eq!(parse_units("1.239", 2), Some(BigUint::from(123u32)));
        assert!(parse_units(".", 18).is_none());
        assert!(parse_units("1.2.3", 18).is_none());
        assert!(parse_units("-1.5", 18).is_none());
        assert!(parse_units("1,850.50", 18).is_none());
    }
}
