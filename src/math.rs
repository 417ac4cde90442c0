//! Fixed-point price conversion.
//!
//! Prices are `(mantissa, exponent)` pairs meaning `mantissa * 10^exponent`.
//! Every operation is carried out exactly on big integers and truncated to an
//! integer mantissa at the target exponent; nothing here rounds.

use num_bigint::BigUint;
use num_traits::{ToPrimitive, Zero};

use crate::error::ConversionError;
use crate::types::Exponent;

/// Computes a median over a set of prices; `None` for an empty set.
pub type Medianizer = fn(&[u64]) -> Option<u64>;

/// Reciprocal of `price * 10^exponent`, expressed at the same exponent.
/// A zero price inverts to zero.
pub fn invert(price: u64, exponent: Exponent) -> Result<u64, ConversionError> {
    if price == 0 {
        return Ok(0);
    }
    // (1 / (p * 10^e)) / 10^e = 10^(-2e) / p
    scaled_quotient(
        BigUint::from(1u8),
        BigUint::from(price),
        -2 * i64::from(exponent),
    )
}

/// Product of two prices, expressed at `exponent`.
///
/// The price's own exponent cancels out, so only the adjusting exponent scales
/// the result.
pub fn multiply(
    price: u64,
    _exponent: Exponent,
    adjust_price: u64,
    adjust_exponent: Exponent,
) -> Result<u64, ConversionError> {
    // (p * 10^e) * (a * 10^ae) / 10^e = p * a * 10^ae
    scaled_quotient(
        BigUint::from(price) * BigUint::from(adjust_price),
        BigUint::from(1u8),
        i64::from(adjust_exponent),
    )
}

/// `adjust_price / price`, expressed at `exponent`. A zero price divides to zero.
pub fn divide(
    adjust_price: u64,
    adjust_exponent: Exponent,
    price: u64,
    exponent: Exponent,
) -> Result<u64, ConversionError> {
    if price == 0 {
        return Ok(0);
    }
    // (a * 10^ae) / (p * 10^e) / 10^e = a * 10^(ae - 2e) / p
    scaled_quotient(
        BigUint::from(adjust_price),
        BigUint::from(price),
        i64::from(adjust_exponent) - 2 * i64::from(exponent),
    )
}

/// Numerators and denominators stay below `10^40`, so any larger scale either
/// overflows `u64` or truncates to zero.
const MAX_SCALE: u64 = 64;

/// Truncated `numerator * 10^pow10 / denominator`.
fn scaled_quotient(
    mut numerator: BigUint,
    mut denominator: BigUint,
    pow10: i64,
) -> Result<u64, ConversionError> {
    if denominator.is_zero() || numerator.is_zero() {
        return Ok(0);
    }
    let magnitude = pow10.unsigned_abs();
    if magnitude > MAX_SCALE {
        return if pow10 > 0 {
            Err(ConversionError::Overflow)
        } else {
            Ok(0)
        };
    }
    // bounded by MAX_SCALE above
    let magnitude = magnitude as u32;
    let scale = BigUint::from(10u8).pow(magnitude);
    if pow10 >= 0 {
        numerator *= scale;
    } else {
        denominator *= scale;
    }
    (numerator / denominator)
        .to_u64()
        .ok_or(ConversionError::Overflow)
}

/// Lossy float rendering for logs only.
pub fn price_to_f64(price: u64, exponent: Exponent) -> f64 {
    price as f64 * 10f64.powi(exponent)
}

/// Median of a set of prices. For an even count this is the truncated mean of
/// the two middle values, computed without overflow.
pub fn median(values: &[u64]) -> Option<u64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        return Some(sorted[mid]);
    }
    let (a, b) = (sorted[mid - 1], sorted[mid]);
    Some(a / 2 + b / 2 + (a % 2 + b % 2) / 2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multiply_example() {
        assert_eq!(
            multiply(2_920_310_000, -5, 999_765_000, -9).unwrap(),
            2_919_623_727
        );
    }

    #[test]
    fn test_multiply_truncates() {
        // 1.5 * 0.99 = 1.485 at exponent -2 -> 148
        assert_eq!(multiply(150, -2, 99, -2).unwrap(), 148);
        // 1.99 * 0.5 = 0.995 at exponent -2 -> 99
        assert_eq!(multiply(199, -2, 5, -1).unwrap(), 99);
    }

    #[test]
    fn test_multiply_positive_exponents() {
        // 20 * 10^2 = 2000 ; 3 * 10^1 = 30 ; 60000 at exponent 2 -> 600
        assert_eq!(multiply(20, 2, 3, 1).unwrap(), 600);
    }

    #[test]
    fn test_multiply_overflow() {
        assert_eq!(
            multiply(u64::MAX, 0, 10, 0).unwrap_err(),
            ConversionError::Overflow
        );
    }

    #[test]
    fn test_invert() {
        // 2.0 -> 0.5 at exponent -1
        assert_eq!(invert(20, -1).unwrap(), 5);
        // 3.0 -> 0.333.. at exponent -6 -> 333333 (truncated)
        assert_eq!(invert(3_000_000, -6).unwrap(), 333_333);
        // 0.000001 -> 1_000_000.000000 at exponent -6
        assert_eq!(invert(1, -6).unwrap(), 1_000_000_000_000);
        assert_eq!(invert(0, -6).unwrap(), 0);
    }

    #[test]
    fn test_invert_overflow() {
        assert_eq!(invert(1, -10).unwrap_err(), ConversionError::Overflow);
    }

    #[test]
    fn test_invert_then_multiply_is_unity() {
        for (price, exponent) in [(999_765_000u64, -9), (7, -2), (4, -1)] {
            let inverted = invert(price, exponent).unwrap();
            let product = multiply(inverted, exponent, price, exponent).unwrap();
            let one = 10u64.pow(exponent.unsigned_abs());
            // truncation only ever loses value
            assert!(product <= one, "{product} > {one}");
            assert!(product * 100 >= one * 98, "{price}e{exponent}: {product}");
        }
    }

    #[test]
    fn test_extreme_exponents_short_circuit() {
        assert_eq!(
            invert(1, -1_000_000_000).unwrap_err(),
            ConversionError::Overflow
        );
        assert_eq!(invert(1, 1_000_000_000).unwrap(), 0);
        assert_eq!(
            multiply(1, -5, 1, i32::MAX).unwrap_err(),
            ConversionError::Overflow
        );
        assert_eq!(multiply(0, -5, 1, i32::MAX).unwrap(), 0);
        assert_eq!(divide(u64::MAX, i32::MIN, 1, 0).unwrap(), 0);
    }

    #[test]
    fn test_divide() {
        // 1.0 / 2.0 = 0.5 at exponent -2 -> 50
        assert_eq!(divide(1_000_000_000, -9, 200, -2).unwrap(), 50);
        // 3 / 7 = 0.428571.. at exponent -6 -> 428571
        assert_eq!(divide(3, 0, 7_000_000, -6).unwrap(), 428_571);
        assert_eq!(divide(5, -2, 0, -2).unwrap(), 0);
    }

    #[test]
    fn test_divide_matches_invert_for_unit_adjustment() {
        // dividing 1.0 by a price is the same as inverting it
        let price = 2_920_310_000;
        assert_eq!(
            divide(1_000_000_000, -9, price, -5).unwrap(),
            invert(price, -5).unwrap()
        );
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&[]), None);
        assert_eq!(median(&[5]), Some(5));
        assert_eq!(median(&[9, 1, 5]), Some(5));
        assert_eq!(median(&[1, 2, 3, 4]), Some(2));
        assert_eq!(median(&[3, 4]), Some(3));
        assert_eq!(median(&[5, 5]), Some(5));
        assert_eq!(median(&[u64::MAX, u64::MAX - 2]), Some(u64::MAX - 1));
    }

    #[test]
    fn test_price_to_f64() {
        assert!((price_to_f64(2_920_310_000, -5) - 29_203.1).abs() < 1e-6);
    }
}
