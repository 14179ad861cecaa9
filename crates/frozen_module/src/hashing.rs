//! Static hashability analysis
//!
//! A hash may be baked into a static initializer only if the host runtime
//! computes the same value on every run. String and bytes hashes are salted
//! per process, so anything that contains them has to be hashed at startup.
//! Numeric hashes are fully determined by the value and are reproduced here
//! bit for bit.

use num_bigint::{BigInt, Sign};
use num_traits::ToPrimitive;

use crate::value::Value;

const HASH_BITS: u32 = 61;
const HASH_MODULUS: u64 = (1 << HASH_BITS) - 1;
const HASH_INF: i64 = 314_159;
const HASH_NAN: i64 = 0;
const HASH_IMAG: u64 = 1_000_003;

/// Hashes of the singletons whose host hash is address-derived
///
/// A stock host build seeds these from object addresses, so they are only
/// known when the build pins them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SingletonHashes {
    pub none: Option<i64>,
    pub ellipsis: Option<i64>,
}

/// Whether the host hash of `value` is identical across runs
pub fn is_statically_hashable(value: &Value) -> bool {
    match value {
        Value::None
        | Value::Ellipsis
        | Value::Bool(_)
        | Value::Int(_)
        | Value::Float(_)
        | Value::Complex { .. } => true,
        Value::Tuple(items) | Value::FrozenSet(items) => items.iter().all(is_statically_hashable),
        Value::Bytes(_)
        | Value::Str(_)
        | Value::Code(_)
        | Value::List(_)
        | Value::Dict(_)
        | Value::Set(_) => false,
    }
}

/// Host hash of `value`, when it can be known at freeze time
///
/// Returns `None` when the value is not statically hashable, or when it
/// depends on a singleton hash that `singletons` does not pin.
pub fn static_hash(value: &Value, singletons: SingletonHashes) -> Option<i64> {
    match value {
        Value::None => singletons.none,
        Value::Ellipsis => singletons.ellipsis,
        Value::Bool(b) => Some(i64::from(*b)),
        Value::Int(i) => Some(int_hash(i)),
        Value::Float(f) => Some(float_hash(*f)),
        Value::Complex { real, imag } => Some(complex_hash(*real, *imag)),
        Value::Tuple(items) => {
            let hashes = items
                .iter()
                .map(|item| static_hash(item, singletons))
                .collect::<Option<Vec<_>>>()?;
            Some(tuple_hash(&hashes))
        }
        Value::FrozenSet(items) => {
            let hashes = items
                .iter()
                .map(|item| static_hash(item, singletons))
                .collect::<Option<Vec<_>>>()?;
            Some(frozenset_hash(&hashes))
        }
        Value::Bytes(_)
        | Value::Str(_)
        | Value::Code(_)
        | Value::List(_)
        | Value::Dict(_)
        | Value::Set(_) => None,
    }
}

fn finish(hash: u64) -> i64 {
    let hash = hash as i64;
    if hash == -1 { -2 } else { hash }
}

/// Integer hash: the magnitude reduced modulo 2**61 - 1, carrying the sign
pub fn int_hash(value: &BigInt) -> i64 {
    let (sign, magnitude) = value.clone().into_parts();
    let reduced = (magnitude % HASH_MODULUS)
        .to_u64()
        .unwrap_or_default();
    let hash = if sign == Sign::Minus {
        reduced.wrapping_neg()
    } else {
        reduced
    };
    finish(hash)
}

/// Split a finite, non-zero double into a mantissa in `[0.5, 1)` and exponent
fn frexp(value: f64) -> (f64, i32) {
    if value == 0.0 || !value.is_finite() {
        return (value, 0);
    }
    let bits = value.to_bits();
    let biased = ((bits >> 52) & 0x7ff) as i32;
    if biased == 0 {
        // Subnormal: scale into the normal range first
        let (mantissa, exponent) = frexp(value * f64::from_bits(0x43f0_0000_0000_0000));
        return (mantissa, exponent - 64);
    }
    let mantissa = f64::from_bits((bits & !(0x7ff << 52)) | (1022 << 52));
    (mantissa, biased - 1022)
}

/// Float hash, equal to the integer hash whenever the float is integral
pub fn float_hash(value: f64) -> i64 {
    if value.is_nan() {
        return HASH_NAN;
    }
    if value.is_infinite() {
        return if value > 0.0 { HASH_INF } else { -HASH_INF };
    }

    let (mut mantissa, mut exponent) = frexp(value);
    let negative = mantissa < 0.0;
    if negative {
        mantissa = -mantissa;
    }

    let mut x: u64 = 0;
    while mantissa != 0.0 {
        x = ((x << 28) & HASH_MODULUS) | (x >> (HASH_BITS - 28));
        mantissa *= 268_435_456.0;
        exponent -= 28;
        let digit = mantissa as u64;
        mantissa -= digit as f64;
        x += digit;
        if x >= HASH_MODULUS {
            x -= HASH_MODULUS;
        }
    }

    let bits = HASH_BITS as i32;
    let exponent = if exponent >= 0 {
        exponent % bits
    } else {
        bits - 1 - ((-1 - exponent) % bits)
    };
    let exponent = exponent as u32;
    x = ((x << exponent) & HASH_MODULUS) | (x >> (HASH_BITS - exponent));
    if negative {
        x = x.wrapping_neg();
    }
    finish(x)
}

/// Complex hash combining both parts
pub fn complex_hash(real: f64, imag: f64) -> i64 {
    let real = float_hash(real) as u64;
    let imag = float_hash(imag) as u64;
    finish(real.wrapping_add(HASH_IMAG.wrapping_mul(imag)))
}

/// Tuple hash over already-computed element hashes
pub fn tuple_hash(element_hashes: &[i64]) -> i64 {
    let mut x: u64 = 0x0034_5678;
    let mut mult: u64 = 1_000_003;
    let mut remaining = element_hashes.len() as u64;
    for &hash in element_hashes {
        remaining -= 1;
        x = (x ^ hash as u64).wrapping_mul(mult);
        mult = mult.wrapping_add(82_520 + remaining + remaining);
    }
    finish(x.wrapping_add(97_531))
}

fn shuffle_bits(hash: u64) -> u64 {
    ((hash ^ 89_869_747) ^ (hash << 16)).wrapping_mul(3_644_798_167)
}

/// Frozenset hash over already-computed member hashes, independent of order
pub fn frozenset_hash(member_hashes: &[i64]) -> i64 {
    let mut hash = member_hashes
        .iter()
        .fold(0u64, |acc, &h| acc ^ shuffle_bits(h as u64));
    hash ^= (member_hashes.len() as u64 + 1).wrapping_mul(1_927_868_237);
    hash ^= (hash >> 11) ^ (hash >> 25);
    hash = hash.wrapping_mul(69_069).wrapping_add(907_133_923);
    if hash == u64::MAX {
        hash = 590_923_713;
    }
    hash as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    // Expected values below are what the host runtime reports for `hash(x)`
    // on a 64-bit build.

    #[test]
    fn test_small_int_hash_is_identity() {
        assert_eq!(int_hash(&BigInt::from(0)), 0);
        assert_eq!(int_hash(&BigInt::from(42)), 42);
        assert_eq!(int_hash(&BigInt::from(-5)), -5);
    }

    #[test]
    fn test_minus_one_hashes_to_minus_two() {
        assert_eq!(int_hash(&BigInt::from(-1)), -2);
        assert_eq!(float_hash(-1.0), -2);
    }

    #[test]
    fn test_int_hash_wraps_at_modulus() {
        let modulus = BigInt::from(HASH_MODULUS);
        assert_eq!(int_hash(&modulus), 0);
        assert_eq!(int_hash(&(modulus.clone() + 7)), 7);
        assert_eq!(int_hash(&BigInt::from(1u64 << 61)), 1);
        assert_eq!(int_hash(&-(modulus + 3_i32)), -3);
    }

    #[test]
    fn test_integral_floats_hash_like_ints() {
        assert_eq!(float_hash(0.0), 0);
        assert_eq!(float_hash(-0.0), 0);
        assert_eq!(float_hash(1.0), 1);
        assert_eq!(float_hash(1e10), 10_000_000_000);
        assert_eq!(float_hash(-3.0), -3);
    }

    #[test]
    fn test_fractional_float_hash() {
        // hash(0.5) == 2**60 in the host runtime
        assert_eq!(float_hash(0.5), 1 << 60);
        assert_eq!(float_hash(1.5), (1 << 60) + 1);
    }

    #[test]
    fn test_non_finite_float_hashes() {
        assert_eq!(float_hash(f64::INFINITY), 314_159);
        assert_eq!(float_hash(f64::NEG_INFINITY), -314_159);
        assert_eq!(float_hash(f64::NAN), 0);
    }

    #[test]
    fn test_complex_hash_combines_parts() {
        assert_eq!(complex_hash(2.0, 0.0), 2);
        assert_eq!(complex_hash(0.0, 1.0), 1_000_003);
    }

    #[test]
    fn test_empty_tuple_hash() {
        // hash(()) on the host
        assert_eq!(tuple_hash(&[]), 3_527_539);
    }

    #[test]
    fn test_frozenset_hash_is_order_independent() {
        assert_eq!(frozenset_hash(&[1, 2, 3]), frozenset_hash(&[3, 1, 2]));
        assert_ne!(frozenset_hash(&[1, 2]), frozenset_hash(&[1, 2, 3]));
    }

    #[test]
    fn test_strings_and_bytes_are_never_static() {
        assert!(!is_statically_hashable(&Value::str("a")));
        assert!(!is_statically_hashable(&Value::Bytes(b"a".to_vec())));
        assert!(!is_statically_hashable(&Value::Code(Box::default())));
    }

    #[test]
    fn test_containers_are_static_only_if_every_member_is() {
        let numbers = Value::Tuple(vec![Value::int(1), Value::Float(2.0), Value::None]);
        assert!(is_statically_hashable(&numbers));
        let mixed = Value::FrozenSet(vec![Value::int(1), Value::str("x")]);
        assert!(!is_statically_hashable(&mixed));
        let nested = Value::Tuple(vec![Value::Tuple(vec![Value::Bytes(vec![])])]);
        assert!(!is_statically_hashable(&nested));
    }

    #[test]
    fn test_unhashable_values_are_not_static() {
        assert!(!is_statically_hashable(&Value::List(vec![])));
        assert!(!is_statically_hashable(&Value::Tuple(vec![Value::Dict(vec![])])));
    }

    #[test]
    fn test_singleton_hash_requires_pinned_value() {
        let pinned = SingletonHashes {
            none: Some(0x_FCA8_6420),
            ellipsis: None,
        };
        assert!(is_statically_hashable(&Value::None));
        assert_eq!(static_hash(&Value::None, pinned), Some(0x_FCA8_6420));
        assert_eq!(static_hash(&Value::Ellipsis, pinned), None);
        assert_eq!(
            static_hash(&Value::Tuple(vec![Value::Ellipsis]), pinned),
            None
        );
    }
}
