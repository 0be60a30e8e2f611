//! Fixed-width two's-complement integers.
//!
//! A [`FixedInt`] carries its bit-width and signedness. All arithmetic wraps
//! silently modulo `2^width`; ordering depends on signedness.

use std::cmp::Ordering;
use std::fmt::{Display, Formatter};

use num_bigint::{BigInt, BigUint, Sign};
use num_traits::{One, ToPrimitive, Zero};

use crate::error::{invalid, Result};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FixedInt {
    width: u32,
    signed: bool,
    bits: BigUint,
}

fn modulus(width: u32) -> BigUint {
    BigUint::one() << width
}

fn mask(width: u32) -> BigUint {
    modulus(width) - BigUint::one()
}

impl FixedInt {
    pub fn zero(width: u32, signed: bool) -> Self {
        assert_ne!(width, 0, "Width should be positive");
        Self {
            width,
            signed,
            bits: BigUint::zero(),
        }
    }

    /// Build from raw bits, keeping only the low `width` bits.
    pub fn from_bits(bits: BigUint, width: u32, signed: bool) -> Self {
        assert_ne!(width, 0, "Width should be positive");
        Self {
            width,
            signed,
            bits: bits & mask(width),
        }
    }

    /// Build from big-endian bytes: extra high-order bytes are truncated and
    /// missing ones are zero-padded.
    pub fn from_bytes(bytes: &[u8], width: u32, signed: bool) -> Self {
        Self::from_bits(BigUint::from_bytes_be(bytes), width, signed)
    }

    /// Reduce an arbitrary integer modulo `2^width`.
    pub fn wrapping_from(value: &BigInt, width: u32, signed: bool) -> Self {
        assert_ne!(width, 0, "Width should be positive");
        let m = BigInt::from(modulus(width));
        let mut v = value % &m;
        if v.sign() == Sign::Minus {
            v += &m;
        }
        let (_, magnitude) = v.into_parts();
        Self::from_bits(magnitude, width, signed)
    }

    /// Build from a native integer, rejecting values outside the representable range.
    pub fn from_i128(value: i128, width: u32, signed: bool) -> Result<Self> {
        if width == 0 {
            return invalid("fixed-width integers need a positive width");
        }
        let value = BigInt::from(value);
        if value < Self::min_value(width, signed).to_bigint()
            || value > Self::max_value(width, signed).to_bigint()
        {
            return invalid(format!(
                "{} does not fit in {} {}-bit integer",
                value,
                if signed { "a signed" } else { "an unsigned" },
                width
            ));
        }
        Ok(Self::wrapping_from(&value, width, signed))
    }

    pub fn max_value(width: u32, signed: bool) -> Self {
        if signed {
            Self::from_bits(mask(width - 1), width, signed)
        } else {
            Self::from_bits(mask(width), width, signed)
        }
    }

    pub fn min_value(width: u32, signed: bool) -> Self {
        if signed {
            Self::from_bits(BigUint::one() << (width - 1), width, signed)
        } else {
            Self::zero(width, signed)
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn is_signed(&self) -> bool {
        self.signed
    }

    /// The raw two's-complement bits.
    pub fn bits(&self) -> &BigUint {
        &self.bits
    }

    pub fn bit(&self, index: u32) -> bool {
        assert!(index < self.width, "Bit index out of range");
        self.bits.bit(index as u64)
    }

    pub fn with_bit(&self, index: u32, value: bool) -> Self {
        assert!(index < self.width, "Bit index out of range");
        let mut bits = self.bits.clone();
        bits.set_bit(index as u64, value);
        Self::from_bits(bits, self.width, self.signed)
    }

    fn is_negative(&self) -> bool {
        self.signed && self.bit(self.width - 1)
    }

    /// The mathematical value, honouring signedness.
    pub fn to_bigint(&self) -> BigInt {
        let magnitude = BigInt::from(self.bits.clone());
        if self.is_negative() {
            magnitude - BigInt::from(modulus(self.width))
        } else {
            magnitude
        }
    }

    pub fn to_i128(&self) -> Option<i128> {
        self.to_bigint().to_i128()
    }

    pub fn to_i64(&self) -> Option<i64> {
        self.to_bigint().to_i64()
    }

    pub fn to_u64(&self) -> Option<u64> {
        self.to_bigint().to_u64()
    }

    fn check_compatible(&self, other: &Self) {
        assert_eq!(
            (self.width, self.signed),
            (other.width, other.signed),
            "Mismatched fixed-width operands"
        );
    }

    pub fn add(&self, other: &Self) -> Self {
        self.check_compatible(other);
        Self::from_bits(&self.bits + &other.bits, self.width, self.signed)
    }

    pub fn sub(&self, other: &Self) -> Self {
        self.check_compatible(other);
        Self::from_bits(
            &self.bits + modulus(self.width) - &other.bits,
            self.width,
            self.signed,
        )
    }

    pub fn mul(&self, other: &Self) -> Self {
        self.check_compatible(other);
        Self::from_bits(&self.bits * &other.bits, self.width, self.signed)
    }

    pub fn and(&self, other: &Self) -> Self {
        self.check_compatible(other);
        Self::from_bits(&self.bits & &other.bits, self.width, self.signed)
    }

    pub fn or(&self, other: &Self) -> Self {
        self.check_compatible(other);
        Self::from_bits(&self.bits | &other.bits, self.width, self.signed)
    }

    pub fn xor(&self, other: &Self) -> Self {
        self.check_compatible(other);
        Self::from_bits(&self.bits ^ &other.bits, self.width, self.signed)
    }

    pub fn not(&self) -> Self {
        Self::from_bits(&self.bits ^ mask(self.width), self.width, self.signed)
    }

    /// Ordered comparison, signed or unsigned according to the operands.
    pub fn compare(&self, other: &Self) -> Ordering {
        self.check_compatible(other);
        self.to_bigint().cmp(&other.to_bigint())
    }

    /// Convert to another width/signedness: truncating, or extending by sign
    /// (signed source) or by zeros (unsigned source).
    pub fn resize(&self, width: u32, signed: bool) -> Self {
        Self::wrapping_from(&self.to_bigint(), width, signed)
    }
}

impl Display for FixedInt {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}{}{}",
            self.to_bigint(),
            if self.signed { "i" } else { "u" },
            self.width
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use test_log::test;

    fn u8v(v: i128) -> FixedInt {
        FixedInt::from_i128(v, 8, false).unwrap()
    }

    fn i8v(v: i128) -> FixedInt {
        FixedInt::from_i128(v, 8, true).unwrap()
    }

    #[test]
    fn test_unsigned_wraparound() {
        assert_eq!(u8v(255).add(&u8v(1)), u8v(0));
        assert_eq!(u8v(0).sub(&u8v(1)), u8v(255));
        assert_eq!(u8v(16).mul(&u8v(17)), u8v(16));
    }

    #[test]
    fn test_signed_wraparound() {
        assert_eq!(i8v(127).add(&i8v(1)), i8v(-128));
        assert_eq!(i8v(-128).sub(&i8v(1)), i8v(127));
        assert_eq!(i8v(-3).mul(&i8v(5)), i8v(-15));
    }

    #[test]
    fn test_range_validation() {
        assert!(FixedInt::from_i128(256, 8, false).is_err());
        assert!(FixedInt::from_i128(-1, 8, false).is_err());
        assert!(FixedInt::from_i128(128, 8, true).is_err());
        assert!(FixedInt::from_i128(-128, 8, true).is_ok());
        assert!(FixedInt::from_i128(1, 0, true).is_err());
    }

    #[test]
    fn test_from_bytes() {
        // Truncation keeps the low-order (trailing) bytes.
        let x = FixedInt::from_bytes(&[0x12, 0x34, 0x56], 16, false);
        assert_eq!(x.to_i128(), Some(0x3456));
        // Padding with zeros.
        let y = FixedInt::from_bytes(&[0xff], 32, false);
        assert_eq!(y.to_i128(), Some(0xff));
        let z = FixedInt::from_bytes(&[0xff], 8, true);
        assert_eq!(z.to_i128(), Some(-1));
    }

    #[test]
    fn test_bitwise() {
        assert_eq!(u8v(0b1100).and(&u8v(0b1010)), u8v(0b1000));
        assert_eq!(u8v(0b1100).or(&u8v(0b1010)), u8v(0b1110));
        assert_eq!(u8v(0b1100).xor(&u8v(0b1010)), u8v(0b0110));
        assert_eq!(u8v(0).not(), u8v(255));
        assert_eq!(i8v(0).not(), i8v(-1));
    }

    #[test]
    fn test_compare() {
        assert_eq!(u8v(200).compare(&u8v(3)), Ordering::Greater);
        assert_eq!(i8v(-56).compare(&i8v(3)), Ordering::Less);
        assert_eq!(i8v(7).compare(&i8v(7)), Ordering::Equal);
    }

    #[test]
    fn test_bits() {
        let x = u8v(0b0101);
        assert!(x.bit(0));
        assert!(!x.bit(1));
        assert!(x.bit(2));
        assert_eq!(x.with_bit(1, true), u8v(0b0111));
        assert_eq!(x.with_bit(0, false), u8v(0b0100));
    }

    #[test]
    fn test_resize() {
        assert_eq!(i8v(-1).resize(16, true).to_i128(), Some(-1));
        assert_eq!(i8v(-1).resize(16, false).to_i128(), Some(0xffff));
        assert_eq!(u8v(255).resize(16, true).to_i128(), Some(255));
        let wide = FixedInt::from_i128(0x1234, 16, false).unwrap();
        assert_eq!(wide.resize(8, false), u8v(0x34));
    }

    #[test]
    fn test_limits() {
        assert_eq!(FixedInt::max_value(8, true).to_i128(), Some(127));
        assert_eq!(FixedInt::min_value(8, true).to_i128(), Some(-128));
        assert_eq!(FixedInt::max_value(32, false).to_i128(), Some(4294967295));
    }
}
