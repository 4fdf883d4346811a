//! C1 — NumericConverter: compile-time-dispatched conversion between
//! arithmetic user types, including a zero-sized `Void` source/destination.

/// Marker type standing in for registers with no payload (width == 0).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Void;

/// A type-erased intermediate value used to route a conversion through a
/// single saturation/rounding implementation per destination type, instead of
/// writing one impl per (From, To) pair.
#[derive(Clone, Copy, Debug)]
pub enum Canonical {
    Signed(i128),
    Unsigned(u128),
    Float(f64),
    Void,
}

/// Implemented by every arithmetic user type plus [`Void`]. `NumericConverter`
/// is built on top of this rather than exposing it directly, so application
/// code never has to think in terms of `Canonical`.
pub trait NumericValue: Copy + 'static {
    fn to_canonical(self) -> Canonical;
    fn from_canonical(c: Canonical) -> Self;
}

/// Rounds to the nearest integer, ties to even (banker's rounding), as
/// required for float-to-integer conversion. NaN and infinities pass through
/// unchanged; the caller handles them before casting.
fn round_ties_even(x: f64) -> f64 {
    if !x.is_finite() {
        return x;
    }
    let floor = x.floor();
    let diff = x - floor;
    if diff < 0.5 {
        floor
    } else if diff > 0.5 {
        floor + 1.0
    } else if floor.rem_euclid(2.0) == 0.0 {
        floor
    } else {
        floor + 1.0
    }
}

macro_rules! impl_signed {
    ($t:ty) => {
        impl NumericValue for $t {
            fn to_canonical(self) -> Canonical {
                Canonical::Signed(self as i128)
            }

            fn from_canonical(c: Canonical) -> Self {
                let clamp = |v: i128| -> $t {
                    v.clamp(<$t>::MIN as i128, <$t>::MAX as i128) as $t
                };
                match c {
                    Canonical::Signed(v) => clamp(v),
                    Canonical::Unsigned(v) => clamp(v.min(i128::MAX as u128) as i128),
                    Canonical::Float(v) => {
                        if v.is_nan() {
                            // Documented choice: NaN maps to the minimum signed integer.
                            <$t>::MIN
                        } else if v <= <$t>::MIN as f64 {
                            <$t>::MIN
                        } else if v >= <$t>::MAX as f64 {
                            <$t>::MAX
                        } else {
                            round_ties_even(v) as $t
                        }
                    }
                    Canonical::Void => 0,
                }
            }
        }
    };
}

macro_rules! impl_unsigned {
    ($t:ty) => {
        impl NumericValue for $t {
            fn to_canonical(self) -> Canonical {
                Canonical::Unsigned(self as u128)
            }

            fn from_canonical(c: Canonical) -> Self {
                let clamp = |v: u128| -> $t { v.min(<$t>::MAX as u128) as $t };
                match c {
                    Canonical::Unsigned(v) => clamp(v),
                    Canonical::Signed(v) => {
                        if v < 0 {
                            0
                        } else {
                            clamp(v as u128)
                        }
                    }
                    Canonical::Float(v) => {
                        if v.is_nan() {
                            // Documented choice: NaN maps to the maximum unsigned integer.
                            <$t>::MAX
                        } else if v <= 0.0 {
                            0
                        } else if v >= <$t>::MAX as f64 {
                            <$t>::MAX
                        } else {
                            round_ties_even(v) as $t
                        }
                    }
                    Canonical::Void => 0,
                }
            }
        }
    };
}

macro_rules! impl_float {
    ($t:ty) => {
        impl NumericValue for $t {
            fn to_canonical(self) -> Canonical {
                Canonical::Float(self as f64)
            }

            fn from_canonical(c: Canonical) -> Self {
                match c {
                    // `as` casts between floats and between int<->float preserve
                    // NaN, infinities and the sign of zero in Rust.
                    Canonical::Float(v) => v as $t,
                    Canonical::Signed(v) => v as $t,
                    Canonical::Unsigned(v) => v as $t,
                    Canonical::Void => 0.0,
                }
            }
        }
    };
}

impl_signed!(i8);
impl_signed!(i16);
impl_signed!(i32);
impl_signed!(i64);
impl_unsigned!(u8);
impl_unsigned!(u16);
impl_unsigned!(u32);
impl_unsigned!(u64);
impl_float!(f32);
impl_float!(f64);

impl NumericValue for Void {
    fn to_canonical(self) -> Canonical {
        Canonical::Void
    }

    fn from_canonical(_: Canonical) -> Self {
        Void
    }
}

/// Public entry point for C1: convert a value of one supported arithmetic (or
/// [`Void`]) type to another, applying the rounding/saturation contract
/// documented in `SPEC_FULL.md` §4.1.
pub struct NumericConverter;

impl NumericConverter {
    pub fn convert<From: NumericValue, To: NumericValue>(from: From) -> To {
        To::from_canonical(from.to_canonical())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_to_int_rounds_half_to_even() {
        assert_eq!(NumericConverter::convert::<f64, i32>(0.49), 0);
        assert_eq!(NumericConverter::convert::<f64, i32>(0.51), 1);
        assert_eq!(NumericConverter::convert::<f64, i32>(0.5), 0);
        assert_eq!(NumericConverter::convert::<f64, i32>(1.5), 2);
        assert_eq!(NumericConverter::convert::<f64, i32>(-0.49), 0);
        assert_eq!(NumericConverter::convert::<f64, i32>(-0.51), -1);
        assert_eq!(NumericConverter::convert::<f64, i32>(-0.5), 0);
    }

    #[test]
    fn float_infinities_saturate() {
        assert_eq!(NumericConverter::convert::<f64, i32>(f64::INFINITY), i32::MAX);
        assert_eq!(NumericConverter::convert::<f64, i32>(f64::NEG_INFINITY), i32::MIN);
        assert_eq!(NumericConverter::convert::<f64, u32>(f64::INFINITY), u32::MAX);
        assert_eq!(NumericConverter::convert::<f64, u32>(f64::NEG_INFINITY), 0);
    }

    #[test]
    fn nan_maps_to_documented_extreme() {
        assert_eq!(NumericConverter::convert::<f64, i32>(f64::NAN), i32::MIN);
        assert_eq!(NumericConverter::convert::<f64, u32>(f64::NAN), u32::MAX);
    }

    #[test]
    fn negative_to_unsigned_clamps_to_zero() {
        assert_eq!(NumericConverter::convert::<i32, u32>(-5), 0);
    }

    #[test]
    fn integer_saturation() {
        assert_eq!(NumericConverter::convert::<i64, i8>(1000), i8::MAX);
        assert_eq!(NumericConverter::convert::<i64, i8>(-1000), i8::MIN);
        assert_eq!(NumericConverter::convert::<u64, u8>(1000), u8::MAX);
    }

    #[test]
    fn float_to_float_preserves_sign_of_zero() {
        let v: f32 = NumericConverter::convert(-0.0f64);
        assert!(v.is_sign_negative());
        let v: f64 = NumericConverter::convert(-0.0f32);
        assert!(v.is_sign_negative());
    }

    #[test]
    fn void_source_yields_zero() {
        assert_eq!(NumericConverter::convert::<Void, i32>(Void), 0);
        assert_eq!(NumericConverter::convert::<Void, f64>(Void), 0.0);
    }

    #[test]
    fn void_destination_always_succeeds() {
        let _: Void = NumericConverter::convert(42i32);
        let _: Void = NumericConverter::convert(f64::NAN);
    }

    #[quickcheck_macros::quickcheck]
    fn int_to_int_roundtrip_within_range(v: i32) -> bool {
        let back: i32 = NumericConverter::convert::<i32, i64>(v) as i64 as i32;
        back == v
    }
}
