//! Fixed-point math utilities for deterministic navigation.
//!
//! Every position, distance, angle, speed and duration that feeds path
//! search or kinematic integration is a [`Fixed`]. Square roots and
//! trigonometry are computed with integer algorithms so that results are
//! bit-identical on every platform.

use std::cmp::Ordering;
use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign};

use fixed::types::I32F32;
use serde::{Deserialize, Serialize};

/// Fixed-point number type for all simulation math.
///
/// Uses 32 bits for integer part and 32 bits for fractional part.
/// Range: approximately -2,147,483,648 to 2,147,483,647
/// Precision: approximately 0.00000000023
pub type Fixed = I32F32;

/// π as a fixed-point constant.
pub const PI: Fixed = Fixed::from_bits(13_493_037_705);
/// 2π as a fixed-point constant.
pub const TAU: Fixed = Fixed::from_bits(26_986_075_409);
/// π/2 as a fixed-point constant.
pub const FRAC_PI_2: Fixed = Fixed::from_bits(6_746_518_852);

/// atan(2^-i) for the CORDIC iterations, as raw I32F32 bits.
const ATAN_TABLE: [i64; 32] = [
    3_373_259_426,
    1_991_351_318,
    1_052_175_346,
    534_100_635,
    268_086_748,
    134_174_063,
    67_103_403,
    33_553_749,
    16_777_131,
    8_388_597,
    4_194_303,
    2_097_152,
    1_048_576,
    524_288,
    262_144,
    131_072,
    65_536,
    32_768,
    16_384,
    8_192,
    4_096,
    2_048,
    1_024,
    512,
    256,
    128,
    64,
    32,
    16,
    8,
    4,
    2,
];

/// Reciprocal of the CORDIC gain after 32 iterations, as raw I32F32 bits.
const CORDIC_INV_GAIN: i64 = 2_608_131_496;

/// Fixed-point 2D vector.
///
/// `y` is the world's second horizontal axis (the "z" of a 3D world).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Vec2Fixed {
    /// X coordinate.
    #[serde(with = "fixed_serde")]
    pub x: Fixed,
    /// Y coordinate.
    #[serde(with = "fixed_serde")]
    pub y: Fixed,
}

/// Serde support for fixed-point numbers.
///
/// Serializes fixed-point numbers as their raw bit representation (i64)
/// to preserve exact precision across serialization boundaries.
pub mod fixed_serde {
    use super::Fixed;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a fixed-point number as its raw bit representation.
    pub fn serialize<S>(value: &Fixed, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        value.to_bits().serialize(serializer)
    }

    /// Deserialize a fixed-point number from its raw bit representation.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Fixed, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bits = i64::deserialize(deserializer)?;
        Ok(Fixed::from_bits(bits))
    }
}

/// Serde support for fixed-point numbers written as plain decimals.
///
/// Used by human-authored RON files (config, scenarios). Values are parsed
/// from their decimal text, never through a float.
pub mod fixed_decimal {
    use super::Fixed;
    use serde::{de, Deserialize, Deserializer, Serializer};

    /// Serialize a fixed-point number as a decimal string.
    pub fn serialize<S>(value: &Fixed, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_string())
    }

    /// Deserialize a fixed-point number from a decimal string or integer.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Fixed, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Int(i32),
            Text(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Int(n) => Ok(Fixed::from_num(n)),
            Repr::Text(s) => s.trim().parse::<Fixed>().map_err(de::Error::custom),
        }
    }
}

/// Serde support for `Option<Fixed>` written as plain decimals.
pub mod option_fixed_decimal {
    use super::Fixed;
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize an optional fixed-point number.
    pub fn serialize<S>(value: &Option<Fixed>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(v) => serializer.serialize_some(&v.to_string()),
            None => serializer.serialize_none(),
        }
    }

    /// Deserialize an optional fixed-point number.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Fixed>, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(transparent)]
        struct Wrapper(#[serde(with = "super::fixed_decimal")] Fixed);

        let opt = Option::<Wrapper>::deserialize(deserializer)?;
        Ok(opt.map(|Wrapper(v)| v))
    }
}

impl Vec2Fixed {
    /// Create a new fixed-point vector.
    #[must_use]
    pub const fn new(x: Fixed, y: Fixed) -> Self {
        Self { x, y }
    }

    /// Create a vector from integer coordinates.
    #[must_use]
    pub fn from_ints(x: i32, y: i32) -> Self {
        Self::new(Fixed::from_num(x), Fixed::from_num(y))
    }

    /// Zero vector.
    pub const ZERO: Self = Self {
        x: Fixed::ZERO,
        y: Fixed::ZERO,
    };

    /// Whether both components are exactly zero.
    #[must_use]
    pub fn is_zero(self) -> bool {
        self.x == Fixed::ZERO && self.y == Fixed::ZERO
    }

    /// Calculate squared distance (avoids sqrt for comparisons).
    #[must_use]
    pub fn distance_squared(self, other: Self) -> Fixed {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }

    /// Dot product of two vectors.
    #[must_use]
    pub fn dot(self, other: Self) -> Fixed {
        self.x * other.x + self.y * other.y
    }

    /// Linearly interpolate between two vectors.
    #[must_use]
    pub fn lerp(self, other: Self, t: Fixed) -> Self {
        Self {
            x: self.x + (other.x - self.x) * t,
            y: self.y + (other.y - self.y) * t,
        }
    }

    /// Squared length as raw 2^-64 units, computed without overflow.
    fn length_squared_bits(self) -> u128 {
        let x = i128::from(self.x.to_bits());
        let y = i128::from(self.y.to_bits());
        ((x * x) as u128).saturating_add((y * y) as u128)
    }

    /// Exact Euclidean length, rounded down.
    #[must_use]
    pub fn length(self) -> Fixed {
        let root = isqrt_u128(self.length_squared_bits());
        Fixed::from_bits(i64::try_from(root).unwrap_or(i64::MAX))
    }

    /// Compare this vector's length with `len` without taking a square root.
    #[must_use]
    pub fn compare_length(self, len: Fixed) -> Ordering {
        if len < Fixed::ZERO {
            return Ordering::Greater;
        }
        let l = i128::from(len.to_bits());
        self.length_squared_bits().cmp(&((l * l) as u128))
    }

    /// Compare the lengths of two vectors.
    #[must_use]
    pub fn compare_length_to(self, other: Self) -> Ordering {
        self.length_squared_bits()
            .cmp(&other.length_squared_bits())
    }

    /// Euclidean distance between two points.
    #[must_use]
    pub fn distance(self, other: Self) -> Fixed {
        (self - other).length()
    }

    /// Normalize vector using fixed-point math.
    #[must_use]
    pub fn normalize(self) -> Self {
        self.normalize_to(Fixed::ONE)
    }

    /// Scale the vector to the given length. The zero vector stays zero.
    #[must_use]
    pub fn normalize_to(self, len: Fixed) -> Self {
        let current = self.length();
        if current == Fixed::ZERO {
            return Self::ZERO;
        }
        Self::new(
            self.x.saturating_mul(len) / current,
            self.y.saturating_mul(len) / current,
        )
    }

    /// Rotate by -90 degrees: `(x, y) -> (y, -x)`.
    #[must_use]
    pub fn perpendicular(self) -> Self {
        Self::new(self.y, -self.x)
    }

    /// Rotate clockwise by `angle` radians (matching the facing convention
    /// where angle 0 looks along +y).
    #[must_use]
    pub fn rotate(self, angle: Fixed) -> Self {
        let (s, c) = sin_cos(angle);
        Self::new(self.x * c + self.y * s, self.y * c - self.x * s)
    }

    /// Component-wise absolute value.
    #[must_use]
    pub fn abs(self) -> Self {
        Self::new(self.x.abs(), self.y.abs())
    }
}

impl Add for Vec2Fixed {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self {
            x: self.x + rhs.x,
            y: self.y + rhs.y,
        }
    }
}

impl Sub for Vec2Fixed {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self {
            x: self.x - rhs.x,
            y: self.y - rhs.y,
        }
    }
}

impl AddAssign for Vec2Fixed {
    fn add_assign(&mut self, rhs: Self) {
        self.x += rhs.x;
        self.y += rhs.y;
    }
}

impl SubAssign for Vec2Fixed {
    fn sub_assign(&mut self, rhs: Self) {
        self.x -= rhs.x;
        self.y -= rhs.y;
    }
}

impl Neg for Vec2Fixed {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Self::new(-self.x, -self.y)
    }
}

impl Mul<Fixed> for Vec2Fixed {
    type Output = Self;

    fn mul(self, rhs: Fixed) -> Self::Output {
        Self::new(self.x * rhs, self.y * rhs)
    }
}

impl Div<Fixed> for Vec2Fixed {
    type Output = Self;

    fn div(self, rhs: Fixed) -> Self::Output {
        Self::new(self.x / rhs, self.y / rhs)
    }
}

/// Integer square root (floor) using the digit-by-digit method.
fn isqrt_u128(n: u128) -> u128 {
    if n == 0 {
        return 0;
    }

    let mut num = n;
    let mut res: u128 = 0;
    let mut bit: u128 = 1 << ((127 - n.leading_zeros()) & !1);

    while bit != 0 {
        if num >= res + bit {
            num -= res + bit;
            res = (res >> 1) + bit;
        } else {
            res >>= 1;
        }
        bit >>= 2;
    }

    res
}

/// Deterministic square root of a fixed-point number. Negative input yields zero.
#[must_use]
pub fn fixed_sqrt(value: Fixed) -> Fixed {
    if value <= Fixed::ZERO {
        return Fixed::ZERO;
    }
    let bits = (value.to_bits() as u128) << 32;
    Fixed::from_bits(i64::try_from(isqrt_u128(bits)).unwrap_or(i64::MAX))
}

/// Wrap an angle into `[-π, π]`.
#[must_use]
pub fn wrap_angle(angle: Fixed) -> Fixed {
    let mut a = angle % TAU;
    if a > PI {
        a -= TAU;
    } else if a < -PI {
        a += TAU;
    }
    a
}

/// Deterministic sine and cosine, returned as `(sin, cos)`.
#[must_use]
pub fn sin_cos(angle: Fixed) -> (Fixed, Fixed) {
    let mut a = wrap_angle(angle);

    // CORDIC converges on [-π/2, π/2]; fold the rest by a half turn.
    let mut flip = false;
    if a > FRAC_PI_2 {
        a -= PI;
        flip = true;
    } else if a < -FRAC_PI_2 {
        a += PI;
        flip = true;
    }

    // Quarter turns are exact so that axis-aligned shapes stay axis-aligned.
    let exact = if a == Fixed::ZERO {
        Some((Fixed::ZERO, Fixed::ONE))
    } else if a == FRAC_PI_2 {
        Some((Fixed::ONE, Fixed::ZERO))
    } else if a == -FRAC_PI_2 {
        Some((-Fixed::ONE, Fixed::ZERO))
    } else {
        None
    };
    if let Some((s, c)) = exact {
        return if flip { (-s, -c) } else { (s, c) };
    }

    let mut x: i64 = CORDIC_INV_GAIN;
    let mut y: i64 = 0;
    let mut z: i64 = a.to_bits();

    for (i, &step) in ATAN_TABLE.iter().enumerate() {
        let dx = y >> i;
        let dy = x >> i;
        if z >= 0 {
            x -= dx;
            y += dy;
            z -= step;
        } else {
            x += dx;
            y -= dy;
            z += step;
        }
    }

    let s = Fixed::from_bits(y).clamp(-Fixed::ONE, Fixed::ONE);
    let c = Fixed::from_bits(x).clamp(-Fixed::ONE, Fixed::ONE);
    if flip {
        (-s, -c)
    } else {
        (s, c)
    }
}

/// Deterministic four-quadrant arctangent of `y / x`, in `[-π, π]`.
#[must_use]
pub fn atan2(y: Fixed, x: Fixed) -> Fixed {
    if x == Fixed::ZERO && y == Fixed::ZERO {
        return Fixed::ZERO;
    }

    let mut xb = x.to_bits();
    let mut yb = y.to_bits();

    // Keep magnitudes inside a range where the iterations neither overflow
    // nor lose all precision.
    let max = xb.unsigned_abs().max(yb.unsigned_abs());
    let high = 64 - max.leading_zeros() as i32;
    if high > 60 {
        let shift = high - 60;
        xb >>= shift;
        yb >>= shift;
    } else if high < 40 {
        let shift = 40 - high;
        xb <<= shift;
        yb <<= shift;
    }

    // Rotate into the right half-plane first.
    let mut offset: i64 = 0;
    if xb < 0 {
        offset = if yb >= 0 { PI.to_bits() } else { -PI.to_bits() };
        xb = -xb;
        yb = -yb;
    }

    let mut z: i64 = 0;
    for (i, &step) in ATAN_TABLE.iter().enumerate() {
        let dx = yb >> i;
        let dy = xb >> i;
        if yb > 0 {
            xb += dx;
            yb -= dy;
            z += step;
        } else {
            xb -= dx;
            yb += dy;
            z -= step;
        }
    }

    wrap_angle(Fixed::from_bits(z + offset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn approx(a: Fixed, b: f64, eps: f64) -> bool {
        (a.to_num::<f64>() - b).abs() < eps
    }

    #[test]
    fn test_vec2_distance_squared() {
        let a = Vec2Fixed::new(Fixed::from_num(3), Fixed::from_num(0));
        let b = Vec2Fixed::new(Fixed::from_num(0), Fixed::from_num(4));
        let dist_sq = a.distance_squared(b);
        // 3² + 4² = 25
        assert_eq!(dist_sq, Fixed::from_num(25));
    }

    #[test]
    fn test_vec2_length_exact() {
        let v = Vec2Fixed::from_ints(3, 4);
        assert_eq!(v.length(), Fixed::from_num(5));
        assert_eq!(v.compare_length(Fixed::from_num(5)), Ordering::Equal);
        assert_eq!(v.compare_length(Fixed::from_num(4)), Ordering::Greater);
        assert_eq!(v.compare_length(Fixed::from_num(6)), Ordering::Less);
    }

    #[test]
    fn test_fixed_sqrt() {
        assert_eq!(fixed_sqrt(Fixed::from_num(16)), Fixed::from_num(4));
        assert_eq!(fixed_sqrt(Fixed::ZERO), Fixed::ZERO);
        assert_eq!(fixed_sqrt(Fixed::from_num(-4)), Fixed::ZERO);
        assert!(approx(fixed_sqrt(Fixed::from_num(2)), std::f64::consts::SQRT_2, 1e-8));
    }

    #[test]
    fn test_vec2_normalize() {
        let v = Vec2Fixed::new(Fixed::from_num(3), Fixed::from_num(4));
        let norm = v.normalize();

        let len_sq = norm.dot(norm);
        let one = Fixed::from_num(1);
        let epsilon = one / Fixed::from_num(10000);
        assert!(
            (len_sq - one).abs() < epsilon,
            "normalized vector length² should be ~1, got {:?}",
            len_sq
        );

        let ratio_diff = (norm.x * Fixed::from_num(4)) - (norm.y * Fixed::from_num(3));
        assert!(
            ratio_diff.abs() < epsilon,
            "direction not preserved: {:?}",
            ratio_diff
        );
    }

    #[test]
    fn test_normalize_zero_stays_zero() {
        assert_eq!(Vec2Fixed::ZERO.normalize_to(Fixed::from_num(3)), Vec2Fixed::ZERO);
    }

    #[test]
    fn test_perpendicular() {
        let v = Vec2Fixed::from_ints(1, 2);
        assert_eq!(v.perpendicular(), Vec2Fixed::from_ints(2, -1));
        assert_eq!(v.dot(v.perpendicular()), Fixed::ZERO);
    }

    #[test]
    fn test_sin_cos_known_angles() {
        let (s, c) = sin_cos(Fixed::ZERO);
        assert!(approx(s, 0.0, 1e-6));
        assert!(approx(c, 1.0, 1e-6));

        let (s, c) = sin_cos(FRAC_PI_2);
        assert!(approx(s, 1.0, 1e-6));
        assert!(approx(c, 0.0, 1e-6));

        let (s, c) = sin_cos(PI);
        assert!(approx(s, 0.0, 1e-6));
        assert!(approx(c, -1.0, 1e-6));
    }

    #[test]
    fn test_sin_cos_quarter_turns_are_exact() {
        assert_eq!(sin_cos(Fixed::ZERO), (Fixed::ZERO, Fixed::ONE));
        assert_eq!(sin_cos(FRAC_PI_2), (Fixed::ONE, Fixed::ZERO));
        assert_eq!(sin_cos(-FRAC_PI_2), (-Fixed::ONE, Fixed::ZERO));
        assert_eq!(sin_cos(PI), (Fixed::ZERO, -Fixed::ONE));
        assert_eq!(sin_cos(-PI), (Fixed::ZERO, -Fixed::ONE));
        assert_eq!(sin_cos(PI + FRAC_PI_2), (-Fixed::ONE, Fixed::ZERO));
    }

    #[test]
    fn test_sin_cos_never_exceeds_one() {
        for deg in (-360i32..=360).step_by(5) {
            let (s, c) = sin_cos(Fixed::from_num(deg) * PI / Fixed::from_num(180));
            assert!(s.abs() <= Fixed::ONE && c.abs() <= Fixed::ONE, "{deg} degrees");
        }
    }

    #[test]
    fn test_atan2_quadrants() {
        let one = Fixed::ONE;
        assert!(approx(atan2(one, one), std::f64::consts::FRAC_PI_4, 1e-6));
        assert!(approx(atan2(one, -one), 3.0 * std::f64::consts::FRAC_PI_4, 1e-6));
        assert!(approx(atan2(-one, -one), -3.0 * std::f64::consts::FRAC_PI_4, 1e-6));
        assert!(approx(atan2(-one, one), -std::f64::consts::FRAC_PI_4, 1e-6));
        assert!(approx(atan2(Fixed::ZERO, -one).abs(), std::f64::consts::PI, 1e-6));
    }

    #[test]
    fn test_rotate_quarter_turn() {
        let v = Vec2Fixed::from_ints(0, 1);
        let r = v.rotate(FRAC_PI_2);
        assert!(approx(r.x, 1.0, 1e-6));
        assert!(approx(r.y, 0.0, 1e-6));
    }

    #[test]
    fn test_wrap_angle() {
        assert!(approx(wrap_angle(PI + FRAC_PI_2), -std::f64::consts::FRAC_PI_2, 1e-6));
        assert!(approx(wrap_angle(-TAU), 0.0, 1e-6));
    }

    proptest! {
        #[test]
        fn prop_sqrt_is_floor(n in 0i64..(1i64 << 40)) {
            let v = Fixed::from_bits(n);
            let r = fixed_sqrt(v);
            let rb = i128::from(r.to_bits());
            let target = i128::from(n) << 32;
            prop_assert!(rb * rb <= target);
            prop_assert!((rb + 1) * (rb + 1) > target);
        }

        #[test]
        fn prop_sin_cos_unit_circle(deg in -720i32..720) {
            let angle = Fixed::from_num(deg) * PI / Fixed::from_num(180);
            let (s, c) = sin_cos(angle);
            let norm = s * s + c * c;
            prop_assert!(approx(norm, 1.0, 1e-6));
        }

        #[test]
        fn prop_atan2_matches_float(x in -1000i32..1000, y in -1000i32..1000) {
            prop_assume!(x != 0 || y != 0);
            let a = atan2(Fixed::from_num(y), Fixed::from_num(x));
            let expected = f64::from(y).atan2(f64::from(x));
            let diff = (a.to_num::<f64>() - expected).abs();
            prop_assert!(diff < 1e-6 || (diff - std::f64::consts::TAU).abs() < 1e-6);
        }
    }
}
