use num_rational::Ratio;
use num_traits::{CheckedAdd, CheckedDiv, CheckedMul, CheckedSub};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};

/// Exact beat fraction, always stored in lowest terms with a positive
/// denominator. The numerator never equals `i64::MIN`, so negation and
/// `abs` cannot overflow.
///
/// The operator impls panic on overflow like the integer ones; the
/// `checked_*` methods are for values that come from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "(i64, i64)", into = "(i64, i64)")]
pub struct RationalTime(Ratio<i64>);

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("rational needs a non-zero denominator and components above i64::MIN")]
pub struct InvalidRational;

impl RationalTime {
    pub const ZERO: Self = Self(Ratio::new_raw(0, 1));
    pub const ONE: Self = Self(Ratio::new_raw(1, 1));

    /// Returns `None` when `denom` is zero or either component is
    /// `i64::MIN`.
    pub fn new(numer: i64, denom: i64) -> Option<Self> {
        if denom == 0 || numer == i64::MIN || denom == i64::MIN {
            return None;
        }
        Some(Self(Ratio::new(numer, denom)))
    }

    fn from_ratio(ratio: Ratio<i64>) -> Option<Self> {
        (*ratio.numer() != i64::MIN).then_some(Self(ratio))
    }

    /// `i64::MIN` is clamped to `i64::MIN + 1`.
    pub fn from_integer(value: i64) -> Self {
        Self(Ratio::from_integer(value.max(i64::MIN + 1)))
    }

    pub fn numer(&self) -> i64 {
        *self.0.numer()
    }

    pub fn denom(&self) -> i64 {
        *self.0.denom()
    }

    pub fn is_zero(&self) -> bool {
        self.numer() == 0
    }

    pub fn is_integer(&self) -> bool {
        self.denom() == 1
    }

    pub fn is_negative(&self) -> bool {
        self.numer() < 0
    }

    /// Largest integer not greater than `self`.
    pub fn floor(&self) -> i64 {
        self.numer().div_euclid(self.denom())
    }

    /// Nearest integer, halves rounding towards positive infinity.
    pub fn round(&self) -> i64 {
        let (numer, denom) = (self.numer() as i128, self.denom() as i128);
        // |numer / denom| < 2^63, so the half-up result always fits
        (2 * numer + denom).div_euclid(2 * denom) as i64
    }

    /// `self - floor(self)`, always in [0, 1).
    pub fn fract(&self) -> Self {
        Self(Ratio::new_raw(
            self.numer().rem_euclid(self.denom()),
            self.denom(),
        ))
    }

    pub fn abs(&self) -> Self {
        if self.is_negative() { -*self } else { *self }
    }

    pub fn to_f64(&self) -> f64 {
        self.numer() as f64 / self.denom() as f64
    }

    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        Self::from_ratio(self.0.checked_add(&rhs.0)?)
    }

    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        Self::from_ratio(self.0.checked_sub(&rhs.0)?)
    }

    pub fn checked_mul(self, rhs: Self) -> Option<Self> {
        Self::from_ratio(self.0.checked_mul(&rhs.0)?)
    }

    /// `None` on a zero divisor or overflow.
    pub fn checked_div(self, rhs: Self) -> Option<Self> {
        if rhs.is_zero() {
            return None;
        }
        Self::from_ratio(self.0.checked_div(&rhs.0)?)
    }

    /// `self * rhs` rounded half up, or `None` when it does not fit an
    /// `i64`.
    pub fn mul_round(self, rhs: i64) -> Option<i64> {
        let denom = self.denom() as i128;
        let scaled = (self.numer() as i128).checked_mul(rhs as i128)?;
        let rounded = scaled
            .checked_mul(2)?
            .checked_add(denom)?
            .div_euclid(2 * denom);
        i64::try_from(rounded).ok()
    }

    /// Closest fraction to `self` whose denominator does not exceed
    /// `max_denom`. Ties resolve to the continued-fraction convergent.
    pub fn limit_denominator(&self, max_denom: i64) -> Self {
        let max_denom = max_denom.max(1);
        if self.denom() <= max_denom {
            return *self;
        }

        // Convergents stay within |self| * max_denom, which fits because
        // denom > max_denom.
        let (mut p0, mut q0, mut p1, mut q1) = (0i64, 1i64, 1i64, 0i64);
        let (mut n, mut d) = (self.numer(), self.denom());
        loop {
            let a = n.div_euclid(d);
            let q2 = match a.checked_mul(q1).and_then(|x| x.checked_add(q0)) {
                Some(q2) if q2 <= max_denom => q2,
                _ => break,
            };
            (p0, q0, p1, q1) = (p1, q1, p0 + a * p1, q2);
            (n, d) = (d, n - a * d);
        }

        let k = (max_denom - q0) / q1;
        let (p_lower, q_lower) = (p0 + k * p1, q0 + k * q1);

        // |p/q - n/d| compared as |p*d - n*q| / q, scaled by the shared 1/d
        let (n, d) = (self.numer() as i128, self.denom() as i128);
        let gap = |p: i64, q: i64| (p as i128 * d - n * q as i128).abs();
        let convergent_wins = match (
            gap(p1, q1).checked_mul(q_lower as i128),
            gap(p_lower, q_lower).checked_mul(q1 as i128),
        ) {
            (Some(convergent), Some(lower)) => convergent <= lower,
            _ => true,
        };
        if convergent_wins {
            Self(Ratio::new(p1, q1))
        } else {
            Self(Ratio::new(p_lower, q_lower))
        }
    }
}

impl Default for RationalTime {
    fn default() -> Self {
        Self::ZERO
    }
}

impl From<i64> for RationalTime {
    fn from(value: i64) -> Self {
        Self::from_integer(value)
    }
}

impl TryFrom<(i64, i64)> for RationalTime {
    type Error = InvalidRational;

    fn try_from((numer, denom): (i64, i64)) -> Result<Self, Self::Error> {
        Self::new(numer, denom).ok_or(InvalidRational)
    }
}

impl From<RationalTime> for (i64, i64) {
    fn from(value: RationalTime) -> Self {
        (value.numer(), value.denom())
    }
}

impl Add for RationalTime {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl Sub for RationalTime {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl Mul for RationalTime {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        Self(self.0 * rhs.0)
    }
}

impl Mul<i64> for RationalTime {
    type Output = Self;

    fn mul(self, rhs: i64) -> Self {
        Self(self.0 * rhs)
    }
}

/// Panics on division by zero, like integer division. Use
/// [`RationalTime::checked_div`] when the divisor may be zero.
impl Div for RationalTime {
    type Output = Self;

    fn div(self, rhs: Self) -> Self {
        Self(self.0 / rhs.0)
    }
}

impl Neg for RationalTime {
    type Output = Self;

    fn neg(self) -> Self {
        Self(-self.0)
    }
}

impl fmt::Display for RationalTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_integer() {
            write!(f, "{}", self.numer())
        } else {
            write!(f, "{}/{}", self.numer(), self.denom())
        }
    }
}
