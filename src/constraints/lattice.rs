//! Constraint lattices.
//!
//! Every variable carries one [`Constraint`], an over-approximation of the values it
//! can hold. The lattices are ordered by precision:
//!
//! - **Join (∨)**: least upper bound. Merges the facts of two paths and can only
//!   lose precision.
//! - **Meet (∧)**: greatest lower bound. Combines two facts about the same value and
//!   can only gain precision. A meet can come out *empty*, meaning no value
//!   satisfies both facts and the code observing it is unreachable.
//!
//! Both operations satisfy the absorption laws, so `a.meet(b).join(a) == a`.
//!
//! | Variant | Abstract value |
//! |---|---|
//! | [`IntRange`] | signed range `[lo, hi]` of a fixed bit width |
//! | [`FloatConstraint`] | finite range plus NaN, the infinities and `-0.0` |
//! | [`ObjectConstraint`] | nullness, required supertypes, possible exact types, array length |
//! | `Token` | nothing; the ordering token is always top |

use std::{collections::BTreeSet, fmt};

use bitflags::bitflags;

use crate::{
    bytecode::{Cond, TypeDesc, THROWABLE},
    ir::{Literal, VarType},
};

/// A meet semi-lattice.
///
/// The meet must be idempotent, commutative and associative.
pub trait MeetSemiLattice: Clone + fmt::Debug + PartialEq {
    /// Greatest lower bound: the facts of both `self` and `other`.
    #[must_use]
    fn meet(&self, other: &Self) -> Self;

    /// Returns `true` if no value satisfies the constraint.
    fn is_bottom(&self) -> bool;
}

/// A join semi-lattice.
///
/// The join must be idempotent, commutative and associative.
pub trait JoinSemiLattice: Clone + fmt::Debug + PartialEq {
    /// Least upper bound: the facts common to `self` and `other`.
    #[must_use]
    fn join(&self, other: &Self) -> Self;

    /// Returns `true` if the constraint admits every value of its type.
    fn is_top(&self) -> bool;
}

fn signed_min(bits: u32) -> i128 {
    -(1i128 << (bits - 1))
}

fn signed_max(bits: u32) -> i128 {
    (1i128 << (bits - 1)) - 1
}

fn wrap_value(bits: u32, value: i128) -> i128 {
    let modulus = 1i128 << bits;
    let mut v = value.rem_euclid(modulus);
    if v > signed_max(bits) {
        v -= modulus;
    }
    v
}

/// A signed integer range of a fixed bit width.
///
/// Arithmetic wraps the way the JVM does. When a result range wraps around, the
/// range widens to the full width.
///
/// ```rust
/// use classflow::constraints::{IntRange, JoinSemiLattice, MeetSemiLattice};
///
/// let small = IntRange::new(32, 0, 10);
/// let positive = IntRange::new(32, 5, i64::from(i32::MAX));
/// assert_eq!(small.meet(&positive), IntRange::new(32, 5, 10));
/// assert!(small.meet(&IntRange::constant(32, 20)).is_bottom());
///
/// // i32::MAX + 1 wraps
/// let max = IntRange::constant(32, i64::from(i32::MAX));
/// assert_eq!(max.add(&IntRange::constant(32, 1)).as_constant(), Some(i64::from(i32::MIN)));
/// assert!(small.join(&max).contains(7));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IntRange {
    /// 32 or 64
    pub bits: u32,
    /// Smallest possible value
    pub lo: i64,
    /// Largest possible value; below `lo` when empty
    pub hi: i64,
}

impl IntRange {
    /// The range `[lo, hi]`. A range with `lo > hi` is empty.
    #[must_use]
    pub fn new(bits: u32, lo: i64, hi: i64) -> Self {
        if lo > hi {
            Self::empty(bits)
        } else {
            IntRange { bits, lo, hi }
        }
    }

    /// The single value `value`.
    #[must_use]
    pub fn constant(bits: u32, value: i64) -> Self {
        IntRange {
            bits,
            lo: value,
            hi: value,
        }
    }

    /// Every value of the width.
    #[must_use]
    pub fn full(bits: u32) -> Self {
        IntRange {
            bits,
            lo: signed_min(bits) as i64,
            hi: signed_max(bits) as i64,
        }
    }

    /// The canonical empty range.
    #[must_use]
    pub fn empty(bits: u32) -> Self {
        IntRange {
            bits,
            lo: signed_max(bits) as i64,
            hi: signed_min(bits) as i64,
        }
    }

    /// The range of a value after wrapping `[lo, hi]`, computed exactly, to the
    /// width.
    fn wrapping(bits: u32, lo: i128, hi: i128) -> Self {
        if hi - lo >= (1i128 << bits) - 1 {
            return Self::full(bits);
        }
        let (wl, wh) = (wrap_value(bits, lo), wrap_value(bits, hi));
        if wl <= wh {
            IntRange {
                bits,
                lo: wl as i64,
                hi: wh as i64,
            }
        } else {
            Self::full(bits)
        }
    }

    /// Returns `true` if `value` is in the range.
    #[must_use]
    pub fn contains(&self, value: i64) -> bool {
        self.lo <= value && value <= self.hi
    }

    /// The value if the range holds exactly one.
    #[must_use]
    pub fn as_constant(&self) -> Option<i64> {
        (self.lo == self.hi).then_some(self.lo)
    }

    /// Number of values in the range, saturating.
    #[must_use]
    pub fn size(&self) -> u128 {
        if self.is_bottom() {
            0
        } else {
            (i128::from(self.hi) - i128::from(self.lo) + 1) as u128
        }
    }

    fn lift(&self, other: &Self, f: impl FnOnce(i128, i128, i128, i128) -> (i128, i128)) -> Self {
        if self.is_bottom() || other.is_bottom() {
            return Self::empty(self.bits);
        }
        let (lo, hi) = f(
            i128::from(self.lo),
            i128::from(self.hi),
            i128::from(other.lo),
            i128::from(other.hi),
        );
        Self::wrapping(self.bits, lo, hi)
    }

    fn exact(&self, other: &Self, f: impl FnOnce(i128, i128) -> Option<i128>) -> Option<Self> {
        let (a, b) = (self.as_constant()?, other.as_constant()?);
        let v = f(i128::from(a), i128::from(b))?;
        let v = wrap_value(self.bits, v) as i64;
        Some(Self::constant(self.bits, v))
    }

    /// `self + other`
    #[must_use]
    pub fn add(&self, other: &Self) -> Self {
        self.lift(other, |al, ah, bl, bh| (al + bl, ah + bh))
    }

    /// `self - other`
    #[must_use]
    pub fn sub(&self, other: &Self) -> Self {
        self.lift(other, |al, ah, bl, bh| (al - bh, ah - bl))
    }

    /// `self * other`
    #[must_use]
    pub fn mul(&self, other: &Self) -> Self {
        self.lift(other, |al, ah, bl, bh| {
            let corners = [al * bl, al * bh, ah * bl, ah * bh];
            let lo = corners.iter().copied().min().unwrap_or(0);
            let hi = corners.iter().copied().max().unwrap_or(0);
            (lo, hi)
        })
    }

    /// `-self`
    #[must_use]
    pub fn neg(&self) -> Self {
        if self.is_bottom() {
            return *self;
        }
        Self::wrapping(self.bits, -i128::from(self.hi), -i128::from(self.lo))
    }

    /// `self / other`, truncating. Division by zero throws, so the result only
    /// describes the values produced when it does not.
    #[must_use]
    pub fn div(&self, other: &Self) -> Self {
        if self.is_bottom() || other.is_bottom() {
            return Self::empty(self.bits);
        }
        self.exact(other, |a, b| (b != 0).then(|| a / b))
            .unwrap_or_else(|| Self::full(self.bits))
    }

    /// `self % other`, with the sign of the dividend.
    #[must_use]
    pub fn rem(&self, other: &Self) -> Self {
        if self.is_bottom() || other.is_bottom() {
            return Self::empty(self.bits);
        }
        if let Some(exact) = self.exact(other, |a, b| (b != 0).then(|| a % b)) {
            return exact;
        }
        let Some(divisor) = other.as_constant().filter(|&d| d != 0) else {
            return Self::full(self.bits);
        };
        let bound = i128::from(divisor).abs() - 1;
        let (lo, hi) = if self.lo >= 0 {
            (0, bound.min(i128::from(self.hi)))
        } else if self.hi <= 0 {
            ((-bound).max(i128::from(self.lo)), 0)
        } else {
            (-bound, bound)
        };
        Self::wrapping(self.bits, lo, hi)
    }

    fn shift_mask(&self) -> i128 {
        i128::from(self.bits - 1)
    }

    /// `self << other`
    #[must_use]
    pub fn shl(&self, other: &Self) -> Self {
        let mask = self.shift_mask();
        self.bitwise(other, |a, b| a << (b & mask))
    }

    /// `self >> other`, arithmetic.
    #[must_use]
    pub fn shr(&self, other: &Self) -> Self {
        if self.is_bottom() || other.is_bottom() {
            return Self::empty(self.bits);
        }
        let mask = self.shift_mask();
        if let Some(s) = other.as_constant() {
            let s = i128::from(s) & mask;
            return Self::wrapping(self.bits, i128::from(self.lo) >> s, i128::from(self.hi) >> s);
        }
        Self::full(self.bits)
    }

    /// `self >>> other`, logical.
    #[must_use]
    pub fn ushr(&self, other: &Self) -> Self {
        if self.is_bottom() || other.is_bottom() {
            return Self::empty(self.bits);
        }
        let bits = self.bits;
        let mask = self.shift_mask();
        let unsigned = |v: i128| v.rem_euclid(1i128 << bits);
        if let Some(exact) = self.exact(other, |a, b| Some(unsigned(a) >> (b & mask))) {
            return exact;
        }
        match other.as_constant().map(|s| i128::from(s) & mask) {
            Some(s) if s > 0 => {
                let hi = ((1i128 << bits) - 1) >> s;
                if self.lo >= 0 {
                    Self::wrapping(bits, i128::from(self.lo) >> s, i128::from(self.hi) >> s)
                } else {
                    Self::wrapping(bits, 0, hi)
                }
            }
            _ => Self::full(bits),
        }
    }

    /// `self & other`
    #[must_use]
    pub fn and(&self, other: &Self) -> Self {
        if self.is_bottom() || other.is_bottom() {
            return Self::empty(self.bits);
        }
        if let Some(exact) = self.exact(other, |a, b| Some(a & b)) {
            return exact;
        }
        // Masking with a non-negative value bounds the result by the mask
        let mask = [self, other]
            .into_iter()
            .filter(|r| r.lo >= 0)
            .map(|r| r.hi)
            .min();
        match mask {
            Some(m) => Self::new(self.bits, 0, m),
            None => Self::full(self.bits),
        }
    }

    /// `self | other`
    #[must_use]
    pub fn or(&self, other: &Self) -> Self {
        self.bitwise(other, |a, b| a | b)
    }

    /// `self ^ other`
    #[must_use]
    pub fn xor(&self, other: &Self) -> Self {
        self.bitwise(other, |a, b| a ^ b)
    }

    fn bitwise(&self, other: &Self, f: impl FnOnce(i128, i128) -> i128) -> Self {
        if self.is_bottom() || other.is_bottom() {
            return Self::empty(self.bits);
        }
        self.exact(other, |a, b| Some(f(a, b)))
            .unwrap_or_else(|| Self::full(self.bits))
    }

    /// The same values at another width: sign extension when widening, wrapping
    /// when narrowing.
    #[must_use]
    pub fn convert(&self, bits: u32) -> Self {
        if self.is_bottom() {
            return Self::empty(bits);
        }
        Self::wrapping(bits, i128::from(self.lo), i128::from(self.hi))
    }

    /// Truncation to `width` bits followed by sign (`signed`) or zero extension back
    /// to 32 bits.
    #[must_use]
    pub fn truncate(&self, width: u32, signed: bool) -> Self {
        if self.is_bottom() {
            return *self;
        }
        let (min, max) = if signed {
            (signed_min(width), signed_max(width))
        } else {
            (0, (1i128 << width) - 1)
        };
        if let Some(v) = self.as_constant() {
            let modulus = 1i128 << width;
            let mut t = i128::from(v).rem_euclid(modulus);
            if signed && t > max {
                t -= modulus;
            }
            return Self::constant(self.bits, t as i64);
        }
        if i128::from(self.lo) >= min && i128::from(self.hi) <= max {
            *self
        } else {
            Self::new(self.bits, min as i64, max as i64)
        }
    }

    /// Three-way comparison of two ranges, as `lcmp` computes it.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Self {
        if self.is_bottom() || other.is_bottom() {
            return Self::empty(32);
        }
        let lo = if self.lo > other.hi {
            1
        } else if self.lo >= other.hi {
            0
        } else {
            -1
        };
        let hi = if self.hi < other.lo {
            -1
        } else if self.hi <= other.lo {
            0
        } else {
            1
        };
        Self::new(32, lo, hi)
    }

    /// The values of `self` for which `self cond other` holds for some value of
    /// `other`. Empty when there are none.
    #[must_use]
    pub fn satisfying(&self, cond: Cond, other: &Self) -> Self {
        if self.is_bottom() || other.is_bottom() {
            return Self::empty(self.bits);
        }
        let full = Self::full(self.bits);
        let bound = match cond {
            Cond::Eq => *other,
            Cond::Ne => {
                return match other.as_constant() {
                    Some(v) if self.lo == v && self.hi == v => Self::empty(self.bits),
                    Some(v) if self.lo == v => Self::new(self.bits, v + 1, self.hi),
                    Some(v) if self.hi == v => Self::new(self.bits, self.lo, v - 1),
                    _ => *self,
                };
            }
            Cond::Lt => match other.hi.checked_sub(1) {
                Some(hi) => Self::new(self.bits, full.lo, hi),
                None => Self::empty(self.bits),
            },
            Cond::Le => Self::new(self.bits, full.lo, other.hi),
            Cond::Gt => match other.lo.checked_add(1) {
                Some(lo) => Self::new(self.bits, lo, full.hi),
                None => Self::empty(self.bits),
            },
            Cond::Ge => Self::new(self.bits, other.lo, full.hi),
        };
        self.meet(&bound)
    }
}

impl MeetSemiLattice for IntRange {
    fn meet(&self, other: &Self) -> Self {
        Self::new(self.bits, self.lo.max(other.lo), self.hi.min(other.hi))
    }

    fn is_bottom(&self) -> bool {
        self.lo > self.hi
    }
}

impl JoinSemiLattice for IntRange {
    fn join(&self, other: &Self) -> Self {
        if self.is_bottom() {
            return *other;
        }
        if other.is_bottom() {
            return *self;
        }
        IntRange {
            bits: self.bits,
            lo: self.lo.min(other.lo),
            hi: self.hi.max(other.hi),
        }
    }

    fn is_top(&self) -> bool {
        *self == Self::full(self.bits)
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    /// Floating-point values outside the ordinary finite range
    pub struct FloatSpecials: u8 {
        /// Any NaN
        const NAN = 0x01;
        /// `+Infinity`
        const POS_INF = 0x02;
        /// `-Infinity`
        const NEG_INF = 0x04;
        /// `-0.0`
        const NEG_ZERO = 0x08;
    }
}

/// A floating-point constraint: a range of finite values (with `0.0` standing for
/// `+0.0`) plus a set of special values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FloatConstraint {
    /// 32 or 64
    pub bits: u32,
    /// Finite values, `None` if there are none
    pub range: Option<(f64, f64)>,
    /// Special values that are possible
    pub specials: FloatSpecials,
}

impl FloatConstraint {
    /// Every value of the width.
    #[must_use]
    pub fn full(bits: u32) -> Self {
        let max = if bits == 32 {
            f64::from(f32::MAX)
        } else {
            f64::MAX
        };
        FloatConstraint {
            bits,
            range: Some((-max, max)),
            specials: FloatSpecials::all(),
        }
    }

    /// No value at all.
    #[must_use]
    pub fn empty(bits: u32) -> Self {
        FloatConstraint {
            bits,
            range: None,
            specials: FloatSpecials::empty(),
        }
    }

    /// Exactly `value`.
    #[must_use]
    pub fn constant(bits: u32, value: f64) -> Self {
        let special = if value.is_nan() {
            Some(FloatSpecials::NAN)
        } else if value == f64::INFINITY {
            Some(FloatSpecials::POS_INF)
        } else if value == f64::NEG_INFINITY {
            Some(FloatSpecials::NEG_INF)
        } else if value == 0.0 && value.is_sign_negative() {
            Some(FloatSpecials::NEG_ZERO)
        } else {
            None
        };
        match special {
            Some(s) => FloatConstraint {
                bits,
                range: None,
                specials: s,
            },
            None => FloatConstraint {
                bits,
                range: Some((value, value)),
                specials: FloatSpecials::empty(),
            },
        }
    }

    /// The value if exactly one is possible. NaN is never reported as a constant.
    #[must_use]
    pub fn as_constant(&self) -> Option<f64> {
        match (self.range, self.specials) {
            (Some((lo, hi)), s) if lo == hi && s.is_empty() => Some(lo),
            (None, s) if s == FloatSpecials::POS_INF => Some(f64::INFINITY),
            (None, s) if s == FloatSpecials::NEG_INF => Some(f64::NEG_INFINITY),
            (None, s) if s == FloatSpecials::NEG_ZERO => Some(-0.0),
            _ => None,
        }
    }

    fn round(&self, value: f64) -> f64 {
        if self.bits == 32 {
            f64::from(value as f32)
        } else {
            value
        }
    }

    /// Applies `f` to two constants, or gives up with the full constraint.
    #[must_use]
    pub fn fold(&self, other: &Self, f: impl FnOnce(f64, f64) -> f64) -> Self {
        if self.is_bottom() || other.is_bottom() {
            return Self::empty(self.bits);
        }
        match (self.as_constant(), other.as_constant()) {
            (Some(a), Some(b)) => Self::constant(self.bits, self.round(f(a, b))),
            _ => Self::full(self.bits),
        }
    }

    /// `-self`
    #[must_use]
    pub fn neg(&self) -> Self {
        let mut specials = self.specials & FloatSpecials::NAN;
        if self.specials.contains(FloatSpecials::POS_INF) {
            specials |= FloatSpecials::NEG_INF;
        }
        if self.specials.contains(FloatSpecials::NEG_INF) {
            specials |= FloatSpecials::POS_INF;
        }
        let mut range = self.range.map(|(lo, hi)| (-hi, -lo));
        if let Some((lo, hi)) = self.range {
            if lo <= 0.0 && 0.0 <= hi {
                specials |= FloatSpecials::NEG_ZERO;
            }
        }
        if self.specials.contains(FloatSpecials::NEG_ZERO) {
            range = Some(match range {
                Some((lo, hi)) => (lo.min(0.0), hi.max(0.0)),
                None => (0.0, 0.0),
            });
        }
        // A range that only held zero now holds only -0.0
        if self.range == Some((0.0, 0.0)) && !self.specials.contains(FloatSpecials::NEG_ZERO) {
            range = None;
        }
        FloatConstraint {
            bits: self.bits,
            range,
            specials,
        }
    }
}

impl MeetSemiLattice for FloatConstraint {
    fn meet(&self, other: &Self) -> Self {
        let range = match (self.range, other.range) {
            (Some((al, ah)), Some((bl, bh))) => {
                let (lo, hi) = (al.max(bl), ah.min(bh));
                (lo <= hi).then_some((lo, hi))
            }
            _ => None,
        };
        FloatConstraint {
            bits: self.bits,
            range,
            specials: self.specials & other.specials,
        }
    }

    fn is_bottom(&self) -> bool {
        self.range.is_none() && self.specials.is_empty()
    }
}

impl JoinSemiLattice for FloatConstraint {
    fn join(&self, other: &Self) -> Self {
        let range = match (self.range, other.range) {
            (Some((al, ah)), Some((bl, bh))) => Some((al.min(bl), ah.max(bh))),
            (Some(r), None) | (None, Some(r)) => Some(r),
            (None, None) => None,
        };
        FloatConstraint {
            bits: self.bits,
            range,
            specials: self.specials | other.specials,
        }
    }

    fn is_top(&self) -> bool {
        *self == Self::full(self.bits)
    }
}

/// Name used for a reference type in object constraints: the internal name of a
/// class, the descriptor of an array.
#[must_use]
pub fn type_name(desc: &TypeDesc) -> String {
    match desc {
        TypeDesc::Object(name) => name.clone(),
        other => other.to_string(),
    }
}

/// A reference constraint.
///
/// Describes `null` (if `may_be_null`) together with the objects (if
/// `may_be_object`) that extend every type in `supertypes`, whose class is one of
/// `exact` when that is known, and whose array length lies in `array_length` when
/// that is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectConstraint {
    /// `null` is possible
    pub may_be_null: bool,
    /// A non-null object is possible
    pub may_be_object: bool,
    /// Every object extends all of these
    pub supertypes: BTreeSet<String>,
    /// The possible runtime classes, when known
    pub exact: Option<BTreeSet<String>>,
    /// Length of the array, when the object is an array of known length
    pub array_length: Option<IntRange>,
}

impl ObjectConstraint {
    /// Any reference.
    #[must_use]
    pub fn any() -> Self {
        ObjectConstraint {
            may_be_null: true,
            may_be_object: true,
            supertypes: BTreeSet::new(),
            exact: None,
            array_length: None,
        }
    }

    /// Only `null`.
    #[must_use]
    pub fn null() -> Self {
        ObjectConstraint {
            may_be_object: false,
            ..Self::any()
        }
    }

    /// No reference at all.
    #[must_use]
    pub fn empty() -> Self {
        ObjectConstraint {
            may_be_null: false,
            may_be_object: false,
            ..Self::any()
        }
    }

    /// A non-null object of exactly class `name`.
    #[must_use]
    pub fn exactly(name: &str) -> Self {
        ObjectConstraint {
            may_be_null: false,
            may_be_object: true,
            supertypes: [name.to_string()].into_iter().collect(),
            exact: Some([name.to_string()].into_iter().collect()),
            array_length: None,
        }
    }

    /// A reference, possibly `null`, extending `name`.
    #[must_use]
    pub fn extending(name: &str) -> Self {
        ObjectConstraint {
            supertypes: [name.to_string()].into_iter().collect(),
            ..Self::any()
        }
    }

    /// A thrown exception: non-null and a `Throwable`.
    #[must_use]
    pub fn thrown() -> Self {
        ObjectConstraint {
            may_be_null: false,
            ..Self::extending(THROWABLE)
        }
    }

    /// The same constraint without `null`.
    #[must_use]
    pub fn non_null(mut self) -> Self {
        self.may_be_null = false;
        self
    }

    /// Drops the object facts when no object is possible, so equal value sets have
    /// equal representations.
    fn normalized(mut self) -> Self {
        let impossible = self.exact.as_ref().is_some_and(BTreeSet::is_empty)
            || self.array_length.is_some_and(|len| len.is_bottom());
        if impossible {
            self.may_be_object = false;
        }
        if !self.may_be_object {
            self.supertypes.clear();
            self.exact = None;
            self.array_length = None;
        }
        self
    }
}

impl MeetSemiLattice for ObjectConstraint {
    fn meet(&self, other: &Self) -> Self {
        let exact = match (&self.exact, &other.exact) {
            (Some(a), Some(b)) => Some(a.intersection(b).cloned().collect()),
            (Some(a), None) | (None, Some(a)) => Some(a.clone()),
            (None, None) => None,
        };
        let array_length = match (self.array_length, other.array_length) {
            (Some(a), Some(b)) => Some(a.meet(&b)),
            (Some(a), None) | (None, Some(a)) => Some(a),
            (None, None) => None,
        };
        ObjectConstraint {
            may_be_null: self.may_be_null && other.may_be_null,
            may_be_object: self.may_be_object && other.may_be_object,
            supertypes: self.supertypes.union(&other.supertypes).cloned().collect(),
            exact,
            array_length,
        }
        .normalized()
    }

    fn is_bottom(&self) -> bool {
        !self.may_be_null && !self.may_be_object
    }
}

impl JoinSemiLattice for ObjectConstraint {
    fn join(&self, other: &Self) -> Self {
        let may_be_null = self.may_be_null || other.may_be_null;
        if !other.may_be_object {
            return ObjectConstraint {
                may_be_null,
                ..self.clone()
            };
        }
        if !self.may_be_object {
            return ObjectConstraint {
                may_be_null,
                ..other.clone()
            };
        }
        let exact = match (&self.exact, &other.exact) {
            (Some(a), Some(b)) => Some(a.union(b).cloned().collect()),
            _ => None,
        };
        let array_length = match (self.array_length, other.array_length) {
            (Some(a), Some(b)) => Some(a.join(&b)),
            _ => None,
        };
        ObjectConstraint {
            may_be_null,
            may_be_object: true,
            supertypes: self
                .supertypes
                .intersection(&other.supertypes)
                .cloned()
                .collect(),
            exact,
            array_length,
        }
    }

    fn is_top(&self) -> bool {
        *self == Self::any()
    }
}

/// The constraint on one variable.
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    /// `int` or `long`
    Int(IntRange),
    /// `float` or `double`
    Float(FloatConstraint),
    /// A reference
    Object(ObjectConstraint),
    /// The ordering token
    Token,
}

impl Constraint {
    /// The least precise constraint for a variable of type `ty`.
    #[must_use]
    pub fn top(ty: VarType) -> Self {
        match ty {
            VarType::Int => Constraint::Int(IntRange::full(32)),
            VarType::Long => Constraint::Int(IntRange::full(64)),
            VarType::Float => Constraint::Float(FloatConstraint::full(32)),
            VarType::Double => Constraint::Float(FloatConstraint::full(64)),
            VarType::Object => Constraint::Object(ObjectConstraint::any()),
            VarType::Token => Constraint::Token,
        }
    }

    /// The empty constraint for a variable of type `ty`. Fixed-point iteration
    /// starts here.
    #[must_use]
    pub fn bottom(ty: VarType) -> Self {
        match ty {
            VarType::Int => Constraint::Int(IntRange::empty(32)),
            VarType::Long => Constraint::Int(IntRange::empty(64)),
            VarType::Float => Constraint::Float(FloatConstraint::empty(32)),
            VarType::Double => Constraint::Float(FloatConstraint::empty(64)),
            VarType::Object => Constraint::Object(ObjectConstraint::empty()),
            VarType::Token => Constraint::Token,
        }
    }

    /// The constraint holding exactly `literal`.
    #[must_use]
    pub fn from_literal(literal: &Literal) -> Self {
        match literal {
            Literal::Int(v) => Constraint::Int(IntRange::constant(32, i64::from(*v))),
            Literal::Long(v) => Constraint::Int(IntRange::constant(64, *v)),
            Literal::Float(v) => Constraint::Float(FloatConstraint::constant(32, f64::from(*v))),
            Literal::Double(v) => Constraint::Float(FloatConstraint::constant(64, *v)),
            Literal::Null => Constraint::Object(ObjectConstraint::null()),
            Literal::String(_) => Constraint::Object(ObjectConstraint::exactly("java/lang/String")),
            Literal::Class(_) => Constraint::Object(ObjectConstraint::exactly("java/lang/Class")),
        }
    }

    /// The literal this constraint pins the variable to, if any.
    #[must_use]
    pub fn constant(&self) -> Option<Literal> {
        match self {
            Constraint::Int(range) => {
                let v = range.as_constant()?;
                if range.bits == 32 {
                    i32::try_from(v).ok().map(Literal::Int)
                } else {
                    Some(Literal::Long(v))
                }
            }
            Constraint::Float(float) => {
                let v = float.as_constant()?;
                Some(if float.bits == 32 {
                    Literal::Float(v as f32)
                } else {
                    Literal::Double(v)
                })
            }
            Constraint::Object(object) => {
                (object.may_be_null && !object.may_be_object).then_some(Literal::Null)
            }
            Constraint::Token => None,
        }
    }

    /// What is known of a value `self` once `self cond other` has been observed to
    /// hold. Comes out empty when the comparison cannot hold.
    ///
    /// References narrow on `==` (both sides name the same object) and on `!=`
    /// against `null`; floats are left alone.
    #[must_use]
    pub fn satisfying(&self, cond: Cond, other: &Self) -> Self {
        match (self, other) {
            (Constraint::Int(a), Constraint::Int(b)) => Constraint::Int(a.satisfying(cond, b)),
            (Constraint::Object(a), Constraint::Object(b)) => match cond {
                Cond::Eq => Constraint::Object(a.meet(b)),
                Cond::Ne if b.may_be_null && !b.may_be_object => {
                    Constraint::Object(a.clone().non_null())
                }
                _ => self.clone(),
            },
            _ => self.clone(),
        }
    }

    /// The integer range, for `int` and `long` constraints.
    #[must_use]
    pub fn as_int(&self) -> Option<&IntRange> {
        match self {
            Constraint::Int(range) => Some(range),
            _ => None,
        }
    }

    /// The float constraint, for `float` and `double` constraints.
    #[must_use]
    pub fn as_float(&self) -> Option<&FloatConstraint> {
        match self {
            Constraint::Float(float) => Some(float),
            _ => None,
        }
    }

    /// The reference constraint, for references.
    #[must_use]
    pub fn as_object(&self) -> Option<&ObjectConstraint> {
        match self {
            Constraint::Object(object) => Some(object),
            _ => None,
        }
    }
}

impl MeetSemiLattice for Constraint {
    fn meet(&self, other: &Self) -> Self {
        match (self, other) {
            (Constraint::Int(a), Constraint::Int(b)) => Constraint::Int(a.meet(b)),
            (Constraint::Float(a), Constraint::Float(b)) => Constraint::Float(a.meet(b)),
            (Constraint::Object(a), Constraint::Object(b)) => Constraint::Object(a.meet(b)),
            _ => self.clone(),
        }
    }

    fn is_bottom(&self) -> bool {
        match self {
            Constraint::Int(range) => range.is_bottom(),
            Constraint::Float(float) => float.is_bottom(),
            Constraint::Object(object) => object.is_bottom(),
            Constraint::Token => false,
        }
    }
}

impl JoinSemiLattice for Constraint {
    fn join(&self, other: &Self) -> Self {
        match (self, other) {
            (Constraint::Int(a), Constraint::Int(b)) => Constraint::Int(a.join(b)),
            (Constraint::Float(a), Constraint::Float(b)) => Constraint::Float(a.join(b)),
            (Constraint::Object(a), Constraint::Object(b)) => Constraint::Object(a.join(b)),
            _ => self.clone(),
        }
    }

    fn is_top(&self) -> bool {
        match self {
            Constraint::Int(range) => range.is_top(),
            Constraint::Float(float) => float.is_top(),
            Constraint::Object(object) => object.is_top(),
            Constraint::Token => true,
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constraint::Int(r) if r.is_bottom() => write!(f, "i{}:empty", r.bits),
            Constraint::Int(r) => write!(f, "i{}:[{}, {}]", r.bits, r.lo, r.hi),
            Constraint::Float(c) => write!(f, "f{}:{:?} {:?}", c.bits, c.range, c.specials),
            Constraint::Object(o) => write!(
                f,
                "obj(null={}, object={}, super={:?})",
                o.may_be_null, o.may_be_object, o.supertypes
            ),
            Constraint::Token => write!(f, "token"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(lo: i64, hi: i64) -> IntRange {
        IntRange::new(32, lo, hi)
    }

    #[test]
    fn test_absorption_holds_for_ranges() {
        let samples = [
            int(0, 10),
            int(-5, 5),
            int(20, 30),
            IntRange::full(32),
            IntRange::empty(32),
            IntRange::constant(32, 7),
        ];
        for a in &samples {
            for b in &samples {
                assert_eq!(a.meet(b).join(a), *a, "{a:?} {b:?}");
                assert_eq!(a.join(b).meet(a), *a, "{a:?} {b:?}");
            }
        }
    }

    #[test]
    fn test_contradictory_meet_is_empty() {
        let negative = Constraint::Int(int(i64::from(i32::MIN), -1));
        let positive = Constraint::Int(int(0, i64::from(i32::MAX)));
        assert!(negative.meet(&positive).is_bottom());

        let null = Constraint::Object(ObjectConstraint::null());
        let object = Constraint::Object(ObjectConstraint::exactly("A"));
        assert!(null.meet(&object).is_bottom());
        assert!(ObjectConstraint::exactly("A")
            .meet(&ObjectConstraint::exactly("B"))
            .is_bottom());
    }

    #[test]
    fn test_conditions_narrow_ranges() {
        let any = IntRange::full(32);
        let five = IntRange::constant(32, 5);
        assert_eq!(any.satisfying(Cond::Lt, &five), int(i64::from(i32::MIN), 4));
        assert_eq!(any.satisfying(Cond::Ge, &five), int(5, i64::from(i32::MAX)));
        assert_eq!(any.satisfying(Cond::Eq, &five), five);
        assert_eq!(int(5, 9).satisfying(Cond::Ne, &five), int(6, 9));
        assert_eq!(int(0, 5).satisfying(Cond::Ne, &five), int(0, 4));
        assert_eq!(int(0, 9).satisfying(Cond::Ne, &five), int(0, 9));
        assert!(five.satisfying(Cond::Ne, &five).is_bottom());

        // x < 0 and then x > 5
        let negative = any.satisfying(Cond::Lt, &IntRange::constant(32, 0));
        assert!(negative.satisfying(Cond::Gt, &five).is_bottom());
        let min = IntRange::constant(32, i64::from(i32::MIN));
        assert!(any.satisfying(Cond::Lt, &min).is_bottom());
    }

    #[test]
    fn test_conditions_narrow_references() {
        let any = Constraint::Object(ObjectConstraint::any());
        let null = Constraint::Object(ObjectConstraint::null());
        let checked = any.satisfying(Cond::Ne, &null);
        assert_eq!(checked, Constraint::Object(ObjectConstraint::any().non_null()));
        assert_eq!(any.satisfying(Cond::Eq, &null).constant(), Some(Literal::Null));
        assert!(null.satisfying(Cond::Ne, &null).is_bottom());
        assert_eq!(any.satisfying(Cond::Lt, &null), any);
    }

    #[test]
    fn test_absorption_holds_for_objects() {
        let samples = [
            ObjectConstraint::any(),
            ObjectConstraint::null(),
            ObjectConstraint::empty(),
            ObjectConstraint::exactly("A"),
            ObjectConstraint::extending("B").non_null(),
            ObjectConstraint::thrown(),
        ];
        for a in &samples {
            for b in &samples {
                assert_eq!(a.meet(b).join(a), *a, "{a:?} {b:?}");
            }
        }
    }

    #[test]
    fn test_wrapping_arithmetic() {
        let max = IntRange::constant(32, i64::from(i32::MAX));
        assert_eq!(max.add(&IntRange::constant(32, 1)), IntRange::constant(32, i64::from(i32::MIN)));
        // A range crossing the boundary widens
        assert!(int(0, i64::from(i32::MAX)).add(&int(0, 1)).is_top());
        assert_eq!(int(1, 3).mul(&int(-2, 2)), int(-6, 6));
        assert_eq!(int(2, 4).sub(&int(1, 1)), int(1, 3));
        assert_eq!(IntRange::constant(32, i64::from(i32::MIN)).neg().as_constant(), Some(i64::from(i32::MIN)));
        assert_eq!(
            IntRange::constant(32, i64::from(i32::MIN)).div(&IntRange::constant(32, -1)),
            IntRange::constant(32, i64::from(i32::MIN))
        );
    }

    #[test]
    fn test_division_and_bits() {
        assert_eq!(IntRange::constant(32, -7).div(&IntRange::constant(32, 2)).as_constant(), Some(-3));
        assert_eq!(IntRange::constant(32, -7).rem(&IntRange::constant(32, 2)).as_constant(), Some(-1));
        assert_eq!(int(0, 100).rem(&IntRange::constant(32, 10)), int(0, 9));
        assert_eq!(IntRange::full(32).and(&IntRange::constant(32, 0xff)), int(0, 0xff));
        assert_eq!(IntRange::constant(32, 1).shl(&IntRange::constant(32, 33)).as_constant(), Some(2));
        assert_eq!(IntRange::constant(32, -1).ushr(&IntRange::constant(32, 28)).as_constant(), Some(15));
        assert_eq!(int(-16, 16).shr(&IntRange::constant(32, 2)), int(-4, 4));
        assert_eq!(IntRange::constant(32, 200).truncate(8, true).as_constant(), Some(-56));
        assert_eq!(IntRange::full(32).truncate(16, false), int(0, 65535));
        assert_eq!(IntRange::constant(64, 1 << 40).convert(32).as_constant(), Some(0));
    }

    #[test]
    fn test_compare_ranges() {
        let long = |lo, hi| IntRange::new(64, lo, hi);
        assert_eq!(long(0, 5).compare(&long(10, 20)).as_constant(), Some(-1));
        assert_eq!(long(30, 40).compare(&long(10, 20)).as_constant(), Some(1));
        assert_eq!(long(3, 3).compare(&long(3, 3)).as_constant(), Some(0));
        assert_eq!(long(0, 10).compare(&long(5, 6)), int(-1, 1));
        assert_eq!(long(0, 5).compare(&long(5, 9)), int(-1, 0));
    }

    #[test]
    fn test_float_specials() {
        let nan = FloatConstraint::constant(64, f64::NAN);
        assert_eq!(nan.as_constant(), None);
        let zero = FloatConstraint::constant(64, 0.0);
        assert_eq!(zero.neg().as_constant(), Some(-0.0));
        assert!(zero.neg().as_constant().unwrap().is_sign_negative());
        let inf = FloatConstraint::constant(32, f64::INFINITY);
        assert_eq!(inf.neg().as_constant(), Some(f64::NEG_INFINITY));
        let sum = FloatConstraint::constant(32, 1.5).fold(&FloatConstraint::constant(32, 2.0), |a, b| a + b);
        assert_eq!(Constraint::Float(sum).constant(), Some(Literal::Float(3.5)));
        assert!(zero.meet(&inf).is_bottom());
        assert_eq!(zero.join(&inf).meet(&zero), zero);
    }

    #[test]
    fn test_constant_literals() {
        assert_eq!(Constraint::top(VarType::Int).constant(), None);
        assert_eq!(
            Constraint::from_literal(&Literal::Long(-3)).constant(),
            Some(Literal::Long(-3))
        );
        assert_eq!(
            Constraint::from_literal(&Literal::Null).constant(),
            Some(Literal::Null)
        );
        assert_eq!(
            Constraint::from_literal(&Literal::String("s".into())).constant(),
            None
        );
        assert!(Constraint::bottom(VarType::Object).is_bottom());
        assert!(!Constraint::Token.is_bottom());
    }
}
