//! `Value`: a single SSA name, optionally carrying an interned constant.

use std::collections::BTreeSet;

use super::entities::InstRef;
use super::types::ValueType;

/// The fixed step liveness numbers advance by at every non-Phi instruction
/// and at every block boundary (also used as spill/fill slack by the
/// register allocator).
pub const LIVE_NUMBER_STEP: u64 = 2;

/// A half-open `[start, end)` range over the live-number line.
///
/// Used both as a block's live range and as a value's live interval; the
/// original course project aliases the two (`using LiveInterval = LiveRange`)
/// and this crate keeps that structure as two distinct type names over one
/// representation so call sites read naturally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LiveRange {
    pub start: u64,
    pub end: u64,
}

impl LiveRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Extend `self` to also cover `other`. Live holes are deliberately not
    /// modeled: an empty range is replaced outright rather than unioned.
    pub fn unite_with(&mut self, other: LiveRange) {
        if self.start == self.end {
            *self = other;
        } else {
            self.start = self.start.min(other.start);
            self.end = self.end.max(other.end);
        }
    }

    /// A range is only meaningful once it spans at least one spill/fill step.
    pub fn is_valid(&self) -> bool {
        self.end > self.start && self.end - self.start >= LIVE_NUMBER_STEP
    }

    pub fn contains(&self, point: u64) -> bool {
        self.start <= point && point < self.end
    }
}

/// `LiveRange` and `LiveInterval` share a representation; see [`LiveRange`].
pub type LiveInterval = LiveRange;

/// Where a value's register allocator output ended up living.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    Unassigned,
    Gp(u32),
    Fp(u32),
    Stack(u32),
}

impl Default for Location {
    fn default() -> Self {
        Location::Unassigned
    }
}

/// A constant payload, tagged by its source type.
///
/// Equality and hashing are defined over the exact bit pattern plus the
/// runtime type discriminant, which is what makes constant interning a
/// bit-pattern operation rather than an abstract-value one: `0u8` and `0u64`
/// never intern to the same `Value`, and `+0.0`/`-0.0` (differing only in
/// their sign bit) never do either.
#[derive(Debug, Clone, Copy)]
pub enum ConstValue {
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
}

impl ConstValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            ConstValue::I8(_) => ValueType::I8,
            ConstValue::I16(_) => ValueType::I16,
            ConstValue::I32(_) => ValueType::I32,
            ConstValue::I64(_) => ValueType::I64,
            ConstValue::U8(_) => ValueType::U8,
            ConstValue::U16(_) => ValueType::U16,
            ConstValue::U32(_) => ValueType::U32,
            ConstValue::U64(_) => ValueType::U64,
            ConstValue::F32(_) => ValueType::F32,
            ConstValue::F64(_) => ValueType::F64,
        }
    }

    /// The constant's bit pattern, zero-extended into a `u64`. Used as the
    /// interning key together with [`ConstValue::value_type`].
    pub fn to_bits(&self) -> u64 {
        match *self {
            ConstValue::I8(v) => v as u8 as u64,
            ConstValue::I16(v) => v as u16 as u64,
            ConstValue::I32(v) => v as u32 as u64,
            ConstValue::I64(v) => v as u64,
            ConstValue::U8(v) => v as u64,
            ConstValue::U16(v) => v as u64,
            ConstValue::U32(v) => v as u64,
            ConstValue::U64(v) => v,
            ConstValue::F32(v) => v.to_bits() as u64,
            ConstValue::F64(v) => v.to_bits(),
        }
    }

    /// True for the additive/bitwise identity element of the constant's type.
    pub fn is_zero(&self) -> bool {
        match *self {
            ConstValue::I8(v) => v == 0,
            ConstValue::I16(v) => v == 0,
            ConstValue::I32(v) => v == 0,
            ConstValue::I64(v) => v == 0,
            ConstValue::U8(v) => v == 0,
            ConstValue::U16(v) => v == 0,
            ConstValue::U32(v) => v == 0,
            ConstValue::U64(v) => v == 0,
            ConstValue::F32(v) => v == 0.0,
            ConstValue::F64(v) => v == 0.0,
        }
    }

    pub fn to_string_value(&self) -> String {
        match *self {
            ConstValue::I8(v) => v.to_string(),
            ConstValue::I16(v) => v.to_string(),
            ConstValue::I32(v) => v.to_string(),
            ConstValue::I64(v) => v.to_string(),
            ConstValue::U8(v) => v.to_string(),
            ConstValue::U16(v) => v.to_string(),
            ConstValue::U32(v) => v.to_string(),
            ConstValue::U64(v) => v.to_string(),
            ConstValue::F32(v) => v.to_string(),
            ConstValue::F64(v) => v.to_string(),
        }
    }
}

impl PartialEq for ConstValue {
    fn eq(&self, other: &Self) -> bool {
        self.value_type() == other.value_type() && self.to_bits() == other.to_bits()
    }
}
impl Eq for ConstValue {}

impl std::hash::Hash for ConstValue {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.value_type().hash(state);
        self.to_bits().hash(state);
    }
}

/// A single SSA name: either a declared-type value produced by an
/// instruction (or a function argument, which has no producer), or an
/// interned constant.
#[derive(Debug, Clone)]
pub struct ValueData {
    ty: ValueType,
    constant: Option<ConstValue>,
    producer: Option<InstRef>,
    users: BTreeSet<InstRef>,
    interval: LiveInterval,
    location: Location,
}

impl ValueData {
    pub fn new(ty: ValueType) -> Self {
        Self {
            ty,
            constant: None,
            producer: None,
            users: BTreeSet::new(),
            interval: LiveInterval::default(),
            location: Location::Unassigned,
        }
    }

    pub fn with_constant(constant: ConstValue) -> Self {
        Self {
            ty: constant.value_type(),
            constant: Some(constant),
            producer: None,
            users: BTreeSet::new(),
            interval: LiveInterval::default(),
            location: Location::Unassigned,
        }
    }

    pub fn value_type(&self) -> ValueType {
        self.ty
    }

    pub fn is_integral(&self) -> bool {
        self.ty.is_integral()
    }

    pub fn is_floating_point(&self) -> bool {
        self.ty.is_floating_point()
    }

    pub fn has_constant(&self) -> bool {
        self.constant.is_some()
    }

    pub fn constant(&self) -> Option<ConstValue> {
        self.constant
    }

    pub fn is_zero_constant(&self) -> bool {
        self.constant.map(|c| c.is_zero()).unwrap_or(false)
    }

    pub fn producer(&self) -> Option<InstRef> {
        self.producer
    }

    pub fn set_producer(&mut self, producer: Option<InstRef>) {
        self.producer = producer;
    }

    pub fn users(&self) -> &BTreeSet<InstRef> {
        &self.users
    }

    pub fn add_user(&mut self, user: InstRef) {
        self.users.insert(user);
    }

    pub fn remove_user(&mut self, user: InstRef) {
        self.users.remove(&user);
    }

    pub fn has_user(&self, user: InstRef) -> bool {
        self.users.contains(&user)
    }

    pub fn interval(&self) -> LiveInterval {
        self.interval
    }

    pub fn interval_mut(&mut self) -> &mut LiveInterval {
        &mut self.interval
    }

    pub fn location(&self) -> Location {
        self.location
    }

    pub fn set_location(&mut self, location: Location) {
        self.location = location;
    }

    /// A printable operand string: the constant's literal value if it has
    /// one, else its SSA name (filled in by the caller, which knows the
    /// `ValueRef` this data belongs to).
    pub fn value_str(&self, name: impl FnOnce() -> String) -> String {
        match self.constant {
            Some(c) if self.ty != ValueType::Pointer => c.to_string_value(),
            _ => name(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.ty != ValueType::Unknown
    }
}
