//! The closed set of value types the IR can express.

use std::fmt;

/// The type of a [`Value`](super::value::ValueData).
///
/// Mirrors the original course project's `ValueType` one-for-one; `Unknown`
/// is reserved for a `Value` that hasn't been fully constructed yet and is
/// never valid on a finished function (see [`ValueData::is_valid`](super::value::ValueData::is_valid)).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Void,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Pointer,
    Unknown,
}

impl ValueType {
    /// The literal type-id string used in panic messages, logs and tests.
    pub fn as_id_str(self) -> &'static str {
        match self {
            ValueType::Unknown => "vt-unknown?",
            ValueType::Void => "void",
            ValueType::I8 => "i8",
            ValueType::I16 => "i16",
            ValueType::I32 => "i32",
            ValueType::I64 => "i64",
            ValueType::U8 => "ui8",
            ValueType::U16 => "ui16",
            ValueType::U32 => "ui32",
            ValueType::U64 => "ui64",
            ValueType::F32 => "f32",
            ValueType::F64 => "f64",
            ValueType::Pointer => "ptr",
        }
    }

    /// True for the eight fixed-width integer types (signed, unsigned or pointer-sized).
    pub fn is_integral(self) -> bool {
        matches!(
            self,
            ValueType::I8
                | ValueType::I16
                | ValueType::I32
                | ValueType::I64
                | ValueType::U8
                | ValueType::U16
                | ValueType::U32
                | ValueType::U64
        )
    }

    /// True for `F32`/`F64`.
    pub fn is_floating_point(self) -> bool {
        matches!(self, ValueType::F32 | ValueType::F64)
    }

    /// Bit width of the type's storage, used by the `Shl`/`Shr`/`Ashr` peepholes.
    pub fn bit_width(self) -> Option<u32> {
        match self {
            ValueType::I8 | ValueType::U8 => Some(8),
            ValueType::I16 | ValueType::U16 => Some(16),
            ValueType::I32 | ValueType::U32 => Some(32),
            ValueType::I64 | ValueType::U64 => Some(64),
            _ => None,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_id_str())
    }
}
