//! The tagged value-type lattice that drives slot allocation and code
//! generation.
//!
//! `DataType` is the single type tag used throughout the compiler: the slot
//! allocator stores one per variable, every AST emitter sets one on its
//! result, and the runtime ABI's `__runtime_js_equal` takes two of them to
//! decide how to compare untyped values.

use std::fmt;

/// Tag for every value shape the compiler and runtime know about.
///
/// Width is implicit in the tag (e.g. `INT16` is always two bytes); `NUMBER`
/// is not a distinct representation, it is an alias for `FLOAT64` used by
/// inference when a literal or expression has no narrower declared type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum DataType {
    Unknown,
    Void,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    Boolean,
    String,
    Array,
    Tensor,
    Regex,
    Promise,
    ClassInstance,
    Function,
    Slice,
    RuntimeObject,
    Any,
}

impl DataType {
    /// `NUMBER` in spec terms: untyped numeric literals infer to this.
    pub const NUMBER: DataType = DataType::Float64;

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            DataType::Int8
                | DataType::Int16
                | DataType::Int32
                | DataType::Int64
                | DataType::UInt8
                | DataType::UInt16
                | DataType::UInt32
                | DataType::UInt64
        )
    }

    pub fn is_float(self) -> bool {
        matches!(self, DataType::Float32 | DataType::Float64)
    }

    pub fn is_numeric(self) -> bool {
        self.is_integer() || self.is_float()
    }

    pub fn is_unsigned(self) -> bool {
        matches!(
            self,
            DataType::UInt8 | DataType::UInt16 | DataType::UInt32 | DataType::UInt64
        )
    }

    /// Byte width of the value in a register/slot; `0` for heap-object tags
    /// (strings, arrays, ...) where the slot holds a pointer-sized handle.
    pub fn width(self) -> usize {
        match self {
            DataType::Int8 | DataType::UInt8 | DataType::Boolean => 1,
            DataType::Int16 | DataType::UInt16 => 2,
            DataType::Int32 | DataType::UInt32 | DataType::Float32 => 4,
            DataType::Int64
            | DataType::UInt64
            | DataType::Float64
            | DataType::String
            | DataType::Array
            | DataType::Tensor
            | DataType::Regex
            | DataType::Promise
            | DataType::ClassInstance
            | DataType::Function
            | DataType::Slice
            | DataType::RuntimeObject
            | DataType::Any => 8,
            DataType::Void | DataType::Unknown => 0,
        }
    }

    /// Rank within the integer widening hierarchy used by
    /// [`SlotAllocator::get_cast_type`](crate::compiler::slots::SlotAllocator::get_cast_type).
    /// `int8 < uint8 < int16 < uint16 < int32 < uint32 < int64 < uint64`.
    fn integer_rank(self) -> Option<u8> {
        match self {
            DataType::Int8 => Some(0),
            DataType::UInt8 => Some(1),
            DataType::Int16 => Some(2),
            DataType::UInt16 => Some(3),
            DataType::Int32 => Some(4),
            DataType::UInt32 => Some(5),
            DataType::Int64 => Some(6),
            DataType::UInt64 => Some(7),
            _ => None,
        }
    }

    fn float_rank(self) -> Option<u8> {
        match self {
            DataType::Float32 => Some(0),
            DataType::Float64 => Some(1),
            _ => None,
        }
    }

    /// Widest of two numeric types by the hierarchy above. STRING dominates
    /// any other operand; UNKNOWN propagates (an unresolved operand poisons
    /// the result rather than guessing a type).
    pub fn widen(self, other: DataType) -> DataType {
        if self == DataType::Unknown || other == DataType::Unknown {
            return DataType::Unknown;
        }
        if self == DataType::String || other == DataType::String {
            return DataType::String;
        }
        if self.is_float() || other.is_float() {
            let a = self.float_rank().unwrap_or(1);
            let b = other.float_rank().unwrap_or(1);
            return if a.max(b) == 0 {
                DataType::Float32
            } else {
                DataType::Float64
            };
        }
        if self.is_integer() && other.is_integer() {
            let a = self.integer_rank().unwrap();
            let b = other.integer_rank().unwrap();
            return if a >= b { self } else { other };
        }
        // Mixed non-numeric, non-string: no meaningful widening, caller
        // should have gone through __runtime_js_equal / __runtime_pow etc.
        DataType::Unknown
    }

    /// `false` iff there is a widening path from `from` to `to` in the
    /// integer/float hierarchy without loss of represented range.
    pub fn needs_casting(from: DataType, to: DataType) -> bool {
        if from == to {
            return false;
        }
        if from.is_integer() && to.is_integer() {
            return from.integer_rank().unwrap() > to.integer_rank().unwrap();
        }
        if from.is_float() && to.is_float() {
            return from.float_rank().unwrap() > to.float_rank().unwrap();
        }
        if from.is_integer() && to.is_float() {
            return false;
        }
        true
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Unknown => "unknown",
            DataType::Void => "void",
            DataType::Int8 => "int8",
            DataType::Int16 => "int16",
            DataType::Int32 => "int32",
            DataType::Int64 => "int64",
            DataType::UInt8 => "uint8",
            DataType::UInt16 => "uint16",
            DataType::UInt32 => "uint32",
            DataType::UInt64 => "uint64",
            DataType::Float32 => "float32",
            DataType::Float64 => "float64",
            DataType::Boolean => "boolean",
            DataType::String => "string",
            DataType::Array => "array",
            DataType::Tensor => "tensor",
            DataType::Regex => "regex",
            DataType::Promise => "promise",
            DataType::ClassInstance => "class_instance",
            DataType::Function => "function",
            DataType::Slice => "slice",
            DataType::RuntimeObject => "runtime_object",
            DataType::Any => "any",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widen_integers_by_rank() {
        assert_eq!(DataType::Int8.widen(DataType::Int64), DataType::Int64);
        assert_eq!(DataType::UInt8.widen(DataType::Int8), DataType::UInt8);
    }

    #[test]
    fn widen_with_float_prefers_float64_unless_both_float32() {
        assert_eq!(DataType::Int32.widen(DataType::Float32), DataType::Float32);
        assert_eq!(DataType::Int64.widen(DataType::Float64), DataType::Float64);
        assert_eq!(
            DataType::Float32.widen(DataType::Float32),
            DataType::Float32
        );
    }

    #[test]
    fn widen_string_dominates() {
        assert_eq!(DataType::String.widen(DataType::Int64), DataType::String);
        assert_eq!(DataType::Boolean.widen(DataType::String), DataType::String);
    }

    #[test]
    fn widen_unknown_propagates() {
        assert_eq!(DataType::Unknown.widen(DataType::Int64), DataType::Unknown);
        assert_eq!(DataType::String.widen(DataType::Unknown), DataType::Unknown);
    }

    #[test]
    fn needs_casting_widening_path_is_free() {
        assert!(!DataType::needs_casting(DataType::Int8, DataType::Int64));
        assert!(!DataType::needs_casting(DataType::Int32, DataType::Float64));
        assert!(DataType::needs_casting(DataType::Int64, DataType::Int8));
    }

    #[test]
    fn widths_match_tag() {
        assert_eq!(DataType::Int8.width(), 1);
        assert_eq!(DataType::Int64.width(), 8);
        assert_eq!(DataType::Float32.width(), 4);
        assert_eq!(DataType::String.width(), 8);
    }
}
