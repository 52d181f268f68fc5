//! The tagged value union and its shallow operations.
//!
//! A [`Value`] is one of: `None`, a boolean, a 64-bit integer, a double, the
//! `NotImplemented` marker, the internal kwargs sentinel, or a reference to
//! a heap object. The kwargs sentinel is used by the hash table to mark
//! empty and tombstoned slots and by the calling convention to mark
//! keyword arguments and unset parameter slots on the stack; it must never
//! escape to managed code as an ordinary value.

use std::fmt;

// =============================================================================
// Heap handles
// =============================================================================

/// Opaque handle to a heap object.
///
/// Handles are indices into the runtime heap's object slab. A handle stays
/// valid for as long as the object is reachable; objects are only destroyed
/// by the collector, which by construction cannot free anything still
/// referenced from a root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjRef(u32);

impl ObjRef {
    /// Build a handle from a raw slab index.
    #[inline]
    pub const fn from_raw(index: u32) -> Self {
        Self(index)
    }

    /// The raw slab index.
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

// =============================================================================
// Kwargs sentinel payloads
// =============================================================================

/// Kwargs payload marking an unset parameter slot or an empty table slot.
pub const KWARGS_UNSET: u32 = 0;
/// Kwargs payload marking a single `*`-expanded value on the stack.
pub const KWARGS_SINGLE: u32 = u32::MAX;
/// Kwargs payload marking a `*expression` iterable expansion.
pub const KWARGS_LIST: u32 = u32::MAX - 1;
/// Kwargs payload marking a `**expression` mapping expansion.
pub const KWARGS_DICT: u32 = u32::MAX - 2;

// =============================================================================
// Value
// =============================================================================

/// A Kuroko runtime value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    /// The `None` singleton.
    None,
    /// `True` or `False`.
    Bool(bool),
    /// Integer.
    Int(i64),
    /// Double-precision float.
    Float(f64),
    /// The `NotImplemented` marker returned by dunders that decline.
    NotImplemented,
    /// Internal sentinel; payload is a count or one of the `KWARGS_*`
    /// markers. Never observable from managed code.
    Kwargs(u32),
    /// Reference to a heap object.
    Object(ObjRef),
}

impl Value {
    // =========================================================================
    // Constructors
    // =========================================================================

    #[inline]
    pub const fn none() -> Self {
        Value::None
    }

    #[inline]
    pub const fn boolean(b: bool) -> Self {
        Value::Bool(b)
    }

    #[inline]
    pub const fn int(i: i64) -> Self {
        Value::Int(i)
    }

    #[inline]
    pub const fn float(f: f64) -> Self {
        Value::Float(f)
    }

    #[inline]
    pub const fn not_implemented() -> Self {
        Value::NotImplemented
    }

    #[inline]
    pub const fn kwargs(payload: u32) -> Self {
        Value::Kwargs(payload)
    }

    #[inline]
    pub const fn object(obj: ObjRef) -> Self {
        Value::Object(obj)
    }

    // =========================================================================
    // Predicates
    // =========================================================================

    #[inline]
    pub const fn is_none(self) -> bool {
        matches!(self, Value::None)
    }

    #[inline]
    pub const fn is_bool(self) -> bool {
        matches!(self, Value::Bool(_))
    }

    #[inline]
    pub const fn is_int(self) -> bool {
        matches!(self, Value::Int(_))
    }

    #[inline]
    pub const fn is_float(self) -> bool {
        matches!(self, Value::Float(_))
    }

    #[inline]
    pub const fn is_not_implemented(self) -> bool {
        matches!(self, Value::NotImplemented)
    }

    #[inline]
    pub const fn is_kwargs(self) -> bool {
        matches!(self, Value::Kwargs(_))
    }

    #[inline]
    pub const fn is_object(self) -> bool {
        matches!(self, Value::Object(_))
    }

    /// True for either numeric variant.
    #[inline]
    pub const fn is_number(self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_))
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    #[inline]
    pub fn as_bool(self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(b),
            _ => None,
        }
    }

    #[inline]
    pub fn as_int(self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(i),
            _ => None,
        }
    }

    #[inline]
    pub fn as_float(self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(f),
            _ => None,
        }
    }

    /// Numeric coercion used by the arithmetic fast paths: ints and bools
    /// widen to float, floats pass through.
    #[inline]
    pub fn coerce_float(self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(f),
            Value::Int(i) => Some(i as f64),
            Value::Bool(b) => Some(b as i64 as f64),
            _ => None,
        }
    }

    /// Integer view used by the arithmetic fast paths: bools count as 0/1.
    #[inline]
    pub fn coerce_int(self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(i),
            Value::Bool(b) => Some(b as i64),
            _ => None,
        }
    }

    #[inline]
    pub fn as_kwargs(self) -> Option<u32> {
        match self {
            Value::Kwargs(k) => Some(k),
            _ => None,
        }
    }

    #[inline]
    pub fn as_object(self) -> Option<ObjRef> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    // =========================================================================
    // Identity
    // =========================================================================

    /// Identity comparison, the `is` operator.
    ///
    /// Mismatched variants are never identical (`1 is 1.0` is false even
    /// though `1 == 1.0`). Floats compare by bit pattern, which keeps
    /// `0.0` and `-0.0` distinct, except that any NaN is identical to any
    /// other NaN. Objects compare by handle.
    #[inline]
    pub fn values_same(self, other: Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::NotImplemented, Value::NotImplemented) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => {
                a.to_bits() == b.to_bits() || (a.is_nan() && b.is_nan())
            }
            (Value::Kwargs(a), Value::Kwargs(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            _ => false,
        }
    }

    /// Truth test for the variants that do not need heap access. Returns
    /// `None` for objects, whose truthiness depends on their contents.
    #[inline]
    pub fn truthiness(self) -> Option<bool> {
        match self {
            Value::None => Some(false),
            Value::Bool(b) => Some(b),
            Value::Int(i) => Some(i != 0),
            Value::Float(f) => Some(f != 0.0),
            Value::NotImplemented => Some(true),
            Value::Kwargs(_) => Some(true),
            Value::Object(_) => None,
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::None
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<ObjRef> for Value {
    fn from(o: ObjRef) -> Self {
        Value::Object(o)
    }
}

impl fmt::Display for Value {
    /// Shallow rendering for diagnostics. Object payloads print as bare
    /// handles; the VM's repr machinery produces the managed form.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Bool(true) => write!(f, "True"),
            Value::Bool(false) => write!(f, "False"),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{:?}", v),
            Value::NotImplemented => write!(f, "NotImplemented"),
            Value::Kwargs(k) => match *k {
                KWARGS_SINGLE => write!(f, "{{unpack single}}"),
                KWARGS_LIST => write!(f, "{{unpack list}}"),
                KWARGS_DICT => write!(f, "{{unpack dict}}"),
                KWARGS_UNSET => write!(f, "{{unset}}"),
                n => write!(f, "{{sentinel={}}}", n),
            },
            Value::Object(o) => write!(f, "<object #{}>", o.index()),
        }
    }
}
