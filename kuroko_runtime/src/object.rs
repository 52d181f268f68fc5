//! Heap object bodies.
//!
//! Every heap object is one variant of [`ObjBody`] plus a flag word held in
//! the heap slot. The collector scans objects by matching on the variant
//! (see `gc::collect_refs`), which realizes the per-class scan/sweep hooks
//! of the object protocol as plain variant dispatch.

use crate::table::Table;
use kuroko_bytecode::CodeObject;
use kuroko_core::{ObjRef, Value};
use smallvec::SmallVec;

/// Captured upvalue cells; most closures capture four or fewer, so the
/// common case stays inline.
pub type UpvalueVec = SmallVec<[ObjRef; 4]>;

bitflags::bitflags! {
    /// Object flag bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ObjFlags: u16 {
        /// Reached during the current mark phase.
        const MARKED = 1 << 0;
        /// Currently being rendered by `repr`; recursion prints `...`.
        const IN_REPR = 1 << 1;
        /// Class cannot be subclassed by managed code.
        const NO_INHERIT = 1 << 2;
        /// Native function is a method (receives a receiver).
        const IS_METHOD = 1 << 3;
        /// Native function is a class method.
        const IS_CLASS_METHOD = 1 << 4;
        /// Native function is a dynamic property: attribute access calls it
        /// with the receiver instead of binding it.
        const IS_DYNAMIC_PROPERTY = 1 << 5;
    }
}

/// Identifier of a registered native function. The VM owns the registry;
/// the heap only stores the handle so object bodies stay VM-agnostic.
pub type NativeId = u32;

// =============================================================================
// Leaf bodies
// =============================================================================

/// Interned string. The hash is FNV-1a over the bytes, computed once at
/// intern time; equal strings are the same object, so equality elsewhere is
/// handle identity.
#[derive(Debug)]
pub struct StrObj {
    pub chars: Box<str>,
    pub hash: u32,
}

/// Immutable byte sequence. Hashes like strings but is not interned.
#[derive(Debug)]
pub struct BytesObj {
    pub bytes: Box<[u8]>,
    pub hash: u32,
}

#[derive(Debug)]
pub struct TupleObj {
    pub values: Box<[Value]>,
}

#[derive(Debug, Default)]
pub struct ListObj {
    pub values: Vec<Value>,
}

#[derive(Debug, Default)]
pub struct DictObj {
    pub table: Table,
}

// =============================================================================
// Callables
// =============================================================================

/// A closure: immutable code plus captured upvalues, bound defaults, and
/// the globals table (a module) it executes against.
#[derive(Debug)]
pub struct ClosureObj {
    /// Heap reference to the `Code` object.
    pub code: ObjRef,
    /// Captured upvalue cells, in descriptor order.
    pub upvalues: UpvalueVec,
    /// Default values for optional positional parameters.
    pub defaults: Vec<Value>,
    /// Default values for keyword-only parameters.
    pub keyword_defaults: Vec<Value>,
    /// Annotations dict, or `None`.
    pub annotations: Value,
    /// Module whose fields serve as this function's globals.
    pub globals: ObjRef,
}

/// A registered native function.
#[derive(Debug)]
pub struct NativeObj {
    pub name: Box<str>,
    pub id: NativeId,
}

/// A method bound to its receiver.
#[derive(Debug)]
pub struct BoundMethodObj {
    pub receiver: Value,
    pub method: Value,
}

// =============================================================================
// Classes and instances
// =============================================================================

/// Cached special-method slots, populated by class finalization so hot
/// operations skip the methods-table lookup. Inherited slots are filled by
/// walking the base chain at finalization time.
#[derive(Debug, Default)]
pub struct ClassSlots {
    pub init: Option<Value>,
    pub repr: Option<Value>,
    pub str_: Option<Value>,
    pub getitem: Option<Value>,
    pub setitem: Option<Value>,
    pub delitem: Option<Value>,
    pub eq: Option<Value>,
    pub hash: Option<Value>,
    pub len: Option<Value>,
    pub contains: Option<Value>,
    pub iter: Option<Value>,
    pub call: Option<Value>,
    pub enter: Option<Value>,
    pub exit: Option<Value>,
    pub getattr: Option<Value>,
    pub setattr: Option<Value>,
    pub delattr: Option<Value>,
    pub add: Option<Value>,
    pub sub: Option<Value>,
    pub mul: Option<Value>,
    pub div: Option<Value>,
    pub mod_: Option<Value>,
    pub pow: Option<Value>,
    pub bitor: Option<Value>,
    pub bitxor: Option<Value>,
    pub bitand: Option<Value>,
    pub lshift: Option<Value>,
    pub rshift: Option<Value>,
    pub lt: Option<Value>,
    pub gt: Option<Value>,
}

/// Native payload shape instances of a class carry. This is the class's
/// "allocation size": subclasses of the built-in collections embed the
/// matching payload next to their fields table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PayloadKind {
    #[default]
    None,
    List,
    Dict,
    Str,
    Tuple,
}

/// Embedded native payload of an instance whose class derives from a
/// built-in collection type.
#[derive(Debug, Default)]
pub enum Payload {
    #[default]
    None,
    List(Vec<Value>),
    Dict(Table),
    Str(Box<str>),
    Tuple(Box<[Value]>),
}

impl PayloadKind {
    pub fn instantiate(self) -> Payload {
        match self {
            PayloadKind::None => Payload::None,
            PayloadKind::List => Payload::List(Vec::new()),
            PayloadKind::Dict => Payload::Dict(Table::new()),
            PayloadKind::Str => Payload::Str(Box::from("")),
            PayloadKind::Tuple => Payload::Tuple(Box::from([])),
        }
    }
}

#[derive(Debug)]
pub struct ClassObj {
    /// Interned name string, or `None` for anonymous classes.
    pub name: Value,
    /// Single-inheritance base; the chain terminates at `object`.
    pub base: Option<ObjRef>,
    /// Methods and class attributes.
    pub methods: Table,
    /// Payload shape for instances.
    pub alloc: PayloadKind,
    /// Weak set of direct subclasses; not marked by the collector, pruned
    /// at sweep.
    pub subclasses: Vec<ObjRef>,
    pub docstring: Value,
    pub filename: Value,
    /// Cached dunder slots; valid after finalization.
    pub slots: Box<ClassSlots>,
}

#[derive(Debug)]
pub struct InstanceObj {
    pub class: ObjRef,
    pub fields: Table,
    pub payload: Payload,
}

/// An imported module: a name plus the fields table that doubles as the
/// globals of code executing in it.
#[derive(Debug)]
pub struct ModuleObj {
    pub name: Value,
    pub fields: Table,
}

// =============================================================================
// Upvalues
// =============================================================================

/// Storage state of an upvalue cell.
#[derive(Debug, Clone, Copy)]
pub enum UpvalueState {
    /// Shares a live stack slot of the owning thread (absolute index).
    Open(usize),
    /// Owns its value; the slot has left scope.
    Closed(Value),
}

/// An upvalue cell. Open cells are linked per thread in descending slot
/// order; the link is meaningless once closed.
#[derive(Debug)]
pub struct UpvalueObj {
    pub state: UpvalueState,
    pub next: Option<ObjRef>,
}

// =============================================================================
// Properties
// =============================================================================

/// A property descriptor. Reads call `getter` with the receiver; writes
/// call `setter` with the receiver and the value. A property with a setter
/// is a data descriptor and intercepts instance-field reads and writes.
#[derive(Debug)]
pub struct PropertyObj {
    pub getter: Value,
    /// `Value::None` when the property is read-only.
    pub setter: Value,
}

// =============================================================================
// Generators
// =============================================================================

/// Exception-handler record. Lives on call frames while a `try` or `with`
/// block is active, and inside suspended generator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handler {
    pub kind: HandlerKind,
    /// Bytecode offset of the handler (or cleanup) body.
    pub target: u32,
    /// Value-stack depth to restore before entering the handler.
    pub depth: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    Try,
    With,
}

/// Execution state of a generator.
#[derive(Debug)]
pub enum GenState {
    /// Created but never resumed; holds the bound argument slots.
    Ready { args: Vec<Value> },
    /// Suspended at a yield; holds the saved frame image.
    Suspended {
        stack: Vec<Value>,
        ip: usize,
        handlers: Vec<Handler>,
    },
    /// Currently executing on some thread.
    Running,
    /// Ran to completion; further resumes signal exhaustion.
    Finished,
}

#[derive(Debug)]
pub struct GeneratorObj {
    pub closure: ObjRef,
    pub state: GenState,
}

// =============================================================================
// The body union
// =============================================================================

/// A heap object body.
#[derive(Debug)]
pub enum ObjBody {
    Str(StrObj),
    Bytes(BytesObj),
    Tuple(TupleObj),
    List(ListObj),
    Dict(DictObj),
    Code(CodeObject),
    Closure(ClosureObj),
    Native(NativeObj),
    BoundMethod(BoundMethodObj),
    Class(ClassObj),
    Instance(InstanceObj),
    Module(ModuleObj),
    Upvalue(UpvalueObj),
    Property(PropertyObj),
    Generator(GeneratorObj),
}

impl ObjBody {
    /// Variant name for diagnostics; managed type names come from classes.
    pub fn kind_name(&self) -> &'static str {
        match self {
            ObjBody::Str(_) => "str",
            ObjBody::Bytes(_) => "bytes",
            ObjBody::Tuple(_) => "tuple",
            ObjBody::List(_) => "list",
            ObjBody::Dict(_) => "dict",
            ObjBody::Code(_) => "codeobject",
            ObjBody::Closure(_) => "function",
            ObjBody::Native(_) => "native",
            ObjBody::BoundMethod(_) => "method",
            ObjBody::Class(_) => "class",
            ObjBody::Instance(_) => "instance",
            ObjBody::Module(_) => "module",
            ObjBody::Upvalue(_) => "upvalue",
            ObjBody::Property(_) => "property",
            ObjBody::Generator(_) => "generator",
        }
    }
}
