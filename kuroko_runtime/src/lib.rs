//! Object heap, hash table, and garbage collector for the Kuroko runtime.
//!
//! This crate owns everything that lives past a single instruction:
//!
//! - the open-addressed [`Table`] mapping values to values, used for
//!   instance fields, class methods, dicts, globals, and the module cache;
//! - the [`Heap`]: a slab of tagged object bodies addressed by `ObjRef`,
//!   with byte accounting, allocation pacing, and the string intern set;
//! - the stop-the-world mark-and-sweep collector with its gray worklist.
//!
//! The VM crate supplies roots at collection time and drives allocation
//! pacing; nothing here knows about threads, frames, or dispatch.

pub mod gc;
pub mod heap;
pub mod object;
pub mod table;

pub use gc::GcStats;
pub use heap::Heap;
pub use object::{
    BoundMethodObj, ClassObj, ClassSlots, ClosureObj, DictObj, GenState, GeneratorObj, Handler,
    HandlerKind, InstanceObj, ListObj, ModuleObj, NativeId, NativeObj, ObjBody, ObjFlags, Payload,
    PayloadKind, PropertyObj, StrObj, TupleObj, UpvalueObj, UpvalueState, UpvalueVec,
};
pub use table::{Entry, Table};
