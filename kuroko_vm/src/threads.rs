//! Per-thread execution state: the value stack, the call-frame stack,
//! open upvalues, scratch slots, and the in-flight exception.
//!
//! Managed code runs serially on its thread; each thread owns all of this
//! state exclusively. The value stack is a growable vector addressed by
//! slot index, so nothing needs re-basing when it reallocates — open
//! upvalues record indices, not pointers.

use kuroko_core::{ObjRef, Value};
use kuroko_runtime::Handler;
use smallvec::SmallVec;

/// Scratch slots each thread keeps safe from the collector while native
/// code assembles transient structures.
pub const THREAD_SCRATCH_SIZE: usize = 3;

/// Default bound on call-frame depth; configurable on the VM.
pub const DEFAULT_CALL_DEPTH: usize = 64;

bitflags::bitflags! {
    /// Thread-local flag bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ThreadFlags: u8 {
        /// An exception is in flight; the authoritative signal every
        /// native must check before continuing.
        const HAS_EXCEPTION = 1 << 0;
        /// Dump stack and instruction before each dispatch step.
        const ENABLE_TRACING = 1 << 1;
        /// An interrupt was delivered; the dispatch loop raises
        /// `KeyboardInterrupt` at the next instruction boundary.
        const SIGNALLED = 1 << 2;
    }
}

/// One active call.
#[derive(Debug)]
pub struct CallFrame {
    /// The closure being executed.
    pub closure: ObjRef,
    /// Its code object, cached to skip a hop on every fetch.
    pub code: ObjRef,
    /// Instruction pointer: offset into the code object's bytecode. Never
    /// escapes the bytecode range.
    pub ip: usize,
    /// Stack slot of local 0.
    pub base: usize,
    /// Stack depth to restore on return; the return value lands here.
    pub out_slots: usize,
    /// Module whose fields are this frame's globals.
    pub globals: ObjRef,
    /// Active exception and with-cleanup handlers, innermost last.
    pub handlers: SmallVec<[Handler; 2]>,
    /// Set when this frame is a resumed generator.
    pub generator: Option<ObjRef>,
}

/// Execution state of one VM thread.
#[derive(Debug)]
pub struct ThreadState {
    /// The value stack. Grows on push; the vector length is the stack top.
    pub stack: Vec<Value>,
    /// Call frames, bounded by the VM's maximum call depth.
    pub frames: Vec<CallFrame>,
    /// Head of the open-upvalue list, sorted by descending stack slot.
    pub open_upvalues: Option<ObjRef>,
    /// The current module execution context.
    pub module: Option<ObjRef>,
    /// The in-flight exception value, `None` when clear.
    pub current_exception: Value,
    /// When running nested (a native called back into managed code), the
    /// frame index whose return exits the dispatch loop.
    pub exit_on_frame: Option<usize>,
    pub flags: ThreadFlags,
    /// Values shielded from collection during native constructions.
    pub scratch: [Value; THREAD_SCRATCH_SIZE],
}

impl Default for ThreadState {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadState {
    pub fn new() -> Self {
        ThreadState {
            stack: Vec::with_capacity(256),
            frames: Vec::new(),
            open_upvalues: None,
            module: None,
            current_exception: Value::None,
            exit_on_frame: None,
            flags: ThreadFlags::empty(),
            scratch: [Value::None; THREAD_SCRATCH_SIZE],
        }
    }

    // =========================================================================
    // Stack primitives
    // =========================================================================

    #[inline]
    pub fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    #[inline]
    pub fn pop(&mut self) -> Value {
        self.stack.pop().expect("value stack underflow")
    }

    /// Read `distance` slots down from the top without mutating.
    #[inline]
    pub fn peek(&self, distance: usize) -> Value {
        self.stack[self.stack.len() - 1 - distance]
    }

    /// Exchange the top of the stack with the value `distance` slots down.
    #[inline]
    pub fn swap(&mut self, distance: usize) {
        let top = self.stack.len() - 1;
        self.stack.swap(top, top - distance);
    }

    #[inline]
    pub fn stack_top(&self) -> usize {
        self.stack.len()
    }

    #[inline]
    pub fn truncate(&mut self, depth: usize) {
        self.stack.truncate(depth);
    }

    /// Reset to the top level: no frames, empty stack, no exception. Used
    /// by hosts between REPL iterations; values on the stack may be lost
    /// to collection afterwards.
    pub fn reset_stack(&mut self) {
        self.stack.clear();
        self.frames.clear();
        self.open_upvalues = None;
        self.current_exception = Value::None;
        self.exit_on_frame = None;
        self.flags.remove(ThreadFlags::HAS_EXCEPTION);
    }

    #[inline]
    pub fn has_exception(&self) -> bool {
        self.flags.contains(ThreadFlags::HAS_EXCEPTION)
    }

    /// Set the in-flight exception.
    pub fn set_exception(&mut self, value: Value) {
        self.current_exception = value;
        self.flags.insert(ThreadFlags::HAS_EXCEPTION);
    }

    /// Clear and return the in-flight exception, for callers that handle
    /// it locally (the attribute-lookup fallback, the REPL).
    pub fn take_exception(&mut self) -> Value {
        self.flags.remove(ThreadFlags::HAS_EXCEPTION);
        std::mem::replace(&mut self.current_exception, Value::None)
    }
}
