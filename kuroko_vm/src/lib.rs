//! Bytecode interpreter for the Kuroko runtime.
//!
//! This crate provides:
//! - the [`Vm`] value holding all shared interpreter state (heap, module
//!   cache, built-in class and exception tables, cached special names)
//! - per-thread execution state (value stack, call frames, open upvalues,
//!   scratch, in-flight exception)
//! - the dispatch loop, the calling convention, the class/descriptor
//!   protocol, exception unwinding, generators, and the built-in library
//! - the embedding API: `interpret`, stack primitives, `call_value`/
//!   `run_next`, `define_native`, `make_class`/`finalize_class`,
//!   `get_type`/`is_instance_of`, and `import_module`
//!
//! Code objects come from the builder in `kuroko_bytecode` — the compiler
//! is an external collaborator — wrapped in closures against a module's
//! globals:
//!
//! ```
//! use kuroko_bytecode::{Builder, OpCode};
//! use kuroko_core::Value;
//! use kuroko_vm::{Vm, VmFlags};
//!
//! let mut vm = Vm::new(VmFlags::empty());
//! let mut builder = Builder::new("<module>", "<demo>");
//! builder.emit_constant(Value::int(20));
//! builder.emit_constant(Value::int(22));
//! builder.op(OpCode::Add);
//! builder.op(OpCode::Return);
//! let result = vm.interpret(builder.finish(), "__main__");
//! assert_eq!(result.as_int(), Some(42));
//! ```

pub mod attributes;
pub mod builtins;
pub mod calls;
pub mod error;
pub mod exceptions;
pub mod interpreter;
pub mod modules;
pub mod objects;
pub mod threads;
pub mod values;
pub mod vm;

pub use calls::CallResult;
pub use error::{VmError, VmResult};
pub use threads::{CallFrame, ThreadFlags, ThreadState, DEFAULT_CALL_DEPTH, THREAD_SCRATCH_SIZE};
pub use vm::{BaseClasses, Exceptions, NativeFn, SpecialNames, TargetTable, Vm, VmFlags};
