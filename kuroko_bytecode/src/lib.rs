//! Bytecode and code objects for the Kuroko runtime.
//!
//! The compiler is an external collaborator; what it emits — and what any
//! embedder or test can assemble by hand through [`Builder`] — is a
//! [`CodeObject`]: an immutable bytecode vector with a constant pool, a
//! line-number table, argument and upvalue descriptors, and local-variable
//! metadata. The VM consumes code objects wrapped in closures.
//!
//! Operand encoding follows the split-table scheme: the high bit of an
//! opcode marks its "long" form, widening the operand from one byte to
//! three. Jump offsets are always two big-endian bytes.

pub mod builder;
pub mod chunk;
pub mod code_object;
pub mod dis;
pub mod opcode;

pub use builder::Builder;
pub use chunk::{Chunk, LineEntry};
pub use code_object::{CodeFlags, CodeObject, LocalEntry, UpvalueDesc};
pub use dis::{disassemble, disassemble_instruction};
pub use opcode::{OpCode, Operand, LONG_BIT};
