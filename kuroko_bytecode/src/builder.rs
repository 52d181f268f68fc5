//! Chunk builder.
//!
//! The builder is the write-side interface to a code object: the compiler
//! (an external collaborator), the embedding API, and the test suites all
//! assemble bytecode through it. It handles operand-width selection,
//! forward-jump patching, constant deduplication, and argument/upvalue
//! declarations, and produces an immutable [`CodeObject`].

use crate::chunk::Chunk;
use crate::code_object::{CodeFlags, CodeObject, LocalEntry, UpvalueDesc};
use crate::opcode::{OpCode, Operand, LONG_BIT};
use kuroko_core::Value;
use rustc_hash::FxHashMap;

/// Key for constant deduplication. Floats dedup by bit pattern so that
/// `0.0` and `-0.0` remain distinct constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ConstKey {
    None,
    Bool(bool),
    Int(i64),
    FloatBits(u64),
    NotImplemented,
    Object(u32),
}

impl ConstKey {
    fn of(value: Value) -> Option<ConstKey> {
        match value {
            Value::None => Some(ConstKey::None),
            Value::Bool(b) => Some(ConstKey::Bool(b)),
            Value::Int(i) => Some(ConstKey::Int(i)),
            Value::Float(f) => Some(ConstKey::FloatBits(f.to_bits())),
            Value::NotImplemented => Some(ConstKey::NotImplemented),
            Value::Object(o) => Some(ConstKey::Object(o.index() as u32)),
            Value::Kwargs(_) => None,
        }
    }
}

/// Handle to a not-yet-patched forward jump.
#[derive(Debug, Clone, Copy)]
#[must_use = "forward jumps must be patched"]
pub struct Jump(usize);

/// Incremental assembler for one code object.
pub struct Builder {
    name: Box<str>,
    qualname: Box<str>,
    filename: Box<str>,
    docstring: Option<Box<str>>,
    chunk: Chunk,
    const_index: FxHashMap<ConstKey, u32>,
    required_names: Vec<Value>,
    optional_names: Vec<Value>,
    keyword_only_names: Vec<Value>,
    flags: CodeFlags,
    upvalues: Vec<UpvalueDesc>,
    locals: Vec<LocalEntry>,
    line: u32,
}

impl Builder {
    pub fn new(name: impl Into<Box<str>>, filename: impl Into<Box<str>>) -> Self {
        let name = name.into();
        Builder {
            qualname: name.clone(),
            name,
            filename: filename.into(),
            docstring: None,
            chunk: Chunk::new(),
            const_index: FxHashMap::default(),
            required_names: Vec::new(),
            optional_names: Vec::new(),
            keyword_only_names: Vec::new(),
            flags: CodeFlags::NONE,
            upvalues: Vec::new(),
            locals: Vec::new(),
            line: 1,
        }
    }

    // =========================================================================
    // Declarations
    // =========================================================================

    /// Set the source line attributed to subsequently emitted bytes.
    pub fn line(&mut self, line: u32) -> &mut Self {
        self.line = line;
        self
    }

    pub fn qualname(&mut self, qualname: impl Into<Box<str>>) -> &mut Self {
        self.qualname = qualname.into();
        self
    }

    pub fn docstring(&mut self, doc: impl Into<Box<str>>) -> &mut Self {
        self.docstring = Some(doc.into());
        self
    }

    /// Declare a required positional parameter. `name` must be an interned
    /// string value.
    pub fn required_arg(&mut self, name: Value) -> &mut Self {
        self.required_names.push(name);
        self
    }

    /// Declare an optional (defaulted) positional parameter.
    pub fn optional_arg(&mut self, name: Value) -> &mut Self {
        self.optional_names.push(name);
        self
    }

    /// Declare a keyword-only parameter.
    pub fn keyword_only_arg(&mut self, name: Value) -> &mut Self {
        self.keyword_only_names.push(name);
        self
    }

    /// Mark the function as collecting extra positionals into a list.
    pub fn collect_args(&mut self) -> &mut Self {
        self.flags |= CodeFlags::VARARGS;
        self
    }

    /// Mark the function as collecting unknown keywords into a dict.
    pub fn collect_kwargs(&mut self) -> &mut Self {
        self.flags |= CodeFlags::VARKEYWORDS;
        self
    }

    /// Mark the function as a generator.
    pub fn generator(&mut self) -> &mut Self {
        self.flags |= CodeFlags::GENERATOR;
        self
    }

    /// Declare an upvalue capture, in the order the `Closure` instruction
    /// will consume them.
    pub fn upvalue(&mut self, is_local: bool, index: u16) -> u16 {
        self.upvalues.push(UpvalueDesc { is_local, index });
        (self.upvalues.len() - 1) as u16
    }

    /// Record local-variable metadata for tracebacks.
    pub fn local(&mut self, slot: u16, name: impl Into<Box<str>>) -> &mut Self {
        self.locals.push(LocalEntry {
            slot,
            name: name.into(),
        });
        self
    }

    // =========================================================================
    // Emission
    // =========================================================================

    /// Current bytecode offset; used as a loop target.
    #[inline]
    pub fn offset(&self) -> usize {
        self.chunk.code.len()
    }

    /// Emit an operand-less instruction.
    pub fn op(&mut self, op: OpCode) -> &mut Self {
        debug_assert_eq!(op.operand(), Operand::None, "{:?} takes an operand", op);
        self.chunk.write(op as u8, self.line);
        self
    }

    /// Emit an instruction with a fixed one-byte operand.
    pub fn op_byte(&mut self, op: OpCode, operand: u8) -> &mut Self {
        debug_assert_eq!(op.operand(), Operand::Byte, "{:?} is not byte-sized", op);
        self.chunk.write(op as u8, self.line);
        self.chunk.write(operand, self.line);
        self
    }

    /// Emit a sized instruction, selecting the short or long form from the
    /// operand's magnitude.
    pub fn op_sized(&mut self, op: OpCode, operand: u32) -> &mut Self {
        debug_assert_eq!(op.operand(), Operand::Sized, "{:?} is not sized", op);
        if operand < 0x100 {
            self.chunk.write(op as u8, self.line);
            self.chunk.write(operand as u8, self.line);
        } else {
            debug_assert!(operand < 0x0100_0000, "operand out of range");
            self.chunk.write(op as u8 | LONG_BIT, self.line);
            self.chunk.write((operand >> 16) as u8, self.line);
            self.chunk.write((operand >> 8) as u8, self.line);
            self.chunk.write(operand as u8, self.line);
        }
        self
    }

    /// Intern `value` into the constant pool, deduplicating, and return its
    /// index.
    pub fn constant(&mut self, value: Value) -> u32 {
        match ConstKey::of(value) {
            Some(key) => {
                if let Some(&idx) = self.const_index.get(&key) {
                    return idx;
                }
                let idx = self.chunk.add_constant(value);
                self.const_index.insert(key, idx);
                idx
            }
            // The kwargs sentinel never appears in a constant pool.
            None => unreachable!("kwargs sentinel as constant"),
        }
    }

    /// Emit `Constant` pushing `value`.
    pub fn emit_constant(&mut self, value: Value) -> &mut Self {
        let idx = self.constant(value);
        self.op_sized(OpCode::Constant, idx)
    }

    /// Emit a forward jump with a placeholder offset; patch it later with
    /// [`Builder::patch`].
    pub fn jump(&mut self, op: OpCode) -> Jump {
        debug_assert_eq!(op.operand(), Operand::JumpForward, "{:?} is not a jump", op);
        self.chunk.write(op as u8, self.line);
        let at = self.chunk.code.len();
        self.chunk.write(0xFF, self.line);
        self.chunk.write(0xFF, self.line);
        Jump(at)
    }

    /// Resolve a forward jump to the current offset.
    pub fn patch(&mut self, jump: Jump) {
        let offset = self.chunk.code.len() - (jump.0 + 2);
        assert!(offset <= u16::MAX as usize, "jump too far");
        self.chunk.code[jump.0] = (offset >> 8) as u8;
        self.chunk.code[jump.0 + 1] = offset as u8;
    }

    /// Emit a backward jump to `target` (an offset previously returned by
    /// [`Builder::offset`]).
    pub fn loop_back(&mut self, target: usize) -> &mut Self {
        self.chunk.write(OpCode::Loop as u8, self.line);
        // The ip has advanced past the two offset bytes when it subtracts.
        let offset = self.chunk.code.len() + 2 - target;
        assert!(offset <= u16::MAX as usize, "loop too far");
        self.chunk.write((offset >> 8) as u8, self.line);
        self.chunk.write(offset as u8, self.line);
        self
    }

    // =========================================================================
    // Finishing
    // =========================================================================

    /// Seal the builder into an immutable code object.
    pub fn finish(self) -> CodeObject {
        let mut arg_names = self.required_names;
        let required_args = arg_names.len() as u16;
        let optional_args = self.optional_names.len() as u16;
        let keyword_only_args = self.keyword_only_names.len() as u16;
        arg_names.extend(self.optional_names);
        arg_names.extend(self.keyword_only_names);

        CodeObject {
            name: self.name,
            qualname: self.qualname,
            filename: self.filename,
            docstring: self.docstring,
            chunk: self.chunk,
            required_args,
            optional_args,
            keyword_only_args,
            flags: self.flags,
            arg_names,
            upvalues: self.upvalues,
            locals: self.locals,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_short_and_long_constants() {
        let mut b = Builder::new("test", "test.krk");
        for i in 0..300 {
            b.emit_constant(Value::int(i + 1000));
        }
        let code = b.finish();
        assert_eq!(code.chunk.constants.len(), 300);
        // First instruction short, later ones long.
        assert_eq!(code.chunk.code[0], OpCode::Constant as u8);
        assert!(code
            .chunk
            .code
            .iter()
            .any(|&byte| byte == OpCode::Constant as u8 | LONG_BIT));
    }

    #[test]
    fn constants_deduplicate() {
        let mut b = Builder::new("test", "test.krk");
        let a = b.constant(Value::int(5));
        let c = b.constant(Value::int(5));
        let d = b.constant(Value::float(5.0));
        assert_eq!(a, c);
        assert_ne!(a, d);
        // -0.0 and 0.0 are distinct constants.
        assert_ne!(b.constant(Value::float(0.0)), b.constant(Value::float(-0.0)));
    }

    #[test]
    fn jump_patching() {
        let mut b = Builder::new("test", "test.krk");
        b.op(OpCode::PushTrue);
        let jump = b.jump(OpCode::JumpIfFalse);
        b.op(OpCode::Pop);
        b.patch(jump);
        b.op(OpCode::Return);
        let code = b.finish();
        // Jump operand lands on the instruction after Pop.
        let hi = code.chunk.code[2] as usize;
        let lo = code.chunk.code[3] as usize;
        assert_eq!((hi << 8) | lo, 1);
    }

    #[test]
    fn loop_offsets_rewind_to_target() {
        let mut b = Builder::new("test", "test.krk");
        let top = b.offset();
        b.op(OpCode::Pop);
        b.loop_back(top);
        let code = b.finish();
        let at = 1;
        let hi = code.chunk.code[at + 1] as usize;
        let lo = code.chunk.code[at + 2] as usize;
        let offset = (hi << 8) | lo;
        // ip after the operand bytes minus offset is the loop top.
        assert_eq!(at + 3 - offset, top);
    }

    #[test]
    fn argument_declarations_order_slots() {
        let mut b = Builder::new("f", "test.krk");
        b.required_arg(Value::int(0)); // names are opaque here
        b.required_arg(Value::int(1));
        b.optional_arg(Value::int(2));
        b.keyword_only_arg(Value::int(3));
        b.collect_args();
        let code = b.finish();
        assert_eq!(code.required_args, 2);
        assert_eq!(code.optional_args, 1);
        assert_eq!(code.keyword_only_args, 1);
        assert_eq!(code.args_collector_slot(), Some(4));
    }
}
