//! Immutable code objects.
//!
//! A code object is the unit of execution: bytecode plus the metadata the
//! VM needs to bind arguments, capture upvalues, and produce tracebacks.

use crate::chunk::Chunk;
use kuroko_core::Value;

/// Code object flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CodeFlags(u16);

impl CodeFlags {
    /// No flags.
    pub const NONE: CodeFlags = CodeFlags(0);
    /// Function collects extra positional arguments into a list.
    pub const VARARGS: CodeFlags = CodeFlags(1 << 0);
    /// Function collects unknown keyword arguments into a dict.
    pub const VARKEYWORDS: CodeFlags = CodeFlags(1 << 1);
    /// Calling the function produces a generator.
    pub const GENERATOR: CodeFlags = CodeFlags(1 << 2);
    /// Module-level code.
    pub const MODULE: CodeFlags = CodeFlags(1 << 3);

    #[inline]
    pub const fn contains(self, other: CodeFlags) -> bool {
        (self.0 & other.0) == other.0
    }

    #[inline]
    pub const fn union(self, other: CodeFlags) -> CodeFlags {
        CodeFlags(self.0 | other.0)
    }

    #[inline]
    pub const fn bits(self) -> u16 {
        self.0
    }
}

impl std::ops::BitOr for CodeFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        self.union(rhs)
    }
}

impl std::ops::BitOrAssign for CodeFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Upvalue capture descriptor: capture a local slot of the enclosing frame,
/// or pass through one of the enclosing closure's own upvalues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpvalueDesc {
    pub is_local: bool,
    pub index: u16,
}

/// Local-variable metadata for tracebacks and disassembly.
#[derive(Debug, Clone)]
pub struct LocalEntry {
    pub slot: u16,
    pub name: Box<str>,
}

/// A compiled function or module body.
///
/// Argument slots at the base of a frame are laid out as: required
/// parameters, then optional (defaulted) parameters, then keyword-only
/// parameters, then the `*args` collector list if [`CodeFlags::VARARGS`],
/// then the `**kwargs` collector dict if [`CodeFlags::VARKEYWORDS`].
/// `arg_names` holds the interned name strings in the same order,
/// excluding the collectors.
#[derive(Debug, Clone)]
pub struct CodeObject {
    /// Function name, or `<module>` for module bodies.
    pub name: Box<str>,
    /// Qualified name including enclosing scopes.
    pub qualname: Box<str>,
    /// Source filename for tracebacks.
    pub filename: Box<str>,
    /// Docstring, when the body opened with one.
    pub docstring: Option<Box<str>>,
    /// Bytecode, constants, and line table.
    pub chunk: Chunk,
    /// Number of required positional parameters.
    pub required_args: u16,
    /// Number of optional (defaulted) positional parameters.
    pub optional_args: u16,
    /// Number of keyword-only parameters.
    pub keyword_only_args: u16,
    /// Flags, including the collector markers.
    pub flags: CodeFlags,
    /// Interned parameter name strings, in slot order.
    pub arg_names: Vec<Value>,
    /// Upvalue capture descriptors, read by the `Closure` instruction.
    pub upvalues: Vec<UpvalueDesc>,
    /// Local-variable metadata.
    pub locals: Vec<LocalEntry>,
}

impl CodeObject {
    /// Create an empty code object; primarily used by tests and the
    /// builder.
    pub fn new(name: impl Into<Box<str>>, filename: impl Into<Box<str>>) -> Self {
        let name = name.into();
        CodeObject {
            qualname: name.clone(),
            name,
            filename: filename.into(),
            docstring: None,
            chunk: Chunk::new(),
            required_args: 0,
            optional_args: 0,
            keyword_only_args: 0,
            flags: CodeFlags::NONE,
            arg_names: Vec::new(),
            upvalues: Vec::new(),
            locals: Vec::new(),
        }
    }

    #[inline]
    pub fn is_generator(&self) -> bool {
        self.flags.contains(CodeFlags::GENERATOR)
    }

    #[inline]
    pub fn collects_args(&self) -> bool {
        self.flags.contains(CodeFlags::VARARGS)
    }

    #[inline]
    pub fn collects_kwargs(&self) -> bool {
        self.flags.contains(CodeFlags::VARKEYWORDS)
    }

    /// Positional parameter count (required + optional).
    #[inline]
    pub fn positional_args(&self) -> u16 {
        self.required_args + self.optional_args
    }

    /// Total named parameter count, excluding collectors.
    #[inline]
    pub fn named_args(&self) -> u16 {
        self.required_args + self.optional_args + self.keyword_only_args
    }

    /// Frame slot receiving the `*args` list, if the function collects.
    #[inline]
    pub fn args_collector_slot(&self) -> Option<u16> {
        self.collects_args().then(|| self.named_args())
    }

    /// Frame slot receiving the `**kwargs` dict, if the function collects.
    #[inline]
    pub fn kwargs_collector_slot(&self) -> Option<u16> {
        self.collects_kwargs()
            .then(|| self.named_args() + u16::from(self.collects_args()))
    }

    /// Total argument slots a frame reserves, collectors included.
    #[inline]
    pub fn total_arg_slots(&self) -> usize {
        self.named_args() as usize
            + usize::from(self.collects_args())
            + usize::from(self.collects_kwargs())
    }

    /// Name of the local in `slot`, when metadata is present.
    pub fn local_name(&self, slot: u16) -> Option<&str> {
        self.locals
            .iter()
            .find(|l| l.slot == slot)
            .map(|l| &*l.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_compose() {
        let flags = CodeFlags::VARARGS | CodeFlags::GENERATOR;
        assert!(flags.contains(CodeFlags::VARARGS));
        assert!(flags.contains(CodeFlags::GENERATOR));
        assert!(!flags.contains(CodeFlags::VARKEYWORDS));
    }

    #[test]
    fn collector_slots() {
        let mut code = CodeObject::new("f", "test.krk");
        code.required_args = 2;
        code.optional_args = 1;
        code.flags = CodeFlags::VARARGS | CodeFlags::VARKEYWORDS;
        assert_eq!(code.args_collector_slot(), Some(3));
        assert_eq!(code.kwargs_collector_slot(), Some(4));
        assert_eq!(code.total_arg_slots(), 5);
    }

    #[test]
    fn no_collectors_no_slots() {
        let code = CodeObject::new("f", "test.krk");
        assert_eq!(code.args_collector_slot(), None);
        assert_eq!(code.kwargs_collector_slot(), None);
        assert_eq!(code.total_arg_slots(), 0);
    }
}
