//! Opcode definitions.
//!
//! Opcodes are a single byte. Instructions that address constants, locals,
//! upvalues or call arities carry a one-byte operand in their base form and
//! a three-byte operand in their long form, which is the base opcode with
//! the high bit set. Control-flow instructions carry a fixed two-byte
//! big-endian offset.

/// High bit marking the wide-operand form of an opcode.
pub const LONG_BIT: u8 = 0x80;

/// Operand shape of an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    /// No operand bytes.
    None,
    /// One fixed byte (stack distances, expansion kinds).
    Byte,
    /// One byte, or three if the long bit is set.
    Sized,
    /// Two-byte big-endian forward offset.
    JumpForward,
    /// Two-byte big-endian backward offset.
    JumpBack,
}

macro_rules! opcodes {
    ($($name:ident = $byte:expr, $operand:ident;)*) => {
        /// Bytecode operations understood by the dispatch loop.
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        #[repr(u8)]
        pub enum OpCode {
            $($name = $byte,)*
        }

        impl OpCode {
            /// Decode a base (short-form) opcode byte.
            #[inline]
            pub fn from_byte(byte: u8) -> Option<OpCode> {
                match byte & !LONG_BIT {
                    $($byte => Some(OpCode::$name),)*
                    _ => None,
                }
            }

            /// Instruction mnemonic for disassembly and tracing.
            pub fn mnemonic(self) -> &'static str {
                match self {
                    $(OpCode::$name => stringify!($name),)*
                }
            }

            /// Operand shape of the base form.
            pub fn operand(self) -> Operand {
                match self {
                    $(OpCode::$name => Operand::$operand,)*
                }
            }
        }
    };
}

opcodes! {
    Return = 1, None;
    Pop = 2, None;
    Dup = 3, Byte;
    Swap = 4, Byte;
    PushNone = 5, None;
    PushTrue = 6, None;
    PushFalse = 7, None;
    PushNotImpl = 8, None;
    Equal = 9, None;
    Is = 10, None;
    Less = 11, None;
    Greater = 12, None;
    Not = 13, None;
    Add = 14, None;
    Subtract = 15, None;
    Multiply = 16, None;
    Divide = 17, None;
    Modulo = 18, None;
    Pow = 19, None;
    BitOr = 20, None;
    BitXor = 21, None;
    BitAnd = 22, None;
    ShiftLeft = 23, None;
    ShiftRight = 24, None;
    BitNegate = 25, None;
    Negate = 26, None;
    CallStack = 27, None;
    CloseUpvalue = 28, None;
    FinalizeClass = 29, None;
    Inherit = 30, None;
    Docstring = 31, None;
    CreateProperty = 32, Byte;
    InvokeGetter = 33, None;
    InvokeSetter = 34, None;
    InvokeDelete = 35, None;
    InvokeGetSlice = 36, None;
    GetIter = 37, None;
    PopTry = 38, None;
    Raise = 39, None;
    Yield = 40, None;
    CleanupWith = 41, None;
    ExpandArgs = 42, Byte;
    Jump = 43, JumpForward;
    JumpIfFalse = 44, JumpForward;
    JumpIfTrue = 45, JumpForward;
    Loop = 46, JumpBack;
    PushTry = 47, JumpForward;
    PushWith = 48, JumpForward;
    ForIter = 49, JumpForward;

    Constant = 64, Sized;
    DefineGlobal = 65, Sized;
    GetGlobal = 66, Sized;
    SetGlobal = 67, Sized;
    DelGlobal = 68, Sized;
    GetLocal = 69, Sized;
    SetLocal = 70, Sized;
    Call = 71, Sized;
    Closure = 72, Sized;
    GetUpvalue = 73, Sized;
    SetUpvalue = 74, Sized;
    Class = 75, Sized;
    GetProperty = 76, Sized;
    SetProperty = 77, Sized;
    DelProperty = 78, Sized;
    Method = 79, Sized;
    GetSuper = 80, Sized;
    Import = 81, Sized;
    ImportFrom = 82, Sized;
    Kwargs = 83, Sized;
    MakeTuple = 84, Sized;
    Unpack = 85, Sized;
}

impl OpCode {
    /// Width in bytes of this instruction's operand given the byte that was
    /// actually fetched (whose long bit selects the wide form).
    #[inline]
    pub fn operand_width(self, fetched: u8) -> usize {
        match self.operand() {
            Operand::None => 0,
            Operand::Byte => 1,
            Operand::JumpForward | Operand::JumpBack => 2,
            Operand::Sized => {
                if fetched & LONG_BIT != 0 {
                    3
                } else {
                    1
                }
            }
        }
    }
}
