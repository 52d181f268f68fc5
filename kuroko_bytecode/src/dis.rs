//! Bytecode disassembler.
//!
//! Produces the listing used by the tracing mode and by humans staring at
//! test failures. Constant operands are rendered shallowly (object
//! constants print as handles; the VM owns managed repr).

use crate::code_object::CodeObject;
use crate::opcode::{OpCode, Operand, LONG_BIT};
use std::fmt::Write;

/// Disassemble a full code object into a listing.
pub fn disassemble(code: &CodeObject) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Code object: {} ({})", code.qualname, code.filename);
    let _ = writeln!(
        out,
        "  Args: {} required, {} optional, {} keyword-only{}{}",
        code.required_args,
        code.optional_args,
        code.keyword_only_args,
        if code.collects_args() { ", *args" } else { "" },
        if code.collects_kwargs() { ", **kwargs" } else { "" },
    );
    if !code.upvalues.is_empty() {
        let _ = writeln!(out, "  Upvalues: {}", code.upvalues.len());
    }
    if !code.locals.is_empty() {
        let names: Vec<String> = code
            .locals
            .iter()
            .map(|l| format!("{}={}", l.slot, l.name))
            .collect();
        let _ = writeln!(out, "  Locals: {}", names.join(", "));
    }

    let mut offset = 0;
    let mut last_line = None;
    while offset < code.chunk.code.len() {
        let line = code.chunk.line_for_offset(offset);
        let line_str = if line != last_line {
            last_line = line;
            line.map_or_else(|| "   ?".to_string(), |l| format!("{:4}", l))
        } else {
            "    ".to_string()
        };
        let (text, next) = disassemble_instruction(code, offset);
        let _ = writeln!(out, "{} {:06} {}", line_str, offset, text);
        offset = next;
    }
    out
}

/// Disassemble the instruction at `offset`, returning its rendering and
/// the offset of the next instruction.
pub fn disassemble_instruction(code: &CodeObject, offset: usize) -> (String, usize) {
    let bytes = &code.chunk.code;
    let fetched = bytes[offset];
    let Some(op) = OpCode::from_byte(fetched) else {
        return (format!("??? 0x{:02x}", fetched), offset + 1);
    };

    let width = op.operand_width(fetched);
    if offset + 1 + width > bytes.len() {
        return (format!("{} <truncated>", op.mnemonic()), bytes.len());
    }

    let mnemonic = if fetched & LONG_BIT != 0 && op.operand() == Operand::Sized {
        format!("{}Long", op.mnemonic())
    } else {
        op.mnemonic().to_string()
    };

    let next = offset + 1 + width;
    let text = match op.operand() {
        Operand::None => mnemonic,
        Operand::Byte => format!("{:<16} {}", mnemonic, bytes[offset + 1]),
        Operand::Sized => {
            let operand = read_operand(bytes, offset + 1, width);
            let constantish = matches!(
                op,
                OpCode::Constant
                    | OpCode::Closure
                    | OpCode::DefineGlobal
                    | OpCode::GetGlobal
                    | OpCode::SetGlobal
                    | OpCode::DelGlobal
                    | OpCode::Class
                    | OpCode::GetProperty
                    | OpCode::SetProperty
                    | OpCode::DelProperty
                    | OpCode::Method
                    | OpCode::GetSuper
                    | OpCode::Import
                    | OpCode::ImportFrom
            );
            if constantish {
                match code.chunk.constants.get(operand as usize) {
                    Some(c) => format!("{:<16} {} ({})", mnemonic, operand, c),
                    None => format!("{:<16} {} (bad constant)", mnemonic, operand),
                }
            } else {
                format!("{:<16} {}", mnemonic, operand)
            }
        }
        Operand::JumpForward => {
            let operand = read_operand(bytes, offset + 1, 2) as usize;
            format!("{:<16} +{} (to {})", mnemonic, operand, next + operand)
        }
        Operand::JumpBack => {
            let operand = read_operand(bytes, offset + 1, 2) as usize;
            format!("{:<16} -{} (to {})", mnemonic, operand, next - operand)
        }
    };
    (text, next)
}

fn read_operand(bytes: &[u8], at: usize, width: usize) -> u32 {
    let mut out = 0u32;
    for i in 0..width {
        out = (out << 8) | u32::from(bytes[at + i]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Builder;
    use kuroko_core::Value;

    #[test]
    fn listing_walks_every_instruction() {
        let mut b = Builder::new("demo", "demo.krk");
        b.line(1).emit_constant(Value::int(2));
        b.emit_constant(Value::int(3));
        b.op(OpCode::Add);
        b.line(2).op(OpCode::Return);
        let code = b.finish();

        let listing = disassemble(&code);
        assert!(listing.contains("Constant"));
        assert!(listing.contains("Add"));
        assert!(listing.contains("Return"));
        // Two source lines appear.
        assert!(listing.contains("   1"));
        assert!(listing.contains("   2"));
    }

    #[test]
    fn jumps_render_targets() {
        let mut b = Builder::new("demo", "demo.krk");
        b.op(OpCode::PushTrue);
        let j = b.jump(OpCode::JumpIfFalse);
        b.op(OpCode::Pop);
        b.patch(j);
        b.op(OpCode::Return);
        let code = b.finish();

        let (text, _) = disassemble_instruction(&code, 1);
        assert!(text.contains("JumpIfFalse"));
        assert!(text.contains("(to 5)"));
    }
}
