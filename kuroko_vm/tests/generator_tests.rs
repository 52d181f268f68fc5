//! Generator creation, resume, exhaustion-by-identity, and loop
//! integration.

mod common;

use common::Harness;
use kuroko_bytecode::{Builder, OpCode};
use kuroko_core::Value;

fn module_builder() -> Builder {
    Builder::new("<module>", "<test>")
}

/// A generator yielding 1, 2, 3.
fn yields_three(h: &mut Harness) -> Value {
    let mut gen = Builder::new("gen", "<test>");
    gen.generator();
    for i in 1..=3 {
        gen.emit_constant(Value::int(i));
        gen.op(OpCode::Yield);
    }
    gen.op(OpCode::PushNone);
    gen.op(OpCode::Return);
    h.code(gen.finish())
}

#[test]
fn generator_yields_in_order_then_returns_itself() {
    let mut h = Harness::new();
    let gen_code = yields_three(&mut h);

    let mut b = module_builder();
    let gen_idx = b.constant(gen_code);
    b.op_sized(OpCode::Closure, gen_idx);
    b.op_sized(OpCode::Call, 0); // [g]
    for _ in 0..3 {
        b.op_byte(OpCode::Dup, 0);
        b.op_sized(OpCode::Call, 0); // [g, v]
        b.op_byte(OpCode::Swap, 1); // [v, g]
    }
    // Fourth resume: a finished generator returns itself.
    b.op_byte(OpCode::Dup, 0);
    b.op_sized(OpCode::Call, 0); // [1, 2, 3, g, result]
    b.op(OpCode::Is); // [1, 2, 3, finished?]
    b.op_sized(OpCode::MakeTuple, 4);
    b.op(OpCode::Return);

    let result = h.run_ok(b);
    let parts = h.tuple_of(result);
    assert_eq!(
        parts,
        vec![
            Value::int(1),
            Value::int(2),
            Value::int(3),
            Value::Bool(true)
        ]
    );
}

#[test]
fn generator_drives_for_iter() {
    // total = sum of yielded values, via GetIter/ForIter.
    let mut h = Harness::new();
    let gen_code = yields_three(&mut h);

    let mut b = module_builder();
    let gen_idx = b.constant(gen_code);
    b.emit_constant(Value::int(0)); // slot 0: total
    b.op_sized(OpCode::Closure, gen_idx);
    b.op_sized(OpCode::Call, 0);
    b.op(OpCode::GetIter); // generators are their own iterators

    let top = b.offset();
    let done = b.jump(OpCode::ForIter);
    b.op_sized(OpCode::GetLocal, 0);
    b.op(OpCode::Add);
    b.op_sized(OpCode::SetLocal, 0);
    b.op(OpCode::Pop);
    b.loop_back(top);
    b.patch(done);
    b.op(OpCode::Pop);
    b.op_sized(OpCode::GetLocal, 0);
    b.op(OpCode::Return);

    assert_eq!(h.run_ok(b), Value::int(6));
}

#[test]
fn generator_arguments_persist_across_yields() {
    // def gen(base): yield base; yield base + 1
    let mut h = Harness::new();
    let base_name = h.s("base");

    let mut gen = Builder::new("gen", "<test>");
    gen.generator();
    gen.required_arg(base_name);
    gen.op_sized(OpCode::GetLocal, 0);
    gen.op(OpCode::Yield);
    gen.op_sized(OpCode::GetLocal, 0);
    gen.emit_constant(Value::int(1));
    gen.op(OpCode::Add);
    gen.op(OpCode::Yield);
    gen.op(OpCode::PushNone);
    gen.op(OpCode::Return);
    let gen_code = h.code(gen.finish());

    let mut b = module_builder();
    let gen_idx = b.constant(gen_code);
    b.op_sized(OpCode::Closure, gen_idx);
    b.emit_constant(Value::int(40));
    b.op_sized(OpCode::Call, 1); // [g]
    b.op_byte(OpCode::Dup, 0);
    b.op_sized(OpCode::Call, 0); // [g, 40]
    b.op_byte(OpCode::Swap, 1);
    b.op_byte(OpCode::Dup, 0);
    b.op_sized(OpCode::Call, 0); // [40, g, 41]
    b.op_byte(OpCode::Swap, 1);
    b.op(OpCode::Pop); // [40, 41]
    b.op(OpCode::Add);
    b.op(OpCode::Return);

    assert_eq!(h.run_ok(b), Value::int(81));
}

#[test]
fn finished_generator_stays_finished() {
    let mut h = Harness::new();
    let gen_code = {
        let mut gen = Builder::new("gen", "<test>");
        gen.generator();
        gen.op(OpCode::PushNone);
        gen.op(OpCode::Return);
        h.code(gen.finish())
    };

    let mut b = module_builder();
    let gen_idx = b.constant(gen_code);
    b.op_sized(OpCode::Closure, gen_idx);
    b.op_sized(OpCode::Call, 0); // [g]
    // Resume twice; both must yield the generator itself.
    b.op_byte(OpCode::Dup, 0);
    b.op_byte(OpCode::Dup, 0);
    b.op_sized(OpCode::Call, 0);
    b.op(OpCode::Is); // [g, first_finished]
    b.op_byte(OpCode::Swap, 1); // [first, g]
    b.op_byte(OpCode::Dup, 0);
    b.op_sized(OpCode::Call, 0);
    b.op(OpCode::Is); // [first, second_finished]
    b.op_sized(OpCode::MakeTuple, 2);
    b.op(OpCode::Return);

    let result = h.run_ok(b);
    let parts = h.tuple_of(result);
    assert_eq!(parts, vec![Value::Bool(true), Value::Bool(true)]);
}
