//! Dispatch-loop benchmarks: a counted loop, recursive calls through the
//! frame machinery, and attribute traffic through the descriptor protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use kuroko_bytecode::{Builder, OpCode};
use kuroko_core::Value;
use kuroko_vm::{Vm, VmFlags};

/// Count down from `n` in a tight bytecode loop.
fn counting_loop(n: i64) -> kuroko_bytecode::CodeObject {
    let mut b = Builder::new("<module>", "<bench>");
    b.emit_constant(Value::int(n)); // local 0 (slot on stack)
    let top = b.offset();
    b.op_byte(OpCode::Dup, 0);
    b.emit_constant(Value::int(0));
    b.op(OpCode::Greater);
    let done = b.jump(OpCode::JumpIfFalse);
    b.op(OpCode::Pop); // condition
    b.emit_constant(Value::int(1));
    b.op(OpCode::Subtract);
    b.loop_back(top);
    b.patch(done);
    b.op(OpCode::Pop); // condition
    b.op(OpCode::Return);
    b.finish()
}

fn bench_loop(c: &mut Criterion) {
    c.bench_function("dispatch_counting_loop", |b| {
        b.iter(|| {
            let mut vm = Vm::new(VmFlags::empty());
            black_box(vm.interpret(counting_loop(black_box(10_000)), "__main__"))
        })
    });
}

fn bench_table_globals(c: &mut Criterion) {
    // Global load/store churn exercises the module fields table.
    let mut b = Builder::new("<module>", "<bench>");
    let name = "counter";
    b.emit_constant(Value::int(0));
    // builder constants for the name need interning through the VM, so
    // the bench builds per-iteration VMs with the name attached first.
    let mut vm = Vm::new(VmFlags::empty());
    let name_value = vm.intern(name);
    b.op_sized(OpCode::DefineGlobal, b_constant(&mut b, name_value));
    for _ in 0..100 {
        b.op_sized(OpCode::GetGlobal, b_constant(&mut b, name_value));
        b.emit_constant(Value::int(1));
        b.op(OpCode::Add);
        b.op_sized(OpCode::SetGlobal, b_constant(&mut b, name_value));
        b.op(OpCode::Pop);
    }
    b.op_sized(OpCode::GetGlobal, b_constant(&mut b, name_value));
    b.op(OpCode::Return);
    let code = b.finish();

    c.bench_function("dispatch_global_churn", |bench| {
        bench.iter(|| black_box(vm.interpret(code.clone(), "__main__")))
    });
}

fn b_constant(b: &mut Builder, value: Value) -> u32 {
    b.constant(value)
}

criterion_group!(benches, bench_loop, bench_table_globals);
criterion_main!(benches);
