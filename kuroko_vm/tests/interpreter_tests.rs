//! End-to-end dispatch tests over hand-assembled code objects, covering
//! the core scenarios: lambdas, dicts, recursion, arithmetic dispatch,
//! globals, and iteration.

mod common;

use common::Harness;
use kuroko_bytecode::{Builder, OpCode};
use kuroko_core::Value;

fn module_builder() -> Builder {
    Builder::new("<module>", "<test>")
}

#[test]
fn lambda_square() {
    // assert (lambda x: x*x)(5) == 25
    let mut h = Harness::new();
    let x = h.s("x");

    let mut lambda = Builder::new("<lambda>", "<test>");
    lambda.required_arg(x);
    lambda.op_sized(OpCode::GetLocal, 0);
    lambda.op_sized(OpCode::GetLocal, 0);
    lambda.op(OpCode::Multiply);
    lambda.op(OpCode::Return);
    let lambda_code = h.code(lambda.finish());

    let mut b = module_builder();
    let idx = b.constant(lambda_code);
    b.op_sized(OpCode::Closure, idx);
    b.emit_constant(Value::int(5));
    b.op_sized(OpCode::Call, 1);
    b.emit_constant(Value::int(25));
    b.op(OpCode::Equal);
    b.op(OpCode::Return);

    let result = h.run_ok(b);
    assert_eq!(result, Value::Bool(true));
}

#[test]
fn dict_update_and_len() {
    // d = {1:'a', 2:'b'}; d[1] = 'c'; (d[1], len(d)) == ('c', 2)
    let mut h = Harness::new();
    let a = h.s("a");
    let bee = h.s("b");
    let c = h.s("c");
    let dict_of = h.s("dictOf");
    let len_name = h.s("len");

    let mut b = module_builder();
    let dict_of_idx = b.constant(dict_of);
    let len_idx = b.constant(len_name);

    b.op_sized(OpCode::GetGlobal, dict_of_idx);
    b.emit_constant(Value::int(1));
    b.emit_constant(a);
    b.emit_constant(Value::int(2));
    b.emit_constant(bee);
    b.op_sized(OpCode::Call, 4); // [d]

    b.op_byte(OpCode::Dup, 0);
    b.emit_constant(Value::int(1));
    b.emit_constant(c);
    b.op(OpCode::InvokeSetter); // [d, 'c']
    b.op(OpCode::Pop); // [d]

    b.op_byte(OpCode::Dup, 0);
    b.emit_constant(Value::int(1));
    b.op(OpCode::InvokeGetter); // [d, d[1]]

    b.op_byte(OpCode::Swap, 1); // [d[1], d]
    b.op_sized(OpCode::GetGlobal, len_idx); // [d[1], d, len]
    b.op_byte(OpCode::Swap, 1); // [d[1], len, d]
    b.op_sized(OpCode::Call, 1); // [d[1], 2]
    b.op_sized(OpCode::MakeTuple, 2);
    b.op(OpCode::Return);

    let result = h.run_ok(b);
    let parts = h.tuple_of(result);
    h.assert_is_str(parts[0], "c");
    assert_eq!(parts[1], Value::int(2));
}

#[test]
fn recursive_factorial() {
    // def f(n): return 1 if n < 2 else n * f(n-1); f(10) == 3628800
    let mut h = Harness::new();
    let n = h.s("n");
    let f = h.s("f");

    let mut body = Builder::new("f", "<test>");
    body.required_arg(n);
    body.op_sized(OpCode::GetLocal, 0);
    body.emit_constant(Value::int(2));
    body.op(OpCode::Less);
    let else_branch = body.jump(OpCode::JumpIfFalse);
    body.op(OpCode::Pop);
    body.emit_constant(Value::int(1));
    body.op(OpCode::Return);
    body.patch(else_branch);
    body.op(OpCode::Pop);
    body.op_sized(OpCode::GetLocal, 0);
    let f_idx_inner = body.constant(f);
    body.op_sized(OpCode::GetGlobal, f_idx_inner);
    body.op_sized(OpCode::GetLocal, 0);
    body.emit_constant(Value::int(1));
    body.op(OpCode::Subtract);
    body.op_sized(OpCode::Call, 1);
    body.op(OpCode::Multiply);
    body.op(OpCode::Return);
    let f_code = h.code(body.finish());

    let mut b = module_builder();
    let code_idx = b.constant(f_code);
    let f_idx = b.constant(f);
    b.op_sized(OpCode::Closure, code_idx);
    b.op_sized(OpCode::DefineGlobal, f_idx);
    b.op_sized(OpCode::GetGlobal, f_idx);
    b.emit_constant(Value::int(10));
    b.op_sized(OpCode::Call, 1);
    b.op(OpCode::Return);

    let result = h.run_ok(b);
    assert_eq!(result, Value::int(3628800));
}

#[test]
fn arithmetic_fast_paths() {
    let cases: Vec<(OpCode, i64, i64, Value)> = vec![
        (OpCode::Add, 20, 22, Value::int(42)),
        (OpCode::Subtract, 10, 4, Value::int(6)),
        (OpCode::Multiply, 6, 7, Value::int(42)),
        (OpCode::Divide, 7, 2, Value::int(3)),
        (OpCode::Modulo, 7, 2, Value::int(1)),
        (OpCode::BitOr, 5, 2, Value::int(7)),
        (OpCode::BitXor, 7, 2, Value::int(5)),
        (OpCode::BitAnd, 7, 2, Value::int(2)),
        (OpCode::ShiftLeft, 1, 4, Value::int(16)),
        (OpCode::ShiftRight, 16, 4, Value::int(1)),
        (OpCode::Pow, 2, 10, Value::int(1024)),
    ];
    for (op, a, b_operand, expected) in cases {
        let mut h = Harness::new();
        let mut b = module_builder();
        b.emit_constant(Value::int(a));
        b.emit_constant(Value::int(b_operand));
        b.op(op);
        b.op(OpCode::Return);
        assert_eq!(h.run_ok(b), expected, "{:?}", op);
    }
}

#[test]
fn mixed_numeric_arithmetic() {
    let mut h = Harness::new();
    let mut b = module_builder();
    b.emit_constant(Value::int(1));
    b.emit_constant(Value::float(2.5));
    b.op(OpCode::Add);
    b.op(OpCode::Return);
    assert_eq!(h.run_ok(b), Value::float(3.5));
}

#[test]
fn string_concatenation_interns() {
    let mut h = Harness::new();
    let hello = h.s("hello ");
    let world = h.s("world");
    let expected = h.s("hello world");

    let mut b = module_builder();
    b.emit_constant(hello);
    b.emit_constant(world);
    b.op(OpCode::Add);
    b.emit_constant(expected);
    b.op(OpCode::Is); // interning makes equality identity
    b.op(OpCode::Return);
    assert_eq!(h.run_ok(b), Value::Bool(true));
}

#[test]
fn comparison_and_identity() {
    let mut h = Harness::new();
    let mut b = module_builder();
    // 1 == 1.0 but 1 is not 1.0
    b.emit_constant(Value::int(1));
    b.emit_constant(Value::float(1.0));
    b.op(OpCode::Equal);
    b.emit_constant(Value::int(1));
    b.emit_constant(Value::float(1.0));
    b.op(OpCode::Is);
    b.op_sized(OpCode::MakeTuple, 2);
    b.op(OpCode::Return);
    let parts = {
        let result = h.run_ok(b);
        h.tuple_of(result)
    };
    assert_eq!(parts[0], Value::Bool(true));
    assert_eq!(parts[1], Value::Bool(false));
}

#[test]
fn globals_define_set_delete() {
    let mut h = Harness::new();
    let name = h.s("counter");

    let mut b = module_builder();
    let idx = b.constant(name);
    b.emit_constant(Value::int(1));
    b.op_sized(OpCode::DefineGlobal, idx);
    b.op_sized(OpCode::GetGlobal, idx);
    b.emit_constant(Value::int(10));
    b.op(OpCode::Add);
    b.op_sized(OpCode::SetGlobal, idx);
    b.op(OpCode::Pop);
    b.op_sized(OpCode::GetGlobal, idx);
    b.op(OpCode::Return);
    assert_eq!(h.run_ok(b), Value::int(11));
}

#[test]
fn missing_global_raises_name_error() {
    let mut h = Harness::new();
    let name = h.s("missing");
    let mut b = module_builder();
    let idx = b.constant(name);
    b.op_sized(OpCode::GetGlobal, idx);
    b.op(OpCode::Return);
    let exc = h.run_err(b);
    assert!(h.vm.is_instance_of(exc, h.vm.exceptions.name_error));
}

#[test]
fn builtins_fallback_for_global_lookup() {
    // `len` is not defined in the module but resolves from __builtins__.
    let mut h = Harness::new();
    let len_name = h.s("len");
    let text = h.s("four");

    let mut b = module_builder();
    let idx = b.constant(len_name);
    b.op_sized(OpCode::GetGlobal, idx);
    b.emit_constant(text);
    b.op_sized(OpCode::Call, 1);
    b.op(OpCode::Return);
    assert_eq!(h.run_ok(b), Value::int(4));
}

#[test]
fn range_iteration_sums() {
    // total = 0; for i in range(5): total += i; total == 10
    let mut h = Harness::new();
    let range_name = h.s("range");

    let mut b = module_builder();
    let range_idx = b.constant(range_name);
    b.emit_constant(Value::int(0)); // slot 0: total
    b.op_sized(OpCode::GetGlobal, range_idx);
    b.emit_constant(Value::int(5));
    b.op_sized(OpCode::Call, 1);
    b.op(OpCode::GetIter); // slot 1: iterator

    let top = b.offset();
    let done = b.jump(OpCode::ForIter); // pushes next value
    b.op_sized(OpCode::GetLocal, 0);
    b.op(OpCode::Add);
    b.op_sized(OpCode::SetLocal, 0);
    b.op(OpCode::Pop);
    b.loop_back(top);
    b.patch(done);

    b.op(OpCode::Pop); // iterator
    b.op_sized(OpCode::GetLocal, 0);
    b.op(OpCode::Return);
    assert_eq!(h.run_ok(b), Value::int(10));
}

#[test]
fn iteration_matches_direct_iteration() {
    // list(iter(seq)) visits the same values as the list itself.
    let mut h = Harness::new();
    let list_of = h.s("listOf");

    let mut b = module_builder();
    let list_idx = b.constant(list_of);
    b.op_sized(OpCode::GetGlobal, list_idx);
    b.emit_constant(Value::int(7));
    b.emit_constant(Value::int(8));
    b.emit_constant(Value::int(9));
    b.op_sized(OpCode::Call, 3); // [seq]
    b.op(OpCode::GetIter); // [it]

    // Drain into a tuple.
    let top = b.offset();
    let done = b.jump(OpCode::ForIter);
    b.op_byte(OpCode::Swap, 1); // value below iterator
    b.loop_back(top);
    b.patch(done);
    b.op(OpCode::Pop); // iterator
    b.op_sized(OpCode::MakeTuple, 3);
    b.op(OpCode::Return);

    let result = h.run_ok(b);
    let parts = h.tuple_of(result);
    assert_eq!(parts, vec![Value::int(7), Value::int(8), Value::int(9)]);
}

#[test]
fn division_by_zero_raises() {
    let mut h = Harness::new();
    let mut b = module_builder();
    b.emit_constant(Value::int(1));
    b.emit_constant(Value::int(0));
    b.op(OpCode::Divide);
    b.op(OpCode::Return);
    let exc = h.run_err(b);
    assert!(h.vm.is_instance_of(exc, h.vm.exceptions.zero_division_error));
}

#[test]
fn unpack_tuple_into_slots() {
    let mut h = Harness::new();
    let mut b = module_builder();
    b.emit_constant(Value::int(1));
    b.emit_constant(Value::int(2));
    b.op_sized(OpCode::MakeTuple, 2);
    b.op_sized(OpCode::Unpack, 2);
    b.op(OpCode::Subtract); // 1 - 2
    b.op(OpCode::Return);
    assert_eq!(h.run_ok(b), Value::int(-1));
}

#[test]
fn unpack_arity_mismatch_raises() {
    let mut h = Harness::new();
    let mut b = module_builder();
    b.emit_constant(Value::int(1));
    b.op_sized(OpCode::MakeTuple, 1);
    b.op_sized(OpCode::Unpack, 3);
    b.op(OpCode::Return);
    let exc = h.run_err(b);
    assert!(h.vm.is_instance_of(exc, h.vm.exceptions.value_error));
}

#[test]
fn list_slicing() {
    let mut h = Harness::new();
    let list_of = h.s("listOf");
    let mut b = module_builder();
    let idx = b.constant(list_of);
    b.op_sized(OpCode::GetGlobal, idx);
    for i in 0..5 {
        b.emit_constant(Value::int(i));
    }
    b.op_sized(OpCode::Call, 5); // [0,1,2,3,4]
    b.emit_constant(Value::int(1));
    b.emit_constant(Value::int(4));
    b.op(OpCode::InvokeGetSlice);
    b.op(OpCode::Return);

    let result = h.run_ok(b);
    let values = result
        .as_object()
        .and_then(|o| h.vm.heap.list_values(o))
        .cloned()
        .expect("list result");
    assert_eq!(values, vec![Value::int(1), Value::int(2), Value::int(3)]);
}

#[test]
fn unary_operators() {
    let mut h = Harness::new();
    let mut b = module_builder();
    b.emit_constant(Value::int(5));
    b.op(OpCode::Negate);
    b.emit_constant(Value::int(5));
    b.op(OpCode::BitNegate);
    b.emit_constant(Value::float(2.5));
    b.op(OpCode::Negate);
    b.op_sized(OpCode::MakeTuple, 3);
    b.op(OpCode::Return);
    let result = h.run_ok(b);
    let parts = h.tuple_of(result);
    assert_eq!(parts[0], Value::int(-5));
    assert_eq!(parts[1], Value::int(-6));
    assert_eq!(parts[2], Value::float(-2.5));
}

#[test]
fn delete_global_and_attribute() {
    let mut h = Harness::new();
    let name = h.s("transient");
    let dict_of = h.s("dictOf");

    let mut b = module_builder();
    let name_idx = b.constant(name);
    let dict_idx = b.constant(dict_of);
    // Define, delete, then expect the lookup to miss.
    b.emit_constant(Value::int(1));
    b.op_sized(OpCode::DefineGlobal, name_idx);
    b.op_sized(OpCode::DelGlobal, name_idx);
    // Dict entry deletion through __delitem__.
    b.op_sized(OpCode::GetGlobal, dict_idx);
    b.emit_constant(Value::int(1));
    b.emit_constant(Value::int(2));
    b.op_sized(OpCode::Call, 2); // {1: 2}
    b.op_byte(OpCode::Dup, 0);
    b.emit_constant(Value::int(1));
    b.op(OpCode::InvokeDelete); // del d[1]
    b.emit_constant(Value::int(1));
    b.op(OpCode::InvokeGetter); // raises KeyError
    b.op(OpCode::Return);

    let exc = h.run_err(b);
    assert!(h.vm.is_instance_of(exc, h.vm.exceptions.key_error));

    // And the deleted global no longer resolves.
    let mut check = module_builder();
    let name_idx = check.constant(name);
    check.op_sized(OpCode::GetGlobal, name_idx);
    check.op(OpCode::Return);
    let exc = h.run_err(check);
    assert!(h.vm.is_instance_of(exc, h.vm.exceptions.name_error));
}

#[test]
fn call_stack_takes_arity_from_the_stack() {
    let mut h = Harness::new();
    let list_of = h.s("listOf");
    let len_name = h.s("len");

    let mut b = module_builder();
    let list_idx = b.constant(list_of);
    let len_idx = b.constant(len_name);
    b.op_sized(OpCode::GetGlobal, len_idx);
    b.op_sized(OpCode::GetGlobal, list_idx);
    b.emit_constant(Value::int(1));
    b.emit_constant(Value::int(2));
    b.emit_constant(Value::int(3));
    b.emit_constant(Value::int(3)); // arity for listOf
    b.op(OpCode::CallStack); // [len, [1,2,3]]
    b.emit_constant(Value::int(1)); // arity for len
    b.op(OpCode::CallStack);
    b.op(OpCode::Return);

    assert_eq!(h.run_ok(b), Value::int(3));
}

#[test]
fn stack_discipline_across_calls() {
    // After a call returns, the stack holds exactly the result in place
    // of callee and arguments.
    let mut h = Harness::new();
    let x = h.s("x");
    let mut inner = Builder::new("id", "<test>");
    inner.required_arg(x);
    inner.op_sized(OpCode::GetLocal, 0);
    inner.op(OpCode::Return);
    let code = h.code(inner.finish());

    let mut b = module_builder();
    let code_idx = b.constant(code);
    b.emit_constant(Value::int(1)); // sentinel below the call
    b.op_sized(OpCode::Closure, code_idx);
    b.emit_constant(Value::int(5));
    b.op_sized(OpCode::Call, 1);
    // Stack must now be [sentinel, 5]; combining proves both positions.
    b.op(OpCode::Add);
    b.op(OpCode::Return);
    assert_eq!(h.run_ok(b), Value::int(6));
}
