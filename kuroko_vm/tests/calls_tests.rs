//! The calling convention: defaults, keyword arguments, collectors,
//! bound methods, and arity errors.

mod common;

use common::Harness;
use kuroko_bytecode::{Builder, CodeFlags, OpCode};
use kuroko_core::{Value, KWARGS_LIST};

fn module_builder() -> Builder {
    Builder::new("<module>", "<test>")
}

/// def pair(a, b=10): return (a, b)
fn define_pair(h: &mut Harness) {
    let a = h.s("a");
    let b_name = h.s("b");
    let mut code = Builder::new("pair", "<test>");
    code.required_arg(a);
    code.optional_arg(b_name);
    code.op_sized(OpCode::GetLocal, 0);
    code.op_sized(OpCode::GetLocal, 1);
    code.op_sized(OpCode::MakeTuple, 2);
    code.op(OpCode::Return);
    h.define_function("pair", code.finish(), vec![Value::int(10)]);
}

#[test]
fn defaults_fill_missing_optionals() {
    let mut h = Harness::new();
    define_pair(&mut h);
    let pair = h.s("pair");

    let mut b = module_builder();
    let pair_idx = b.constant(pair);
    b.op_sized(OpCode::GetGlobal, pair_idx);
    b.emit_constant(Value::int(1));
    b.op_sized(OpCode::Call, 1);
    b.op(OpCode::Return);

    let result = h.run_ok(b);
    assert_eq!(h.tuple_of(result), vec![Value::int(1), Value::int(10)]);
}

#[test]
fn positional_overrides_default() {
    let mut h = Harness::new();
    define_pair(&mut h);
    let pair = h.s("pair");

    let mut b = module_builder();
    let pair_idx = b.constant(pair);
    b.op_sized(OpCode::GetGlobal, pair_idx);
    b.emit_constant(Value::int(1));
    b.emit_constant(Value::int(2));
    b.op_sized(OpCode::Call, 2);
    b.op(OpCode::Return);

    let result = h.run_ok(b);
    assert_eq!(h.tuple_of(result), vec![Value::int(1), Value::int(2)]);
}

#[test]
fn keyword_arguments_bind_by_name() {
    // pair(1, b=7) via the keyword-marker protocol.
    let mut h = Harness::new();
    define_pair(&mut h);
    let pair = h.s("pair");
    let b_name = h.s("b");

    let mut b = module_builder();
    let pair_idx = b.constant(pair);
    let b_name_idx = b.constant(b_name);
    b.op_sized(OpCode::GetGlobal, pair_idx);
    b.emit_constant(Value::int(1));
    b.op_sized(OpCode::Constant, b_name_idx);
    b.emit_constant(Value::int(7));
    b.op_sized(OpCode::Kwargs, 1); // one key/value pair
    b.op_sized(OpCode::Call, 4);
    b.op(OpCode::Return);

    let result = h.run_ok(b);
    assert_eq!(h.tuple_of(result), vec![Value::int(1), Value::int(7)]);
}

#[test]
fn duplicate_keyword_raises_type_error() {
    // pair(1, a=2)
    let mut h = Harness::new();
    define_pair(&mut h);
    let pair = h.s("pair");
    let a_name = h.s("a");

    let mut b = module_builder();
    let pair_idx = b.constant(pair);
    let a_idx = b.constant(a_name);
    b.op_sized(OpCode::GetGlobal, pair_idx);
    b.emit_constant(Value::int(1));
    b.op_sized(OpCode::Constant, a_idx);
    b.emit_constant(Value::int(2));
    b.op_sized(OpCode::Kwargs, 1);
    b.op_sized(OpCode::Call, 4);
    b.op(OpCode::Return);

    let exc = h.run_err(b);
    assert!(h.vm.is_instance_of(exc, h.vm.exceptions.type_error));
}

#[test]
fn unknown_keyword_raises_type_error() {
    let mut h = Harness::new();
    define_pair(&mut h);
    let pair = h.s("pair");
    let bogus = h.s("bogus");

    let mut b = module_builder();
    let pair_idx = b.constant(pair);
    let bogus_idx = b.constant(bogus);
    b.op_sized(OpCode::GetGlobal, pair_idx);
    b.emit_constant(Value::int(1));
    b.op_sized(OpCode::Constant, bogus_idx);
    b.emit_constant(Value::int(2));
    b.op_sized(OpCode::Kwargs, 1);
    b.op_sized(OpCode::Call, 4);
    b.op(OpCode::Return);

    let exc = h.run_err(b);
    assert!(h.vm.is_instance_of(exc, h.vm.exceptions.type_error));
}

#[test]
fn missing_required_argument_raises() {
    let mut h = Harness::new();
    define_pair(&mut h);
    let pair = h.s("pair");

    let mut b = module_builder();
    let pair_idx = b.constant(pair);
    b.op_sized(OpCode::GetGlobal, pair_idx);
    b.op_sized(OpCode::Call, 0);
    b.op(OpCode::Return);

    let exc = h.run_err(b);
    let class = h.vm.get_type(exc);
    assert!(
        class == h.vm.exceptions.argument_error || class == h.vm.exceptions.type_error,
        "unexpected exception class"
    );
}

#[test]
fn too_many_positionals_raise_argument_error() {
    let mut h = Harness::new();
    define_pair(&mut h);
    let pair = h.s("pair");

    let mut b = module_builder();
    let pair_idx = b.constant(pair);
    b.op_sized(OpCode::GetGlobal, pair_idx);
    for i in 0..5 {
        b.emit_constant(Value::int(i));
    }
    b.op_sized(OpCode::Call, 5);
    b.op(OpCode::Return);

    let exc = h.run_err(b);
    assert!(h.vm.is_instance_of(exc, h.vm.exceptions.argument_error));
}

#[test]
fn star_args_collect_extras() {
    // def gather(a, *rest): return (a, len(rest))
    let mut h = Harness::new();
    let a = h.s("a");
    let len_name = h.s("len");

    let mut code = Builder::new("gather", "<test>");
    code.required_arg(a);
    code.collect_args();
    let len_inner = code.constant(len_name);
    code.op_sized(OpCode::GetLocal, 0);
    code.op_sized(OpCode::GetGlobal, len_inner);
    code.op_sized(OpCode::GetLocal, 1); // the *rest list
    code.op_sized(OpCode::Call, 1);
    code.op_sized(OpCode::MakeTuple, 2);
    code.op(OpCode::Return);
    h.define_function("gather", code.finish(), Vec::new());
    let gather = h.s("gather");

    let mut b = module_builder();
    let gather_idx = b.constant(gather);
    b.op_sized(OpCode::GetGlobal, gather_idx);
    for i in 0..4 {
        b.emit_constant(Value::int(i));
    }
    b.op_sized(OpCode::Call, 4);
    b.op(OpCode::Return);

    let result = h.run_ok(b);
    assert_eq!(h.tuple_of(result), vec![Value::int(0), Value::int(3)]);
}

#[test]
fn star_expansion_flattens_iterables() {
    // pair(*[1, 2]) via the expansion marker protocol.
    let mut h = Harness::new();
    define_pair(&mut h);
    let pair = h.s("pair");
    let list_of = h.s("listOf");

    let mut b = module_builder();
    let pair_idx = b.constant(pair);
    let list_idx = b.constant(list_of);
    b.op_sized(OpCode::GetGlobal, pair_idx);
    b.op_byte(OpCode::ExpandArgs, 1); // the *-marker key
    b.op_sized(OpCode::GetGlobal, list_idx);
    b.emit_constant(Value::int(1));
    b.emit_constant(Value::int(2));
    b.op_sized(OpCode::Call, 2); // the iterable value
    b.op_sized(OpCode::Kwargs, 1); // one (marker, value) pair
    b.op_sized(OpCode::Call, 3);
    b.op(OpCode::Return);

    let result = h.run_ok(b);
    assert_eq!(h.tuple_of(result), vec![Value::int(1), Value::int(2)]);
    // The marker payload constant matches the expansion kind.
    assert_eq!(KWARGS_LIST, u32::MAX - 1);
}

#[test]
fn kwargs_collector_receives_unknown_names() {
    // def options(**opts): return opts['color']
    let mut h = Harness::new();
    let color = h.s("color");

    let mut code = Builder::new("options", "<test>");
    code.collect_kwargs();
    let color_inner = code.constant(color);
    code.op_sized(OpCode::GetLocal, 0); // the **opts dict
    code.op_sized(OpCode::Constant, color_inner);
    code.op(OpCode::InvokeGetter);
    code.op(OpCode::Return);
    h.define_function("options", code.finish(), Vec::new());
    let options = h.s("options");
    let red = h.s("red");

    let mut b = module_builder();
    let options_idx = b.constant(options);
    let color_idx = b.constant(color);
    let red_idx = b.constant(red);
    b.op_sized(OpCode::GetGlobal, options_idx);
    b.op_sized(OpCode::Constant, color_idx);
    b.op_sized(OpCode::Constant, red_idx);
    b.op_sized(OpCode::Kwargs, 1);
    b.op_sized(OpCode::Call, 3);
    b.op(OpCode::Return);

    let result = h.run_ok(b);
    h.assert_is_str(result, "red");
}

#[test]
fn bound_method_inserts_receiver() {
    let mut h = Harness::new();
    let list_of = h.s("listOf");
    let append = h.s("append");
    let len_name = h.s("len");

    let mut b = module_builder();
    let list_idx = b.constant(list_of);
    let append_idx = b.constant(append);
    let len_idx = b.constant(len_name);
    b.op_sized(OpCode::GetGlobal, list_idx);
    b.op_sized(OpCode::Call, 0); // []
    b.op_byte(OpCode::Dup, 0);
    b.op_sized(OpCode::GetProperty, append_idx); // bound append
    b.emit_constant(Value::int(1));
    b.op_sized(OpCode::Call, 1);
    b.op(OpCode::Pop);
    b.op_sized(OpCode::GetGlobal, len_idx);
    b.op_byte(OpCode::Swap, 1);
    b.op_sized(OpCode::Call, 1);
    b.op(OpCode::Return);

    assert_eq!(h.run_ok(b), Value::int(1));
}

#[test]
fn calling_a_non_callable_raises() {
    let mut h = Harness::new();
    let mut b = module_builder();
    b.emit_constant(Value::int(3));
    b.op_sized(OpCode::Call, 0);
    b.op(OpCode::Return);
    let exc = h.run_err(b);
    assert!(h.vm.is_instance_of(exc, h.vm.exceptions.type_error));
}

#[test]
fn generator_flag_reaches_code_objects() {
    let mut code = Builder::new("g", "<test>");
    code.generator();
    code.op(OpCode::PushNone);
    code.op(OpCode::Return);
    let finished = code.finish();
    assert!(finished.flags.contains(CodeFlags::GENERATOR));
}
