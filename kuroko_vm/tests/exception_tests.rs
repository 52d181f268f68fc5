//! Raising, handler dispatch, unwinding across frames, with-block
//! cleanup, re-raise, and traceback rendering.

mod common;

use common::Harness;
use kuroko_bytecode::{Builder, OpCode};
use kuroko_core::Value;

fn module_builder() -> Builder {
    Builder::new("<module>", "<test>")
}

#[test]
fn try_except_catches_and_exposes_message() {
    // try: raise ValueError('x')
    // except ValueError as e: str(e) == 'x'
    let mut h = Harness::new();
    let value_error = h.s("ValueError");
    let x = h.s("x");
    let str_name = h.s("str");

    let mut b = module_builder();
    let ve_idx = b.constant(value_error);
    let x_idx = b.constant(x);
    let str_idx = b.constant(str_name);

    let handler = b.jump(OpCode::PushTry);
    b.op_sized(OpCode::GetGlobal, ve_idx);
    b.op_sized(OpCode::Constant, x_idx);
    b.op_sized(OpCode::Call, 1);
    b.op(OpCode::Raise);
    b.patch(handler);
    // Handler entry: the exception is on the stack.
    b.op_sized(OpCode::GetGlobal, str_idx);
    b.op_byte(OpCode::Swap, 1);
    b.op_sized(OpCode::Call, 1);
    b.op(OpCode::Return);

    let result = h.run_ok(b);
    h.assert_is_str(result, "x");
}

#[test]
fn handler_restores_recorded_stack_depth() {
    // Values pushed inside the try body are discarded at unwind.
    let mut h = Harness::new();
    let value_error = h.s("ValueError");

    let mut b = module_builder();
    let ve_idx = b.constant(value_error);
    b.emit_constant(Value::int(999)); // survives: below the handler depth
    let handler = b.jump(OpCode::PushTry);
    b.emit_constant(Value::int(1)); // junk above the handler depth
    b.emit_constant(Value::int(2));
    b.op_sized(OpCode::GetGlobal, ve_idx);
    b.op_sized(OpCode::Call, 0);
    b.op(OpCode::Raise);
    b.patch(handler);
    b.op(OpCode::Pop); // the exception
    b.op(OpCode::Return); // returns the surviving 999

    assert_eq!(h.run_ok(b), Value::int(999));
}

#[test]
fn unwind_crosses_call_frames() {
    // def boom(): raise ValueError('deep')
    // try: boom()
    // except: 5
    let mut h = Harness::new();
    let value_error = h.s("ValueError");
    let deep = h.s("deep");

    let mut boom = Builder::new("boom", "<test>");
    let ve_inner = boom.constant(value_error);
    let deep_inner = boom.constant(deep);
    boom.op_sized(OpCode::GetGlobal, ve_inner);
    boom.op_sized(OpCode::Constant, deep_inner);
    boom.op_sized(OpCode::Call, 1);
    boom.op(OpCode::Raise);
    let boom_code = h.code(boom.finish());

    let mut b = module_builder();
    let code_idx = b.constant(boom_code);
    let handler = b.jump(OpCode::PushTry);
    b.op_sized(OpCode::Closure, code_idx);
    b.op_sized(OpCode::Call, 0);
    b.op(OpCode::Return); // unreachable
    b.patch(handler);
    b.op(OpCode::Pop); // exception
    b.emit_constant(Value::int(5));
    b.op(OpCode::Return);

    assert_eq!(h.run_ok(b), Value::int(5));
}

#[test]
fn pop_try_disarms_the_handler() {
    let mut h = Harness::new();
    let value_error = h.s("ValueError");

    let mut b = module_builder();
    let ve_idx = b.constant(value_error);
    let handler = b.jump(OpCode::PushTry);
    b.op(OpCode::PopTry);
    b.op_sized(OpCode::GetGlobal, ve_idx);
    b.op_sized(OpCode::Call, 0);
    b.op(OpCode::Raise);
    b.patch(handler);
    b.op(OpCode::Return); // would return the exception if (wrongly) handled

    let exc = h.run_err(b);
    assert!(h.vm.is_instance_of(exc, h.vm.exceptions.value_error));
}

#[test]
fn reraise_preserves_original_traceback() {
    // Catch, then re-raise the same instance; the traceback attached at
    // the first raise survives.
    let mut h = Harness::new();
    let value_error = h.s("ValueError");

    let mut b = module_builder();
    let ve_idx = b.constant(value_error);
    let handler = b.jump(OpCode::PushTry);
    b.op_sized(OpCode::GetGlobal, ve_idx);
    b.op_sized(OpCode::Call, 0);
    b.op(OpCode::Raise);
    b.patch(handler);
    b.op(OpCode::Raise); // re-raise the caught exception

    let exc = h.run_err(b);
    let traceback_name = h.vm.names.traceback;
    let traceback = exc
        .as_object()
        .and_then(|o| h.vm.heap.fields(o))
        .and_then(|f| f.get(&h.vm.heap, traceback_name));
    assert!(traceback.is_some(), "traceback missing after re-raise");
}

#[test]
fn with_block_runs_exit_on_normal_path() {
    let mut h = Harness::new();
    let (cm_class, exited) = define_context_manager(&mut h);

    let mut b = module_builder();
    let cm_idx = b.constant(cm_class);
    let exited_idx = b.constant(exited);

    b.op_sized(OpCode::GetGlobal, cm_idx);
    b.op_sized(OpCode::Call, 0); // [cm]
    let cleanup = b.jump(OpCode::PushWith);
    b.emit_constant(Value::int(1)); // body work
    b.op(OpCode::Pop);
    b.patch(cleanup);
    b.op(OpCode::CleanupWith);
    b.op_sized(OpCode::GetGlobal, exited_idx);
    b.op(OpCode::Return);

    assert_eq!(h.run_ok(b), Value::Bool(true));
}

#[test]
fn with_block_runs_exit_on_exception_path() {
    let mut h = Harness::new();
    let (cm_class, exited) = define_context_manager(&mut h);
    let value_error = h.s("ValueError");

    let mut b = module_builder();
    let cm_idx = b.constant(cm_class);
    let exited_idx = b.constant(exited);
    let ve_idx = b.constant(value_error);

    let handler = b.jump(OpCode::PushTry);
    b.op_sized(OpCode::GetGlobal, cm_idx);
    b.op_sized(OpCode::Call, 0);
    let cleanup = b.jump(OpCode::PushWith);
    b.op_sized(OpCode::GetGlobal, ve_idx);
    b.op_sized(OpCode::Call, 0);
    b.op(OpCode::Raise);
    b.patch(cleanup);
    b.op(OpCode::CleanupWith); // not reached on this path
    b.patch(handler);
    b.op(OpCode::Pop); // the exception
    b.op_sized(OpCode::GetGlobal, exited_idx);
    b.op(OpCode::Return);

    // __exit__ ran during unwind, before the handler body.
    assert_eq!(h.run_ok(b), Value::Bool(true));
}

#[test]
fn recursion_limit_raises_recursion_error() {
    let mut h = Harness::new();
    let f = h.s("f");

    let mut body = Builder::new("f", "<test>");
    let f_inner = body.constant(f);
    body.op_sized(OpCode::GetGlobal, f_inner);
    body.op_sized(OpCode::Call, 0);
    body.op(OpCode::Return);
    let code = h.code(body.finish());

    let mut b = module_builder();
    let code_idx = b.constant(code);
    let f_idx = b.constant(f);
    b.op_sized(OpCode::Closure, code_idx);
    b.op_sized(OpCode::DefineGlobal, f_idx);
    b.op_sized(OpCode::GetGlobal, f_idx);
    b.op_sized(OpCode::Call, 0);
    b.op(OpCode::Return);

    let exc = h.run_err(b);
    assert!(h.vm.is_instance_of(exc, h.vm.exceptions.recursion_error));
}

#[test]
fn traceback_renders_frames_and_message() {
    let mut h = Harness::new();
    let value_error = h.s("ValueError");
    let message = h.s("broken");

    let mut boom = Builder::new("boom", "inner.krk");
    boom.line(3);
    let ve_inner = boom.constant(value_error);
    let msg_inner = boom.constant(message);
    boom.op_sized(OpCode::GetGlobal, ve_inner);
    boom.op_sized(OpCode::Constant, msg_inner);
    boom.op_sized(OpCode::Call, 1);
    boom.op(OpCode::Raise);
    let boom_code = h.code(boom.finish());

    let mut b = Builder::new("<module>", "outer.krk");
    b.line(1);
    let code_idx = b.constant(boom_code);
    b.op_sized(OpCode::Closure, code_idx);
    b.op_sized(OpCode::Call, 0);
    b.op(OpCode::Return);

    let result = h.vm.interpret_checked(b.finish(), "__main__");
    let err = result.expect_err("exception should escape");
    let rendered = err.to_string();
    assert!(rendered.contains("Traceback (most recent call last):"));
    assert!(rendered.contains("outer.krk"));
    assert!(rendered.contains("inner.krk"));
    assert!(rendered.contains("line 3, in boom"));
    assert!(rendered.contains("ValueError: broken"));
}

#[test]
fn signalled_flag_raises_keyboard_interrupt() {
    let mut h = Harness::new();
    h.vm.set_signalled();
    let mut b = module_builder();
    b.emit_constant(Value::int(1));
    b.op(OpCode::Return);
    let exc = h.run_err(b);
    assert!(h.vm.is_instance_of(exc, h.vm.exceptions.keyboard_interrupt));
}

// =============================================================================
// Helpers
// =============================================================================

/// Define `class CM` whose `__enter__` returns self and whose `__exit__`
/// sets the global `exited` flag. Returns the interned class and flag
/// names.
fn define_context_manager(h: &mut Harness) -> (Value, Value) {
    let cm = h.s("CM");
    let enter = h.s("__enter__");
    let exit = h.s("__exit__");
    let exited = h.s("exited");
    let self_name = h.s("self");

    let mut enter_body = Builder::new("__enter__", "<test>");
    enter_body.required_arg(self_name);
    enter_body.op_sized(OpCode::GetLocal, 0);
    enter_body.op(OpCode::Return);
    let enter_code = h.code(enter_body.finish());

    let mut exit_body = Builder::new("__exit__", "<test>");
    exit_body.required_arg(self_name);
    let exited_inner = exit_body.constant(exited);
    exit_body.op(OpCode::PushTrue);
    exit_body.op_sized(OpCode::DefineGlobal, exited_inner);
    exit_body.op(OpCode::PushNone);
    exit_body.op(OpCode::Return);
    let exit_code = h.code(exit_body.finish());

    let mut b = Builder::new("<module>", "<setup>");
    let cm_idx = b.constant(cm);
    let enter_idx = b.constant(enter);
    let exit_idx = b.constant(exit);
    let exited_idx = b.constant(exited);
    let enter_code_idx = b.constant(enter_code);
    let exit_code_idx = b.constant(exit_code);

    // exited = False (so the flag name resolves before __exit__ runs)
    b.op(OpCode::PushFalse);
    b.op_sized(OpCode::DefineGlobal, exited_idx);

    b.op_sized(OpCode::Class, cm_idx);
    b.op_byte(OpCode::Dup, 0);
    b.op_sized(OpCode::DefineGlobal, cm_idx);
    b.op_sized(OpCode::Closure, enter_code_idx);
    b.op_sized(OpCode::Method, enter_idx);
    b.op_sized(OpCode::Closure, exit_code_idx);
    b.op_sized(OpCode::Method, exit_idx);
    b.op(OpCode::FinalizeClass);
    b.op(OpCode::PushNone);
    b.op(OpCode::Return);

    h.run_ok(b);
    (cm, exited)
}
