//! The embedding surface: module injection and imports, attribute
//! helpers, native definition, and host-visible error reporting.

mod common;

use common::Harness;
use kuroko_bytecode::{Builder, OpCode};
use kuroko_core::Value;
use kuroko_vm::{TargetTable, Vm};

fn module_builder() -> Builder {
    Builder::new("<module>", "<test>")
}

#[test]
fn import_resolves_injected_modules() {
    let mut h = Harness::new();
    let module = h.vm.make_module("netconfig");
    h.vm.attach_named_value(TargetTable::Fields(module), "port", Value::int(8080));
    h.vm.register_module("netconfig", module);

    let name = h.s("netconfig");
    let port_name = h.s("port");
    let mut b = module_builder();
    let name_idx = b.constant(name);
    let port_idx = b.constant(port_name);
    b.op_sized(OpCode::Import, name_idx);
    b.op_sized(OpCode::GetProperty, port_idx);
    b.op(OpCode::Return);

    assert_eq!(h.run_ok(b), Value::int(8080));
}

#[test]
fn missing_import_raises_import_error() {
    let mut h = Harness::new();
    let name = h.s("nonexistent_module");
    let mut b = module_builder();
    let name_idx = b.constant(name);
    b.op_sized(OpCode::Import, name_idx);
    b.op(OpCode::Return);
    let exc = h.run_err(b);
    assert!(h.vm.is_instance_of(exc, h.vm.exceptions.import_error));
}

#[test]
fn import_from_resolves_attributes_and_submodules() {
    let mut h = Harness::new();
    // pkg with attribute `answer`, and a cached submodule pkg.sub.
    let pkg = h.vm.make_module("pkg");
    h.vm.attach_named_value(TargetTable::Fields(pkg), "answer", Value::int(42));
    h.vm.register_module("pkg", pkg);
    let sub = h.vm.make_module("pkg.sub");
    h.vm.register_module("pkg.sub", sub);

    let pkg_name = h.s("pkg");
    let answer = h.s("answer");
    let sub_name = h.s("sub");

    let mut b = module_builder();
    let pkg_idx = b.constant(pkg_name);
    let answer_idx = b.constant(answer);
    let sub_idx = b.constant(sub_name);
    b.op_sized(OpCode::Import, pkg_idx);
    b.op_sized(OpCode::ImportFrom, answer_idx); // attribute wins
    b.op_sized(OpCode::Import, pkg_idx);
    b.op_sized(OpCode::ImportFrom, sub_idx); // falls back to the cache
    b.op_sized(OpCode::MakeTuple, 2);
    b.op(OpCode::Return);

    let result = h.run_ok(b);
    let parts = h.tuple_of(result);
    assert_eq!(parts[0], Value::int(42));
    assert!(h.vm.heap.module(parts[1].as_object().unwrap()).is_some());
}

#[test]
fn get_attribute_of_convenience() {
    let mut h = Harness::new();
    let module = h.vm.make_module("sample");
    h.vm.attach_named_value(TargetTable::Fields(module), "marker", Value::int(5));

    let found = h.vm.get_attribute_of(Value::object(module), "marker");
    assert_eq!(found, Value::int(5));
    assert!(!h.vm.has_exception());

    let missing = h.vm.get_attribute_of(Value::object(module), "absent");
    assert!(missing.is_none());
    assert!(h.vm.has_exception());
    let exc = h.vm.thread_mut().take_exception();
    assert!(h.vm.is_instance_of(exc, h.vm.exceptions.attribute_error));
}

#[test]
fn define_native_prefixes_control_binding() {
    fn answer(_vm: &mut Vm, _args: &[Value], _has_kw: bool) -> Value {
        Value::int(42)
    }
    fn forty(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
        // Dynamic property: called with the receiver on access.
        assert!(!args.is_empty());
        let _ = vm;
        Value::int(40)
    }

    let mut h = Harness::new();
    let object_class = h.vm.base_classes.object_;
    let class = h.vm.make_class(None, "Probe", object_class);
    h.vm.define_native(TargetTable::Methods(class), ".answer", answer);
    h.vm.define_native(TargetTable::Methods(class), ":forty", forty);
    h.vm.finalize_class(class);

    let instance = h.vm.make_instance(class);

    // Method access binds; property access invokes.
    let bound = h.vm.get_attribute_of(Value::object(instance), "answer");
    let called = h.vm.call_simple(bound, &[]);
    assert_eq!(called, Value::int(42));

    let direct = h.vm.get_attribute_of(Value::object(instance), "forty");
    assert_eq!(direct, Value::int(40));

    // The property form behaves like the `:` prefix.
    h.vm.define_native_property(TargetTable::Methods(class), "also_forty", forty);
    h.vm.finalize_class(class);
    let via_property = h.vm.get_attribute_of(Value::object(instance), "also_forty");
    assert_eq!(via_property, Value::int(40));
}

#[test]
fn interpret_checked_reports_unhandled_exceptions() {
    let mut vm = Vm::new(kuroko_vm::VmFlags::empty());
    let mut b = Builder::new("<module>", "fail.krk");
    let name = vm.intern("definitely_missing");
    vm.push(name);
    let idx = b.constant(name);
    b.op_sized(OpCode::GetGlobal, idx);
    b.op(OpCode::Return);

    let err = vm
        .interpret_checked(b.finish(), "__main__")
        .expect_err("lookup must fail");
    let text = err.to_string();
    assert!(text.contains("NameError"));
    assert!(text.contains("definitely_missing"));
    assert!(!vm.has_exception(), "checked interpret clears the exception");
}

#[test]
fn dict_items_round_trip() {
    // dict(d.items()) == d
    let mut h = Harness::new();
    let dict_of = h.s("dictOf");
    let dict_name = h.s("dict");
    let items = h.s("items");
    let a = h.s("a");
    let bee = h.s("b");

    let mut b = module_builder();
    let dict_of_idx = b.constant(dict_of);
    let dict_idx = b.constant(dict_name);
    let items_idx = b.constant(items);

    b.op_sized(OpCode::GetGlobal, dict_of_idx);
    b.emit_constant(Value::int(1));
    b.emit_constant(a);
    b.emit_constant(Value::int(2));
    b.emit_constant(bee);
    b.op_sized(OpCode::Call, 4); // [d]

    b.op_byte(OpCode::Dup, 0); // [d, d]
    b.op_sized(OpCode::GetGlobal, dict_idx); // [d, d, dict]
    b.op_byte(OpCode::Swap, 1); // [d, dict, d]
    b.op_sized(OpCode::GetProperty, items_idx); // [d, dict, bound items]
    b.op_sized(OpCode::Call, 0); // [d, dict, items view]
    b.op_sized(OpCode::Call, 1); // [d, dict(items)]
    b.op(OpCode::Equal);
    b.op(OpCode::Return);

    assert_eq!(h.run_ok(b), Value::Bool(true));
}

#[test]
fn builtins_redefinition_affects_later_lookups_only() {
    // Overwriting a __builtins__ entry is visible to subsequent
    // global-miss lookups; bindings already resolved are unaffected.
    fn fake_len(_vm: &mut Vm, _args: &[Value], _has_kw: bool) -> Value {
        Value::int(-1)
    }

    let mut h = Harness::new();
    let len_name = h.s("len");
    let text = h.s("abc");

    let mut before = module_builder();
    let len_idx = before.constant(len_name);
    let text_idx = before.constant(text);
    before.op_sized(OpCode::GetGlobal, len_idx);
    before.op_sized(OpCode::Constant, text_idx);
    before.op_sized(OpCode::Call, 1);
    before.op(OpCode::Return);
    assert_eq!(h.run_ok(before), Value::int(3));

    let builtins = h.vm.builtins;
    h.vm.define_native(TargetTable::Fields(builtins), "len", fake_len);

    let mut after = module_builder();
    let len_idx = after.constant(len_name);
    let text_idx = after.constant(text);
    after.op_sized(OpCode::GetGlobal, len_idx);
    after.op_sized(OpCode::Constant, text_idx);
    after.op_sized(OpCode::Call, 1);
    after.op(OpCode::Return);
    assert_eq!(h.run_ok(after), Value::int(-1));
}
