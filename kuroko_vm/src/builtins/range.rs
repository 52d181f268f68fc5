//! The `range` type and its iterator.

use super::{iterator_advance, string::iterator_identity};
use crate::vm::{TargetTable, Vm};
use kuroko_core::Value;

pub fn install(vm: &mut Vm) {
    let class = vm.base_classes.range;
    vm.define_native(TargetTable::Methods(class), ".__init__", range_init);
    vm.define_native(TargetTable::Methods(class), ".__repr__", range_repr);
    vm.define_native(TargetTable::Methods(class), ".__iter__", range_iter);

    let iterator = vm.base_classes.range_iterator;
    vm.define_native(TargetTable::Methods(iterator), ".__call__", range_iterator_call);
    vm.define_native(TargetTable::Methods(iterator), ".__iter__", iterator_identity);
}

fn range_bounds(vm: &Vm, range: Value) -> Option<(i64, i64)> {
    let obj = range.as_object()?;
    let fields = vm.heap.fields(obj)?;
    let min = fields
        .get(&vm.heap, vm.heap.lookup_intern("min")?)
        .and_then(Value::as_int)?;
    let max = fields
        .get(&vm.heap, vm.heap.lookup_intern("max")?)
        .and_then(Value::as_int)?;
    Some((min, max))
}

/// `range(end)` or `range(start, end)`.
fn range_init(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    let this = args[0];
    let (min, max) = match (args.get(1).and_then(|v| v.as_int()), args.get(2)) {
        (Some(end), None) => (0, end),
        (Some(start), Some(end)) => match end.as_int() {
            Some(end) => (start, end),
            None => {
                return vm.runtime_error(vm.exceptions.type_error, "range() arguments must be integers")
            }
        },
        _ => {
            return vm.runtime_error(
                vm.exceptions.argument_error,
                "range expected at least 1 argument, got 0",
            )
        }
    };
    let obj = this.as_object().expect("range instance");
    vm.push(this);
    vm.attach_named_value(TargetTable::Fields(obj), "min", Value::int(min));
    vm.attach_named_value(TargetTable::Fields(obj), "max", Value::int(max));
    vm.pop();
    this
}

fn range_repr(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    match range_bounds(vm, args[0]) {
        Some((min, max)) => vm.intern(&format!("range({}, {})", min, max)),
        None => vm.intern("range(?)"),
    }
}

fn range_iter(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    let Some((min, max)) = range_bounds(vm, args[0]) else {
        return vm.runtime_error(vm.exceptions.value_error, "corrupt range");
    };
    let class = vm.base_classes.range_iterator;
    let iterator = vm.make_instance(class);
    vm.push(Value::object(iterator));
    vm.attach_named_value(TargetTable::Fields(iterator), "i", Value::int(min));
    vm.attach_named_value(TargetTable::Fields(iterator), "end", Value::int(max));
    vm.pop();
    Value::object(iterator)
}

fn range_iterator_call(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    let this = args[0];
    let state = (|| {
        let obj = this.as_object()?;
        let fields = vm.heap.fields(obj)?;
        let i = fields
            .get(&vm.heap, vm.heap.lookup_intern("i")?)
            .and_then(Value::as_int)?;
        let end = fields
            .get(&vm.heap, vm.heap.lookup_intern("end")?)
            .and_then(Value::as_int)?;
        Some((i, end))
    })();
    let Some((i, end)) = state else {
        return this;
    };
    if i >= end {
        return this;
    }
    iterator_advance(vm, this, i + 1);
    Value::int(i)
}
