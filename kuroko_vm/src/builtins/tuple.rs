//! Native methods of `tuple` and its iterator.

use super::{in_repr, iterator_advance, iterator_state, make_iterator, set_in_repr, string::iterator_identity};
use crate::values::normalize_index;
use crate::vm::{TargetTable, Vm};
use kuroko_core::{ObjRef, Value};

pub fn install(vm: &mut Vm) {
    let class = vm.base_classes.tuple;
    vm.define_native(TargetTable::Methods(class), ".__init__", tuple_init);
    vm.define_native(TargetTable::Methods(class), ".__getitem__", tuple_getitem);
    vm.define_native(TargetTable::Methods(class), ".__len__", tuple_len);
    vm.define_native(TargetTable::Methods(class), ".__contains__", tuple_contains);
    vm.define_native(TargetTable::Methods(class), ".__eq__", tuple_eq);
    vm.define_native(TargetTable::Methods(class), ".__repr__", tuple_repr);
    vm.define_native(TargetTable::Methods(class), ".__iter__", tuple_iter);

    let iterator = vm.base_classes.tuple_iterator;
    vm.define_native(TargetTable::Methods(iterator), ".__call__", tuple_iterator_call);
    vm.define_native(TargetTable::Methods(iterator), ".__iter__", iterator_identity);
}

fn tuple_target(vm: &Vm, value: Value) -> Option<ObjRef> {
    value.as_object().filter(|&o| vm.heap.tuple_values(o).is_some())
}

fn tuple_init(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    // tuple(iterable) builds a primitive tuple, which replaces the scratch
    // instance per the native-initializer convention.
    match args.get(1) {
        None => vm.make_tuple(Box::from([])),
        Some(&source) => {
            if let Some(values) = source.as_object().and_then(|o| vm.heap.tuple_values(o)) {
                let values = values.to_vec();
                return vm.make_tuple(values.into());
            }
            if let Some(values) = source.as_object().and_then(|o| vm.heap.list_values(o)) {
                let values = values.clone();
                return vm.make_tuple(values.into());
            }
            vm.heap.pause_gc();
            let collected = vm.iterate_collect(source);
            vm.heap.resume_gc();
            match collected {
                Some(values) => vm.make_tuple(values.into()),
                None => {
                    if !vm.has_exception() {
                        vm.runtime_error(
                            vm.exceptions.type_error,
                            format!("'{}' object is not iterable", vm.type_name(source)),
                        );
                    }
                    Value::None
                }
            }
        }
    }
}

fn tuple_getitem(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    let Some(target) = tuple_target(vm, args[0]) else {
        return Value::None;
    };
    let Some(index) = args.get(1).and_then(|v| v.as_int()) else {
        return vm.runtime_error(vm.exceptions.type_error, "tuple indices must be integers");
    };
    let values = vm.heap.tuple_values(target).expect("tuple body");
    match normalize_index(index, values.len()) {
        Some(at) => values[at],
        None => vm.runtime_error(vm.exceptions.index_error, "tuple index out of range"),
    }
}

fn tuple_len(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    let len = tuple_target(vm, args[0])
        .map(|t| vm.heap.tuple_values(t).expect("tuple body").len())
        .unwrap_or(0);
    Value::int(len as i64)
}

fn tuple_contains(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    let Some(target) = tuple_target(vm, args[0]) else {
        return Value::Bool(false);
    };
    let Some(&needle) = args.get(1) else {
        return Value::Bool(false);
    };
    let values = vm.heap.tuple_values(target).expect("tuple body").to_vec();
    for value in values {
        if vm.values_equal(value, needle) {
            return Value::Bool(true);
        }
    }
    Value::Bool(false)
}

fn tuple_eq(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    let Some(&other) = args.get(1) else {
        return Value::Bool(false);
    };
    let (Some(a), Some(b)) = (tuple_target(vm, args[0]), tuple_target(vm, other)) else {
        return Value::NotImplemented;
    };
    let left = vm.heap.tuple_values(a).expect("tuple body").to_vec();
    let right = vm.heap.tuple_values(b).expect("tuple body").to_vec();
    if left.len() != right.len() {
        return Value::Bool(false);
    }
    for (x, y) in left.into_iter().zip(right) {
        if !vm.values_equal(x, y) {
            return Value::Bool(false);
        }
    }
    Value::Bool(true)
}

fn tuple_repr(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    let Some(target) = tuple_target(vm, args[0]) else {
        return Value::None;
    };
    if in_repr(vm, target) {
        return vm.intern("(...)");
    }
    set_in_repr(vm, target, true);
    let values = vm.heap.tuple_values(target).expect("tuple body").to_vec();
    let mut pieces = Vec::with_capacity(values.len());
    for value in values {
        let rendered = vm.value_repr(value);
        if vm.has_exception() {
            set_in_repr(vm, target, false);
            return Value::None;
        }
        pieces.push(vm.heap.as_str(rendered).unwrap_or("?").to_string());
    }
    set_in_repr(vm, target, false);
    let body = if pieces.len() == 1 {
        format!("({},)", pieces[0])
    } else {
        format!("({})", pieces.join(", "))
    };
    vm.intern(&body)
}

fn tuple_iter(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    let class = vm.base_classes.tuple_iterator;
    make_iterator(vm, class, args[0])
}

fn tuple_iterator_call(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    let this = args[0];
    let Some((subject, cursor)) = iterator_state(vm, this) else {
        return this;
    };
    let item = subject
        .as_object()
        .and_then(|o| vm.heap.tuple_values(o))
        .and_then(|values| values.get(cursor as usize).copied());
    match item {
        Some(item) => {
            iterator_advance(vm, this, cursor + 1);
            item
        }
        None => this,
    }
}
