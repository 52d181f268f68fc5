//! Native methods of `list` and its iterator.

use super::{
    in_repr, is_slice, iterator_advance, iterator_state, make_iterator, set_in_repr, slice_bounds,
    string::iterator_identity,
};
use crate::values::normalize_index;
use crate::vm::{TargetTable, Vm};
use kuroko_core::{ObjRef, Value};

pub fn install(vm: &mut Vm) {
    let class = vm.base_classes.list;
    vm.define_native(TargetTable::Methods(class), ".__init__", list_init);
    vm.define_native(TargetTable::Methods(class), ".append", list_append);
    vm.define_native(TargetTable::Methods(class), ".pop", list_pop);
    vm.define_native(TargetTable::Methods(class), ".insert", list_insert);
    vm.define_native(TargetTable::Methods(class), ".extend", list_extend);
    vm.define_native(TargetTable::Methods(class), ".__getitem__", list_getitem);
    vm.define_native(TargetTable::Methods(class), ".__setitem__", list_setitem);
    vm.define_native(TargetTable::Methods(class), ".__delitem__", list_delitem);
    vm.define_native(TargetTable::Methods(class), ".__len__", list_len);
    vm.define_native(TargetTable::Methods(class), ".__contains__", list_contains);
    vm.define_native(TargetTable::Methods(class), ".__mul__", list_mul);
    vm.define_native(TargetTable::Methods(class), ".__eq__", list_eq);
    vm.define_native(TargetTable::Methods(class), ".__repr__", list_repr);
    vm.define_native(TargetTable::Methods(class), ".__iter__", list_iter);

    let iterator = vm.base_classes.list_iterator;
    vm.define_native(TargetTable::Methods(iterator), ".__call__", list_iterator_call);
    vm.define_native(TargetTable::Methods(iterator), ".__iter__", iterator_identity);
}

fn list_target(vm: &Vm, value: Value) -> Option<ObjRef> {
    value.as_object().filter(|&o| vm.heap.list_values(o).is_some())
}

fn list_init(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    let this = args[0];
    let Some(target) = list_target(vm, this) else {
        return this;
    };
    if let Some(&source) = args.get(1) {
        let values = match source.as_object() {
            Some(obj) if vm.heap.list_values(obj).is_some() => {
                Some(vm.heap.list_values(obj).expect("list body").clone())
            }
            Some(obj) if vm.heap.tuple_values(obj).is_some() => {
                Some(vm.heap.tuple_values(obj).expect("tuple body").to_vec())
            }
            _ => None,
        };
        let values = match values {
            Some(values) => Some(values),
            None => {
                vm.heap.pause_gc();
                let collected = vm.iterate_collect(source);
                vm.heap.resume_gc();
                if collected.is_none() && !vm.has_exception() {
                    vm.runtime_error(
                        vm.exceptions.type_error,
                        format!("'{}' object is not iterable", vm.type_name(source)),
                    );
                }
                collected
            }
        };
        match values {
            Some(values) => {
                vm.heap
                    .list_values_mut(target)
                    .expect("list body")
                    .extend(values);
            }
            None => return Value::None,
        }
    }
    this
}

fn list_append(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    if let (Some(target), Some(&value)) = (list_target(vm, args[0]), args.get(1)) {
        vm.heap.list_values_mut(target).expect("list body").push(value);
    }
    Value::None
}

fn list_pop(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    let Some(target) = list_target(vm, args[0]) else {
        return Value::None;
    };
    let len = vm.heap.list_values(target).expect("list body").len();
    let index = match args.get(1) {
        Some(v) => match v.as_int() {
            Some(i) => i,
            None => {
                return vm.runtime_error(vm.exceptions.type_error, "pop index must be an integer")
            }
        },
        None => len as i64 - 1,
    };
    match normalize_index(index, len) {
        Some(at) => vm.heap.list_values_mut(target).expect("list body").remove(at),
        None => vm.runtime_error(vm.exceptions.index_error, "pop from empty list or out of range"),
    }
}

fn list_insert(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    let Some(target) = list_target(vm, args[0]) else {
        return Value::None;
    };
    let (Some(index), Some(&value)) = (args.get(1).and_then(|v| v.as_int()), args.get(2)) else {
        return vm.runtime_error(vm.exceptions.argument_error, "insert() takes an index and a value");
    };
    let values = vm.heap.list_values_mut(target).expect("list body");
    let len = values.len() as i64;
    let at = index.clamp(0, len) as usize;
    values.insert(at, value);
    Value::None
}

fn list_extend(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    let this = args[0];
    match args.get(1) {
        Some(&source) => {
            // Reuses the initializer's fill path.
            list_init(vm, &[this, source], false);
            Value::None
        }
        None => vm.runtime_error(vm.exceptions.argument_error, "extend() takes an iterable"),
    }
}

fn list_getitem(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    let Some(target) = list_target(vm, args[0]) else {
        return Value::None;
    };
    let key = match args.get(1) {
        Some(&key) => key,
        None => return vm.runtime_error(vm.exceptions.argument_error, "expected an index"),
    };
    if is_slice(vm, key) {
        let values = vm.heap.list_values(target).expect("list body").clone();
        let Some((lo, hi)) = slice_bounds(vm, key, values.len()) else {
            return vm.runtime_error(vm.exceptions.value_error, "invalid slice");
        };
        return vm.make_list(values[lo..hi].to_vec());
    }
    let Some(index) = key.as_int() else {
        return vm.runtime_error(
            vm.exceptions.type_error,
            format!("list indices must be integers, not '{}'", vm.type_name(key)),
        );
    };
    let values = vm.heap.list_values(target).expect("list body");
    match normalize_index(index, values.len()) {
        Some(at) => values[at],
        None => vm.runtime_error(vm.exceptions.index_error, "list index out of range"),
    }
}

fn list_setitem(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    let Some(target) = list_target(vm, args[0]) else {
        return Value::None;
    };
    let (Some(index), Some(&value)) = (args.get(1).and_then(|v| v.as_int()), args.get(2)) else {
        return vm.runtime_error(vm.exceptions.type_error, "list indices must be integers");
    };
    let values = vm.heap.list_values_mut(target).expect("list body");
    let len = values.len();
    match normalize_index(index, len) {
        Some(at) => {
            values[at] = value;
            value
        }
        None => vm.runtime_error(vm.exceptions.index_error, "list index out of range"),
    }
}

fn list_delitem(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    let Some(target) = list_target(vm, args[0]) else {
        return Value::None;
    };
    let Some(index) = args.get(1).and_then(|v| v.as_int()) else {
        return vm.runtime_error(vm.exceptions.type_error, "list indices must be integers");
    };
    let values = vm.heap.list_values_mut(target).expect("list body");
    let len = values.len();
    match normalize_index(index, len) {
        Some(at) => {
            values.remove(at);
            Value::None
        }
        None => vm.runtime_error(vm.exceptions.index_error, "list index out of range"),
    }
}

fn list_len(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    let len = list_target(vm, args[0])
        .map(|t| vm.heap.list_values(t).expect("list body").len())
        .unwrap_or(0);
    Value::int(len as i64)
}

fn list_contains(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    let Some(target) = list_target(vm, args[0]) else {
        return Value::Bool(false);
    };
    let Some(&needle) = args.get(1) else {
        return Value::Bool(false);
    };
    let values = vm.heap.list_values(target).expect("list body").clone();
    for value in values {
        if vm.values_equal(value, needle) {
            return Value::Bool(true);
        }
    }
    Value::Bool(false)
}

fn list_mul(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    let Some(count) = args.get(1).and_then(|v| v.coerce_int()) else {
        return Value::NotImplemented;
    };
    let Some(target) = list_target(vm, args[0]) else {
        return Value::NotImplemented;
    };
    let values = vm.heap.list_values(target).expect("list body").clone();
    let mut out = Vec::with_capacity(values.len() * count.max(0) as usize);
    for _ in 0..count.max(0) {
        out.extend_from_slice(&values);
    }
    vm.make_list(out)
}

fn list_eq(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    let Some(&other) = args.get(1) else {
        return Value::Bool(false);
    };
    let (Some(a), Some(b)) = (list_target(vm, args[0]), list_target(vm, other)) else {
        return Value::NotImplemented;
    };
    let left = vm.heap.list_values(a).expect("list body").clone();
    let right = vm.heap.list_values(b).expect("list body").clone();
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

fn list_repr(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    let Some(target) = list_target(vm, args[0]) else {
        return Value::None;
    };
    if in_repr(vm, target) {
        return vm.intern("[...]");
    }
    set_in_repr(vm, target, true);
    let values = vm.heap.list_values(target).expect("list body").clone();
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
    vm.intern(&format!("[{}]", pieces.join(", ")))
}

fn list_iter(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    let class = vm.base_classes.list_iterator;
    make_iterator(vm, class, args[0])
}

fn list_iterator_call(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    let this = args[0];
    let Some((subject, cursor)) = iterator_state(vm, this) else {
        return this;
    };
    let item = subject
        .as_object()
        .and_then(|o| vm.heap.list_values(o))
        .and_then(|values| values.get(cursor as usize).copied());
    match item {
        Some(item) => {
            iterator_advance(vm, this, cursor + 1);
            item
        }
        None => this,
    }
}
