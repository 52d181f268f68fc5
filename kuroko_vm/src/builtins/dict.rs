//! Native methods of `dict` and its view iterators.
//!
//! The views (`keys`, `values`, `items`) are iterator instances walking
//! the underlying table in slot order; their cursor tracks the slot index
//! so a step is O(capacity) in the worst case but the full walk stays
//! linear.

use super::{in_repr, iterator_advance, iterator_state, make_iterator, set_in_repr, string::iterator_identity};
use crate::vm::{TargetTable, Vm};
use kuroko_core::{ObjRef, Value};
use kuroko_runtime::Heap;

pub fn install(vm: &mut Vm) {
    let class = vm.base_classes.dict;
    vm.define_native(TargetTable::Methods(class), ".__init__", dict_init);
    vm.define_native(TargetTable::Methods(class), ".__getitem__", dict_getitem);
    vm.define_native(TargetTable::Methods(class), ".__setitem__", dict_setitem);
    vm.define_native(TargetTable::Methods(class), ".__delitem__", dict_delitem);
    vm.define_native(TargetTable::Methods(class), ".__len__", dict_len);
    vm.define_native(TargetTable::Methods(class), ".__contains__", dict_contains);
    vm.define_native(TargetTable::Methods(class), ".__eq__", dict_eq);
    vm.define_native(TargetTable::Methods(class), ".__repr__", dict_repr);
    vm.define_native(TargetTable::Methods(class), ".__iter__", dict_iter);
    vm.define_native(TargetTable::Methods(class), ".get", dict_get);
    vm.define_native(TargetTable::Methods(class), ".keys", dict_keys);
    vm.define_native(TargetTable::Methods(class), ".values", dict_values);
    vm.define_native(TargetTable::Methods(class), ".items", dict_items);

    for (view, call) in [
        (vm.base_classes.dict_keys, dict_keys_call as crate::vm::NativeFn),
        (vm.base_classes.dict_values, dict_values_call as crate::vm::NativeFn),
        (vm.base_classes.dict_items, dict_items_call as crate::vm::NativeFn),
    ] {
        vm.define_native(TargetTable::Methods(view), ".__call__", call);
        vm.define_native(TargetTable::Methods(view), ".__iter__", iterator_identity);
    }
}

fn dict_target(vm: &Vm, value: Value) -> Option<ObjRef> {
    value.as_object().filter(|&o| vm.heap.dict_table(o).is_some())
}

fn dict_init(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    let this = args[0];
    let Some(target) = dict_target(vm, this) else {
        return this;
    };
    if let Some(&source) = args.get(1) {
        // Accept another dict, or any iterable of (key, value) pairs.
        if let Some(other) = dict_target(vm, source) {
            let entries: Vec<(Value, Value)> =
                vm.heap.dict_table(other).expect("dict body").iter().collect();
            for (key, value) in entries {
                vm.heap.with_table_mut(target, Heap::sel_dict, |t, heap| {
                    t.set(heap, key, value);
                });
            }
        } else {
            vm.heap.pause_gc();
            let pairs = vm.iterate_collect(source);
            vm.heap.resume_gc();
            let Some(pairs) = pairs else {
                if !vm.has_exception() {
                    vm.runtime_error(
                        vm.exceptions.type_error,
                        format!("'{}' object is not iterable", vm.type_name(source)),
                    );
                }
                return Value::None;
            };
            for pair in pairs {
                let parts = pair
                    .as_object()
                    .and_then(|o| vm.heap.tuple_values(o))
                    .filter(|p| p.len() == 2)
                    .map(|p| (p[0], p[1]));
                let Some((key, value)) = parts else {
                    return vm.runtime_error(
                        vm.exceptions.value_error,
                        "dict update sequence elements must be pairs",
                    );
                };
                vm.heap.with_table_mut(target, Heap::sel_dict, |t, heap| {
                    t.set(heap, key, value);
                });
            }
        }
    }
    this
}

fn dict_getitem(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    let Some(target) = dict_target(vm, args[0]) else {
        return Value::None;
    };
    let Some(&key) = args.get(1) else {
        return vm.runtime_error(vm.exceptions.argument_error, "expected a key");
    };
    match vm.heap.dict_table(target).expect("dict body").get(&vm.heap, key) {
        Some(value) => value,
        None => {
            let rendered = vm.value_repr(key);
            let text = vm.heap.as_str(rendered).unwrap_or("?").to_string();
            vm.runtime_error(vm.exceptions.key_error, text)
        }
    }
}

fn dict_setitem(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    let Some(target) = dict_target(vm, args[0]) else {
        return Value::None;
    };
    let (Some(&key), Some(&value)) = (args.get(1), args.get(2)) else {
        return vm.runtime_error(vm.exceptions.argument_error, "expected a key and a value");
    };
    vm.heap.with_table_mut(target, Heap::sel_dict, |t, heap| {
        t.set(heap, key, value);
    });
    value
}

fn dict_delitem(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    let Some(target) = dict_target(vm, args[0]) else {
        return Value::None;
    };
    let Some(&key) = args.get(1) else {
        return vm.runtime_error(vm.exceptions.argument_error, "expected a key");
    };
    let deleted = vm
        .heap
        .with_table_mut(target, Heap::sel_dict, |t, heap| t.delete(heap, key));
    if deleted {
        Value::None
    } else {
        let rendered = vm.value_repr(key);
        let text = vm.heap.as_str(rendered).unwrap_or("?").to_string();
        vm.runtime_error(vm.exceptions.key_error, text)
    }
}

fn dict_len(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    let len = dict_target(vm, args[0])
        .map(|t| vm.heap.dict_table(t).expect("dict body").len())
        .unwrap_or(0);
    Value::int(len as i64)
}

fn dict_contains(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    let Some(target) = dict_target(vm, args[0]) else {
        return Value::Bool(false);
    };
    let Some(&key) = args.get(1) else {
        return Value::Bool(false);
    };
    let found = vm
        .heap
        .dict_table(target)
        .expect("dict body")
        .get(&vm.heap, key)
        .is_some();
    Value::Bool(found)
}

fn dict_get(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    let Some(target) = dict_target(vm, args[0]) else {
        return Value::None;
    };
    let Some(&key) = args.get(1) else {
        return vm.runtime_error(vm.exceptions.argument_error, "expected a key");
    };
    let default = args.get(2).copied().unwrap_or(Value::None);
    vm.heap
        .dict_table(target)
        .expect("dict body")
        .get(&vm.heap, key)
        .unwrap_or(default)
}

fn dict_eq(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    let Some(&other) = args.get(1) else {
        return Value::Bool(false);
    };
    let (Some(a), Some(b)) = (dict_target(vm, args[0]), dict_target(vm, other)) else {
        return Value::NotImplemented;
    };
    let left: Vec<(Value, Value)> = vm.heap.dict_table(a).expect("dict body").iter().collect();
    let b_len = vm.heap.dict_table(b).expect("dict body").len();
    if left.len() != b_len {
        return Value::Bool(false);
    }
    for (key, value) in left {
        let found = vm.heap.dict_table(b).expect("dict body").get(&vm.heap, key);
        match found {
            Some(other_value) if vm.values_equal(value, other_value) => {}
            _ => return Value::Bool(false),
        }
    }
    Value::Bool(true)
}

fn dict_repr(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    let Some(target) = dict_target(vm, args[0]) else {
        return Value::None;
    };
    if in_repr(vm, target) {
        return vm.intern("{...}");
    }
    set_in_repr(vm, target, true);
    let entries: Vec<(Value, Value)> =
        vm.heap.dict_table(target).expect("dict body").iter().collect();
    let mut pieces = Vec::with_capacity(entries.len());
    for (key, value) in entries {
        let key_rendered = vm.value_repr(key);
        let value_rendered = vm.value_repr(value);
        if vm.has_exception() {
            set_in_repr(vm, target, false);
            return Value::None;
        }
        pieces.push(format!(
            "{}: {}",
            vm.heap.as_str(key_rendered).unwrap_or("?"),
            vm.heap.as_str(value_rendered).unwrap_or("?")
        ));
    }
    set_in_repr(vm, target, false);
    vm.intern(&format!("{{{}}}", pieces.join(", ")))
}

fn dict_iter(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    dict_keys(vm, args, false)
}

fn dict_keys(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    let class = vm.base_classes.dict_keys;
    make_iterator(vm, class, args[0])
}

fn dict_values(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    let class = vm.base_classes.dict_values;
    make_iterator(vm, class, args[0])
}

fn dict_items(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    let class = vm.base_classes.dict_items;
    make_iterator(vm, class, args[0])
}

/// Find the next live entry at or after table slot `from`.
fn nth_live_entry(vm: &Vm, dict: Value, from: usize) -> Option<(usize, Value, Value)> {
    let table = dict.as_object().and_then(|o| vm.heap.dict_table(o))?;
    let mut slot = from;
    while slot < table.capacity() {
        if let Some((key, value)) = table.entry_at(slot) {
            return Some((slot, key, value));
        }
        slot += 1;
    }
    None
}

fn dict_keys_call(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    let this = args[0];
    let Some((subject, cursor)) = iterator_state(vm, this) else {
        return this;
    };
    match nth_live_entry(vm, subject, cursor as usize) {
        Some((slot, key, _)) => {
            iterator_advance(vm, this, (slot + 1) as i64);
            key
        }
        None => this,
    }
}

fn dict_values_call(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    let this = args[0];
    let Some((subject, cursor)) = iterator_state(vm, this) else {
        return this;
    };
    match nth_live_entry(vm, subject, cursor as usize) {
        Some((slot, _, value)) => {
            iterator_advance(vm, this, (slot + 1) as i64);
            value
        }
        None => this,
    }
}

fn dict_items_call(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    let this = args[0];
    let Some((subject, cursor)) = iterator_state(vm, this) else {
        return this;
    };
    match nth_live_entry(vm, subject, cursor as usize) {
        Some((slot, key, value)) => {
            iterator_advance(vm, this, (slot + 1) as i64);
            vm.make_tuple(Box::from([key, value]))
        }
        None => this,
    }
}
