//! Native methods of `str` (and the small `bytes` contract).
//!
//! Strings are interned and immutable; every operation producing a string
//! goes back through the intern set, which keeps equality as handle
//! identity. Indexing and length are by Unicode codepoint; the raw bytes
//! are interpreted as UTF-8 with no locale decoding.

use super::{iterator_advance, iterator_state, is_slice, make_iterator, slice_bounds};
use crate::values::normalize_index;
use crate::vm::{TargetTable, Vm};
use kuroko_core::Value;
use kuroko_runtime::ObjBody;

pub fn install(vm: &mut Vm) {
    let class = vm.base_classes.str_;
    vm.define_native(TargetTable::Methods(class), ".__init__", str_init);
    vm.define_native(TargetTable::Methods(class), ".__add__", str_add);
    vm.define_native(TargetTable::Methods(class), ".__mul__", str_mul);
    vm.define_native(TargetTable::Methods(class), ".__len__", str_len);
    vm.define_native(TargetTable::Methods(class), ".__contains__", str_contains);
    vm.define_native(TargetTable::Methods(class), ".__getitem__", str_getitem);
    vm.define_native(TargetTable::Methods(class), ".__lt__", str_lt);
    vm.define_native(TargetTable::Methods(class), ".__gt__", str_gt);
    vm.define_native(TargetTable::Methods(class), ".__repr__", str_repr);
    vm.define_native(TargetTable::Methods(class), ".__str__", str_str);
    vm.define_native(TargetTable::Methods(class), ".__iter__", str_iter);

    let iterator = vm.base_classes.str_iterator;
    vm.define_native(TargetTable::Methods(iterator), ".__call__", str_iterator_call);
    vm.define_native(TargetTable::Methods(iterator), ".__iter__", iterator_identity);

    let bytes = vm.base_classes.bytes;
    vm.define_native(TargetTable::Methods(bytes), ".__len__", bytes_len);
    vm.define_native(TargetTable::Methods(bytes), ".__getitem__", bytes_getitem);
    vm.define_native(TargetTable::Methods(bytes), ".__eq__", bytes_eq);
    vm.define_native(TargetTable::Methods(bytes), ".__repr__", bytes_repr);
}

pub(crate) fn iterator_identity(_vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    args[0]
}

// =============================================================================
// str
// =============================================================================

fn str_init(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    match args.get(1) {
        None => vm.intern(""),
        Some(&value) => vm.value_str(value),
    }
}

fn str_add(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    let (Some(a), Some(b)) = (vm.heap.as_str(args[0]), args.get(1).and_then(|&b| vm.heap.as_str(b)))
    else {
        let kind = args.get(1).map(|&b| vm.type_name(b)).unwrap_or_default();
        return vm.runtime_error(
            vm.exceptions.type_error,
            format!("can only concatenate str (not '{}') to str", kind),
        );
    };
    let joined = format!("{}{}", a, b);
    vm.intern(&joined)
}

fn str_mul(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    let Some(count) = args.get(1).and_then(|v| v.coerce_int()) else {
        return Value::NotImplemented;
    };
    let Some(text) = vm.heap.as_str(args[0]) else {
        return Value::NotImplemented;
    };
    let repeated = text.repeat(count.max(0) as usize);
    vm.intern(&repeated)
}

fn str_len(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    let count = vm.heap.as_str(args[0]).map_or(0, |s| s.chars().count());
    Value::int(count as i64)
}

fn str_contains(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    let (Some(haystack), Some(needle)) = (
        vm.heap.as_str(args[0]),
        args.get(1).and_then(|&n| vm.heap.as_str(n)),
    ) else {
        return Value::Bool(false);
    };
    Value::Bool(haystack.contains(needle))
}

fn str_getitem(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    let key = match args.get(1) {
        Some(&key) => key,
        None => return vm.runtime_error(vm.exceptions.argument_error, "expected an index"),
    };
    let text = match vm.heap.as_str(args[0]) {
        Some(text) => text.to_string(),
        None => return Value::None,
    };
    if is_slice(vm, key) {
        let len = text.chars().count();
        let Some((lo, hi)) = slice_bounds(vm, key, len) else {
            return vm.runtime_error(vm.exceptions.value_error, "invalid slice");
        };
        let piece: String = text.chars().skip(lo).take(hi - lo).collect();
        return vm.intern(&piece);
    }
    let Some(index) = key.as_int() else {
        return vm.runtime_error(
            vm.exceptions.type_error,
            format!("string indices must be integers, not '{}'", vm.type_name(key)),
        );
    };
    let len = text.chars().count();
    match normalize_index(index, len) {
        Some(at) => {
            let piece: String = text.chars().skip(at).take(1).collect();
            vm.intern(&piece)
        }
        None => vm.runtime_error(vm.exceptions.index_error, "string index out of range"),
    }
}

fn str_lt(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    match (vm.heap.as_str(args[0]), args.get(1).and_then(|&b| vm.heap.as_str(b))) {
        (Some(a), Some(b)) => Value::Bool(a < b),
        _ => Value::NotImplemented,
    }
}

fn str_gt(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    match (vm.heap.as_str(args[0]), args.get(1).and_then(|&b| vm.heap.as_str(b))) {
        (Some(a), Some(b)) => Value::Bool(a > b),
        _ => Value::NotImplemented,
    }
}

fn str_repr(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    let Some(text) = vm.heap.as_str(args[0]).map(str::to_string) else {
        return Value::None;
    };
    let mut out = String::with_capacity(text.len() + 2);
    out.push('\'');
    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('\'');
    vm.intern(&out)
}

fn str_str(_vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    args[0]
}

fn str_iter(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    let class = vm.base_classes.str_iterator;
    make_iterator(vm, class, args[0])
}

fn str_iterator_call(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    let this = args[0];
    let Some((subject, cursor)) = iterator_state(vm, this) else {
        return this;
    };
    let Some(text) = vm.heap.as_str(subject).map(str::to_string) else {
        return this;
    };
    match text.chars().nth(cursor as usize) {
        Some(ch) => {
            iterator_advance(vm, this, cursor + 1);
            vm.intern(&ch.to_string())
        }
        None => this,
    }
}

// =============================================================================
// bytes
// =============================================================================

fn bytes_len(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    let len = match args[0].as_object().map(|o| vm.heap.body(o)) {
        Some(ObjBody::Bytes(b)) => b.bytes.len(),
        _ => 0,
    };
    Value::int(len as i64)
}

fn bytes_getitem(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    let bytes = match args[0].as_object().map(|o| vm.heap.body(o)) {
        Some(ObjBody::Bytes(b)) => b.bytes.clone(),
        _ => return Value::None,
    };
    let Some(index) = args.get(1).and_then(|v| v.as_int()) else {
        return vm.runtime_error(vm.exceptions.type_error, "byte indices must be integers");
    };
    match normalize_index(index, bytes.len()) {
        Some(at) => Value::int(i64::from(bytes[at])),
        None => vm.runtime_error(vm.exceptions.index_error, "bytes index out of range"),
    }
}

fn bytes_eq(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    match args.get(1) {
        Some(&other) => Value::Bool(vm.heap.values_structural_eq(args[0], other)),
        None => Value::Bool(false),
    }
}

fn bytes_repr(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    let bytes = match args[0].as_object().map(|o| vm.heap.body(o)) {
        Some(ObjBody::Bytes(b)) => b.bytes.clone(),
        _ => return Value::None,
    };
    let mut out = String::from("b'");
    for &byte in bytes.iter() {
        match byte {
            b'\\' => out.push_str("\\\\"),
            b'\'' => out.push_str("\\'"),
            b'\n' => out.push_str("\\n"),
            b' '..=b'~' => out.push(byte as char),
            other => out.push_str(&format!("\\x{:02x}", other)),
        }
    }
    out.push('\'');
    vm.intern(&out)
}
