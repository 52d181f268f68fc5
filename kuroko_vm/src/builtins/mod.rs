//! The built-in library: classes for the primitive and collection types,
//! their native methods, and the global functions of the `__builtins__`
//! namespace.
//!
//! Native initializers follow the native convention: whatever `__init__`
//! returns replaces the freshly allocated instance, which is how the
//! conversion types (`int(x)`, `str(x)`, `type(x)`) produce primitives
//! instead of wrapper instances. Managed initializers do not get that
//! power; instantiation of managed classes always leaves the instance.

pub mod dict;
pub mod list;
pub mod range;
pub mod string;
pub mod tuple;

use crate::vm::{TargetTable, Vm};
use kuroko_core::{ObjRef, Value};
use kuroko_runtime::{Heap, ObjBody, ObjFlags};

/// Wire up every built-in class and global function. Called once from
/// `Vm::new`.
pub fn install(vm: &mut Vm) {
    install_object(vm);
    install_type(vm);
    install_numbers(vm);
    install_singletons(vm);
    install_functions(vm);
    install_exceptions(vm);
    string::install(vm);
    list::install(vm);
    dict::install(vm);
    tuple::install(vm);
    range::install(vm);
    install_generator(vm);
    install_globals(vm);
    attach_classes(vm);
    finalize_all(vm);
}

// =============================================================================
// Shared helpers
// =============================================================================

/// Set or clear the in-repr guard used to cut recursive container reprs.
pub(crate) fn set_in_repr(vm: &mut Vm, obj: ObjRef, on: bool) {
    vm.heap.set_flag(obj, ObjFlags::IN_REPR, on);
}

pub(crate) fn in_repr(vm: &Vm, obj: ObjRef) -> bool {
    vm.heap.flags(obj).contains(ObjFlags::IN_REPR)
}

/// Length of any built-in container or string value.
pub(crate) fn managed_len(vm: &Vm, value: Value) -> Option<usize> {
    let obj = value.as_object()?;
    if let Some(s) = vm.heap.as_str(value) {
        return Some(s.chars().count());
    }
    if let Some(values) = vm.heap.list_values(obj) {
        return Some(values.len());
    }
    if let Some(values) = vm.heap.tuple_values(obj) {
        return Some(values.len());
    }
    if let Some(table) = vm.heap.dict_table(obj) {
        return Some(table.len());
    }
    match vm.heap.body(obj) {
        ObjBody::Bytes(b) => Some(b.bytes.len()),
        _ => None,
    }
}

/// Read `start`/`stop` bounds out of a slice object against a sequence of
/// `len` elements, clamping and adjusting negatives.
pub(crate) fn slice_bounds(vm: &Vm, slice: Value, len: usize) -> Option<(usize, usize)> {
    let obj = slice.as_object()?;
    let fields = vm.heap.fields(obj)?;
    let start = fields.get(&vm.heap, vm.heap.lookup_intern("start")?);
    let stop = fields.get(&vm.heap, vm.heap.lookup_intern("stop")?);
    let clamp = |v: Option<Value>, default: i64| -> i64 {
        match v {
            Some(Value::Int(i)) => i,
            _ => default,
        }
    };
    let len_i = len as i64;
    let mut lo = clamp(start, 0);
    let mut hi = clamp(stop, len_i);
    if lo < 0 {
        lo += len_i;
    }
    if hi < 0 {
        hi += len_i;
    }
    let lo = lo.clamp(0, len_i) as usize;
    let hi = hi.clamp(0, len_i) as usize;
    Some((lo, hi.max(lo)))
}

/// Is `value` an instance of the `slice` class?
pub(crate) fn is_slice(vm: &Vm, value: Value) -> bool {
    vm.is_instance_of(value, vm.base_classes.slice)
        && value
            .as_object()
            .map_or(false, |o| vm.heap.instance(o).is_some())
}

/// Build an iterator instance of `class` carrying a subject and a cursor,
/// the shape every built-in iterator shares.
pub(crate) fn make_iterator(vm: &mut Vm, class: ObjRef, subject: Value) -> Value {
    let iterator = vm.make_instance(class);
    vm.push(Value::object(iterator));
    vm.attach_named_value(TargetTable::Fields(iterator), "s", subject);
    vm.attach_named_value(TargetTable::Fields(iterator), "i", Value::int(0));
    vm.pop();
    Value::object(iterator)
}

/// Read an iterator instance's subject and cursor.
pub(crate) fn iterator_state(vm: &Vm, iterator: Value) -> Option<(Value, i64)> {
    let obj = iterator.as_object()?;
    let fields = vm.heap.fields(obj)?;
    let subject = fields.get(&vm.heap, vm.heap.lookup_intern("s")?)?;
    let cursor = fields
        .get(&vm.heap, vm.heap.lookup_intern("i")?)
        .and_then(Value::as_int)?;
    Some((subject, cursor))
}

/// Advance an iterator instance's cursor.
pub(crate) fn iterator_advance(vm: &mut Vm, iterator: Value, cursor: i64) {
    let obj = iterator.as_object().expect("iterator instance");
    let name = vm.intern("i");
    vm.heap.with_table_mut(obj, Heap::sel_fields, |t, heap| {
        t.set(heap, name, Value::int(cursor));
    });
}

// =============================================================================
// object
// =============================================================================

fn object_repr(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    let name = vm.type_name(args[0]);
    vm.intern(&format!("<instance of {}>", name))
}

fn install_object(vm: &mut Vm) {
    let class = vm.base_classes.object_;
    vm.define_native(TargetTable::Methods(class), ".__repr__", object_repr);
}

// =============================================================================
// type
// =============================================================================

fn type_init(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    // type(x) returns x's class, replacing the scratch instance.
    if args.len() != 2 {
        return vm.runtime_error(vm.exceptions.argument_error, "type() takes exactly 1 argument");
    }
    Value::object(vm.get_type(args[1]))
}

fn type_repr(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    let name = args[0]
        .as_object()
        .and_then(|o| vm.heap.class(o))
        .map(|c| c.name)
        .unwrap_or(Value::None);
    let text = vm.heap.as_str(name).unwrap_or("?").to_string();
    vm.intern(&format!("<class '{}'>", text))
}

fn type_name_property(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    args[0]
        .as_object()
        .and_then(|o| vm.heap.class(o))
        .map(|c| c.name)
        .unwrap_or(Value::None)
}

fn type_base_property(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    args[0]
        .as_object()
        .and_then(|o| vm.heap.class(o))
        .and_then(|c| c.base)
        .map(Value::object)
        .unwrap_or(Value::None)
}

fn install_type(vm: &mut Vm) {
    let class = vm.base_classes.type_;
    vm.define_native(TargetTable::Methods(class), ".__init__", type_init);
    vm.define_native(TargetTable::Methods(class), ".__repr__", type_repr);
    vm.define_native(TargetTable::Methods(class), ":__name__", type_name_property);
    vm.define_native(TargetTable::Methods(class), ":__base__", type_base_property);
}

// =============================================================================
// int / float / bool
// =============================================================================

fn int_init(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    match args.get(1) {
        None => Value::int(0),
        Some(&Value::Int(i)) => Value::int(i),
        Some(&Value::Bool(b)) => Value::int(b as i64),
        Some(&Value::Float(f)) => Value::int(f as i64),
        Some(&other) => match vm.heap.as_str(other).map(str::trim) {
            Some(text) => match text.parse::<i64>() {
                Ok(i) => Value::int(i),
                Err(_) => vm.runtime_error(
                    vm.exceptions.value_error,
                    format!("invalid literal for int(): '{}'", text),
                ),
            },
            None => vm.runtime_error(
                vm.exceptions.type_error,
                format!("int() argument must be a string or a number, not '{}'",
                    vm.type_name(other)),
            ),
        },
    }
}

fn int_repr(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    let i = args[0].coerce_int().unwrap_or_default();
    vm.intern(&i.to_string())
}

fn float_init(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    match args.get(1) {
        None => Value::float(0.0),
        Some(&Value::Float(f)) => Value::float(f),
        Some(&Value::Int(i)) => Value::float(i as f64),
        Some(&Value::Bool(b)) => Value::float(b as i64 as f64),
        Some(&other) => match vm.heap.as_str(other).map(str::trim) {
            Some(text) => match text.parse::<f64>() {
                Ok(f) => Value::float(f),
                Err(_) => vm.runtime_error(
                    vm.exceptions.value_error,
                    format!("could not convert string to float: '{}'", text),
                ),
            },
            None => vm.runtime_error(
                vm.exceptions.type_error,
                format!("float() argument must be a string or a number, not '{}'",
                    vm.type_name(other)),
            ),
        },
    }
}

fn float_repr(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    let f = args[0].as_float().unwrap_or_default();
    if f == f.trunc() && f.is_finite() {
        vm.intern(&format!("{:.1}", f))
    } else {
        vm.intern(&format!("{}", f))
    }
}

fn bool_init(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    match args.get(1) {
        None => Value::Bool(false),
        Some(&value) => {
            let falsey = vm.is_falsey_full(value);
            Value::Bool(!falsey)
        }
    }
}

fn bool_repr(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    vm.intern(if args[0] == Value::Bool(true) {
        "True"
    } else {
        "False"
    })
}

fn install_numbers(vm: &mut Vm) {
    let int_class = vm.base_classes.int_;
    vm.define_native(TargetTable::Methods(int_class), ".__init__", int_init);
    vm.define_native(TargetTable::Methods(int_class), ".__repr__", int_repr);

    let float_class = vm.base_classes.float_;
    vm.define_native(TargetTable::Methods(float_class), ".__init__", float_init);
    vm.define_native(TargetTable::Methods(float_class), ".__repr__", float_repr);

    let bool_class = vm.base_classes.bool_;
    vm.define_native(TargetTable::Methods(bool_class), ".__init__", bool_init);
    vm.define_native(TargetTable::Methods(bool_class), ".__repr__", bool_repr);
}

// =============================================================================
// NoneType / NotImplementedType
// =============================================================================

fn none_repr(vm: &mut Vm, _args: &[Value], _has_kw: bool) -> Value {
    vm.intern("None")
}

fn not_impl_repr(vm: &mut Vm, _args: &[Value], _has_kw: bool) -> Value {
    vm.intern("NotImplemented")
}

fn install_singletons(vm: &mut Vm) {
    let none_class = vm.base_classes.none_type;
    vm.define_native(TargetTable::Methods(none_class), ".__repr__", none_repr);
    let not_impl = vm.base_classes.not_impl;
    vm.define_native(TargetTable::Methods(not_impl), ".__repr__", not_impl_repr);
}

// =============================================================================
// function / method / codeobject / module
// =============================================================================

fn function_name(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    let name = args[0]
        .as_object()
        .map(|o| match vm.heap.body(o) {
            ObjBody::Closure(c) => vm
                .heap
                .code(c.code)
                .map(|code| code.name.to_string())
                .unwrap_or_default(),
            ObjBody::Native(n) => n.name.to_string(),
            _ => String::new(),
        })
        .unwrap_or_default();
    vm.intern(&name)
}

fn function_doc(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    let doc = args[0].as_object().and_then(|o| match vm.heap.body(o) {
        ObjBody::Closure(c) => vm
            .heap
            .code(c.code)
            .and_then(|code| code.docstring.as_ref().map(|d| d.to_string())),
        _ => None,
    });
    match doc {
        Some(text) => vm.intern(&text),
        None => Value::None,
    }
}

fn function_repr(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    let name = function_name(vm, args, false);
    let text = vm.heap.as_str(name).unwrap_or("?").to_string();
    vm.intern(&format!("<function {}>", text))
}

fn method_repr(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    let method = args[0].as_object().map(|o| match vm.heap.body(o) {
        ObjBody::BoundMethod(b) => b.method,
        _ => Value::None,
    });
    let inner = method
        .map(|m| function_name(vm, &[m], false))
        .unwrap_or(Value::None);
    let text = vm.heap.as_str(inner).unwrap_or("?").to_string();
    vm.intern(&format!("<method {}>", text))
}

fn module_repr(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    let name = args[0]
        .as_object()
        .and_then(|o| vm.heap.module(o))
        .map(|m| m.name)
        .unwrap_or(Value::None);
    let text = vm.heap.as_str(name).unwrap_or("?").to_string();
    vm.intern(&format!("<module '{}'>", text))
}

fn codeobject_repr(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    let name = args[0]
        .as_object()
        .and_then(|o| vm.heap.code(o))
        .map(|c| c.qualname.to_string())
        .unwrap_or_default();
    vm.intern(&format!("<code object {}>", name))
}

fn install_functions(vm: &mut Vm) {
    let function = vm.base_classes.function;
    vm.define_native(TargetTable::Methods(function), ".__repr__", function_repr);
    vm.define_native(TargetTable::Methods(function), ":__name__", function_name);
    vm.define_native(TargetTable::Methods(function), ":__doc__", function_doc);

    let method = vm.base_classes.method;
    vm.define_native(TargetTable::Methods(method), ".__repr__", method_repr);

    let module = vm.base_classes.module;
    vm.define_native(TargetTable::Methods(module), ".__repr__", module_repr);

    let codeobject = vm.base_classes.codeobject;
    vm.define_native(TargetTable::Methods(codeobject), ".__repr__", codeobject_repr);
}

// =============================================================================
// Exceptions
// =============================================================================

fn exception_init(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    let this = args[0];
    if let (Some(obj), Some(&argument)) = (this.as_object(), args.get(1)) {
        let name = vm.names.arg;
        vm.heap.with_table_mut(obj, Heap::sel_fields, |t, heap| {
            t.set(heap, name, argument);
        });
    }
    this
}

fn exception_repr(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    let class_name = vm.type_name(args[0]);
    let argument = args[0]
        .as_object()
        .and_then(|o| vm.heap.fields(o))
        .and_then(|f| f.get(&vm.heap, vm.names.arg));
    match argument {
        Some(argument) => {
            let rendered = vm.value_repr(argument);
            let text = vm.heap.as_str(rendered).unwrap_or("?").to_string();
            vm.intern(&format!("{}({})", class_name, text))
        }
        None => vm.intern(&format!("{}()", class_name)),
    }
}

fn exception_str(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    let argument = args[0]
        .as_object()
        .and_then(|o| vm.heap.fields(o))
        .and_then(|f| f.get(&vm.heap, vm.names.arg));
    match argument {
        Some(argument) => vm.value_str(argument),
        None => vm.intern(""),
    }
}

fn install_exceptions(vm: &mut Vm) {
    let base = vm.exceptions.base_exception;
    vm.define_native(TargetTable::Methods(base), ".__init__", exception_init);
    vm.define_native(TargetTable::Methods(base), ".__repr__", exception_repr);
    vm.define_native(TargetTable::Methods(base), ".__str__", exception_str);
}

// =============================================================================
// Generators
// =============================================================================

fn generator_iter(_vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    // A generator is its own iterator.
    args[0]
}

fn install_generator(vm: &mut Vm) {
    let class = vm.base_classes.generator;
    vm.define_native(TargetTable::Methods(class), ".__iter__", generator_iter);
}

// =============================================================================
// Global functions
// =============================================================================

fn builtin_print(vm: &mut Vm, args: &[Value], has_kw: bool) -> Value {
    let (positional, kwargs) = if has_kw {
        (&args[..args.len() - 1], args.last().copied())
    } else {
        (args, None)
    };

    let lookup = |vm: &Vm, kwargs: Option<Value>, key: &str| -> Option<String> {
        let dict = kwargs?.as_object()?;
        let name = vm.heap.lookup_intern(key)?;
        let value = vm.heap.dict_table(dict)?.get(&vm.heap, name)?;
        Some(vm.heap.as_str(value)?.to_string())
    };
    let sep = lookup(vm, kwargs, "sep").unwrap_or_else(|| " ".to_string());
    let end = lookup(vm, kwargs, "end").unwrap_or_else(|| "\n".to_string());

    let mut pieces = Vec::with_capacity(positional.len());
    for &value in positional {
        let rendered = vm.value_str(value);
        if vm.has_exception() {
            return Value::None;
        }
        pieces.push(vm.heap.as_str(rendered).unwrap_or("?").to_string());
    }
    print!("{}{}", pieces.join(&sep), end);
    Value::None
}

fn builtin_len(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    if args.len() != 1 {
        return vm.runtime_error(vm.exceptions.argument_error, "len() takes exactly 1 argument");
    }
    if let Some(len) = managed_len(vm, args[0]) {
        return Value::int(len as i64);
    }
    if let Some(method) = vm.slot_of(args[0], |s| s.len) {
        return vm.call_simple(method, &[args[0]]);
    }
    vm.runtime_error(
        vm.exceptions.type_error,
        format!("object of type '{}' has no len()", vm.type_name(args[0])),
    )
}

fn builtin_repr(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    if args.len() != 1 {
        return vm.runtime_error(vm.exceptions.argument_error, "repr() takes exactly 1 argument");
    }
    vm.value_repr(args[0])
}

fn builtin_isinstance(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    if args.len() != 2 {
        return vm.runtime_error(
            vm.exceptions.argument_error,
            "isinstance() takes exactly 2 arguments",
        );
    }
    let Some(class) = args[1].as_object().filter(|&o| vm.heap.class(o).is_some()) else {
        return vm.runtime_error(
            vm.exceptions.type_error,
            "isinstance() arg 2 must be a class",
        );
    };
    Value::Bool(vm.is_instance_of(args[0], class))
}

fn builtin_list_of(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    vm.make_list(args.to_vec())
}

fn builtin_tuple_of(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    vm.make_tuple(args.to_vec().into())
}

fn builtin_dict_of(vm: &mut Vm, args: &[Value], _has_kw: bool) -> Value {
    if args.len() % 2 != 0 {
        return vm.runtime_error(
            vm.exceptions.argument_error,
            "dictOf() expects an even number of arguments",
        );
    }
    let dict = vm.make_dict();
    self_push_pairs(vm, dict, args);
    dict
}

fn self_push_pairs(vm: &mut Vm, dict: Value, args: &[Value]) {
    let obj = dict.as_object().expect("dict object");
    for pair in args.chunks_exact(2) {
        let (key, value) = (pair[0], pair[1]);
        vm.heap.with_table_mut(obj, Heap::sel_dict, |t, heap| {
            t.set(heap, key, value);
        });
    }
}

fn install_globals(vm: &mut Vm) {
    let builtins = vm.builtins;
    vm.define_native(TargetTable::Fields(builtins), "print", builtin_print);
    vm.define_native(TargetTable::Fields(builtins), "len", builtin_len);
    vm.define_native(TargetTable::Fields(builtins), "repr", builtin_repr);
    vm.define_native(TargetTable::Fields(builtins), "isinstance", builtin_isinstance);
    vm.define_native(TargetTable::Fields(builtins), "listOf", builtin_list_of);
    vm.define_native(TargetTable::Fields(builtins), "tupleOf", builtin_tuple_of);
    vm.define_native(TargetTable::Fields(builtins), "dictOf", builtin_dict_of);
}

// =============================================================================
// Registration and finalization
// =============================================================================

/// Attach the built-in classes and exception types to the `__builtins__`
/// namespace under their managed names.
fn attach_classes(vm: &mut Vm) {
    let pairs: Vec<(String, ObjRef)> = {
        let classes = [
            vm.base_classes.object_,
            vm.base_classes.type_,
            vm.base_classes.int_,
            vm.base_classes.float_,
            vm.base_classes.bool_,
            vm.base_classes.str_,
            vm.base_classes.bytes,
            vm.base_classes.tuple,
            vm.base_classes.list,
            vm.base_classes.dict,
            vm.base_classes.range,
            vm.base_classes.slice,
            vm.exceptions.base_exception,
            vm.exceptions.type_error,
            vm.exceptions.argument_error,
            vm.exceptions.index_error,
            vm.exceptions.key_error,
            vm.exceptions.attribute_error,
            vm.exceptions.name_error,
            vm.exceptions.import_error,
            vm.exceptions.io_error,
            vm.exceptions.value_error,
            vm.exceptions.keyboard_interrupt,
            vm.exceptions.zero_division_error,
            vm.exceptions.not_implemented_error,
            vm.exceptions.syntax_error,
            vm.exceptions.assertion_error,
            vm.exceptions.recursion_error,
        ];
        classes
            .into_iter()
            .map(|class| {
                let name = vm
                    .heap
                    .class(class)
                    .and_then(|c| vm.heap.as_str(c.name))
                    .unwrap_or("?")
                    .to_string();
                (name, class)
            })
            .collect()
    };
    let builtins = vm.builtins;
    for (name, class) in pairs {
        vm.attach_named_object(TargetTable::Fields(builtins), &name, class);
    }
}

/// Populate the dunder slot caches of every built-in class.
fn finalize_all(vm: &mut Vm) {
    let classes = [
        vm.base_classes.object_,
        vm.base_classes.type_,
        vm.base_classes.int_,
        vm.base_classes.float_,
        vm.base_classes.bool_,
        vm.base_classes.none_type,
        vm.base_classes.not_impl,
        vm.base_classes.str_,
        vm.base_classes.bytes,
        vm.base_classes.function,
        vm.base_classes.method,
        vm.base_classes.tuple,
        vm.base_classes.list,
        vm.base_classes.dict,
        vm.base_classes.module,
        vm.base_classes.codeobject,
        vm.base_classes.property_,
        vm.base_classes.generator,
        vm.base_classes.range,
        vm.base_classes.slice,
        vm.base_classes.list_iterator,
        vm.base_classes.range_iterator,
        vm.base_classes.str_iterator,
        vm.base_classes.tuple_iterator,
        vm.base_classes.dict_items,
        vm.base_classes.dict_keys,
        vm.base_classes.dict_values,
        vm.exceptions.base_exception,
        vm.exceptions.type_error,
        vm.exceptions.argument_error,
        vm.exceptions.index_error,
        vm.exceptions.key_error,
        vm.exceptions.attribute_error,
        vm.exceptions.name_error,
        vm.exceptions.import_error,
        vm.exceptions.io_error,
        vm.exceptions.value_error,
        vm.exceptions.keyboard_interrupt,
        vm.exceptions.zero_division_error,
        vm.exceptions.not_implemented_error,
        vm.exceptions.syntax_error,
        vm.exceptions.assertion_error,
        vm.exceptions.recursion_error,
    ];
    for class in classes {
        vm.finalize_class(class);
    }
}
