//! The VM value: heap, threads, class tables, and the embedding surface.
//!
//! There are no hidden globals: everything the interpreter touches hangs
//! off an explicit [`Vm`], and per-thread state lives in
//! [`ThreadState`](crate::threads::ThreadState) values the `Vm` owns. The
//! string intern set and the module cache are shared across threads; each
//! thread has its own stack, frames, upvalue list, scratch, and exception.

use crate::threads::{ThreadFlags, ThreadState, DEFAULT_CALL_DEPTH};
use kuroko_core::{ObjRef, Value};
use kuroko_runtime::{
    ClassObj, Heap, NativeId, NativeObj, ObjBody, ObjFlags, PayloadKind, PropertyObj, Table,
};

/// Native function signature. `args` is a copy of the stack argument
/// window (the originals stay on the stack, rooted, for the duration of
/// the call); when `has_kw` is set the final argument is the keyword dict.
pub type NativeFn = fn(&mut Vm, &[Value], bool) -> Value;

bitflags::bitflags! {
    /// VM initialization flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct VmFlags: u8 {
        /// Collect on every allocation opportunity.
        const STRESS_GC = 1 << 0;
        /// Report each collection to stderr.
        const REPORT_GC_COLLECTS = 1 << 1;
        /// Dump stack and instructions while executing.
        const ENABLE_TRACING = 1 << 2;
    }
}

/// Which table of an object a definition lands in.
#[derive(Debug, Clone, Copy)]
pub enum TargetTable {
    /// An instance's or module's fields.
    Fields(ObjRef),
    /// A class's methods table.
    Methods(ObjRef),
}

// =============================================================================
// Built-in class and exception tables
// =============================================================================

/// Classes for the built-in object types, attached to the VM at init so
/// native code can type-check without lookups.
#[derive(Debug, Clone, Copy)]
pub struct BaseClasses {
    pub object_: ObjRef,
    pub type_: ObjRef,
    pub int_: ObjRef,
    pub float_: ObjRef,
    pub bool_: ObjRef,
    pub none_type: ObjRef,
    pub not_impl: ObjRef,
    pub str_: ObjRef,
    pub bytes: ObjRef,
    pub function: ObjRef,
    pub method: ObjRef,
    pub tuple: ObjRef,
    pub list: ObjRef,
    pub dict: ObjRef,
    pub module: ObjRef,
    pub codeobject: ObjRef,
    pub property_: ObjRef,
    pub generator: ObjRef,
    pub range: ObjRef,
    pub slice: ObjRef,
    pub list_iterator: ObjRef,
    pub range_iterator: ObjRef,
    pub str_iterator: ObjRef,
    pub tuple_iterator: ObjRef,
    pub dict_items: ObjRef,
    pub dict_keys: ObjRef,
    pub dict_values: ObjRef,
}

/// The core exception types, for use with
/// [`Vm::runtime_error`](crate::exceptions).
#[derive(Debug, Clone, Copy)]
pub struct Exceptions {
    pub base_exception: ObjRef,
    pub type_error: ObjRef,
    pub argument_error: ObjRef,
    pub index_error: ObjRef,
    pub key_error: ObjRef,
    pub attribute_error: ObjRef,
    pub name_error: ObjRef,
    pub import_error: ObjRef,
    pub io_error: ObjRef,
    pub value_error: ObjRef,
    pub keyboard_interrupt: ObjRef,
    pub zero_division_error: ObjRef,
    pub not_implemented_error: ObjRef,
    pub syntax_error: ObjRef,
    pub assertion_error: ObjRef,
    pub recursion_error: ObjRef,
}

/// Cached interned strings for special method and attribute names, so hot
/// paths never re-intern.
#[derive(Debug, Clone, Copy)]
pub struct SpecialNames {
    pub init: Value,
    pub repr: Value,
    pub str_: Value,
    pub getitem: Value,
    pub setitem: Value,
    pub delitem: Value,
    pub eq: Value,
    pub hash: Value,
    pub len: Value,
    pub contains: Value,
    pub iter: Value,
    pub call: Value,
    pub enter: Value,
    pub exit: Value,
    pub getattr: Value,
    pub setattr: Value,
    pub delattr: Value,
    pub add: Value,
    pub sub: Value,
    pub mul: Value,
    pub div: Value,
    pub mod_: Value,
    pub pow: Value,
    pub bitor: Value,
    pub bitxor: Value,
    pub bitand: Value,
    pub lshift: Value,
    pub rshift: Value,
    pub lt: Value,
    pub gt: Value,
    pub radd: Value,
    pub rsub: Value,
    pub rmul: Value,
    pub rdiv: Value,
    pub rmod: Value,
    pub rpow: Value,
    pub rbitor: Value,
    pub rbitxor: Value,
    pub rbitand: Value,
    pub rlshift: Value,
    pub rrshift: Value,
    pub name: Value,
    pub file: Value,
    pub doc: Value,
    pub builtins_: Value,
    pub arg: Value,
    pub traceback: Value,
}

impl SpecialNames {
    fn collect_into(&self, out: &mut Vec<Value>) {
        out.extend_from_slice(&[
            self.init,
            self.repr,
            self.str_,
            self.getitem,
            self.setitem,
            self.delitem,
            self.eq,
            self.hash,
            self.len,
            self.contains,
            self.iter,
            self.call,
            self.enter,
            self.exit,
            self.getattr,
            self.setattr,
            self.delattr,
            self.add,
            self.sub,
            self.mul,
            self.div,
            self.mod_,
            self.pow,
            self.bitor,
            self.bitxor,
            self.bitand,
            self.lshift,
            self.rshift,
            self.lt,
            self.gt,
            self.radd,
            self.rsub,
            self.rmul,
            self.rdiv,
            self.rmod,
            self.rpow,
            self.rbitor,
            self.rbitxor,
            self.rbitand,
            self.rlshift,
            self.rrshift,
            self.name,
            self.file,
            self.doc,
            self.builtins_,
            self.arg,
            self.traceback,
        ]);
    }
}

impl BaseClasses {
    fn collect_into(&self, out: &mut Vec<Value>) {
        let all = [
            self.object_,
            self.type_,
            self.int_,
            self.float_,
            self.bool_,
            self.none_type,
            self.not_impl,
            self.str_,
            self.bytes,
            self.function,
            self.method,
            self.tuple,
            self.list,
            self.dict,
            self.module,
            self.codeobject,
            self.property_,
            self.generator,
            self.range,
            self.slice,
            self.list_iterator,
            self.range_iterator,
            self.str_iterator,
            self.tuple_iterator,
            self.dict_items,
            self.dict_keys,
            self.dict_values,
        ];
        out.extend(all.into_iter().map(Value::object));
    }
}

impl Exceptions {
    fn collect_into(&self, out: &mut Vec<Value>) {
        let all = [
            self.base_exception,
            self.type_error,
            self.argument_error,
            self.index_error,
            self.key_error,
            self.attribute_error,
            self.name_error,
            self.import_error,
            self.io_error,
            self.value_error,
            self.keyboard_interrupt,
            self.zero_division_error,
            self.not_implemented_error,
            self.syntax_error,
            self.assertion_error,
            self.recursion_error,
        ];
        out.extend(all.into_iter().map(Value::object));
    }
}

// =============================================================================
// The VM
// =============================================================================

/// The shared interpreter state.
pub struct Vm {
    pub heap: Heap,
    pub threads: Vec<ThreadState>,
    pub current_thread: usize,
    /// Module cache: interned dotted name → module object.
    pub modules: Table,
    /// The `__builtins__` module.
    pub builtins: ObjRef,
    /// The `kuroko` module.
    pub system: ObjRef,
    pub base_classes: BaseClasses,
    pub exceptions: Exceptions,
    pub names: SpecialNames,
    pub(crate) natives: Vec<NativeFn>,
    /// Bound on call-frame depth; exceeding it raises `RecursionError`.
    pub maximum_call_depth: usize,
}

impl Vm {
    /// Initialize a fresh VM: built-in classes, exception types, the
    /// `__builtins__` and `kuroko` modules, and the native library.
    pub fn new(flags: VmFlags) -> Vm {
        let mut heap = Heap::new();
        heap.stress = flags.contains(VmFlags::STRESS_GC);
        heap.report = flags.contains(VmFlags::REPORT_GC_COLLECTS);

        // Bootstrap the class tree. Nothing collects during this phase:
        // collection only runs through Vm::alloc.
        let object_ = bare_class(&mut heap, "object", None);
        let mut class = |name: &str| bare_class(&mut heap, name, Some(object_));

        let base_classes = BaseClasses {
            object_,
            type_: class("type"),
            int_: class("int"),
            float_: class("float"),
            bool_: class("bool"),
            none_type: class("NoneType"),
            not_impl: class("NotImplementedType"),
            str_: class("str"),
            bytes: class("bytes"),
            function: class("function"),
            method: class("method"),
            tuple: class("tuple"),
            list: class("list"),
            dict: class("dict"),
            module: class("module"),
            codeobject: class("codeobject"),
            property_: class("property"),
            generator: class("generator"),
            range: class("range"),
            slice: class("slice"),
            list_iterator: class("listiterator"),
            range_iterator: class("rangeiterator"),
            str_iterator: class("striterator"),
            tuple_iterator: class("tupleiterator"),
            dict_items: class("dictitems"),
            dict_keys: class("dictkeys"),
            dict_values: class("dictvalues"),
        };

        let base_exception = bare_class(&mut heap, "Exception", Some(object_));
        let mut exc = |name: &str| bare_class(&mut heap, name, Some(base_exception));
        let exceptions = Exceptions {
            base_exception,
            type_error: exc("TypeError"),
            argument_error: exc("ArgumentError"),
            index_error: exc("IndexError"),
            key_error: exc("KeyError"),
            attribute_error: exc("AttributeError"),
            name_error: exc("NameError"),
            import_error: exc("ImportError"),
            io_error: exc("IOError"),
            value_error: exc("ValueError"),
            keyboard_interrupt: exc("KeyboardInterrupt"),
            zero_division_error: exc("ZeroDivisionError"),
            not_implemented_error: exc("NotImplementedError"),
            syntax_error: exc("SyntaxError"),
            assertion_error: exc("AssertionError"),
            recursion_error: exc("RecursionError"),
        };

        let names = SpecialNames {
            init: heap.intern("__init__"),
            repr: heap.intern("__repr__"),
            str_: heap.intern("__str__"),
            getitem: heap.intern("__getitem__"),
            setitem: heap.intern("__setitem__"),
            delitem: heap.intern("__delitem__"),
            eq: heap.intern("__eq__"),
            hash: heap.intern("__hash__"),
            len: heap.intern("__len__"),
            contains: heap.intern("__contains__"),
            iter: heap.intern("__iter__"),
            call: heap.intern("__call__"),
            enter: heap.intern("__enter__"),
            exit: heap.intern("__exit__"),
            getattr: heap.intern("__getattr__"),
            setattr: heap.intern("__setattr__"),
            delattr: heap.intern("__delattr__"),
            add: heap.intern("__add__"),
            sub: heap.intern("__sub__"),
            mul: heap.intern("__mul__"),
            div: heap.intern("__div__"),
            mod_: heap.intern("__mod__"),
            pow: heap.intern("__pow__"),
            bitor: heap.intern("__or__"),
            bitxor: heap.intern("__xor__"),
            bitand: heap.intern("__and__"),
            lshift: heap.intern("__lshift__"),
            rshift: heap.intern("__rshift__"),
            lt: heap.intern("__lt__"),
            gt: heap.intern("__gt__"),
            radd: heap.intern("__radd__"),
            rsub: heap.intern("__rsub__"),
            rmul: heap.intern("__rmul__"),
            rdiv: heap.intern("__rdiv__"),
            rmod: heap.intern("__rmod__"),
            rpow: heap.intern("__rpow__"),
            rbitor: heap.intern("__ror__"),
            rbitxor: heap.intern("__rxor__"),
            rbitand: heap.intern("__rand__"),
            rlshift: heap.intern("__rlshift__"),
            rrshift: heap.intern("__rrshift__"),
            name: heap.intern("__name__"),
            file: heap.intern("__file__"),
            doc: heap.intern("__doc__"),
            builtins_: heap.intern("__builtins__"),
            arg: heap.intern("arg"),
            traceback: heap.intern("traceback"),
        };

        let builtins_name = heap.intern("__builtins__");
        let builtins = heap.alloc_raw(ObjBody::Module(kuroko_runtime::ModuleObj {
            name: builtins_name,
            fields: Table::new(),
        }));
        let system_name = heap.intern("kuroko");
        let system = heap.alloc_raw(ObjBody::Module(kuroko_runtime::ModuleObj {
            name: system_name,
            fields: Table::new(),
        }));

        let mut thread = ThreadState::new();
        if flags.contains(VmFlags::ENABLE_TRACING) {
            thread.flags.insert(ThreadFlags::ENABLE_TRACING);
        }

        let mut vm = Vm {
            heap,
            threads: vec![thread],
            current_thread: 0,
            modules: Table::new(),
            builtins,
            system,
            base_classes,
            exceptions,
            names,
            natives: Vec::new(),
            maximum_call_depth: DEFAULT_CALL_DEPTH,
        };

        // Collection payload shapes for subclassable built-ins.
        vm.set_class_alloc(vm.base_classes.list, PayloadKind::List);
        vm.set_class_alloc(vm.base_classes.dict, PayloadKind::Dict);
        vm.set_class_alloc(vm.base_classes.str_, PayloadKind::Str);
        vm.set_class_alloc(vm.base_classes.tuple, PayloadKind::Tuple);

        // Primitive and internal types cannot be subclassed.
        for class in [
            vm.base_classes.int_,
            vm.base_classes.float_,
            vm.base_classes.bool_,
            vm.base_classes.none_type,
            vm.base_classes.not_impl,
            vm.base_classes.function,
            vm.base_classes.method,
            vm.base_classes.codeobject,
            vm.base_classes.generator,
            vm.base_classes.property_,
        ] {
            vm.heap.set_flag(class, ObjFlags::NO_INHERIT, true);
        }

        crate::builtins::install(&mut vm);
        crate::modules::install(&mut vm);
        vm
    }

    /// Set the maximum recursion depth.
    pub fn set_maximum_recursion_depth(&mut self, depth: usize) {
        self.maximum_call_depth = depth;
    }

    /// Deliver an interrupt: the dispatch loop raises `KeyboardInterrupt`
    /// at the next instruction boundary.
    pub fn set_signalled(&mut self) {
        self.thread_mut().flags.insert(ThreadFlags::SIGNALLED);
    }

    // =========================================================================
    // Thread and stack access
    // =========================================================================

    #[inline]
    pub fn thread(&self) -> &ThreadState {
        &self.threads[self.current_thread]
    }

    #[inline]
    pub fn thread_mut(&mut self) -> &mut ThreadState {
        &mut self.threads[self.current_thread]
    }

    #[inline]
    pub fn push(&mut self, value: Value) {
        self.thread_mut().push(value);
    }

    #[inline]
    pub fn pop(&mut self) -> Value {
        self.thread_mut().pop()
    }

    #[inline]
    pub fn peek(&self, distance: usize) -> Value {
        self.thread().peek(distance)
    }

    #[inline]
    pub fn swap(&mut self, distance: usize) {
        self.thread_mut().swap(distance);
    }

    #[inline]
    pub fn has_exception(&self) -> bool {
        self.thread().has_exception()
    }

    // =========================================================================
    // Allocation
    // =========================================================================

    /// Allocate a heap object, first collecting if pacing calls for it.
    /// The body's references must be rooted (on the stack, in scratch, or
    /// under a GC pause) before calling.
    pub fn alloc(&mut self, body: ObjBody) -> ObjRef {
        if self.heap.should_collect() {
            self.collect();
        }
        self.heap.alloc_raw(body)
    }

    /// Intern a string, first collecting if pacing calls for it.
    pub fn intern(&mut self, chars: &str) -> Value {
        if self.heap.should_collect() {
            self.collect();
        }
        self.heap.intern(chars)
    }

    /// Run a full collection now. Returns the number of objects freed.
    pub fn collect(&mut self) -> usize {
        let mut roots: Vec<Value> = Vec::with_capacity(256);
        for thread in &self.threads {
            roots.extend_from_slice(&thread.stack);
            for frame in &thread.frames {
                roots.push(Value::object(frame.closure));
                roots.push(Value::object(frame.code));
                roots.push(Value::object(frame.globals));
                if let Some(generator) = frame.generator {
                    roots.push(Value::object(generator));
                }
            }
            roots.push(thread.current_exception);
            roots.extend_from_slice(&thread.scratch);
            if let Some(module) = thread.module {
                roots.push(Value::object(module));
            }
            let mut open = thread.open_upvalues;
            while let Some(upvalue) = open {
                roots.push(Value::object(upvalue));
                open = self.heap.upvalue(upvalue).and_then(|u| u.next);
            }
        }
        for (key, value) in self.modules.iter() {
            roots.push(key);
            roots.push(value);
        }
        roots.push(Value::object(self.builtins));
        roots.push(Value::object(self.system));
        self.base_classes.collect_into(&mut roots);
        self.exceptions.collect_into(&mut roots);
        self.names.collect_into(&mut roots);
        self.heap.collect(&roots)
    }

    // =========================================================================
    // Types
    // =========================================================================

    /// The class representing a value's type.
    pub fn get_type(&self, value: Value) -> ObjRef {
        let classes = &self.base_classes;
        match value {
            Value::None => classes.none_type,
            Value::Bool(_) => classes.bool_,
            Value::Int(_) => classes.int_,
            Value::Float(_) => classes.float_,
            Value::NotImplemented => classes.not_impl,
            Value::Kwargs(_) => classes.none_type,
            Value::Object(obj) => match self.heap.body(obj) {
                ObjBody::Str(_) => classes.str_,
                ObjBody::Bytes(_) => classes.bytes,
                ObjBody::Tuple(_) => classes.tuple,
                ObjBody::List(_) => classes.list,
                ObjBody::Dict(_) => classes.dict,
                ObjBody::Code(_) => classes.codeobject,
                ObjBody::Closure(_) | ObjBody::Native(_) => classes.function,
                ObjBody::BoundMethod(_) => classes.method,
                ObjBody::Class(_) => classes.type_,
                ObjBody::Instance(instance) => instance.class,
                ObjBody::Module(_) => classes.module,
                ObjBody::Upvalue(_) => classes.object_,
                ObjBody::Property(_) => classes.property_,
                ObjBody::Generator(_) => classes.generator,
            },
        }
    }

    /// Human-readable type name, for error messages.
    pub fn type_name(&self, value: Value) -> String {
        let class = self.get_type(value);
        let name = self.heap.class(class).map(|c| c.name).unwrap_or(Value::None);
        self.heap
            .as_str(name)
            .unwrap_or("<anonymous type>")
            .to_string()
    }

    /// Is `value` an instance of `class` or of a subclass of it?
    pub fn is_instance_of(&self, value: Value, class: ObjRef) -> bool {
        let mut current = Some(self.get_type(value));
        while let Some(c) = current {
            if c == class {
                return true;
            }
            current = self.heap.class(c).and_then(|c| c.base);
        }
        false
    }

    /// Walk `class` and its base chain for `name` in the methods tables.
    pub fn class_chain_lookup(&self, class: ObjRef, name: Value) -> Option<Value> {
        let mut current = Some(class);
        while let Some(c) = current {
            let class_obj = self.heap.class(c)?;
            if let Some(found) = class_obj.methods.get(&self.heap, name) {
                return Some(found);
            }
            current = class_obj.base;
        }
        None
    }

    // =========================================================================
    // Definition helpers (embedding API)
    // =========================================================================

    pub(crate) fn register_native(&mut self, function: NativeFn) -> NativeId {
        self.natives.push(function);
        (self.natives.len() - 1) as NativeId
    }

    #[inline]
    pub(crate) fn native_fn(&self, id: NativeId) -> NativeFn {
        self.natives[id as usize]
    }

    /// Write `value` into a target table under an interned `name`.
    pub fn attach_named_value(&mut self, table: TargetTable, name: &str, value: Value) {
        self.heap.pause_gc();
        let key = self.heap.intern(name);
        match table {
            TargetTable::Fields(obj) => {
                self.heap.with_table_mut(obj, Heap::sel_fields, |t, heap| {
                    t.set(heap, key, value);
                });
            }
            TargetTable::Methods(obj) => {
                self.heap.with_table_mut(obj, Heap::sel_methods, |t, heap| {
                    t.set(heap, key, value);
                });
            }
        }
        self.heap.resume_gc();
    }

    /// Convenience wrapper attaching an object.
    pub fn attach_named_object(&mut self, table: TargetTable, name: &str, obj: ObjRef) {
        self.attach_named_value(table, name, Value::object(obj));
    }

    /// Attach a native function to a table. A leading `.` in `name` marks
    /// a method (attribute access binds it to the receiver); a leading `:`
    /// marks a dynamic property (attribute access calls it with the
    /// receiver).
    pub fn define_native(&mut self, table: TargetTable, name: &str, function: NativeFn) -> ObjRef {
        let (flags, bare) = match name.as_bytes().first() {
            Some(b'.') => (ObjFlags::IS_METHOD, &name[1..]),
            Some(b':') => (
                ObjFlags::IS_METHOD | ObjFlags::IS_DYNAMIC_PROPERTY,
                &name[1..],
            ),
            _ => (ObjFlags::empty(), name),
        };
        let id = self.register_native(function);
        self.heap.pause_gc();
        let native = self.heap.alloc_raw(ObjBody::Native(NativeObj {
            name: Box::from(bare),
            id,
        }));
        self.heap.set_flag(native, flags, true);
        self.heap.resume_gc();
        self.attach_named_value(table, bare, Value::object(native));
        native
    }

    /// Attach a native dynamic property, the preferred replacement for
    /// `:`-prefixed names.
    pub fn define_native_property(
        &mut self,
        table: TargetTable,
        name: &str,
        function: NativeFn,
    ) -> ObjRef {
        let id = self.register_native(function);
        self.heap.pause_gc();
        let native = self.heap.alloc_raw(ObjBody::Native(NativeObj {
            name: Box::from(name),
            id,
        }));
        self.heap
            .set_flag(native, ObjFlags::IS_METHOD | ObjFlags::IS_DYNAMIC_PROPERTY, true);
        let getter = Value::object(native);
        let property = self.heap.alloc_raw(ObjBody::Property(PropertyObj {
            getter,
            setter: Value::None,
        }));
        self.heap.resume_gc();
        self.attach_named_value(table, name, Value::object(property));
        native
    }

    /// Create a class named `name` inheriting `base`, optionally attaching
    /// it to a module's fields. The embedding equivalent of a `class`
    /// statement, minus the body.
    pub fn make_class(&mut self, module: Option<ObjRef>, name: &str, base: ObjRef) -> ObjRef {
        self.heap.pause_gc();
        let name_value = self.heap.intern(name);
        let alloc = self.heap.class(base).map(|c| c.alloc).unwrap_or_default();
        let class = self.heap.alloc_raw(ObjBody::Class(ClassObj {
            name: name_value,
            base: Some(base),
            methods: Table::new(),
            alloc,
            subclasses: Vec::new(),
            docstring: Value::None,
            filename: Value::None,
            slots: Box::default(),
        }));
        if let Some(base_class) = self.heap.class_mut(base) {
            base_class.subclasses.push(class);
        }
        self.heap.resume_gc();
        if let Some(module) = module {
            self.attach_named_object(TargetTable::Fields(module), name, class);
        }
        class
    }

    fn set_class_alloc(&mut self, class: ObjRef, kind: PayloadKind) {
        if let Some(c) = self.heap.class_mut(class) {
            c.alloc = kind;
        }
    }

    // =========================================================================
    // Embedding entry points
    // =========================================================================

    /// Execute a compiled code object in a fresh module context named
    /// `module_name`. Returns the result value; on an unhandled exception
    /// the result is `None` and the exception stays on the thread.
    pub fn interpret(&mut self, code: kuroko_bytecode::CodeObject, module_name: &str) -> Value {
        let module = self.start_module(module_name);
        self.run_code_in(code, module)
    }

    /// Execute a compiled code object against an existing module's
    /// globals.
    pub fn run_code_in(&mut self, code: kuroko_bytecode::CodeObject, module: ObjRef) -> Value {
        // The incoming code object's constants are not yet reachable from
        // any root; hold off collection until the closure is on the stack.
        self.heap.pause_gc();
        let code_ref = self.make_code(code);
        let closure = self.make_closure(code_ref, module);
        self.push(Value::object(closure));
        self.heap.resume_gc();
        self.call_stack(0)
    }

    /// [`Vm::interpret`] with the exception turned into a host error.
    pub fn interpret_checked(
        &mut self,
        code: kuroko_bytecode::CodeObject,
        module_name: &str,
    ) -> crate::error::VmResult<Value> {
        let result = self.interpret(code, module_name);
        if self.has_exception() {
            let class_name = self.type_name(self.thread().current_exception);
            let traceback = self.render_traceback();
            self.thread_mut().take_exception();
            return Err(crate::error::VmError::UnhandledException {
                class_name,
                traceback,
            });
        }
        Ok(result)
    }
}

/// Allocate a class with no methods during bootstrap.
fn bare_class(heap: &mut Heap, name: &str, base: Option<ObjRef>) -> ObjRef {
    let name_value = heap.intern(name);
    let class = heap.alloc_raw(ObjBody::Class(ClassObj {
        name: name_value,
        base,
        methods: Table::new(),
        alloc: PayloadKind::None,
        subclasses: Vec::new(),
        docstring: Value::None,
        filename: Value::None,
        slots: Box::default(),
    }));
    if let Some(base) = base {
        if let Some(base_class) = heap.class_mut(base) {
            base_class.subclasses.push(class);
        }
    }
    class
}
