//! Shared test harness: a VM plus rooting helpers for hand-assembled
//! code.
//!
//! Heap references baked into a code object under construction (interned
//! name strings, nested code objects) are not reachable from any VM root
//! until the code runs. The harness parks them on the value stack, which
//! is always a root, so the tests behave identically under GC stress.

use kuroko_bytecode::{Builder, CodeObject};
use kuroko_core::{ObjRef, Value};
use kuroko_vm::{TargetTable, Vm, VmFlags};

pub struct Harness {
    pub vm: Vm,
    /// The persistent `__main__` module every run executes against, so
    /// globals defined by one run are visible to the next.
    pub module: ObjRef,
}

#[allow(dead_code)]
impl Harness {
    pub fn new() -> Self {
        Self::with_flags(VmFlags::empty())
    }

    /// A VM that collects on every allocation opportunity.
    pub fn stressed() -> Self {
        Self::with_flags(VmFlags::STRESS_GC)
    }

    fn with_flags(flags: VmFlags) -> Self {
        let mut vm = Vm::new(flags);
        let module = vm.start_module("__main__");
        Harness { vm, module }
    }

    /// Intern a string and keep it rooted for the life of the test.
    pub fn s(&mut self, text: &str) -> Value {
        let value = self.vm.intern(text);
        self.vm.push(value);
        value
    }

    /// Park a nested code object on the heap, rooted.
    pub fn code(&mut self, code: CodeObject) -> Value {
        self.vm.heap.pause_gc();
        let obj = self.vm.make_code(code);
        self.vm.push(Value::object(obj));
        self.vm.heap.resume_gc();
        Value::object(obj)
    }

    /// Run a finished module body against the persistent module and
    /// return its result.
    pub fn run(&mut self, builder: Builder) -> Value {
        let module = self.module;
        self.vm.run_code_in(builder.finish(), module)
    }

    /// Run and panic (with the traceback) if an exception escaped.
    pub fn run_ok(&mut self, builder: Builder) -> Value {
        let result = self.run(builder);
        if self.vm.has_exception() {
            panic!("unexpected exception:\n{}", self.vm.render_traceback());
        }
        result
    }

    /// Run and hand back the escaped exception value.
    pub fn run_err(&mut self, builder: Builder) -> Value {
        let result = self.run(builder);
        assert!(
            self.vm.has_exception(),
            "expected an exception, got {:?}",
            result
        );
        self.vm.thread_mut().take_exception()
    }

    /// Define a managed function as a global of the persistent module, so
    /// test bodies can `GetGlobal` it.
    pub fn define_function(&mut self, name: &str, code: CodeObject, defaults: Vec<Value>) -> ObjRef {
        let module = self.module;
        self.vm.heap.pause_gc();
        let code_obj = self.vm.make_code(code);
        let closure = self.vm.make_closure(code_obj, module);
        if let Some(c) = match self.vm.heap.body_mut(closure) {
            kuroko_runtime::ObjBody::Closure(c) => Some(c),
            _ => None,
        } {
            c.defaults = defaults;
        }
        self.vm.push(Value::object(closure));
        self.vm.heap.resume_gc();
        self.vm
            .attach_named_object(TargetTable::Fields(module), name, closure);
        closure
    }

    pub fn str_of(&self, value: Value) -> String {
        self.vm.heap.as_str(value).unwrap_or("<not a string>").to_string()
    }

    pub fn assert_is_str(&self, value: Value, expected: &str) {
        assert_eq!(self.vm.heap.as_str(value), Some(expected));
    }

    pub fn tuple_of(&self, value: Value) -> Vec<Value> {
        value
            .as_object()
            .and_then(|o| self.vm.heap.tuple_values(o))
            .map(|v| v.to_vec())
            .expect("expected a tuple result")
    }
}
