//! Modules and the import machinery.
//!
//! The module cache maps interned dotted names to module objects. The
//! core resolves imports strictly against the cache; loading source off
//! the file system belongs to the host, which registers modules through
//! [`Vm::inject_module`]. The `gc` control module and the `kuroko` system
//! module are registered here at init.

use crate::vm::{TargetTable, Vm};
use kuroko_core::{ObjRef, Value};
use kuroko_runtime::{ModuleObj, ObjBody, Table};

/// Register the system modules. Called once from `Vm::new`.
pub fn install(vm: &mut Vm) {
    // The `kuroko` module carries interpreter facts.
    let system = vm.system;
    let version = vm.intern("1.0.0");
    vm.attach_named_value(TargetTable::Fields(system), "version", version);
    let system_name = vm.heap.module(system).map(|m| m.name).unwrap_or(Value::None);
    vm.attach_named_value(TargetTable::Fields(system), "__name__", system_name);
    vm.register_module("kuroko", system);

    // The `gc` module exposes collector controls.
    let gc_module = vm.make_module("gc");
    vm.define_native(TargetTable::Fields(gc_module), "collect", gc_collect);
    vm.define_native(TargetTable::Fields(gc_module), "pause", gc_pause);
    vm.define_native(TargetTable::Fields(gc_module), "resume", gc_resume);
    vm.register_module("gc", gc_module);
}

fn gc_collect(vm: &mut Vm, _args: &[Value], _has_kw: bool) -> Value {
    let freed = vm.collect();
    Value::int(freed as i64)
}

fn gc_pause(vm: &mut Vm, _args: &[Value], _has_kw: bool) -> Value {
    vm.heap.pause_gc();
    Value::None
}

fn gc_resume(vm: &mut Vm, _args: &[Value], _has_kw: bool) -> Value {
    vm.heap.resume_gc();
    Value::None
}

impl Vm {
    /// Allocate a bare module object with `__builtins__` linked.
    pub fn make_module(&mut self, name: &str) -> ObjRef {
        self.heap.pause_gc();
        let name_value = self.heap.intern(name);
        let module = self.heap.alloc_raw(ObjBody::Module(ModuleObj {
            name: name_value,
            fields: Table::new(),
        }));
        self.heap.resume_gc();
        let builtins = self.builtins;
        self.attach_named_object(TargetTable::Fields(module), "__builtins__", builtins);
        self.attach_named_value(TargetTable::Fields(module), "__name__", name_value);
        module
    }

    /// Enter `module` into the module cache under `name`.
    pub fn register_module(&mut self, name: &str, module: ObjRef) {
        self.heap.pause_gc();
        let key = self.heap.intern(name);
        let mut modules = std::mem::take(&mut self.modules);
        modules.set(&self.heap, key, Value::object(module));
        self.modules = modules;
        self.heap.resume_gc();
    }

    /// Import the module named by the interned string `name`, running it
    /// as `run_as` when given. The resolved module is pushed on success.
    /// Only the cache is consulted; a miss raises `ImportError`.
    pub fn import_module(&mut self, name: Value, run_as: Option<Value>) -> bool {
        let key = run_as.unwrap_or(name);
        if let Some(module) = self.modules.get(&self.heap, key) {
            self.push(module);
            return true;
        }
        if key != name {
            if let Some(module) = self.modules.get(&self.heap, name) {
                self.push(module);
                return true;
            }
        }
        let text = self.heap.as_str(name).unwrap_or("?").to_string();
        self.runtime_error(
            self.exceptions.import_error,
            format!("No module named '{}'", text),
        );
        false
    }

    pub(crate) fn op_import(&mut self, name: Value) {
        self.import_module(name, None);
    }

    /// `from module import name`: an attribute of the module object, or a
    /// cached submodule `module.name`.
    pub(crate) fn op_import_from(&mut self, name: Value) {
        let module = self.peek(0);
        if self.value_get_attribute(name) {
            return;
        }
        let module_name = module
            .as_object()
            .and_then(|o| self.heap.module(o))
            .map(|m| m.name)
            .unwrap_or(Value::None);
        let Some(base) = self.heap.as_str(module_name).map(str::to_string) else {
            let attr = self.heap.as_str(name).unwrap_or("?").to_string();
            self.runtime_error(
                self.exceptions.import_error,
                format!(
                    "Can not import '{}' from non-module '{}' object",
                    attr,
                    self.type_name(module)
                ),
            );
            return;
        };
        let attr = self.heap.as_str(name).unwrap_or("?").to_string();
        let dotted = format!("{}.{}", base, attr);
        self.heap.pause_gc();
        let key = self.heap.intern(&dotted);
        let found = self.modules.get(&self.heap, key);
        self.heap.resume_gc();
        match found {
            Some(submodule) => {
                self.pop();
                self.push(submodule);
            }
            None => {
                self.runtime_error(
                    self.exceptions.import_error,
                    format!("Can not import '{}' from '{}'", attr, base),
                );
            }
        }
    }
}
