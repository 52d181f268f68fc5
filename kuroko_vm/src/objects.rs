//! Constructors for managed objects.
//!
//! These wrap allocation with the GC-pause discipline: a construction
//! whose inputs are not yet reachable from a root runs under a pause so a
//! triggered collection cannot eat the intermediates.

use crate::vm::Vm;
use kuroko_bytecode::CodeObject;
use kuroko_core::{ObjRef, Value};
use kuroko_runtime::{
    BoundMethodObj, ClosureObj, DictObj, InstanceObj, ListObj, ModuleObj, ObjBody, Table, TupleObj,
    UpvalueVec,
};

impl Vm {
    /// Allocate a list from already-produced values.
    pub fn make_list(&mut self, values: Vec<Value>) -> Value {
        self.heap.pause_gc();
        let obj = self.alloc(ObjBody::List(ListObj { values }));
        self.heap.resume_gc();
        Value::object(obj)
    }

    /// Allocate a tuple from already-produced values.
    pub fn make_tuple(&mut self, values: Box<[Value]>) -> Value {
        self.heap.pause_gc();
        let obj = self.alloc(ObjBody::Tuple(TupleObj { values }));
        self.heap.resume_gc();
        Value::object(obj)
    }

    /// Allocate an empty dict.
    pub fn make_dict(&mut self) -> Value {
        Value::object(self.alloc(ObjBody::Dict(DictObj::default())))
    }

    /// Allocate an instance of `class`, with the payload shape the class
    /// declares.
    pub fn make_instance(&mut self, class: ObjRef) -> ObjRef {
        let payload = self
            .heap
            .class(class)
            .map(|c| c.alloc)
            .unwrap_or_default()
            .instantiate();
        self.alloc(ObjBody::Instance(InstanceObj {
            class,
            fields: Table::new(),
            payload,
        }))
    }

    /// Allocate a code object on the heap.
    pub fn make_code(&mut self, code: CodeObject) -> ObjRef {
        self.alloc(ObjBody::Code(code))
    }

    /// Wrap a heap code object in a closure executing against `globals`.
    /// Upvalues start empty; the `Closure` instruction fills them.
    pub fn make_closure(&mut self, code: ObjRef, globals: ObjRef) -> ObjRef {
        self.alloc(ObjBody::Closure(ClosureObj {
            code,
            upvalues: UpvalueVec::new(),
            defaults: Vec::new(),
            keyword_defaults: Vec::new(),
            annotations: Value::None,
            globals,
        }))
    }

    /// Bind `method` to `receiver`.
    pub fn make_bound_method(&mut self, receiver: Value, method: Value) -> Value {
        Value::object(self.alloc(ObjBody::BoundMethod(BoundMethodObj { receiver, method })))
    }

    /// Create a fresh module instance with `__builtins__` linked, make it
    /// the thread's current module, and leave it out of the module cache
    /// (imports decide whether to cache).
    pub fn start_module(&mut self, name: &str) -> ObjRef {
        self.heap.pause_gc();
        let name_value = self.heap.intern(name);
        let module = self.heap.alloc_raw(ObjBody::Module(ModuleObj {
            name: name_value,
            fields: Table::new(),
        }));
        self.heap.resume_gc();
        self.thread_mut().module = Some(module);
        let builtins = self.builtins;
        self.attach_named_object(crate::vm::TargetTable::Fields(module), "__builtins__", builtins);
        self.attach_named_value(crate::vm::TargetTable::Fields(module), "__name__", name_value);
        module
    }
}
