//! Raising, tracebacks, and the host-facing rendering.
//!
//! An exception is an instance of a class descending from `Exception`.
//! Raising stores it in the thread state and sets the `HAS_EXCEPTION`
//! flag; every native returning into managed code must check that flag
//! and propagate. The traceback is a managed list of
//! `(code object, instruction offset)` tuples attached to the instance at
//! first raise, so a re-raise from a handler keeps the original trace.

use crate::vm::Vm;
use kuroko_core::{ObjRef, Value};
use kuroko_runtime::{InstanceObj, ObjBody, Table, TupleObj};

impl Vm {
    /// Construct an instance of `exc_class` carrying `message`, attach a
    /// traceback, and set it as the thread's in-flight exception.
    ///
    /// Returns `None` as a convenience so natives can
    /// `return vm.runtime_error(...)`.
    pub fn runtime_error(&mut self, exc_class: ObjRef, message: impl Into<String>) -> Value {
        let message = message.into();
        self.heap.pause_gc();
        let arg = self.heap.intern(&message);
        let instance = self.heap.alloc_raw(ObjBody::Instance(InstanceObj {
            class: exc_class,
            fields: Table::new(),
            payload: kuroko_runtime::Payload::None,
        }));
        let arg_name = self.names.arg;
        self.heap
            .with_table_mut(instance, kuroko_runtime::Heap::sel_fields, |t, heap| {
                t.set(heap, arg_name, arg);
            });
        self.heap.resume_gc();
        self.raise_value(Value::object(instance));
        Value::None
    }

    /// Raise an arbitrary value. Instances without a traceback get one
    /// captured here; re-raised instances keep theirs.
    pub fn raise_value(&mut self, value: Value) {
        if let Some(obj) = value.as_object() {
            let has_traceback = self
                .heap
                .fields(obj)
                .map_or(true, |f| f.get(&self.heap, self.names.traceback).is_some());
            if !has_traceback {
                self.heap.pause_gc();
                let traceback = self.capture_traceback();
                let traceback_name = self.names.traceback;
                self.heap
                    .with_table_mut(obj, kuroko_runtime::Heap::sel_fields, |t, heap| {
                        t.set(heap, traceback_name, traceback);
                    });
                self.heap.resume_gc();
            }
        }
        self.thread_mut().set_exception(value);
    }

    /// Build the traceback list for the current frame stack, outermost
    /// frame first. Callers hold a GC pause.
    fn capture_traceback(&mut self) -> Value {
        let mut entries: Vec<(ObjRef, usize)> = Vec::new();
        for frame in &self.thread().frames {
            // The ip has advanced past the opcode; step back inside it so
            // the line table attributes the faulting instruction.
            entries.push((frame.code, frame.ip.saturating_sub(1)));
        }
        let mut tuples = Vec::with_capacity(entries.len());
        for (code, offset) in entries {
            let tuple = self.heap.alloc_raw(ObjBody::Tuple(TupleObj {
                values: Box::from([Value::object(code), Value::int(offset as i64)]),
            }));
            tuples.push(Value::object(tuple));
        }
        let list = self
            .heap
            .alloc_raw(ObjBody::List(kuroko_runtime::ListObj { values: tuples }));
        Value::object(list)
    }

    /// The message string of an exception instance, when it carries one.
    pub fn exception_message(&self, value: Value) -> Option<&str> {
        let obj = value.as_object()?;
        let arg = self.heap.fields(obj)?.get(&self.heap, self.names.arg)?;
        self.heap.as_str(arg)
    }

    /// Render the in-flight exception as a traceback, outermost frame
    /// first, without clearing it.
    pub fn render_traceback(&mut self) -> String {
        use std::fmt::Write;

        let exception = self.thread().current_exception;
        let mut out = String::new();

        let traceback = exception
            .as_object()
            .and_then(|obj| self.heap.fields(obj))
            .and_then(|f| f.get(&self.heap, self.names.traceback));
        if let Some(traceback) = traceback {
            let entries: Vec<(Value, i64)> = traceback
                .as_object()
                .and_then(|l| self.heap.list_values(l))
                .map(|values| {
                    values
                        .iter()
                        .filter_map(|entry| {
                            let tuple = entry.as_object()?;
                            let parts = self.heap.tuple_values(tuple)?;
                            Some((parts[0], parts[1].as_int()?))
                        })
                        .collect()
                })
                .unwrap_or_default();
            if !entries.is_empty() {
                let _ = writeln!(out, "Traceback (most recent call last):");
                for (code_value, offset) in entries {
                    let Some(code_obj) = code_value.as_object() else {
                        continue;
                    };
                    let Some(code) = self.heap.code(code_obj) else {
                        continue;
                    };
                    let line = code
                        .chunk
                        .line_for_offset(offset as usize)
                        .unwrap_or_default();
                    let _ = writeln!(
                        out,
                        "  File \"{}\", line {}, in {}",
                        code.filename, line, code.name
                    );
                }
            }
        }

        let class_name = self.type_name(exception);
        match self.exception_message(exception) {
            Some(message) if !message.is_empty() => {
                let _ = writeln!(out, "{}: {}", class_name, message);
            }
            _ => {
                let _ = writeln!(out, "{}", class_name);
            }
        }
        out
    }

    /// Print the in-flight exception's traceback to stderr, if any.
    pub fn dump_traceback(&mut self) {
        if self.has_exception() {
            eprint!("{}", self.render_traceback());
        }
    }
}
