//! The calling convention.
//!
//! [`Vm::call_value`] dispatches on the callee variant: closures extend
//! the frame stack and resume the VM, natives run to completion, bound
//! methods insert their receiver and retry, classes allocate and
//! initialize an instance, instances defer to `__call__`, and generators
//! resume their saved frame. The three-way result mirrors the embedding
//! contract: resume-vm, native-done, or failed.

use crate::threads::CallFrame;
use crate::vm::Vm;
use kuroko_core::{ObjRef, Value, KWARGS_DICT, KWARGS_LIST, KWARGS_SINGLE, KWARGS_UNSET};
use kuroko_runtime::{GenState, GeneratorObj, Handler, ObjBody, Table};
use smallvec::SmallVec;

/// How a call's result is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallResult {
    /// A frame was pushed; the VM must run to produce the result.
    Resume,
    /// The result is on the stack now.
    NativeDone,
    /// The call failed; an exception is set.
    Failed,
}

impl Vm {
    /// Call `callee` with `arg_count` arguments already on the stack.
    /// `callable_on_stack` is 1 when the callee value itself sits below
    /// the arguments (the slot is reused for receivers and instances).
    pub fn call_value(
        &mut self,
        callee: Value,
        arg_count: usize,
        callable_on_stack: usize,
    ) -> CallResult {
        let extra = callable_on_stack;
        let Some(obj) = callee.as_object() else {
            self.runtime_error(
                self.exceptions.type_error,
                format!(
                    "Attempted to call non-callable type: {}",
                    self.type_name(callee)
                ),
            );
            return CallResult::Failed;
        };

        match self.heap.body(obj) {
            ObjBody::Closure(_) => self.call_closure(obj, arg_count, extra),
            ObjBody::Native(native) => {
                let id = native.id;
                self.call_native(id, arg_count, extra)
            }
            ObjBody::BoundMethod(bound) => {
                let receiver = bound.receiver;
                let method = bound.method;
                if method.is_none() {
                    self.runtime_error(
                        self.exceptions.argument_error,
                        "Attempted to call a method binding with no attached callable",
                    );
                    return CallResult::Failed;
                }
                let top = self.thread().stack_top();
                self.thread_mut().stack[top - arg_count - 1] = receiver;
                self.call_value(method, arg_count + 1, 0)
            }
            ObjBody::Class(_) => self.call_class(obj, arg_count, extra),
            ObjBody::Instance(instance) => {
                let class = instance.class;
                match self.heap.class(class).and_then(|c| c.slots.call) {
                    Some(call_method) => self.call_value(call_method, arg_count + 1, 0),
                    None => {
                        self.runtime_error(
                            self.exceptions.type_error,
                            format!(
                                "Attempted to call non-callable type: {}",
                                self.type_name(callee)
                            ),
                        );
                        CallResult::Failed
                    }
                }
            }
            ObjBody::Generator(_) => self.resume_generator(obj, arg_count, extra),
            _ => {
                self.runtime_error(
                    self.exceptions.type_error,
                    format!(
                        "Attempted to call non-callable type: {}",
                        self.type_name(callee)
                    ),
                );
                CallResult::Failed
            }
        }
    }

    /// Call a callable `arg_count` entries down the stack, running the VM
    /// for managed calls. Pops the callable and arguments; returns the
    /// result.
    pub fn call_stack(&mut self, arg_count: usize) -> Value {
        let callee = self.peek(arg_count);
        match self.call_value(callee, arg_count, 1) {
            CallResult::Resume => self.run_next(),
            CallResult::NativeDone => self.pop(),
            CallResult::Failed => Value::None,
        }
    }

    /// Push `callable` and `args` and complete the call. The workhorse
    /// behind dunder dispatch and native re-entry into managed code.
    pub fn call_simple(&mut self, callable: Value, args: &[Value]) -> Value {
        self.push(callable);
        for &arg in args {
            self.push(arg);
        }
        self.call_stack(args.len())
    }

    /// Resume the dispatch loop until the current topmost frame returns.
    pub fn run_next(&mut self) -> Value {
        let depth = self.thread().frames.len();
        debug_assert!(depth > 0, "run_next with no frame to run");
        let previous = self.thread_mut().exit_on_frame.replace(depth - 1);
        let result = self.run();
        self.thread_mut().exit_on_frame = previous;
        result
    }

    // =========================================================================
    // Closure calls: argument binding
    // =========================================================================

    /// Bind arguments and push a frame for a managed call. Handles the
    /// keyword-marker protocol, defaults, collectors, and the recursion
    /// limit. Generator closures produce a generator object instead of a
    /// frame.
    fn call_closure(&mut self, closure_ref: ObjRef, arg_count: usize, extra: usize) -> CallResult {
        let (code_ref, globals, defaults, keyword_defaults) = {
            let closure = self.heap.closure(closure_ref).expect("closure body");
            (
                closure.code,
                closure.globals,
                closure.defaults.clone(),
                closure.keyword_defaults.clone(),
            )
        };
        let (required, optional, keyword_only, collects_args, collects_kwargs, is_generator) = {
            let code = self.heap.code(code_ref).expect("code body");
            (
                code.required_args as usize,
                code.optional_args as usize,
                code.keyword_only_args as usize,
                code.collects_args(),
                code.collects_kwargs(),
                code.is_generator(),
            )
        };
        let arg_names: Vec<Value> = self.heap.code(code_ref).expect("code body").arg_names.clone();
        let positional_params = required + optional;
        let named_params = positional_params + keyword_only;
        let total_slots = named_params + usize::from(collects_args) + usize::from(collects_kwargs);

        // Everything from here to the frame push works on values that may
        // leave the stack before they are re-rooted.
        self.heap.pause_gc();

        let top = self.thread().stack_top();
        let out_slots = top - arg_count - extra;
        let base = top - arg_count;

        let has_marker = arg_count > 0 && self.peek(0).is_kwargs();
        let (positionals, keywords) = if has_marker {
            match self.process_complex_arguments(arg_count) {
                Some(parts) => parts,
                None => {
                    self.heap.resume_gc();
                    return CallResult::Failed;
                }
            }
        } else {
            let stack = &self.thread().stack;
            (stack[base..top].to_vec(), Table::new())
        };

        let mut slots: Vec<Value> = vec![Value::kwargs(KWARGS_UNSET); total_slots];

        // Positional placement, extras into the collector.
        if positionals.len() > positional_params {
            if collects_args {
                let extras = positionals[positional_params..].to_vec();
                let list = self.make_list(extras);
                slots[named_params] = list;
            } else {
                self.arity_error(code_ref, positionals.len());
                self.heap.resume_gc();
                return CallResult::Failed;
            }
        }
        for (slot, &value) in slots
            .iter_mut()
            .take(positional_params)
            .zip(positionals.iter())
        {
            *slot = value;
        }

        // Keyword placement.
        let mut leftovers = Table::new();
        for (name, value) in keywords.iter() {
            match arg_names.iter().position(|&n| n.values_same(name)) {
                Some(index) => {
                    if !slots[index].values_same(Value::kwargs(KWARGS_UNSET)) {
                        let fn_name = self.callable_name(code_ref);
                        let arg = self.heap.as_str(name).unwrap_or("?").to_string();
                        self.runtime_error(
                            self.exceptions.type_error,
                            format!("{}() got multiple values for argument '{}'", fn_name, arg),
                        );
                        self.heap.resume_gc();
                        return CallResult::Failed;
                    }
                    slots[index] = value;
                }
                None if collects_kwargs => {
                    leftovers.set(&self.heap, name, value);
                }
                None => {
                    let fn_name = self.callable_name(code_ref);
                    let arg = self.heap.as_str(name).unwrap_or("?").to_string();
                    self.runtime_error(
                        self.exceptions.type_error,
                        format!("{}() got an unexpected keyword argument '{}'", fn_name, arg),
                    );
                    self.heap.resume_gc();
                    return CallResult::Failed;
                }
            }
        }

        // Defaults.
        for index in 0..optional {
            let slot = required + index;
            if slots[slot].is_kwargs() {
                if let Some(&default) = defaults.get(index) {
                    slots[slot] = default;
                }
            }
        }
        for index in 0..keyword_only {
            let slot = positional_params + index;
            if slots[slot].is_kwargs() {
                if let Some(&default) = keyword_defaults.get(index) {
                    slots[slot] = default;
                }
            }
        }

        // Collectors that received nothing.
        if collects_args && slots[named_params].is_kwargs() {
            slots[named_params] = self.make_list(Vec::new());
        }
        if collects_kwargs {
            let dict_slot = named_params + usize::from(collects_args);
            let dict = self.make_dict();
            let dict_obj = dict.as_object().expect("dict object");
            self.heap
                .with_table_mut(dict_obj, kuroko_runtime::Heap::sel_dict, |t, heap| {
                    t.add_all(heap, &leftovers);
                });
            slots[dict_slot] = dict;
        }

        // Anything still unset is a missing argument.
        for (index, slot) in slots.iter().take(named_params).enumerate() {
            if slot.is_kwargs() {
                let fn_name = self.callable_name(code_ref);
                let arg = arg_names
                    .get(index)
                    .and_then(|&n| self.heap.as_str(n))
                    .unwrap_or("?")
                    .to_string();
                let kind = if index < positional_params {
                    "positional"
                } else {
                    "keyword-only"
                };
                self.runtime_error(
                    self.exceptions.type_error,
                    format!(
                        "{}() missing required {} argument: '{}'",
                        fn_name, kind, arg
                    ),
                );
                self.heap.resume_gc();
                return CallResult::Failed;
            }
        }

        if is_generator {
            // Package the bound frame into a generator instead of running.
            let generator = self.heap.alloc_raw(ObjBody::Generator(GeneratorObj {
                closure: closure_ref,
                state: GenState::Ready { args: slots },
            }));
            self.thread_mut().truncate(out_slots);
            self.push(Value::object(generator));
            self.heap.resume_gc();
            return CallResult::NativeDone;
        }

        if self.thread().frames.len() >= self.maximum_call_depth {
            self.runtime_error(self.exceptions.recursion_error, "Maximum recursion depth exceeded");
            self.heap.resume_gc();
            return CallResult::Failed;
        }

        {
            let thread = self.thread_mut();
            thread.truncate(out_slots + extra);
            let base = thread.stack_top();
            for &slot in &slots {
                thread.push(slot);
            }
            thread.frames.push(CallFrame {
                closure: closure_ref,
                code: code_ref,
                ip: 0,
                base,
                out_slots,
                globals,
                handlers: SmallVec::new(),
                generator: None,
            });
        }
        self.heap.resume_gc();
        CallResult::Resume
    }

    /// "f() takes exactly/at most N arguments (M given)".
    fn arity_error(&mut self, code_ref: ObjRef, given: usize) {
        let code = self.heap.code(code_ref).expect("code body");
        let min = code.required_args as usize;
        let max = code.positional_args() as usize;
        let name = self.callable_name(code_ref);
        let (word, bound) = if min == max {
            ("exactly", min)
        } else if given < min {
            ("at least", min)
        } else {
            ("at most", max)
        };
        self.runtime_error(
            self.exceptions.argument_error,
            format!(
                "{}() takes {} {} argument{} ({} given)",
                name,
                word,
                bound,
                if bound == 1 { "" } else { "s" },
                given
            ),
        );
    }

    fn callable_name(&self, code_ref: ObjRef) -> String {
        self.heap
            .code(code_ref)
            .map(|c| c.name.to_string())
            .unwrap_or_else(|| "<unnamed function>".to_string())
    }

    /// Decode the keyword-marker protocol: the stack top holds
    /// `kwargs(pair_count)`, below it `pair_count` key/value pairs, below
    /// those the plain positional arguments. Produces the flattened
    /// positional list and keyword table, expanding `*`/`**` markers.
    /// The caller holds a GC pause.
    pub(crate) fn process_complex_arguments(
        &mut self,
        arg_count: usize,
    ) -> Option<(Vec<Value>, Table)> {
        let top = self.thread().stack_top();
        let pair_count = self
            .peek(0)
            .as_kwargs()
            .expect("keyword marker on stack top") as usize;
        let existing = arg_count - 1 - pair_count * 2;
        let base = top - arg_count;

        let mut positionals: Vec<Value> =
            self.thread().stack[base..base + existing].to_vec();
        let mut keywords = Table::new();

        for pair in 0..pair_count {
            let key = self.thread().stack[top - 1 - 2 * (pair_count - pair)];
            let value = self.thread().stack[top - 2 * (pair_count - pair)];
            match key {
                Value::Kwargs(KWARGS_SINGLE) => positionals.push(value),
                Value::Kwargs(KWARGS_LIST) => {
                    let items = self.expand_iterable(value)?;
                    positionals.extend(items);
                }
                Value::Kwargs(KWARGS_DICT) => {
                    let Some(table) = value.as_object().and_then(|o| self.heap.dict_table(o))
                    else {
                        self.runtime_error(
                            self.exceptions.type_error,
                            "**expression value is not a dict",
                        );
                        return None;
                    };
                    let entries: Vec<(Value, Value)> = table.iter().collect();
                    for (k, v) in entries {
                        if self.heap.as_str(k).is_none() {
                            self.runtime_error(
                                self.exceptions.type_error,
                                "**expression contains non-string key",
                            );
                            return None;
                        }
                        if !keywords.set(&self.heap, k, v) {
                            let name = self.heap.as_str(k).unwrap_or("?").to_string();
                            self.runtime_error(
                                self.exceptions.type_error,
                                format!("got multiple values for argument '{}'", name),
                            );
                            return None;
                        }
                    }
                }
                _ if self.heap.as_str(key).is_some() => {
                    if !keywords.set(&self.heap, key, value) {
                        let name = self.heap.as_str(key).unwrap_or("?").to_string();
                        self.runtime_error(
                            self.exceptions.type_error,
                            format!("got multiple values for argument '{}'", name),
                        );
                        return None;
                    }
                }
                _ => {
                    self.runtime_error(
                        self.exceptions.type_error,
                        "Invalid keyword argument marker",
                    );
                    return None;
                }
            }
        }
        Some((positionals, keywords))
    }

    /// Flatten a `*expression` into positional values, driving the
    /// iterator protocol when the fast shapes don't apply.
    fn expand_iterable(&mut self, value: Value) -> Option<Vec<Value>> {
        if let Some(obj) = value.as_object() {
            if let Some(values) = self.heap.tuple_values(obj) {
                return Some(values.to_vec());
            }
            if let Some(values) = self.heap.list_values(obj) {
                return Some(values.clone());
            }
        }
        match self.iterate_collect(value) {
            Some(items) => Some(items),
            None => {
                if !self.has_exception() {
                    self.runtime_error(
                        self.exceptions.type_error,
                        format!(
                            "Can not unpack *expression: '{}' object is not iterable",
                            self.type_name(value)
                        ),
                    );
                }
                None
            }
        }
    }

    /// Drive `__iter__` and call the iterator until it yields itself,
    /// collecting the produced values.
    pub fn iterate_collect(&mut self, value: Value) -> Option<Vec<Value>> {
        let class = self.get_type(value);
        let iter_method = self.heap.class(class).and_then(|c| c.slots.iter)?;
        let iterator = self.call_simple(iter_method, &[value]);
        if self.has_exception() {
            return None;
        }
        let mut items = Vec::new();
        loop {
            let item = self.call_simple(iterator, &[]);
            if self.has_exception() {
                return None;
            }
            if item.values_same(iterator) {
                return Some(items);
            }
            items.push(item);
        }
    }

    // =========================================================================
    // Native calls
    // =========================================================================

    fn call_native(&mut self, id: kuroko_runtime::NativeId, arg_count: usize, extra: usize) -> CallResult {
        let function = self.native_fn(id);
        let top = self.thread().stack_top();

        if arg_count > 0 && self.peek(0).is_kwargs() {
            // Keyword call: flatten to a list plus a keyword dict, keeping
            // both rooted on the stack for the duration.
            self.heap.pause_gc();
            let Some((positionals, keywords)) = self.process_complex_arguments(arg_count) else {
                self.heap.resume_gc();
                return CallResult::Failed;
            };
            let list = self.make_list(positionals);
            let dict = self.make_dict();
            let dict_obj = dict.as_object().expect("dict object");
            self.heap
                .with_table_mut(dict_obj, kuroko_runtime::Heap::sel_dict, |t, heap| {
                    t.add_all(heap, &keywords);
                });
            self.heap.resume_gc();

            self.thread_mut().truncate(top - arg_count - extra);
            self.push(list);
            self.push(dict);

            let mut argv: SmallVec<[Value; 8]> = SmallVec::new();
            if let Some(values) = list.as_object().and_then(|o| self.heap.list_values(o)) {
                argv.extend_from_slice(values);
            }
            argv.push(dict);

            let result = function(self, &argv, true);
            self.pop();
            self.pop();
            self.push(result);
            return CallResult::NativeDone;
        }

        // Plain call: the arguments stay on the stack (rooted) while the
        // native runs against a copy of the window.
        let argv: SmallVec<[Value; 8]> =
            SmallVec::from_slice(&self.thread().stack[top - arg_count..top]);
        let result = function(self, &argv, false);
        self.thread_mut().truncate(top - arg_count - extra);
        self.push(result);
        CallResult::NativeDone
    }

    // =========================================================================
    // Class calls
    // =========================================================================

    /// Instantiate `class`: allocate the instance, run `__init__` with it
    /// as receiver, and leave the instance on the stack regardless of what
    /// the initializer returns.
    fn call_class(&mut self, class: ObjRef, arg_count: usize, extra: usize) -> CallResult {
        let init = self.heap.class(class).and_then(|c| c.slots.init);
        let top = self.thread().stack_top();
        let argv: SmallVec<[Value; 8]> =
            SmallVec::from_slice(&self.thread().stack[top - arg_count..top]);

        let instance = self.make_instance(class);
        self.thread_mut().truncate(top - arg_count - extra);
        self.push(Value::object(instance));

        match init {
            Some(init_method) => {
                // Native initializers follow the native convention: their
                // return value replaces the instance, which is how the
                // conversion types produce primitives. Managed
                // initializers cannot displace the instance.
                let init_is_native = matches!(
                    init_method.as_object().map(|o| self.heap.body(o)),
                    Some(ObjBody::Native(_))
                );
                self.push(init_method);
                self.push(Value::object(instance));
                for &arg in &argv {
                    self.push(arg);
                }
                let result = self.call_stack(arg_count + 1);
                if self.has_exception() {
                    return CallResult::Failed;
                }
                if init_is_native {
                    self.pop();
                    self.push(result);
                }
                CallResult::NativeDone
            }
            None if arg_count != 0 => {
                self.runtime_error(
                    self.exceptions.attribute_error,
                    format!(
                        "Class does not have an __init__ but arguments were passed to initializer: {}",
                        arg_count
                    ),
                );
                CallResult::Failed
            }
            None => CallResult::NativeDone,
        }
    }

    // =========================================================================
    // Generator resume
    // =========================================================================

    /// Resume (or exhaust) a generator. A finished generator returns
    /// itself, the identity-based end-of-iteration signal.
    fn resume_generator(&mut self, gen_ref: ObjRef, arg_count: usize, extra: usize) -> CallResult {
        if arg_count != 0 {
            self.runtime_error(
                self.exceptions.type_error,
                "generator takes no arguments when resumed",
            );
            return CallResult::Failed;
        }
        let top = self.thread().stack_top();
        let out_slots = top - arg_count - extra;

        let state = {
            let generator = self.heap.generator_mut(gen_ref).expect("generator body");
            std::mem::replace(&mut generator.state, GenState::Running)
        };
        let closure_ref = self.heap.generator_mut(gen_ref).expect("generator body").closure;
        let (code_ref, globals) = {
            let closure = self.heap.closure(closure_ref).expect("closure body");
            (closure.code, closure.globals)
        };

        let (saved_stack, ip, mut handlers) = match state {
            GenState::Ready { args } => (args, 0, SmallVec::<[Handler; 2]>::new()),
            GenState::Suspended {
                stack,
                ip,
                handlers,
            } => (stack, ip, SmallVec::from_vec(handlers)),
            GenState::Running => {
                self.runtime_error(self.exceptions.value_error, "generator already executing");
                return CallResult::Failed;
            }
            GenState::Finished => {
                // Restore the state we displaced and signal exhaustion.
                self.heap.generator_mut(gen_ref).expect("generator body").state =
                    GenState::Finished;
                self.thread_mut().truncate(out_slots);
                self.push(Value::object(gen_ref));
                return CallResult::NativeDone;
            }
        };

        if self.thread().frames.len() >= self.maximum_call_depth {
            self.runtime_error(self.exceptions.recursion_error, "Maximum recursion depth exceeded");
            return CallResult::Failed;
        }

        let thread = self.thread_mut();
        thread.truncate(out_slots);
        let base = thread.stack_top();
        for value in saved_stack {
            thread.push(value);
        }
        // Handler depths are saved relative to the frame base.
        for handler in handlers.iter_mut() {
            handler.depth += base as u32;
        }
        thread.frames.push(CallFrame {
            closure: closure_ref,
            code: code_ref,
            ip,
            base,
            out_slots,
            globals,
            handlers,
            generator: Some(gen_ref),
        });
        CallResult::Resume
    }
}
