//! The dispatch loop.
//!
//! A single loop reads opcodes from the topmost frame and mutates the
//! value stack. After every instruction the exception flag is checked;
//! raising unwinds through the per-frame handler stacks, running `with`
//! cleanups on the way, until a `try` handler or the exit boundary is
//! reached.

use crate::threads::ThreadFlags;
use crate::vm::Vm;
use kuroko_bytecode::{disassemble_instruction, OpCode, LONG_BIT};
use kuroko_core::{ObjRef, Value, KWARGS_DICT, KWARGS_LIST, KWARGS_SINGLE};
use kuroko_runtime::{
    ClassObj, GenState, Handler, HandlerKind, ObjBody, ObjFlags, Table, UpvalueObj, UpvalueState,
};

/// Outcome of an unwind: execution continues in a handler, or the loop
/// exits with the exception still set.
enum Unwound {
    Handled,
    Exit,
}

/// Arithmetic and bitwise binary operators sharing a dispatch shape.
#[derive(Clone, Copy)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    BitOr,
    BitXor,
    BitAnd,
    Shl,
    Shr,
}

impl BinOp {
    fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Pow => "**",
            BinOp::BitOr => "|",
            BinOp::BitXor => "^",
            BinOp::BitAnd => "&",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
        }
    }
}

impl Vm {
    // =========================================================================
    // Instruction fetch
    // =========================================================================

    #[inline]
    fn fetch_byte(&mut self) -> u8 {
        let thread = &mut self.threads[self.current_thread];
        let frame = thread.frames.last_mut().expect("active frame");
        let code_ref = frame.code;
        let ip = frame.ip;
        frame.ip += 1;
        match self.heap.body(code_ref) {
            ObjBody::Code(code) => code.chunk.code[ip],
            _ => unreachable!("frame code is not a code object"),
        }
    }

    #[inline]
    fn fetch_operand(&mut self, width: usize) -> usize {
        let mut out = 0usize;
        for _ in 0..width {
            out = (out << 8) | usize::from(self.fetch_byte());
        }
        out
    }

    fn read_constant(&mut self, width: usize) -> Value {
        let index = self.fetch_operand(width);
        let code_ref = self.frame().code;
        match self.heap.body(code_ref) {
            ObjBody::Code(code) => code.chunk.constants[index],
            _ => unreachable!("frame code is not a code object"),
        }
    }

    #[inline]
    pub(crate) fn frame(&self) -> &crate::threads::CallFrame {
        self.thread().frames.last().expect("active frame")
    }

    #[inline]
    pub(crate) fn frame_mut(&mut self) -> &mut crate::threads::CallFrame {
        self.thread_mut().frames.last_mut().expect("active frame")
    }

    fn adjust_ip(&mut self, delta: isize) {
        let frame = self.frame_mut();
        frame.ip = (frame.ip as isize + delta) as usize;
    }

    // =========================================================================
    // Upvalues
    // =========================================================================

    /// Find or create the open upvalue for an absolute stack slot. The
    /// per-thread list is kept sorted by descending slot.
    pub(crate) fn capture_upvalue(&mut self, slot: usize) -> ObjRef {
        let mut previous: Option<ObjRef> = None;
        let mut current = self.thread().open_upvalues;
        while let Some(upvalue) = current {
            match self.heap.upvalue(upvalue).expect("upvalue body").state {
                UpvalueState::Open(location) if location > slot => {
                    previous = Some(upvalue);
                    current = self.heap.upvalue(upvalue).expect("upvalue body").next;
                }
                _ => break,
            }
        }
        if let Some(upvalue) = current {
            if let UpvalueState::Open(location) =
                self.heap.upvalue(upvalue).expect("upvalue body").state
            {
                if location == slot {
                    return upvalue;
                }
            }
        }
        let created = self.alloc(ObjBody::Upvalue(UpvalueObj {
            state: UpvalueState::Open(slot),
            next: current,
        }));
        match previous {
            None => self.thread_mut().open_upvalues = Some(created),
            Some(prev) => {
                self.heap.upvalue_mut(prev).expect("upvalue body").next = Some(created);
            }
        }
        created
    }

    /// Close every open upvalue at or above `last`, moving the stack
    /// values into the cells.
    pub(crate) fn close_upvalues(&mut self, last: usize) {
        while let Some(head) = self.thread().open_upvalues {
            let location = match self.heap.upvalue(head).expect("upvalue body").state {
                UpvalueState::Open(location) => location,
                UpvalueState::Closed(_) => break,
            };
            if location < last {
                break;
            }
            let value = self.thread().stack[location];
            let next = {
                let cell = self.heap.upvalue_mut(head).expect("upvalue body");
                cell.state = UpvalueState::Closed(value);
                cell.next.take()
            };
            self.thread_mut().open_upvalues = next;
        }
    }

    fn upvalue_load(&self, cell: ObjRef) -> Value {
        match self.heap.upvalue(cell).expect("upvalue body").state {
            UpvalueState::Open(location) => self.thread().stack[location],
            UpvalueState::Closed(value) => value,
        }
    }

    fn upvalue_store(&mut self, cell: ObjRef, value: Value) {
        match self.heap.upvalue(cell).expect("upvalue body").state {
            UpvalueState::Open(location) => self.thread_mut().stack[location] = value,
            UpvalueState::Closed(_) => {
                self.heap.upvalue_mut(cell).expect("upvalue body").state =
                    UpvalueState::Closed(value);
            }
        }
    }

    // =========================================================================
    // The loop
    // =========================================================================

    /// Execute until the current call returns (or the exit boundary is
    /// reached). On an unhandled exception, returns `None` with the
    /// thread's exception state set.
    pub fn run(&mut self) -> Value {
        loop {
            if self.thread().flags.contains(ThreadFlags::SIGNALLED) {
                self.thread_mut().flags.remove(ThreadFlags::SIGNALLED);
                self.runtime_error(self.exceptions.keyboard_interrupt, "Keyboard interrupt");
                match self.unwind() {
                    Unwound::Handled => continue,
                    Unwound::Exit => return Value::None,
                }
            }

            if self.thread().flags.contains(ThreadFlags::ENABLE_TRACING) {
                self.trace_step();
            }

            let fetched = self.fetch_byte();
            let Some(op) = OpCode::from_byte(fetched) else {
                self.runtime_error(
                    self.exceptions.base_exception,
                    format!("Invalid opcode 0x{:02x}", fetched),
                );
                match self.unwind() {
                    Unwound::Handled => continue,
                    Unwound::Exit => return Value::None,
                }
            };
            let width = if fetched & LONG_BIT != 0 { 3 } else { 1 };

            match op {
                // ------------------------------------------------------ stack
                OpCode::Pop => {
                    self.pop();
                }
                OpCode::Dup => {
                    let distance = self.fetch_byte() as usize;
                    let value = self.peek(distance);
                    self.push(value);
                }
                OpCode::Swap => {
                    let distance = self.fetch_byte() as usize;
                    self.swap(distance);
                }
                OpCode::PushNone => self.push(Value::None),
                OpCode::PushTrue => self.push(Value::Bool(true)),
                OpCode::PushFalse => self.push(Value::Bool(false)),
                OpCode::PushNotImpl => self.push(Value::NotImplemented),
                OpCode::Constant => {
                    let value = self.read_constant(width);
                    self.push(value);
                }

                // ------------------------------------------------- comparison
                OpCode::Equal => {
                    let b = self.pop();
                    let a = self.pop();
                    let equal = self.values_equal(a, b);
                    self.push(Value::Bool(equal));
                }
                OpCode::Is => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(Value::Bool(a.values_same(b)));
                }
                OpCode::Less => self.comparison(|a, b| a < b, |a, b| a < b, true),
                OpCode::Greater => self.comparison(|a, b| a > b, |a, b| a > b, false),
                OpCode::Not => {
                    let value = self.pop();
                    let falsey = self.is_falsey_full(value);
                    self.push(Value::Bool(falsey));
                }

                // ------------------------------------------------- arithmetic
                OpCode::Add => self.binary(BinOp::Add),
                OpCode::Subtract => self.binary(BinOp::Sub),
                OpCode::Multiply => self.binary(BinOp::Mul),
                OpCode::Divide => self.binary(BinOp::Div),
                OpCode::Modulo => self.binary(BinOp::Mod),
                OpCode::Pow => self.binary(BinOp::Pow),
                OpCode::BitOr => self.binary(BinOp::BitOr),
                OpCode::BitXor => self.binary(BinOp::BitXor),
                OpCode::BitAnd => self.binary(BinOp::BitAnd),
                OpCode::ShiftLeft => self.binary(BinOp::Shl),
                OpCode::ShiftRight => self.binary(BinOp::Shr),
                OpCode::BitNegate => {
                    let value = self.pop();
                    match value.coerce_int() {
                        Some(i) => self.push(Value::int(!i)),
                        None => {
                            self.runtime_error(
                                self.exceptions.type_error,
                                format!(
                                    "Incompatible operand type for ~: '{}'",
                                    self.type_name(value)
                                ),
                            );
                        }
                    }
                }
                OpCode::Negate => {
                    let value = self.pop();
                    match value {
                        Value::Int(i) => self.push(Value::int(i.wrapping_neg())),
                        Value::Bool(b) => self.push(Value::int(-(b as i64))),
                        Value::Float(f) => self.push(Value::float(-f)),
                        _ => {
                            self.runtime_error(
                                self.exceptions.type_error,
                                format!(
                                    "Incompatible operand type for -: '{}'",
                                    self.type_name(value)
                                ),
                            );
                        }
                    }
                }

                // ---------------------------------------------------- globals
                OpCode::DefineGlobal => {
                    let name = self.read_constant(width);
                    let globals = self.frame().globals;
                    let value = self.peek(0);
                    self.heap
                        .with_table_mut(globals, kuroko_runtime::Heap::sel_fields, |t, heap| {
                            t.set(heap, name, value);
                        });
                    self.pop();
                }
                OpCode::GetGlobal => {
                    let name = self.read_constant(width);
                    let globals = self.frame().globals;
                    let found = self
                        .heap
                        .fields(globals)
                        .and_then(|f| f.get(&self.heap, name))
                        .or_else(|| {
                            // Miss in module scope falls through to the
                            // builtins namespace.
                            self.heap
                                .fields(self.builtins)
                                .and_then(|f| f.get(&self.heap, name))
                        });
                    match found {
                        Some(value) => self.push(value),
                        None => {
                            let text = self.heap.as_str(name).unwrap_or("?").to_string();
                            self.runtime_error(
                                self.exceptions.name_error,
                                format!("Undefined variable '{}'.", text),
                            );
                        }
                    }
                }
                OpCode::SetGlobal => {
                    let name = self.read_constant(width);
                    let globals = self.frame().globals;
                    let value = self.peek(0);
                    let was_new = self
                        .heap
                        .with_table_mut(globals, kuroko_runtime::Heap::sel_fields, |t, heap| {
                            let is_new = t.set(heap, name, value);
                            if is_new {
                                t.delete(heap, name);
                            }
                            is_new
                        });
                    if was_new {
                        let text = self.heap.as_str(name).unwrap_or("?").to_string();
                        self.runtime_error(
                            self.exceptions.name_error,
                            format!("Undefined variable '{}'.", text),
                        );
                    }
                }
                OpCode::DelGlobal => {
                    let name = self.read_constant(width);
                    let globals = self.frame().globals;
                    let deleted = self
                        .heap
                        .with_table_mut(globals, kuroko_runtime::Heap::sel_fields, |t, heap| {
                            t.delete(heap, name)
                        });
                    if !deleted {
                        let text = self.heap.as_str(name).unwrap_or("?").to_string();
                        self.runtime_error(
                            self.exceptions.name_error,
                            format!("Undefined variable '{}'.", text),
                        );
                    }
                }

                // ----------------------------------------------------- locals
                OpCode::GetLocal => {
                    let slot = self.fetch_operand(width);
                    let base = self.frame().base;
                    let value = self.thread().stack[base + slot];
                    self.push(value);
                }
                OpCode::SetLocal => {
                    let slot = self.fetch_operand(width);
                    let base = self.frame().base;
                    let value = self.peek(0);
                    self.thread_mut().stack[base + slot] = value;
                }

                // --------------------------------------------------- upvalues
                OpCode::GetUpvalue => {
                    let slot = self.fetch_operand(width);
                    let closure_ref = self.frame().closure;
                    let cell = self.heap.closure(closure_ref).expect("closure body").upvalues
                        [slot];
                    let value = self.upvalue_load(cell);
                    self.push(value);
                }
                OpCode::SetUpvalue => {
                    let slot = self.fetch_operand(width);
                    let closure_ref = self.frame().closure;
                    let cell = self.heap.closure(closure_ref).expect("closure body").upvalues
                        [slot];
                    let value = self.peek(0);
                    self.upvalue_store(cell, value);
                }
                OpCode::CloseUpvalue => {
                    let top = self.thread().stack_top();
                    self.close_upvalues(top - 1);
                    self.pop();
                }

                // ------------------------------------------------------ jumps
                OpCode::Jump => {
                    let offset = self.fetch_operand(2);
                    self.adjust_ip(offset as isize);
                }
                OpCode::JumpIfFalse => {
                    let offset = self.fetch_operand(2);
                    let condition = self.peek(0);
                    if self.is_falsey_full(condition) {
                        self.adjust_ip(offset as isize);
                    }
                }
                OpCode::JumpIfTrue => {
                    let offset = self.fetch_operand(2);
                    let condition = self.peek(0);
                    if !self.is_falsey_full(condition) {
                        self.adjust_ip(offset as isize);
                    }
                }
                OpCode::Loop => {
                    let offset = self.fetch_operand(2);
                    self.adjust_ip(-(offset as isize));
                }

                // ------------------------------------------------- exceptions
                OpCode::PushTry => {
                    let offset = self.fetch_operand(2);
                    let target = (self.frame().ip + offset) as u32;
                    let depth = self.thread().stack_top() as u32;
                    self.frame_mut().handlers.push(Handler {
                        kind: HandlerKind::Try,
                        target,
                        depth,
                    });
                }
                OpCode::PopTry => {
                    self.frame_mut().handlers.pop();
                }
                OpCode::Raise => {
                    let value = self.pop();
                    self.raise_value(value);
                }

                // ------------------------------------------------------- with
                OpCode::PushWith => {
                    let offset = self.fetch_operand(2);
                    let target = (self.frame().ip + offset) as u32;
                    let manager = self.peek(0);
                    let enter = self.slot_of(manager, |s| s.enter);
                    let exit = self.slot_of(manager, |s| s.exit);
                    match (enter, exit) {
                        (Some(enter), Some(_)) => {
                            self.call_simple(enter, &[manager]);
                            if !self.has_exception() {
                                let depth = self.thread().stack_top() as u32;
                                self.frame_mut().handlers.push(Handler {
                                    kind: HandlerKind::With,
                                    target,
                                    depth,
                                });
                            }
                        }
                        _ => {
                            self.runtime_error(
                                self.exceptions.attribute_error,
                                format!(
                                    "Can not use '{}' as context manager",
                                    self.type_name(manager)
                                ),
                            );
                        }
                    }
                }
                OpCode::CleanupWith => {
                    self.frame_mut().handlers.pop();
                    let manager = self.peek(0);
                    if let Some(exit) = self.slot_of(manager, |s| s.exit) {
                        self.call_simple(exit, &[manager]);
                    }
                    if !self.has_exception() {
                        self.pop();
                    }
                }

                // ------------------------------------------------------ calls
                OpCode::Call => {
                    let arg_count = self.fetch_operand(width);
                    let callee = self.peek(arg_count);
                    self.call_value(callee, arg_count, 1);
                }
                OpCode::CallStack => {
                    match self.pop().as_int() {
                        Some(arg_count) => {
                            let arg_count = arg_count as usize;
                            let callee = self.peek(arg_count);
                            self.call_value(callee, arg_count, 1);
                        }
                        None => {
                            self.runtime_error(
                                self.exceptions.type_error,
                                "Call arity must be an integer",
                            );
                        }
                    }
                }
                OpCode::ExpandArgs => {
                    let kind = self.fetch_byte();
                    let marker = match kind {
                        0 => KWARGS_SINGLE,
                        1 => KWARGS_LIST,
                        _ => KWARGS_DICT,
                    };
                    self.push(Value::kwargs(marker));
                }
                OpCode::Kwargs => {
                    let count = self.fetch_operand(width);
                    self.push(Value::kwargs(count as u32));
                }
                OpCode::Return => {
                    if let Some(result) = self.op_return() {
                        return result;
                    }
                }
                OpCode::Yield => {
                    if let Some(result) = self.op_yield() {
                        return result;
                    }
                }

                // --------------------------------------------------- closures
                OpCode::Closure => {
                    let code_value = self.read_constant(width);
                    self.op_closure(code_value);
                }

                // ---------------------------------------------------- classes
                OpCode::Class => {
                    let name = self.read_constant(width);
                    self.op_class(name);
                }
                OpCode::Method => {
                    let name = self.read_constant(width);
                    let method = self.peek(0);
                    let class = self.peek(1).as_object().expect("class on stack");
                    self.heap
                        .with_table_mut(class, kuroko_runtime::Heap::sel_methods, |t, heap| {
                            t.set(heap, name, method);
                        });
                    self.pop();
                }
                OpCode::FinalizeClass => {
                    let class = self.peek(0).as_object().expect("class on stack");
                    self.finalize_class(class);
                    self.pop();
                }
                OpCode::Inherit => {
                    self.op_inherit();
                }
                OpCode::Docstring => {
                    let doc = self.pop();
                    let class = self.peek(0).as_object().expect("class on stack");
                    if let Some(class_obj) = self.heap.class_mut(class) {
                        class_obj.docstring = doc;
                    }
                }
                OpCode::CreateProperty => {
                    let with_setter = self.fetch_byte() != 0;
                    let setter = if with_setter { self.pop() } else { Value::None };
                    let getter = self.pop();
                    // Operands stay reachable through the locals that
                    // produced them only if still on the stack, so shield
                    // them in scratch across the allocation.
                    self.thread_mut().scratch[0] = getter;
                    self.thread_mut().scratch[1] = setter;
                    let property = self.alloc(ObjBody::Property(kuroko_runtime::PropertyObj {
                        getter,
                        setter,
                    }));
                    self.thread_mut().scratch[0] = Value::None;
                    self.thread_mut().scratch[1] = Value::None;
                    self.push(Value::object(property));
                }
                OpCode::GetSuper => {
                    let name = self.read_constant(width);
                    let superclass = self.pop().as_object().expect("superclass on stack");
                    if !self.bind_method(superclass, name) {
                        let class_name = self
                            .heap
                            .class(superclass)
                            .and_then(|c| self.heap.as_str(c.name))
                            .unwrap_or("?")
                            .to_string();
                        let attr = self.heap.as_str(name).unwrap_or("?").to_string();
                        self.runtime_error(
                            self.exceptions.attribute_error,
                            format!("super({}) has no attribute '{}'", class_name, attr),
                        );
                    }
                }

                // ------------------------------------------------- attributes
                OpCode::GetProperty => {
                    let name = self.read_constant(width);
                    if !self.value_get_attribute(name) {
                        let target = self.peek(0);
                        let attr = self.heap.as_str(name).unwrap_or("?").to_string();
                        self.runtime_error(
                            self.exceptions.attribute_error,
                            format!(
                                "'{}' object has no attribute '{}'",
                                self.type_name(target),
                                attr
                            ),
                        );
                    }
                }
                OpCode::SetProperty => {
                    let name = self.read_constant(width);
                    if !self.value_set_attribute(name) {
                        let target = self.peek(1);
                        let attr = self.heap.as_str(name).unwrap_or("?").to_string();
                        self.runtime_error(
                            self.exceptions.attribute_error,
                            format!(
                                "'{}' object has no attribute '{}'",
                                self.type_name(target),
                                attr
                            ),
                        );
                    }
                }
                OpCode::DelProperty => {
                    let name = self.read_constant(width);
                    if !self.value_del_attribute(name) {
                        let target = self.peek(0);
                        let attr = self.heap.as_str(name).unwrap_or("?").to_string();
                        self.runtime_error(
                            self.exceptions.attribute_error,
                            format!(
                                "'{}' object has no attribute '{}'",
                                self.type_name(target),
                                attr
                            ),
                        );
                    }
                }

                // --------------------------------------------------- indexing
                OpCode::InvokeGetter => {
                    let target = self.peek(1);
                    match self.slot_of(target, |s| s.getitem) {
                        Some(method) => {
                            let key = self.peek(0);
                            let result = self.call_simple(method, &[target, key]);
                            self.pop();
                            self.pop();
                            self.push(result);
                        }
                        None => {
                            self.runtime_error(
                                self.exceptions.attribute_error,
                                format!(
                                    "'{}' object is not subscriptable",
                                    self.type_name(target)
                                ),
                            );
                        }
                    }
                }
                OpCode::InvokeSetter => {
                    let target = self.peek(2);
                    match self.slot_of(target, |s| s.setitem) {
                        Some(method) => {
                            let key = self.peek(1);
                            let value = self.peek(0);
                            let result = self.call_simple(method, &[target, key, value]);
                            self.pop();
                            self.pop();
                            self.pop();
                            self.push(result);
                        }
                        None => {
                            let message = if self.slot_of(target, |s| s.getitem).is_some() {
                                format!("'{}' object is not mutable", self.type_name(target))
                            } else {
                                format!("'{}' object is not subscriptable", self.type_name(target))
                            };
                            self.runtime_error(self.exceptions.attribute_error, message);
                        }
                    }
                }
                OpCode::InvokeDelete => {
                    let target = self.peek(1);
                    match self.slot_of(target, |s| s.delitem) {
                        Some(method) => {
                            let key = self.peek(0);
                            self.call_simple(method, &[target, key]);
                            self.pop();
                            self.pop();
                        }
                        None => {
                            let message = if self.slot_of(target, |s| s.getitem).is_some() {
                                format!("'{}' object is not mutable", self.type_name(target))
                            } else {
                                format!("'{}' object is not subscriptable", self.type_name(target))
                            };
                            self.runtime_error(self.exceptions.attribute_error, message);
                        }
                    }
                }
                OpCode::InvokeGetSlice => {
                    self.op_get_slice();
                }

                // -------------------------------------------------- iteration
                OpCode::GetIter => {
                    let target = self.peek(0);
                    match self.slot_of(target, |s| s.iter) {
                        Some(method) => {
                            let iterator = self.call_simple(method, &[target]);
                            if !self.has_exception() {
                                self.pop();
                                self.push(iterator);
                            }
                        }
                        None => {
                            self.runtime_error(
                                self.exceptions.type_error,
                                format!("'{}' object is not iterable", self.type_name(target)),
                            );
                        }
                    }
                }
                OpCode::ForIter => {
                    let offset = self.fetch_operand(2);
                    let iterator = self.peek(0);
                    self.push(iterator);
                    let result = self.call_stack(0);
                    if !self.has_exception() {
                        if result.values_same(iterator) {
                            // Exhausted: the iterator returned itself.
                            self.adjust_ip(offset as isize);
                        } else {
                            self.push(result);
                        }
                    }
                }

                // ---------------------------------------------------- modules
                OpCode::Import => {
                    let name = self.read_constant(width);
                    self.op_import(name);
                }
                OpCode::ImportFrom => {
                    let name = self.read_constant(width);
                    self.op_import_from(name);
                }

                // ------------------------------------------------- aggregates
                OpCode::MakeTuple => {
                    let count = self.fetch_operand(width);
                    let top = self.thread().stack_top();
                    let values: Box<[Value]> =
                        self.thread().stack[top - count..top].to_vec().into();
                    let tuple = self.make_tuple(values);
                    self.thread_mut().truncate(top - count);
                    self.push(tuple);
                }
                OpCode::Unpack => {
                    let count = self.fetch_operand(width);
                    self.op_unpack(count);
                }
            }

            if self.thread().has_exception() {
                match self.unwind() {
                    Unwound::Handled => continue,
                    Unwound::Exit => return Value::None,
                }
            }
        }
    }

    // =========================================================================
    // Multi-step opcode bodies
    // =========================================================================

    /// Return from the current frame: run pending `with` cleanups, close
    /// upvalues, pop the frame, and either push the result for the caller
    /// or exit the loop at a boundary.
    fn op_return(&mut self) -> Option<Value> {
        let result = self.pop();
        self.thread_mut().scratch[2] = result;

        // Pending with-blocks release innermost first.
        while let Some(handler) = self.frame_mut().handlers.pop() {
            if handler.kind != HandlerKind::With {
                continue;
            }
            self.thread_mut().truncate(handler.depth as usize);
            let manager = self.peek(0);
            if let Some(exit) = self.slot_of(manager, |s| s.exit) {
                self.call_simple(exit, &[manager]);
            }
            self.pop();
            if self.has_exception() {
                self.thread_mut().scratch[2] = Value::None;
                return None;
            }
        }
        let mut result = std::mem::replace(&mut self.thread_mut().scratch[2], Value::None);

        let frame = self.thread_mut().frames.pop().expect("active frame");
        self.close_upvalues(frame.base);
        if let Some(generator) = frame.generator {
            if let Some(gen) = self.heap.generator_mut(generator) {
                gen.state = GenState::Finished;
            }
            // End of iteration is signalled by identity: a finished
            // generator hands back itself, not its return value.
            result = Value::object(generator);
        }
        self.thread_mut().truncate(frame.out_slots);

        let remaining = self.thread().frames.len();
        if remaining == 0 || self.thread().exit_on_frame == Some(remaining) {
            return Some(result);
        }
        self.push(result);
        None
    }

    /// Yield from a generator frame: save the frame image back into the
    /// generator object and deliver the value to the caller.
    fn op_yield(&mut self) -> Option<Value> {
        let value = self.pop();
        let generator = self
            .frame()
            .generator
            .expect("yield outside a generator frame");
        let base = self.frame().base;
        self.close_upvalues(base);

        let frame = self.thread_mut().frames.pop().expect("active frame");
        let saved: Vec<Value> = self.thread().stack[base..].to_vec();
        let handlers: Vec<Handler> = frame
            .handlers
            .iter()
            .map(|h| Handler {
                depth: h.depth - base as u32,
                ..*h
            })
            .collect();
        if let Some(gen) = self.heap.generator_mut(generator) {
            gen.state = GenState::Suspended {
                stack: saved,
                ip: frame.ip,
                handlers,
            };
        }
        self.thread_mut().truncate(frame.out_slots);

        let remaining = self.thread().frames.len();
        if remaining == 0 || self.thread().exit_on_frame == Some(remaining) {
            return Some(value);
        }
        self.push(value);
        None
    }

    /// Build a closure from a code constant, capturing upvalues per the
    /// code object's descriptors.
    fn op_closure(&mut self, code_value: Value) {
        let Some(code_ref) = code_value.as_object() else {
            self.runtime_error(self.exceptions.type_error, "closure over a non-code constant");
            return;
        };
        let globals = self.frame().globals;
        let closure = self.make_closure(code_ref, globals);
        self.push(Value::object(closure));

        let descriptors = self
            .heap
            .code(code_ref)
            .expect("code body")
            .upvalues
            .clone();
        let base = self.frame().base;
        let enclosing = self.frame().closure;
        for descriptor in descriptors {
            let cell = if descriptor.is_local {
                self.capture_upvalue(base + descriptor.index as usize)
            } else {
                self.heap.closure(enclosing).expect("closure body").upvalues
                    [descriptor.index as usize]
            };
            if let Some(closure_obj) = match self.heap.body_mut(closure) {
                ObjBody::Closure(c) => Some(c),
                _ => None,
            } {
                closure_obj.upvalues.push(cell);
            }
        }
    }

    /// Create a bare class inheriting `object`.
    fn op_class(&mut self, name: Value) {
        let filename = {
            let code_ref = self.frame().code;
            self.heap
                .code(code_ref)
                .map(|c| c.filename.to_string())
                .unwrap_or_default()
        };
        self.heap.pause_gc();
        let filename_value = self.heap.intern(&filename);
        let base = self.base_classes.object_;
        let class = self.heap.alloc_raw(ObjBody::Class(ClassObj {
            name,
            base: Some(base),
            methods: Table::new(),
            alloc: Default::default(),
            subclasses: Vec::new(),
            docstring: Value::None,
            filename: filename_value,
            slots: Box::default(),
        }));
        if let Some(base_class) = self.heap.class_mut(base) {
            base_class.subclasses.push(class);
        }
        self.heap.resume_gc();
        self.push(Value::object(class));
    }

    /// Re-parent the class below the top of the stack to the base class on
    /// top. Single inheritance only; the chain stays acyclic because the
    /// base must already be a finished class.
    fn op_inherit(&mut self) {
        let base_value = self.peek(0);
        let Some(base) = base_value.as_object().filter(|&o| self.heap.class(o).is_some())
        else {
            self.runtime_error(
                self.exceptions.type_error,
                format!(
                    "Superclass must be a class, not '{}'",
                    self.type_name(base_value)
                ),
            );
            return;
        };
        if self.heap.flags(base).contains(ObjFlags::NO_INHERIT) {
            let name = self
                .heap
                .class(base)
                .and_then(|c| self.heap.as_str(c.name))
                .unwrap_or("?")
                .to_string();
            self.runtime_error(
                self.exceptions.type_error,
                format!("'{}' can not be subclassed", name),
            );
            return;
        }
        let subclass = self.peek(1).as_object().expect("class on stack");

        // Unregister from the placeholder base before re-parenting.
        let old_base = self.heap.class(subclass).and_then(|c| c.base);
        if let Some(old) = old_base {
            if let Some(old_class) = self.heap.class_mut(old) {
                old_class.subclasses.retain(|&c| c != subclass);
            }
        }
        let alloc = self.heap.class(base).map(|c| c.alloc).unwrap_or_default();
        if let Some(sub) = self.heap.class_mut(subclass) {
            sub.base = Some(base);
            sub.alloc = alloc;
        }
        if let Some(base_class) = self.heap.class_mut(base) {
            base_class.subclasses.push(subclass);
        }
        self.pop();
    }

    /// Slice expression: materialize a slice object and defer to
    /// `__getitem__`.
    fn op_get_slice(&mut self) {
        let target = self.peek(2);
        let Some(getitem) = self.slot_of(target, |s| s.getitem) else {
            self.runtime_error(
                self.exceptions.attribute_error,
                format!("'{}' object is not sliceable", self.type_name(target)),
            );
            return;
        };
        let low = self.peek(1);
        let high = self.peek(0);
        let slice_class = self.base_classes.slice;
        let slice = self.make_instance(slice_class);
        self.push(Value::object(slice));
        for (field, value) in [("start", low), ("stop", high), ("step", Value::None)] {
            self.attach_named_value(crate::vm::TargetTable::Fields(slice), field, value);
        }
        self.pop();
        let result = self.call_simple(getitem, &[target, Value::object(slice)]);
        self.pop();
        self.pop();
        self.pop();
        self.push(result);
    }

    /// Unpack a sequence into `count` stack slots.
    fn op_unpack(&mut self, count: usize) {
        let sequence = self.peek(0);
        let values: Option<Vec<Value>> = match sequence.as_object() {
            Some(obj) => {
                if let Some(values) = self.heap.tuple_values(obj) {
                    Some(values.to_vec())
                } else if let Some(values) = self.heap.list_values(obj) {
                    Some(values.clone())
                } else {
                    None
                }
            }
            None => None,
        };
        let values = match values {
            Some(values) => values,
            None => {
                if self.slot_of(sequence, |s| s.iter).is_none() {
                    self.runtime_error(
                        self.exceptions.type_error,
                        format!("Can not unpack non-iterable '{}'", self.type_name(sequence)),
                    );
                    return;
                }
                self.heap.pause_gc();
                let collected = self.iterate_collect(sequence);
                self.heap.resume_gc();
                match collected {
                    Some(values) => values,
                    None => return,
                }
            }
        };
        if values.len() != count {
            self.runtime_error(
                self.exceptions.value_error,
                format!(
                    "Wrong number of values to unpack (wanted {}, got {})",
                    count,
                    values.len()
                ),
            );
            return;
        }
        self.pop();
        for value in values {
            self.push(value);
        }
    }

    // =========================================================================
    // Binary operator helpers
    // =========================================================================

    fn binary(&mut self, op: BinOp) {
        let b = self.pop();
        let a = self.pop();

        // Division and modulo refuse a zero right operand before any
        // dispatch.
        if matches!(op, BinOp::Div | BinOp::Mod) {
            if b.coerce_int() == Some(0) {
                self.runtime_error(
                    self.exceptions.zero_division_error,
                    "integer division or modulo by zero",
                );
                return;
            }
            if b.as_float() == Some(0.0) {
                self.runtime_error(self.exceptions.zero_division_error, "float division by zero");
                return;
            }
        }

        if let (Some(x), Some(y)) = (a.coerce_int(), b.coerce_int()) {
            let result = match op {
                BinOp::Add => x.wrapping_add(y),
                BinOp::Sub => x.wrapping_sub(y),
                BinOp::Mul => x.wrapping_mul(y),
                BinOp::Div => x.wrapping_div(y),
                BinOp::Mod => x.wrapping_rem(y),
                BinOp::BitOr => x | y,
                BinOp::BitXor => x ^ y,
                BinOp::BitAnd => x & y,
                BinOp::Shl => x.wrapping_shl(y as u32),
                BinOp::Shr => x.wrapping_shr(y as u32),
                BinOp::Pow => {
                    if y >= 0 {
                        x.wrapping_pow(y as u32)
                    } else {
                        self.push(Value::float((x as f64).powi(y as i32)));
                        return;
                    }
                }
            };
            self.push(Value::int(result));
            return;
        }

        if a.is_number() && b.is_number() {
            let x = a.coerce_float().expect("numeric");
            let y = b.coerce_float().expect("numeric");
            let result = match op {
                BinOp::Add => Some(x + y),
                BinOp::Sub => Some(x - y),
                BinOp::Mul => Some(x * y),
                BinOp::Div => Some(x / y),
                BinOp::Mod => Some(x % y),
                BinOp::Pow => Some(x.powf(y)),
                // Bit operations are invalid on floats; dispatch below
                // raises the TypeError.
                _ => None,
            };
            if let Some(result) = result {
                self.push(Value::float(result));
                return;
            }
        }

        let (get, reflected): (crate::values::SlotGetter, Value) = match op {
            BinOp::Add => (|s| s.add, self.names.radd),
            BinOp::Sub => (|s| s.sub, self.names.rsub),
            BinOp::Mul => (|s| s.mul, self.names.rmul),
            BinOp::Div => (|s| s.div, self.names.rdiv),
            BinOp::Mod => (|s| s.mod_, self.names.rmod),
            BinOp::Pow => (|s| s.pow, self.names.rpow),
            BinOp::BitOr => (|s| s.bitor, self.names.rbitor),
            BinOp::BitXor => (|s| s.bitxor, self.names.rbitxor),
            BinOp::BitAnd => (|s| s.bitand, self.names.rbitand),
            BinOp::Shl => (|s| s.lshift, self.names.rlshift),
            BinOp::Shr => (|s| s.rshift, self.names.rrshift),
        };
        let result = self.binary_dunder(a, b, get, reflected, op.symbol());
        if !self.has_exception() {
            self.push(result);
        }
    }

    fn comparison(
        &mut self,
        int_cmp: fn(i64, i64) -> bool,
        float_cmp: fn(f64, f64) -> bool,
        less: bool,
    ) {
        let b = self.pop();
        let a = self.pop();
        if let (Some(x), Some(y)) = (a.coerce_int(), b.coerce_int()) {
            self.push(Value::Bool(int_cmp(x, y)));
            return;
        }
        if let (Some(x), Some(y)) = (a.coerce_float(), b.coerce_float()) {
            self.push(Value::Bool(float_cmp(x, y)));
            return;
        }
        let result = if less {
            self.compare_dunder(a, b, |s| s.lt, |s| s.gt, "<")
        } else {
            self.compare_dunder(a, b, |s| s.gt, |s| s.lt, ">")
        };
        if !self.has_exception() {
            self.push(result);
        }
    }

    // =========================================================================
    // Unwinding
    // =========================================================================

    /// Walk frames from the top looking for a handler. `with` records run
    /// their cleanup and the search continues; `try` records receive the
    /// exception. Frames below the exit boundary are never popped.
    fn unwind(&mut self) -> Unwound {
        loop {
            if self.thread().frames.is_empty() {
                return Unwound::Exit;
            }

            if let Some(handler) = self.frame_mut().handlers.pop() {
                match handler.kind {
                    HandlerKind::Try => {
                        let exception = self.thread_mut().take_exception();
                        self.close_upvalues(handler.depth as usize);
                        self.thread_mut().truncate(handler.depth as usize);
                        self.push(exception);
                        self.frame_mut().ip = handler.target as usize;
                        return Unwound::Handled;
                    }
                    HandlerKind::With => {
                        // Run the cleanup, then keep unwinding with the
                        // original (or replacing) exception.
                        let pending = self.thread_mut().take_exception();
                        self.close_upvalues(handler.depth as usize);
                        self.thread_mut().truncate(handler.depth as usize);
                        let manager = self.peek(0);
                        if let Some(exit) = self.slot_of(manager, |s| s.exit) {
                            self.call_simple(exit, &[manager]);
                        }
                        self.pop();
                        if !self.has_exception() {
                            self.thread_mut().set_exception(pending);
                        }
                        continue;
                    }
                }
            }

            // No handler in this frame. Stop at the exit boundary, else
            // pop and keep looking.
            let remaining = self.thread().frames.len();
            if self.thread().exit_on_frame == Some(remaining - 1)
                || self.thread().exit_on_frame == Some(remaining)
            {
                return Unwound::Exit;
            }
            let frame = self.thread_mut().frames.pop().expect("active frame");
            self.close_upvalues(frame.base);
            if let Some(generator) = frame.generator {
                if let Some(gen) = self.heap.generator_mut(generator) {
                    gen.state = GenState::Finished;
                }
            }
            self.thread_mut().truncate(frame.out_slots);
        }
    }

    // =========================================================================
    // Tracing
    // =========================================================================

    /// Dump the stack and the next instruction to stderr.
    fn trace_step(&mut self) {
        let thread = self.thread();
        let mut stack_render = String::from("          ");
        for value in &thread.stack {
            stack_render.push_str(&format!("[ {} ]", value));
        }
        eprintln!("{}", stack_render);

        let frame = self.frame();
        let ip = frame.ip;
        if let Some(code) = self.heap.code(frame.code) {
            let (text, _) = disassemble_instruction(code, ip);
            eprintln!("          {:06} {}", ip, text);
        }
    }
}
