//! Attribute access: the descriptor protocol, method binding, and class
//! finalization.
//!
//! Lookup order on an instance: a data descriptor on the class intercepts
//! first, then the instance's own fields, then the class chain (binding
//! functions, invoking dynamic properties and descriptor getters), then
//! `__getattr__`, and finally `AttributeError`. Writes mirror reads:
//! `__setattr__` overrides, data descriptors intercept, the fields table
//! is the default.

use crate::vm::Vm;
use kuroko_core::{ObjRef, Value};
use kuroko_runtime::{ClassSlots, Heap, ObjBody, ObjFlags, PropertyObj};

impl Vm {
    /// Is `value` a data descriptor (a property with a setter)?
    fn is_data_descriptor(&self, value: Value) -> bool {
        match value.as_object().map(|o| self.heap.body(o)) {
            Some(ObjBody::Property(PropertyObj { setter, .. })) => !setter.is_none(),
            _ => false,
        }
    }

    /// The getter of a property value, if it is one.
    fn property_getter(&self, value: Value) -> Option<Value> {
        match value.as_object().map(|o| self.heap.body(o)) {
            Some(ObjBody::Property(p)) => Some(p.getter),
            _ => None,
        }
    }

    /// The setter of a property value, if it is one and has one.
    fn property_setter(&self, value: Value) -> Option<Value> {
        match value.as_object().map(|o| self.heap.body(o)) {
            Some(ObjBody::Property(p)) if !p.setter.is_none() => Some(p.setter),
            _ => None,
        }
    }

    /// Resolve a class-chain entry against a receiver: descriptor getters
    /// and dynamic properties are invoked, functions are bound, anything
    /// else passes through.
    fn resolve_class_entry(&mut self, receiver: Value, entry: Value) -> Value {
        enum Resolution {
            Getter(Value),
            Dynamic,
            Bind,
            Plain,
        }
        let resolution = match entry.as_object() {
            Some(obj) => match self.heap.body(obj) {
                ObjBody::Property(p) => Resolution::Getter(p.getter),
                ObjBody::Native(_)
                    if self.heap.flags(obj).contains(ObjFlags::IS_DYNAMIC_PROPERTY) =>
                {
                    Resolution::Dynamic
                }
                ObjBody::Closure(_) | ObjBody::Native(_) => Resolution::Bind,
                _ => Resolution::Plain,
            },
            None => Resolution::Plain,
        };
        match resolution {
            Resolution::Getter(getter) => self.call_simple(getter, &[receiver]),
            Resolution::Dynamic => self.call_simple(entry, &[receiver]),
            Resolution::Bind => self.make_bound_method(receiver, entry),
            Resolution::Plain => entry,
        }
    }

    /// Attribute read driven from the stack: the target sits on top and is
    /// replaced by the result. Returns false (stack untouched) when the
    /// attribute does not resolve; the caller raises.
    pub fn value_get_attribute(&mut self, name: Value) -> bool {
        let target = self.peek(0);

        if let Some(obj) = target.as_object() {
            match self.heap.body(obj) {
                ObjBody::Instance(instance) => {
                    let class = instance.class;
                    let class_entry = self.class_chain_lookup(class, name);

                    // Data descriptors win over instance fields.
                    if let Some(entry) = class_entry {
                        if self.is_data_descriptor(entry) {
                            let result = self.resolve_class_entry(target, entry);
                            self.pop();
                            self.push(result);
                            return true;
                        }
                    }

                    let field = self
                        .heap
                        .fields(obj)
                        .and_then(|f| f.get(&self.heap, name));
                    if let Some(value) = field {
                        // A property stored directly on the instance still
                        // acts as an accessor.
                        let result = match self.property_getter(value) {
                            Some(getter) => self.call_simple(getter, &[target]),
                            None => value,
                        };
                        self.pop();
                        self.push(result);
                        return true;
                    }

                    if let Some(entry) = class_entry {
                        let result = self.resolve_class_entry(target, entry);
                        self.pop();
                        self.push(result);
                        return true;
                    }

                    return self.getattr_fallback(class, name);
                }
                ObjBody::Module(module) => {
                    if let Some(value) = module.fields.get(&self.heap, name) {
                        self.pop();
                        self.push(value);
                        return true;
                    }
                    let class = self.base_classes.module;
                    return self.bind_method(class, name);
                }
                ObjBody::Class(_) => {
                    if let Some(entry) = self.class_chain_lookup(obj, name) {
                        let result = match self.property_getter(entry) {
                            Some(getter) => self.call_simple(getter, &[target]),
                            None => entry,
                        };
                        self.pop();
                        self.push(result);
                        return true;
                    }
                    let meta = self.base_classes.type_;
                    return self.bind_method(meta, name);
                }
                _ => {}
            }
        }

        // Every other value resolves against its type's class.
        let class = self.get_type(target);
        if self.bind_method(class, name) {
            return true;
        }
        self.getattr_fallback(class, name)
    }

    /// `__getattr__` as the final fallback.
    fn getattr_fallback(&mut self, class: ObjRef, name: Value) -> bool {
        let Some(getattr) = self.heap.class(class).and_then(|c| c.slots.getattr) else {
            return false;
        };
        let target = self.peek(0);
        let result = self.call_simple(getattr, &[target, name]);
        if self.has_exception() {
            // The fallback itself failed; report that failure.
            self.pop();
            self.push(Value::None);
            return true;
        }
        self.pop();
        self.push(result);
        true
    }

    /// Bind `name` from `class` to the receiver on the stack top,
    /// replacing it. Dynamic properties are invoked instead of bound.
    pub fn bind_method(&mut self, class: ObjRef, name: Value) -> bool {
        let Some(entry) = self.class_chain_lookup(class, name) else {
            return false;
        };
        let receiver = self.peek(0);
        let result = self.resolve_class_entry(receiver, entry);
        self.pop();
        self.push(result);
        true
    }

    /// Attribute write driven from the stack: `[target, value]` becomes
    /// `[value]`. Returns false when the target cannot take attributes.
    pub fn value_set_attribute(&mut self, name: Value) -> bool {
        let value = self.peek(0);
        let target = self.peek(1);

        let Some(obj) = target.as_object() else {
            return false;
        };
        match self.heap.body(obj) {
            ObjBody::Instance(instance) => {
                let class = instance.class;

                if let Some(setattr) = self.heap.class(class).and_then(|c| c.slots.setattr) {
                    self.call_simple(setattr, &[target, name, value]);
                } else if let Some(setter) = self
                    .class_chain_lookup(class, name)
                    .and_then(|e| self.property_setter(e))
                {
                    self.call_simple(setter, &[target, value]);
                } else {
                    let previous = self
                        .heap
                        .fields(obj)
                        .and_then(|f| f.get(&self.heap, name));
                    match previous.and_then(|p| self.property_setter(p)) {
                        Some(setter) => {
                            self.call_simple(setter, &[target, value]);
                        }
                        None => {
                            self.heap.with_table_mut(obj, Heap::sel_fields, |t, heap| {
                                t.set(heap, name, value);
                            });
                        }
                    }
                }
            }
            ObjBody::Module(_) => {
                self.heap.with_table_mut(obj, Heap::sel_fields, |t, heap| {
                    t.set(heap, name, value);
                });
            }
            ObjBody::Class(_) => {
                self.heap.with_table_mut(obj, Heap::sel_methods, |t, heap| {
                    t.set(heap, name, value);
                });
            }
            _ => return false,
        }

        // Leave the assigned value as the expression result.
        self.swap(1);
        self.pop();
        true
    }

    /// Attribute deletion: the target on top is consumed. Returns false
    /// when nothing was deleted.
    pub fn value_del_attribute(&mut self, name: Value) -> bool {
        let target = self.peek(0);
        let Some(obj) = target.as_object() else {
            return false;
        };
        let deleted = match self.heap.body(obj) {
            ObjBody::Instance(instance) => {
                let class = instance.class;
                if let Some(delattr) = self.heap.class(class).and_then(|c| c.slots.delattr) {
                    self.call_simple(delattr, &[target, name]);
                    !self.has_exception()
                } else {
                    self.heap.with_table_mut(obj, Heap::sel_fields, |t, heap| {
                        t.delete(heap, name)
                    })
                }
            }
            ObjBody::Module(_) => self
                .heap
                .with_table_mut(obj, Heap::sel_fields, |t, heap| t.delete(heap, name)),
            ObjBody::Class(_) => self
                .heap
                .with_table_mut(obj, Heap::sel_methods, |t, heap| t.delete(heap, name)),
            _ => false,
        };
        if deleted {
            self.pop();
        }
        deleted
    }

    /// Convenience attribute read on a bare value (the embedding API's
    /// `getattr`). Sets `AttributeError` when missing.
    pub fn get_attribute_of(&mut self, value: Value, name: &str) -> Value {
        let name_value = self.intern(name);
        self.push(value);
        if self.value_get_attribute(name_value) {
            self.pop()
        } else {
            self.pop();
            self.runtime_error(
                self.exceptions.attribute_error,
                format!(
                    "'{}' object has no attribute '{}'",
                    self.type_name(value),
                    name
                ),
            )
        }
    }

    // =========================================================================
    // Class finalization
    // =========================================================================

    /// Populate the cached dunder slots of `class` by scanning its methods
    /// table and base chain. Safe to call repeatedly; the embedding API
    /// and the `FinalizeClass` instruction both land here.
    pub fn finalize_class(&mut self, class: ObjRef) {
        type SlotMut = fn(&mut ClassSlots) -> &mut Option<Value>;
        let names = self.names;
        let table: [(Value, SlotMut); 30] = [
            (names.init, |s| &mut s.init),
            (names.repr, |s| &mut s.repr),
            (names.str_, |s| &mut s.str_),
            (names.getitem, |s| &mut s.getitem),
            (names.setitem, |s| &mut s.setitem),
            (names.delitem, |s| &mut s.delitem),
            (names.eq, |s| &mut s.eq),
            (names.hash, |s| &mut s.hash),
            (names.len, |s| &mut s.len),
            (names.contains, |s| &mut s.contains),
            (names.iter, |s| &mut s.iter),
            (names.call, |s| &mut s.call),
            (names.enter, |s| &mut s.enter),
            (names.exit, |s| &mut s.exit),
            (names.getattr, |s| &mut s.getattr),
            (names.setattr, |s| &mut s.setattr),
            (names.delattr, |s| &mut s.delattr),
            (names.add, |s| &mut s.add),
            (names.sub, |s| &mut s.sub),
            (names.mul, |s| &mut s.mul),
            (names.div, |s| &mut s.div),
            (names.mod_, |s| &mut s.mod_),
            (names.pow, |s| &mut s.pow),
            (names.bitor, |s| &mut s.bitor),
            (names.bitxor, |s| &mut s.bitxor),
            (names.bitand, |s| &mut s.bitand),
            (names.lshift, |s| &mut s.lshift),
            (names.rshift, |s| &mut s.rshift),
            (names.lt, |s| &mut s.lt),
            (names.gt, |s| &mut s.gt),
        ];

        let mut slots = ClassSlots::default();
        for (name, select) in table {
            *select(&mut slots) = self.class_chain_lookup(class, name);
        }
        if let Some(class_obj) = self.heap.class_mut(class) {
            class_obj.slots = Box::new(slots);
        }
    }
}
