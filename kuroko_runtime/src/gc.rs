//! Stop-the-world mark-and-sweep collection.
//!
//! The VM gathers every root value (thread stacks, frame closures and
//! globals, in-flight exceptions, scratch slots, the module cache, the
//! built-in class and exception tables, cached special-method names) and
//! hands them to [`Heap::collect`]. Marking is tri-color: marking an
//! object grays it onto the worklist, and tracing blackens each gray
//! object by marking everything it references. The intern set is swept of
//! dead strings before the general sweep so no dangling interned entry
//! survives. Class subclass lists are weak: never marked through, pruned
//! here.
//!
//! There are no user-visible finalizers; sweeping releases native payloads
//! (vectors, tables, byte buffers) and nothing else. `__del__` is never
//! consulted.

use crate::heap::{object_bytes, Heap, HEAP_GROWTH_KNEE, MIN_HEAP};
use crate::object::{GenState, ObjBody, ObjFlags, Payload};
use kuroko_core::{ObjRef, Value};

/// Collector statistics, updated at every collection.
#[derive(Debug, Default, Clone, Copy)]
pub struct GcStats {
    /// Completed collections.
    pub collections: usize,
    /// Objects freed across all collections.
    pub total_freed: usize,
    /// Objects freed by the most recent collection.
    pub last_freed: usize,
    /// Bytes reclaimed by the most recent collection.
    pub last_reclaimed: usize,
}

impl Heap {
    /// Mark one object reachable, graying it for the trace phase.
    pub fn mark_object(&mut self, obj: ObjRef) {
        let (slots, gray) = self.slots_raw();
        let Some(slot) = slots[obj.index()].as_mut() else {
            return;
        };
        if slot.flags.contains(ObjFlags::MARKED) {
            return;
        }
        slot.flags.insert(ObjFlags::MARKED);
        gray.push(obj);
    }

    /// Mark the object behind `value`, if any.
    #[inline]
    pub fn mark_value(&mut self, value: Value) {
        if let Value::Object(obj) = value {
            self.mark_object(obj);
        }
    }

    /// Run a full collection with the given roots. Returns the number of
    /// objects freed.
    pub fn collect(&mut self, roots: &[Value]) -> usize {
        let bytes_before = self.bytes_allocated;

        for &root in roots {
            self.mark_value(root);
        }
        self.trace();

        self.prune_weak_subclasses();
        self.sweep_strings();
        let freed = self.sweep();

        self.next_gc = if self.bytes_allocated < HEAP_GROWTH_KNEE {
            (self.bytes_allocated * 2).max(MIN_HEAP)
        } else {
            self.bytes_allocated + HEAP_GROWTH_KNEE
        };

        self.stats.collections += 1;
        self.stats.total_freed += freed;
        self.stats.last_freed = freed;
        self.stats.last_reclaimed = bytes_before.saturating_sub(self.bytes_allocated);

        if self.report {
            eprintln!(
                "[gc] freed {} objects; {} -> {} bytes; next collection at {}",
                freed, bytes_before, self.bytes_allocated, self.next_gc
            );
        }
        freed
    }

    /// Drain the gray worklist, blackening each object.
    fn trace(&mut self) {
        while let Some(obj) = self.gray.pop() {
            self.blacken(obj);
        }
    }

    /// Blacken one object: mark everything it references. References are
    /// first collected into a scratch buffer so the body borrow ends
    /// before the marks mutate other slots.
    fn blacken(&mut self, obj: ObjRef) {
        let mut buf = std::mem::take(&mut self.scan_buf);
        debug_assert!(buf.is_empty());
        collect_refs(&self.slot(obj).body, &mut buf);
        for value in buf.drain(..) {
            self.mark_value(value);
        }
        self.scan_buf = buf;
    }

    /// Drop references to dead classes from the weak subclass lists of
    /// live ones.
    fn prune_weak_subclasses(&mut self) {
        let marked: Vec<bool> = self
            .all_slots()
            .iter()
            .map(|s| {
                s.as_ref()
                    .map_or(false, |b| b.flags.contains(ObjFlags::MARKED))
            })
            .collect();
        let (slots, _) = self.slots_raw();
        for slot in slots.iter_mut().flatten() {
            if let ObjBody::Class(class) = &mut slot.body {
                class.subclasses.retain(|r| marked[r.index()]);
            }
        }
    }

    /// Tombstone intern entries whose strings died this cycle, ahead of
    /// the general sweep.
    fn sweep_strings(&mut self) {
        let mut strings = std::mem::take(&mut self.strings);
        strings.sweep_unmarked(|obj| self.is_marked(obj));
        self.strings = strings;
    }

    /// Free every unmarked object and clear marks on survivors. The live
    /// byte total is recomputed here, correcting any mutator-side drift
    /// since the last collection.
    fn sweep(&mut self) -> usize {
        let mut freed = Vec::new();
        let mut live_bytes = 0;
        {
            let (slots, _) = self.slots_raw();
            for (index, entry) in slots.iter_mut().enumerate() {
                match entry {
                    Some(slot) if slot.flags.contains(ObjFlags::MARKED) => {
                        slot.flags.remove(ObjFlags::MARKED);
                        live_bytes += object_bytes(&slot.body);
                    }
                    Some(_) => {
                        *entry = None;
                        freed.push(index as u32);
                    }
                    None => {}
                }
            }
        }
        self.free_list().extend_from_slice(&freed);
        self.bytes_allocated = live_bytes;
        freed.len()
    }
}

/// Append every value `body` references to `out`. This is the polymorphic
/// scan function of the object protocol: each variant knows its own
/// references, including embedded instance payloads.
fn collect_refs(body: &ObjBody, out: &mut Vec<Value>) {
    match body {
        ObjBody::Str(_) | ObjBody::Bytes(_) | ObjBody::Native(_) => {}
        ObjBody::Tuple(t) => out.extend_from_slice(&t.values),
        ObjBody::List(l) => out.extend_from_slice(&l.values),
        ObjBody::Dict(d) => {
            for (k, v) in d.table.iter() {
                out.push(k);
                out.push(v);
            }
        }
        ObjBody::Code(c) => {
            out.extend_from_slice(&c.chunk.constants);
            out.extend_from_slice(&c.arg_names);
        }
        ObjBody::Closure(c) => {
            out.push(Value::object(c.code));
            out.push(Value::object(c.globals));
            out.extend(c.upvalues.iter().map(|&u| Value::object(u)));
            out.extend_from_slice(&c.defaults);
            out.extend_from_slice(&c.keyword_defaults);
            out.push(c.annotations);
        }
        ObjBody::BoundMethod(b) => {
            out.push(b.receiver);
            out.push(b.method);
        }
        ObjBody::Class(c) => {
            out.push(c.name);
            out.push(c.docstring);
            out.push(c.filename);
            if let Some(base) = c.base {
                out.push(Value::object(base));
            }
            for (k, v) in c.methods.iter() {
                out.push(k);
                out.push(v);
            }
            c.slots.collect_into(out);
            // subclasses are weak: deliberately not collected.
        }
        ObjBody::Instance(i) => {
            out.push(Value::object(i.class));
            for (k, v) in i.fields.iter() {
                out.push(k);
                out.push(v);
            }
            match &i.payload {
                Payload::None | Payload::Str(_) => {}
                Payload::List(values) => out.extend_from_slice(values),
                Payload::Tuple(values) => out.extend_from_slice(values),
                Payload::Dict(table) => {
                    for (k, v) in table.iter() {
                        out.push(k);
                        out.push(v);
                    }
                }
            }
        }
        ObjBody::Module(m) => {
            out.push(m.name);
            for (k, v) in m.fields.iter() {
                out.push(k);
                out.push(v);
            }
        }
        ObjBody::Upvalue(u) => {
            if let crate::object::UpvalueState::Closed(value) = u.state {
                out.push(value);
            }
        }
        ObjBody::Property(p) => {
            out.push(p.getter);
            out.push(p.setter);
        }
        ObjBody::Generator(g) => {
            out.push(Value::object(g.closure));
            match &g.state {
                GenState::Ready { args } => out.extend_from_slice(args),
                GenState::Suspended { stack, .. } => out.extend_from_slice(stack),
                GenState::Running | GenState::Finished => {}
            }
        }
    }
}

impl crate::object::ClassSlots {
    /// Append every cached slot value to `out`; used by the scan pass.
    pub(crate) fn collect_into(&self, out: &mut Vec<Value>) {
        let all = [
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
        ];
        out.extend(all.into_iter().flatten());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{ListObj, TupleObj};

    #[test]
    fn unreachable_objects_are_freed() {
        let mut heap = Heap::new();
        let keep = heap.alloc_raw(ObjBody::List(ListObj::default()));
        heap.alloc_raw(ObjBody::List(ListObj::default()));
        heap.alloc_raw(ObjBody::List(ListObj::default()));

        let freed = heap.collect(&[Value::object(keep)]);
        assert_eq!(freed, 2);
        assert_eq!(heap.live_objects(), 1);
        // The survivor is intact and unmarked.
        assert!(heap.list_values(keep).is_some());
        assert!(!heap.is_marked(keep));
    }

    #[test]
    fn marking_traverses_containers() {
        let mut heap = Heap::new();
        let inner = heap.alloc_raw(ObjBody::Tuple(TupleObj {
            values: Box::from([Value::int(1)]),
        }));
        let outer = heap.alloc_raw(ObjBody::List(ListObj {
            values: vec![Value::object(inner)],
        }));

        heap.collect(&[Value::object(outer)]);
        assert_eq!(heap.live_objects(), 2);
    }

    #[test]
    fn cycles_are_collected() {
        let mut heap = Heap::new();
        let a = heap.alloc_raw(ObjBody::List(ListObj::default()));
        let b = heap.alloc_raw(ObjBody::List(ListObj {
            values: vec![Value::object(a)],
        }));
        heap.list_values_mut(a).unwrap().push(Value::object(b));

        // Reachable cycle survives.
        heap.collect(&[Value::object(a)]);
        assert_eq!(heap.live_objects(), 2);

        // Unreachable cycle dies.
        heap.collect(&[]);
        assert_eq!(heap.live_objects(), 0);
    }

    #[test]
    fn dead_strings_leave_the_intern_set() {
        let mut heap = Heap::new();
        let kept = heap.intern("kept");
        heap.intern("dropped");
        assert!(heap.lookup_intern("dropped").is_some());

        heap.collect(&[kept]);
        assert!(heap.lookup_intern("dropped").is_none());
        assert_eq!(heap.lookup_intern("kept"), Some(kept));

        // Re-interning after eviction builds a fresh object.
        let again = heap.intern("dropped");
        assert!(heap.as_str(again).is_some());
    }

    #[test]
    fn slots_are_reused_after_sweep(){
        let mut heap = Heap::new();
        let dead = heap.alloc_raw(ObjBody::List(ListObj::default()));
        heap.collect(&[]);
        let replacement = heap.alloc_raw(ObjBody::List(ListObj::default()));
        assert_eq!(dead.index(), replacement.index());
    }

    #[test]
    fn pacing_doubles_after_collection() {
        let mut heap = Heap::new();
        heap.collect(&[]);
        assert!(heap.next_gc() >= heap.bytes_allocated() * 2 || heap.next_gc() >= 1 << 20);
        assert_eq!(heap.stats.collections, 1);
    }

    #[test]
    fn sweep_recomputes_byte_accounting() {
        let mut heap = Heap::new();
        let list = heap.alloc_raw(ObjBody::List(ListObj::default()));
        // Grow the list without telling the heap.
        heap.list_values_mut(list)
            .unwrap()
            .extend((0..1000).map(Value::int));
        let before = heap.bytes_allocated();
        heap.collect(&[Value::object(list)]);
        // Collection observed the real size.
        assert!(heap.bytes_allocated() > before);
    }
}
