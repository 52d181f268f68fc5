//! Deep value operations: managed equality, truth, repr/str, and the
//! binary-operator dunder dispatch with reflected retries.

use crate::vm::Vm;
use kuroko_core::Value;
use kuroko_runtime::ClassSlots;

/// Accessor into the cached slot table, passed as a plain function so call
/// sites stay terse.
pub(crate) type SlotGetter = fn(&ClassSlots) -> Option<Value>;

impl Vm {
    /// Cached dunder slot for the type of `value`.
    pub(crate) fn slot_of(&self, value: Value, get: SlotGetter) -> Option<Value> {
        let class = self.get_type(value);
        self.heap.class(class).and_then(|c| get(&c.slots))
    }

    /// Managed equality: identity, numeric cross-type equality, then
    /// `__eq__` on the left, then on the right, with `NotImplemented`
    /// falling through.
    pub fn values_equal(&mut self, a: Value, b: Value) -> bool {
        if a.values_same(b) {
            return true;
        }
        if let (Some(x), Some(y)) = (a.coerce_int(), b.coerce_int()) {
            return x == y;
        }
        if let (Some(x), Some(y)) = (a.coerce_float(), b.coerce_float()) {
            return x == y;
        }
        if a.is_kwargs() || b.is_kwargs() {
            return false;
        }
        // Interned strings already failed the identity test.
        if self.heap.as_str(a).is_some() && self.heap.as_str(b).is_some() {
            return false;
        }

        if let Some(method) = self.slot_of(a, |s| s.eq) {
            let result = self.call_simple(method, &[a, b]);
            if self.has_exception() {
                return false;
            }
            match result {
                Value::Bool(answer) => return answer,
                Value::NotImplemented => {}
                other => return !self.heap.is_falsey(other),
            }
        }
        if let Some(method) = self.slot_of(b, |s| s.eq) {
            let result = self.call_simple(method, &[b, a]);
            if self.has_exception() {
                return false;
            }
            match result {
                Value::Bool(answer) => return answer,
                Value::NotImplemented => {}
                other => return !self.heap.is_falsey(other),
            }
        }
        false
    }

    /// Full truth test: shallow and payload falsiness first, then
    /// `__len__` for instances that define it.
    pub fn is_falsey_full(&mut self, value: Value) -> bool {
        if value.as_object().is_none() {
            return self.heap.is_falsey(value);
        }
        let obj = value.as_object().expect("object variant");
        if self.heap.instance(obj).is_some() {
            if let Some(len_method) = self.slot_of(value, |s| s.len) {
                let result = self.call_simple(len_method, &[value]);
                if self.has_exception() {
                    return false;
                }
                if let Some(n) = result.as_int() {
                    return n == 0;
                }
            }
        }
        self.heap.is_falsey(value)
    }

    /// Managed `repr`: dispatch `__repr__`, falling back to a generic
    /// rendering when the result is not a string.
    pub fn value_repr(&mut self, value: Value) -> Value {
        if let Some(method) = self.slot_of(value, |s| s.repr) {
            let result = self.call_simple(method, &[value]);
            if self.has_exception() {
                return Value::None;
            }
            if self.heap.as_str(result).is_some() {
                return result;
            }
        }
        let fallback = format!("<{}>", self.type_name(value));
        self.intern(&fallback)
    }

    /// Managed `str`: `__str__` when defined, else `repr`.
    pub fn value_str(&mut self, value: Value) -> Value {
        if let Some(method) = self.slot_of(value, |s| s.str_) {
            let result = self.call_simple(method, &[value]);
            if self.has_exception() {
                return Value::None;
            }
            if self.heap.as_str(result).is_some() {
                return result;
            }
        }
        self.value_repr(value)
    }

    /// Binary operator dispatch: the left operand's dunder first; on
    /// `NotImplemented`, the right operand's reflected dunder; on
    /// exhaustion, `TypeError`. Fast numeric paths live in the dispatch
    /// loop; this is the slow path.
    pub(crate) fn binary_dunder(
        &mut self,
        a: Value,
        b: Value,
        get: SlotGetter,
        reflected_name: Value,
        op_symbol: &str,
    ) -> Value {
        if let Some(method) = self.slot_of(a, get) {
            let result = self.call_simple(method, &[a, b]);
            if self.has_exception() {
                return Value::None;
            }
            if !result.is_not_implemented() {
                return result;
            }
        }
        // Reflected lookup walks the chain by name; reflected dunders are
        // rare enough not to earn cached slots.
        let b_class = self.get_type(b);
        if let Some(method) = self.class_chain_lookup(b_class, reflected_name) {
            let result = self.call_simple(method, &[b, a]);
            if self.has_exception() {
                return Value::None;
            }
            if !result.is_not_implemented() {
                return result;
            }
        }
        self.runtime_error(
            self.exceptions.type_error,
            format!(
                "unsupported operand types for {}: '{}' and '{}'",
                op_symbol,
                self.type_name(a),
                self.type_name(b)
            ),
        )
    }

    /// Ordering comparison via `__lt__`/`__gt__`, with the mirrored
    /// operator on the right operand as the reflected form.
    pub(crate) fn compare_dunder(
        &mut self,
        a: Value,
        b: Value,
        get: SlotGetter,
        mirrored: SlotGetter,
        op_symbol: &str,
    ) -> Value {
        if let Some(method) = self.slot_of(a, get) {
            let result = self.call_simple(method, &[a, b]);
            if self.has_exception() {
                return Value::None;
            }
            if !result.is_not_implemented() {
                return result;
            }
        }
        if let Some(method) = self.slot_of(b, mirrored) {
            let result = self.call_simple(method, &[b, a]);
            if self.has_exception() {
                return Value::None;
            }
            if !result.is_not_implemented() {
                return result;
            }
        }
        self.runtime_error(
            self.exceptions.type_error,
            format!(
                "'{}' not supported between instances of '{}' and '{}'",
                op_symbol,
                self.type_name(a),
                self.type_name(b)
            ),
        )
    }
}

/// Normalize a (possibly negative) index against `len`, or `None` when out
/// of range.
pub(crate) fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let adjusted = if index < 0 { index + len } else { index };
    if adjusted < 0 || adjusted >= len {
        None
    } else {
        Some(adjusted as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_normalization() {
        assert_eq!(normalize_index(0, 3), Some(0));
        assert_eq!(normalize_index(2, 3), Some(2));
        assert_eq!(normalize_index(-1, 3), Some(2));
        assert_eq!(normalize_index(-3, 3), Some(0));
        assert_eq!(normalize_index(3, 3), None);
        assert_eq!(normalize_index(-4, 3), None);
        assert_eq!(normalize_index(0, 0), None);
    }
}
