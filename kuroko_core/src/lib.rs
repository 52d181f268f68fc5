//! Core value representation for the Kuroko runtime.
//!
//! This crate defines the tagged [`Value`] type that every other layer of
//! the runtime traffics in, together with the opaque heap handle
//! [`ObjRef`]. Values are small `Copy` data; everything that does not fit
//! in a machine word lives behind an `ObjRef` into the runtime heap.
//!
//! Deep operations (hashing, equality that may consult `__eq__`, truth
//! testing of collections) need heap access and live in the runtime and VM
//! crates; this crate only provides the *shallow* layer: constructors,
//! predicates, accessors, and identity comparison.

pub mod value;

pub use value::{ObjRef, Value, KWARGS_DICT, KWARGS_LIST, KWARGS_SINGLE, KWARGS_UNSET};
