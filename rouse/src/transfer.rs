//! Transferable values and the cross-actor transfer contract.
//!
//! A rouse hands one or more [`Value`]s from the signaling actor's context to
//! each woken waiter. When both sides share an isolation domain the transfer
//! is a plain clone, so composite values stay `Rc`-shared with identity
//! preserved.
//! When the domains differ the same values are routed through the codec
//! instead, which deep-copies them while reconstructing shared substructure
//! and cycles on the far side. The decision is made per actor pair at
//! delivery time, never globally.

use std::cell::RefCell;
use std::rc::Rc;

use crate::actor::{ActorId, DomainId};
use crate::error::RouseResult;

pub mod codec;

/// A typed value that can cross actor boundaries.
///
/// Composite values (`Table`, `Function`) have identity semantics: cloning a
/// `Value` clones the `Rc`, and equality compares identity, not contents.
#[derive(Debug, Clone)]
pub enum Value {
    /// The absent value.
    Nil,
    /// A boolean.
    Bool(bool),
    /// A double-precision number.
    Number(f64),
    /// An immutable string.
    Str(Rc<str>),
    /// A mutable key/value mapping, possibly cyclic or aliased.
    Table(Rc<RefCell<Table>>),
    /// An opaque function chunk with captured upvalues.
    Function(Rc<Function>),
    /// A non-relocatable reference to a reactor-bound actor.
    ///
    /// Valid only within its reactor's memory space; the codec refuses it.
    Handle(ActorId),
}

impl Value {
    /// Builds a string value.
    pub fn str(s: &str) -> Self {
        Value::Str(Rc::from(s))
    }

    /// Builds an empty table value.
    pub fn table() -> Self {
        Value::Table(Rc::new(RefCell::new(Table::default())))
    }

    /// Returns the number payload, if this is a number.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the string payload, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the table payload, if this is a table.
    pub fn as_table(&self) -> Option<&Rc<RefCell<Table>>> {
        match self {
            Value::Table(t) => Some(t),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    /// Scalars compare structurally; composites compare by identity, so a
    /// table is only equal to itself (or another handle on the same `Rc`).
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Table(a), Value::Table(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Handle(a), Value::Handle(b)) => a == b,
            _ => false,
        }
    }
}

/// A table: ordered key/value entries with identity semantics.
///
/// Lookup is linear; tables crossing actor boundaries are small control
/// payloads, not bulk storage.
#[derive(Debug, Default)]
pub struct Table {
    entries: Vec<(Value, Value)>,
}

impl Table {
    /// Sets `key` to `value`, replacing an existing entry for an equal key.
    ///
    /// `Nil` keys are rejected by the codec; avoid them.
    pub fn set(&mut self, key: Value, value: Value) {
        for entry in &mut self.entries {
            if entry.0 == key {
                entry.1 = value;
                return;
            }
        }
        self.entries.push((key, value));
    }

    /// Returns the value stored under `key`, or `Nil`.
    pub fn get(&self, key: &Value) -> Value {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
            .unwrap_or(Value::Nil)
    }

    /// Iterates the entries in insertion order.
    pub fn entries(&self) -> impl Iterator<Item = &(Value, Value)> {
        self.entries.iter()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// An opaque function chunk plus its captured upvalues.
///
/// The chunk bytes are carried verbatim; the hosting language runtime is the
/// collaborator that knows how to load them. Upvalues live behind a
/// `RefCell` so a decoded function can capture itself.
#[derive(Debug)]
pub struct Function {
    /// Compiled chunk bytes, opaque to the core.
    pub chunk: Vec<u8>,
    /// Captured values, in upvalue slot order.
    pub upvalues: RefCell<Vec<Value>>,
}

impl Function {
    /// Creates a function value from a chunk and its captures.
    pub fn new(chunk: Vec<u8>, upvalues: Vec<Value>) -> Value {
        Value::Function(Rc::new(Function {
            chunk,
            upvalues: RefCell::new(upvalues),
        }))
    }
}

/// Moves `values` from the domain of the signaling actor into `to`.
///
/// Same domain: a reference-sharing clone. Different domains: a codec
/// round-trip producing an isolated deep copy with sharing preserved.
pub fn transfer(values: &[Value], from: DomainId, to: DomainId) -> RouseResult<Vec<Value>> {
    if from == to {
        Ok(values.to_vec())
    } else {
        let bytes = codec::encode(values)?;
        codec::decode(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_domain_transfer_preserves_rc_identity() {
        let shared = Value::table();
        let moved = transfer(
            &[shared.clone(), shared.clone()],
            DomainId::ROOT,
            DomainId::ROOT,
        )
        .unwrap();
        let (a, b) = (moved[0].as_table().unwrap(), moved[1].as_table().unwrap());
        assert!(Rc::ptr_eq(a, b));
        assert!(Rc::ptr_eq(a, shared.as_table().unwrap()));
    }

    #[test]
    fn cross_domain_transfer_deep_copies_but_keeps_sharing() {
        let shared = Value::table();
        shared
            .as_table()
            .unwrap()
            .borrow_mut()
            .set(Value::str("k"), Value::Number(1.0));

        let moved = transfer(
            &[shared.clone(), shared.clone()],
            DomainId::ROOT,
            DomainId(1),
        )
        .unwrap();
        let (a, b) = (moved[0].as_table().unwrap(), moved[1].as_table().unwrap());
        // Both decoded values alias one table, which is not the original.
        assert!(Rc::ptr_eq(a, b));
        assert!(!Rc::ptr_eq(a, shared.as_table().unwrap()));
        assert_eq!(a.borrow().get(&Value::str("k")), Value::Number(1.0));
    }
}
