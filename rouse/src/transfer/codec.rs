//! Self-describing byte codec for cross-isolation transfer.
//!
//! The encoding preserves reference identity: the first occurrence of a
//! composite value is written in full and registered in a seen table; every
//! later occurrence is written as a back-reference. Registration happens
//! *before* the body is encoded (and before it is decoded), so cyclic
//! structures resolve without special casing.
//!
//! Layout: a uleb128 value count, then each value as a kind tag byte followed
//! by its body. Numbers are little-endian f64 bits, strings are
//! length-prefixed bytes, tables are key/value pairs terminated by a nil tag,
//! functions are a length-prefixed chunk followed by their upvalue list
//! written as a table body.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::error::{RouseError, RouseResult};
use crate::transfer::{Function, Table, Value};

const TAG_NIL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_NUMBER: u8 = 2;
const TAG_STRING: u8 = 3;
const TAG_TABLE: u8 = 4;
const TAG_FUNCTION: u8 = 5;

/// Sub-tag: back-reference to an already-seen composite.
const REF_SEEN: u8 = 1;
/// Sub-tag: full value body follows.
const REF_VALUE: u8 = 2;

fn write_uleb128(buf: &mut Vec<u8>, mut val: u32) {
    while val >= 0x80 {
        buf.push((val as u8 & 0x7f) | 0x80);
        val >>= 7;
    }
    buf.push(val as u8);
}

/// Bounds-checked reader over the encoded bytes.
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn get(&mut self) -> RouseResult<u8> {
        let byte = self
            .data
            .get(self.pos)
            .copied()
            .ok_or_else(|| RouseError::Encoding("truncated input".into()))?;
        self.pos += 1;
        Ok(byte)
    }

    fn peek(&self) -> RouseResult<u8> {
        self.data
            .get(self.pos)
            .copied()
            .ok_or_else(|| RouseError::Encoding("truncated input".into()))
    }

    fn read(&mut self, len: usize) -> RouseResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| RouseError::Encoding("truncated input".into()))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_uleb128(&mut self) -> RouseResult<u32> {
        let mut value = 0u32;
        let mut shift = 0u32;
        loop {
            let byte = self.get()?;
            let bits = u32::from(byte & 0x7f);
            if shift >= 32 {
                return Err(RouseError::Encoding("uleb128 overflow".into()));
            }
            let shifted = bits << shift;
            // The final group only has 4 usable bits; anything shifted out
            // silently would corrupt the length.
            if shifted >> shift != bits {
                return Err(RouseError::Encoding("uleb128 overflow".into()));
            }
            value |= shifted;
            if byte < 0x80 {
                return Ok(value);
            }
            shift += 7;
        }
    }
}

/// Identity map from composite pointer to seen-table index (1-based).
type SeenIds = HashMap<usize, u32>;

/// Encodes `values` into a self-describing byte sequence.
///
/// Fails with [`RouseError::Encoding`] for value kinds that cannot leave
/// their memory space (actor handles).
pub fn encode(values: &[Value]) -> RouseResult<Vec<u8>> {
    let mut buf = Vec::with_capacity(64);
    let mut seen = SeenIds::new();
    write_uleb128(&mut buf, values.len() as u32);
    for value in values {
        encode_value(value, &mut buf, &mut seen)?;
    }
    Ok(buf)
}

fn encode_value(value: &Value, buf: &mut Vec<u8>, seen: &mut SeenIds) -> RouseResult<()> {
    match value {
        Value::Nil => buf.push(TAG_NIL),
        Value::Bool(b) => {
            buf.push(TAG_BOOL);
            buf.push(u8::from(*b));
        }
        Value::Number(n) => {
            buf.push(TAG_NUMBER);
            buf.extend_from_slice(&n.to_bits().to_le_bytes());
        }
        Value::Str(s) => {
            buf.push(TAG_STRING);
            write_uleb128(buf, s.len() as u32);
            buf.extend_from_slice(s.as_bytes());
        }
        Value::Table(table) => {
            buf.push(TAG_TABLE);
            let key = Rc::as_ptr(table) as usize;
            if let Some(&id) = seen.get(&key) {
                buf.push(REF_SEEN);
                write_uleb128(buf, id);
            } else {
                buf.push(REF_VALUE);
                // Register before the body so self-references become TREFs.
                let id = seen.len() as u32 + 1;
                seen.insert(key, id);
                encode_table_body(&table.borrow(), buf, seen)?;
            }
        }
        Value::Function(func) => {
            buf.push(TAG_FUNCTION);
            let key = Rc::as_ptr(func) as usize;
            if let Some(&id) = seen.get(&key) {
                buf.push(REF_SEEN);
                write_uleb128(buf, id);
            } else {
                buf.push(REF_VALUE);
                let id = seen.len() as u32 + 1;
                seen.insert(key, id);
                write_uleb128(buf, func.chunk.len() as u32);
                buf.extend_from_slice(&func.chunk);
                let upvalues = func.upvalues.borrow();
                for (slot, upvalue) in upvalues.iter().enumerate() {
                    encode_value(&Value::Number(slot as f64 + 1.0), buf, seen)?;
                    encode_value(upvalue, buf, seen)?;
                }
                buf.push(TAG_NIL);
            }
        }
        Value::Handle(id) => {
            return Err(RouseError::Encoding(format!(
                "actor handle {:?} is not relocatable",
                id
            )));
        }
    }
    Ok(())
}

fn encode_table_body(table: &Table, buf: &mut Vec<u8>, seen: &mut SeenIds) -> RouseResult<()> {
    for (key, value) in table.entries() {
        if matches!(key, Value::Nil) {
            return Err(RouseError::Encoding("nil table key".into()));
        }
        encode_value(key, buf, seen)?;
        encode_value(value, buf, seen)?;
    }
    // Sentinel terminating the pair list.
    buf.push(TAG_NIL);
    Ok(())
}

/// Decodes a byte sequence produced by [`encode`], reconstructing equivalent
/// values with shared substructure and cycles preserved.
pub fn decode(bytes: &[u8]) -> RouseResult<Vec<Value>> {
    let mut cursor = Cursor {
        data: bytes,
        pos: 0,
    };
    let mut seen: Vec<Value> = Vec::new();
    let count = cursor.read_uleb128()?;
    let mut values = Vec::with_capacity(count as usize);
    for _ in 0..count {
        values.push(decode_value(&mut cursor, &mut seen)?);
    }
    Ok(values)
}

fn decode_value(cursor: &mut Cursor<'_>, seen: &mut Vec<Value>) -> RouseResult<Value> {
    match cursor.get()? {
        TAG_NIL => Ok(Value::Nil),
        TAG_BOOL => Ok(Value::Bool(cursor.get()? != 0)),
        TAG_NUMBER => {
            let raw = cursor.read(8)?;
            let mut bits = [0u8; 8];
            bits.copy_from_slice(raw);
            Ok(Value::Number(f64::from_bits(u64::from_le_bytes(bits))))
        }
        TAG_STRING => {
            let len = cursor.read_uleb128()? as usize;
            let raw = cursor.read(len)?;
            let text = std::str::from_utf8(raw)
                .map_err(|_| RouseError::Encoding("invalid utf-8 in string".into()))?;
            Ok(Value::Str(Rc::from(text)))
        }
        TAG_TABLE => match cursor.get()? {
            REF_SEEN => resolve_seen(cursor, seen),
            REF_VALUE => {
                let table = Rc::new(RefCell::new(Table::default()));
                seen.push(Value::Table(Rc::clone(&table)));
                while cursor.peek()? != TAG_NIL {
                    let key = decode_value(cursor, seen)?;
                    let value = decode_value(cursor, seen)?;
                    table.borrow_mut().set(key, value);
                }
                cursor.get()?; // consume sentinel
                Ok(Value::Table(table))
            }
            _ => Err(RouseError::Encoding("bad table sub-tag".into())),
        },
        TAG_FUNCTION => match cursor.get()? {
            REF_SEEN => resolve_seen(cursor, seen),
            REF_VALUE => {
                let len = cursor.read_uleb128()? as usize;
                let chunk = cursor.read(len)?.to_vec();
                let func = Rc::new(Function {
                    chunk,
                    upvalues: RefCell::new(Vec::new()),
                });
                seen.push(Value::Function(Rc::clone(&func)));
                // Upvalue list is written as a table body keyed 1..=n.
                let mut upvalues = Vec::new();
                while cursor.peek()? != TAG_NIL {
                    let _slot = decode_value(cursor, seen)?;
                    upvalues.push(decode_value(cursor, seen)?);
                }
                cursor.get()?; // consume sentinel
                *func.upvalues.borrow_mut() = upvalues;
                Ok(Value::Function(func))
            }
            _ => Err(RouseError::Encoding("bad function sub-tag".into())),
        },
        other => Err(RouseError::Encoding(format!("unknown tag {}", other))),
    }
}

fn resolve_seen(cursor: &mut Cursor<'_>, seen: &[Value]) -> RouseResult<Value> {
    let id = cursor.read_uleb128()? as usize;
    seen.get(id.wrapping_sub(1))
        .cloned()
        .ok_or_else(|| RouseError::Encoding(format!("dangling back-reference {}", id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::ActorId;

    #[test]
    fn scalars_round_trip() {
        let values = vec![
            Value::Nil,
            Value::Bool(true),
            Value::Number(-2.5),
            Value::str("hello"),
        ];
        let decoded = decode(&encode(&values).unwrap()).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn handle_is_rejected() {
        let err = encode(&[Value::Handle(ActorId(3))]).unwrap_err();
        assert!(matches!(err, RouseError::Encoding(_)));
    }

    #[test]
    fn uleb128_round_trips_large_lengths() {
        let long = "x".repeat(100_000);
        let decoded = decode(&encode(&[Value::str(&long)]).unwrap()).unwrap();
        assert_eq!(decoded[0].as_str().unwrap().len(), 100_000);
    }

    #[test]
    fn uleb128_with_excess_high_bits_is_an_error() {
        // Five continuation groups encode up to 35 bits; the top three of
        // the last group must be rejected, not shifted away.
        let err = decode(&[0xff, 0xff, 0xff, 0xff, 0x7f]).unwrap_err();
        assert!(matches!(err, RouseError::Encoding(_)));
    }

    #[test]
    fn truncated_input_is_an_error() {
        let bytes = encode(&[Value::str("hello")]).unwrap();
        let err = decode(&bytes[..bytes.len() - 2]).unwrap_err();
        assert!(matches!(err, RouseError::Encoding(_)));
    }
}
