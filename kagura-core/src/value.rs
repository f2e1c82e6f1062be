//! # Polymorphic Document Values
//!
//! KaguraDB documents are JSON-like records: every field holds a [`Value`],
//! a tagged variant over null, booleans, integers, floats, strings, arrays
//! and nested objects. Objects preserve field declaration order.
//!
//! ## Total Order
//!
//! Index keys need one documented total order. KaguraDB orders values by
//! type class first, then within the class:
//!
//! ```text
//! Null < Bool(false) < Bool(true) < numbers < strings < arrays < objects
//! ```
//!
//! - Numbers compare by numeric value: integers as integers, and an
//!   integral float equals its integer counterpart (`1` == `1.0`).
//!   NaN sorts after every other number and equals itself.
//! - Strings compare by byte order of their UTF-8 encoding.
//! - Arrays compare element-wise, shorter prefix first.
//! - Objects compare by their canonical byte encoding (field order is
//!   significant).
//!
//! ## Canonical Encoding
//!
//! Equality hashing requires that equal values produce equal bytes. The
//! canonical encoding is a tag byte per variant followed by a fixed
//! payload; the integer/float overlap is collapsed by encoding every
//! integral in-range float in the integer form, and every NaN with a
//! single canonical bit pattern.

use std::cmp::Ordering;
use std::fmt;

use serde::de::{MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Encoding tags. One byte per variant; numbers use two tags so that the
/// integer/float overlap can be collapsed.
const TAG_NULL: u8 = 0x00;
const TAG_BOOL: u8 = 0x01;
const TAG_INT: u8 = 0x02;
const TAG_FLOAT: u8 = 0x03;
const TAG_STRING: u8 = 0x04;
const TAG_ARRAY: u8 = 0x05;
const TAG_OBJECT: u8 = 0x06;

/// Canonical quiet-NaN bit pattern used by the encoder.
const CANONICAL_NAN_BITS: u64 = 0x7ff8_0000_0000_0000;

/// A JSON-like value stored in a document field.
///
/// Objects are kept as ordered `(key, value)` pairs so that field
/// declaration order survives round-trips; lookups are linear, which is
/// fine for the shallow bodies this store targets.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<Value>),
    Object(Vec<(String, Value)>),
}

/// Numeric class used by comparison and encoding. Integral in-range
/// floats normalize to `Int`; NaN gets its own class.
enum Num {
    Int(i64),
    Float(f64),
    Nan,
}

impl Value {
    /// Build an object value from key/value pairs, preserving order.
    pub fn object<K, I>(pairs: I) -> Value
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Object(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Human-readable type name, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Top-level field lookup on an object value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Object(pairs) => pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Insert or replace a top-level field, preserving declaration order
    /// for existing fields and appending new ones.
    pub fn set(&mut self, key: &str, value: Value) {
        if let Value::Object(pairs) = self {
            if let Some(slot) = pairs.iter_mut().find(|(k, _)| k == key) {
                slot.1 = value;
            } else {
                pairs.push((key.to_string(), value));
            }
        }
    }

    /// Remove a top-level field; returns the removed value if present.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        if let Value::Object(pairs) = self {
            if let Some(idx) = pairs.iter().position(|(k, _)| k == key) {
                return Some(pairs.remove(idx).1);
            }
        }
        None
    }

    /// Do both values belong to the same class of the total order?
    /// Ordered filter operators only compare within a class; integers
    /// and floats share the numeric class.
    pub fn same_type_class(&self, other: &Value) -> bool {
        self.type_rank() == other.type_rank()
    }

    /// Rank of the type class in the total order.
    fn type_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) | Value::Float(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }

    fn num_class(&self) -> Option<Num> {
        match *self {
            Value::Int(i) => Some(Num::Int(i)),
            Value::Float(f) => {
                if f.is_nan() {
                    Some(Num::Nan)
                } else if f == f.trunc()
                    && f >= i64::MIN as f64
                    && f < 9_223_372_036_854_775_808.0
                {
                    Some(Num::Int(f as i64))
                } else {
                    Some(Num::Float(f))
                }
            }
            _ => None,
        }
    }

    /// The documented total order over all values. See the module docs.
    pub fn cmp_total(&self, other: &Value) -> Ordering {
        let (ra, rb) = (self.type_rank(), other.type_rank());
        if ra != rb {
            return ra.cmp(&rb);
        }
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::String(a), Value::String(b)) => a.as_bytes().cmp(b.as_bytes()),
            (Value::Array(a), Value::Array(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    match x.cmp_total(y) {
                        Ordering::Equal => continue,
                        non_eq => return non_eq,
                    }
                }
                a.len().cmp(&b.len())
            }
            (Value::Object(_), Value::Object(_)) => {
                self.canonical_bytes().cmp(&other.canonical_bytes())
            }
            _ => {
                // Both numeric at this point.
                let a = self.num_class().expect("numeric rank");
                let b = other.num_class().expect("numeric rank");
                match (a, b) {
                    (Num::Nan, Num::Nan) => Ordering::Equal,
                    (Num::Nan, _) => Ordering::Greater,
                    (_, Num::Nan) => Ordering::Less,
                    (Num::Int(x), Num::Int(y)) => x.cmp(&y),
                    (Num::Int(x), Num::Float(y)) => {
                        (x as f64).partial_cmp(&y).unwrap_or(Ordering::Less)
                    }
                    (Num::Float(x), Num::Int(y)) => {
                        x.partial_cmp(&(y as f64)).unwrap_or(Ordering::Greater)
                    }
                    (Num::Float(x), Num::Float(y)) => {
                        x.partial_cmp(&y).unwrap_or(Ordering::Equal)
                    }
                }
            }
        }
    }

    /// Append the canonical byte encoding of this value to `buf`.
    pub fn encode_canonical(&self, buf: &mut Vec<u8>) {
        match self {
            Value::Null => buf.push(TAG_NULL),
            Value::Bool(b) => {
                buf.push(TAG_BOOL);
                buf.push(u8::from(*b));
            }
            Value::Int(_) | Value::Float(_) => match self.num_class().expect("numeric") {
                Num::Int(i) => {
                    buf.push(TAG_INT);
                    buf.extend_from_slice(&i.to_be_bytes());
                }
                Num::Float(f) => {
                    buf.push(TAG_FLOAT);
                    buf.extend_from_slice(&f.to_bits().to_be_bytes());
                }
                Num::Nan => {
                    buf.push(TAG_FLOAT);
                    buf.extend_from_slice(&CANONICAL_NAN_BITS.to_be_bytes());
                }
            },
            Value::String(s) => {
                buf.push(TAG_STRING);
                buf.extend_from_slice(&(s.len() as u32).to_be_bytes());
                buf.extend_from_slice(s.as_bytes());
            }
            Value::Array(items) => {
                buf.push(TAG_ARRAY);
                buf.extend_from_slice(&(items.len() as u32).to_be_bytes());
                for item in items {
                    item.encode_canonical(buf);
                }
            }
            Value::Object(pairs) => {
                buf.push(TAG_OBJECT);
                buf.extend_from_slice(&(pairs.len() as u32).to_be_bytes());
                for (k, v) in pairs {
                    buf.extend_from_slice(&(k.len() as u32).to_be_bytes());
                    buf.extend_from_slice(k.as_bytes());
                    v.encode_canonical(buf);
                }
            }
        }
    }

    /// Canonical byte encoding as an owned buffer.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(16);
        self.encode_canonical(&mut buf);
        buf
    }

    /// Rough in-memory footprint, used by the memory-ceiling accounting.
    pub fn estimated_size(&self) -> usize {
        match self {
            Value::Null | Value::Bool(_) => 1,
            Value::Int(_) | Value::Float(_) => 8,
            Value::String(s) => std::mem::size_of::<String>() + s.len(),
            Value::Array(items) => {
                std::mem::size_of::<Vec<Value>>()
                    + items.iter().map(Value::estimated_size).sum::<usize>()
            }
            Value::Object(pairs) => {
                std::mem::size_of::<Vec<(String, Value)>>()
                    + pairs
                        .iter()
                        .map(|(k, v)| k.len() + std::mem::size_of::<String>() + v.estimated_size())
                        .sum::<usize>()
            }
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp_total(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(s) => f.write_str(&s),
            Err(_) => f.write_str("<unprintable>"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::String(s) => serializer.serialize_str(s),
            Value::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Object(pairs) => {
                let mut map = serializer.serialize_map(Some(pairs.len()))?;
                for (k, v) in pairs {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a JSON-like value")
    }

    fn visit_unit<E: serde::de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_none<E: serde::de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, d: D) -> Result<Value, D::Error> {
        d.deserialize_any(ValueVisitor)
    }

    fn visit_bool<E: serde::de::Error>(self, b: bool) -> Result<Value, E> {
        Ok(Value::Bool(b))
    }

    fn visit_i64<E: serde::de::Error>(self, i: i64) -> Result<Value, E> {
        Ok(Value::Int(i))
    }

    fn visit_u64<E: serde::de::Error>(self, u: u64) -> Result<Value, E> {
        if u <= i64::MAX as u64 {
            Ok(Value::Int(u as i64))
        } else {
            Ok(Value::Float(u as f64))
        }
    }

    fn visit_f64<E: serde::de::Error>(self, f: f64) -> Result<Value, E> {
        Ok(Value::Float(f))
    }

    fn visit_str<E: serde::de::Error>(self, s: &str) -> Result<Value, E> {
        Ok(Value::String(s.to_string()))
    }

    fn visit_string<E: serde::de::Error>(self, s: String) -> Result<Value, E> {
        Ok(Value::String(s))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Value, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(Value::Array(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Value, A::Error> {
        let mut pairs = Vec::with_capacity(map.size_hint().unwrap_or(0));
        while let Some((key, value)) = map.next_entry::<String, Value>()? {
            pairs.push((key, value));
        }
        Ok(Value::Object(pairs))
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Value, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }
}

/// SplitMix64 finalizer. Full-avalanche over the accumulated state.
#[inline]
fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

/// 32-bit avalanche hash of a canonical key encoding. Drives bucket
/// placement in the hash index.
#[inline]
pub fn key_hash(bytes: &[u8]) -> u32 {
    // FNV-1a accumulation, SplitMix64 finalization.
    let mut h: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in bytes {
        h = (h ^ u64::from(b)).wrapping_mul(0x0000_0100_0000_01b3);
    }
    splitmix64(h) as u32
}

/// Second, decorrelated 32-bit mixer used for shard routing. Distinct
/// constants keep shard selection independent of bucket placement.
#[inline]
pub fn shard_hash(bytes: &[u8]) -> u32 {
    let mut h: u64 = 0x9ae1_6a3b_2f90_404f;
    for &b in bytes {
        h = h.rotate_left(5) ^ u64::from(b);
        h = h.wrapping_mul(0xff51_afd7_ed55_8ccd);
    }
    h ^= h >> 33;
    h = h.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    (h ^ (h >> 33)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_order_across_type_classes() {
        let ordered = [
            Value::Null,
            Value::Bool(false),
            Value::Bool(true),
            Value::Int(-3),
            Value::Float(2.5),
            Value::Int(7),
            Value::String("a".into()),
            Value::String("b".into()),
            Value::Array(vec![Value::Int(1)]),
            Value::object(vec![("k", Value::Int(1))]),
        ];
        for w in ordered.windows(2) {
            assert_eq!(w[0].cmp_total(&w[1]), Ordering::Less, "{} < {}", w[0], w[1]);
        }
    }

    #[test]
    fn integral_float_equals_integer() {
        assert_eq!(Value::Int(42), Value::Float(42.0));
        assert_eq!(
            Value::Int(42).canonical_bytes(),
            Value::Float(42.0).canonical_bytes()
        );
        assert_ne!(Value::Int(42), Value::Float(42.5));
    }

    #[test]
    fn negative_zero_equals_zero() {
        assert_eq!(Value::Float(-0.0), Value::Int(0));
        assert_eq!(
            Value::Float(-0.0).canonical_bytes(),
            Value::Int(0).canonical_bytes()
        );
    }

    #[test]
    fn nan_is_self_equal_and_sorts_last_among_numbers() {
        let nan = Value::Float(f64::NAN);
        assert_eq!(nan, Value::Float(f64::NAN));
        assert_eq!(nan.cmp_total(&Value::Int(i64::MAX)), Ordering::Greater);
        assert_eq!(nan.cmp_total(&Value::String(String::new())), Ordering::Less);
        assert_eq!(
            nan.canonical_bytes(),
            Value::Float(-f64::NAN).canonical_bytes()
        );
    }

    #[test]
    fn equal_values_hash_equal() {
        let a = Value::object(vec![("x", Value::Int(1)), ("y", Value::Float(1.0))]);
        let b = Value::object(vec![("x", Value::Float(1.0)), ("y", Value::Int(1))]);
        assert_eq!(key_hash(&a.canonical_bytes()), key_hash(&b.canonical_bytes()));
    }

    #[test]
    fn distinct_mixers_disagree() {
        let bytes = Value::String("kagura".into()).canonical_bytes();
        assert_ne!(key_hash(&bytes), shard_hash(&bytes));
    }

    #[test]
    fn object_field_order_round_trips_through_json() {
        let v = Value::object(vec![
            ("zulu", Value::Int(1)),
            ("alpha", Value::Int(2)),
            ("mike", Value::Null),
        ]);
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, r#"{"zulu":1,"alpha":2,"mike":null}"#);
        let back: Value = serde_json::from_str(&json).unwrap();
        if let Value::Object(pairs) = &back {
            let keys: Vec<_> = pairs.iter().map(|(k, _)| k.as_str()).collect();
            assert_eq!(keys, vec!["zulu", "alpha", "mike"]);
        } else {
            panic!("expected object");
        }
    }

    #[test]
    fn set_and_remove_preserve_order() {
        let mut v = Value::object(vec![("a", Value::Int(1)), ("b", Value::Int(2))]);
        v.set("a", Value::Int(10));
        v.set("c", Value::Int(3));
        assert_eq!(v.get("a"), Some(&Value::Int(10)));
        assert_eq!(v.remove("b"), Some(Value::Int(2)));
        if let Value::Object(pairs) = &v {
            let keys: Vec<_> = pairs.iter().map(|(k, _)| k.as_str()).collect();
            assert_eq!(keys, vec!["a", "c"]);
        } else {
            panic!("expected object");
        }
    }
}
