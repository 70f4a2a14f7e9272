//! Row and Value types for HearthDB
//!
//! This module defines how data values are represented in memory and how
//! rows are serialized for the disk-backed row store.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::io::Cursor;

use crate::error::{Error, Result};

/// Fixed per-row header: the stored row size as a 32-bit integer.
pub const ROW_HEADER_SIZE: usize = 8;

/// Width of one index node slot in the on-disk row image.
pub const INDEX_NODE_SIZE: usize = 16;

/// A value in the database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    /// NULL value
    Null,
    /// Boolean value
    Boolean(bool),
    /// Integer value (32-bit)
    Integer(i32),
    /// Big integer value (64-bit)
    BigInt(i64),
    /// Double value (64-bit)
    Double(f64),
    /// String value
    String(String),
    /// Date value (days since epoch)
    Date(i32),
    /// Time of day (seconds since midnight)
    Time(i32),
    /// Timestamp value (milliseconds since epoch)
    Timestamp(i64),
}

// Implement PartialEq manually to support Double via bitwise comparison,
// so values can key hash maps during grouping and set operations.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::BigInt(a), Value::BigInt(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a.to_bits() == b.to_bits(),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Time(a), Value::Time(b)) => a == b,
            (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl std::hash::Hash for Value {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Boolean(v) => v.hash(state),
            Value::Integer(v) => v.hash(state),
            Value::BigInt(v) => v.hash(state),
            Value::Double(v) => v.to_bits().hash(state),
            Value::String(v) => v.hash(state),
            Value::Date(v) => v.hash(state),
            Value::Time(v) => v.hash(state),
            Value::Timestamp(v) => v.hash(state),
        }
    }
}

impl Value {
    /// Check if this value is NULL
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Try to convert to boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to convert to i64
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i as i64),
            Value::BigInt(i) => Some(*i),
            Value::Double(f) => Some(*f as i64),
            _ => None,
        }
    }

    /// Try to convert to f64
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::BigInt(i) => Some(*i as f64),
            Value::Double(f) => Some(*f),
            _ => None,
        }
    }

    /// Try to convert to string
    pub fn as_string(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get the type name of this value
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Boolean(_) => "BOOLEAN",
            Value::Integer(_) => "INTEGER",
            Value::BigInt(_) => "BIGINT",
            Value::Double(_) => "DOUBLE",
            Value::String(_) => "VARCHAR",
            Value::Date(_) => "DATE",
            Value::Time(_) => "TIME",
            Value::Timestamp(_) => "TIMESTAMP",
        }
    }

    /// Compare two values (for WHERE clauses, ORDER BY, set operations).
    /// NULL sorts below every other value; incompatible types return None.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            (Value::Null, _) => Some(Ordering::Less),
            (_, Value::Null) => Some(Ordering::Greater),

            (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),

            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (Value::Integer(a), Value::BigInt(b)) => Some((*a as i64).cmp(b)),
            (Value::BigInt(a), Value::Integer(b)) => Some(a.cmp(&(*b as i64))),
            (Value::BigInt(a), Value::BigInt(b)) => Some(a.cmp(b)),

            (Value::Double(a), Value::Double(b)) => a.partial_cmp(b),
            (Value::Integer(a), Value::Double(b)) => (*a as f64).partial_cmp(b),
            (Value::Double(a), Value::Integer(b)) => a.partial_cmp(&(*b as f64)),
            (Value::BigInt(a), Value::Double(b)) => (*a as f64).partial_cmp(b),
            (Value::Double(a), Value::BigInt(b)) => a.partial_cmp(&(*b as f64)),

            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),

            (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
            (Value::Time(a), Value::Time(b)) => Some(a.cmp(b)),
            (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),

            _ => None,
        }
    }

    /// Add two values. None means the operation does not apply to this
    /// pair of values, including integer overflow.
    pub fn add(&self, other: &Value) -> Option<Value> {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => a.checked_add(*b).map(Value::Integer),
            (Value::Integer(a), Value::BigInt(b)) => (*a as i64).checked_add(*b).map(Value::BigInt),
            (Value::BigInt(a), Value::Integer(b)) => a.checked_add(*b as i64).map(Value::BigInt),
            (Value::BigInt(a), Value::BigInt(b)) => a.checked_add(*b).map(Value::BigInt),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => Some(Value::Double(x + y)),
                _ => match (a, b) {
                    (Value::String(x), Value::String(y)) => {
                        Some(Value::String(format!("{}{}", x, y)))
                    }
                    _ => None,
                },
            },
        }
    }

    /// Subtract two values
    pub fn sub(&self, other: &Value) -> Option<Value> {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => a.checked_sub(*b).map(Value::Integer),
            (Value::Integer(a), Value::BigInt(b)) => (*a as i64).checked_sub(*b).map(Value::BigInt),
            (Value::BigInt(a), Value::Integer(b)) => a.checked_sub(*b as i64).map(Value::BigInt),
            (Value::BigInt(a), Value::BigInt(b)) => a.checked_sub(*b).map(Value::BigInt),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => Some(Value::Double(x - y)),
                _ => None,
            },
        }
    }

    /// Multiply two values
    pub fn mul(&self, other: &Value) -> Option<Value> {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => a.checked_mul(*b).map(Value::Integer),
            (Value::Integer(a), Value::BigInt(b)) => (*a as i64).checked_mul(*b).map(Value::BigInt),
            (Value::BigInt(a), Value::Integer(b)) => a.checked_mul(*b as i64).map(Value::BigInt),
            (Value::BigInt(a), Value::BigInt(b)) => a.checked_mul(*b).map(Value::BigInt),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => Some(Value::Double(x * y)),
                _ => None,
            },
        }
    }

    /// Divide two values. The caller checks for a zero divisor first.
    pub fn div(&self, other: &Value) -> Option<Value> {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) if *b != 0 => {
                a.checked_div(*b).map(Value::Integer)
            }
            (Value::BigInt(a), Value::BigInt(b)) if *b != 0 => a.checked_div(*b).map(Value::BigInt),
            (Value::Integer(a), Value::BigInt(b)) if *b != 0 => {
                (*a as i64).checked_div(*b).map(Value::BigInt)
            }
            (Value::BigInt(a), Value::Integer(b)) if *b != 0 => {
                a.checked_div(*b as i64).map(Value::BigInt)
            }
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) if y != 0.0 => Some(Value::Double(x / y)),
                _ => None,
            },
        }
    }

    /// Convert a value to the given column type, or fail with a type
    /// mismatch. NULL passes through untouched.
    pub fn coerce_to(self, target: &crate::catalog::DataType) -> Result<Value> {
        use crate::catalog::DataType;
        let mismatch = |v: &Value| Error::TypeMismatch {
            from: v.type_name().to_string(),
            to: target.to_string(),
        };
        match target {
            _ if self.is_null() => Ok(Value::Null),
            DataType::Boolean => match self {
                Value::Boolean(_) => Ok(self),
                v => Err(mismatch(&v)),
            },
            DataType::Integer => match self {
                Value::Integer(_) => Ok(self),
                Value::BigInt(i) => i32::try_from(i)
                    .map(Value::Integer)
                    .map_err(|_| mismatch(&Value::BigInt(i))),
                v => Err(mismatch(&v)),
            },
            DataType::BigInt => match self {
                Value::BigInt(_) => Ok(self),
                Value::Integer(i) => Ok(Value::BigInt(i as i64)),
                v => Err(mismatch(&v)),
            },
            DataType::Double => match self {
                Value::Double(_) => Ok(self),
                Value::Integer(i) => Ok(Value::Double(i as f64)),
                Value::BigInt(i) => Ok(Value::Double(i as f64)),
                v => Err(mismatch(&v)),
            },
            DataType::Varchar(limit) => match self {
                Value::String(s) => match limit {
                    Some(n) if s.chars().count() > *n => Err(Error::TypeMismatch {
                        from: format!("VARCHAR({})", s.chars().count()),
                        to: target.to_string(),
                    }),
                    _ => Ok(Value::String(s)),
                },
                v => Err(mismatch(&v)),
            },
            DataType::Date => match self {
                Value::Date(_) => Ok(self),
                Value::Integer(i) => Ok(Value::Date(i)),
                Value::BigInt(i) => i32::try_from(i)
                    .map(Value::Date)
                    .map_err(|_| mismatch(&Value::BigInt(i))),
                v => Err(mismatch(&v)),
            },
            DataType::Time => match self {
                Value::Time(_) => Ok(self),
                Value::Integer(i) => Ok(Value::Time(i)),
                Value::BigInt(i) => i32::try_from(i)
                    .map(Value::Time)
                    .map_err(|_| mismatch(&Value::BigInt(i))),
                v => Err(mismatch(&v)),
            },
            DataType::Timestamp => match self {
                Value::Timestamp(_) => Ok(self),
                Value::Date(d) => Ok(Value::Timestamp(d as i64 * 86_400_000)),
                Value::Integer(i) => Ok(Value::Timestamp(i as i64)),
                Value::BigInt(i) => Ok(Value::Timestamp(i)),
                v => Err(mismatch(&v)),
            },
        }
    }

    /// Render as a SQL literal that parses back to this value. Datetime
    /// values print as their raw epoch numbers; the column type recovers
    /// them on insert.
    pub fn to_sql_literal(&self) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Boolean(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            Value::Integer(i) => i.to_string(),
            Value::BigInt(i) => i.to_string(),
            Value::Double(n) => format!("{:?}", n),
            Value::String(s) => format!("'{}'", s.replace('\'', "''")),
            Value::Date(d) => d.to_string(),
            Value::Time(t) => t.to_string(),
            Value::Timestamp(t) => t.to_string(),
        }
    }

    /// Negate a numeric value
    pub fn neg(&self) -> Option<Value> {
        match self {
            Value::Integer(a) => a.checked_neg().map(Value::Integer),
            Value::BigInt(a) => a.checked_neg().map(Value::BigInt),
            Value::Double(a) => Some(Value::Double(-a)),
            Value::Null => Some(Value::Null),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Boolean(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            Value::Integer(i) => write!(f, "{}", i),
            Value::BigInt(i) => write!(f, "{}", i),
            Value::Double(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{}", s),
            Value::Date(d) => write!(f, "DATE({})", d),
            Value::Time(t) => write!(f, "TIME({})", t),
            Value::Timestamp(t) => write!(f, "TIMESTAMP({})", t),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::BigInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

/// A row held by the row cache.
///
/// Identity is the file position; content is mutable in memory and written
/// back lazily. `storage_size` is fixed at creation so an updated row can
/// always be rewritten in place.
#[derive(Debug, Clone)]
pub struct Row {
    /// File position, -1 while unpersisted
    pub pos: i64,
    /// Total on-disk footprint, 8-byte aligned
    pub storage_size: usize,
    /// Owning table name
    pub table: String,
    /// Column values
    pub values: Vec<Value>,
    /// Needs writing back to disk
    pub dirty: bool,
}

impl Row {
    /// Create a fresh unpersisted row. The storage footprint reserves one
    /// node slot per index of the owning table.
    pub fn new(table: impl Into<String>, values: Vec<Value>, index_count: usize) -> Self {
        let storage_size = storage_size(&values, index_count);
        Self {
            pos: -1,
            storage_size,
            table: table.into(),
            values,
            dirty: true,
        }
    }

    /// Serialize into a buffer exactly `storage_size` bytes long:
    /// size header, zeroed index node slots, tagged column values, padding.
    pub fn to_bytes(&self, index_count: usize) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.storage_size);
        // Infallible writes into a Vec.
        let _ = buf.write_u32::<BigEndian>(self.storage_size as u32);
        let _ = buf.write_u32::<BigEndian>(self.values.len() as u32);
        buf.resize(ROW_HEADER_SIZE + INDEX_NODE_SIZE * index_count, 0);
        for value in &self.values {
            write_value(&mut buf, value);
        }
        buf.resize(self.storage_size, 0);
        buf
    }

    /// Deserialize a row image read from `pos`.
    pub fn from_bytes(
        pos: i64,
        table: impl Into<String>,
        bytes: &[u8],
        index_count: usize,
    ) -> Result<Self> {
        let mut cursor = Cursor::new(bytes);
        let storage_size = cursor
            .read_u32::<BigEndian>()
            .map_err(|_| Error::CorruptedRow(pos))? as usize;
        let count = cursor
            .read_u32::<BigEndian>()
            .map_err(|_| Error::CorruptedRow(pos))? as usize;
        cursor.set_position((ROW_HEADER_SIZE + INDEX_NODE_SIZE * index_count) as u64);
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            values.push(read_value(&mut cursor).map_err(|_| Error::CorruptedRow(pos))?);
        }
        Ok(Self {
            pos,
            storage_size,
            table: table.into(),
            values,
            dirty: false,
        })
    }
}

/// On-disk footprint of a row with the given values: header plus index
/// node slots plus serialized columns, rounded up to 8-byte alignment.
pub fn storage_size(values: &[Value], index_count: usize) -> usize {
    let raw = ROW_HEADER_SIZE + INDEX_NODE_SIZE * index_count + values_size(values);
    (raw + 7) & !7
}

fn values_size(values: &[Value]) -> usize {
    values
        .iter()
        .map(|v| match v {
            Value::Null => 1,
            Value::Boolean(_) => 2,
            Value::Integer(_) | Value::Date(_) | Value::Time(_) => 5,
            Value::BigInt(_) | Value::Double(_) | Value::Timestamp(_) => 9,
            Value::String(s) => 5 + s.len(),
        })
        .sum()
}

fn write_value(buf: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Null => buf.push(0),
        Value::Boolean(b) => {
            buf.push(1);
            buf.push(*b as u8);
        }
        Value::Integer(i) => {
            buf.push(2);
            let _ = buf.write_i32::<BigEndian>(*i);
        }
        Value::BigInt(i) => {
            buf.push(3);
            let _ = buf.write_i64::<BigEndian>(*i);
        }
        Value::Double(f) => {
            buf.push(4);
            let _ = buf.write_f64::<BigEndian>(*f);
        }
        Value::String(s) => {
            buf.push(5);
            let _ = buf.write_u32::<BigEndian>(s.len() as u32);
            buf.extend_from_slice(s.as_bytes());
        }
        Value::Date(d) => {
            buf.push(6);
            let _ = buf.write_i32::<BigEndian>(*d);
        }
        Value::Time(t) => {
            buf.push(7);
            let _ = buf.write_i32::<BigEndian>(*t);
        }
        Value::Timestamp(t) => {
            buf.push(8);
            let _ = buf.write_i64::<BigEndian>(*t);
        }
    }
}

fn read_value(cursor: &mut Cursor<&[u8]>) -> std::io::Result<Value> {
    let tag = cursor.read_u8()?;
    Ok(match tag {
        0 => Value::Null,
        1 => Value::Boolean(cursor.read_u8()? != 0),
        2 => Value::Integer(cursor.read_i32::<BigEndian>()?),
        3 => Value::BigInt(cursor.read_i64::<BigEndian>()?),
        4 => Value::Double(cursor.read_f64::<BigEndian>()?),
        5 => {
            let len = cursor.read_u32::<BigEndian>()? as usize;
            let start = cursor.position() as usize;
            let data = cursor.get_ref();
            if start + len > data.len() {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "string length past end of row image",
                ));
            }
            let s = String::from_utf8(data[start..start + len].to_vec()).map_err(|e| {
                std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
            })?;
            cursor.set_position((start + len) as u64);
            Value::String(s)
        }
        6 => Value::Date(cursor.read_i32::<BigEndian>()?),
        7 => Value::Time(cursor.read_i32::<BigEndian>()?),
        8 => Value::Timestamp(cursor.read_i64::<BigEndian>()?),
        _ => {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unknown value tag {}", tag),
            ))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_comparison() {
        assert_eq!(
            Value::Integer(5).compare(&Value::Integer(3)),
            Some(Ordering::Greater)
        );
        assert_eq!(
            Value::String("abc".to_string()).compare(&Value::String("def".to_string())),
            Some(Ordering::Less)
        );
        assert_eq!(
            Value::Null.compare(&Value::Integer(1)),
            Some(Ordering::Less)
        );
        assert_eq!(
            Value::Integer(2).compare(&Value::Double(2.5)),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn test_value_arithmetic() {
        assert_eq!(
            Value::Integer(5).add(&Value::Integer(3)),
            Some(Value::Integer(8))
        );
        assert_eq!(
            Value::Double(3.0).mul(&Value::Double(2.0)),
            Some(Value::Double(6.0))
        );
        assert_eq!(Value::Integer(i32::MAX).add(&Value::Integer(1)), None);
        assert_eq!(Value::Integer(1).div(&Value::Integer(0)), None);
    }

    #[test]
    fn test_row_round_trip() {
        let values = vec![
            Value::Integer(42),
            Value::String("hello".to_string()),
            Value::Null,
            Value::Timestamp(1_700_000_000_000),
        ];
        let row = Row::new("t", values.clone(), 2);
        assert_eq!(row.storage_size % 8, 0);

        let bytes = row.to_bytes(2);
        assert_eq!(bytes.len(), row.storage_size);

        let back = Row::from_bytes(96, "t", &bytes, 2).unwrap();
        assert_eq!(back.pos, 96);
        assert_eq!(back.values, values);
        assert_eq!(back.storage_size, row.storage_size);
    }

    #[test]
    fn test_storage_size_floor() {
        // Header and index slots alone dominate a small row.
        let size = storage_size(&[Value::Integer(1)], 1);
        assert!(size >= ROW_HEADER_SIZE + INDEX_NODE_SIZE + 5);
        assert_eq!(size % 8, 0);
    }

    #[test]
    fn test_corrupted_row() {
        let err = Row::from_bytes(8, "t", &[0, 0], 0).unwrap_err();
        assert!(matches!(err, Error::CorruptedRow(8)));
    }
}
