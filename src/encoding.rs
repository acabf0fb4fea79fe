//! Byte encodings of values for storage.
//!
//! Values are stored in the SQLite record format: a header made of a varint header length
//! followed by one serial type varint per entry, then the entry bodies in the same order.
//! See: <https://www.sqlite.org/fileformat.html#record_format>
//!
//! Serial types used:
//!
//! | Serial Type | Content Size | Meaning                                  |
//! |-------------|--------------|------------------------------------------|
//! | 1, 2, 4, 6  | 1, 2, 4, 8   | big-endian twos-complement integer       |
//! | 8, 9        | 0            | the integer 0, the integer 1             |
//! | 10, 11      | 0            | false, true                              |
//! | N>=12, even | (N-12)/2     | a nested record                          |
//! | N>=13, odd  | (N-13)/2     | a UTF-8 string                           |
//!
//! SQLite reserves 10 and 11 for internal use, which is what booleans are here.  A nested
//! record holds alternating field name and field value entries.
//!
//! Keys are encoded separately by `encode_key` so that byte order matches value order.

use std::collections::BTreeMap;
use std::io::Read;
use std::rc::Rc;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::lang::{Type, Value};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Error reading encoded value: {0}")]
    Io(#[from] std::io::Error),
    #[error("Values of type {0} cannot be stored.")]
    Unsupported(Type),
    #[error("Invalid serial type code {0}.")]
    InvalidSerialTypeCode(i64),
    #[error("Bytes were not a valid string encoding.")]
    InvalidString(#[from] std::string::FromUtf8Error),
    #[error("Record is truncated.")]
    Truncated,
    #[error("Record field name is not a string.")]
    InvalidFieldName,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

const ST_INT8: i64 = 1;
const ST_INT16: i64 = 2;
const ST_INT32: i64 = 4;
const ST_INT64: i64 = 6;
const ST_ZERO: i64 = 8;
const ST_ONE: i64 = 9;
const ST_FALSE: i64 = 10;
const ST_TRUE: i64 = 11;

/// Encodes a single storable value.
pub fn encode(v: &Value) -> Result<Vec<u8>> {
    encode_entries(std::slice::from_ref(v))
}

/// Decodes bytes written by `encode`.
pub fn decode(bytes: &[u8]) -> Result<Value> {
    let mut entries = decode_entries(bytes)?;
    match entries.len() {
        1 => Ok(entries.remove(0)),
        _ => Err(Error::Truncated),
    }
}

fn encode_entries(entries: &[Value]) -> Result<Vec<u8>> {
    let mut header = vec![];
    let mut body = vec![];
    for v in entries {
        let serial_type = encode_body(v, &mut body)?;
        header.extend(sqlite_varint::serialize_to_varint(serial_type));
    }
    // The header length counts the bytes of its own varint.
    let mut hdr_len = header.len() as i64 + 1;
    while sqlite_varint::serialize_to_varint(hdr_len).len() as i64 + header.len() as i64 != hdr_len {
        hdr_len += 1;
    }
    let mut out = sqlite_varint::serialize_to_varint(hdr_len);
    out.extend(header);
    out.extend(body);
    Ok(out)
}

/// appends the body bytes of `v` and returns its serial type.
fn encode_body(v: &Value, body: &mut Vec<u8>) -> Result<i64> {
    Ok(match v {
        Value::Int(0) => ST_ZERO,
        Value::Int(1) => ST_ONE,
        Value::Int(i) => {
            let i = *i;
            if i8::try_from(i).is_ok() {
                body.write_i8(i as i8)?;
                ST_INT8
            } else if i16::try_from(i).is_ok() {
                body.write_i16::<BigEndian>(i as i16)?;
                ST_INT16
            } else if i32::try_from(i).is_ok() {
                body.write_i32::<BigEndian>(i as i32)?;
                ST_INT32
            } else {
                body.write_i64::<BigEndian>(i)?;
                ST_INT64
            }
        }
        Value::Bool(false) => ST_FALSE,
        Value::Bool(true) => ST_TRUE,
        Value::String(s) => {
            body.extend_from_slice(s.as_bytes());
            13 + 2 * s.len() as i64
        }
        Value::Record(fields) => {
            let mut entries = Vec::with_capacity(fields.len() * 2);
            for (name, v) in fields.iter() {
                entries.push(Value::String(name.clone()));
                entries.push(v.clone());
            }
            let nested = encode_entries(&entries)?;
            body.extend_from_slice(&nested);
            12 + 2 * nested.len() as i64
        }
        other => return Err(Error::Unsupported(other.get_type())),
    })
}

fn serialized_size(serial_type: i64) -> Result<usize> {
    Ok(match serial_type {
        ST_INT8 => 1,
        ST_INT16 => 2,
        ST_INT32 => 4,
        ST_INT64 => 8,
        ST_ZERO | ST_ONE | ST_FALSE | ST_TRUE => 0,
        x if x >= 12 => ((x - 12) / 2) as usize,
        x => return Err(Error::InvalidSerialTypeCode(x)),
    })
}

fn read_varint(bytes: &[u8], offset: usize) -> Result<(i64, usize)> {
    let rest = bytes.get(offset..).ok_or(Error::Truncated)?;
    if rest.is_empty() {
        return Err(Error::Truncated);
    }
    // A varint is at most 9 bytes; copying guards against reading past a short slice.
    let mut buf = [0u8; 9];
    let n = rest.len().min(9);
    buf[..n].copy_from_slice(&rest[..n]);
    let (v, len) = sqlite_varint::read_varint(&buf);
    if len > n {
        return Err(Error::Truncated);
    }
    Ok((v, len))
}

fn decode_entries(bytes: &[u8]) -> Result<Vec<Value>> {
    let (hdr_len, mut hdr_offset) = read_varint(bytes, 0)?;
    let hdr_len = usize::try_from(hdr_len).map_err(|_| Error::Truncated)?;
    if hdr_len > bytes.len() {
        return Err(Error::Truncated);
    }
    let mut value_offset = hdr_len;
    let mut out = vec![];
    while hdr_offset < hdr_len {
        let (serial_type, read) = read_varint(bytes, hdr_offset)?;
        hdr_offset += read;
        let size = serialized_size(serial_type)?;
        let data = bytes
            .get(value_offset..value_offset + size)
            .ok_or(Error::Truncated)?;
        value_offset += size;
        out.push(decode_body(serial_type, data)?);
    }
    Ok(out)
}

fn decode_body(serial_type: i64, data: &[u8]) -> Result<Value> {
    let mut c = std::io::Cursor::new(data);
    Ok(match serial_type {
        ST_INT8 => Value::Int(c.read_i8()? as i64),
        ST_INT16 => Value::Int(c.read_i16::<BigEndian>()? as i64),
        ST_INT32 => Value::Int(c.read_i32::<BigEndian>()? as i64),
        ST_INT64 => Value::Int(c.read_i64::<BigEndian>()?),
        ST_ZERO => Value::Int(0),
        ST_ONE => Value::Int(1),
        ST_FALSE => Value::Bool(false),
        ST_TRUE => Value::Bool(true),
        x if x >= 13 && x % 2 == 1 => {
            let mut buf = vec![];
            c.read_to_end(&mut buf)?;
            Value::String(String::from_utf8(buf)?)
        }
        x if x >= 12 => {
            let entries = decode_entries(data)?;
            if entries.len() % 2 != 0 {
                return Err(Error::Truncated);
            }
            let mut fields = BTreeMap::new();
            let mut it = entries.into_iter();
            while let (Some(name), Some(v)) = (it.next(), it.next()) {
                match name {
                    Value::String(name) => fields.insert(name, v),
                    _ => return Err(Error::InvalidFieldName),
                };
            }
            Value::Record(Rc::new(fields))
        }
        x => return Err(Error::InvalidSerialTypeCode(x)),
    })
}

/// Encodes a key value so that the byte order of encoded keys matches the order of values
/// of the same type.
pub fn encode_key(v: &Value) -> Result<Vec<u8>> {
    Ok(match v {
        Value::Int(i) => ((*i as u64) ^ (1 << 63)).to_be_bytes().to_vec(),
        Value::Bool(b) => vec![*b as u8],
        Value::String(s) => s.as_bytes().to_vec(),
        other => return Err(Error::Unsupported(other.get_type())),
    })
}

/// Decodes a key of type `ty` written by `encode_key`.
pub fn decode_key(bytes: &[u8], ty: &Type) -> Result<Value> {
    Ok(match ty {
        Type::Int => {
            let mut c = std::io::Cursor::new(bytes);
            Value::Int((c.read_u64::<BigEndian>()? ^ (1 << 63)) as i64)
        }
        Type::Bool => Value::Bool(*bytes.first().ok_or(Error::Truncated)? != 0),
        Type::String => Value::String(String::from_utf8(bytes.to_vec())?),
        other => return Err(Error::Unsupported(other.clone())),
    })
}

#[cfg(test)]
fn string(s: &str) -> Value {
    Value::String(s.to_string())
}

#[test]
fn test_int_encodings() {
    let cases: Vec<(i64, Vec<u8>)> = vec![
        (0, vec![0x02, 0x08]),
        (1, vec![0x02, 0x09]),
        (10, vec![0x02, 0x01, 0x0a]),
        (-1, vec![0x02, 0x01, 0xff]),
        (300, vec![0x02, 0x02, 0x01, 0x2c]),
        (70000, vec![0x02, 0x04, 0x00, 0x01, 0x11, 0x70]),
    ];
    for (i, expected) in cases {
        println!("Case: {}", i);
        assert_eq!(encode(&Value::Int(i)).unwrap(), expected);
        assert_eq!(decode(&expected).unwrap(), Value::Int(i));
    }
    let big = Value::Int(i64::MIN);
    assert_eq!(decode(&encode(&big).unwrap()).unwrap(), big);
}

#[test]
fn test_string_encoding() {
    // "Ten": serial type 13 + 2 * 3 = 19.
    assert_eq!(encode(&string("Ten")).unwrap(), vec![0x02, 0x13, b'T', b'e', b'n']);
    let long = string(&"x".repeat(300));
    assert_eq!(decode(&encode(&long).unwrap()).unwrap(), long);
}

#[test]
fn test_record_encoding() {
    let row = Value::record([
        ("body", string("first!")),
        ("id", string("0")),
        ("n", Value::Int(-7)),
        ("ok", Value::Bool(true)),
        ("nested", Value::record([("x", Value::Int(1))])),
    ]);
    let decoded = decode(&encode(&row).unwrap()).unwrap();
    assert_eq!(decoded, row);
    assert_eq!(format!("{}", decoded), format!("{}", row));
}

#[test]
fn test_decode_rejects_bad_input() {
    let cases: Vec<&[u8]> = vec![
        &[],
        &[0x05, 0x13],
        &[0x02, 0x13],
        &[0x02, 0x03, 0x00],
    ];
    for case in cases {
        assert!(decode(case).is_err());
    }
}

#[test]
fn test_key_order_matches_value_order() {
    let ints = vec![i64::MIN, -300, -1, 0, 1, 2, 255, 256, i64::MAX];
    let keys: Vec<Vec<u8>> = ints.iter().map(|i| encode_key(&Value::Int(*i)).unwrap()).collect();
    let mut sorted = keys.clone();
    sorted.sort();
    assert_eq!(keys, sorted);
    for (i, k) in ints.iter().zip(keys.iter()) {
        assert_eq!(decode_key(k, &Type::Int).unwrap(), Value::Int(*i));
    }
    assert!(encode_key(&string("a")).unwrap() < encode_key(&string("b")).unwrap());
    assert!(encode_key(&Value::record([("a", Value::Int(1))])).is_err());
}
