//! Composite key layout and tagged value encoding for mutation records.
//!
//! Keys sort as `kind / id / predicate / nanotime / seq / source`, so a
//! single ordered scan serves both required ranges: all mutations of a
//! subject in commit order, and all mutations of one predicate. String
//! components are zero-escaped to keep prefix scans exact; `nanotime` is
//! sign-flipped big-endian so negative timestamps still order correctly.

use crate::error::{CrudError, Result};
use crate::model::{Record, Value};

pub const TAG_NULL: u8 = 0;
pub const TAG_BOOL: u8 = 1;
pub const TAG_INT: u8 = 2;
pub const TAG_FLOAT: u8 = 3;
pub const TAG_STR: u8 = 4;
pub const TAG_BYTES: u8 = 5;
pub const TAG_JSON: u8 = 6;
pub const TAG_REF: u8 = 7;
pub const TAG_TOMBSTONE: u8 = 8;

const SIGN_FLIP: u64 = 1 << 63;

/// Encodes the full composite key for a record.
pub fn encode_key(rec: &Record) -> Vec<u8> {
    let mut key = Vec::with_capacity(
        rec.subject_kind.len() + rec.subject_id.len() + rec.predicate.len() + rec.source.len() + 20,
    );
    push_component(&mut key, &rec.subject_kind);
    push_component(&mut key, &rec.subject_id);
    push_component(&mut key, &rec.predicate);
    key.extend_from_slice(&((rec.nanotime as u64) ^ SIGN_FLIP).to_be_bytes());
    key.extend_from_slice(&rec.seq.to_be_bytes());
    key.extend_from_slice(rec.source.as_bytes());
    key
}

/// Prefix covering every record of one subject.
pub fn subject_prefix(kind: &str, id: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(kind.len() + id.len() + 4);
    push_component(&mut prefix, kind);
    push_component(&mut prefix, id);
    prefix
}

/// Prefix covering every record of one `(subject, predicate)` pair.
pub fn predicate_prefix(kind: &str, id: &str, predicate: &str) -> Vec<u8> {
    let mut prefix = subject_prefix(kind, id);
    push_component(&mut prefix, predicate);
    prefix
}

/// Prefix covering every record of one subject kind.
pub fn kind_prefix(kind: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(kind.len() + 2);
    push_component(&mut prefix, kind);
    prefix
}

/// Exclusive upper bound for a prefix scan. Component prefixes always end
/// with the 0x00 0x00 terminator, so the last byte can be bumped in place.
pub fn prefix_end(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    let last = end.last_mut().expect("prefix is never empty");
    debug_assert!(*last < 0xff);
    *last += 1;
    end
}

/// Decodes a `(key, value)` pair back into a record.
pub fn decode_record(key: &[u8], value: &[u8]) -> Result<Record> {
    let mut cursor = 0usize;
    let subject_kind = read_component(key, &mut cursor)?;
    let subject_id = read_component(key, &mut cursor)?;
    let predicate = read_component(key, &mut cursor)?;
    if cursor + 12 > key.len() {
        return Err(CrudError::Corruption("key timestamp truncated"));
    }
    let mut ts = [0u8; 8];
    ts.copy_from_slice(&key[cursor..cursor + 8]);
    let nanotime = (u64::from_be_bytes(ts) ^ SIGN_FLIP) as i64;
    cursor += 8;
    let mut sq = [0u8; 4];
    sq.copy_from_slice(&key[cursor..cursor + 4]);
    let seq = u32::from_be_bytes(sq);
    cursor += 4;
    let source = std::str::from_utf8(&key[cursor..])
        .map_err(|_| CrudError::Corruption("key source not utf8"))?
        .to_owned();
    Ok(Record {
        subject_kind,
        subject_id,
        predicate,
        value: decode_value(value)?,
        source,
        nanotime,
        seq,
    })
}

/// Encodes a value as a one-byte type tag plus payload.
pub fn encode_value(value: &Value) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(16);
    match value {
        Value::Null => out.push(TAG_NULL),
        Value::Bool(v) => {
            out.push(TAG_BOOL);
            out.push(u8::from(*v));
        }
        Value::Int(v) => {
            out.push(TAG_INT);
            write_var_i64(*v, &mut out);
        }
        Value::Float(v) => {
            out.push(TAG_FLOAT);
            out.extend_from_slice(&v.to_le_bytes());
        }
        Value::Str(v) => {
            out.push(TAG_STR);
            write_var_u64(v.len() as u64, &mut out);
            out.extend_from_slice(v.as_bytes());
        }
        Value::Bytes(v) => {
            out.push(TAG_BYTES);
            write_var_u64(v.len() as u64, &mut out);
            out.extend_from_slice(v);
        }
        Value::Json(v) => {
            let payload = serde_json::to_vec(v)
                .map_err(|e| CrudError::Serialization(e.to_string()))?;
            out.push(TAG_JSON);
            write_var_u64(payload.len() as u64, &mut out);
            out.extend_from_slice(&payload);
        }
        Value::Ref { kind, id } => {
            out.push(TAG_REF);
            write_var_u64(kind.len() as u64, &mut out);
            out.extend_from_slice(kind.as_bytes());
            write_var_u64(id.len() as u64, &mut out);
            out.extend_from_slice(id.as_bytes());
        }
        Value::Tombstone => out.push(TAG_TOMBSTONE),
    }
    Ok(out)
}

/// Decodes a tagged value payload.
pub fn decode_value(buf: &[u8]) -> Result<Value> {
    if buf.is_empty() {
        return Err(CrudError::Corruption("value payload empty"));
    }
    let mut cursor = 1usize;
    let value = match buf[0] {
        TAG_NULL => Value::Null,
        TAG_BOOL => {
            if cursor >= buf.len() {
                return Err(CrudError::Corruption("bool payload truncated"));
            }
            match buf[cursor] {
                0 => Value::Bool(false),
                1 => Value::Bool(true),
                _ => return Err(CrudError::Corruption("bool payload invalid")),
            }
        }
        TAG_INT => Value::Int(read_var_i64(buf, &mut cursor)?),
        TAG_FLOAT => {
            if cursor + 8 > buf.len() {
                return Err(CrudError::Corruption("float payload truncated"));
            }
            let mut arr = [0u8; 8];
            arr.copy_from_slice(&buf[cursor..cursor + 8]);
            Value::Float(f64::from_le_bytes(arr))
        }
        TAG_STR => {
            let bytes = read_len_prefixed(buf, &mut cursor)?;
            let s = std::str::from_utf8(bytes)
                .map_err(|_| CrudError::Corruption("stored string not utf8"))?;
            Value::Str(s.to_owned())
        }
        TAG_BYTES => Value::Bytes(read_len_prefixed(buf, &mut cursor)?.to_vec()),
        TAG_JSON => {
            let bytes = read_len_prefixed(buf, &mut cursor)?;
            let v = serde_json::from_slice(bytes)
                .map_err(|_| CrudError::Corruption("stored JSON invalid"))?;
            Value::Json(v)
        }
        TAG_REF => {
            let kind_bytes = read_len_prefixed(buf, &mut cursor)?;
            let kind = std::str::from_utf8(kind_bytes)
                .map_err(|_| CrudError::Corruption("ref kind not utf8"))?
                .to_owned();
            let id_bytes = read_len_prefixed(buf, &mut cursor)?;
            let id = std::str::from_utf8(id_bytes)
                .map_err(|_| CrudError::Corruption("ref id not utf8"))?
                .to_owned();
            Value::Ref { kind, id }
        }
        TAG_TOMBSTONE => Value::Tombstone,
        _ => return Err(CrudError::Corruption("unknown value type tag")),
    };
    Ok(value)
}

/// Writes an escaped string component followed by the 0x00 0x00 terminator.
/// Embedded zero bytes become 0x00 0x01, preserving lexicographic order.
fn push_component(out: &mut Vec<u8>, component: &str) {
    for &byte in component.as_bytes() {
        if byte == 0x00 {
            out.push(0x00);
            out.push(0x01);
        } else {
            out.push(byte);
        }
    }
    out.push(0x00);
    out.push(0x00);
}

fn read_component(buf: &[u8], cursor: &mut usize) -> Result<String> {
    let mut bytes = Vec::new();
    loop {
        if *cursor >= buf.len() {
            return Err(CrudError::Corruption("key component unterminated"));
        }
        let byte = buf[*cursor];
        *cursor += 1;
        if byte != 0x00 {
            bytes.push(byte);
            continue;
        }
        if *cursor >= buf.len() {
            return Err(CrudError::Corruption("key escape truncated"));
        }
        let next = buf[*cursor];
        *cursor += 1;
        match next {
            0x00 => break,
            0x01 => bytes.push(0x00),
            _ => return Err(CrudError::Corruption("key escape invalid")),
        }
    }
    String::from_utf8(bytes).map_err(|_| CrudError::Corruption("key component not utf8"))
}

fn read_len_prefixed<'a>(buf: &'a [u8], cursor: &mut usize) -> Result<&'a [u8]> {
    let len = read_var_u64(buf, cursor)? as usize;
    if *cursor + len > buf.len() {
        return Err(CrudError::Corruption("length-prefixed payload truncated"));
    }
    let slice = &buf[*cursor..*cursor + len];
    *cursor += len;
    Ok(slice)
}

fn write_var_u64(mut v: u64, out: &mut Vec<u8>) {
    loop {
        let byte = (v & 0x7f) as u8;
        v >>= 7;
        if v == 0 {
            out.push(byte);
            break;
        } else {
            out.push(byte | 0x80);
        }
    }
}

fn write_var_i64(v: i64, out: &mut Vec<u8>) {
    let zigzag = ((v << 1) ^ (v >> 63)) as u64;
    write_var_u64(zigzag, out);
}

fn read_var_u64(buf: &[u8], cursor: &mut usize) -> Result<u64> {
    let mut result = 0u64;
    let mut shift = 0u32;
    for _ in 0..10 {
        if *cursor >= buf.len() {
            return Err(CrudError::Corruption("varint truncated"));
        }
        let byte = buf[*cursor];
        *cursor += 1;
        result |= ((byte & 0x7f) as u64) << shift;
        if (byte & 0x80) == 0 {
            return Ok(result);
        }
        shift += 7;
    }
    Err(CrudError::Corruption("varint too long"))
}

fn read_var_i64(buf: &[u8], cursor: &mut usize) -> Result<i64> {
    let raw = read_var_u64(buf, cursor)?;
    Ok(((raw >> 1) as i64) ^ (-((raw & 1) as i64)))
}
