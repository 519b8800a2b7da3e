//! 列编码
//!
//! 四种编码：
//! - **Plain**      — 按字段类型原样写出
//! - **RunLength**  — (count, value) 对，适合低基数列
//! - **DeltaBinary**— 整数增量编码，压缩时间戳/ID 列
//! - **Dictionary** — 字典编码，低基数字符串列
//!
//! 页内只编码非 Null 值；Null 位置由页的 null bitmap 记录（见 page/）。
//! 解码由列的 FieldType 指导，不做类型猜测。

use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::common::{EngineError, Result};
use crate::field_type::{EncodingType, FieldType, Value};

// ── 统一编/解码入口 ───────────────────────────────────────────────────────────

pub fn encode(values: &[Value], enc: EncodingType, ftype: FieldType) -> Result<Vec<u8>> {
    match enc {
        EncodingType::Plain       => plain::encode(values, ftype),
        EncodingType::RunLength   => rle::encode(values, ftype),
        EncodingType::DeltaBinary => delta::encode(values, ftype),
        EncodingType::Dictionary  => dict::encode(values, ftype),
    }
}

pub fn decode(
    data:  &[u8],
    enc:   EncodingType,
    ftype: FieldType,
    count: usize,
) -> Result<Vec<Value>> {
    match enc {
        EncodingType::Plain       => plain::decode(data, ftype, count),
        EncodingType::RunLength   => rle::decode(data, ftype, count),
        EncodingType::DeltaBinary => delta::decode(data, ftype, count),
        EncodingType::Dictionary  => dict::decode(data, ftype, count),
    }
}

fn io_err(e: std::io::Error) -> EngineError {
    EngineError::Encoding(e.to_string())
}

// 单值读写（Plain / RLE 共用）
fn write_one(out: &mut Vec<u8>, v: &Value, ftype: FieldType) -> Result<()> {
    match (ftype, v) {
        (FieldType::Int32,   Value::Int32(x))   => out.write_i32::<LittleEndian>(*x).map_err(io_err),
        (FieldType::Int64,   Value::Int64(x))   => out.write_i64::<LittleEndian>(*x).map_err(io_err),
        (FieldType::Float64, Value::Float64(x)) => out.write_f64::<LittleEndian>(*x).map_err(io_err),
        (FieldType::Bytes,   Value::Bytes(b))   => {
            out.write_u32::<LittleEndian>(b.len() as u32).map_err(io_err)?;
            out.extend_from_slice(b);
            Ok(())
        }
        _ => Err(EngineError::Encoding(format!("value {v:?} does not fit {ftype:?}"))),
    }
}

fn read_one(cur: &mut Cursor<&[u8]>, ftype: FieldType) -> Result<Value> {
    Ok(match ftype {
        FieldType::Int32   => Value::Int32(cur.read_i32::<LittleEndian>().map_err(io_err)?),
        FieldType::Int64   => Value::Int64(cur.read_i64::<LittleEndian>().map_err(io_err)?),
        FieldType::Float64 => Value::Float64(cur.read_f64::<LittleEndian>().map_err(io_err)?),
        FieldType::Bytes   => {
            let len = cur.read_u32::<LittleEndian>().map_err(io_err)? as usize;
            let pos = cur.position() as usize;
            let src = *cur.get_ref();
            if pos + len > src.len() {
                return Err(EngineError::Encoding("bytes value overruns page".into()));
            }
            cur.set_position((pos + len) as u64);
            Value::Bytes(src[pos..pos + len].to_vec())
        }
    })
}

// ── Plain ─────────────────────────────────────────────────────────────────────
mod plain {
    use super::*;

    pub fn encode(values: &[Value], ftype: FieldType) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        for v in values {
            write_one(&mut out, v, ftype)?;
        }
        Ok(out)
    }

    pub fn decode(data: &[u8], ftype: FieldType, count: usize) -> Result<Vec<Value>> {
        let mut cur = Cursor::new(data);
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(read_one(&mut cur, ftype)?);
        }
        Ok(out)
    }
}

// ── Run-Length Encoding ───────────────────────────────────────────────────────
mod rle {
    use super::*;

    pub fn encode(values: &[Value], ftype: FieldType) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let Some(mut cur) = values.first() else { return Ok(out) };
        let mut run: u32 = 1;

        for v in &values[1..] {
            if v == cur {
                run += 1;
            } else {
                out.write_u32::<LittleEndian>(run).map_err(io_err)?;
                write_one(&mut out, cur, ftype)?;
                cur = v;
                run = 1;
            }
        }
        out.write_u32::<LittleEndian>(run).map_err(io_err)?;
        write_one(&mut out, cur, ftype)?;
        Ok(out)
    }

    pub fn decode(data: &[u8], ftype: FieldType, count: usize) -> Result<Vec<Value>> {
        let mut cur = Cursor::new(data);
        let mut out = Vec::with_capacity(count);
        while out.len() < count {
            let run = cur.read_u32::<LittleEndian>().map_err(io_err)? as usize;
            let val = read_one(&mut cur, ftype)?;
            for _ in 0..run {
                out.push(val.clone());
            }
        }
        Ok(out)
    }
}

// ── Delta Binary ──────────────────────────────────────────────────────────────
mod delta {
    use super::*;

    pub fn encode(values: &[Value], ftype: FieldType) -> Result<Vec<u8>> {
        if !ftype.is_integer() {
            return Err(EngineError::Encoding(format!("delta encoding on {ftype:?}")));
        }
        let mut out = Vec::with_capacity(values.len() * 8);
        let mut prev: i64 = 0;
        for (i, v) in values.iter().enumerate() {
            let x = v.as_i64()
                .ok_or_else(|| EngineError::Encoding(format!("non-integer value {v:?}")))?;
            let emit = if i == 0 { x } else { x - prev };
            out.write_i64::<LittleEndian>(emit).map_err(io_err)?;
            prev = x;
        }
        Ok(out)
    }

    pub fn decode(data: &[u8], ftype: FieldType, count: usize) -> Result<Vec<Value>> {
        let mut cur  = Cursor::new(data);
        let mut out  = Vec::with_capacity(count);
        let mut prev = 0i64;
        for i in 0..count {
            let d = cur.read_i64::<LittleEndian>().map_err(io_err)?;
            prev = if i == 0 { d } else { prev + d };
            out.push(match ftype {
                FieldType::Int32 => Value::Int32(prev as i32),
                _                => Value::Int64(prev),
            });
        }
        Ok(out)
    }
}

// ── Dictionary ────────────────────────────────────────────────────────────────
mod dict {
    use super::*;
    use std::collections::HashMap;

    pub fn encode(values: &[Value], ftype: FieldType) -> Result<Vec<u8>> {
        if ftype != FieldType::Bytes {
            return Err(EngineError::Encoding(format!("dictionary encoding on {ftype:?}")));
        }
        let mut entries: Vec<&[u8]>          = Vec::new();
        let mut lookup:  HashMap<&[u8], u32> = HashMap::new();
        let mut codes:   Vec<u32>            = Vec::with_capacity(values.len());

        for v in values {
            let b = v.as_bytes()
                .ok_or_else(|| EngineError::Encoding(format!("non-bytes value {v:?}")))?;
            let code = *lookup.entry(b).or_insert_with(|| {
                entries.push(b);
                (entries.len() - 1) as u32
            });
            codes.push(code);
        }

        let mut out = Vec::new();
        out.write_u32::<LittleEndian>(entries.len() as u32).map_err(io_err)?;
        for e in &entries {
            out.write_u32::<LittleEndian>(e.len() as u32).map_err(io_err)?;
            out.extend_from_slice(e);
        }
        for c in &codes {
            out.write_u32::<LittleEndian>(*c).map_err(io_err)?;
        }
        Ok(out)
    }

    pub fn decode(data: &[u8], _ftype: FieldType, count: usize) -> Result<Vec<Value>> {
        let mut cur = Cursor::new(data);
        let dict_len = cur.read_u32::<LittleEndian>().map_err(io_err)? as usize;

        let mut entries: Vec<Vec<u8>> = Vec::with_capacity(dict_len);
        for _ in 0..dict_len {
            match read_one(&mut cur, FieldType::Bytes)? {
                Value::Bytes(b) => entries.push(b),
                _ => unreachable!(),
            }
        }

        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            let code = cur.read_u32::<LittleEndian>().map_err(io_err)? as usize;
            let e = entries.get(code)
                .ok_or_else(|| EngineError::Encoding(format!("dict code {code} out of range")))?;
            out.push(Value::Bytes(e.clone()));
        }
        Ok(out)
    }
}
