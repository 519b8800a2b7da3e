//! Data Page 读写
//!
//! ```text
//! ┌──────────────────────────────────┐
//! │ value_count  (u32 LE)  含 Null   │
//! │ first_row_id (u32 LE)            │
//! │ uncomp_size  (u32 LE)            │
//! │ has_nulls    (u8)                │
//! │ [null_bitmap (bit-packed)]       │  仅 has_nulls=1
//! │ data         (非 Null 值，编码+压缩)│
//! │ CRC32        (u32 LE)            │
//! └──────────────────────────────────┘
//! ```
//!
//! Null 不进入编码流，解码时按 bitmap 还原到原位置。

use crate::common::{EngineError, Result};
use crate::compression;
use crate::encoding;
use crate::field_type::{CompressionType, EncodingType, FieldType, Value};

/// 每页最多容纳的行数
pub const PAGE_MAX_ROWS: usize = 1024;

// ── PageBuilder ───────────────────────────────────────────────────────────────

pub struct PageBuilder {
    pub first_row_id: u32,
    encoding:         EncodingType,
    compression:      CompressionType,
    ftype:            FieldType,
    values:           Vec<Value>,
}

impl PageBuilder {
    pub fn new(
        first_row_id: u32,
        encoding:     EncodingType,
        compression:  CompressionType,
        ftype:        FieldType,
    ) -> Self {
        Self { first_row_id, encoding, compression, ftype, values: Vec::new() }
    }

    pub fn add(&mut self, v: Value) {
        self.values.push(v);
    }

    pub fn len(&self)      -> usize { self.values.len() }
    pub fn is_empty(&self) -> bool  { self.values.is_empty() }
    pub fn is_full(&self)  -> bool  { self.values.len() >= PAGE_MAX_ROWS }

    /// 序列化为页字节（分离 Null → encode → compress → header+CRC）
    pub fn build(self) -> Result<Vec<u8>> {
        let count = self.values.len() as u32;

        let has_nulls = self.values.iter().any(Value::is_null);
        let mut bitmap = vec![0u8; if has_nulls { self.values.len().div_ceil(8) } else { 0 }];
        let mut present = Vec::with_capacity(self.values.len());
        for (i, v) in self.values.into_iter().enumerate() {
            if v.is_null() {
                bitmap[i / 8] |= 1 << (i % 8);
            } else {
                present.push(v);
            }
        }

        let encoded     = encoding::encode(&present, self.encoding, self.ftype)?;
        let uncomp_size = encoded.len() as u32;
        let compressed  = compression::compress(&encoded, self.compression)?;

        let mut page = Vec::new();
        page.extend_from_slice(&count.to_le_bytes());
        page.extend_from_slice(&self.first_row_id.to_le_bytes());
        page.extend_from_slice(&uncomp_size.to_le_bytes());
        page.push(has_nulls as u8);
        page.extend_from_slice(&bitmap);
        page.extend_from_slice(&compressed);

        let crc = crc32fast::hash(&page);
        page.extend_from_slice(&crc.to_le_bytes());
        Ok(page)
    }
}

// ── PageDecoder ───────────────────────────────────────────────────────────────

pub struct PageDecoder {
    pub first_row_id: u32,
    pub values:       Vec<Value>,
}

impl PageDecoder {
    pub fn decode(
        data:        &[u8],
        encoding:    EncodingType,
        compression: CompressionType,
        ftype:       FieldType,
    ) -> Result<Self> {
        if data.len() < 17 {
            return Err(EngineError::SegmentIo("page data too short".into()));
        }

        // 先验 CRC 再解析
        let payload_end = data.len() - 4;
        let stored_crc  = u32::from_le_bytes(data[payload_end..].try_into().unwrap());
        if crc32fast::hash(&data[..payload_end]) != stored_crc {
            return Err(EngineError::ChecksumMismatch);
        }

        let count        = u32::from_le_bytes(data[0..4].try_into().unwrap()) as usize;
        let first_row_id = u32::from_le_bytes(data[4..8].try_into().unwrap());
        let uncomp_size  = u32::from_le_bytes(data[8..12].try_into().unwrap()) as usize;
        let has_nulls    = data[12] != 0;

        let bitmap_len = if has_nulls { count.div_ceil(8) } else { 0 };
        if 13 + bitmap_len > payload_end {
            return Err(EngineError::SegmentIo("page bitmap overruns payload".into()));
        }
        let bitmap  = &data[13..13 + bitmap_len];
        let payload = &data[13 + bitmap_len..payload_end];

        let null_count = if has_nulls {
            (0..count).filter(|i| bitmap[i / 8] & (1 << (i % 8)) != 0).count()
        } else {
            0
        };

        let raw     = compression::decompress(payload, compression, uncomp_size)?;
        let present = encoding::decode(&raw, encoding, ftype, count - null_count)?;

        // 按 bitmap 还原 Null 位置
        let mut values = Vec::with_capacity(count);
        let mut next   = present.into_iter();
        for i in 0..count {
            if has_nulls && bitmap[i / 8] & (1 << (i % 8)) != 0 {
                values.push(Value::Null);
            } else {
                values.push(next.next()
                    .ok_or_else(|| EngineError::SegmentIo("page value underrun".into()))?);
            }
        }

        Ok(Self { first_row_id, values })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_page(values: Vec<Value>, ftype: FieldType) -> Vec<u8> {
        let mut b = PageBuilder::new(0, EncodingType::Plain, CompressionType::Lz4, ftype);
        for v in values {
            b.add(v);
        }
        b.build().unwrap()
    }

    #[test]
    fn nullable_roundtrip() {
        let values = vec![
            Value::Float64(1.0), Value::Null, Value::Float64(3.0), Value::Null,
        ];
        let page = build_page(values.clone(), FieldType::Float64);
        let d = PageDecoder::decode(&page, EncodingType::Plain, CompressionType::Lz4,
                                    FieldType::Float64).unwrap();
        assert_eq!(d.values, values);
    }

    #[test]
    fn corrupted_page_fails_crc() {
        let mut page = build_page(vec![Value::Float64(6.0)], FieldType::Float64);
        let mid = page.len() / 2;
        page[mid] ^= 0xFF;
        let err = PageDecoder::decode(&page, EncodingType::Plain, CompressionType::Lz4,
                                      FieldType::Float64);
        assert!(matches!(err, Err(EngineError::ChecksumMismatch)));
    }
}
