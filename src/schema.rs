//! 事件表的固定 Schema
//!
//! 9 个原始列 + 4 个由 ts 派生的时间列。所有查询（谓词、分组、选择列）
//! 都针对这一张逻辑表 `events`。

use crate::common::{EngineError, Result};
use crate::field_type::{ColumnMeta, CompressionType, EncodingType, FieldType};

// ── 列定义 ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ColumnDef {
    pub column_id:   u32,
    pub name:        &'static str,
    pub field_type:  FieldType,
    pub is_nullable: bool,
    pub encoding:    EncodingType,
    pub compression: CompressionType,
}

impl ColumnDef {
    /// 转为段写入用的 ColumnMeta
    pub fn meta(&self) -> ColumnMeta {
        ColumnMeta {
            name:        self.name.into(),
            field_type:  self.field_type,
            is_nullable: self.is_nullable,
            encoding:    self.encoding,
            compression: self.compression,
        }
    }

    const fn new(
        column_id:   u32,
        name:        &'static str,
        field_type:  FieldType,
        is_nullable: bool,
        encoding:    EncodingType,
    ) -> Self {
        Self {
            column_id, name, field_type, is_nullable,
            encoding, compression: CompressionType::Lz4,
        }
    }
}

// ── 事件 Schema ───────────────────────────────────────────────────────────────

/// 编码选型：有序/近似有序整数用 Delta，低基数字符串用字典，其余 Plain
pub const EVENT_COLUMNS: [ColumnDef; 13] = [
    ColumnDef::new(0,  "ts",            FieldType::Int64,   false, EncodingType::DeltaBinary),
    ColumnDef::new(1,  "type",          FieldType::Bytes,   false, EncodingType::Dictionary),
    ColumnDef::new(2,  "auction_id",    FieldType::Bytes,   false, EncodingType::Plain),
    ColumnDef::new(3,  "advertiser_id", FieldType::Int32,   true,  EncodingType::DeltaBinary),
    ColumnDef::new(4,  "publisher_id",  FieldType::Int32,   true,  EncodingType::DeltaBinary),
    ColumnDef::new(5,  "bid_price",     FieldType::Float64, true,  EncodingType::Plain),
    ColumnDef::new(6,  "user_id",       FieldType::Int64,   true,  EncodingType::DeltaBinary),
    ColumnDef::new(7,  "total_price",   FieldType::Float64, true,  EncodingType::Plain),
    ColumnDef::new(8,  "country",       FieldType::Bytes,   false, EncodingType::Dictionary),
    ColumnDef::new(9,  "day",           FieldType::Bytes,   false, EncodingType::Dictionary),
    ColumnDef::new(10, "week",          FieldType::Bytes,   false, EncodingType::Dictionary),
    ColumnDef::new(11, "hour",          FieldType::Bytes,   false, EncodingType::Dictionary),
    ColumnDef::new(12, "minute",        FieldType::Bytes,   false, EncodingType::Dictionary),
];

/// 对外的逻辑表名（查询 `from` 字段）
pub const SOURCE_NAME: &str = "events";

/// 按列名查下标；大小写已在 Query Model 归一化为小写
pub fn column_index(name: &str) -> Option<usize> {
    EVENT_COLUMNS.iter().position(|c| c.name == name)
}

pub fn column(name: &str) -> Result<&'static ColumnDef> {
    column_index(name)
        .map(|i| &EVENT_COLUMNS[i])
        .ok_or_else(|| EngineError::UnknownColumn(name.into()))
}

/// 事件分区段的完整列描述
pub fn event_metas() -> Vec<ColumnMeta> {
    EVENT_COLUMNS.iter().map(ColumnDef::meta).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_known_and_unknown() {
        assert_eq!(column_index("bid_price"), Some(5));
        assert!(column("no_such_col").is_err());
    }

    #[test]
    fn column_ids_match_positions() {
        for (i, c) in EVENT_COLUMNS.iter().enumerate() {
            assert_eq!(c.column_id as usize, i);
        }
    }
}
