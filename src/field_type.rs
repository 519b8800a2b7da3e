//! 列的物理字段类型与运行时值

// ── FieldType ─────────────────────────────────────────────────────────────────

/// 列在分区文件中的存储类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Int32,
    Int64,
    Float64,
    /// 变长字节（字符串列，含派生的 day/week/hour/minute）
    Bytes,
}

impl FieldType {
    pub fn is_integer(self) -> bool {
        matches!(self, Self::Int32 | Self::Int64)
    }
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Int32 | Self::Int64 | Self::Float64)
    }
}

/// 编码方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodingType {
    Plain,
    RunLength,
    DeltaBinary,
    Dictionary,
}

/// 压缩方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionType {
    None,
    Lz4,
}

// ── ColumnMeta ────────────────────────────────────────────────────────────────

/// 段文件中一列的写入参数。事件表之外（rollup 表）的段用它动态描述列。
#[derive(Debug, Clone)]
pub struct ColumnMeta {
    pub name:        String,
    pub field_type:  FieldType,
    pub is_nullable: bool,
    pub encoding:    EncodingType,
    pub compression: CompressionType,
}

impl ColumnMeta {
    /// 按字段类型自动选编码：整数用 Delta，字符串用字典，其余 Plain
    pub fn new(name: &str, field_type: FieldType) -> Self {
        let encoding = if field_type.is_integer() {
            EncodingType::DeltaBinary
        } else if field_type == FieldType::Bytes {
            EncodingType::Dictionary
        } else {
            EncodingType::Plain
        };
        Self {
            name: name.into(), field_type,
            is_nullable: false, encoding,
            compression: CompressionType::Lz4,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.is_nullable = true; self
    }
}

// ── Value ─────────────────────────────────────────────────────────────────────

/// 列值（运行时表示）
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int32(i32),
    Int64(i64),
    Float64(f64),
    Bytes(Vec<u8>),
}

impl Value {
    pub fn str(s: &str) -> Self {
        Self::Bytes(s.as_bytes().to_vec())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int32(v) => Some(*v as i64),
            Self::Int64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int32(v)   => Some(*v as f64),
            Self::Int64(v)   => Some(*v as f64),
            Self::Float64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self { Self::Bytes(b) => Some(b), _ => None }
    }

    /// 将值序列化为分组键/索引比较用的字节串
    pub fn to_sort_key(&self) -> Vec<u8> {
        match self {
            Self::Null       => vec![],
            Self::Int32(v)   => v.to_be_bytes().to_vec(),
            Self::Int64(v)   => v.to_be_bytes().to_vec(),
            Self::Float64(v) => v.to_bits().to_be_bytes().to_vec(),
            Self::Bytes(b)   => b.clone(),
        }
    }

    /// 全序比较：Null 最小；数值列按数值序；字节列按字典序。
    /// 跨类别（数值 vs 字节）按类别排名，保证排序结果确定。
    pub fn total_cmp(&self, other: &Value) -> std::cmp::Ordering {
        use std::cmp::Ordering;
        match (self.rank(), other.rank()) {
            (a, b) if a != b => a.cmp(&b),
            _ => match (self, other) {
                (Self::Bytes(a), Self::Bytes(b)) => a.cmp(b),
                _ => {
                    // 同为数值类别
                    let a = self.as_f64().unwrap_or(0.0);
                    let b = other.as_f64().unwrap_or(0.0);
                    a.partial_cmp(&b).unwrap_or(Ordering::Equal)
                }
            },
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Int32(_) | Self::Int64(_) | Self::Float64(_) => 1,
            Self::Bytes(_) => 2,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null       => write!(f, "NULL"),
            Self::Int32(v)   => write!(f, "{v}"),
            Self::Int64(v)   => write!(f, "{v}"),
            Self::Float64(v) => write!(f, "{v}"),
            Self::Bytes(b)   => write!(f, "{}", String::from_utf8_lossy(b)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::Ordering;

    #[test]
    fn total_cmp_null_first() {
        assert_eq!(Value::Null.total_cmp(&Value::Int64(-5)), Ordering::Less);
        assert_eq!(Value::Int64(-5).total_cmp(&Value::Null), Ordering::Greater);
    }

    #[test]
    fn total_cmp_numeric_across_widths() {
        assert_eq!(Value::Int32(2).total_cmp(&Value::Float64(2.5)), Ordering::Less);
        assert_eq!(Value::Int64(3).total_cmp(&Value::Int32(3)), Ordering::Equal);
    }

    #[test]
    fn sort_key_distinguishes_strings() {
        assert_ne!(Value::str("JP").to_sort_key(), Value::str("US").to_sort_key());
    }
}
