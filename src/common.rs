//! 全局基础类型与错误定义

use thiserror::Error;

// ── 事件判别值 ────────────────────────────────────────────────────────────────

/// 事件类型——分区的判别列取值
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Serve,
    Impression,
    Click,
    Purchase,
}

/// 写入量最大的判别值，对它额外建 day 级二级分区
pub const DAY_INDEXED_TYPE: EventType = EventType::Impression;

impl EventType {
    pub const ALL: [EventType; 4] = [
        Self::Serve, Self::Impression, Self::Click, Self::Purchase,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Serve      => "serve",
            Self::Impression => "impression",
            Self::Click      => "click",
            Self::Purchase   => "purchase",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "serve"      => Some(Self::Serve),
            "impression" => Some(Self::Impression),
            "click"      => Some(Self::Click),
            "purchase"   => Some(Self::Purchase),
            _            => None,
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── 查询枚举 ──────────────────────────────────────────────────────────────────

/// 聚合函数（COUNT(*) 单列一个变体，便于穷举匹配）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggFunc { Sum, Avg, Count, CountStar }

impl AggFunc {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sum               => "SUM",
            Self::Avg               => "AVG",
            Self::Count
            | Self::CountStar       => "COUNT",
        }
    }
}

/// 排序方向，缺省升序
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDir {
    #[default]
    Asc,
    Desc,
}

// ── 错误 ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown column: {0}")]
    UnknownColumn(String),
    #[error("validation failed on `{field}`: {reason}")]
    Validation { field: String, reason: String },
    #[error("segment I/O error: {0}")]
    SegmentIo(String),
    #[error("encoding error: {0}")]
    Encoding(String),
    #[error("compression error: {0}")]
    Compression(String),
    #[error("checksum mismatch")]
    ChecksumMismatch,
    #[error("schema mismatch")]
    SchemaMismatch,
    #[error("ingest error: {0}")]
    Ingest(String),
}

impl EngineError {
    /// Validation 错误的构造简写
    pub fn validation(field: &str, reason: impl Into<String>) -> Self {
        Self::Validation { field: field.into(), reason: reason.into() }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
