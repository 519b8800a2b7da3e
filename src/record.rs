//! 原始事件记录与派生时间列
//!
//! 派生列（day/week/hour/minute）是 ts 的纯函数：任何地方只要知道 ts，
//! 重算结果必须一致。时区固定为 UTC。

use chrono::{DateTime, Datelike, Duration, NaiveDate, Timelike};

use crate::common::{EngineError, EventType, Result};
use crate::field_type::Value;

// ── 原始记录 ──────────────────────────────────────────────────────────────────

/// 上游交付的 9 个字符串字段（顺序固定）
#[derive(Debug, Clone)]
pub struct RawRecord {
    pub ts:            String,
    pub event_type:    String,
    pub auction_id:    String,
    pub advertiser_id: String,
    pub publisher_id:  String,
    pub bid_price:     String,
    pub user_id:       String,
    pub total_price:   String,
    pub country:       String,
}

/// 一批原始记录；ingest 以批为单位流式消费
pub type RawBatch = Vec<RawRecord>;

// ── 派生时间列 ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedTime {
    pub day:    String,
    pub week:   String,
    pub hour:   String,
    pub minute: String,
}

/// 由毫秒时间戳派生 day/week/hour/minute（UTC）
pub fn derive_time(ts_millis: i64) -> Result<DerivedTime> {
    let dt = DateTime::from_timestamp_millis(ts_millis)
        .ok_or_else(|| EngineError::Ingest(format!("timestamp out of range: {ts_millis}")))?;

    let date = dt.date_naive();
    // ISO 周以周一为起点
    let monday = date - Duration::days(date.weekday().num_days_from_monday() as i64);

    Ok(DerivedTime {
        day:    format_date(date),
        week:   format_date(monday),
        hour:   format!("{} {:02}:00", format_date(date), dt.hour()),
        minute: format!("{} {:02}:{:02}", format_date(date), dt.hour(), dt.minute()),
    })
}

fn format_date(d: NaiveDate) -> String {
    format!("{:04}-{:02}-{:02}", d.year(), d.month(), d.day())
}

/// 枚举 [lo, hi] 闭区间内的所有 day 字符串（day 级分区剪枝用）。
/// 非法日期串返回空——剪枝只是超集选择，精确过滤在扫描阶段兜底。
pub fn days_in_range(lo: &str, hi: &str) -> Vec<String> {
    let (Ok(mut d), Ok(end)) = (
        NaiveDate::parse_from_str(lo, "%Y-%m-%d"),
        NaiveDate::parse_from_str(hi, "%Y-%m-%d"),
    ) else {
        return vec![];
    };
    let mut out = Vec::new();
    while d <= end {
        out.push(format_date(d));
        d += Duration::days(1);
    }
    out
}

// ── 原始记录 → 类型化行 ───────────────────────────────────────────────────────

/// 解析结果：事件类型（用于分区路由）+ 按 EVENT_COLUMNS 顺序的 13 列值
pub struct TypedRow {
    pub event_type: EventType,
    pub values:     Vec<Value>,
}

/// 将原始记录转换为类型化行。
/// 数值字段解析失败按 Null 处理（与空字符串同义）；ts 必须可解析；
/// 未知事件类型返回 None，由调用方丢弃并告警。
pub fn typed_row(raw: &RawRecord) -> Result<Option<TypedRow>> {
    let Some(event_type) = EventType::parse(raw.event_type.trim()) else {
        return Ok(None);
    };

    let ts: i64 = raw.ts.trim().parse()
        .map_err(|_| EngineError::Ingest(format!("bad timestamp: {:?}", raw.ts)))?;
    let t = derive_time(ts)?;

    let values = vec![
        Value::Int64(ts),
        Value::str(event_type.as_str()),
        Value::str(raw.auction_id.trim()),
        coerce_i32(&raw.advertiser_id),
        coerce_i32(&raw.publisher_id),
        coerce_f64(&raw.bid_price),
        coerce_i64(&raw.user_id),
        coerce_f64(&raw.total_price),
        Value::str(raw.country.trim()),
        Value::Bytes(t.day.into_bytes()),
        Value::Bytes(t.week.into_bytes()),
        Value::Bytes(t.hour.into_bytes()),
        Value::Bytes(t.minute.into_bytes()),
    ];
    Ok(Some(TypedRow { event_type, values }))
}

fn coerce_i32(s: &str) -> Value {
    s.trim().parse::<i32>().map(Value::Int32).unwrap_or(Value::Null)
}
fn coerce_i64(s: &str) -> Value {
    s.trim().parse::<i64>().map(Value::Int64).unwrap_or(Value::Null)
}
fn coerce_f64(s: &str) -> Value {
    s.trim().parse::<f64>().map(Value::Float64).unwrap_or(Value::Null)
}
