//! 查询模型：描述符解析、校验、规范化
//!
//! 描述符是固定形状的 JSON。本模块把它
//! 变成封闭的标签联合（SelectItem / Predicate），列名统一小写，
//! 谓词去重并按列名排序——规范化查询是 Planner 与结果缓存的键。
//!
//! 所有校验错误在计划之前抛出：未知列 → UnknownColumn，形状/取值
//! 问题 → Validation（指明出错字段），绝不静默纠正。

use serde::Deserialize;

use crate::common::{AggFunc, EngineError, Result, SortDir};
use crate::field_type::Value;
use crate::schema::{self, SOURCE_NAME};

// ── 原始描述符（serde 形状）──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct QueryDescriptor {
    pub select: Vec<serde_json::Value>,
    pub from:   String,
    #[serde(default, rename = "where")]
    pub where_: Vec<RawPredicate>,
    #[serde(default)]
    pub group_by: Vec<String>,
    #[serde(default)]
    pub order_by: Vec<RawOrderBy>,
    #[serde(default)]
    pub limit: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct RawPredicate {
    pub col: String,
    pub op:  String,
    pub val: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct RawOrderBy {
    pub col: String,
    #[serde(default)]
    pub dir: Option<String>,
}

// ── 规范化形式 ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum SelectItem {
    Column(String),
    /// 聚合列；CountStar 的 column 固定为 "*"
    Aggregate(AggFunc, String),
}

impl SelectItem {
    /// 结果集中的输出列名：直通列保持原名，聚合列为 FUNC(col) / COUNT(*)
    pub fn output_name(&self) -> String {
        match self {
            Self::Column(c)          => c.clone(),
            Self::Aggregate(f, col)  => format!("{}({col})", f.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Eq(Value),
    Neq(Value),
    Lt(Value),
    Lte(Value),
    Gt(Value),
    Gte(Value),
    /// 双侧闭区间
    Between(Value, Value),
    In(Vec<Value>),
}

impl Predicate {
    /// 行值是否满足谓词；Null 行值不满足任何谓词（null-aware 语义）
    pub fn matches(&self, v: &Value) -> bool {
        use std::cmp::Ordering::*;
        if v.is_null() {
            return false;
        }
        match self {
            Self::Eq(x)         => v.total_cmp(x) == Equal,
            Self::Neq(x)        => v.total_cmp(x) != Equal,
            Self::Lt(x)         => v.total_cmp(x) == Less,
            Self::Lte(x)        => v.total_cmp(x) != Greater,
            Self::Gt(x)         => v.total_cmp(x) == Greater,
            Self::Gte(x)        => v.total_cmp(x) != Less,
            Self::Between(a, b) => v.total_cmp(a) != Less && v.total_cmp(b) != Greater,
            Self::In(xs)        => xs.iter().any(|x| v.total_cmp(x) == Equal),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub col:  String,
    pub pred: Predicate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderKey {
    /// 输出列名（聚合引用已解析为 FUNC(col) 形式的逻辑名）
    pub col: String,
    pub dir: SortDir,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalQuery {
    pub select:   Vec<SelectItem>,
    pub from:     String,
    pub filters:  Vec<Filter>,
    pub group_by: Vec<String>,
    pub order_by: Vec<OrderKey>,
    pub limit:    Option<usize>,
}

impl CanonicalQuery {
    /// 从 JSON 描述符解析并完成全部校验
    pub fn from_json(v: &serde_json::Value) -> Result<Self> {
        let desc: QueryDescriptor = serde_json::from_value(v.clone())
            .map_err(|e| EngineError::validation("descriptor", e.to_string()))?;
        Self::canonicalize(&desc)
    }

    pub fn canonicalize(desc: &QueryDescriptor) -> Result<Self> {
        if desc.from != SOURCE_NAME {
            return Err(EngineError::validation(
                "from", format!("unknown source {:?}", desc.from),
            ));
        }
        if desc.select.is_empty() {
            return Err(EngineError::validation("select", "must not be empty"));
        }

        let group_by: Vec<String> = desc.group_by.iter()
            .map(|c| {
                let c = c.to_lowercase();
                schema::column(&c)?;
                Ok(c)
            })
            .collect::<Result<_>>()?;

        let select: Vec<SelectItem> = desc.select.iter()
            .map(parse_select_item)
            .collect::<Result<_>>()?;

        // group_by 非空时每个直通列必须出现在 group_by；
        // group_by 为空时禁止直通列与聚合列混用
        let has_agg = select.iter().any(|s| matches!(s, SelectItem::Aggregate(..)));
        for item in &select {
            if let SelectItem::Column(c) = item {
                if !group_by.is_empty() && !group_by.contains(c) {
                    return Err(EngineError::validation(
                        "select", format!("bare column {c:?} missing from group_by"),
                    ));
                }
                if group_by.is_empty() && has_agg {
                    return Err(EngineError::validation(
                        "select", "bare columns and aggregates mix without group_by",
                    ));
                }
            }
        }

        let mut filters: Vec<Filter> = Vec::new();
        for raw in &desc.where_ {
            let f = parse_predicate(raw)?;
            // 按列去重：完全相同的 (col, op, val) 只保留一份
            if !filters.contains(&f) {
                filters.push(f);
            }
        }
        filters.sort_by(|a, b| a.col.cmp(&b.col));

        let order_by = desc.order_by.iter()
            .map(|raw| parse_order_key(raw, &select))
            .collect::<Result<_>>()?;

        Ok(Self {
            select,
            from: desc.from.clone(),
            filters,
            group_by,
            order_by,
            limit: desc.limit.map(|n| n as usize),
        })
    }

    /// 请求的聚合列表
    pub fn aggregates(&self) -> Vec<(AggFunc, &str)> {
        self.select.iter()
            .filter_map(|s| match s {
                SelectItem::Aggregate(f, c) => Some((*f, c.as_str())),
                SelectItem::Column(_)       => None,
            })
            .collect()
    }

    /// 输出列名（结果集表头，顺序与 select 一致）
    pub fn output_columns(&self) -> Vec<String> {
        self.select.iter().map(SelectItem::output_name).collect()
    }

    /// 结果缓存键：规范化形式的稳定序列化
    pub fn cache_key(&self) -> String {
        format!("{self:?}")
    }
}

// ── 解析辅助 ──────────────────────────────────────────────────────────────────

fn parse_select_item(item: &serde_json::Value) -> Result<SelectItem> {
    match item {
        serde_json::Value::String(name) => {
            let name = name.to_lowercase();
            schema::column(&name)?;
            Ok(SelectItem::Column(name))
        }
        serde_json::Value::Object(map) if map.len() == 1 => {
            let (func, col) = map.iter().next().expect("len checked");
            let col = col.as_str().ok_or_else(|| {
                EngineError::validation("select", "aggregate column must be a string")
            })?;
            let func_up = func.to_uppercase();
            if col == "*" {
                return if func_up == "COUNT" {
                    Ok(SelectItem::Aggregate(AggFunc::CountStar, "*".into()))
                } else {
                    Err(EngineError::validation(
                        "select", format!("{func_up}(*) is not supported"),
                    ))
                };
            }
            let col = col.to_lowercase();
            let def = schema::column(&col)?;
            let f = match func_up.as_str() {
                "SUM"   => AggFunc::Sum,
                "AVG"   => AggFunc::Avg,
                "COUNT" => AggFunc::Count,
                other   => {
                    return Err(EngineError::validation(
                        "select", format!("unsupported aggregate function {other:?}"),
                    ))
                }
            };
            if matches!(f, AggFunc::Sum | AggFunc::Avg) && !def.field_type.is_numeric() {
                return Err(EngineError::validation(
                    "select", format!("{func_up} over non-numeric column {col:?}"),
                ));
            }
            Ok(SelectItem::Aggregate(f, col))
        }
        _ => Err(EngineError::validation(
            "select", "item must be a column name or a single {FUNC: column} pair",
        )),
    }
}

fn parse_predicate(raw: &RawPredicate) -> Result<Filter> {
    let col = raw.col.to_lowercase();
    schema::column(&col)?;

    let scalar = |v: &serde_json::Value| -> Result<Value> {
        json_scalar(v).ok_or_else(|| {
            EngineError::validation("where", format!("non-scalar value for column {col:?}"))
        })
    };

    let pred = match raw.op.as_str() {
        "eq"  => Predicate::Eq(scalar(&raw.val)?),
        "neq" => Predicate::Neq(scalar(&raw.val)?),
        "lt"  => Predicate::Lt(scalar(&raw.val)?),
        "lte" => Predicate::Lte(scalar(&raw.val)?),
        "gt"  => Predicate::Gt(scalar(&raw.val)?),
        "gte" => Predicate::Gte(scalar(&raw.val)?),
        "between" => match raw.val.as_array() {
            Some(arr) if arr.len() == 2 => {
                Predicate::Between(scalar(&arr[0])?, scalar(&arr[1])?)
            }
            _ => {
                return Err(EngineError::validation(
                    "where", "between expects a two-element array",
                ))
            }
        },
        "in" => match raw.val.as_array() {
            Some(arr) if !arr.is_empty() => {
                Predicate::In(arr.iter().map(scalar).collect::<Result<_>>()?)
            }
            _ => {
                return Err(EngineError::validation(
                    "where", "in expects a non-empty array",
                ))
            }
        },
        other => {
            return Err(EngineError::validation(
                "where", format!("unknown operator {other:?}"),
            ))
        }
    };
    Ok(Filter { col, pred })
}

fn json_scalar(v: &serde_json::Value) -> Option<Value> {
    match v {
        serde_json::Value::String(s) => Some(Value::str(s)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(Value::Int64(i))
            } else {
                n.as_f64().map(Value::Float64)
            }
        }
        _ => None,
    }
}

/// order_by 引用按逻辑名解析到输出列，而不是对底层存储列做字面匹配
fn parse_order_key(raw: &RawOrderBy, select: &[SelectItem]) -> Result<OrderKey> {
    let wanted = raw.col.to_lowercase();
    let col = select.iter()
        .map(SelectItem::output_name)
        .find(|name| name.to_lowercase() == wanted)
        .ok_or_else(|| {
            EngineError::validation(
                "order_by", format!("{:?} is not an output column", raw.col),
            )
        })?;

    let dir = match raw.dir.as_deref() {
        None | Some("asc") => SortDir::Asc,
        Some("desc")       => SortDir::Desc,
        Some(other)        => {
            return Err(EngineError::validation(
                "order_by", format!("unknown direction {other:?}"),
            ))
        }
    };
    Ok(OrderKey { col, dir })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn canon(v: serde_json::Value) -> Result<CanonicalQuery> {
        CanonicalQuery::from_json(&v)
    }

    #[test]
    fn canonicalizes_aggregate_query() {
        let q = canon(json!({
            "select": ["country", {"AVG": "total_price"}],
            "from": "events",
            "where": [{"col": "TYPE", "op": "eq", "val": "purchase"}],
            "group_by": ["country"],
            "order_by": [{"col": "AVG(total_price)", "dir": "desc"}]
        })).unwrap();

        assert_eq!(q.select[1], SelectItem::Aggregate(AggFunc::Avg, "total_price".into()));
        assert_eq!(q.filters[0].col, "type");
        assert_eq!(q.order_by[0].col, "AVG(total_price)");
        assert_eq!(q.order_by[0].dir, SortDir::Desc);
        assert_eq!(q.output_columns(), vec!["country", "AVG(total_price)"]);
    }

    #[test]
    fn unknown_column_is_reported() {
        let err = canon(json!({
            "select": [{"SUM": "bid_pricee"}],
            "from": "events"
        })).unwrap_err();
        assert!(matches!(err, EngineError::UnknownColumn(c) if c == "bid_pricee"));
    }

    #[test]
    fn bare_select_must_be_grouped() {
        let err = canon(json!({
            "select": ["country", {"SUM": "bid_price"}],
            "from": "events",
            "group_by": ["day"]
        })).unwrap_err();
        assert!(matches!(err, EngineError::Validation { field, .. } if field == "select"));
    }

    #[test]
    fn sum_star_rejected() {
        let err = canon(json!({
            "select": [{"SUM": "*"}],
            "from": "events"
        })).unwrap_err();
        assert!(matches!(err, EngineError::Validation { field, .. } if field == "select"));
    }

    #[test]
    fn malformed_between_rejected() {
        let err = canon(json!({
            "select": [{"COUNT": "*"}],
            "from": "events",
            "where": [{"col": "day", "op": "between", "val": ["2024-06-01"]}]
        })).unwrap_err();
        assert!(matches!(err, EngineError::Validation { field, .. } if field == "where"));
    }

    #[test]
    fn duplicate_predicates_collapse_and_sort() {
        let q = canon(json!({
            "select": [{"COUNT": "*"}],
            "from": "events",
            "where": [
                {"col": "type", "op": "eq", "val": "impression"},
                {"col": "country", "op": "eq", "val": "JP"},
                {"col": "type", "op": "eq", "val": "impression"}
            ]
        })).unwrap();
        assert_eq!(q.filters.len(), 2);
        assert_eq!(q.filters[0].col, "country");
        assert_eq!(q.filters[1].col, "type");
    }

    #[test]
    fn order_by_must_reference_output() {
        let err = canon(json!({
            "select": ["day", {"SUM": "bid_price"}],
            "from": "events",
            "group_by": ["day"],
            "order_by": [{"col": "bid_price"}]
        })).unwrap_err();
        assert!(matches!(err, EngineError::Validation { field, .. } if field == "order_by"));
    }

    #[test]
    fn predicate_semantics() {
        let between = Predicate::Between(Value::str("2024-10-20"), Value::str("2024-10-23"));
        assert!(between.matches(&Value::str("2024-10-20")));
        assert!(between.matches(&Value::str("2024-10-23")));
        assert!(!between.matches(&Value::str("2024-10-24")));
        assert!(!between.matches(&Value::Null));

        let isin = Predicate::In(vec![Value::Int64(1), Value::Int64(3)]);
        assert!(isin.matches(&Value::Int32(3)));
        assert!(!isin.matches(&Value::Int32(2)));
    }
}
