//! 查询执行器
//!
//! 两条执行路径共享同一套排序 / limit 尾段：
//! - transform：读 rollup 段 → 残余过滤 → 按 select 派生输出列（AVG 在此做
//!   sum/count 除法）；
//! - scan：判别值剪枝（type 的 eq/in）→ day 级剪枝（day 的 eq/between，且仅当
//!   该判别值建有 day 索引）→ 对剪枝后的行重放全部谓词 → 分组聚合。
//!
//! 输出顺序确定化：order_by 键比较之后以整行升序打破平局，order_by 为空时
//! 退化为整行升序。两条路径对同一查询必须产出逐值相同的结果集。

use std::collections::HashMap;

use tracing::debug;

use crate::catalog::{
    count_column, group_key, sum_column, AggregateCatalog, RollupTable, COUNT_STAR_COLUMN,
};
use crate::common::{AggFunc, EngineError, EventType, Result, SortDir};
use crate::field_type::Value;
use crate::planner::{plan, Plan};
use crate::query::{CanonicalQuery, Filter, Predicate, SelectItem};
use crate::record::days_in_range;
use crate::schema;
use crate::store::PartitionStore;

// ── ResultSet ─────────────────────────────────────────────────────────────────

/// 查询结果：表头与 select 顺序一致
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows:    Vec<Vec<Value>>,
}

/// 执行规范化查询
pub fn execute(
    q: &CanonicalQuery,
    store: &PartitionStore,
    catalog: &AggregateCatalog,
) -> Result<ResultSet> {
    let mut rows = match plan(q) {
        Plan::Transform { rollup, residual } => {
            execute_transform(q, catalog.table(rollup.name)?, &residual)?
        }
        Plan::Scan => execute_scan(q, store)?,
    };

    sort_rows(&mut rows, q);
    if let Some(n) = q.limit {
        rows.truncate(n);
    }

    debug!(rows = rows.len(), "query executed");
    Ok(ResultSet { columns: q.output_columns(), rows })
}

// ── transform 路径 ────────────────────────────────────────────────────────────

fn execute_transform(
    q: &CanonicalQuery,
    table: &RollupTable,
    residual: &[&Filter],
) -> Result<Vec<Vec<Value>>> {
    // select 各项在 rollup 段里的取值方式
    enum Pick {
        Direct(usize),
        /// (sum 列, count 列)，查询时做除法
        Ratio(usize, usize),
    }

    let col = |name: &str| -> Result<usize> {
        table.column_index(name)
            .ok_or_else(|| EngineError::SegmentIo(format!("rollup misses column {name:?}")))
    };
    let picks: Vec<Pick> = q.select.iter()
        .map(|item| {
            Ok(match item {
                SelectItem::Column(c) => Pick::Direct(col(c)?),
                SelectItem::Aggregate(AggFunc::Sum, c)   => Pick::Direct(col(&sum_column(c))?),
                SelectItem::Aggregate(AggFunc::Count, c) => Pick::Direct(col(&count_column(c))?),
                SelectItem::Aggregate(AggFunc::CountStar, _) => {
                    Pick::Direct(col(COUNT_STAR_COLUMN)?)
                }
                SelectItem::Aggregate(AggFunc::Avg, c) => {
                    Pick::Ratio(col(&sum_column(c))?, col(&count_column(c))?)
                }
            })
        })
        .collect::<Result<_>>()?;

    let residual_idx: Vec<(usize, &Predicate)> = residual.iter()
        .map(|f| Ok((col(&f.col)?, &f.pred)))
        .collect::<Result<_>>()?;

    let mut out = Vec::new();
    for row in &table.rows {
        if !residual_idx.iter().all(|(i, p)| p.matches(&row[*i])) {
            continue;
        }
        out.push(picks.iter()
            .map(|pick| match pick {
                Pick::Direct(i)      => row[*i].clone(),
                Pick::Ratio(s, n) => {
                    match (row[*s].as_f64(), row[*n].as_i64()) {
                        (Some(sum), Some(cnt)) if cnt > 0 => Value::Float64(sum / cnt as f64),
                        _                                 => Value::Null,
                    }
                }
            })
            .collect());
    }
    Ok(out)
}

// ── scan 路径 ─────────────────────────────────────────────────────────────────

fn execute_scan(q: &CanonicalQuery, store: &PartitionStore) -> Result<Vec<Vec<Value>>> {
    let rows = scan_rows(q, store)?;

    if q.aggregates().is_empty() && q.group_by.is_empty() {
        // 纯投影
        let idx: Vec<usize> = q.select.iter()
            .map(|s| match s {
                SelectItem::Column(c) => {
                    schema::column_index(c).ok_or_else(|| EngineError::UnknownColumn(c.clone()))
                }
                SelectItem::Aggregate(..) => unreachable!("rejected at canonicalization"),
            })
            .collect::<Result<_>>()?;
        return Ok(rows.into_iter()
            .map(|row| idx.iter().map(|&i| row[i].clone()).collect())
            .collect());
    }

    aggregate_rows(q, rows)
}

/// 剪枝后读出候选行，并重放全部谓词
fn scan_rows(q: &CanonicalQuery, store: &PartitionStore) -> Result<Vec<Vec<Value>>> {
    let types = pruned_types(&q.filters);
    let days  = pruned_days(&q.filters);

    let filter_idx: Vec<(usize, &Predicate)> = q.filters.iter()
        .map(|f| {
            schema::column_index(&f.col)
                .map(|i| (i, &f.pred))
                .ok_or_else(|| EngineError::UnknownColumn(f.col.clone()))
        })
        .collect::<Result<_>>()?;

    let mut out = Vec::new();
    for t in types {
        let candidates = match &days {
            Some(days) if store.has_day_index(t) => {
                let mut rows = Vec::new();
                for day in days {
                    rows.extend(store.read_day(t, day)?);
                }
                rows
            }
            _ => store.read_partition(t)?,
        };
        // 剪枝只缩小读取范围，谓词仍整体重放
        out.extend(candidates.into_iter()
            .filter(|row| filter_idx.iter().all(|(i, p)| p.matches(&row[*i]))));
    }
    debug!(rows = out.len(), "scan candidates after pruning and filtering");
    Ok(out)
}

/// type 列的 eq/in 谓词决定待扫分区；未知判别值不对应任何分区
fn pruned_types(filters: &[Filter]) -> Vec<EventType> {
    for f in filters {
        if f.col != "type" {
            continue;
        }
        match &f.pred {
            Predicate::Eq(v) => {
                return value_str(v).and_then(EventType::parse).into_iter().collect();
            }
            Predicate::In(vs) => {
                return vs.iter()
                    .filter_map(|v| value_str(v).and_then(EventType::parse))
                    .collect();
            }
            _ => {}
        }
    }
    EventType::ALL.to_vec()
}

/// day 列的 eq/between 谓词给出候选日；其他算子不参与剪枝
fn pruned_days(filters: &[Filter]) -> Option<Vec<String>> {
    for f in filters {
        if f.col != "day" {
            continue;
        }
        match &f.pred {
            Predicate::Eq(v)         => return value_str(v).map(|s| vec![s.to_owned()]),
            Predicate::Between(a, b) => {
                if let (Some(lo), Some(hi)) = (value_str(a), value_str(b)) {
                    return Some(days_in_range(lo, hi));
                }
            }
            _ => {}
        }
    }
    None
}

fn value_str(v: &Value) -> Option<&str> {
    std::str::from_utf8(v.as_bytes()?).ok()
}

/// 分组聚合；group_by 为空时聚成单行全局结果（即使无匹配行）
fn aggregate_rows(q: &CanonicalQuery, rows: Vec<Vec<Value>>) -> Result<Vec<Vec<Value>>> {
    let group_idx: Vec<usize> = q.group_by.iter()
        .map(|g| schema::column_index(g).ok_or_else(|| EngineError::UnknownColumn(g.clone())))
        .collect::<Result<_>>()?;
    let aggs = q.aggregates();
    let agg_idx: Vec<Option<usize>> = aggs.iter()
        .map(|(_, c)| {
            if *c == "*" { Ok(None) } else {
                schema::column_index(c)
                    .map(Some)
                    .ok_or_else(|| EngineError::UnknownColumn((*c).into()))
            }
        })
        .collect::<Result<_>>()?;

    // 组键 → (分组列值, 每个聚合的 (sum, 非 Null 计数, 行数))
    let mut groups: HashMap<Vec<u8>, (Vec<Value>, Vec<(f64, u64, u64)>)> = HashMap::new();
    if q.group_by.is_empty() {
        groups.insert(Vec::new(), (Vec::new(), vec![(0.0, 0, 0); aggs.len()]));
    }

    for row in rows {
        let key_vals: Vec<Value> = group_idx.iter().map(|&i| row[i].clone()).collect();
        let key = group_key(&key_vals);
        let entry = groups.entry(key)
            .or_insert_with(|| (key_vals, vec![(0.0, 0, 0); aggs.len()]));
        for (acc, idx) in entry.1.iter_mut().zip(&agg_idx) {
            acc.2 += 1;
            if let Some(i) = idx {
                // 非数值列也可 COUNT：计数看 Null，求和看数值
                if !row[*i].is_null() {
                    acc.1 += 1;
                }
                if let Some(x) = row[*i].as_f64() {
                    acc.0 += x;
                }
            }
        }
    }

    // 按 select 顺序拼输出行；SUM/AVG 零个非 Null 输入 → Null，COUNT → 0
    let group_pos = |c: &str| q.group_by.iter().position(|g| g == c);
    let agg_pos   = |f: AggFunc, c: &str| {
        aggs.iter().position(|(af, ac)| *af == f && *ac == c)
    };

    let mut out = Vec::with_capacity(groups.len());
    for (_, (key_vals, accs)) in groups {
        let row: Vec<Value> = q.select.iter()
            .map(|item| match item {
                SelectItem::Column(c) => {
                    key_vals[group_pos(c).expect("validated against group_by")].clone()
                }
                SelectItem::Aggregate(f, c) => {
                    let (sum, non_null, total) =
                        accs[agg_pos(*f, c).expect("aggregates() covers select")];
                    match f {
                        AggFunc::Sum => {
                            if non_null == 0 { Value::Null } else { Value::Float64(sum) }
                        }
                        AggFunc::Avg => {
                            if non_null == 0 {
                                Value::Null
                            } else {
                                Value::Float64(sum / non_null as f64)
                            }
                        }
                        AggFunc::Count     => Value::Int64(non_null as i64),
                        AggFunc::CountStar => Value::Int64(total as i64),
                    }
                }
            })
            .collect();
        out.push(row);
    }
    Ok(out)
}

// ── 排序（两条路径共用）───────────────────────────────────────────────────────

/// order_by 键逐个比较，平局以整行升序打破；order_by 为空即整行升序
fn sort_rows(rows: &mut [Vec<Value>], q: &CanonicalQuery) {
    let columns = q.output_columns();
    let keys: Vec<(usize, SortDir)> = q.order_by.iter()
        .map(|k| {
            let i = columns.iter().position(|c| *c == k.col)
                .expect("order keys resolved at canonicalization");
            (i, k.dir)
        })
        .collect();

    rows.sort_by(|a, b| {
        for (i, dir) in &keys {
            let ord = a[*i].total_cmp(&b[*i]);
            let ord = match dir {
                SortDir::Asc  => ord,
                SortDir::Desc => ord.reverse(),
            };
            if ord != std::cmp::Ordering::Equal {
                return ord;
            }
        }
        // 整行升序平局裁决
        for (x, y) in a.iter().zip(b.iter()) {
            let ord = x.total_cmp(y);
            if ord != std::cmp::Ordering::Equal {
                return ord;
            }
        }
        std::cmp::Ordering::Equal
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{RawBatch, RawRecord};
    use serde_json::json;

    fn rec(ts: i64, ty: &str, country: &str, bid: &str, total: &str) -> RawRecord {
        RawRecord {
            ts: ts.to_string(),
            event_type: ty.into(),
            auction_id: "a".into(),
            advertiser_id: "7".into(),
            publisher_id: "42".into(),
            bid_price: bid.into(),
            user_id: "3".into(),
            total_price: total.into(),
            country: country.into(),
        }
    }

    // 2024-06-01 00:00:00 UTC
    const DAY1: i64 = 1_717_200_000_000;
    const DAY2: i64 = DAY1 + 86_400_000;

    fn fixture() -> (tempfile::TempDir, PartitionStore, AggregateCatalog) {
        let dir = tempfile::tempdir().unwrap();
        let store = PartitionStore::open(dir.path());
        let batches: Vec<Result<RawBatch>> = vec![Ok(vec![
            rec(DAY1, "impression", "JP", "1.0", ""),
            rec(DAY1, "impression", "US", "2.0", ""),
            rec(DAY2, "impression", "US", "3.0", ""),
            rec(DAY1, "purchase", "US", "", "10.0"),
            rec(DAY2, "purchase", "US", "", "30.0"),
            rec(DAY1, "click", "JP", "", ""),
        ])];
        store.ingest(vec![batches.into_iter()]).unwrap();
        let catalog = AggregateCatalog::build(&store).unwrap();
        (dir, store, catalog)
    }

    fn run(store: &PartitionStore, catalog: &AggregateCatalog, v: serde_json::Value) -> ResultSet {
        let q = CanonicalQuery::from_json(&v).unwrap();
        execute(&q, store, catalog).unwrap()
    }

    #[test]
    fn transform_and_scan_agree() {
        let (_dir, store, catalog) = fixture();
        // daily_revenue 命中 rollup
        let hit = run(&store, &catalog, json!({
            "select": ["day", {"SUM": "bid_price"}],
            "from": "events",
            "where": [{"col": "type", "op": "eq", "val": "impression"}],
            "group_by": ["day"]
        }));
        // hour 分组无 rollup，必走 scan；按 day 汇总后应一致
        let scan = run(&store, &catalog, json!({
            "select": ["day", {"SUM": "bid_price"}],
            "from": "events",
            "where": [{"col": "type", "op": "eq", "val": "impression"},
                      {"col": "bid_price", "op": "gt", "val": 0.0}],
            "group_by": ["day"]
        }));
        assert_eq!(hit.rows, scan.rows);
        assert_eq!(hit.rows, vec![
            vec![Value::str("2024-06-01"), Value::Float64(3.0)],
            vec![Value::str("2024-06-02"), Value::Float64(3.0)],
        ]);
    }

    #[test]
    fn global_aggregate_without_group() {
        let (_dir, store, catalog) = fixture();
        let rs = run(&store, &catalog, json!({
            "select": [{"SUM": "bid_price"}],
            "from": "events",
            "where": [{"col": "type", "op": "eq", "val": "impression"}]
        }));
        assert_eq!(rs.rows, vec![vec![Value::Float64(6.0)]]);
    }

    #[test]
    fn empty_match_yields_null_sum_and_zero_count() {
        let (_dir, store, catalog) = fixture();
        let rs = run(&store, &catalog, json!({
            "select": [{"SUM": "bid_price"}, {"COUNT": "bid_price"}, {"COUNT": "*"}],
            "from": "events",
            "where": [{"col": "country", "op": "eq", "val": "ZZ"}]
        }));
        assert_eq!(rs.rows, vec![vec![Value::Null, Value::Int64(0), Value::Int64(0)]]);
    }

    #[test]
    fn avg_from_rollup_matches_scan() {
        let (_dir, store, catalog) = fixture();
        let via_rollup = run(&store, &catalog, json!({
            "select": ["country", {"AVG": "total_price"}],
            "from": "events",
            "where": [{"col": "type", "op": "eq", "val": "purchase"}],
            "group_by": ["country"]
        }));
        assert_eq!(via_rollup.rows, vec![
            vec![Value::str("US"), Value::Float64(20.0)],
        ]);
        // week 分组强制 scan，同一数据的全局均值一致
        let via_scan = run(&store, &catalog, json!({
            "select": ["week", {"AVG": "total_price"}],
            "from": "events",
            "where": [{"col": "type", "op": "eq", "val": "purchase"}],
            "group_by": ["week"]
        }));
        let avg = via_scan.rows[0][1].as_f64().unwrap();
        assert!((avg - 20.0).abs() < 1e-9);
    }

    #[test]
    fn day_pruning_between() {
        let (_dir, store, catalog) = fixture();
        let rs = run(&store, &catalog, json!({
            "select": [{"COUNT": "*"}],
            "from": "events",
            "where": [
                {"col": "type", "op": "eq", "val": "impression"},
                {"col": "day", "op": "between", "val": ["2024-06-02", "2024-06-03"]},
                {"col": "country", "op": "eq", "val": "US"}
            ]
        }));
        assert_eq!(rs.rows, vec![vec![Value::Int64(1)]]);
    }

    #[test]
    fn unknown_type_literal_scans_nothing() {
        let (_dir, store, catalog) = fixture();
        let rs = run(&store, &catalog, json!({
            "select": [{"COUNT": "*"}],
            "from": "events",
            "where": [{"col": "type", "op": "eq", "val": "install"}]
        }));
        assert_eq!(rs.rows, vec![vec![Value::Int64(0)]]);
    }

    #[test]
    fn order_by_desc_with_limit() {
        let (_dir, store, catalog) = fixture();
        let rs = run(&store, &catalog, json!({
            "select": ["country", {"COUNT": "*"}],
            "from": "events",
            "where": [{"col": "type", "op": "in", "val": ["impression", "click"]}],
            "group_by": ["country"],
            "order_by": [{"col": "COUNT(*)", "dir": "desc"}],
            "limit": 1
        }));
        // JP: impression + click = 2, US: 2 次 impression = 2，平局按整行升序 → JP 在前
        assert_eq!(rs.rows, vec![vec![Value::str("JP"), Value::Int64(2)]]);
    }

    #[test]
    fn projection_without_aggregates() {
        let (_dir, store, catalog) = fixture();
        let rs = run(&store, &catalog, json!({
            "select": ["country", "day"],
            "from": "events",
            "where": [{"col": "type", "op": "eq", "val": "purchase"}]
        }));
        assert_eq!(rs.columns, vec!["country", "day"]);
        assert_eq!(rs.rows, vec![
            vec![Value::str("US"), Value::str("2024-06-01")],
            vec![Value::str("US"), Value::str("2024-06-02")],
        ]);
    }
}
