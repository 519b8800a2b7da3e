//! 预聚合 Catalog
//!
//! 固定的 rollup 集合，prepare 阶段从分区存储整体构建（分区重建时
//! rollup 必须整体重建，不做增量维护），查询阶段只读。
//!
//! AVG 永远不落预计算均值：均值无法在残余过滤后正确重组，
//! 因此承载 AVG 的 rollup 存 (sum, count) 列对，除法留到查询时。

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::common::{AggFunc, EngineError, EventType, Result};
use crate::field_type::{ColumnMeta, FieldType, Value};
use crate::schema;
use crate::segment::{write_segment_file, SegmentReader};
use crate::store::PartitionStore;

// ── Rollup 签名 ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Measure {
    pub func:   AggFunc,
    /// CountStar 时为 "*"
    pub column: &'static str,
}

#[derive(Debug)]
pub struct RollupSpec {
    pub name:     &'static str,
    pub group_by: &'static [&'static str],
    pub measures: &'static [Measure],
    /// 可选判别值过滤：(列名, eq 取值)。有 scope 的 rollup 只扫对应分区。
    pub scope:    Option<(&'static str, &'static str)>,
}

/// 签名规则表，最具体的排最前（Planner 按此顺序匹配）
pub const ROLLUPS: [RollupSpec; 4] = [
    RollupSpec {
        name:     "publisher_daily_revenue",
        group_by: &["publisher_id", "country", "day"],
        measures: &[Measure { func: AggFunc::Sum, column: "bid_price" }],
        scope:    Some(("type", "impression")),
    },
    RollupSpec {
        name:     "daily_revenue",
        group_by: &["day"],
        measures: &[Measure { func: AggFunc::Sum, column: "bid_price" }],
        scope:    Some(("type", "impression")),
    },
    RollupSpec {
        name:     "country_purchase_value",
        group_by: &["country"],
        measures: &[Measure { func: AggFunc::Avg, column: "total_price" }],
        scope:    Some(("type", "purchase")),
    },
    RollupSpec {
        name:     "advertiser_volume",
        group_by: &["advertiser_id", "type"],
        measures: &[Measure { func: AggFunc::CountStar, column: "*" }],
        scope:    None,
    },
];

/// 测度在 rollup 段里的存储列名
pub fn sum_column(col: &str) -> String   { format!("sum({col})") }
pub fn count_column(col: &str) -> String { format!("count({col})") }
pub const COUNT_STAR_COLUMN: &str = "count(*)";

impl Measure {
    /// 该测度占用的存储列（AVG 拆成 sum+count 两列）
    fn storage_columns(&self) -> Vec<ColumnMeta> {
        match self.func {
            AggFunc::Sum => vec![
                ColumnMeta::new(&sum_column(self.column), FieldType::Float64).nullable(),
            ],
            AggFunc::Count => vec![
                ColumnMeta::new(&count_column(self.column), FieldType::Int64),
            ],
            AggFunc::CountStar => vec![
                ColumnMeta::new(COUNT_STAR_COLUMN, FieldType::Int64),
            ],
            AggFunc::Avg => vec![
                ColumnMeta::new(&sum_column(self.column), FieldType::Float64).nullable(),
                ColumnMeta::new(&count_column(self.column), FieldType::Int64),
            ],
        }
    }
}

impl RollupSpec {
    /// rollup 段的完整列描述：分组列在前，测度存储列在后
    pub fn storage_schema(&self) -> Result<Vec<ColumnMeta>> {
        let mut metas = Vec::new();
        for g in self.group_by {
            metas.push(schema::column(g)?.meta());
        }
        for m in self.measures {
            metas.extend(m.storage_columns());
        }
        Ok(metas)
    }

    /// scope 隐含的待扫分区集合
    fn scoped_partitions(&self) -> Vec<EventType> {
        match self.scope {
            Some((_, v)) => EventType::parse(v).into_iter().collect(),
            None         => EventType::ALL.to_vec(),
        }
    }
}

// ── RollupTable（构建产物，查询阶段只读）───────────────────────────────────────

#[derive(Debug)]
pub struct RollupTable {
    pub columns: Vec<ColumnMeta>,
    pub rows:    Vec<Vec<Value>>,
}

impl RollupTable {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }
}

// ── AggregateCatalog ──────────────────────────────────────────────────────────

pub struct AggregateCatalog {
    tables: HashMap<&'static str, RollupTable>,
}

impl AggregateCatalog {
    /// 空 Catalog（尚未 prepare 的引擎）
    pub fn empty() -> Self {
        Self { tables: HashMap::new() }
    }

    /// 从分区存储整体构建全部 rollup，落盘到 root/aggregates/ 并载入
    pub fn build(store: &PartitionStore) -> Result<Self> {
        let dir = aggregates_dir(store.root());
        if dir.exists() {
            std::fs::remove_dir_all(&dir)
                .map_err(|e| EngineError::SegmentIo(e.to_string()))?;
        }
        std::fs::create_dir_all(&dir)
            .map_err(|e| EngineError::SegmentIo(e.to_string()))?;

        let mut tables = HashMap::new();
        for spec in &ROLLUPS {
            let table = build_rollup(store, spec)?;
            info!(rollup = spec.name, rows = table.rows.len(), "rollup built");
            write_segment_file(
                &dir.join(format!("{}.seg", spec.name)),
                table.columns.clone(),
                table.rows.iter().cloned(),
            )?;
            tables.insert(spec.name, table);
        }
        Ok(Self { tables })
    }

    /// 从磁盘载入已构建的 rollup；缺失的文件视为空 rollup
    pub fn load(root: &Path) -> Result<Self> {
        let dir = aggregates_dir(root);
        let mut tables = HashMap::new();
        for spec in &ROLLUPS {
            let schema = spec.storage_schema()?;
            let path = dir.join(format!("{}.seg", spec.name));
            let table = if path.exists() {
                let reader = SegmentReader::open_file(&path, schema.clone())?;
                RollupTable { columns: schema, rows: reader.read_rows()? }
            } else {
                RollupTable { columns: schema, rows: vec![] }
            };
            tables.insert(spec.name, table);
        }
        Ok(Self { tables })
    }

    pub fn table(&self, name: &str) -> Result<&RollupTable> {
        self.tables.get(name)
            .ok_or_else(|| EngineError::SegmentIo(format!("rollup {name:?} not built")))
    }
}

fn aggregates_dir(root: &Path) -> PathBuf {
    root.join("aggregates")
}

// ── 构建单个 rollup ───────────────────────────────────────────────────────────

fn build_rollup(store: &PartitionStore, spec: &RollupSpec) -> Result<RollupTable> {
    let columns = spec.storage_schema()?;

    let group_idx: Vec<usize> = spec.group_by.iter()
        .map(|g| schema::column_index(g).ok_or_else(|| EngineError::UnknownColumn((*g).into())))
        .collect::<Result<_>>()?;
    let measure_idx: Vec<Option<usize>> = spec.measures.iter()
        .map(|m| {
            if m.column == "*" { Ok(None) } else {
                schema::column_index(m.column)
                    .map(Some)
                    .ok_or_else(|| EngineError::UnknownColumn(m.column.into()))
            }
        })
        .collect::<Result<_>>()?;

    // 组键 → (分组列值, 每个测度的 (sum, 非 Null 计数, 行数))
    let mut groups: HashMap<Vec<u8>, (Vec<Value>, Vec<(f64, u64, u64)>)> = HashMap::new();

    for t in spec.scoped_partitions() {
        for row in store.read_partition(t)? {
            let key_vals: Vec<Value> = group_idx.iter().map(|&i| row[i].clone()).collect();
            let key = group_key(&key_vals);
            let entry = groups.entry(key)
                .or_insert_with(|| (key_vals, vec![(0.0, 0, 0); spec.measures.len()]));

            for (acc, idx) in entry.1.iter_mut().zip(&measure_idx) {
                acc.2 += 1;
                if let Some(i) = idx {
                    if !row[*i].is_null() {
                        acc.1 += 1;
                    }
                    if let Some(x) = row[*i].as_f64() {
                        acc.0 += x;
                    }
                }
            }
        }
    }

    // 输出顺序确定化：同输入重建必须产出逐值相同的 rollup
    let mut rows: Vec<Vec<Value>> = Vec::with_capacity(groups.len());
    let mut entries: Vec<_> = groups.into_iter().collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    for (_, (key_vals, accs)) in entries {
        let mut row = key_vals;
        for (m, (sum, non_null, total)) in spec.measures.iter().zip(accs) {
            match m.func {
                AggFunc::Sum => {
                    row.push(if non_null == 0 { Value::Null } else { Value::Float64(sum) });
                }
                AggFunc::Count     => row.push(Value::Int64(non_null as i64)),
                AggFunc::CountStar => row.push(Value::Int64(total as i64)),
                AggFunc::Avg => {
                    row.push(if non_null == 0 { Value::Null } else { Value::Float64(sum) });
                    row.push(Value::Int64(non_null as i64));
                }
            }
        }
        rows.push(row);
    }

    Ok(RollupTable { columns, rows })
}

/// 分组键编码：长度前缀 + 排序键字节，避免拼接歧义
pub fn group_key(values: &[Value]) -> Vec<u8> {
    let mut key = Vec::new();
    for v in values {
        let k = v.to_sort_key();
        key.extend_from_slice(&(k.len() as u32).to_le_bytes());
        // Null 与空字符串区分开
        key.push(u8::from(v.is_null()));
        key.extend_from_slice(&k);
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rollup_order_is_most_specific_first() {
        assert!(ROLLUPS[0].group_by.len() >= ROLLUPS[1].group_by.len());
    }

    #[test]
    fn avg_rollup_stores_sum_and_count() {
        let spec = ROLLUPS.iter().find(|s| s.name == "country_purchase_value").unwrap();
        let schema = spec.storage_schema().unwrap();
        let names: Vec<&str> = schema.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["country", "sum(total_price)", "count(total_price)"]);
    }

    #[test]
    fn group_key_distinguishes_null_from_empty() {
        assert_ne!(group_key(&[Value::Null]), group_key(&[Value::str("")]));
        assert_ne!(
            group_key(&[Value::str("ab"), Value::str("c")]),
            group_key(&[Value::str("a"), Value::str("bc")]),
        );
    }
}
