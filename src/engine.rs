//! 引擎上下文
//!
//! 把分区存储、预聚合 Catalog 与结果缓存绑在一个显式对象里。两个入口：
//! - `prepare`：从 source 全量重建分区与 rollup，清空结果缓存；
//! - `execute`：JSON 描述符 → 规范化 → 计划 → 执行，带规范化键缓存。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Instant;

use tracing::info;

use crate::catalog::AggregateCatalog;
use crate::executor::{self, ResultSet};
use crate::query::CanonicalQuery;
use crate::record::RawBatch;
use crate::store::{IngestStats, PartitionStore};
use crate::Result;

// ── prepare 统计 ──────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct PrepareStats {
    pub ingest:          IngestStats,
    pub elapsed_seconds: f64,
}

// ── Engine ────────────────────────────────────────────────────────────────────

pub struct Engine {
    store:   PartitionStore,
    catalog: AggregateCatalog,
    /// 规范化查询键 → 结果集。只在 prepare 时失效（prepare 之间数据只读）。
    cache:   RwLock<HashMap<String, ResultSet>>,
    root:    PathBuf,
}

impl Engine {
    /// 打开存储根目录。已有 prepare 产物时载入 rollup，否则得到空 Catalog。
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        Ok(Self {
            store:   PartitionStore::open(&root),
            catalog: AggregateCatalog::load(&root)?,
            cache:   RwLock::new(HashMap::new()),
            root,
        })
    }

    pub fn root(&self) -> &Path { &self.root }

    /// 全量重建：分区 ingest → rollup 构建 → 结果缓存清空
    pub fn prepare<S>(&mut self, sources: Vec<S>) -> Result<PrepareStats>
    where
        S: Iterator<Item = Result<RawBatch>> + Send,
    {
        let started = Instant::now();

        let ingest = self.store.ingest(sources)?;
        self.catalog = AggregateCatalog::build(&self.store)?;
        self.cache.write().expect("cache lock poisoned").clear();

        let elapsed_seconds = started.elapsed().as_secs_f64();
        info!(
            total_rows = ingest.total_rows(),
            dropped = ingest.dropped_rows,
            elapsed_seconds,
            "prepare finished",
        );
        Ok(PrepareStats { ingest, elapsed_seconds })
    }

    /// 执行 JSON 查询描述符
    pub fn execute(&self, descriptor: &serde_json::Value) -> Result<ResultSet> {
        let q = CanonicalQuery::from_json(descriptor)?;
        self.execute_canonical(&q)
    }

    /// 执行已规范化的查询（缓存命中时直接返回克隆）
    pub fn execute_canonical(&self, q: &CanonicalQuery) -> Result<ResultSet> {
        let key = q.cache_key();
        if let Some(hit) = self.cache.read().expect("cache lock poisoned").get(&key) {
            return Ok(hit.clone());
        }

        let rs = executor::execute(q, &self.store, &self.catalog)?;
        self.cache.write().expect("cache lock poisoned")
            .insert(key, rs.clone());
        Ok(rs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field_type::Value;
    use crate::record::RawRecord;
    use serde_json::json;

    fn rec(ts: i64, ty: &str, bid: &str) -> RawRecord {
        RawRecord {
            ts: ts.to_string(),
            event_type: ty.into(),
            auction_id: "a".into(),
            advertiser_id: "1".into(),
            publisher_id: "2".into(),
            bid_price: bid.into(),
            user_id: "3".into(),
            total_price: "".into(),
            country: "JP".into(),
        }
    }

    const DAY1: i64 = 1_717_200_000_000;

    #[test]
    fn prepare_invalidates_cache() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = Engine::open(dir.path()).unwrap();

        let first: Vec<Result<RawBatch>> = vec![Ok(vec![rec(DAY1, "impression", "1.5")])];
        engine.prepare(vec![first.into_iter()]).unwrap();

        let query = json!({
            "select": [{"SUM": "bid_price"}],
            "from": "events",
            "where": [{"col": "type", "op": "eq", "val": "impression"}]
        });
        assert_eq!(engine.execute(&query).unwrap().rows, vec![vec![Value::Float64(1.5)]]);
        // 缓存命中
        assert_eq!(engine.execute(&query).unwrap().rows, vec![vec![Value::Float64(1.5)]]);

        let second: Vec<Result<RawBatch>> =
            vec![Ok(vec![rec(DAY1, "impression", "2.0"), rec(DAY1, "impression", "3.0")])];
        engine.prepare(vec![second.into_iter()]).unwrap();
        // 重建后旧缓存必须失效
        assert_eq!(engine.execute(&query).unwrap().rows, vec![vec![Value::Float64(5.0)]]);
    }

    #[test]
    fn reopen_loads_built_rollups() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut engine = Engine::open(dir.path()).unwrap();
            let batches: Vec<Result<RawBatch>> =
                vec![Ok(vec![rec(DAY1, "impression", "4.0")])];
            engine.prepare(vec![batches.into_iter()]).unwrap();
        }

        let engine = Engine::open(dir.path()).unwrap();
        let rs = engine.execute(&json!({
            "select": ["day", {"SUM": "bid_price"}],
            "from": "events",
            "where": [{"col": "type", "op": "eq", "val": "impression"}],
            "group_by": ["day"]
        })).unwrap();
        assert_eq!(rs.rows, vec![vec![Value::str("2024-06-01"), Value::Float64(4.0)]]);
    }
}
