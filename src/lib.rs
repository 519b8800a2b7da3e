//! # adlog-query-engine
//!
//! 广告事件日志的嵌入式分析查询引擎：一次 prepare 全量重建列存分区与
//! 预聚合 rollup，之后以 JSON 描述符执行聚合查询。
//!
//! ## 整体架构
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        Engine                             │
//! │   prepare(sources)              execute(descriptor)      │
//! │        │                             │                    │
//! │        ▼                             ▼                    │
//! │  PartitionStore              CanonicalQuery (query)      │
//! │   ├─ ingest: rayon 并行 spill       │                    │
//! │   │   → 单线程合并 → staging 换入    ▼                    │
//! │   └─ type=<t>/data.seg          Planner                  │
//! │      type=impression/by_day/    ├─ Transform → rollup 段 │
//! │                                 └─ Scan → 分区剪枝扫描    │
//! │  AggregateCatalog                    │                    │
//! │   └─ 4 个固定 rollup (aggregates/)   ▼                    │
//! │                                 Executor → ResultSet     │
//! │                                 （排序 / limit / 缓存）    │
//! │                                                            │
//! │  Segment (列存文件)                                        │
//! │   ┌──────────────────────────────────────────────────┐    │
//! │   │  ColumnWriter × N (流式页落盘)                    │    │
//! │   │   ├─ encoding  (Plain/RLE/Delta/Dict)            │    │
//! │   │   ├─ compression (LZ4/None)                      │    │
//! │   │   └─ null bitmap + CRC32 页校验                   │    │
//! │   │  Footer (行数 + 每列页偏移 + CRC32)                │    │
//! │   └──────────────────────────────────────────────────┘    │
//! └──────────────────────────────────────────────────────────┘
//! ```

// ── 基础层 ────────────────────────────────────────────────────────────────────
pub mod common;
pub mod field_type;
pub mod schema;
pub mod record;

// ── Segment 层 ────────────────────────────────────────────────────────────────
pub mod encoding;
pub mod compression;
pub mod page;
pub mod column_writer;
pub mod segment;

// ── 存储与查询层 ──────────────────────────────────────────────────────────────
pub mod store;
pub mod catalog;
pub mod query;
pub mod planner;
pub mod executor;
pub mod engine;

pub use common::{EngineError, Result};
pub use engine::{Engine, PrepareStats};
pub use executor::ResultSet;
pub use field_type::Value;
