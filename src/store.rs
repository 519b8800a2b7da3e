//! 分区存储
//!
//! 磁盘布局（root 为存储根目录）：
//! ```text
//! root/partitions/type=<t>/data.seg            每个判别值一个分区段
//! root/partitions/type=impression/by_day/<d>.seg   最高写入量判别值的 day 级二级分区
//! ```
//!
//! ingest 流程：多 source 并行（rayon），每个 worker 按批消费、派生时间列，
//! 把每批按判别值落成私有 spill 段；随后单线程把同键 spill 合并为唯一的
//! 最终分区（一个分区绝不分裂成多个可读碎片）。全量重建：先写入 staging
//! 目录，成功后整体换入，旧分区不参与合并。
//!
//! 内存上界：worker 任一时刻只驻留一批记录 + 各列未满的当前页；
//! 合并阶段任一时刻只驻留一个 spill 段的行。

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::common::{EngineError, EventType, Result, DAY_INDEXED_TYPE};
use crate::field_type::Value;
use crate::record::{typed_row, RawBatch};
use crate::schema::{self, column_index};
use crate::segment::{write_segment_file, SegmentReader, SegmentWriter};

// ── ingest 统计 ───────────────────────────────────────────────────────────────

/// prepare 阶段的行数统计（原始输入的 type_counts）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub rows_per_type: HashMap<EventType, u64>,
    pub dropped_rows:  u64,
}

impl IngestStats {
    pub fn total_rows(&self) -> u64 {
        self.rows_per_type.values().sum()
    }
}

// ── PartitionStore ────────────────────────────────────────────────────────────

pub struct PartitionStore {
    root: PathBuf,
}

struct SpillFile {
    event_type: EventType,
    path:       PathBuf,
}

impl PartitionStore {
    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path { &self.root }

    fn partitions_dir(&self) -> PathBuf {
        self.root.join("partitions")
    }

    fn partition_file(&self, t: EventType) -> PathBuf {
        self.partitions_dir().join(format!("type={t}")).join("data.seg")
    }

    fn day_file(&self, t: EventType, day: &str) -> PathBuf {
        self.partitions_dir().join(format!("type={t}")).join("by_day").join(format!("{day}.seg"))
    }

    // ── ingest ────────────────────────────────────────────────────────────────

    /// 从一组 source 全量重建所有分区。
    /// 每个 source 是一个可失败的批迭代器；source 之间并行处理。
    pub fn ingest<S>(&self, sources: Vec<S>) -> Result<IngestStats>
    where
        S: Iterator<Item = Result<RawBatch>> + Send,
    {
        let staging = self.root.join("partitions.staging");
        let spill   = staging.join("spill");
        if staging.exists() {
            std::fs::remove_dir_all(&staging).map_err(fs_err)?;
        }
        std::fs::create_dir_all(&spill).map_err(fs_err)?;

        // 阶段一：并行按批落 spill 段（每个 worker 只写私有文件）
        let results: Vec<(Vec<SpillFile>, u64)> = sources
            .into_par_iter()
            .enumerate()
            .map(|(worker, source)| spill_source(worker, source, &spill))
            .collect::<Result<_>>()?;

        let mut dropped = 0u64;
        let mut spills: Vec<SpillFile> = Vec::new();
        for (files, d) in results {
            spills.extend(files);
            dropped += d;
        }
        // 合并顺序确定化：重建幂等要求同输入产出逐值相同的分区
        spills.sort_by(|a, b| a.path.cmp(&b.path));

        // 阶段二：单线程合并，每个判别值只产出一个最终分区
        let mut rows_per_type = HashMap::new();
        for t in EventType::ALL {
            let files: Vec<&SpillFile> = spills.iter().filter(|s| s.event_type == t).collect();
            if files.is_empty() {
                continue;
            }
            let n = consolidate(&staging, t, &files)?;
            info!(event_type = %t, rows = n, "partition consolidated");
            rows_per_type.insert(t, n);
        }

        std::fs::remove_dir_all(&spill).map_err(fs_err)?;

        // 整体换入：重建是全量替换，不与旧数据合并
        let finals = self.partitions_dir();
        if finals.exists() {
            std::fs::remove_dir_all(&finals).map_err(fs_err)?;
        }
        std::fs::rename(&staging, &finals).map_err(fs_err)?;

        if dropped > 0 {
            warn!(dropped, "records with unknown event type were dropped");
        }
        Ok(IngestStats { rows_per_type, dropped_rows: dropped })
    }

    // ── 读取 ─────────────────────────────────────────────────────────────────

    /// 读取一个判别值的完整分区；文件不存在视为空分区
    pub fn read_partition(&self, t: EventType) -> Result<Vec<Vec<Value>>> {
        let path = self.partition_file(t);
        if !path.exists() {
            return Ok(vec![]);
        }
        SegmentReader::open_file(&path, schema::event_metas())?.read_rows()
    }

    /// 读取 day 级二级分区；文件不存在视为空（该日无数据）
    pub fn read_day(&self, t: EventType, day: &str) -> Result<Vec<Vec<Value>>> {
        let path = self.day_file(t, day);
        if !path.exists() {
            return Ok(vec![]);
        }
        SegmentReader::open_file(&path, schema::event_metas())?.read_rows()
    }

    /// 该判别值是否建有 day 级索引
    pub fn has_day_index(&self, t: EventType) -> bool {
        t == DAY_INDEXED_TYPE
            && self.partitions_dir().join(format!("type={t}")).join("by_day").is_dir()
    }
}

// ── worker：一个 source 的 spill ─────────────────────────────────────────────

fn spill_source<S>(worker: usize, source: S, spill_dir: &Path) -> Result<(Vec<SpillFile>, u64)>
where
    S: Iterator<Item = Result<RawBatch>>,
{
    let mut files   = Vec::new();
    let mut dropped = 0u64;

    for (batch_idx, batch) in source.enumerate() {
        let batch = batch?;

        // 本批按判别值分桶；批结束即全部落盘释放
        let mut by_type: HashMap<EventType, Vec<Vec<Value>>> = HashMap::new();
        for raw in &batch {
            match typed_row(raw)? {
                Some(row) => by_type.entry(row.event_type).or_default().push(row.values),
                None => dropped += 1,
            }
        }
        drop(batch);

        for (t, rows) in by_type {
            let path = spill_dir.join(format!("w{worker:04}_b{batch_idx:06}_{t}.seg"));
            write_segment_file(&path, schema::event_metas(), rows)?;
            files.push(SpillFile { event_type: t, path });
        }
    }
    debug!(worker, spills = files.len(), "source spilled");
    Ok((files, dropped))
}

// ── 合并：同键 spill → 唯一最终分区（单线程调用）─────────────────────────────

fn consolidate(staging: &Path, t: EventType, files: &[&SpillFile]) -> Result<u64> {
    let part_dir = staging.join(format!("type={t}"));
    std::fs::create_dir_all(&part_dir).map_err(fs_err)?;

    let out = std::fs::File::create(part_dir.join("data.seg")).map_err(fs_err)?;
    let mut writer = SegmentWriter::new(std::io::BufWriter::new(out), schema::event_metas())?;

    // 最高写入量判别值额外按 day 分桶
    let day_dir = part_dir.join("by_day");
    let mut day_writers: HashMap<String, SegmentWriter<std::io::BufWriter<std::fs::File>>> =
        HashMap::new();
    if t == DAY_INDEXED_TYPE {
        std::fs::create_dir_all(&day_dir).map_err(fs_err)?;
    }
    let day_idx = column_index("day").expect("day is a schema column");

    let mut total = 0u64;
    for sf in files {
        // 一次只驻留一个 spill 段的行
        let rows = SegmentReader::open_file(&sf.path, schema::event_metas())?.read_rows()?;
        for row in rows {
            if t == DAY_INDEXED_TYPE {
                let day = String::from_utf8_lossy(
                    row[day_idx].as_bytes().unwrap_or_default(),
                ).into_owned();
                if !day_writers.contains_key(&day) {
                    let f = std::fs::File::create(day_dir.join(format!("{day}.seg")))
                        .map_err(fs_err)?;
                    day_writers.insert(
                        day.clone(),
                        SegmentWriter::new(std::io::BufWriter::new(f), schema::event_metas())?,
                    );
                }
                day_writers.get_mut(&day).expect("just inserted").append_row(row.clone())?;
            }
            writer.append_row(row)?;
            total += 1;
        }
    }

    writer.finalize()?;
    for (_, w) in day_writers {
        w.finalize()?;
    }
    Ok(total)
}

fn fs_err(e: std::io::Error) -> EngineError {
    EngineError::Ingest(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RawRecord;

    fn rec(ts: i64, ty: &str, country: &str, bid: &str) -> RawRecord {
        RawRecord {
            ts: ts.to_string(),
            event_type: ty.into(),
            auction_id: "a".into(),
            advertiser_id: "1".into(),
            publisher_id: "2".into(),
            bid_price: bid.into(),
            user_id: "3".into(),
            total_price: "".into(),
            country: country.into(),
        }
    }

    // 2024-06-01 00:00:00 UTC
    const DAY1: i64 = 1_717_200_000_000;
    const DAY2: i64 = DAY1 + 86_400_000;

    #[test]
    fn ingest_routes_by_type_and_day() {
        let dir = tempfile::tempdir().unwrap();
        let store = PartitionStore::open(dir.path());

        let batches: Vec<Result<RawBatch>> = vec![Ok(vec![
            rec(DAY1, "impression", "JP", "1.0"),
            rec(DAY1, "impression", "US", "2.0"),
            rec(DAY2, "impression", "US", "3.0"),
            rec(DAY1, "click", "JP", ""),
            rec(DAY1, "install", "JP", ""), // 未知判别值，丢弃
        ])];
        let stats = store.ingest(vec![batches.into_iter()]).unwrap();

        assert_eq!(stats.rows_per_type[&EventType::Impression], 3);
        assert_eq!(stats.rows_per_type[&EventType::Click], 1);
        assert_eq!(stats.dropped_rows, 1);

        assert_eq!(store.read_partition(EventType::Impression).unwrap().len(), 3);
        assert_eq!(store.read_day(EventType::Impression, "2024-06-01").unwrap().len(), 2);
        assert_eq!(store.read_day(EventType::Impression, "2024-06-02").unwrap().len(), 1);
        // 缺失分区/子分区 == 空，不报错
        assert!(store.read_partition(EventType::Purchase).unwrap().is_empty());
        assert!(store.read_day(EventType::Impression, "2030-01-01").unwrap().is_empty());
    }

    #[test]
    fn reingest_replaces_partitions() {
        let dir = tempfile::tempdir().unwrap();
        let store = PartitionStore::open(dir.path());

        let first: Vec<Result<RawBatch>> =
            vec![Ok(vec![rec(DAY1, "serve", "JP", ""), rec(DAY1, "serve", "US", "")])];
        store.ingest(vec![first.into_iter()]).unwrap();
        assert_eq!(store.read_partition(EventType::Serve).unwrap().len(), 2);

        // 重建后旧内容完全被替换（不合并）
        let second: Vec<Result<RawBatch>> = vec![Ok(vec![rec(DAY2, "serve", "JP", "")])];
        store.ingest(vec![second.into_iter()]).unwrap();
        assert_eq!(store.read_partition(EventType::Serve).unwrap().len(), 1);
    }

    #[test]
    fn parallel_sources_consolidate_to_single_partition() {
        let dir = tempfile::tempdir().unwrap();
        let store = PartitionStore::open(dir.path());

        let s1: Vec<Result<RawBatch>> = vec![Ok(vec![rec(DAY1, "purchase", "JP", "")])];
        let s2: Vec<Result<RawBatch>> = vec![Ok(vec![rec(DAY2, "purchase", "US", "")])];
        store.ingest(vec![s1.into_iter(), s2.into_iter()]).unwrap();

        let rows = store.read_partition(EventType::Purchase).unwrap();
        assert_eq!(rows.len(), 2);
    }
}
