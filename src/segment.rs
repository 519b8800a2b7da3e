//! 分区段文件读写
//!
//! 文件格式：
//! ```text
//! ┌────────────────────────────────────┐
//! │  MAGIC  (8 bytes) "ADLOGSEG"       │
//! │  Version(4 bytes) = 1              │
//! ├────────────────────────────────────┤
//! │  PAGE REGION                       │
//! │    [len u32][Page] …（各列页按到   │ ← LZ4 + 编码
//! │    达顺序交错，Footer 记录归属）     │
//! ├────────────────────────────────────┤
//! │  FOOTER                            │
//! │    num_rows / num_columns          │
//! │    每列：page_count + page offsets  │
//! │    Footer CRC32  (4 bytes)         │
//! │    Footer length (4 bytes)         │
//! │    MAGIC         (8 bytes)         │
//! └────────────────────────────────────┘
//! ```
//!
//! 流式写：行到达即进各列当前页，页满落盘。列 Schema 不写入文件，
//! 由读取方提供（事件分区用固定 Schema，rollup 段用 Catalog 里的 Schema）。

use std::io::Write;
use std::path::Path;

use crate::column_writer::ColumnWriter;
use crate::common::{EngineError, Result};
use crate::field_type::{ColumnMeta, Value};
use crate::page::PageDecoder;

const MAGIC:   &[u8; 8] = b"ADLOGSEG";
const VERSION: u32      = 1;

// ── SegmentWriter ─────────────────────────────────────────────────────────────

pub struct SegmentWriter<W: Write> {
    cols:     Vec<ColumnWriter>,
    out:      W,
    pos:      u64,
    num_rows: u32,
}

impl<W: Write> SegmentWriter<W> {
    pub fn new(mut out: W, schema: Vec<ColumnMeta>) -> Result<Self> {
        out.write_all(MAGIC).map_err(|e| EngineError::SegmentIo(e.to_string()))?;
        out.write_all(&VERSION.to_le_bytes())
            .map_err(|e| EngineError::SegmentIo(e.to_string()))?;
        let cols = schema.into_iter().map(ColumnWriter::new).collect();
        Ok(Self { cols, out, pos: 12, num_rows: 0 })
    }

    /// 追加一行，`row` 的长度必须等于列数
    pub fn append_row(&mut self, row: Vec<Value>) -> Result<()> {
        if row.len() != self.cols.len() {
            return Err(EngineError::SchemaMismatch);
        }
        for (col, v) in self.cols.iter_mut().zip(row) {
            col.add_value(v, &mut self.out, &mut self.pos)?;
        }
        self.num_rows += 1;
        Ok(())
    }

    /// 完成写入：刷出尾页并落 Footer，返回文件总字节数
    pub fn finalize(mut self) -> Result<u64> {
        for col in &mut self.cols {
            col.finish(&mut self.out, &mut self.pos)?;
        }

        let mut footer = Vec::new();
        footer.extend_from_slice(&self.num_rows.to_le_bytes());
        footer.extend_from_slice(&(self.cols.len() as u32).to_le_bytes());
        for col in &self.cols {
            footer.extend_from_slice(&(col.page_offsets.len() as u32).to_le_bytes());
            for off in &col.page_offsets {
                footer.extend_from_slice(&off.to_le_bytes());
            }
        }

        let crc = crc32fast::hash(&footer);
        self.out.write_all(&footer).map_err(|e| EngineError::SegmentIo(e.to_string()))?;
        self.out.write_all(&crc.to_le_bytes())
            .map_err(|e| EngineError::SegmentIo(e.to_string()))?;
        self.out.write_all(&(footer.len() as u32).to_le_bytes())
            .map_err(|e| EngineError::SegmentIo(e.to_string()))?;
        self.out.write_all(MAGIC).map_err(|e| EngineError::SegmentIo(e.to_string()))?;

        Ok(self.pos + footer.len() as u64 + 16)
    }

    pub fn num_rows(&self) -> u32 { self.num_rows }
}

// ── SegmentReader ─────────────────────────────────────────────────────────────

pub struct SegmentReader {
    data:         Vec<u8>,
    schema:       Vec<ColumnMeta>,
    num_rows:     u32,
    page_offsets: Vec<Vec<u64>>,
}

impl SegmentReader {
    /// 从内存字节解析段
    pub fn open(data: Vec<u8>, schema: Vec<ColumnMeta>) -> Result<Self> {
        let n = data.len();
        if n < 32 || &data[..8] != MAGIC || &data[n - 8..] != MAGIC {
            return Err(EngineError::SegmentIo("invalid segment magic".into()));
        }
        let version = u32::from_le_bytes(data[8..12].try_into().unwrap());
        if version != VERSION {
            return Err(EngineError::SegmentIo(format!("unsupported segment version {version}")));
        }

        let footer_len   = u32::from_le_bytes(data[n - 12..n - 8].try_into().unwrap()) as usize;
        let footer_crc   = u32::from_le_bytes(data[n - 16..n - 12].try_into().unwrap());
        let footer_start = n.checked_sub(16 + footer_len)
            .ok_or_else(|| EngineError::SegmentIo("footer overruns file".into()))?;
        let footer = &data[footer_start..footer_start + footer_len];

        if crc32fast::hash(footer) != footer_crc {
            return Err(EngineError::ChecksumMismatch);
        }

        let (num_rows, num_cols, mut pos) = {
            if footer.len() < 8 {
                return Err(EngineError::SegmentIo("footer too short".into()));
            }
            (
                u32::from_le_bytes(footer[0..4].try_into().unwrap()),
                u32::from_le_bytes(footer[4..8].try_into().unwrap()) as usize,
                8usize,
            )
        };
        if num_cols != schema.len() {
            return Err(EngineError::SchemaMismatch);
        }

        let mut page_offsets = Vec::with_capacity(num_cols);
        for _ in 0..num_cols {
            if pos + 4 > footer.len() {
                return Err(EngineError::SegmentIo("footer truncated".into()));
            }
            let count = u32::from_le_bytes(footer[pos..pos + 4].try_into().unwrap()) as usize;
            pos += 4;
            let mut offs = Vec::with_capacity(count);
            for _ in 0..count {
                if pos + 8 > footer.len() {
                    return Err(EngineError::SegmentIo("footer truncated".into()));
                }
                offs.push(u64::from_le_bytes(footer[pos..pos + 8].try_into().unwrap()));
                pos += 8;
            }
            page_offsets.push(offs);
        }

        Ok(Self { data, schema, num_rows, page_offsets })
    }

    /// 打开磁盘上的段文件
    pub fn open_file(path: &Path, schema: Vec<ColumnMeta>) -> Result<Self> {
        let data = std::fs::read(path)
            .map_err(|e| EngineError::SegmentIo(format!("{}: {e}", path.display())))?;
        Self::open(data, schema)
    }

    pub fn num_rows(&self) -> u32 { self.num_rows }

    /// 读取一整列
    pub fn read_column(&self, col_idx: usize) -> Result<Vec<Value>> {
        let meta = self.schema.get(col_idx).ok_or(EngineError::SchemaMismatch)?;
        let offs = &self.page_offsets[col_idx];

        let mut values = Vec::with_capacity(self.num_rows as usize);
        for &off in offs {
            let off = off as usize;
            if off + 4 > self.data.len() {
                return Err(EngineError::SegmentIo("page offset out of range".into()));
            }
            let len = u32::from_le_bytes(self.data[off..off + 4].try_into().unwrap()) as usize;
            if off + 4 + len > self.data.len() {
                return Err(EngineError::SegmentIo("page overruns file".into()));
            }
            let page = PageDecoder::decode(
                &self.data[off + 4..off + 4 + len],
                meta.encoding, meta.compression, meta.field_type,
            )?;
            values.extend(page.values);
        }
        Ok(values)
    }

    /// 按行读出整个段（列转行）
    pub fn read_rows(&self) -> Result<Vec<Vec<Value>>> {
        let cols: Vec<Vec<Value>> = (0..self.schema.len())
            .map(|i| self.read_column(i))
            .collect::<Result<_>>()?;

        let n = self.num_rows as usize;
        if cols.iter().any(|c| c.len() != n) {
            return Err(EngineError::SegmentIo("column length mismatch".into()));
        }

        let mut rows = vec![Vec::with_capacity(cols.len()); n];
        for col in cols {
            for (row, v) in rows.iter_mut().zip(col) {
                row.push(v);
            }
        }
        Ok(rows)
    }
}

// ── 文件级辅助 ────────────────────────────────────────────────────────────────

/// 将行集写为段文件（父目录需已存在）
pub fn write_segment_file<I>(path: &Path, schema: Vec<ColumnMeta>, rows: I) -> Result<u32>
where
    I: IntoIterator<Item = Vec<Value>>,
{
    let file = std::fs::File::create(path)
        .map_err(|e| EngineError::SegmentIo(format!("{}: {e}", path.display())))?;
    let mut w = SegmentWriter::new(std::io::BufWriter::new(file), schema)?;
    for row in rows {
        w.append_row(row)?;
    }
    let n = w.num_rows();
    w.finalize()?;
    Ok(n)
}
