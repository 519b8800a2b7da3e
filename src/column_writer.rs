//! 列写入器
//!
//! 每列独立维护当前页；页写满即刷入输出流并记录文件偏移，
//! 内存中任一时刻只驻留各列未满的当前页（ingest 内存上界依赖这一点）。

use std::io::Write;

use crate::common::{EngineError, Result};
use crate::field_type::{ColumnMeta, Value};
use crate::page::PageBuilder;

pub struct ColumnWriter {
    pub meta:         ColumnMeta,
    current:          PageBuilder,
    next_row_id:      u32,
    /// 本列每页在文件中的起始偏移（写入 Footer）
    pub page_offsets: Vec<u64>,
}

impl ColumnWriter {
    pub fn new(meta: ColumnMeta) -> Self {
        let current = PageBuilder::new(0, meta.encoding, meta.compression, meta.field_type);
        Self { meta, current, next_row_id: 0, page_offsets: Vec::new() }
    }

    /// 追加一个值；页满则刷到 `out`，`pos` 为文件写入指针
    pub fn add_value<W: Write>(&mut self, value: Value, out: &mut W, pos: &mut u64) -> Result<()> {
        if value.is_null() && !self.meta.is_nullable {
            return Err(EngineError::SchemaMismatch);
        }
        self.current.add(value);
        self.next_row_id += 1;

        if self.current.is_full() {
            self.flush_page(out, pos)?;
        }
        Ok(())
    }

    fn flush_page<W: Write>(&mut self, out: &mut W, pos: &mut u64) -> Result<()> {
        let next = PageBuilder::new(
            self.next_row_id, self.meta.encoding, self.meta.compression, self.meta.field_type,
        );
        let bytes = std::mem::replace(&mut self.current, next).build()?;

        // 页自带长度前缀，读取方按 Footer 的偏移定位
        self.page_offsets.push(*pos);
        out.write_all(&(bytes.len() as u32).to_le_bytes())
            .map_err(|e| EngineError::SegmentIo(e.to_string()))?;
        out.write_all(&bytes)
            .map_err(|e| EngineError::SegmentIo(e.to_string()))?;
        *pos += 4 + bytes.len() as u64;
        Ok(())
    }

    /// 收尾：刷出未满的最后一页
    pub fn finish<W: Write>(&mut self, out: &mut W, pos: &mut u64) -> Result<()> {
        if !self.current.is_empty() {
            self.flush_page(out, pos)?;
        }
        Ok(())
    }

    pub fn num_rows(&self) -> u32 { self.next_row_id }
}
