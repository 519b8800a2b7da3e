//! # adlog-query-engine 完整使用案例
//!
//! 演示引擎的全部核心功能：
//!
//! 1. 打开 Engine
//! 2. prepare：从模拟事件源全量重建分区与 rollup
//! 3. 执行五条典型查询（覆盖四个 rollup 命中路径与 scan 回退路径）

use adlog_query_engine::record::{RawBatch, RawRecord};
use adlog_query_engine::{Engine, Result};

use serde_json::json;

/// 模拟一天内的事件流，批大小 1000
fn synthetic_source(day_offset: i64) -> impl Iterator<Item = Result<RawBatch>> + Send {
    // 2024-06-01 00:00:00 UTC
    const BASE_TS: i64 = 1_717_200_000_000;
    let types     = ["serve", "impression", "click", "purchase"];
    let countries = ["JP", "US", "DE", "BR"];

    let rows: Vec<RawRecord> = (0..5_000i64)
        .map(|i| {
            let ty = types[(i % 4) as usize];
            RawRecord {
                ts:            (BASE_TS + day_offset * 86_400_000 + i * 977).to_string(),
                event_type:    ty.into(),
                auction_id:    format!("auc-{day_offset}-{i}"),
                advertiser_id: (100 + i % 7).to_string(),
                publisher_id:  (200 + i % 11).to_string(),
                bid_price:     if ty == "impression" { format!("{:.4}", 0.01 + (i % 50) as f64 * 0.003) } else { String::new() },
                user_id:       (10_000 + i % 900).to_string(),
                total_price:   if ty == "purchase" { format!("{:.2}", 1.99 + (i % 20) as f64) } else { String::new() },
                country:       countries[(i % 4 + i / 1250) as usize % 4].into(),
            }
        })
        .collect();

    rows.chunks(1000)
        .map(|c| Ok(c.to_vec()))
        .collect::<Vec<_>>()
        .into_iter()
}

fn main() -> Result<()> {
    println!("═══════════════════════════════════════════════════════════");
    println!("   adlog-query-engine 演示                                  ");
    println!("═══════════════════════════════════════════════════════════\n");

    // =========================================================================
    // 1. 打开 Engine
    // =========================================================================
    println!("【1】打开 Engine ...");
    let mut engine = Engine::open("/tmp/adlog-data")?;
    println!("    root = {}\n", engine.root().display());

    // =========================================================================
    // 2. prepare：三个并行 source，各覆盖一天
    // =========================================================================
    println!("【2】prepare：全量重建分区与 rollup ...");
    let stats = engine.prepare(vec![
        synthetic_source(0),
        synthetic_source(1),
        synthetic_source(2),
    ])?;
    println!("    ✓ 行数     = {}", stats.ingest.total_rows());
    println!("    ✓ 丢弃行数 = {}", stats.ingest.dropped_rows);
    println!("    ✓ 耗时     = {:.3}s\n", stats.elapsed_seconds);

    // =========================================================================
    // 3. 典型查询
    // =========================================================================
    let queries = [
        ("日级收入（daily_revenue rollup）", json!({
            "select": ["day", {"SUM": "bid_price"}],
            "from": "events",
            "where": [{"col": "type", "op": "eq", "val": "impression"}],
            "group_by": ["day"],
        })),
        ("JP 某时段 publisher 收入（scan + day 剪枝）", json!({
            "select": ["publisher_id", {"SUM": "bid_price"}],
            "from": "events",
            "where": [
                {"col": "type", "op": "eq", "val": "impression"},
                {"col": "country", "op": "eq", "val": "JP"},
                {"col": "day", "op": "between", "val": ["2024-06-01", "2024-06-02"]}
            ],
            "group_by": ["publisher_id"],
        })),
        ("国家平均客单价（country_purchase_value rollup）", json!({
            "select": ["country", {"AVG": "total_price"}],
            "from": "events",
            "where": [{"col": "type", "op": "eq", "val": "purchase"}],
            "group_by": ["country"],
            "order_by": [{"col": "AVG(total_price)", "dir": "desc"}]
        })),
        ("广告主事件量（advertiser_volume rollup）", json!({
            "select": ["advertiser_id", "type", {"COUNT": "*"}],
            "from": "events",
            "group_by": ["advertiser_id", "type"],
            "order_by": [{"col": "COUNT(*)", "dir": "desc"}],
            "limit": 5
        })),
        ("单日分钟级收入（scan + day 索引）", json!({
            "select": ["minute", {"SUM": "bid_price"}],
            "from": "events",
            "where": [
                {"col": "type", "op": "eq", "val": "impression"},
                {"col": "day", "op": "eq", "val": "2024-06-01"}
            ],
            "group_by": ["minute"],
            "order_by": [{"col": "minute", "dir": "asc"}],
            "limit": 5
        })),
    ];

    for (i, (title, q)) in queries.iter().enumerate() {
        println!("【{}】{title} ...", i + 3);
        let rs = engine.execute(q)?;
        println!("    列：{:?}", rs.columns);
        for row in rs.rows.iter().take(5) {
            let cells: Vec<String> = row.iter().map(|v| v.to_string()).collect();
            println!("      {}", cells.join(" | "));
        }
        if rs.rows.len() > 5 {
            println!("      …（共 {} 行）", rs.rows.len());
        }
        println!();
    }

    println!("═══════════════════════════════════════════════════════════");
    println!("   全部演示完成 ✓");
    println!("═══════════════════════════════════════════════════════════");
    Ok(())
}
