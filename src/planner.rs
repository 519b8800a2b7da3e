//! 查询计划器
//!
//! 把规范化查询的签名逐条比对 rollup 规则表（最具体在前），命中则产出
//! transform 计划，否则回退 scan 计划。纯函数：同一规范化查询 + 不变的
//! Catalog 必然得到相同计划。
//!
//! 匹配条件：
//! 1. rollup 的分组列集合 == 查询 group_by 集合；
//! 2. rollup 的测度集覆盖查询请求的全部聚合
//!    （AVG(c) 存 sum+count，因此覆盖 SUM(c) 与 COUNT(c)）；
//! 3. 每个 where 谓词要么恰好是 rollup 的 scope 过滤（消费掉，不再重放），
//!    要么引用仍存在于 rollup 输出的分组列（保留为残余过滤）；
//!    谓词落在已被聚合掉的列上则强制失配。
//! 此外有 scope 的 rollup 要求查询必须带有该 scope 谓词——rollup 只含
//! scope 内的行，缺了它结果集就不等价。

use tracing::debug;

use crate::catalog::{Measure, RollupSpec, ROLLUPS};
use crate::common::AggFunc;
use crate::field_type::Value;
use crate::query::{CanonicalQuery, Filter, Predicate};

// ── Plan ──────────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum Plan<'a> {
    /// 读 rollup → 残余过滤 → 派生计算列 → 排序 → limit
    Transform {
        rollup:   &'static RollupSpec,
        residual: Vec<&'a Filter>,
    },
    /// 分区剪枝 → 过滤 → 分组聚合 → 排序 → limit
    Scan,
}

/// 为规范化查询选计划
pub fn plan<'a>(q: &'a CanonicalQuery) -> Plan<'a> {
    for spec in &ROLLUPS {
        if let Some(residual) = try_match(q, spec) {
            debug!(rollup = spec.name, residual = residual.len(), "planner: rollup hit");
            return Plan::Transform { rollup: spec, residual };
        }
    }
    debug!("planner: no rollup matched, falling back to scan");
    Plan::Scan
}

fn try_match<'a>(q: &'a CanonicalQuery, spec: &'static RollupSpec) -> Option<Vec<&'a Filter>> {
    // 分组列集合相等
    if q.group_by.len() != spec.group_by.len()
        || !q.group_by.iter().all(|g| spec.group_by.contains(&g.as_str()))
    {
        return None;
    }

    // 测度覆盖
    for (func, col) in q.aggregates() {
        if !spec.measures.iter().any(|m| covers(m, func, col)) {
            return None;
        }
    }

    // 谓词分拣：scope 消费 / 残余保留 / 其余失配
    let mut residual = Vec::new();
    let mut scope_seen = false;
    for f in &q.filters {
        if is_scope_filter(f, spec) {
            scope_seen = true;
        } else if spec.group_by.contains(&f.col.as_str()) {
            residual.push(f);
        } else {
            return None;
        }
    }
    if spec.scope.is_some() && !scope_seen {
        return None;
    }
    Some(residual)
}

/// 测度 `m` 是否覆盖请求的聚合 (func, col)
fn covers(m: &Measure, func: AggFunc, col: &str) -> bool {
    match func {
        AggFunc::Sum       => m.column == col && matches!(m.func, AggFunc::Sum | AggFunc::Avg),
        AggFunc::Count     => m.column == col && matches!(m.func, AggFunc::Count | AggFunc::Avg),
        AggFunc::Avg       => m.column == col && m.func == AggFunc::Avg,
        AggFunc::CountStar => m.func == AggFunc::CountStar,
    }
}

fn is_scope_filter(f: &Filter, spec: &RollupSpec) -> bool {
    let Some((col, val)) = spec.scope else { return false };
    f.col == col && matches!(&f.pred, Predicate::Eq(v) if *v == Value::str(val))
}
