//! 活跃变量分析（后向 MAYBE）
//!
//! 常量不参与；IncRef/DecRef 对活跃性透明，因此引用计数插入前后结果一致。

use std::collections::BTreeSet;

use super::cfg::Cfg;
use super::dataflow::{run_analysis, AnalysisKind, AnalysisResult, GenKill, OpVisitor};
use crate::middle::ir::{FuncIR, Op, ValueId};

pub struct LivenessVisitor;

fn non_trivial_sources(
    func: &FuncIR,
    op: &Op,
) -> BTreeSet<ValueId> {
    op.sources()
        .into_iter()
        .filter(|&src| !func.value(src).is_constant())
        .collect()
}

impl OpVisitor<ValueId> for LivenessVisitor {
    fn gen_kill(
        &self,
        func: &FuncIR,
        id: ValueId,
        op: &Op,
    ) -> GenKill<ValueId> {
        match op {
            Op::Goto { .. } | Op::Unreachable => (BTreeSet::new(), BTreeSet::new()),
            Op::Branch { .. } | Op::Return { .. } | Op::SetMem { .. } => {
                (non_trivial_sources(func, op), BTreeSet::new())
            }
            Op::Assign { dest, .. } => (non_trivial_sources(func, op), BTreeSet::from([*dest])),
            Op::IncRef { .. } | Op::DecRef { .. } => (BTreeSet::new(), BTreeSet::new()),
            Op::LoadErrorValue { .. }
            | Op::LoadLiteral { .. }
            | Op::GetAttr { .. }
            | Op::SetAttr { .. }
            | Op::LoadStatic { .. }
            | Op::InitStatic { .. }
            | Op::LoadGlobal { .. }
            | Op::TupleSet { .. }
            | Op::TupleGet { .. }
            | Op::Cast { .. }
            | Op::Box { .. }
            | Op::Unbox { .. }
            | Op::Truncate { .. }
            | Op::Extend { .. }
            | Op::Unborrow { .. }
            | Op::Call { .. }
            | Op::MethodCall { .. }
            | Op::CallC { .. }
            | Op::PrimitiveOp { .. }
            | Op::RaiseStandardError { .. }
            | Op::IntOp { .. }
            | Op::ComparisonOp { .. }
            | Op::LoadMem { .. }
            | Op::GetElementPtr { .. }
            | Op::LoadAddress { .. }
            | Op::KeepAlive { .. } => {
                let gen = non_trivial_sources(func, op);
                if func.value(id).is_void() {
                    (gen, BTreeSet::new())
                } else {
                    (gen, BTreeSet::from([id]))
                }
            }
        }
    }
}

pub fn analyze_live_regs(
    func: &FuncIR,
    cfg: &Cfg,
) -> AnalysisResult<ValueId> {
    run_analysis(func, cfg, &LivenessVisitor, &BTreeSet::new(), AnalysisKind::Maybe, true)
}
