//! 寄存器定义分析（maybe / must）
//!
//! 只有 `Assign` 改变寄存器的定义状态。赋值一个 `undefines` 的错误值
//! （或在 `strict_errors` 下赋值任何错误值）使目标重新变为未定义。

use std::collections::BTreeSet;

use super::cfg::Cfg;
use super::dataflow::{run_analysis, AnalysisKind, AnalysisResult, GenKill, OpVisitor};
use crate::middle::ir::{FuncIR, Op, ValueId};

pub struct DefinedVisitor {
    pub strict_errors: bool,
}

impl OpVisitor<ValueId> for DefinedVisitor {
    fn gen_kill(
        &self,
        func: &FuncIR,
        _id: ValueId,
        op: &Op,
    ) -> GenKill<ValueId> {
        match op {
            Op::Assign { dest, src } => {
                let undefines = match func.op(*src) {
                    Some(Op::LoadErrorValue { undefines }) => *undefines || self.strict_errors,
                    _ => false,
                };
                if undefines {
                    (BTreeSet::new(), BTreeSet::from([*dest]))
                } else {
                    (BTreeSet::from([*dest]), BTreeSet::new())
                }
            }
            Op::Goto { .. }
            | Op::Branch { .. }
            | Op::Return { .. }
            | Op::Unreachable
            | Op::LoadErrorValue { .. }
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
            | Op::SetMem { .. }
            | Op::GetElementPtr { .. }
            | Op::LoadAddress { .. }
            | Op::KeepAlive { .. }
            | Op::IncRef { .. }
            | Op::DecRef { .. } => (BTreeSet::new(), BTreeSet::new()),
        }
    }
}

/// 在某路径上可能已定义的寄存器
pub fn analyze_maybe_defined_regs(
    func: &FuncIR,
    cfg: &Cfg,
    initial_defined: &BTreeSet<ValueId>,
) -> AnalysisResult<ValueId> {
    run_analysis(
        func,
        cfg,
        &DefinedVisitor { strict_errors: false },
        initial_defined,
        AnalysisKind::Maybe,
        false,
    )
}

/// 在所有路径上都已定义的寄存器
pub fn analyze_must_defined_regs(
    func: &FuncIR,
    cfg: &Cfg,
    initial_defined: &BTreeSet<ValueId>,
    regs: &BTreeSet<ValueId>,
    strict_errors: bool,
) -> AnalysisResult<ValueId> {
    run_analysis(
        func,
        cfg,
        &DefinedVisitor { strict_errors },
        initial_defined,
        AnalysisKind::Must { universe: regs },
        false,
    )
}
