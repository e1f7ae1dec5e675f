//! 借用参数存活分析（前向 MUST）
//!
//! 参数以借用方式传入；一旦被重新赋值，该寄存器就持有自己的引用。

use std::collections::BTreeSet;

use super::cfg::Cfg;
use super::dataflow::{run_analysis, AnalysisKind, AnalysisResult, GenKill, OpVisitor};
use crate::middle::ir::{FuncIR, Op, ValueId};

pub struct BorrowedArgumentsVisitor<'a> {
    pub args: &'a BTreeSet<ValueId>,
}

impl OpVisitor<ValueId> for BorrowedArgumentsVisitor<'_> {
    fn gen_kill(
        &self,
        _func: &FuncIR,
        _id: ValueId,
        op: &Op,
    ) -> GenKill<ValueId> {
        match op {
            Op::Assign { dest, .. } if self.args.contains(dest) => (BTreeSet::new(), BTreeSet::from([*dest])),
            _ => (BTreeSet::new(), BTreeSet::new()),
        }
    }
}

/// 在每个位置仍处于借用状态的参数
pub fn analyze_borrowed_arguments(
    func: &FuncIR,
    cfg: &Cfg,
    borrowed: &BTreeSet<ValueId>,
) -> AnalysisResult<ValueId> {
    run_analysis(
        func,
        cfg,
        &BorrowedArgumentsVisitor { args: borrowed },
        borrowed,
        AnalysisKind::Must { universe: borrowed },
        false,
    )
}
