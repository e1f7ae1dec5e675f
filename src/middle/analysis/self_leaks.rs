//! "任意代码执行"分析（self 泄漏 / dirty）
//!
//! 单元格格 {∅, {()}}：某点之后若可能执行了任意代码（例如把 `self` 传给未知函数），
//! 就无法再对 `self` 的属性状态做可靠推断。
//!
//! 允许列表是保守的：只有确定不会运行用户代码、也不会暴露 `self` 的 op 才算干净。

use std::collections::BTreeSet;

use super::cfg::Cfg;
use super::dataflow::{run_analysis, AnalysisKind, AnalysisResult, GenKill, OpVisitor};
use crate::middle::ir::{ClassId, FuncIR, Op, Program, ValueId};

fn clean() -> GenKill<()> {
    (BTreeSet::new(), BTreeSet::new())
}

fn dirty() -> GenKill<()> {
    (BTreeSet::from([()]), BTreeSet::new())
}

pub struct SelfLeakedVisitor<'a> {
    pub program: &'a Program,
    pub self_reg: ValueId,
}

impl SelfLeakedVisitor<'_> {
    /// 任何源操作数是 `self` 都视为泄漏
    fn check_register_op(
        &self,
        op: &Op,
    ) -> GenKill<()> {
        if op.sources().contains(&self.self_reg) {
            dirty()
        } else {
            clean()
        }
    }

    /// 属性名其实是方法（property）时，读写会调用函数
    fn is_property(
        &self,
        class: ClassId,
        attr: &str,
    ) -> bool {
        class.index() < self.program.classes.len() && self.program.get_method(class, attr).is_some()
    }
}

impl OpVisitor<()> for SelfLeakedVisitor<'_> {
    fn gen_kill(
        &self,
        _func: &FuncIR,
        _id: ValueId,
        op: &Op,
    ) -> GenKill<()> {
        match op {
            Op::Goto { .. } | Op::Branch { .. } | Op::Unreachable => clean(),
            // 从函数返回会隐式交出 self
            Op::Return { .. } => dirty(),
            Op::Assign { dest, src } => {
                if *src == self.self_reg || *dest == self.self_reg {
                    dirty()
                } else {
                    clean()
                }
            }
            Op::Call { func, .. } => {
                // 基类 __init__ 不泄漏 self 时调用它是安全的
                let safe_init = self
                    .program
                    .functions
                    .get(func.index())
                    .filter(|callee| callee.decl.name == "__init__")
                    .and_then(|callee| callee.decl.class)
                    .and_then(|class| self.program.classes.get(class.index()))
                    .is_some_and(|class| !class.init_self_leak);
                if safe_init {
                    clean()
                } else {
                    self.check_register_op(op)
                }
            }
            Op::GetAttr { class, attr, .. } | Op::SetAttr { class, attr, .. } => {
                if self.is_property(*class, attr) {
                    self.check_register_op(op)
                } else {
                    clean()
                }
            }
            Op::MethodCall { .. }
            | Op::InitStatic { .. }
            | Op::TupleSet { .. }
            | Op::Box { .. }
            | Op::Cast { .. }
            | Op::Unbox { .. }
            | Op::RaiseStandardError { .. }
            | Op::CallC { .. }
            | Op::PrimitiveOp { .. } => self.check_register_op(op),
            // 释放引用可能触发析构函数
            Op::DecRef { .. } => dirty(),
            Op::LoadErrorValue { .. }
            | Op::LoadLiteral { .. }
            | Op::LoadStatic { .. }
            | Op::LoadGlobal { .. }
            | Op::TupleGet { .. }
            | Op::Truncate { .. }
            | Op::Extend { .. }
            | Op::Unborrow { .. }
            | Op::IntOp { .. }
            | Op::ComparisonOp { .. }
            | Op::LoadMem { .. }
            | Op::SetMem { .. }
            | Op::GetElementPtr { .. }
            | Op::LoadAddress { .. }
            | Op::KeepAlive { .. }
            | Op::IncRef { .. } => clean(),
        }
    }
}

pub fn analyze_self_leaks(
    program: &Program,
    func: &FuncIR,
    self_reg: ValueId,
    cfg: &Cfg,
) -> AnalysisResult<()> {
    run_analysis(
        func,
        cfg,
        &SelfLeakedVisitor { program, self_reg },
        &BTreeSet::new(),
        AnalysisKind::Maybe,
        false,
    )
}
