//! 控制流图构建与清理
//!
//! 后继集合除终结指令的目标外，还包含本块及每个目标块的错误处理块：
//! 块内任意位置都可能出错，因此错误处理块可能在本块或后继块执行完之前就被进入。

use indexmap::IndexMap;
use std::collections::{BTreeSet, HashSet};
use tracing::trace;

use crate::middle::ir::{BlockId, FuncIR, Op};

/// 控制流图
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Cfg {
    pub succ: IndexMap<BlockId, Vec<BlockId>>,
    pub pred: IndexMap<BlockId, Vec<BlockId>>,
    /// 没有终结目标的块（return / unreachable）
    pub exits: BTreeSet<BlockId>,
}

impl Cfg {
    pub fn succs(
        &self,
        block: BlockId,
    ) -> &[BlockId] {
        self.succ.get(&block).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn preds(
        &self,
        block: BlockId,
    ) -> &[BlockId] {
        self.pred.get(&block).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// 按布局顺序构建控制流图
pub fn build(func: &FuncIR) -> Cfg {
    let mut cfg = Cfg::default();
    for &block in &func.layout {
        let mut succ: Vec<BlockId> = func
            .terminator(block)
            .map(|t| t.targets().into_vec())
            .unwrap_or_default();
        if succ.is_empty() {
            cfg.exits.insert(block);
        }

        let error_points: Vec<BlockId> = std::iter::once(block).chain(succ.iter().copied()).collect();
        for point in error_points {
            if let Some(handler) = func.block(point).error_handler {
                if !succ.contains(&handler) {
                    succ.push(handler);
                }
            }
        }
        cfg.succ.insert(block, succ);
        cfg.pred.insert(block, Vec::new());
    }

    let edges: Vec<(BlockId, BlockId)> = cfg
        .succ
        .iter()
        .flat_map(|(&from, tos)| tos.iter().map(move |&to| (from, to)))
        .collect();
    for (from, to) in edges {
        cfg.pred.entry(to).or_default().push(from);
    }
    cfg
}

/// 跳过只含一条 goto 的块，得到真正的跳转目标
///
/// 纯 goto 环保持原目标不变，保证清理幂等。
pub fn get_real_target(
    func: &FuncIR,
    label: BlockId,
) -> BlockId {
    let mut visited: HashSet<BlockId> = HashSet::new();
    let mut current = label;
    loop {
        visited.insert(current);
        let ops = &func.block(current).ops;
        let next = match (ops.len(), ops.last().and_then(|&id| func.op(id))) {
            (1, Some(Op::Goto { label })) => *label,
            _ => return current,
        };
        if visited.contains(&next) {
            return label;
        }
        current = next;
    }
}

/// 清理控制流图：折叠 goto 链并删除不可达块，直到不再变化
pub fn cleanup_cfg(func: &mut FuncIR) {
    let mut rounds = 0usize;
    loop {
        rounds += 1;
        thread_jumps(func);

        let cfg = build(func);
        let before = func.layout.len();
        let entry = func.entry();
        func.layout
            .retain(|&block| Some(block) == entry || !cfg.preds(block).is_empty());
        if func.layout.len() == before {
            break;
        }
    }
    trace!(func = %func.name(), rounds, blocks = func.layout.len(), "cleanup_cfg");
}

fn thread_jumps(func: &mut FuncIR) {
    let layout = func.layout.clone();
    for block in layout {
        let targets = match func.terminator(block) {
            Some(term) => term.targets(),
            None => continue,
        };
        let real: Vec<BlockId> = targets.iter().map(|&t| get_real_target(func, t)).collect();
        if let Some(term) = func.terminator_mut(block) {
            for (i, target) in real.into_iter().enumerate() {
                term.set_target(i, target);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middle::ir::{BranchOp, FuncDecl, FuncSignature, IrBuilder};
    use crate::middle::types::RType;

    fn none_func() -> FuncIR {
        FuncIR::new(FuncDecl::new("f", "m", FuncSignature::new(vec![], RType::none())), 1)
    }

    #[test]
    fn test_error_handler_is_successor() {
        let mut func = none_func();
        let mut builder = IrBuilder::new(&mut func);
        let handler = builder.new_block();
        let next = builder.new_block();
        builder.func_mut().block_mut(next).error_handler = Some(handler);
        builder.goto_and_activate(next);
        builder.unreachable();
        builder.activate_block(handler);
        builder.unreachable();

        let cfg = build(&func);
        let entry = func.layout[0];
        // entry 的后继 next 有错误处理块，因此 handler 也是 entry 的后继
        assert_eq!(cfg.succs(entry), &[next, handler]);
        assert_eq!(cfg.exits.len(), 2);
    }

    #[test]
    fn test_cleanup_threads_goto_chain() {
        let mut func = none_func();
        let mut builder = IrBuilder::new(&mut func);
        let hop = builder.new_block();
        let end = builder.new_block();
        builder.goto_and_activate(hop);
        builder.goto_and_activate(end);
        let none = builder.integer(1, RType::none(), 1);
        builder.ret(none, 1);

        cleanup_cfg(&mut func);
        assert_eq!(func.layout.len(), 2);
        assert!(!func.layout.contains(&hop));
        let entry = func.layout[0];
        assert_eq!(func.terminator(entry).map(|t| t.targets().to_vec()), Some(vec![end]));
    }

    #[test]
    fn test_cleanup_keeps_goto_cycle() {
        let mut func = none_func();
        let mut builder = IrBuilder::new(&mut func);
        let a = builder.new_block();
        let b = builder.new_block();
        let flag = builder.integer(1, RType::bool(), 1);
        let out = builder.new_block();
        builder.branch(flag, a, out, BranchOp::Bool, 1);
        builder.activate_block(a);
        builder.goto(b);
        builder.activate_block(b);
        builder.goto(a);
        builder.activate_block(out);
        builder.unreachable();

        cleanup_cfg(&mut func);
        let once = func.clone();
        cleanup_cfg(&mut func);
        assert_eq!(once, func);
        assert!(func.layout.contains(&a));
    }
}
