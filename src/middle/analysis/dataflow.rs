//! 通用数据流分析引擎
//!
//! 基于 gen/kill 集合的工作表不动点求解器，支持前向/后向与 MAYBE/MUST 两种汇合方式。
//!
//! # 算法
//!
//! 1. 按 op 顺序（后向分析时逆序）折叠出每个块的 gen/kill：
//!    `gen' = (gen - op_kill) ∪ op_gen`，`kill' = (kill - op_gen) ∪ op_kill`
//! 2. 工作表迭代到不动点：入口块与无前驱的块以 `initial` 参与汇合，其余对前驱的
//!    after 求并（MAYBE）或求交（MUST，从 universe 开始）
//! 3. 对每个块线性重放，得到每个 op 的 before/after

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt::Debug;

use crate::middle::analysis::cfg::Cfg;
use crate::middle::ir::{BlockId, FuncIR, Op, OpKey, ValueId};

/// 单个 op 的 (gen, kill)
pub type GenKill<T> = (BTreeSet<T>, BTreeSet<T>);

/// 为每个 op 计算 gen/kill 的访问器
pub trait OpVisitor<T> {
    fn gen_kill(
        &self,
        func: &FuncIR,
        id: ValueId,
        op: &Op,
    ) -> GenKill<T>;
}

/// 汇合方式；MUST 分析必须给出全集
#[derive(Debug)]
pub enum AnalysisKind<'a, T> {
    /// 任一路径成立（并集）
    Maybe,
    /// 所有路径成立（交集）
    Must { universe: &'a BTreeSet<T> },
}

impl<T> Clone for AnalysisKind<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for AnalysisKind<'_, T> {}

/// 分析结果，按 (块, op 下标) 索引
#[derive(Debug, Clone)]
pub struct AnalysisResult<T> {
    pub before: HashMap<OpKey, BTreeSet<T>>,
    pub after: HashMap<OpKey, BTreeSet<T>>,
    /// 工作表出队次数
    pub iterations: usize,
}

impl<T: Ord> AnalysisResult<T> {
    pub fn before(
        &self,
        key: OpKey,
    ) -> Option<&BTreeSet<T>> {
        self.before.get(&key)
    }

    pub fn after(
        &self,
        key: OpKey,
    ) -> Option<&BTreeSet<T>> {
        self.after.get(&key)
    }

    pub fn before_contains(
        &self,
        key: OpKey,
        item: &T,
    ) -> bool {
        self.before.get(&key).is_some_and(|s| s.contains(item))
    }

    pub fn after_contains(
        &self,
        key: OpKey,
        item: &T,
    ) -> bool {
        self.after.get(&key).is_some_and(|s| s.contains(item))
    }
}

/// 运行数据流分析
pub fn run_analysis<T, V>(
    func: &FuncIR,
    cfg: &Cfg,
    visitor: &V,
    initial: &BTreeSet<T>,
    kind: AnalysisKind<'_, T>,
    backward: bool,
) -> AnalysisResult<T>
where
    T: Ord + Clone + Debug,
    V: OpVisitor<T> + ?Sized,
{
    run_analysis_with_observer(func, cfg, visitor, initial, kind, backward, &mut |_: BlockId, _: &BTreeSet<T>, _: &BTreeSet<T>| {})
}

/// 同 [`run_analysis`]，每次块的出口集合更新时回调 `observer(block, old, new)`
pub fn run_analysis_with_observer<T, V>(
    func: &FuncIR,
    cfg: &Cfg,
    visitor: &V,
    initial: &BTreeSet<T>,
    kind: AnalysisKind<'_, T>,
    backward: bool,
    observer: &mut dyn FnMut(BlockId, &BTreeSet<T>, &BTreeSet<T>),
) -> AnalysisResult<T>
where
    T: Ord + Clone + Debug,
    V: OpVisitor<T> + ?Sized,
{
    let blocks = &func.layout;

    // 块级 gen/kill
    let mut block_gen: HashMap<BlockId, BTreeSet<T>> = HashMap::new();
    let mut block_kill: HashMap<BlockId, BTreeSet<T>> = HashMap::new();
    for &block in blocks {
        let mut gen: BTreeSet<T> = BTreeSet::new();
        let mut kill: BTreeSet<T> = BTreeSet::new();
        for (id, op) in block_ops(func, block, backward) {
            let (op_gen, op_kill) = visitor.gen_kill(func, id, op);
            gen = &(&gen - &op_kill) | &op_gen;
            kill = &(&kill - &op_gen) | &op_kill;
        }
        block_gen.insert(block, gen);
        block_kill.insert(block, kill);
    }

    let start: BTreeSet<T> = match kind {
        AnalysisKind::Maybe => BTreeSet::new(),
        AnalysisKind::Must { universe } => universe.clone(),
    };
    let mut before: HashMap<BlockId, BTreeSet<T>> = blocks.iter().map(|&b| (b, start.clone())).collect();
    let mut after: HashMap<BlockId, BTreeSet<T>> = blocks.iter().map(|&b| (b, start.clone())).collect();

    let (pred_map, succ_map) = if backward {
        (&cfg.succ, &cfg.pred)
    } else {
        (&cfg.pred, &cfg.succ)
    };

    // 前向分析的入口是第一个块，后向分析的入口是出口块
    let entries: BTreeSet<BlockId> = if backward {
        cfg.exits.clone()
    } else {
        blocks.first().copied().into_iter().collect()
    };

    // 前向分析从入口开始出队
    let mut worklist: Vec<BlockId> = blocks.clone();
    if !backward {
        worklist.reverse();
    }
    let mut workset: HashSet<BlockId> = worklist.iter().copied().collect();
    let mut iterations = 0usize;

    while let Some(label) = worklist.pop() {
        iterations += 1;
        workset.remove(&label);

        let preds: &[BlockId] = pred_map.get(&label).map(Vec::as_slice).unwrap_or(&[]);
        // 入口块即使是跳转目标，也要与 initial 汇合
        let mut joined: Option<BTreeSet<T>> = if entries.contains(&label) || preds.is_empty() {
            Some(initial.clone())
        } else {
            None
        };
        for pred in preds {
            let pred_after = after.get(pred).cloned().unwrap_or_else(|| start.clone());
            joined = Some(match (joined, kind) {
                (None, _) => pred_after,
                (Some(acc), AnalysisKind::Maybe) => &acc | &pred_after,
                (Some(acc), AnalysisKind::Must { .. }) => &acc & &pred_after,
            });
        }
        let new_before = joined.unwrap_or_default();

        let empty = BTreeSet::new();
        let kill = block_kill.get(&label).unwrap_or(&empty);
        let gen = block_gen.get(&label).unwrap_or(&empty);
        let new_after = &(&new_before - kill) | gen;
        before.insert(label, new_before);

        let old_after = after.get(&label).cloned().unwrap_or_default();
        if new_after != old_after {
            observer(label, &old_after, &new_after);
            for &succ in succ_map.get(&label).map(Vec::as_slice).unwrap_or(&[]) {
                if before.contains_key(&succ) && workset.insert(succ) {
                    worklist.push(succ);
                }
            }
        }
        after.insert(label, new_after);
    }

    // 逐 op 重放
    let mut op_before: HashMap<OpKey, BTreeSet<T>> = HashMap::new();
    let mut op_after: HashMap<OpKey, BTreeSet<T>> = HashMap::new();
    for &block in blocks {
        let mut cur = before.get(&block).cloned().unwrap_or_default();
        let ops = &func.block(block).ops;
        let indices: Box<dyn Iterator<Item = usize>> = if backward {
            Box::new((0..ops.len()).rev())
        } else {
            Box::new(0..ops.len())
        };
        for idx in indices {
            let id = ops[idx];
            let Some(op) = func.op(id) else { continue };
            op_before.insert((block, idx), cur.clone());
            let (op_gen, op_kill) = visitor.gen_kill(func, id, op);
            cur = &(&cur - &op_kill) | &op_gen;
            op_after.insert((block, idx), cur.clone());
        }
    }
    if backward {
        std::mem::swap(&mut op_before, &mut op_after);
    }

    AnalysisResult {
        before: op_before,
        after: op_after,
        iterations,
    }
}

fn block_ops(
    func: &FuncIR,
    block: BlockId,
    backward: bool,
) -> Vec<(ValueId, &Op)> {
    let mut ops: Vec<(ValueId, &Op)> = func
        .block(block)
        .ops
        .iter()
        .filter_map(|&id| func.op(id).map(|op| (id, op)))
        .collect();
    if backward {
        ops.reverse();
    }
    ops
}
