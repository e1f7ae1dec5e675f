//! 引用计数指令插入
//!
//! 基于活跃性、借用参数与 must-defined（严格错误值）分析：
//! - op 内部：被"窃取"的源若之后仍活跃、处于借用状态或被同一 op 重复窃取，先 incref；
//!   不再活跃且非借用、非窃取的源在 op 之后 decref；结果未被使用时立即 decref
//! - 边上：源块末尾活跃而目标块入口不活跃的值 decref，源块借用而目标块拥有的值 incref，
//!   这些指令放入按 (目标, decref 列表, incref 列表) 共享的边块
//!
//! 可能未定义的寄存器使用 xdecref。`KeepAlive` 在此被删除。

use std::collections::{BTreeSet, HashMap};
use tracing::debug;

use crate::middle::analysis::{
    analyze_borrowed_arguments, analyze_live_regs, analyze_must_defined_regs, cfg, AnalysisResult,
};
use crate::middle::ir::{BlockId, BranchOp, ErrorKind, FuncIR, Op, OpKey, ValueId};
use crate::middle::types::RType;

type Decs = Vec<(ValueId, bool)>;
type Incs = Vec<ValueId>;
type BlockCache = HashMap<(BlockId, Decs, Incs), BlockId>;

struct Facts {
    live: AnalysisResult<ValueId>,
    borrow: AnalysisResult<ValueId>,
    defined: AnalysisResult<ValueId>,
}

impl Facts {
    fn pre_live(
        &self,
        key: OpKey,
    ) -> BTreeSet<ValueId> {
        self.live.before(key).cloned().unwrap_or_default()
    }

    fn post_live(
        &self,
        key: OpKey,
    ) -> BTreeSet<ValueId> {
        self.live.after(key).cloned().unwrap_or_default()
    }

    fn pre_borrow(
        &self,
        key: OpKey,
    ) -> BTreeSet<ValueId> {
        self.borrow.before(key).cloned().unwrap_or_default()
    }

    fn post_borrow(
        &self,
        key: OpKey,
    ) -> BTreeSet<ValueId> {
        self.borrow.after(key).cloned().unwrap_or_default()
    }

    /// 寄存器在 op 之后可能未定义
    fn is_maybe_undefined(
        &self,
        func: &FuncIR,
        key: OpKey,
        value: ValueId,
    ) -> bool {
        func.is_register(value) && !self.defined.after_contains(key, &value)
    }
}

/// 插入 IncRef / DecRef，返回插入的指令数
///
/// `strict_errors` 为真时，被赋予错误值的寄存器视为未定义，离开作用域时用 xdecref。
pub fn insert_ref_count_opcodes(
    func: &mut FuncIR,
    strict_errors: bool,
) -> usize {
    let cfg = cfg::build(func);
    let borrowed: BTreeSet<ValueId> = (0..func.values.len() as u32)
        .map(ValueId)
        .filter(|&v| func.value(v).is_borrowed())
        .collect();
    let args: BTreeSet<ValueId> = func.arg_regs.iter().copied().collect();
    let regs = func.registers();

    let facts = Facts {
        live: analyze_live_regs(func, &cfg),
        borrow: analyze_borrowed_arguments(func, &cfg, &borrowed),
        defined: analyze_must_defined_regs(func, &cfg, &args, &regs, strict_errors),
    };

    let mut cache: BlockCache = HashMap::new();
    let mut inserted = 0usize;
    for block in func.layout.clone() {
        let is_jump = matches!(func.terminator(block), Some(Op::Branch { .. } | Op::Goto { .. }));
        if is_jump {
            inserted += insert_branch_inc_and_decrefs(func, block, &facts, &mut cache);
        }
        inserted += transform_block(func, block, &facts);
    }
    cfg::cleanup_cfg(func);
    debug!(func = %func.name(), inserted, edge_blocks = cache.len(), "insert_ref_count_opcodes");
    inserted
}

fn push_dec_ref(
    func: &mut FuncIR,
    ops: &mut Vec<ValueId>,
    value: ValueId,
    is_xdec: bool,
) -> usize {
    let v = func.value(value);
    if !v.ty.is_refcounted() || v.is_constant() {
        return 0;
    }
    let line = v.line;
    let dec = func.new_op(Op::DecRef { src: value, is_xdec }, RType::Void, ErrorKind::Never, line);
    ops.push(dec);
    1
}

fn push_inc_ref(
    func: &mut FuncIR,
    ops: &mut Vec<ValueId>,
    value: ValueId,
) -> usize {
    let v = func.value(value);
    if !v.ty.is_refcounted() || v.is_constant() {
        return 0;
    }
    let line = v.line;
    let inc = func.new_op(Op::IncRef { src: value }, RType::Void, ErrorKind::Never, line);
    ops.push(inc);
    1
}

fn transform_block(
    func: &mut FuncIR,
    block: BlockId,
    facts: &Facts,
) -> usize {
    let old_ops = std::mem::take(&mut func.block_mut(block).ops);
    let mut ops: Vec<ValueId> = Vec::with_capacity(old_ops.len());
    let mut inserted = 0usize;

    for (idx, &op_id) in old_ops.iter().enumerate() {
        let key = (block, idx);
        let Some(op) = func.op(op_id).cloned() else {
            ops.push(op_id);
            continue;
        };
        let pre_live = facts.pre_live(key);
        let post_live = facts.post_live(key);
        let pre_borrow = facts.pre_borrow(key);

        let dest = match &op {
            Op::Assign { dest, .. } => *dest,
            _ => op_id,
        };
        let stolen = op.stolen();

        // 被窃取的源：之后仍需要，或本身是借用的，或被重复窃取
        for (j, &src) in stolen.iter().enumerate() {
            if post_live.contains(&src) || pre_borrow.contains(&src) || stolen[..j].contains(&src) {
                inserted += push_inc_ref(func, &mut ops, src);
            }
        }
        // 覆盖一个仍然活跃的寄存器时释放旧值
        if !pre_borrow.contains(&dest) && pre_live.contains(&dest) {
            let is_xdec = facts.is_maybe_undefined(func, key, dest);
            inserted += push_dec_ref(func, &mut ops, dest, is_xdec);
        }

        if !matches!(op, Op::KeepAlive { .. }) {
            ops.push(op_id);
        }
        // 控制指令之后没有位置，边上的引用计数由 insert_branch_inc_and_decrefs 处理
        if op.is_control() {
            continue;
        }

        for src in op.unique_sources() {
            if !post_live.contains(&src) && !pre_borrow.contains(&src) && !stolen.contains(&src) {
                let is_xdec = facts.is_maybe_undefined(func, key, src);
                inserted += push_dec_ref(func, &mut ops, src, is_xdec);
            }
        }

        let is_register_op = !matches!(op, Op::Assign { .. });
        let dest_value = func.value(dest);
        if !dest_value.is_void() && !post_live.contains(&dest) && !(is_register_op && dest_value.is_borrowed()) {
            let is_xdec = facts.is_maybe_undefined(func, key, dest);
            inserted += push_dec_ref(func, &mut ops, dest, is_xdec);
        }
    }
    func.block_mut(block).ops = ops;
    inserted
}

fn insert_branch_inc_and_decrefs(
    func: &mut FuncIR,
    block: BlockId,
    facts: &Facts,
    cache: &mut BlockCache,
) -> usize {
    let Some(last) = func.block(block).ops.len().checked_sub(1) else {
        return 0;
    };
    let prev_key = (block, last);
    let source_live = facts.pre_live(prev_key);
    let source_borrowed = facts.post_borrow(prev_key);

    let Some(term) = func.terminator(block).cloned() else {
        return 0;
    };
    let mut inserted = 0usize;
    for (i, target) in term.targets().into_iter().enumerate() {
        // IS_ERROR 的真分支上该值就是错误哨兵（可能是 NULL），不能触碰其引用计数
        let omitted = match &term {
            Op::Branch {
                op: BranchOp::IsError,
                value,
                ..
            } if i == 0 => Some(*value),
            _ => None,
        };
        let target_key = (target, 0);
        let target_pre_live = facts.pre_live(target_key);
        let target_borrowed = facts.pre_borrow(target_key);

        // BTreeSet 迭代按 ValueId 排序，边块内容确定
        let decs: Decs = source_live
            .iter()
            .filter(|&&v| !target_pre_live.contains(&v) && !source_borrowed.contains(&v))
            .filter(|&&v| func.ty(v).is_refcounted() && Some(v) != omitted && !func.value(v).is_constant())
            .map(|&v| (v, facts.is_maybe_undefined(func, prev_key, v)))
            .collect();
        let incs: Incs = source_borrowed
            .iter()
            .filter(|&&v| !target_borrowed.contains(&v) && target_pre_live.contains(&v))
            .filter(|&&v| func.ty(v).is_refcounted())
            .copied()
            .collect();

        if decs.is_empty() && incs.is_empty() {
            continue;
        }
        inserted += decs.len() + incs.len();
        let edge = add_block(func, decs, incs, cache, target);
        if let Some(term) = func.terminator_mut(block) {
            term.set_target(i, edge);
        }
    }
    inserted
}

fn add_block(
    func: &mut FuncIR,
    decs: Decs,
    incs: Incs,
    cache: &mut BlockCache,
    label: BlockId,
) -> BlockId {
    let cache_key = (label, decs, incs);
    if let Some(&block) = cache.get(&cache_key) {
        return block;
    }
    let block = func.new_block();
    func.layout.push(block);
    let (label, decs, incs) = &cache_key;
    for &(value, is_xdec) in decs {
        let line = func.value(value).line;
        let dec = func.new_op(Op::DecRef { src: value, is_xdec }, RType::Void, ErrorKind::Never, line);
        func.push_op(block, dec);
    }
    for &value in incs {
        let line = func.value(value).line;
        let inc = func.new_op(Op::IncRef { src: value }, RType::Void, ErrorKind::Never, line);
        func.push_op(block, inc);
    }
    let goto = func.new_op(Op::Goto { label: *label }, RType::Void, ErrorKind::Never, -1);
    func.push_op(block, goto);
    cache.insert(cache_key, block);
    block
}
