//! 未初始化寄存器检查插入
//!
//! 对每个在使用点不一定已定义的寄存器操作数，在使用前插入
//! `Branch IS_ERROR` 守卫；错误块抛出 `UnboundLocalError`。
//! 被守卫的寄存器在入口处用 `undefines` 错误值初始化，使运行时检查读到确定的哨兵值。

use std::collections::BTreeSet;
use tracing::debug;

use crate::middle::analysis::{analyze_must_defined_regs, cfg};
use crate::middle::ir::ops::UNBOUND_LOCAL_ERROR;
use crate::middle::ir::{BlockId, BranchOp, ErrorKind, FuncIR, Op, ValueId};
use crate::middle::types::RType;

/// 插入守卫，返回被守卫的使用点个数
pub fn insert_uninit_checks(func: &mut FuncIR) -> usize {
    // 先删除死块，避免为未使用的错误处理块插入多余检查
    cfg::cleanup_cfg(func);
    let cfg = cfg::build(func);
    let args: BTreeSet<ValueId> = func.arg_regs.iter().copied().collect();
    let regs = func.registers();
    let must_defined = analyze_must_defined_regs(func, &cfg, &args, &regs, false);

    let mut new_layout: Vec<BlockId> = Vec::new();
    let mut init_registers: Vec<ValueId> = Vec::new();
    let mut guards = 0usize;

    for block in func.layout.clone() {
        let ops = std::mem::take(&mut func.block_mut(block).ops);
        let mut cur_block = block;
        new_layout.push(cur_block);

        for (idx, op_id) in ops.into_iter().enumerate() {
            let Some(op) = func.op(op_id) else {
                func.push_op(cur_block, op_id);
                continue;
            };
            let exempt = matches!(op, Op::Branch { op: BranchOp::IsError, .. } | Op::LoadAddress { .. });
            let line = func.value(op_id).line;
            let unchecked: Vec<ValueId> = if exempt {
                Vec::new()
            } else {
                op.unique_sources()
                    .into_iter()
                    .filter(|&src| func.is_register(src) && !must_defined.before_contains((block, idx), &src))
                    .collect()
            };

            for src in unchecked {
                let handler = func.block(cur_block).error_handler;
                let error_block = func.new_block();
                let new_block = func.new_block();
                func.block_mut(error_block).error_handler = handler;
                func.block_mut(new_block).error_handler = handler;
                new_layout.push(error_block);
                new_layout.push(new_block);
                if !init_registers.contains(&src) {
                    init_registers.push(src);
                }

                let check = func.new_op(
                    Op::Branch {
                        value: src,
                        true_label: error_block,
                        false_label: new_block,
                        op: BranchOp::IsError,
                        negated: false,
                        rare: false,
                        traceback_entry: None,
                    },
                    RType::Void,
                    ErrorKind::Never,
                    line,
                );
                func.push_op(cur_block, check);

                let name = func.register_name(src).unwrap_or("?").to_string();
                let raise = func.new_op(
                    Op::RaiseStandardError {
                        class_name: UNBOUND_LOCAL_ERROR.to_string(),
                        message: Some(format!("local variable '{}' referenced before assignment", name)),
                    },
                    RType::bool(),
                    ErrorKind::False,
                    line,
                );
                func.push_op(error_block, raise);
                let unreachable = func.new_op(Op::Unreachable, RType::Void, ErrorKind::Never, line);
                func.push_op(error_block, unreachable);

                cur_block = new_block;
                guards += 1;
            }
            func.push_op(cur_block, op_id);
        }
    }

    if !init_registers.is_empty() {
        let mut prologue = Vec::with_capacity(init_registers.len() * 2);
        for &reg in &init_registers {
            let ty = func.ty(reg).clone();
            let line = func.value(reg).line;
            let err = func.new_op(Op::LoadErrorValue { undefines: true }, ty, ErrorKind::Never, line);
            let assign = func.new_op(Op::Assign { dest: reg, src: err }, RType::Void, ErrorKind::Never, line);
            prologue.push(err);
            prologue.push(assign);
        }
        if let Some(&entry) = new_layout.first() {
            if cfg.preds(entry).is_empty() {
                func.block_mut(entry).ops.splice(0..0, prologue);
            } else {
                // 入口是循环目标时，初始化放进新的入口块，回边不会重复执行
                let prologue_block = func.new_block();
                func.block_mut(prologue_block).ops = prologue;
                let jump = func.new_op(Op::Goto { label: entry }, RType::Void, ErrorKind::Never, -1);
                func.push_op(prologue_block, jump);
                new_layout.insert(0, prologue_block);
            }
        }
    }

    func.layout = new_layout;
    debug!(func = %func.name(), guards, registers = init_registers.len(), "insert_uninit_checks");
    guards
}
