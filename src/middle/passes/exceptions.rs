//! 异常检查插入
//!
//! 在每个可能失败的 op 之后切分基本块，并插入跳转到错误处理块的分支：
//! - `Magic`：结果等于类型的错误哨兵值时跳转（`IS_ERROR`）
//! - `False`：结果为 C 假值时跳转（取反的 `BOOL`）
//! - `Always`：总是跳转，用常量 false 表示
//!
//! 没有指定错误处理块的块跳转到默认处理块，后者返回函数的错误值。
//! 完成后所有块的 `error_handler` 被清空：错误控制流已经显式化。

use tracing::debug;

use crate::middle::ir::{
    BlockId, BranchOp, ClassIR, ErrorKind, FuncIR, Op, ValueId, ValueKind, NO_TRACEBACK_LINE_NO,
};
use crate::middle::types::RType;

/// 插入异常检查，返回插入的分支数
pub fn insert_exception_handling(
    func: &mut FuncIR,
    classes: &[ClassIR],
) -> usize {
    adjust_error_kinds(func, classes);

    let may_raise = func
        .layout
        .iter()
        .any(|&b| func.block(b).ops.iter().any(|&op| func.error_kind(op) != ErrorKind::Never));
    if !may_raise {
        return 0;
    }
    let default_handler = add_default_handler_block(func);
    let checks = split_blocks_at_errors(func, default_handler);
    debug!(func = %func.name(), checks, "insert_exception_handling");
    checks
}

/// 读取总是已定义的属性不会失败
fn adjust_error_kinds(
    func: &mut FuncIR,
    classes: &[ClassIR],
) {
    let ids: Vec<ValueId> = func.ops().map(|(_, _, id, _)| id).collect();
    for id in ids {
        if let ValueKind::Op(data) = &mut func.value_mut(id).kind {
            if let Op::GetAttr { class, attr, .. } = &data.op {
                if classes.get(class.index()).is_some_and(|cl| cl.is_always_defined(attr)) {
                    data.error_kind = ErrorKind::Never;
                }
            }
        }
    }
}

fn add_default_handler_block(func: &mut FuncIR) -> BlockId {
    let block = func.new_block();
    let ret_type = func.ret_type().clone();
    let err = func.new_op(Op::LoadErrorValue { undefines: false }, ret_type, ErrorKind::Never, func.line);
    let ret = func.new_op(Op::Return { value: err }, RType::Void, ErrorKind::Never, func.line);
    func.push_op(block, err);
    func.push_op(block, ret);
    func.layout.push(block);
    block
}

fn split_blocks_at_errors(
    func: &mut FuncIR,
    default_handler: BlockId,
) -> usize {
    let traceback_name = func.traceback_name();
    let mut new_layout = Vec::with_capacity(func.layout.len());
    let mut checks = 0usize;

    for block in func.layout.clone() {
        let ops = std::mem::take(&mut func.block_mut(block).ops);
        let error_label = func.block(block).error_handler.unwrap_or(default_handler);
        func.block_mut(block).error_handler = None;
        let mut cur_block = block;
        new_layout.push(cur_block);

        for op_id in ops {
            func.push_op(cur_block, op_id);
            let error_kind = func.error_kind(op_id);
            let (variant, negated, target) = match error_kind {
                ErrorKind::Never => continue,
                ErrorKind::Magic => (BranchOp::IsError, false, op_id),
                ErrorKind::False => (BranchOp::Bool, true, op_id),
                // 用常量 false 表示"总是失败"
                ErrorKind::Always => {
                    let line = func.value(op_id).line;
                    (BranchOp::Bool, true, func.integer(0, RType::bool(), line))
                }
            };

            let new_block = func.new_block();
            new_layout.push(new_block);
            let line = func.value(op_id).line;
            let traceback_entry = (line != NO_TRACEBACK_LINE_NO).then(|| (traceback_name.clone(), line));
            let branch = func.new_op(
                Op::Branch {
                    value: target,
                    true_label: error_label,
                    false_label: new_block,
                    op: variant,
                    negated,
                    rare: true,
                    traceback_entry,
                },
                RType::Void,
                ErrorKind::Never,
                line,
            );
            func.push_op(cur_block, branch);
            cur_block = new_block;
            checks += 1;
        }
    }
    func.layout = new_layout;
    checks
}
