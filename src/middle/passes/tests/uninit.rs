//! 未初始化检查插入测试

use proptest::prelude::*;
use std::collections::BTreeSet;

use crate::middle::analysis::{analyze_must_defined_regs, cfg};
use crate::middle::ir::verify::verify_func;
use crate::middle::ir::{BranchOp, ErrorKind, FuncIR, Op, ValueId};
use crate::middle::passes::insert_uninit_checks;
use crate::middle::test_utils::{add_one, maybe_unbound, random_func, self_loop_unbound, shape_strategy};
use crate::middle::types::RType;

#[test]
fn test_straight_line_needs_no_guard() {
    let mut func = add_one();
    let before = func.op_count();
    assert_eq!(insert_uninit_checks(&mut func), 0);
    assert_eq!(func.op_count(), before);
}

#[test]
fn test_single_error_block_names_register() {
    let mut func = maybe_unbound();
    assert_eq!(insert_uninit_checks(&mut func), 1);
    assert!(verify_func(&func, None).is_empty());

    let raising: Vec<_> = func
        .layout
        .iter()
        .filter(|&&b| {
            func.block(b)
                .ops
                .iter()
                .any(|&op| matches!(func.op(op), Some(Op::RaiseStandardError { .. })))
        })
        .collect();
    assert_eq!(raising.len(), 1);
    let message = func
        .ops()
        .find_map(|(_, _, _, op)| match op {
            Op::RaiseStandardError { class_name, message } => Some((class_name.clone(), message.clone())),
            _ => None,
        })
        .unwrap();
    assert_eq!(message.0, "UnboundLocalError");
    assert_eq!(message.1.as_deref(), Some("local variable 'z' referenced before assignment"));
}

#[test]
fn test_guarded_register_initialized_at_entry() {
    let mut func = maybe_unbound();
    insert_uninit_checks(&mut func);
    let entry = func.layout[0];
    let first = func.block(entry).ops[0];
    assert!(matches!(func.op(first), Some(Op::LoadErrorValue { undefines: true })));
    let second = func.block(entry).ops[1];
    let z = func
        .registers()
        .into_iter()
        .find(|&r| func.register_name(r) == Some("z"))
        .unwrap();
    assert!(matches!(func.op(second), Some(Op::Assign { dest, .. }) if *dest == z));
}

#[test]
fn test_every_unsafe_use_is_guarded() {
    let mut func = maybe_unbound();
    insert_uninit_checks(&mut func);
    let cfg = cfg::build(&func);
    let z = func
        .registers()
        .into_iter()
        .find(|&r| func.register_name(r) == Some("z"))
        .unwrap();

    // 读取 z 的返回所在块只能从对 z 的 IS_ERROR 检查的假分支进入
    let (ret_block, _, _, _) = func
        .ops()
        .find(|(_, _, _, op)| matches!(op, Op::Return { value } if *value == z))
        .unwrap();
    let preds = cfg.preds(ret_block);
    assert_eq!(preds.len(), 1);
    match func.terminator(preds[0]) {
        Some(Op::Branch {
            value,
            op: BranchOp::IsError,
            false_label,
            ..
        }) => {
            assert_eq!(*value, z);
            assert_eq!(*false_label, ret_block);
        }
        other => panic!("expected guard, got {:?}", other),
    }
}

#[test]
fn test_entry_loop_read_is_guarded() {
    let mut func = self_loop_unbound();
    assert_eq!(insert_uninit_checks(&mut func), 1);
    assert!(verify_func(&func, None).is_empty());

    // 初始化放在新的入口块里，不在循环内
    let cfg = cfg::build(&func);
    let entry = func.layout[0];
    assert!(cfg.preds(entry).is_empty());
    assert!(matches!(
        func.op(func.block(entry).ops[0]),
        Some(Op::LoadErrorValue { undefines: true })
    ));
    assert!(matches!(func.terminator(entry), Some(Op::Goto { .. })));
    let undefining_assigns = func
        .ops()
        .filter(|(_, _, _, op)| match op {
            Op::Assign { src, .. } => matches!(func.op(*src), Some(Op::LoadErrorValue { undefines: true })),
            _ => false,
        })
        .count();
    assert_eq!(undefining_assigns, 1);
}

/// 在每个 IS_ERROR 守卫的假分支开头补一个自赋值，表示守卫之后寄存器已定义
fn assume_guards_pass(func: &mut FuncIR) -> BTreeSet<ValueId> {
    let guards: Vec<_> = func
        .layout
        .iter()
        .filter_map(|&b| match func.terminator(b) {
            Some(Op::Branch {
                value,
                op: BranchOp::IsError,
                negated: false,
                false_label,
                ..
            }) if func.is_register(*value) => Some((*value, *false_label)),
            _ => None,
        })
        .collect();
    let mut assumed = BTreeSet::new();
    for (reg, block) in guards {
        let assign = func.new_op(Op::Assign { dest: reg, src: reg }, RType::Void, ErrorKind::Never, -1);
        func.block_mut(block).ops.insert(0, assign);
        assumed.insert(assign);
    }
    assumed
}

proptest! {
    /// 守卫之后，每个寄存器读取点都在 MUST 已定义集合里
    #[test]
    fn test_guards_cover_every_read(shape in shape_strategy()) {
        let mut func = random_func(&shape);
        insert_uninit_checks(&mut func);
        prop_assert!(verify_func(&func, None).is_empty());
        let assumed = assume_guards_pass(&mut func);

        let cfg = cfg::build(&func);
        let args: BTreeSet<_> = func.arg_regs.iter().copied().collect();
        let must = analyze_must_defined_regs(&func, &cfg, &args, &func.registers(), false);
        for &block in &func.layout {
            for (idx, &id) in func.block(block).ops.iter().enumerate() {
                let Some(op) = func.op(id) else { continue };
                if assumed.contains(&id) || matches!(op, Op::Branch { op: BranchOp::IsError, .. }) {
                    continue;
                }
                for src in op.unique_sources() {
                    if func.is_register(src) {
                        prop_assert!(must.before_contains((block, idx), &src));
                    }
                }
            }
        }
    }
}
