//! 寄存器定义分析测试

use proptest::prelude::*;
use std::collections::{BTreeSet, HashSet};

use crate::middle::analysis::cfg;
use crate::middle::analysis::dataflow::OpVisitor;
use crate::middle::analysis::defined::{analyze_maybe_defined_regs, analyze_must_defined_regs, DefinedVisitor};
use crate::middle::ir::{IrBuilder, Op};
use crate::middle::test_utils::{add_one, maybe_unbound, new_func, random_func, self_loop_unbound, shape_strategy};
use crate::middle::types::RType;

#[test]
fn test_straight_line_must_defined() {
    let func = add_one();
    let cfg = cfg::build(&func);
    let args: BTreeSet<_> = func.arg_regs.iter().copied().collect();
    let result = analyze_must_defined_regs(&func, &cfg, &args, &func.registers(), false);

    let entry = func.layout[0];
    let ret_idx = func.block(entry).ops.len() - 1;
    let x = func.arg_regs[0];
    let y = func
        .registers()
        .into_iter()
        .find(|&r| func.register_name(r) == Some("y"))
        .unwrap();
    assert_eq!(result.before((entry, ret_idx)), Some(&BTreeSet::from([x, y])));
    // 赋值之前 y 尚未定义
    assert!(!result.before_contains((entry, 0), &y));
}

#[test]
fn test_branch_join_maybe_vs_must() {
    let func = maybe_unbound();
    let cfg = cfg::build(&func);
    let args: BTreeSet<_> = func.arg_regs.iter().copied().collect();
    let z = func
        .registers()
        .into_iter()
        .find(|&r| func.register_name(r) == Some("z"))
        .unwrap();
    let join = *func.layout.last().unwrap();

    let maybe = analyze_maybe_defined_regs(&func, &cfg, &args);
    let must = analyze_must_defined_regs(&func, &cfg, &args, &func.registers(), false);
    assert!(maybe.before_contains((join, 0), &z));
    assert!(!must.before_contains((join, 0), &z));
    assert!(must.before_contains((join, 0), &func.arg_regs[0]));
}

#[test]
fn test_undefining_error_value() {
    let mut func = new_func("u", &[], RType::int());
    let mut builder = IrBuilder::new(&mut func);
    let r = builder.new_register("r", RType::int(), 1);
    let one = builder.integer(1, RType::short_int(), 1);
    builder.assign(r, one, 1);
    let err = builder.load_error_value(RType::int(), true, 1);
    builder.assign(r, err, 1);
    let soft_err = builder.load_error_value(RType::int(), false, 1);
    builder.assign(r, soft_err, 1);
    builder.ret(r, 1);

    let cfg = cfg::build(&func);
    let entry = func.layout[0];
    let lenient = analyze_must_defined_regs(&func, &cfg, &BTreeSet::new(), &func.registers(), false);
    // assign(r, undefines) 之后 r 未定义
    assert!(!lenient.after_contains((entry, 2), &r));
    // 普通错误值重新定义 r
    assert!(lenient.after_contains((entry, 4), &r));

    let strict = analyze_must_defined_regs(&func, &cfg, &BTreeSet::new(), &func.registers(), true);
    assert!(!strict.after_contains((entry, 4), &r));
    assert!(matches!(func.op(func.block(entry).ops[4]), Some(Op::Assign { .. })));
}

#[test]
fn test_entry_loop_keeps_initial_set() {
    let func = self_loop_unbound();
    let cfg = cfg::build(&func);
    let args: BTreeSet<_> = func.arg_regs.iter().copied().collect();
    let z = func
        .registers()
        .into_iter()
        .find(|&r| func.register_name(r) == Some("z"))
        .unwrap();
    let (entry, exit) = (func.layout[0], func.layout[1]);
    assert!(cfg.preds(entry).contains(&entry));

    let must = analyze_must_defined_regs(&func, &cfg, &args, &func.registers(), false);
    assert!(!must.before_contains((entry, 0), &z));
    assert!(!must.before_contains((exit, 0), &z));
    assert!(must.before_contains((exit, 0), &func.arg_regs[0]));
}

proptest! {
    /// 寄存器存在一条未赋值的入口路径时，MUST 结果不得包含它
    #[test]
    fn test_must_defined_is_sound(shape in shape_strategy()) {
        let func = random_func(&shape);
        let cfg = cfg::build(&func);
        let args: BTreeSet<_> = func.arg_regs.iter().copied().collect();
        let must = analyze_must_defined_regs(&func, &cfg, &args, &func.registers(), false);
        let visitor = DefinedVisitor { strict_errors: false };

        for reg in func.registers().into_iter().filter(|r| !args.contains(r)) {
            // 从入口出发、reg 仍未定义时可到达的块
            let mut worklist = vec![func.layout[0]];
            let mut seen: HashSet<_> = worklist.iter().copied().collect();
            while let Some(block) = worklist.pop() {
                let mut undefined = true;
                for (idx, &id) in func.block(block).ops.iter().enumerate() {
                    let Some(op) = func.op(id) else { continue };
                    prop_assert!(!must.before_contains((block, idx), &reg));
                    let (gen, _) = visitor.gen_kill(&func, id, op);
                    if gen.contains(&reg) {
                        undefined = false;
                        break;
                    }
                }
                if undefined {
                    for &succ in cfg.succs(block) {
                        if seen.insert(succ) {
                            worklist.push(succ);
                        }
                    }
                }
            }
        }
    }
}
