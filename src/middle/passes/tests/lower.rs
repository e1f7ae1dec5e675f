//! 原语降级测试

use crate::middle::error::CompileError;
use crate::middle::ir::verify::verify_func;
use crate::middle::ir::{FuncIR, IntOpKind, IrBuilder, Op, Steals, ValueKind};
use crate::middle::passes::lower_ir;
use crate::middle::primitives;
use crate::middle::test_utils::{add_one, new_func};
use crate::middle::types::RType;

fn count(
    func: &FuncIR,
    pred: impl Fn(&Op) -> bool,
) -> usize {
    func.ops().filter(|(_, _, _, op)| pred(op)).count()
}

fn compare(name: &str) -> FuncIR {
    let mut func = new_func("cmp", &[("a", RType::int()), ("b", RType::int())], RType::bool());
    let mut builder = IrBuilder::new(&mut func);
    let (a, b) = (builder.func().arg_regs[0], builder.func().arg_regs[1]);
    let desc = primitives::primitive_op(name).cloned().unwrap();
    let r = builder.primitive_op(&desc, vec![a, b], 4);
    builder.ret(r, 5);
    func
}

#[test]
fn test_unregistered_primitive_passes_through() {
    let mut func = add_one();
    let before = func.clone();
    assert_eq!(lower_ir(&mut func).unwrap(), 0);
    assert_eq!(func, before);
}

#[test]
fn test_int_comparison_lowered_to_fast_and_slow_paths() {
    for name in ["int_eq", "int_ne", "int_lt", "int_le", "int_gt", "int_ge"] {
        let mut func = compare(name);
        assert_eq!(lower_ir(&mut func).unwrap(), 1);
        assert!(verify_func(&func, None).is_empty(), "{}", name);
        assert_eq!(count(&func, |op| matches!(op, Op::PrimitiveOp { .. })), 0);
        assert_eq!(count(&func, |op| matches!(op, Op::CallC { .. })), 1);

        // 返回值被替换为比较结果寄存器，位于最后激活的块
        let (block, _, _, ret) = func.ops().find(|(_, _, _, op)| matches!(op, Op::Return { .. })).unwrap();
        let Op::Return { value } = ret else { unreachable!() };
        assert_eq!(func.register_name(*value), Some("cmp"));
        assert_eq!(Some(&block), func.layout.last());
    }
}

#[test]
fn test_short_int_equality_is_direct() {
    let mut func = new_func("eq0", &[("a", RType::int())], RType::bool());
    let mut builder = IrBuilder::new(&mut func);
    let a = builder.func().arg_regs[0];
    let zero = builder.integer(0, RType::short_int(), 1);
    let desc = primitives::primitive_op("int_eq").cloned().unwrap();
    let r = builder.primitive_op(&desc, vec![a, zero], 1);
    builder.ret(r, 1);

    lower_ir(&mut func).unwrap();
    assert_eq!(func.layout.len(), 1);
    assert_eq!(count(&func, |op| matches!(op, Op::ComparisonOp { .. })), 1);
}

#[test]
fn test_list_get_item_unsafe_is_borrowed_load() {
    let mut func = new_func("get", &[("l", RType::list()), ("i", RType::c_ssize_t())], RType::object());
    let mut builder = IrBuilder::new(&mut func);
    let (l, i) = (builder.func().arg_regs[0], builder.func().arg_regs[1]);
    let desc = primitives::primitive_op("list_get_item_unsafe").cloned().unwrap();
    let item = builder.primitive_op(&desc, vec![l, i], 2);
    builder.ret(item, 2);

    lower_ir(&mut func).unwrap();
    assert!(verify_func(&func, None).is_empty());
    assert_eq!(count(&func, |op| matches!(op, Op::GetElementPtr { field, .. } if field == "ob_item")), 1);
    assert_eq!(count(&func, |op| matches!(op, Op::IntOp { op: IntOpKind::Mul, .. })), 1);
    let (_, _, _, ret) = func.ops().last().unwrap();
    let Op::Return { value } = ret else { unreachable!() };
    assert!(matches!(func.op(*value), Some(Op::LoadMem { .. })));
    assert!(func.value(*value).is_borrowed());
}

#[test]
fn test_var_object_size_reads_header() {
    let mut func = new_func("size", &[("o", RType::object())], RType::c_ssize_t());
    let mut builder = IrBuilder::new(&mut func);
    let o = builder.func().arg_regs[0];
    let desc = primitives::primitive_op("var_object_size").cloned().unwrap();
    let n = builder.primitive_op(&desc, vec![o], 1);
    builder.ret(n, 1);

    lower_ir(&mut func).unwrap();
    assert_eq!(count(&func, |op| matches!(op, Op::GetElementPtr { field, .. } if field == "ob_size")), 1);
    assert_eq!(count(&func, |op| matches!(op, Op::LoadMem { .. })), 1);
}

#[test]
fn test_buf_init_item_offsets() {
    let mut func = new_func("init", &[("buf", RType::pointer()), ("v", RType::object())], RType::none());
    let mut builder = IrBuilder::new(&mut func);
    let (buf, v) = (builder.func().arg_regs[0], builder.func().arg_regs[1]);
    let desc = primitives::primitive_op("buf_init_item").cloned().unwrap();
    let first = builder.integer(0, RType::c_ssize_t(), 1);
    builder.primitive_op(&desc, vec![buf, first, v], 1);
    let third = builder.integer(2, RType::c_ssize_t(), 2);
    builder.primitive_op(&desc, vec![buf, third, v], 2);
    let none = builder.integer(1, RType::none(), 3);
    builder.ret(none, 3);

    assert_eq!(lower_ir(&mut func).unwrap(), 2);
    let stores: Vec<_> = func
        .ops()
        .filter_map(|(_, _, _, op)| match op {
            Op::SetMem { dest, .. } => Some(*dest),
            _ => None,
        })
        .collect();
    assert_eq!(stores.len(), 2);
    // 下标 0 直接写基址，其余按指针宽度偏移
    assert_eq!(stores[0], buf);
    match func.op(stores[1]) {
        Some(Op::IntOp {
            rhs,
            op: IntOpKind::Add,
            ..
        }) => assert!(matches!(func.value(*rhs).kind, ValueKind::Integer(16))),
        other => panic!("expected pointer add, got {:?}", other),
    }
}

#[test]
fn test_primitive_without_c_function_is_rejected() {
    let mut func = new_func("bad", &[], RType::none());
    let mut builder = IrBuilder::new(&mut func);
    builder.add(
        Op::PrimitiveOp {
            name: "frobnicate".to_string(),
            args: Vec::new(),
            steals: Steals::Nothing,
            c_function_name: None,
        },
        RType::Void,
        1,
    );
    let none = builder.integer(1, RType::none(), 1);
    builder.ret(none, 1);
    assert!(matches!(lower_ir(&mut func), Err(CompileError::UnknownPrimitive(name)) if name == "frobnicate"));
}

#[test]
fn test_short_argument_list_is_rejected() {
    let mut func = new_func("cmp", &[("a", RType::int())], RType::bool());
    let mut builder = IrBuilder::new(&mut func);
    let a = builder.func().arg_regs[0];
    let desc = primitives::primitive_op("int_ge").cloned().unwrap();
    let r = builder.primitive_op(&desc, vec![a], 1);
    builder.ret(r, 1);
    let before = func.clone();

    match lower_ir(&mut func) {
        Err(CompileError::MalformedIr { stage, errors, .. }) => {
            assert_eq!(stage, "lower");
            assert_eq!(errors.len(), 1);
        }
        other => panic!("expected malformed IR, got {:?}", other),
    }
    assert_eq!(func, before);
}
