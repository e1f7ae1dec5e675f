//! 测试辅助：常用函数与类的 IR 构造

use crate::middle::ir::{
    ArgKind, BranchOp, ClassId, FuncDecl, FuncIR, FuncId, FuncSignature, IrBuilder, Program, RuntimeArg,
};
use crate::middle::primitives;
use crate::middle::types::RType;

/// 创建只有签名、没有块的函数
pub fn new_func(
    name: &str,
    args: &[(&str, RType)],
    ret: RType,
) -> FuncIR {
    let args = args
        .iter()
        .map(|(n, t)| RuntimeArg::new(n, t.clone(), ArgKind::Pos))
        .collect();
    FuncIR::new(FuncDecl::new(name, "m", FuncSignature::new(args, ret)), 1)
}

/// `def f(x: int) -> int: y = x + 1; return y`
pub fn add_one() -> FuncIR {
    let mut func = new_func("f", &[("x", RType::int())], RType::int());
    let mut builder = IrBuilder::new(&mut func);
    let x = builder.func().arg_regs[0];
    let y = builder.new_register("y", RType::int(), 1);
    let one = builder.integer(1, RType::short_int(), 1);
    let desc = primitives::primitive_op("int_add").cloned().unwrap();
    let sum = builder.primitive_op(&desc, vec![x, one], 1);
    builder.assign(y, sum, 1);
    builder.ret(y, 2);
    func
}

/// `def g(flag: bool) -> int: if flag: z = 1; return z`
pub fn maybe_unbound() -> FuncIR {
    let mut func = new_func("g", &[("flag", RType::bool())], RType::int());
    let mut builder = IrBuilder::new(&mut func);
    let flag = builder.func().arg_regs[0];
    let z = builder.new_register("z", RType::int(), 2);
    let then = builder.new_block();
    let join = builder.new_block();
    builder.branch(flag, then, join, BranchOp::Bool, 1);
    builder.activate_block(then);
    let one = builder.integer(1, RType::short_int(), 2);
    builder.assign(z, one, 2);
    builder.goto_and_activate(join);
    builder.ret(z, 3);
    func
}

/// 入口块自己也是跳转目标：`entry: if flag goto entry else exit; exit: return z`
///
/// `z` 从未赋值。
pub fn self_loop_unbound() -> FuncIR {
    let mut func = new_func("spin", &[("flag", RType::bool())], RType::int());
    let mut builder = IrBuilder::new(&mut func);
    let flag = builder.func().arg_regs[0];
    let z = builder.new_register("z", RType::int(), 1);
    let entry = builder.current_block();
    let exit = builder.new_block();
    builder.branch(flag, entry, exit, BranchOp::Bool, 1);
    builder.activate_block(exit);
    builder.ret(z, 2);
    func
}

/// 随机控制流：每个块对若干寄存器赋值，然后 goto / branch / return
///
/// 每项为 (赋值位图, 终结种类, 目标 1, 目标 2)；目标可以指回入口块。
pub fn random_func(shape: &[(u8, u8, u8, u8)]) -> FuncIR {
    let mut func = new_func("r", &[("c", RType::bool())], RType::int());
    let mut builder = IrBuilder::new(&mut func);
    let cond = builder.func().arg_regs[0];
    let regs: Vec<_> = (0..4)
        .map(|i| builder.new_register(&format!("v{}", i), RType::int(), 1))
        .collect();
    let entry = builder.current_block();
    let mut blocks = vec![entry];
    for _ in 1..shape.len() {
        blocks.push(builder.new_block());
    }
    let n = blocks.len();
    for (i, &(assigns, kind, t1, t2)) in shape.iter().enumerate() {
        builder.activate_block(blocks[i]);
        for r in 0..4 {
            if assigns & (1 << r) != 0 {
                let k = builder.integer(r as i64, RType::short_int(), 1);
                builder.assign(regs[r], k, 1);
            }
        }
        let a = blocks[t1 as usize % n];
        let b = blocks[t2 as usize % n];
        match kind % 3 {
            0 => builder.goto(a),
            1 => {
                builder.branch(cond, a, b, BranchOp::Bool, 1);
            }
            _ => builder.ret(regs[(t1 % 4) as usize], 1),
        }
    }
    func
}

pub fn shape_strategy() -> impl proptest::strategy::Strategy<Value = Vec<(u8, u8, u8, u8)>> {
    proptest::collection::vec((0u8..16, 0u8..3, 0u8..8, 0u8..8), 1..8)
}

/// `def h(flag: bool, s: str) -> str: if flag: t = s; else: t = "x"; return t`
///
/// 一条路径复制借用参数，另一条路径持有新引用。
pub fn branchy_strings() -> FuncIR {
    let mut func = new_func("h", &[("flag", RType::bool()), ("s", RType::str())], RType::str());
    let mut builder = IrBuilder::new(&mut func);
    let (flag, s) = (builder.func().arg_regs[0], builder.func().arg_regs[1]);
    let t = builder.new_register("t", RType::str(), 1);
    let then = builder.new_block();
    let other = builder.new_block();
    let join = builder.new_block();
    builder.branch(flag, then, other, BranchOp::Bool, 1);
    builder.activate_block(then);
    builder.assign(t, s, 2);
    builder.goto(join);
    builder.activate_block(other);
    let lit = builder.add(
        crate::middle::ir::Op::LoadLiteral {
            value: crate::middle::ir::Literal::Str("x".to_string()),
        },
        RType::str(),
        3,
    );
    let copy = builder.add(
        crate::middle::ir::Op::Unborrow { src: lit },
        RType::str(),
        3,
    );
    builder.assign(t, copy, 3);
    builder.goto_and_activate(join);
    builder.ret(t, 4);
    func
}

/// 一个带 `x`、`y` 两个属性的类；`__init__` 只初始化 `x`
pub fn point_class(program: &mut Program) -> (ClassId, FuncId) {
    if program.module("m").is_none() {
        program.add_module("m");
    }
    let class = program.add_class("Point", "m");
    {
        let cl = program.class_mut(class);
        cl.attributes.insert("x".to_string(), RType::int());
        cl.attributes.insert("y".to_string(), RType::int());
    }
    let self_type = RType::instance(class, "Point");
    let init = init_setting(program, class, "Point", self_type, &["x"]);
    (class, init)
}

/// 生成 `__init__(self)`，按顺序对 `attrs` 赋值常量 0
pub fn init_setting(
    program: &mut Program,
    class: ClassId,
    class_name: &str,
    self_type: RType,
    attrs: &[&str],
) -> FuncId {
    let sig = FuncSignature::new(vec![RuntimeArg::new("self", self_type, ArgKind::Pos)], RType::none());
    let mut func = FuncIR::new(FuncDecl::method("__init__", "m", class, class_name, sig), 1);
    let mut builder = IrBuilder::new(&mut func);
    let this = builder.func().arg_regs[0];
    for attr in attrs {
        let zero = builder.integer(0, RType::short_int(), 2);
        builder.set_attr(this, class, attr, zero, 2);
    }
    let none = builder.integer(1, RType::none(), 3);
    builder.ret(none, 3);
    program.add_function(func)
}
