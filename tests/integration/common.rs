//! Program builders shared by the integration tests

use tycc::middle::ir::{
    ArgKind, BranchOp, ClassId, FuncDecl, FuncIR, FuncId, FuncSignature, IrBuilder, Program, RuntimeArg,
};
use tycc::middle::primitives;
use tycc::middle::types::RType;

pub fn func(
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
    let mut f = func("f", &[("x", RType::int())], RType::int());
    let mut builder = IrBuilder::new(&mut f);
    let x = builder.func().arg_regs[0];
    let y = builder.new_register("y", RType::int(), 1);
    let one = builder.integer(1, RType::short_int(), 1);
    let desc = primitives::primitive_op("int_add").cloned().expect("int_add is registered");
    let sum = builder.primitive_op(&desc, vec![x, one], 1);
    builder.assign(y, sum, 1);
    builder.ret(y, 2);
    f
}

/// `def g(flag: bool) -> int: if flag: z = 1; return z`
pub fn maybe_unbound() -> FuncIR {
    let mut f = func("g", &[("flag", RType::bool())], RType::int());
    let mut builder = IrBuilder::new(&mut f);
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
    f
}

/// A method `name(self) -> int` returning a constant
pub fn constant_method(
    program: &mut Program,
    class: ClassId,
    class_name: &str,
    name: &str,
    value: i64,
) -> FuncId {
    let self_arg = RuntimeArg::new("self", RType::instance(class, class_name), ArgKind::Pos);
    let sig = FuncSignature::new(vec![self_arg], RType::int());
    let mut f = FuncIR::new(FuncDecl::method(name, "m", class, class_name, sig), 1);
    let mut builder = IrBuilder::new(&mut f);
    let result = builder.integer(value, RType::short_int(), 2);
    builder.ret(result, 2);
    program.add_function(f)
}

pub fn single_module() -> Program {
    let mut program = Program::new();
    program.add_module("m");
    program
}
