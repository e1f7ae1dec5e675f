//! 带标记整数比较的降级

use std::collections::HashMap;

use super::LowerFn;
use crate::middle::ir::{IrBuilder, ValueId};

pub(super) fn register(registry: &mut HashMap<&'static str, LowerFn>) {
    registry.insert("int_eq", int_eq);
    registry.insert("int_ne", int_ne);
    registry.insert("int_lt", int_lt);
    registry.insert("int_le", int_le);
    registry.insert("int_gt", int_gt);
    registry.insert("int_ge", int_ge);
}

fn int_eq(
    builder: &mut IrBuilder<'_>,
    args: &[ValueId],
    line: i32,
) -> ValueId {
    builder.compare_tagged(args[0], args[1], "==", line)
}

fn int_ne(
    builder: &mut IrBuilder<'_>,
    args: &[ValueId],
    line: i32,
) -> ValueId {
    builder.compare_tagged(args[0], args[1], "!=", line)
}

fn int_lt(
    builder: &mut IrBuilder<'_>,
    args: &[ValueId],
    line: i32,
) -> ValueId {
    builder.compare_tagged(args[0], args[1], "<", line)
}

fn int_le(
    builder: &mut IrBuilder<'_>,
    args: &[ValueId],
    line: i32,
) -> ValueId {
    builder.compare_tagged(args[0], args[1], "<=", line)
}

fn int_gt(
    builder: &mut IrBuilder<'_>,
    args: &[ValueId],
    line: i32,
) -> ValueId {
    builder.compare_tagged(args[0], args[1], ">", line)
}

fn int_ge(
    builder: &mut IrBuilder<'_>,
    args: &[ValueId],
    line: i32,
) -> ValueId {
    builder.compare_tagged(args[0], args[1], ">=", line)
}
