//! 对象布局相关原语的降级
//!
//! 这些原语直接读写 CPython 对象头，结果依赖 `types` 中的结构体布局。

use std::collections::HashMap;

use super::LowerFn;
use crate::middle::ir::{ErrorKind, IntOpKind, IrBuilder, Op, ValueId, ValueKind};
use crate::middle::types::{py_list_object_struct, py_var_object_struct, RType};

/// 指针宽度
const PLATFORM_SIZE: i64 = 8;

pub(super) fn register(registry: &mut HashMap<&'static str, LowerFn>) {
    registry.insert("var_object_size", var_object_size);
    registry.insert("list_items", list_items);
    registry.insert("list_get_item_unsafe", list_get_item_unsafe);
    registry.insert("buf_init_item", buf_init_item);
}

/// `Py_SIZE(obj)`
fn var_object_size(
    builder: &mut IrBuilder<'_>,
    args: &[ValueId],
    line: i32,
) -> ValueId {
    let elem_address = builder.get_element_ptr(args[0], py_var_object_struct(), "ob_size", line);
    builder.load_mem(elem_address, RType::c_ssize_t(), line)
}

/// 列表的 `ob_item` 数组
fn list_items(
    builder: &mut IrBuilder<'_>,
    args: &[ValueId],
    line: i32,
) -> ValueId {
    let ob_item_ptr = builder.get_element_ptr(args[0], py_list_object_struct(), "ob_item", line);
    builder.load_mem(ob_item_ptr, RType::pointer(), line)
}

/// 不检查边界的下标读取，结果是借用引用
fn list_get_item_unsafe(
    builder: &mut IrBuilder<'_>,
    args: &[ValueId],
    line: i32,
) -> ValueId {
    let items = list_items(builder, &args[..1], line);
    let item_address = offset_pointer(builder, items, args[1], line);
    builder.add_with(
        Op::LoadMem { src: item_address },
        RType::object(),
        ErrorKind::Never,
        true,
        line,
    )
}

/// 初始化新分配缓冲区中的一项，窃取 `value`
fn buf_init_item(
    builder: &mut IrBuilder<'_>,
    args: &[ValueId],
    line: i32,
) -> ValueId {
    let (base, index, value) = (args[0], args[1], args[2]);
    let constant_index = match &builder.func().value(index).kind {
        ValueKind::Integer(n) => Some(*n),
        _ => None,
    };
    let ptr = match constant_index {
        Some(0) => base,
        Some(n) => {
            let offset = builder.integer(n * PLATFORM_SIZE, RType::c_ssize_t(), line);
            builder.int_op(RType::pointer(), base, offset, IntOpKind::Add, line)
        }
        None => offset_pointer(builder, base, index, line),
    };
    builder.add(
        Op::SetMem {
            dest_type: RType::object(),
            dest: ptr,
            src: value,
        },
        RType::Void,
        line,
    )
}

/// `base + index * PLATFORM_SIZE`
fn offset_pointer(
    builder: &mut IrBuilder<'_>,
    base: ValueId,
    index: ValueId,
    line: i32,
) -> ValueId {
    let size = builder.integer(PLATFORM_SIZE, RType::c_ssize_t(), line);
    let offset = builder.int_op(RType::c_ssize_t(), index, size, IntOpKind::Mul, line);
    builder.int_op(RType::pointer(), base, offset, IntOpKind::Add, line)
}
