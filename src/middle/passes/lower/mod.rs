//! 原语降级
//!
//! 把抽象的 `PrimitiveOp` 改写成底层 op（内存读写、整数运算、比较和分支）。
//! 改写函数按原语名称注册；没有注册改写的原语保持原样，由代码生成器
//! 直接调用其 C 函数。
//!
//! 改写可能引入新的基本块，源块剩余的 op 会接在构建器的当前块之后。
//! 被替换的 op 的所有引用最后通过一张替换表统一修补。

mod int_ops;
mod misc_ops;

use once_cell::sync::Lazy;
use std::collections::HashMap;
use tracing::debug;

use crate::middle::error::{CompileError, CompileResult};
use crate::middle::ir::pprint::format_func;
use crate::middle::ir::verify::primitive_arity;
use crate::middle::ir::{FuncIR, IrBuilder, Op, ValueId};

/// 降级改写：接收已替换过的参数，返回替代原 op 的值
pub type LowerFn = fn(&mut IrBuilder<'_>, &[ValueId], i32) -> ValueId;

static LOWERING_REGISTRY: Lazy<HashMap<&'static str, LowerFn>> = Lazy::new(|| {
    let mut registry: HashMap<&'static str, LowerFn> = HashMap::new();
    int_ops::register(&mut registry);
    misc_ops::register(&mut registry);
    registry
});

/// 按原语名称查找改写
pub fn lookup(name: &str) -> Option<LowerFn> {
    LOWERING_REGISTRY.get(name).copied()
}

/// 已注册改写的原语名称（排序后）
pub fn registered_names() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = LOWERING_REGISTRY.keys().copied().collect();
    names.sort_unstable();
    names
}

/// 降级一个函数，返回被改写的 op 数
///
/// 既没有改写也没有 C 函数的原语无法生成代码，报 `UnknownPrimitive`；
/// 参数个数与描述不符时报 `MalformedIr`。
pub fn lower_ir(func: &mut FuncIR) -> CompileResult<usize> {
    let arity_errors: Vec<_> = func.ops().filter_map(|(_, _, _, op)| primitive_arity(op)).collect();
    if !arity_errors.is_empty() {
        return Err(CompileError::MalformedIr {
            func: func.decl.fullname(),
            stage: "lower",
            errors: arity_errors,
            dump: format_func(func, None),
        });
    }
    let mut subst: HashMap<ValueId, ValueId> = HashMap::new();
    let mut lowered = 0usize;
    let old_layout = func.layout.clone();
    {
        let mut builder = IrBuilder::new(func);
        for block in old_layout {
            let ops = std::mem::take(&mut builder.func_mut().block_mut(block).ops);
            let handler = builder.func().block(block).error_handler;
            builder.set_error_handler(handler);
            builder.activate_block(block);

            for op_id in ops {
                let rewrite = match builder.func().op(op_id) {
                    Some(Op::PrimitiveOp {
                        name,
                        args,
                        c_function_name,
                        ..
                    }) => match lookup(name) {
                        Some(rewrite) => Some((rewrite, args.clone())),
                        None if c_function_name.is_some() => None,
                        None => return Err(CompileError::UnknownPrimitive(name.clone())),
                    },
                    _ => None,
                };
                match rewrite {
                    Some((rewrite, args)) => {
                        let args: Vec<ValueId> = args.iter().map(|a| *subst.get(a).unwrap_or(a)).collect();
                        let line = builder.func().value(op_id).line;
                        let result = rewrite(&mut builder, &args, line);
                        subst.insert(op_id, result);
                        lowered += 1;
                    }
                    None => builder.push_existing(op_id),
                }
            }
        }
    }

    if !subst.is_empty() {
        let ids: Vec<ValueId> = func.ops().map(|(_, _, id, _)| id).collect();
        for id in ids {
            if let Some(op) = func.op_mut(id) {
                op.map_sources(|v| *subst.get(&v).unwrap_or(&v));
            }
        }
    }
    debug!(func = %func.name(), lowered, blocks = func.layout.len(), "lower_ir");
    Ok(lowered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_contents() {
        assert_eq!(
            registered_names(),
            vec![
                "buf_init_item",
                "int_eq",
                "int_ge",
                "int_gt",
                "int_le",
                "int_lt",
                "int_ne",
                "list_get_item_unsafe",
                "list_items",
                "var_object_size",
            ]
        );
        assert!(lookup("int_add").is_none());
    }
}
