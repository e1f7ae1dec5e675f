//! IR verifier
//!
//! Structural checks run between passes when `verify_ir` is enabled. All
//! problems in a function are collected instead of stopping at the first.

use std::collections::HashSet;
use thiserror::Error;

use super::{BlockId, ClassIR, FuncIR, Op, Program, ValueId};
use crate::middle::primitives;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum IrVerifyError {
    #[error("function has no blocks")]
    NoBlocks,

    #[error("block L{0} appears more than once in the layout")]
    DuplicateBlock(u32),

    #[error("block L{0} does not end with a control op")]
    Unterminated(u32),

    #[error("block L{block}: control op at index {index} is not the last op")]
    ControlOpNotLast { block: u32, index: usize },

    #[error("block L{block}: {what} targets L{target} which is not in the layout")]
    ForeignTarget { block: u32, target: u32, what: &'static str },

    #[error("value v{0} is used as an op in more than one place")]
    SharedOp(u32),

    #[error("block L{block}: v{value} is not an op")]
    NotAnOp { block: u32, value: u32 },

    #[error("{op} reads v{value} which does not exist")]
    BadSource { op: &'static str, value: u32 },

    #[error("{op} reads v{value} which produces no value")]
    VoidSource { op: &'static str, value: u32 },

    #[error("{op} refers to {what} {id} which does not exist")]
    BadReference { op: &'static str, what: &'static str, id: u32 },

    #[error("primitive `{name}` takes {expected} arguments, got {found}")]
    PrimitiveArity { name: String, expected: usize, found: usize },
}

/// Check one function; `program` enables class/function reference checks
pub fn verify_func(
    func: &FuncIR,
    program: Option<&Program>,
) -> Vec<IrVerifyError> {
    let mut errors = Vec::new();
    if func.layout.is_empty() {
        errors.push(IrVerifyError::NoBlocks);
        return errors;
    }

    let mut in_layout: HashSet<BlockId> = HashSet::new();
    for &block in &func.layout {
        if !in_layout.insert(block) || block.index() >= func.blocks.len() {
            errors.push(IrVerifyError::DuplicateBlock(block.0));
        }
    }

    let mut seen_ops: HashSet<ValueId> = HashSet::new();
    for &block in &func.layout {
        if block.index() >= func.blocks.len() {
            continue;
        }
        let ops = &func.block(block).ops;
        if let Some(handler) = func.block(block).error_handler {
            if !in_layout.contains(&handler) {
                errors.push(IrVerifyError::ForeignTarget {
                    block: block.0,
                    target: handler.0,
                    what: "error handler",
                });
            }
        }
        if func.terminator(block).is_none() {
            errors.push(IrVerifyError::Unterminated(block.0));
        }

        for (index, &id) in ops.iter().enumerate() {
            if !seen_ops.insert(id) {
                errors.push(IrVerifyError::SharedOp(id.0));
            }
            let op = match id.index() < func.values.len() {
                true => func.op(id),
                false => None,
            };
            let Some(op) = op else {
                errors.push(IrVerifyError::NotAnOp {
                    block: block.0,
                    value: id.0,
                });
                continue;
            };
            if op.is_control() && index + 1 != ops.len() {
                errors.push(IrVerifyError::ControlOpNotLast {
                    block: block.0,
                    index,
                });
            }
            for target in op.targets() {
                if !in_layout.contains(&target) {
                    errors.push(IrVerifyError::ForeignTarget {
                        block: block.0,
                        target: target.0,
                        what: op.kind_name(),
                    });
                }
            }
            verify_sources(func, op, &mut errors);
            if let Some(error) = primitive_arity(op) {
                errors.push(error);
            }
            if let Some(program) = program {
                verify_references(program, op, &mut errors);
            }
        }
    }
    errors
}

/// 已知原语的参数个数必须与描述一致
pub fn primitive_arity(op: &Op) -> Option<IrVerifyError> {
    let Op::PrimitiveOp { name, args, .. } = op else {
        return None;
    };
    let desc = primitives::primitive_op(name)?;
    (desc.arg_types.len() != args.len()).then(|| IrVerifyError::PrimitiveArity {
        name: name.clone(),
        expected: desc.arg_types.len(),
        found: args.len(),
    })
}

fn verify_sources(
    func: &FuncIR,
    op: &Op,
    errors: &mut Vec<IrVerifyError>,
) {
    let mut sources = op.sources();
    if let Op::Assign { dest, .. } = op {
        sources.push(*dest);
    }
    for src in sources {
        if src.index() >= func.values.len() {
            errors.push(IrVerifyError::BadSource {
                op: op.kind_name(),
                value: src.0,
            });
        } else if func.value(src).is_void() {
            errors.push(IrVerifyError::VoidSource {
                op: op.kind_name(),
                value: src.0,
            });
        }
    }
}

fn verify_references(
    program: &Program,
    op: &Op,
    errors: &mut Vec<IrVerifyError>,
) {
    let class = match op {
        Op::GetAttr { class, .. } | Op::SetAttr { class, .. } | Op::MethodCall { class, .. } => Some(*class),
        _ => None,
    };
    if let Some(class) = class {
        if class.index() >= program.classes.len() {
            errors.push(IrVerifyError::BadReference {
                op: op.kind_name(),
                what: "class",
                id: class.0,
            });
        }
    }
    if let Op::Call { func, .. } = op {
        if func.index() >= program.functions.len() {
            errors.push(IrVerifyError::BadReference {
                op: op.kind_name(),
                what: "function",
                id: func.0,
            });
        }
    }
}

/// Check the class and function ids a class refers to
pub fn verify_class(
    program: &Program,
    class: &ClassIR,
) -> Vec<IrVerifyError> {
    let mut errors = Vec::new();
    let mut check_class = |field: &'static str, id: super::ClassId| {
        if id.index() >= program.classes.len() {
            errors.push(IrVerifyError::BadReference {
                op: field,
                what: "class",
                id: id.0,
            });
        }
    };
    for &id in class.base.iter() {
        check_class("base", id);
    }
    for &id in &class.traits {
        check_class("traits", id);
    }
    for &id in &class.mro {
        check_class("mro", id);
    }
    for &id in &class.base_mro {
        check_class("base_mro", id);
    }
    for &id in class.children.iter().flatten() {
        check_class("children", id);
    }
    for glue in &class.glue_methods {
        check_class("glue method", glue.parent);
    }

    let methods = class
        .methods
        .values()
        .map(|&m| ("methods", m))
        .chain(class.glue_methods.iter().map(|g| ("glue method", g.method)));
    for (field, id) in methods {
        if id.index() >= program.functions.len() {
            errors.push(IrVerifyError::BadReference {
                op: field,
                what: "function",
                id: id.0,
            });
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middle::ir::{ArgKind, ClassId, FuncDecl, FuncId, FuncSignature, IrBuilder, RuntimeArg};
    use crate::middle::types::RType;

    fn empty_func() -> FuncIR {
        FuncIR::new(FuncDecl::new("f", "m", FuncSignature::new(vec![], RType::none())), 1)
    }

    #[test]
    fn test_no_blocks() {
        assert_eq!(verify_func(&empty_func(), None), vec![IrVerifyError::NoBlocks]);
    }

    #[test]
    fn test_unterminated_and_foreign_target() {
        let mut func = empty_func();
        let mut builder = IrBuilder::new(&mut func);
        let dangling = builder.new_block();
        builder.goto(dangling);
        let second = builder.new_block();
        builder.activate_block(second);
        let errors = verify_func(&func, None);
        assert!(errors.contains(&IrVerifyError::ForeignTarget {
            block: 0,
            target: dangling.0,
            what: "goto"
        }));
        assert!(errors.contains(&IrVerifyError::Unterminated(second.0)));
    }

    #[test]
    fn test_primitive_arity() {
        let sig = FuncSignature::new(vec![RuntimeArg::new("x", RType::int(), ArgKind::Pos)], RType::bool());
        let mut func = FuncIR::new(FuncDecl::new("f", "m", sig), 1);
        let mut builder = IrBuilder::new(&mut func);
        let x = builder.func().arg_regs[0];
        let desc = primitives::primitive_op("int_lt").cloned().unwrap();
        let cmp = builder.primitive_op(&desc, vec![x], 1);
        builder.ret(cmp, 1);
        assert_eq!(
            verify_func(&func, None),
            vec![IrVerifyError::PrimitiveArity {
                name: "int_lt".to_string(),
                expected: 2,
                found: 1
            }]
        );
    }

    #[test]
    fn test_class_with_dangling_ids() {
        let mut program = Program::new();
        program.add_module("m");
        let class = program.add_class("C", "m");
        assert!(verify_class(&program, program.class(class)).is_empty());

        let cl = program.class_mut(class);
        cl.mro.push(ClassId(9));
        cl.methods.insert("f".to_string(), FuncId(4));
        let errors = verify_class(&program, program.class(class));
        assert!(errors.contains(&IrVerifyError::BadReference {
            op: "mro",
            what: "class",
            id: 9
        }));
        assert!(errors.contains(&IrVerifyError::BadReference {
            op: "methods",
            what: "function",
            id: 4
        }));
    }

    #[test]
    fn test_well_formed_function_passes() {
        let mut func = empty_func();
        let mut builder = IrBuilder::new(&mut func);
        let none = builder.integer(1, RType::none(), 1);
        builder.ret(none, 1);
        assert!(verify_func(&func, None).is_empty());
    }
}
