//! Middle-end pipeline
//!
//! With `verify_ir` the whole input program is verified first. Class-level
//! passes run next (vtables, always-defined attributes) because exception
//! insertion reads their results. Every function then goes through
//! the same ordered sequence:
//!
//! ```text
//! cleanup_cfg → uninit → exceptions → refcount → lower
//! ```
//!
//! Functions are independent of each other at this point, so the per-function
//! sequence can run on a rayon thread pool.

use rayon::prelude::*;
use std::ops::AddAssign;
use tracing::{debug, info};

#[cfg(feature = "debug")]
use tracing::trace;

use crate::middle::analysis::{analyze_always_defined_attrs, cleanup_cfg};
use crate::middle::error::{CompileError, CompileResult};
use crate::middle::ir::pprint::format_func;
use crate::middle::ir::verify::{verify_class, verify_func};
use crate::middle::ir::{ClassIR, FuncIR, Program};
use crate::middle::passes::{
    compute_vtables, insert_exception_handling, insert_ref_count_opcodes, insert_uninit_checks, lower_ir,
};
use crate::util::config::CompilerOptions;

/// What the per-function passes did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassStats {
    pub functions: usize,
    pub uninit_guards: usize,
    pub error_checks: usize,
    pub refcount_ops: usize,
    pub lowered_ops: usize,
}

impl AddAssign for PassStats {
    fn add_assign(
        &mut self,
        other: Self,
    ) {
        self.functions += other.functions;
        self.uninit_guards += other.uninit_guards;
        self.error_checks += other.error_checks;
        self.refcount_ops += other.refcount_ops;
        self.lowered_ops += other.lowered_ops;
    }
}

/// Fail with a dump of the function if the verifier finds anything
pub fn check_func(
    func: &FuncIR,
    stage: &'static str,
    program: Option<&Program>,
) -> CompileResult<()> {
    let errors = verify_func(func, program);
    if errors.is_empty() {
        return Ok(());
    }
    Err(CompileError::MalformedIr {
        func: func.decl.fullname(),
        stage,
        errors,
        dump: format_func(func, program),
    })
}

fn after_stage(
    func: &FuncIR,
    stage: &'static str,
    options: &CompilerOptions,
) -> CompileResult<()> {
    #[cfg(feature = "debug")]
    trace!(stage, "\n{}", format_func(func, None));
    if options.verify_ir {
        check_func(func, stage, None)?;
    }
    Ok(())
}

/// Verify classes and functions before anything indexes through their ids
pub fn check_program(program: &Program) -> CompileResult<()> {
    for class in &program.classes {
        let errors = verify_class(program, class);
        if !errors.is_empty() {
            return Err(CompileError::MalformedIr {
                func: class.fullname(),
                stage: "input",
                errors,
                dump: format!("{:#?}", class),
            });
        }
    }
    for func in &program.functions {
        check_func(func, "input", Some(program))?;
    }
    Ok(())
}

/// Run the class-level passes
pub fn run_class_passes(program: &mut Program) -> CompileResult<()> {
    compute_vtables(program)?;
    analyze_always_defined_attrs(program);
    Ok(())
}

/// Run the per-function passes on one function
pub fn transform_func(
    func: &mut FuncIR,
    classes: &[ClassIR],
    options: &CompilerOptions,
) -> CompileResult<PassStats> {
    if options.verify_ir {
        check_func(func, "input", None)?;
    }
    let mut stats = PassStats {
        functions: 1,
        ..PassStats::default()
    };

    cleanup_cfg(func);
    after_stage(func, "cleanup", options)?;

    stats.uninit_guards = insert_uninit_checks(func);
    after_stage(func, "uninit", options)?;

    stats.error_checks = insert_exception_handling(func, classes);
    after_stage(func, "exceptions", options)?;

    stats.refcount_ops = insert_ref_count_opcodes(func, options.strict_errors);
    after_stage(func, "refcount", options)?;

    stats.lowered_ops = lower_ir(func)?;
    after_stage(func, "lower", options)?;

    debug!(
        func = %func.decl.fullname(),
        blocks = func.layout.len(),
        ops = func.op_count(),
        "transformed"
    );
    Ok(stats)
}

/// Run the whole middle-end over a program
pub fn compile_program(
    program: &mut Program,
    options: &CompilerOptions,
) -> CompileResult<PassStats> {
    if options.verify_ir {
        check_program(program)?;
    }
    run_class_passes(program)?;

    let Program {
        classes, functions, ..
    } = program;
    let classes: &[ClassIR] = classes;
    let per_func: Vec<PassStats> = if options.parallel {
        functions
            .par_iter_mut()
            .map(|func| transform_func(func, classes, options))
            .collect::<CompileResult<_>>()?
    } else {
        functions
            .iter_mut()
            .map(|func| transform_func(func, classes, options))
            .collect::<CompileResult<_>>()?
    };

    if options.verify_ir {
        for func in &program.functions {
            check_func(func, "program", Some(program))?;
        }
    }

    let mut stats = PassStats::default();
    for s in per_func {
        stats += s;
    }
    info!(
        functions = stats.functions,
        guards = stats.uninit_guards,
        checks = stats.error_checks,
        refcounts = stats.refcount_ops,
        lowered = stats.lowered_ops,
        "middle-end done"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middle::ir::{ArgKind, BlockId, ClassId, FuncDecl, FuncSignature, IrBuilder, Op, RuntimeArg};
    use crate::middle::passes::lower;
    use crate::middle::test_utils::{add_one, branchy_strings, maybe_unbound, point_class};
    use crate::middle::types::RType;

    fn sample_program() -> Program {
        let mut program = Program::new();
        program.add_module("m");
        point_class(&mut program);
        program.add_function(add_one());
        program.add_function(maybe_unbound());
        program.add_function(branchy_strings());
        program
    }

    #[test]
    fn test_sequential_pipeline() {
        let mut program = sample_program();
        let stats = compile_program(&mut program, &CompilerOptions::default()).unwrap();
        assert_eq!(stats.functions, 4);
        assert_eq!(stats.uninit_guards, 1);
        assert!(program.classes[0].vtable.is_some());
        // 降级后不再有被注册改写的原语
        for func in &program.functions {
            assert!(func
                .ops()
                .all(|(_, _, _, op)| !matches!(op, Op::PrimitiveOp { name, .. } if lower::lookup(name).is_some())));
        }
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let mut sequential = sample_program();
        let mut parallel = sample_program();
        let stats_seq = compile_program(&mut sequential, &CompilerOptions::default()).unwrap();
        let options = CompilerOptions {
            parallel: true,
            ..CompilerOptions::default()
        };
        let stats_par = compile_program(&mut parallel, &options).unwrap();
        assert_eq!(stats_seq, stats_par);
        assert_eq!(sequential.functions, parallel.functions);
    }

    #[test]
    fn test_malformed_input_reported_with_dump() {
        let mut program = Program::new();
        program.add_module("m");
        let sig = FuncSignature::new(vec![RuntimeArg::new("x", RType::int(), ArgKind::Pos)], RType::int());
        let mut func = FuncIR::new(FuncDecl::new("broken", "m", sig), 1);
        let mut builder = IrBuilder::new(&mut func);
        let x = builder.func().arg_regs[0];
        builder.assign(x, x, 1);
        program.add_function(func);

        match compile_program(&mut program, &CompilerOptions::default()) {
            Err(CompileError::MalformedIr {
                func, stage, dump, ..
            }) => {
                assert_eq!(func, "m.broken");
                assert_eq!(stage, "input");
                assert!(dump.contains("def broken(x)"));
            }
            other => panic!("expected malformed IR, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_init_reported_before_class_passes() {
        let mut program = Program::new();
        program.add_module("m");
        let class = program.add_class("C", "m");
        let self_type = RType::instance(class, "C");
        let sig = FuncSignature::new(vec![RuntimeArg::new("self", self_type, ArgKind::Pos)], RType::none());
        let mut init = FuncIR::new(FuncDecl::method("__init__", "m", class, "C", sig), 1);
        IrBuilder::new(&mut init).goto(BlockId(99));
        program.add_function(init);

        match compile_program(&mut program, &CompilerOptions::default()) {
            Err(CompileError::MalformedIr { func, stage, .. }) => {
                assert_eq!(func, "m.C.__init__");
                assert_eq!(stage, "input");
            }
            other => panic!("expected malformed IR, got {:?}", other),
        }
    }

    #[test]
    fn test_dangling_mro_entry_reported() {
        let mut program = Program::new();
        program.add_module("m");
        let class = program.add_class("C", "m");
        program.class_mut(class).mro.push(ClassId(7));

        match compile_program(&mut program, &CompilerOptions::default()) {
            Err(CompileError::MalformedIr { func, errors, .. }) => {
                assert_eq!(func, "m.C");
                assert_eq!(errors.len(), 1);
            }
            other => panic!("expected malformed IR, got {:?}", other),
        }
    }
}
