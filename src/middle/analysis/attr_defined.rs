//! 属性"总是已定义"分析
//!
//! 对子类集合封闭的原生类，分析 `__init__` 得出：
//! - 总是被初始化的属性（读取时可省略未定义检查）
//! - 有时被初始化的属性
//! - 哪些 `SetAttr` 是首次初始化（旧值一定未定义）
//! - `__init__` 是否泄漏 `self`
//!
//! 之后再用子类结果收缩父类结果：父类的"总是已定义"必须对所有子类成立。
//!
//! 可能执行任意代码的点被视为"出口"：之后的推断不可靠，只采信该点之前的状态。

use std::collections::{BTreeSet, HashSet};
use tracing::debug;

use super::cfg::{self, Cfg};
use super::dataflow::{run_analysis, AnalysisKind, AnalysisResult, GenKill, OpVisitor};
use super::self_leaks::analyze_self_leaks;
use crate::middle::ir::{ClassId, FuncIR, FuncId, Op, OpKey, Program, ValueId};

/// 对程序中的所有类运行分析，结果写回 `ClassIR` 与 `__init__` 的 `SetAttr`
pub fn analyze_always_defined_attrs(program: &mut Program) {
    let ids: Vec<ClassId> = (0..program.classes.len() as u32).map(ClassId).collect();

    let mut seen = HashSet::new();
    for &class in &ids {
        analyze_class(program, class, &mut seen);
    }

    // 第二轮：子类收缩父类
    let mut seen = HashSet::new();
    for &class in &ids {
        update_using_subclasses(program, class, &mut seen);
    }
}

/// 调用基类 `__init__` 一定会初始化的属性
fn attributes_initialized_by_init_call(
    program: &Program,
    callee: FuncId,
) -> BTreeSet<String> {
    let Some(class) = init_class(program, callee) else {
        return BTreeSet::new();
    };
    let mut result = BTreeSet::new();
    for &base in &program.class(class).mro {
        let base_ir = program.class(base);
        for attr in base_ir.attributes.keys() {
            if base_ir.is_always_defined(attr) {
                result.insert(attr.clone());
            }
        }
    }
    result
}

/// 调用基类 `__init__` 可能初始化的属性
fn attributes_maybe_initialized_by_init_call(
    program: &Program,
    callee: FuncId,
) -> BTreeSet<String> {
    let mut result = attributes_initialized_by_init_call(program, callee);
    if let Some(class) = init_class(program, callee) {
        result.extend(program.class(class).sometimes_initialized_attrs.iter().cloned());
    }
    result
}

/// 若 `callee` 是某个类的 `__init__`，返回该类
fn init_class(
    program: &Program,
    callee: FuncId,
) -> Option<ClassId> {
    let decl = &program.functions.get(callee.index())?.decl;
    if decl.name != "__init__" {
        return None;
    }
    decl.class.filter(|c| c.index() < program.classes.len())
}

struct AttributeMaybeDefinedVisitor<'a> {
    program: &'a Program,
    self_reg: ValueId,
}

impl OpVisitor<String> for AttributeMaybeDefinedVisitor<'_> {
    fn gen_kill(
        &self,
        _func: &FuncIR,
        _id: ValueId,
        op: &Op,
    ) -> GenKill<String> {
        match op {
            Op::SetAttr { obj, attr, .. } if *obj == self.self_reg => {
                (BTreeSet::from([attr.clone()]), BTreeSet::new())
            }
            Op::Call { func, .. } if init_class(self.program, *func).is_some() => (
                attributes_maybe_initialized_by_init_call(self.program, *func),
                BTreeSet::new(),
            ),
            _ => (BTreeSet::new(), BTreeSet::new()),
        }
    }
}

struct AttributeMaybeUndefinedVisitor<'a> {
    program: &'a Program,
    self_reg: ValueId,
}

impl OpVisitor<String> for AttributeMaybeUndefinedVisitor<'_> {
    fn gen_kill(
        &self,
        _func: &FuncIR,
        _id: ValueId,
        op: &Op,
    ) -> GenKill<String> {
        match op {
            Op::SetAttr { obj, attr, .. } if *obj == self.self_reg => {
                (BTreeSet::new(), BTreeSet::from([attr.clone()]))
            }
            Op::Call { func, .. } if init_class(self.program, *func).is_some() => (
                BTreeSet::new(),
                attributes_initialized_by_init_call(self.program, *func),
            ),
            _ => (BTreeSet::new(), BTreeSet::new()),
        }
    }
}

pub fn analyze_maybe_defined_attrs_in_init(
    program: &Program,
    func: &FuncIR,
    self_reg: ValueId,
    attrs_with_defaults: &BTreeSet<String>,
    cfg: &Cfg,
) -> AnalysisResult<String> {
    run_analysis(
        func,
        cfg,
        &AttributeMaybeDefinedVisitor { program, self_reg },
        attrs_with_defaults,
        AnalysisKind::Maybe,
        false,
    )
}

pub fn analyze_maybe_undefined_attrs_in_init(
    program: &Program,
    func: &FuncIR,
    self_reg: ValueId,
    initial_undefined: &BTreeSet<String>,
    cfg: &Cfg,
) -> AnalysisResult<String> {
    run_analysis(
        func,
        cfg,
        &AttributeMaybeUndefinedVisitor { program, self_reg },
        initial_undefined,
        AnalysisKind::Maybe,
        false,
    )
}

/// 单个类的分析结果
struct InitFacts {
    always: BTreeSet<String>,
    sometimes: BTreeSet<String>,
    init_self_leak: bool,
    init_ops: Vec<ValueId>,
    init_method: FuncId,
}

fn analyze_class(
    program: &mut Program,
    class: ClassId,
    seen: &mut HashSet<ClassId>,
) {
    if !seen.insert(class) {
        return;
    }
    {
        let cl = program.class(class);
        if cl.is_trait
            || cl.inherits_python
            || cl.allow_interpreted_subclasses
            || cl.builtin_base.is_some()
            || cl.children.is_none()
        {
            // 无法保证属性总是已定义
            return;
        }
    }

    let bases: Vec<ClassId> = program.class(class).mro.iter().skip(1).copied().collect();
    for base in bases {
        analyze_class(program, base, seen);
    }

    let Some((init, _)) = program.get_method(class, "__init__") else {
        let cl = program.class_mut(class);
        cl.always_initialized_attrs = cl.attrs_with_defaults.clone();
        cl.sometimes_initialized_attrs = cl.attrs_with_defaults.clone();
        return;
    };

    let Some(facts) = compute_init_facts(program, class, init) else {
        return;
    };
    debug!(
        class = %program.class(class).fullname(),
        always = ?facts.always,
        init_self_leak = facts.init_self_leak,
        "always-defined attributes"
    );

    let func = program.func_mut(facts.init_method);
    for op_id in facts.init_ops {
        if let Some(Op::SetAttr { is_init, .. }) = func.op_mut(op_id) {
            *is_init = true;
        }
    }
    let cl = program.class_mut(class);
    cl.always_initialized_attrs = facts.always;
    cl.sometimes_initialized_attrs = facts.sometimes;
    cl.init_self_leak = facts.init_self_leak;
}

fn compute_init_facts(
    program: &Program,
    class: ClassId,
    init: FuncId,
) -> Option<InitFacts> {
    let func = program.func(init);
    let self_reg = *func.arg_regs.first()?;
    if func.layout.is_empty() {
        return None;
    }
    let cl = program.class(class);
    let cfg = cfg::build(func);

    let dirty = analyze_self_leaks(program, func, self_reg, &cfg);
    let maybe_defined = analyze_maybe_defined_attrs_in_init(program, func, self_reg, &cl.attrs_with_defaults, &cfg);
    let all_attrs: BTreeSet<String> = program.mro_attribute_names(class).into_iter().collect();
    let initial_undefined: BTreeSet<String> = all_attrs.difference(&cl.attrs_with_defaults).cloned().collect();
    let maybe_undefined = analyze_maybe_undefined_attrs_in_init(program, func, self_reg, &initial_undefined, &cfg);

    let always = find_always_defined_attributes(func, self_reg, &all_attrs, &maybe_defined, &maybe_undefined, &dirty)
        .into_iter()
        .filter(|attr| !cl.is_deletable(attr))
        .collect();
    let init_ops = find_attr_initialization_ops(func, self_reg, &maybe_defined, &dirty);
    let init_self_leak = func
        .ops()
        .any(|(block, idx, _, op)| !matches!(op, Op::Return { .. }) && dirty.after_contains((block, idx), &()));
    let sometimes = find_sometimes_defined_attributes(func, &maybe_defined, &dirty);

    Some(InitFacts {
        always,
        sometimes,
        init_self_leak,
        init_ops,
        init_method: init,
    })
}

/// 某点之后确定已定义的属性：可能已定义且不可能未定义
fn defined_after(
    maybe_defined: &AnalysisResult<String>,
    maybe_undefined: &AnalysisResult<String>,
    key: OpKey,
) -> BTreeSet<String> {
    let empty = BTreeSet::new();
    let defined = maybe_defined.after(key).unwrap_or(&empty);
    let undefined = maybe_undefined.after(key).unwrap_or(&empty);
    defined - undefined
}

pub fn find_always_defined_attributes(
    func: &FuncIR,
    self_reg: ValueId,
    all_attrs: &BTreeSet<String>,
    maybe_defined: &AnalysisResult<String>,
    maybe_undefined: &AnalysisResult<String>,
    dirty: &AnalysisResult<()>,
) -> BTreeSet<String> {
    let mut attrs = all_attrs.clone();
    for &block in &func.layout {
        for (idx, &id) in func.block(block).ops.iter().enumerate() {
            let Some(op) = func.op(id) else { continue };
            let key = (block, idx);
            match op {
                // 读取一个可能未定义的属性
                Op::GetAttr { obj, attr, .. } if *obj == self_reg => {
                    if maybe_undefined.before_contains(key, attr) {
                        attrs.remove(attr);
                    }
                }
                // 写入时属性既可能已定义又可能未定义
                Op::SetAttr { obj, attr, .. } if *obj == self_reg => {
                    if maybe_undefined.before_contains(key, attr) && maybe_defined.before_contains(key, attr) {
                        attrs.remove(attr);
                    }
                }
                _ => {}
            }
            if dirty.after_contains(key, &()) {
                if !dirty.before_contains(key, &()) {
                    attrs = &attrs & &defined_after(maybe_defined, maybe_undefined, key);
                }
                break;
            }
            if op.is_control() {
                for target in op.targets() {
                    if dirty.before_contains((target, 0), &()) {
                        attrs = &attrs & &defined_after(maybe_defined, maybe_undefined, (target, 0));
                    }
                }
            }
        }
    }
    attrs
}

pub fn find_sometimes_defined_attributes(
    func: &FuncIR,
    maybe_defined: &AnalysisResult<String>,
    dirty: &AnalysisResult<()>,
) -> BTreeSet<String> {
    let empty = BTreeSet::new();
    let mut attrs = BTreeSet::new();
    for &block in &func.layout {
        for (idx, &id) in func.block(block).ops.iter().enumerate() {
            let Some(op) = func.op(id) else { continue };
            let key = (block, idx);
            if dirty.after_contains(key, &()) {
                if !dirty.before_contains(key, &()) {
                    attrs = &attrs | maybe_defined.after(key).unwrap_or(&empty);
                }
                break;
            }
            if op.is_control() {
                for target in op.targets() {
                    if dirty.before_contains((target, 0), &()) {
                        attrs = &attrs | maybe_defined.after((target, 0)).unwrap_or(&empty);
                    }
                }
            }
        }
    }
    attrs
}

/// 旧值一定未定义、且之前没有执行任意代码的 `SetAttr`
fn find_attr_initialization_ops(
    func: &FuncIR,
    self_reg: ValueId,
    maybe_defined: &AnalysisResult<String>,
    dirty: &AnalysisResult<()>,
) -> Vec<ValueId> {
    func.ops()
        .filter_map(|(block, idx, id, op)| match op {
            Op::SetAttr { obj, attr, .. }
                if *obj == self_reg
                    && !maybe_defined.before_contains((block, idx), attr)
                    && !dirty.after_contains((block, idx), &()) =>
            {
                Some(id)
            }
            _ => None,
        })
        .collect()
}

fn update_using_subclasses(
    program: &mut Program,
    class: ClassId,
    seen: &mut HashSet<ClassId>,
) {
    if seen.contains(&class) {
        return;
    }
    let Some(children) = program.class(class).children.clone() else {
        return;
    };
    for &child in &children {
        update_using_subclasses(program, child, seen);
    }
    let removed: Vec<String> = program
        .class(class)
        .always_initialized_attrs
        .iter()
        .filter(|attr| {
            children
                .iter()
                .any(|&child| !program.class(child).always_initialized_attrs.contains(*attr))
        })
        .cloned()
        .collect();
    let cl = program.class_mut(class);
    for attr in removed {
        cl.always_initialized_attrs.remove(&attr);
    }
    seen.insert(class);
}
