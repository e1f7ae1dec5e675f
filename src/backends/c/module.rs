//! 模块组装
//!
//! 先生成函数体、包装函数和类，再按 C 的声明顺序组装整个文件：
//!
//! ```text
//! 头部注释与 #include
//! 元组结构体          (生成函数体时登记)
//! 对象结构体          (程序中所有类)
//! 类型对象、静态变量
//! 原型
//! 函数体 / 包装函数 / 类
//! 模块方法表、PyModuleDef、PyInit_<name>
//! ```

use indexmap::IndexMap;
use tracing::debug;

use super::class::{constructor_header, generate_class, generate_object_struct, is_instantiable, table_wrapper, template_name, vtable_setup_name};
use super::emit::{c_escape_string, c_string, Emitter, EmitterContext};
use super::func::{generate_native_function, native_function_header};
use super::names::NameGenerator;
use super::wrapper::{generate_wrapper_function, wrapper_function_header, Convention};
use crate::middle::error::{CompileError, CompileResult};
use crate::middle::ir::{ClassId, FuncId, Literal, ModuleIR, Namespace, Op, Program};
use crate::middle::types::{RTuple, RType};
use crate::util::config::CompilerOptions;

/// 模块顶层代码所在函数的名称
pub const TOP_LEVEL_NAME: &str = "__top_level__";

/// 生成一个模块的完整 C 源码
///
/// `names` 在程序的所有模块之间共享，生成结束后写回。
pub fn generate_module_source(
    program: &Program,
    module_name: &str,
    names: &mut NameGenerator,
    options: &CompilerOptions,
) -> CompileResult<String> {
    let module = program
        .module(module_name)
        .ok_or_else(|| CompileError::UnknownModule(module_name.to_string()))?;
    let mut ctx = EmitterContext::new(module_name, names.clone(), options);

    let body = generate_bodies(&mut ctx, program, module)?;
    let init = generate_module_init(&mut ctx, program, module)?;
    let declarations = generate_declarations(&mut ctx, program, module)?;
    let structs = generate_structs(&mut ctx, program)?;
    let tuples = generate_tuple_structs(&mut ctx, program);

    let mut out: Vec<String> = Vec::new();
    out.push(format!("/* Generated from module {} */", module_name));
    out.push("#include <Python.h>".to_string());
    out.push("#include <CPy.h>".to_string());
    out.push("#include <stddef.h>".to_string());
    out.push("#include <string.h>".to_string());
    out.push(String::new());
    for section in [tuples, structs, declarations, body, init] {
        out.extend(section);
        out.push(String::new());
    }

    debug!(
        module = module_name,
        literals = ctx.literals.len(),
        tuples = ctx.tuple_structs.len(),
        lines = out.len(),
        "module assembled"
    );
    *names = ctx.names;
    Ok(out.join("\n"))
}

/// 本模块定义的函数，按程序中的顺序（方法与胶水方法也在内）
fn module_functions<'p>(
    program: &'p Program,
    module: &ModuleIR,
) -> impl Iterator<Item = FuncId> + 'p {
    let name = module.fullname.clone();
    program
        .functions
        .iter()
        .enumerate()
        .filter(move |(_, f)| f.decl.module_name == name)
        .map(|(i, _)| FuncId(i as u32))
}

/// 需要 Python 包装函数的函数：模块级函数（顶层代码除外）和类中登记的方法
fn needs_wrapper(
    program: &Program,
    id: FuncId,
) -> bool {
    let decl = &program.func(id).decl;
    match decl.class {
        None => decl.name != TOP_LEVEL_NAME,
        Some(class) => program.class(class).methods.get(&decl.name) == Some(&id),
    }
}

/// 本模块要生成的包装函数及其约定
///
/// `__init__` 总有一个旧约定的包装函数，供 `tp_new` 转发参数。
fn wrapper_conventions(
    ctx: &EmitterContext,
    program: &Program,
    id: FuncId,
) -> Vec<Convention> {
    if !needs_wrapper(program, id) {
        return Vec::new();
    }
    let convention = ctx.options.wrapper_convention;
    let mut result = Vec::new();
    if convention.emits_fastcall() {
        result.push(Convention::Fastcall);
    }
    let decl = &program.func(id).decl;
    if convention.emits_legacy() || (decl.is_method() && decl.name == "__init__") {
        result.push(Convention::Legacy);
    }
    result
}

/// 类按基类优先的顺序排列
fn classes_base_first(
    program: &Program,
    classes: &[ClassId],
) -> Vec<ClassId> {
    fn visit(
        program: &Program,
        class: ClassId,
        classes: &[ClassId],
        result: &mut Vec<ClassId>,
    ) {
        if result.contains(&class) || !classes.contains(&class) {
            return;
        }
        let cl = program.class(class);
        if let Some(base) = cl.base {
            visit(program, base, classes, result);
        }
        for &t in &cl.traits {
            visit(program, t, classes, result);
        }
        result.push(class);
    }

    let mut result = Vec::with_capacity(classes.len());
    for &class in classes {
        visit(program, class, classes, &mut result);
    }
    result
}

// ==================== 函数体 ====================

fn generate_bodies(
    ctx: &mut EmitterContext,
    program: &Program,
    module: &ModuleIR,
) -> CompileResult<Vec<String>> {
    let mut em = Emitter::new(ctx, program);
    for id in module_functions(program, module) {
        let func = program.func(id);
        generate_native_function(&mut em, func)?;
        em.emit_line("");
        for convention in wrapper_conventions(em.ctx, program, id) {
            generate_wrapper_function(&mut em, &func.decl, func.line, convention)?;
            em.emit_line("");
        }
    }
    for class in classes_base_first(program, &module.classes) {
        generate_class(&mut em, class)?;
        em.emit_line("");
    }
    Ok(em.into_lines())
}

// ==================== 声明 ====================

fn generate_tuple_structs(
    ctx: &mut EmitterContext,
    program: &Program,
) -> Vec<String> {
    let tuples: Vec<RTuple> = ctx.tuple_structs.values().cloned().collect();
    let mut em = Emitter::new(ctx, program);
    for tuple in tuples {
        let name = tuple.struct_name();
        em.emit_line(format!("#ifndef MYPYC_DECLARED_{}", name));
        em.emit_line(format!("#define MYPYC_DECLARED_{}", name));
        em.emit_line(format!("typedef struct {} {{", name));
        if tuple.types.is_empty() {
            em.emit_line("int empty_struct_error_flag;");
        }
        for (i, item) in tuple.types.iter().enumerate() {
            let ctype = item.c_type();
            let sep = if ctype.ends_with('*') { "" } else { " " };
            em.emit_line(format!("{}{}f{};", ctype, sep, i));
        }
        em.emit_line(format!("}} {};", name));
        em.emit_line("#endif");
    }
    em.into_lines()
}

fn generate_structs(
    ctx: &mut EmitterContext,
    program: &Program,
) -> CompileResult<Vec<String>> {
    let mut em = Emitter::new(ctx, program);
    for idx in 0..program.classes.len() {
        generate_object_struct(&mut em, ClassId(idx as u32))?;
        em.emit_line("");
    }
    Ok(em.into_lines())
}

/// 模块内部用到的静态变量：名称 -> (C 类型, 是否由本模块定义)
fn collect_statics(
    em: &mut Emitter<'_>,
    program: &Program,
    module: &ModuleIR,
) -> IndexMap<String, (RType, bool)> {
    let mut statics = IndexMap::new();
    for (name, ty) in &module.final_names {
        let c_name = em.static_name(name, &module.fullname);
        statics.insert(c_name, (ty.clone(), true));
    }
    for id in module_functions(program, module) {
        let func = program.func(id);
        for (_, _, value, op) in func.ops() {
            let (identifier, owner, ty) = match op {
                Op::LoadStatic {
                    identifier,
                    module_name,
                    namespace: Namespace::Static,
                } => (identifier, module_name, func.ty(value).clone()),
                Op::InitStatic {
                    value: src,
                    identifier,
                    module_name,
                    namespace: Namespace::Static,
                } => (identifier, module_name, func.ty(*src).clone()),
                _ => continue,
            };
            let owner = owner.clone().unwrap_or_else(|| module.fullname.clone());
            let local = owner == module.fullname;
            let c_name = em.static_name(identifier, &owner);
            statics.entry(c_name).or_insert((ty, local));
        }
    }
    statics
}

/// 导入模块的 C 变量名
fn imported_module_name(
    em: &mut Emitter<'_>,
    module: &ModuleIR,
    import: &str,
) -> String {
    format!(
        "{}{}",
        Namespace::Module.prefix(),
        em.ctx.names.private_name(&module.fullname, import)
    )
}

fn internal_module_name(
    em: &Emitter<'_>,
    module: &ModuleIR,
) -> String {
    format!("CPyModule_{}_internal", em.ctx.names.module_name(&module.fullname))
}

fn generate_declarations(
    ctx: &mut EmitterContext,
    program: &Program,
    module: &ModuleIR,
) -> CompileResult<Vec<String>> {
    let literal_count = ctx.literals.len().max(1);
    let mut em = Emitter::new(ctx, program);

    // 类型对象
    for idx in 0..program.classes.len() {
        let class = ClassId(idx as u32);
        let type_name = em.type_struct_name(class);
        if program.class(class).module_name == module.fullname {
            em.emit_line(format!("PyTypeObject *{};", type_name));
        } else {
            em.emit_line(format!("extern PyTypeObject *{};", type_name));
        }
    }
    em.emit_line("");

    // 静态变量
    em.emit_line(format!("static PyObject *CPyStatics[{}];", literal_count));
    let internal = internal_module_name(&em, module);
    em.emit_line(format!("static PyObject *{} = NULL;", internal));
    let globals = em.globals_name();
    em.emit_line(format!("PyObject *{};", globals));
    for import in &module.imports {
        let name = imported_module_name(&mut em, module, import);
        em.emit_line(format!("static PyObject *{};", name));
    }
    for (name, (ty, local)) in collect_statics(&mut em, program, module) {
        let ctype = em.ctype_spaced(&ty);
        if local {
            let init = em.c_initializer_undefined_value(&ty)?;
            em.emit_line(format!("{}{} = {};", ctype, name, init));
        } else {
            em.emit_line(format!("extern {}{};", ctype, name));
        }
    }
    em.emit_line("");

    // 原型
    for func in &program.functions {
        let header = native_function_header(&mut em, &func.decl);
        em.emit_line(format!("{};", header));
    }
    for idx in 0..program.classes.len() {
        let class = ClassId(idx as u32);
        if !program.class(class).is_trait && is_instantiable(&em, class) {
            let header = constructor_header(&mut em, class);
            em.emit_line(format!("{};", header));
        }
    }
    for id in module_functions(program, module) {
        let decl = &program.func(id).decl;
        for convention in wrapper_conventions(em.ctx, program, id) {
            let header = wrapper_function_header(&mut em, decl, convention);
            em.emit_line(format!("{};", header));
        }
    }
    Ok(em.into_lines())
}

// ==================== 模块初始化 ====================

fn generate_module_init(
    ctx: &mut EmitterContext,
    program: &Program,
    module: &ModuleIR,
) -> CompileResult<Vec<String>> {
    let mut em = Emitter::new(ctx, program);
    let short_name = module
        .fullname
        .rsplit('.')
        .next()
        .unwrap_or(module.fullname.as_str())
        .to_string();

    // 模块级函数表
    em.emit_line("static PyMethodDef module_methods[] = {");
    for &id in &module.functions {
        if !needs_wrapper(program, id) {
            continue;
        }
        let decl = program.func(id).decl.clone();
        let (convention, wrapper) = table_wrapper(&mut em, &decl);
        em.emit_line(format!(
            "{{{}, (PyCFunction){}, {}, NULL}},",
            c_string(&decl.name),
            wrapper,
            convention.method_flags()
        ));
    }
    em.emit_line("{NULL, NULL, 0, NULL}");
    em.emit_line("};");
    em.emit_line("");

    em.emit_line("static struct PyModuleDef module = {");
    em.emit_line("PyModuleDef_HEAD_INIT,");
    em.emit_line(format!("{},", c_string(&module.fullname)));
    em.emit_line("NULL, /* docstring */");
    em.emit_line("-1,");
    em.emit_line("module_methods");
    em.emit_line("};");
    em.emit_line("");

    let internal = internal_module_name(&em, module);
    let globals = em.globals_name();
    em.emit_line(format!("PyMODINIT_FUNC PyInit_{}(void)", short_name));
    em.emit_line("{");
    em.emit_line("PyObject *modname = NULL;");
    em.emit_line(format!("if ({}) {{", internal));
    em.emit_line(format!("Py_INCREF({});", internal));
    em.emit_line(format!("return {};", internal));
    em.emit_line("}");
    em.emit_line(format!("{} = PyModule_Create(&module);", internal));
    em.emit_line(format!("if (unlikely({} == NULL))", internal));
    em.emit_line("    goto fail;");
    em.emit_line(format!("modname = PyObject_GetAttrString((PyObject *){}, \"__name__\");", internal));
    em.emit_line("if (unlikely(modname == NULL))");
    em.emit_line("    goto fail;");
    em.emit_line(format!("{} = PyModule_GetDict({});", globals, internal));
    em.emit_line(format!("if (unlikely({} == NULL))", globals));
    em.emit_line("    goto fail;");

    for import in &module.imports {
        let name = imported_module_name(&mut em, module, import);
        em.emit_line(format!("{} = PyImport_ImportModule({});", name, c_string(import)));
        em.emit_line(format!("if (unlikely({} == NULL))", name));
        em.emit_line("    goto fail;");
    }

    generate_literal_init(&mut em);

    let classes = classes_base_first(program, &module.classes);
    for &class in &classes {
        generate_type_init(&mut em, class, &internal)?;
    }
    for &class in &classes {
        if !program.class(class).is_trait {
            let setup = vtable_setup_name(&mut em, class);
            em.emit_line(format!("{}();", setup));
        }
    }

    let top_level = module
        .functions
        .iter()
        .copied()
        .find(|&id| program.func(id).decl.name == TOP_LEVEL_NAME);
    if let Some(id) = top_level {
        let decl = program.func(id).decl.clone();
        let native = em.native_function_name(&decl);
        let ctype = em.ctype_spaced(&decl.sig.ret_type);
        em.emit_line(format!("{}result = {}();", ctype, native));
        let check = em.error_value_check("result", &decl.sig.ret_type, "==")?;
        em.emit_line(format!("if (unlikely({}))", check));
        em.emit_line("    goto fail;");
    }

    em.emit_line("Py_DECREF(modname);");
    em.emit_line(format!("return {};", internal));
    em.emit_label("fail");
    em.emit_line(format!("Py_CLEAR({});", internal));
    em.emit_line("Py_CLEAR(modname);");
    for &class in &classes {
        let type_name = em.type_struct_name(class);
        em.emit_line(format!("Py_CLEAR({});", type_name));
    }
    em.emit_line("return NULL;");
    em.emit_line("}");
    Ok(em.into_lines())
}

/// 创建 `CPyStatics[]` 中的字面量对象
fn generate_literal_init(em: &mut Emitter<'_>) {
    let literals: Vec<(Literal, usize)> = em.ctx.literals.iter().map(|(l, i)| (l.clone(), i)).collect();
    for (literal, index) in literals {
        let target = format!("CPyStatics[{}]", index);
        let expr = match &literal {
            Literal::Str(s) => format!(
                "PyUnicode_FromStringAndSize(\"{}\", {})",
                c_escape_string(s.as_bytes()),
                s.len()
            ),
            Literal::Bytes(b) => format!("PyBytes_FromStringAndSize(\"{}\", {})", c_escape_string(b), b.len()),
            Literal::Int(digits) => format!("PyLong_FromString({}, NULL, 10)", c_string(digits)),
            Literal::Float(repr) => format!("PyFloat_FromDouble({})", repr),
        };
        em.emit_line(format!("{} = {};", target, expr));
        em.emit_line(format!("if (unlikely({} == NULL))", target));
        em.emit_line("    goto fail;");
        if matches!(literal, Literal::Str(_)) {
            em.emit_line(format!("PyUnicode_InternInPlace(&{});", target));
        }
    }
}

/// 由模板创建类型对象并放进模块
fn generate_type_init(
    em: &mut Emitter<'_>,
    class: ClassId,
    internal: &str,
) -> CompileResult<()> {
    let program = em.program;
    let cl = program.class(class);
    let type_name = em.type_struct_name(class);
    let template = template_name(em, class);

    let mut bases = Vec::new();
    if let Some(base) = cl.base {
        bases.push(format!("(PyObject *){}", em.type_struct_name(base)));
    }
    for &t in &cl.traits {
        bases.push(format!("(PyObject *){}", em.type_struct_name(t)));
    }
    let bases_expr = if bases.is_empty() {
        "NULL".to_string()
    } else {
        let tmp = em.temp_name();
        em.emit_line(format!("PyObject *{} = PyTuple_Pack({}, {});", tmp, bases.len(), bases.join(", ")));
        em.emit_line(format!("if (unlikely({} == NULL))", tmp));
        em.emit_line("    goto fail;");
        tmp
    };

    em.emit_line(format!(
        "{} = (PyTypeObject *)CPyType_FromTemplate((PyObject *){}, {}, modname);",
        type_name, template, bases_expr
    ));
    if bases_expr != "NULL" {
        em.emit_line(format!("Py_DECREF({});", bases_expr));
    }
    em.emit_line(format!("if (unlikely(!{}))", type_name));
    em.emit_line("    goto fail;");
    em.emit_line(format!(
        "if (PyObject_SetAttrString({}, {}, (PyObject *){}) < 0)",
        internal,
        c_string(&cl.name),
        type_name
    ));
    em.emit_line("    goto fail;");
    Ok(())
}
