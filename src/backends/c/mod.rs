//! C 后端
//!
//! 把经过中间层处理的 [`Program`] 翻译成 CPython 扩展模块的 C 源码，
//! 每个模块一个文件。名称在整个程序内统一分配，所以跨模块的调用、
//! 类型和静态变量引用都能对上。

mod class;
pub mod emit;
mod func;
pub mod module;
pub mod names;
mod wrapper;

use serde::Serialize;
use tracing::{debug, info};

use crate::middle::error::CompileResult;
use crate::middle::ir::Program;
use crate::util::config::CompilerOptions;

pub use emit::{c_escape_string, Emitter, EmitterContext};
pub use names::{exported_name, NameGenerator};

/// 一个生成的 C 文件
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CFile {
    /// 文件名，例如 `__native_pkg___mod.c`
    pub name: String,
    pub contents: String,
}

impl CFile {
    fn for_module(
        module_name: &str,
        contents: String,
    ) -> Self {
        CFile {
            name: format!("__native_{}.c", exported_name(module_name)),
            contents,
        }
    }
}

fn module_names(program: &Program) -> Vec<String> {
    program.modules.iter().map(|m| m.fullname.clone()).collect()
}

/// 生成单个模块
pub fn generate_module(
    program: &Program,
    module_name: &str,
    options: &CompilerOptions,
) -> CompileResult<CFile> {
    let mut names = NameGenerator::new(&module_names(program), &options.module_prefix);
    let contents = module::generate_module_source(program, module_name, &mut names, options)?;
    debug!(module = module_name, bytes = contents.len(), "generated");
    Ok(CFile::for_module(module_name, contents))
}

/// 生成程序中的所有模块，共用一张名称表
pub fn generate_program(
    program: &Program,
    options: &CompilerOptions,
) -> CompileResult<Vec<CFile>> {
    let modules = module_names(program);
    let mut names = NameGenerator::new(&modules, &options.module_prefix);
    let mut files = Vec::with_capacity(modules.len());
    for module_name in &modules {
        let contents = module::generate_module_source(program, module_name, &mut names, options)?;
        debug!(module = %module_name, bytes = contents.len(), "generated");
        files.push(CFile::for_module(module_name, contents));
    }
    info!(modules = files.len(), "C generation done");
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middle::error::CompileError;
    use crate::middle::pipeline::compile_program;
    use crate::middle::test_utils::{add_one, point_class};
    use crate::util::config::WrapperConvention;

    fn compiled_program(options: &CompilerOptions) -> Program {
        let mut program = Program::new();
        program.add_module("m");
        point_class(&mut program);
        program.add_function(add_one());
        compile_program(&mut program, options).unwrap();
        program
    }

    /// 从生成的文本中截取以 `header` 开头、到第一个顶格 `}` 为止的函数
    fn function_text<'a>(
        contents: &'a str,
        header: &str,
    ) -> Vec<&'a str> {
        let mut lines = contents.lines().skip_while(|l| !l.starts_with(header));
        let mut result = Vec::new();
        for line in lines.by_ref() {
            result.push(line);
            if line == "}" {
                break;
            }
        }
        result
    }

    #[test]
    fn test_module_artifacts() {
        let options = CompilerOptions::default();
        let program = compiled_program(&options);
        let file = generate_module(&program, "m", &options).unwrap();
        assert_eq!(file.name, "__native_m.c");
        let c = &file.contents;

        assert!(c.contains("#include <CPy.h>"));
        assert!(c.contains("} PointObject;"));
        assert!(c.contains("CPyVTableItem *vtable;"));
        assert!(c.contains("CPyTagged _x;"));
        assert!(c.contains("static bool\nPoint_vtable_setup(void)"));
        assert!(c.contains("PyObject *CPyDef_Point(void)"));
        assert!(c.contains("CPyTagged CPyDef_f(CPyTagged cpy_r_x) {"));
        assert!(c.contains(
            "PyObject *CPyPy_f(PyObject *self, PyObject *const *args, size_t nargs, PyObject *kwnames) {"
        ));
        // tp_new 通过旧约定包装函数调用 __init__
        assert!(c.contains("PyObject *CPyPyL_Point_____init__(PyObject *self, PyObject *args, PyObject *kw) {"));
        assert!(c.contains("PyObject *ret = CPyPyL_Point_____init__(self, args, kwds);"));
        assert!(c.contains("{\"f\", (PyCFunction)CPyPy_f, METH_FASTCALL | METH_KEYWORDS, NULL},"));
        assert!(c.contains("PyMODINIT_FUNC PyInit_m(void)"));
        assert!(c.contains("CPyType_Point = (PyTypeObject *)CPyType_FromTemplate("));
    }

    #[test]
    fn test_wrapper_conventions_share_core() {
        let options = CompilerOptions {
            wrapper_convention: WrapperConvention::Both,
            ..CompilerOptions::default()
        };
        let program = compiled_program(&options);
        let file = generate_module(&program, "m", &options).unwrap();

        let fastcall = function_text(&file.contents, "PyObject *CPyPy_f(");
        let legacy = function_text(&file.contents, "PyObject *CPyPyL_f(");
        assert!(!fastcall.is_empty());
        assert!(!legacy.is_empty());

        // 用同一张名称表单独生成核心部分
        let mut names = NameGenerator::new(&["m".to_string()], "");
        names.private_name("m", "f");
        let mut ctx = EmitterContext::new("m", names, &options);
        let mut em = Emitter::new(&mut ctx, &program);
        em.emit_line("wrapper {");
        let f = program.functions.iter().find(|f| f.decl.name == "f").unwrap();
        wrapper::generate_wrapper_core(&mut em, &f.decl, f.line).unwrap();
        let core: Vec<String> = em.into_lines().into_iter().skip(1).collect();
        assert!(core.iter().any(|l| l.contains("return retbox;")));

        for text in [&fastcall, &legacy] {
            let found = text.windows(core.len()).any(|w| w.iter().zip(&core).all(|(a, b)| *a == b.as_str()));
            assert!(found, "wrapper core not found in:\n{}", text.join("\n"));
        }
    }

    #[test]
    fn test_legacy_only_uses_plain_prefix() {
        let options = CompilerOptions {
            wrapper_convention: WrapperConvention::Legacy,
            ..CompilerOptions::default()
        };
        let program = compiled_program(&options);
        let file = generate_module(&program, "m", &options).unwrap();
        assert!(file.contents.contains("PyObject *CPyPy_f(PyObject *self, PyObject *args, PyObject *kw) {"));
        assert!(!file.contents.contains("CPyPyL_"));
        assert!(file.contents.contains("METH_VARARGS | METH_KEYWORDS"));
    }

    #[test]
    fn test_unknown_module() {
        let options = CompilerOptions::default();
        let program = compiled_program(&options);
        let err = generate_module(&program, "missing", &options).unwrap_err();
        assert!(matches!(err, CompileError::UnknownModule(name) if name == "missing"));
    }

    #[test]
    fn test_program_names_are_shared() {
        let options = CompilerOptions::default();
        let mut program = compiled_program(&options);
        program.add_module("n");
        let files = generate_program(&program, &options).unwrap();
        let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["__native_m.c", "__native_n.c"]);
        // 另一个模块看到的是同一个类型对象，只是外部声明
        assert!(files[1].contents.contains("extern PyTypeObject *CPyType_m___Point;"));
        assert!(files[0].contents.contains("PyTypeObject *CPyType_m___Point;"));
    }
}
