//! Python 可调用的包装函数
//!
//! 包装函数解析 Python 参数、检查并拆箱每个参数、调用原生实现，再把结果装箱。
//! 两种调用约定只有开头的参数解析不同：
//!
//! - fastcall：`(self, args, nargs, kwnames)`，通过 `CPyArg_ParseStackAndKeywordsSimple`
//! - legacy：`(self, args, kw)`，通过 `CPyArg_ParseTupleAndKeywords`
//!
//! 解析之后的部分由 [`generate_wrapper_core`] 统一生成。

use super::emit::{c_string, Emitter, ErrorHandler};
use super::names::sanitize_identifier;
use crate::middle::error::CompileResult;
use crate::middle::ir::{ArgKind, FuncDecl, RuntimeArg};

/// 包装函数使用的调用约定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Convention {
    Fastcall,
    Legacy,
}

impl Convention {
    /// 方法表中的调用标志
    pub fn method_flags(self) -> &'static str {
        match self {
            Convention::Fastcall => "METH_FASTCALL | METH_KEYWORDS",
            Convention::Legacy => "METH_VARARGS | METH_KEYWORDS",
        }
    }
}

/// 按 Python 解析顺序重排：位置、可选位置、可选关键字、必需关键字
fn reorder_args(args: &[RuntimeArg]) -> Vec<&RuntimeArg> {
    let mut result = Vec::with_capacity(args.len());
    for kind in [ArgKind::Pos, ArgKind::Opt, ArgKind::NamedOpt, ArgKind::Named] {
        result.extend(args.iter().filter(|a| a.kind == kind));
    }
    result
}

/// 参数解析格式串，例如 `"OO|O$O@O:f"`
pub fn make_format_string(
    func_name: &str,
    args: &[&RuntimeArg],
) -> String {
    let count = |kind: ArgKind| args.iter().filter(|a| a.kind == kind).count();
    let (pos, opt, named_opt, named) = (
        count(ArgKind::Pos),
        count(ArgKind::Opt),
        count(ArgKind::NamedOpt),
        count(ArgKind::Named),
    );
    let mut format = "O".repeat(pos);
    if opt + named_opt + named > 0 {
        format.push('|');
        format.push_str(&"O".repeat(opt));
    }
    if named_opt + named > 0 {
        format.push('$');
        format.push_str(&"O".repeat(named_opt));
    }
    if named > 0 {
        format.push('@');
        format.push_str(&"O".repeat(named));
    }
    format.push(':');
    format.push_str(func_name);
    format
}

/// 除 `self` 外由解析器填充的参数
fn parsed_args(decl: &FuncDecl) -> &[RuntimeArg] {
    if decl.is_method() {
        decl.sig.args.get(1..).unwrap_or(&[])
    } else {
        &decl.sig.args
    }
}

fn obj_name(arg: &RuntimeArg) -> String {
    format!("obj_{}", sanitize_identifier(&arg.name))
}

fn arg_name(arg: &RuntimeArg) -> String {
    format!("arg_{}", sanitize_identifier(&arg.name))
}

/// 包装函数的 C 原型
pub fn wrapper_function_header(
    em: &mut Emitter<'_>,
    decl: &FuncDecl,
    convention: Convention,
) -> String {
    match convention {
        Convention::Fastcall => format!(
            "PyObject *{}(PyObject *self, PyObject *const *args, size_t nargs, PyObject *kwnames)",
            em.wrapper_function_name(decl)
        ),
        Convention::Legacy => format!(
            "PyObject *{}(PyObject *self, PyObject *args, PyObject *kw)",
            em.legacy_wrapper_function_name(decl)
        ),
    }
}

/// 生成一个包装函数
pub fn generate_wrapper_function(
    em: &mut Emitter<'_>,
    decl: &FuncDecl,
    line: i32,
    convention: Convention,
) -> CompileResult<()> {
    let header = wrapper_function_header(em, decl, convention);
    em.emit_line(format!("{} {{", header));

    let ordered = reorder_args(parsed_args(decl));
    let mut kwlist: Vec<String> = ordered.iter().map(|a| c_string(&a.name)).collect();
    kwlist.push("0".to_string());
    em.emit_line(format!("static const char * const kwlist[] = {{{}}};", kwlist.join(", ")));
    let format = make_format_string(&decl.name, &ordered);
    if convention == Convention::Fastcall {
        em.emit_line(format!("static CPyArg_Parser parser = {{{}, kwlist, 0}};", c_string(&format)));
    }
    for arg in &ordered {
        if arg.kind.is_optional() {
            em.emit_line(format!("PyObject *{} = NULL;", obj_name(arg)));
        } else {
            em.emit_line(format!("PyObject *{};", obj_name(arg)));
        }
    }
    let outputs: String = ordered.iter().map(|a| format!(", &{}", obj_name(a))).collect();
    match convention {
        Convention::Fastcall => em.emit_line(format!(
            "if (!CPyArg_ParseStackAndKeywordsSimple(args, nargs, kwnames, &parser{})) {{",
            outputs
        )),
        Convention::Legacy => em.emit_line(format!(
            "if (!CPyArg_ParseTupleAndKeywords(args, kw, {}, {}, kwlist{})) {{",
            c_string(&format),
            c_string(&decl.name),
            outputs
        )),
    }
    em.emit_line("return NULL;");
    em.emit_line("}");

    generate_wrapper_core(em, decl, line)?;
    em.emit_line("}");
    Ok(())
}

/// 参数检查、原生调用与返回值装箱；两种约定共用
pub fn generate_wrapper_core(
    em: &mut Emitter<'_>,
    decl: &FuncDecl,
    line: i32,
) -> CompileResult<()> {
    if decl.is_method() {
        if let Some(this) = decl.sig.args.first() {
            em.emit_line(format!("PyObject *{} = self;", obj_name(this)));
        }
    }
    let fail = ErrorHandler::Goto("fail".to_string());
    for arg in &decl.sig.args {
        generate_arg_check(em, arg, &fail)?;
    }

    let native_args: Vec<String> = decl.sig.args.iter().map(arg_name).collect();
    let native = em.native_function_name(decl);
    let ret_type = decl.sig.ret_type.clone();
    if ret_type.is_unboxed() {
        let ctype = em.ctype_spaced(&ret_type);
        em.emit_line(format!("{}retval = {}({});", ctype, native, native_args.join(", ")));
        em.emit_error_check("retval", &ret_type, "return NULL;")?;
        em.emit_box("retval", "retbox", &ret_type, true)?;
        em.emit_line("return retbox;");
    } else {
        em.emit_line(format!("return {}({});", native, native_args.join(", ")));
    }

    em.emit_label("fail");
    let path = em.ctx.source_path();
    let globals = em.globals_name();
    em.emit_line(format!(
        "CPy_AddTraceback({}, {}, {}, {});",
        c_string(&path),
        c_string(&decl.name),
        line,
        globals
    ));
    em.emit_line("return NULL;");
    Ok(())
}

/// 检查并转换一个参数；可选参数缺省时传错误值
fn generate_arg_check(
    em: &mut Emitter<'_>,
    arg: &RuntimeArg,
    fail: &ErrorHandler,
) -> CompileResult<()> {
    let (obj, dest) = (obj_name(arg), arg_name(arg));
    let optional = arg.kind.is_optional();
    if optional {
        let ctype = em.ctype_spaced(&arg.ty);
        let error = em.c_error_value(&arg.ty)?;
        em.emit_line(format!("{}{};", ctype, dest));
        em.emit_line(format!("if ({} == NULL) {{", obj));
        em.emit_line(format!("{} = {};", dest, error));
        em.emit_line("} else {");
    }
    if arg.ty.is_unboxed() {
        em.emit_unbox(&obj, &dest, &arg.ty, fail, !optional, true)?;
    } else {
        em.emit_cast(&obj, &dest, &arg.ty, fail, !optional, false)?;
    }
    if optional {
        em.emit_line("}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middle::types::RType;

    fn arg(
        name: &str,
        kind: ArgKind,
    ) -> RuntimeArg {
        RuntimeArg::new(name, RType::object(), kind)
    }

    #[test]
    fn test_format_string() {
        let args = [
            arg("a", ArgKind::Pos),
            arg("k", ArgKind::Named),
            arg("b", ArgKind::Opt),
            arg("c", ArgKind::NamedOpt),
        ];
        let ordered = reorder_args(&args);
        let names: Vec<&str> = ordered.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c", "k"]);
        assert_eq!(make_format_string("f", &ordered), "O|O$O@O:f");
    }

    #[test]
    fn test_format_string_positional_only() {
        let args = [arg("x", ArgKind::Pos), arg("y", ArgKind::Pos)];
        assert_eq!(make_format_string("g", &reorder_args(&args)), "OO:g");
        assert_eq!(make_format_string("h", &[]), ":h");
    }
}
