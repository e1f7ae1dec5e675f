//! C 文本发射器
//!
//! `Emitter` 按行累积 C 代码并自动维护缩进：以 `{` 结尾的行之后缩进一级，
//! 以 `}` 开头的行先回退一级。装箱、拆箱、类型检查与引用计数的代码片段
//! 也在这里生成，函数体、类和包装函数的生成器共用它们。
//!
//! 一个模块的所有发射器共享同一个 [`EmitterContext`]：名称表、字面量表以及
//! 用到的元组结构体都记录在里面，模块组装阶段再统一输出。

use indexmap::IndexMap;

use super::names::{NameGenerator, ATTR_PREFIX, NATIVE_PREFIX, PREFIX, STATIC_PREFIX, TYPE_PREFIX};
use crate::middle::error::{CompileError, CompileResult};
use crate::middle::ir::{ClassId, FuncDecl, Literal, Program};
use crate::middle::types::{Prim, RTuple, RType};
use crate::util::config::{CompilerOptions, WrapperConvention};

/// 旧调用约定包装函数在同时生成两种约定时使用的前缀
pub const LEGACY_PREFIX: &str = "CPyPyL_";

/// 把字节串转义成 C 字符串字面量的内容
pub fn c_escape_string(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        match b {
            b'\\' => out.push_str("\\\\"),
            b'"' => out.push_str("\\\""),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            // 避免 `??x` 三字符序列
            b'?' => out.push_str("\\?"),
            0x20..=0x7E => out.push(b as char),
            _ => out.push_str(&format!("\\{:03o}", b)),
        }
    }
    out
}

/// 带引号的 C 字符串字面量
pub fn c_string(text: &str) -> String {
    format!("\"{}\"", c_escape_string(text.as_bytes()))
}

/// 模块级字面量表（`CPyStatics[]`）
#[derive(Debug, Clone, Default)]
pub struct Literals {
    table: IndexMap<Literal, usize>,
}

impl Literals {
    /// 字面量在表中的下标，第一次出现时分配
    pub fn index(
        &mut self,
        literal: &Literal,
    ) -> usize {
        let next = self.table.len();
        *self.table.entry(literal.clone()).or_insert(next)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Literal, usize)> {
        self.table.iter().map(|(lit, &idx)| (lit, idx))
    }
}

/// 一个模块代码生成期间共享的状态
#[derive(Debug, Clone)]
pub struct EmitterContext {
    pub names: NameGenerator,
    pub literals: Literals,
    /// 已经使用的元组结构体，内层先于外层
    pub tuple_structs: IndexMap<String, RTuple>,
    pub module_name: String,
    pub options: CompilerOptions,
}

impl EmitterContext {
    pub fn new(
        module_name: &str,
        names: NameGenerator,
        options: &CompilerOptions,
    ) -> Self {
        EmitterContext {
            names,
            literals: Literals::default(),
            tuple_structs: IndexMap::new(),
            module_name: module_name.to_string(),
            options: options.clone(),
        }
    }

    /// 源文件路径，用于 traceback 与 `#line`
    pub fn source_path(&self) -> String {
        format!("{}.py", self.module_name.replace('.', "/"))
    }
}

/// 类型检查或拆箱失败时的去向
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorHandler {
    /// 跳转到标签
    Goto(String),
    /// 直接返回给定值
    Return(String),
    /// 把目标赋为错误值，由后续的 IS_ERROR 分支处理
    Assign,
}

pub struct Emitter<'a> {
    pub ctx: &'a mut EmitterContext,
    pub program: &'a Program,
    lines: Vec<String>,
    indent: usize,
    temp_counter: usize,
}

impl<'a> Emitter<'a> {
    pub fn new(
        ctx: &'a mut EmitterContext,
        program: &'a Program,
    ) -> Self {
        Emitter {
            ctx,
            program,
            lines: Vec::new(),
            indent: 0,
            temp_counter: 0,
        }
    }

    // ==================== 行 ====================

    pub fn emit_line<S: AsRef<str>>(
        &mut self,
        line: S,
    ) {
        let line = line.as_ref();
        if line.is_empty() {
            self.lines.push(String::new());
            return;
        }
        if line.starts_with('}') {
            self.indent = self.indent.saturating_sub(4);
        }
        self.lines.push(format!("{}{}", " ".repeat(self.indent), line));
        if line.ends_with('{') {
            self.indent += 4;
        }
    }

    pub fn emit_lines<I, S>(
        &mut self,
        lines: I,
    ) where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for line in lines {
            self.emit_line(line);
        }
    }

    /// 标签后接空语句，保证标签后总有一条语句
    pub fn emit_label(
        &mut self,
        label: &str,
    ) {
        self.emit_line(format!("{}: ;", label));
    }

    pub fn temp_name(&mut self) -> String {
        self.temp_counter += 1;
        format!("__tmp{}", self.temp_counter)
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn into_lines(self) -> Vec<String> {
        self.lines
    }

    // ==================== 名称 ====================

    /// 类的名称前缀，例如 `Point`
    pub fn class_prefix(
        &mut self,
        class: ClassId,
    ) -> String {
        let cl = self.program.class(class);
        self.ctx.names.private_name(&cl.module_name, &cl.name)
    }

    /// 对象结构体名
    pub fn struct_name(
        &mut self,
        class: ClassId,
    ) -> String {
        format!("{}Object", self.class_prefix(class))
    }

    /// 类型对象变量名
    pub fn type_struct_name(
        &mut self,
        class: ClassId,
    ) -> String {
        format!("{}{}", TYPE_PREFIX, self.class_prefix(class))
    }

    pub fn vtable_name(
        &mut self,
        class: ClassId,
    ) -> String {
        format!("{}_vtable", self.class_prefix(class))
    }

    pub fn native_function_name(
        &mut self,
        decl: &FuncDecl,
    ) -> String {
        format!("{}{}", NATIVE_PREFIX, self.ctx.names.private_name(&decl.module_name, &decl.shortname()))
    }

    /// 快速调用约定（或仅有的一种约定）的包装函数名
    pub fn wrapper_function_name(
        &mut self,
        decl: &FuncDecl,
    ) -> String {
        format!("{}{}", PREFIX, self.ctx.names.private_name(&decl.module_name, &decl.shortname()))
    }

    /// 旧调用约定的包装函数名
    pub fn legacy_wrapper_function_name(
        &mut self,
        decl: &FuncDecl,
    ) -> String {
        let prefix = match self.ctx.options.wrapper_convention {
            WrapperConvention::Legacy => PREFIX,
            WrapperConvention::Fastcall | WrapperConvention::Both => LEGACY_PREFIX,
        };
        format!("{}{}", prefix, self.ctx.names.private_name(&decl.module_name, &decl.shortname()))
    }

    /// 模块级静态变量名
    pub fn static_name(
        &mut self,
        id: &str,
        module: &str,
    ) -> String {
        format!("{}{}", STATIC_PREFIX, self.ctx.names.private_name(module, id))
    }

    /// 当前模块的 globals 字典
    pub fn globals_name(&mut self) -> String {
        let module = self.ctx.module_name.clone();
        self.static_name("globals", &module)
    }

    pub fn attr(
        &self,
        name: &str,
    ) -> String {
        format!("{}{}", ATTR_PREFIX, super::names::sanitize_identifier(name))
    }

    // ==================== 类型 ====================

    /// 值的 C 类型；用到的元组结构体会被登记
    pub fn ctype(
        &mut self,
        ty: &RType,
    ) -> String {
        if let RType::Tuple(t) = ty {
            self.declare_tuple_struct(t);
        }
        ty.c_type()
    }

    /// 便于拼接声明：指针类型不加空格
    pub fn ctype_spaced(
        &mut self,
        ty: &RType,
    ) -> String {
        let ctype = self.ctype(ty);
        if ctype.ends_with('*') {
            ctype
        } else {
            format!("{} ", ctype)
        }
    }

    pub fn declare_tuple_struct(
        &mut self,
        tuple: &RTuple,
    ) {
        let name = tuple.struct_name();
        if self.ctx.tuple_structs.contains_key(&name) {
            return;
        }
        for item in &tuple.types {
            if let RType::Tuple(inner) = item {
                self.declare_tuple_struct(inner);
            }
        }
        self.ctx.tuple_structs.insert(name, tuple.clone());
    }

    /// 错误值的初始化器形式（元组为花括号列表）
    pub fn c_initializer_undefined_value(
        &mut self,
        ty: &RType,
    ) -> CompileResult<String> {
        match ty {
            RType::Tuple(t) if t.types.is_empty() => Ok("{ 1 }".to_string()),
            RType::Tuple(t) => {
                let items = t
                    .types
                    .iter()
                    .map(|item| self.c_initializer_undefined_value(item))
                    .collect::<CompileResult<Vec<_>>>()?;
                Ok(format!("{{ {} }}", items.join(", ")))
            }
            other => other
                .c_undefined()
                .map(str::to_string)
                .ok_or_else(|| CompileError::Codegen(format!("type {} has no error value", other))),
        }
    }

    /// 可以出现在表达式中的错误值
    pub fn c_error_value(
        &mut self,
        ty: &RType,
    ) -> CompileResult<String> {
        match ty {
            RType::Tuple(_) => {
                let ctype = self.ctype(ty);
                Ok(format!("({}) {}", ctype, self.c_initializer_undefined_value(ty)?))
            }
            _ => self.c_initializer_undefined_value(ty),
        }
    }

    /// 判断 `value` 是否（不）等于错误值的条件
    pub fn error_value_check(
        &mut self,
        value: &str,
        ty: &RType,
        compare: &str,
    ) -> CompileResult<String> {
        match ty {
            RType::Tuple(t) => self.tuple_undefined_check_cond(t, value, compare),
            _ => Ok(format!("{} {} {}", value, compare, self.c_error_value(ty)?)),
        }
    }

    /// 元组只看第一个分量（空元组看错误标志）
    pub fn tuple_undefined_check_cond(
        &mut self,
        tuple: &RTuple,
        expr: &str,
        compare: &str,
    ) -> CompileResult<String> {
        match tuple.types.first() {
            None => {
                let flag = format!("{}.empty_struct_error_flag", expr);
                Ok(if compare == "==" { flag } else { format!("!{}", flag) })
            }
            Some(RType::Tuple(inner)) => self.tuple_undefined_check_cond(inner, &format!("{}.f0", expr), compare),
            Some(item) => {
                let undefined = self.c_error_value(item)?;
                Ok(format!("{}.f0 {} {}", expr, compare, undefined))
            }
        }
    }

    pub fn emit_error_check(
        &mut self,
        value: &str,
        ty: &RType,
        failure: &str,
    ) -> CompileResult<()> {
        let cond = self.error_value_check(value, ty, "==")?;
        self.emit_line(format!("if ({}) {{", cond));
        self.emit_line(failure);
        self.emit_line("}");
        Ok(())
    }

    /// 失败分支的语句
    fn failure_lines(
        &mut self,
        handler: &ErrorHandler,
        dest: &str,
        ty: &RType,
    ) -> CompileResult<Vec<String>> {
        Ok(match handler {
            ErrorHandler::Goto(label) => vec![format!("goto {};", label)],
            ErrorHandler::Return(value) => vec![format!("return {};", value)],
            ErrorHandler::Assign => vec![format!("{} = {};", dest, self.c_error_value(ty)?)],
        })
    }

    // ==================== 引用计数 ====================

    pub fn emit_inc_ref(
        &mut self,
        dest: &str,
        ty: &RType,
    ) {
        match ty {
            _ if ty.is_tagged() => {
                if ty.is_refcounted() {
                    self.emit_line(format!("CPyTagged_INCREF({});", dest));
                }
            }
            RType::Tuple(t) => {
                for (i, item) in t.types.iter().enumerate() {
                    self.emit_inc_ref(&format!("{}.f{}", dest, i), item);
                }
            }
            _ if ty.is_refcounted() => self.emit_line(format!("CPy_INCREF({});", dest)),
            _ => {}
        }
    }

    pub fn emit_dec_ref(
        &mut self,
        dest: &str,
        ty: &RType,
        is_xdec: bool,
    ) {
        let x = if is_xdec { "X" } else { "" };
        match ty {
            _ if ty.is_tagged() => {
                if ty.is_refcounted() {
                    self.emit_line(format!("CPyTagged_{}DECREF({});", x, dest));
                }
            }
            RType::Tuple(t) => {
                for (i, item) in t.types.iter().enumerate() {
                    self.emit_dec_ref(&format!("{}.f{}", dest, i), item, is_xdec);
                }
            }
            _ if ty.is_refcounted() => self.emit_line(format!("CPy_{}DECREF({});", x, dest)),
            _ => {}
        }
    }

    // ==================== 类型检查与转换 ====================

    /// 对象 `src` 属于 `ty` 的装箱形式的条件；`None` 表示总是成立
    pub fn type_check_cond(
        &mut self,
        src: &str,
        ty: &RType,
    ) -> CompileResult<Option<String>> {
        let cond = match ty {
            RType::Primitive(p) => match p {
                Prim::Object => return Ok(None),
                Prim::Int | Prim::ShortInt | Prim::CSsizeT | Prim::CInt => format!("PyLong_Check({})", src),
                Prim::Bool | Prim::Bit => format!("PyBool_Check({})", src),
                Prim::None => format!("{} == Py_None", src),
                Prim::Str => format!("PyUnicode_Check({})", src),
                Prim::Float => format!("CPyFloat_Check({})", src),
                Prim::List => format!("PyList_Check({})", src),
                Prim::Dict => format!("PyDict_Check({})", src),
                Prim::Tuple => format!("PyTuple_Check({})", src),
                Prim::Set => format!("PySet_Check({})", src),
                Prim::CPointer => {
                    return Err(CompileError::Codegen("pointers have no boxed form".to_string()));
                }
            },
            RType::Instance(inst) => {
                let cl = self.program.class(inst.class);
                let exact = matches!(&cl.children, Some(c) if c.is_empty())
                    && !cl.allow_interpreted_subclasses
                    && !cl.is_trait;
                let type_name = self.type_struct_name(inst.class);
                if exact {
                    format!("Py_TYPE({}) == {}", src, type_name)
                } else {
                    format!("PyObject_TypeCheck({}, {})", src, type_name)
                }
            }
            RType::Union(u) => {
                let mut conds = Vec::with_capacity(u.items.len());
                for item in &u.items {
                    match self.type_check_cond(src, item)? {
                        Some(c) => conds.push(format!("({})", c)),
                        None => return Ok(None),
                    }
                }
                conds.join(" || ")
            }
            RType::Tuple(t) => format!("PyTuple_Check({}) && PyTuple_GET_SIZE({}) == {}", src, src, t.types.len()),
            RType::Struct(_) | RType::Void => {
                return Err(CompileError::Codegen(format!("cannot type check against {}", ty)));
            }
        };
        Ok(Some(cond))
    }

    /// 检查 `src` 的类型后复制到 `dest`；`incref` 为真时成功分支获取新引用
    pub fn emit_cast(
        &mut self,
        src: &str,
        dest: &str,
        ty: &RType,
        handler: &ErrorHandler,
        declare_dest: bool,
        incref: bool,
    ) -> CompileResult<()> {
        if ty.is_unboxed() {
            return Err(CompileError::Codegen(format!("cast to unboxed type {}", ty)));
        }
        if declare_dest {
            self.emit_line(format!("PyObject *{};", dest));
        }
        match self.type_check_cond(src, ty)? {
            None => {
                self.emit_line(format!("{} = {};", dest, src));
                if incref {
                    self.emit_line(format!("CPy_INCREF({});", dest));
                }
            }
            Some(cond) => {
                let failure = self.failure_lines(handler, dest, ty)?;
                self.emit_line(format!("if (likely({})) {{", cond));
                self.emit_line(format!("{} = {};", dest, src));
                if incref {
                    self.emit_line(format!("CPy_INCREF({});", dest));
                }
                self.emit_line("} else {");
                self.emit_line(format!("CPy_TypeError({}, {});", c_string(&ty.to_string()), src));
                self.emit_lines(failure);
                self.emit_line("}");
            }
        }
        Ok(())
    }

    /// 把对象 `src` 拆箱成 `ty` 的 C 表示
    ///
    /// `borrow` 为真时不获取新引用（包装函数的参数在调用期间由调用方持有）。
    pub fn emit_unbox(
        &mut self,
        src: &str,
        dest: &str,
        ty: &RType,
        handler: &ErrorHandler,
        declare_dest: bool,
        borrow: bool,
    ) -> CompileResult<()> {
        if declare_dest {
            let ctype = self.ctype_spaced(ty);
            self.emit_line(format!("{}{};", ctype, dest));
        }
        let failure = self.failure_lines(handler, dest, ty)?;
        let type_error = format!("CPy_TypeError({}, {});", c_string(&ty.to_string()), src);
        match ty {
            RType::Primitive(Prim::Int | Prim::ShortInt) => {
                let conv = if borrow { "CPyTagged_BorrowFromObject" } else { "CPyTagged_FromObject" };
                self.emit_line(format!("if (likely(PyLong_Check({})))", src));
                self.emit_line(format!("    {} = {}({});", dest, conv, src));
                self.emit_line("else {");
                self.emit_line(type_error);
                self.emit_lines(failure);
                self.emit_line("}");
            }
            RType::Primitive(Prim::Bool | Prim::Bit) => {
                self.emit_line(format!("if (unlikely(!PyBool_Check({}))) {{", src));
                self.emit_line(type_error);
                self.emit_lines(failure);
                self.emit_line("} else");
                self.emit_line(format!("    {} = {} == Py_True;", dest, src));
            }
            RType::Primitive(Prim::None) => {
                self.emit_line(format!("if (unlikely({} != Py_None)) {{", src));
                self.emit_line(type_error);
                self.emit_lines(failure);
                self.emit_line("} else");
                self.emit_line(format!("    {} = 1;", dest));
            }
            RType::Primitive(p @ (Prim::CSsizeT | Prim::CInt)) => {
                let conv = if *p == Prim::CSsizeT { "PyLong_AsSsize_t" } else { "(int)PyLong_AsLong" };
                self.emit_line(format!("if (likely(PyLong_Check({})))", src));
                self.emit_line(format!("    {} = {}({});", dest, conv, src));
                self.emit_line("else {");
                self.emit_line(type_error);
                self.emit_lines(failure);
                self.emit_line("}");
            }
            RType::Tuple(t) => self.emit_tuple_unbox(src, dest, t, handler, borrow)?,
            other => {
                return Err(CompileError::Codegen(format!("cannot unbox to {}", other)));
            }
        }
        Ok(())
    }

    fn emit_tuple_unbox(
        &mut self,
        src: &str,
        dest: &str,
        tuple: &RTuple,
        handler: &ErrorHandler,
        borrow: bool,
    ) -> CompileResult<()> {
        let ty = RType::Tuple(tuple.clone());
        self.declare_tuple_struct(tuple);
        // 赋错误值的处理方式需要在分量失败后跳过剩余分量
        let done = match handler {
            ErrorHandler::Assign => Some(format!("{}_done", self.temp_name())),
            _ => None,
        };
        let item_handler = match &done {
            Some(label) => ErrorHandler::Goto(format!("{}_fail", label)),
            None => handler.clone(),
        };
        let cond = self.type_check_cond(src, &ty)?.unwrap_or_else(|| "1".to_string());
        let failure = self.failure_lines(&item_handler, dest, &ty)?;
        self.emit_line(format!("if (unlikely(!({}))) {{", cond));
        self.emit_line(format!("CPy_TypeError({}, {});", c_string(&ty.to_string()), src));
        self.emit_lines(failure);
        self.emit_line("} else {");
        if tuple.types.is_empty() {
            self.emit_line(format!("{}.empty_struct_error_flag = 0;", dest));
        }
        for (i, item) in tuple.types.iter().enumerate() {
            let temp = self.temp_name();
            self.emit_line(format!("PyObject *{} = PyTuple_GET_ITEM({}, {});", temp, src, i));
            let temp2 = self.temp_name();
            if item.is_unboxed() {
                self.emit_unbox(&temp, &temp2, item, &item_handler, true, borrow)?;
            } else {
                self.emit_cast(&temp, &temp2, item, &item_handler, true, !borrow)?;
            }
            self.emit_line(format!("{}.f{} = {};", dest, i, temp2));
        }
        self.emit_line("}");
        if let Some(label) = done {
            let error = self.c_error_value(&ty)?;
            self.emit_line(format!("goto {};", label));
            self.emit_label(&format!("{}_fail", label));
            self.emit_line(format!("{} = {};", dest, error));
            self.emit_label(&label);
        }
        Ok(())
    }

    /// 把 `ty` 类型的 C 值 `src` 装箱成对象；转移 `src` 持有的引用
    pub fn emit_box(
        &mut self,
        src: &str,
        dest: &str,
        ty: &RType,
        declare_dest: bool,
    ) -> CompileResult<()> {
        let declaration = if declare_dest { "PyObject *" } else { "" };
        match ty {
            RType::Primitive(Prim::Int | Prim::ShortInt) => {
                self.emit_line(format!("{}{} = CPyTagged_StealAsObject({});", declaration, dest, src));
            }
            RType::Primitive(Prim::Bool | Prim::Bit) => {
                self.emit_line(format!("{}{} = {} ? Py_True : Py_False;", declaration, dest, src));
                self.emit_line(format!("CPy_INCREF({});", dest));
            }
            RType::Primitive(Prim::None) => {
                self.emit_line(format!("{}{} = Py_None;", declaration, dest));
                self.emit_line(format!("CPy_INCREF({});", dest));
            }
            RType::Primitive(Prim::CSsizeT) => {
                self.emit_line(format!("{}{} = PyLong_FromSsize_t({});", declaration, dest, src));
            }
            RType::Primitive(Prim::CInt) => {
                self.emit_line(format!("{}{} = PyLong_FromLong({});", declaration, dest, src));
            }
            RType::Primitive(Prim::CPointer) | RType::Struct(_) | RType::Void => {
                return Err(CompileError::Codegen(format!("cannot box {}", ty)));
            }
            RType::Tuple(t) => {
                self.declare_tuple_struct(t);
                self.emit_line(format!("{}{} = PyTuple_New({});", declaration, dest, t.types.len()));
                self.emit_line(format!("if (unlikely({} == NULL))", dest));
                self.emit_line("    CPyError_OutOfMemory();");
                for (i, item) in t.types.iter().enumerate() {
                    let inner = if item.is_unboxed() {
                        let temp = self.temp_name();
                        let ctype = self.ctype_spaced(item);
                        self.emit_line(format!("{}{} = {}.f{};", ctype, temp, src, i));
                        let boxed = self.temp_name();
                        self.emit_box(&temp, &boxed, item, true)?;
                        boxed
                    } else {
                        format!("{}.f{}", src, i)
                    };
                    self.emit_line(format!("PyTuple_SET_ITEM({}, {}, {});", dest, i, inner));
                }
            }
            // 已经是对象
            _ => self.emit_line(format!("{}{} = {};", declaration, dest, src)),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> EmitterContext {
        EmitterContext::new(
            "m",
            NameGenerator::new(&["m".to_string()], ""),
            &CompilerOptions::default(),
        )
    }

    #[test]
    fn test_indentation() {
        let program = Program::new();
        let mut ctx = context();
        let mut em = Emitter::new(&mut ctx, &program);
        em.emit_line("int f(void) {");
        em.emit_line("return 0;");
        em.emit_line("}");
        assert_eq!(em.lines(), &["int f(void) {", "    return 0;", "}"]);
    }

    #[test]
    fn test_escape() {
        assert_eq!(c_escape_string(b"a\"b\\\n\x01"), "a\\\"b\\\\\\n\\001");
        assert_eq!(c_string("x"), "\"x\"");
    }

    #[test]
    fn test_ref_counting_lines() {
        let program = Program::new();
        let mut ctx = context();
        let mut em = Emitter::new(&mut ctx, &program);
        em.emit_inc_ref("a", &RType::int());
        em.emit_inc_ref("b", &RType::short_int());
        em.emit_dec_ref("c", &RType::str(), true);
        em.emit_dec_ref("t", &RType::tuple(vec![RType::str(), RType::bool(), RType::int()]), false);
        assert_eq!(
            em.lines(),
            &[
                "CPyTagged_INCREF(a);",
                "CPy_XDECREF(c);",
                "CPy_DECREF(t.f0);",
                "CPyTagged_DECREF(t.f2);",
            ]
        );
    }

    #[test]
    fn test_tuple_error_values() {
        let program = Program::new();
        let mut ctx = context();
        let mut em = Emitter::new(&mut ctx, &program);
        let inner = RType::tuple(vec![RType::bool(), RType::str()]);
        let outer = RType::tuple(vec![inner.clone(), RType::int()]);
        assert_eq!(em.c_error_value(&outer).unwrap(), "(tuple_T2T2COI) { { 2, NULL }, CPY_INT_TAG }");
        assert_eq!(em.error_value_check("v", &outer, "==").unwrap(), "v.f0.f0 == 2");
        // 内层结构体先登记
        let declared: Vec<&String> = ctx.tuple_structs.keys().collect();
        assert_eq!(declared, vec!["tuple_T2CO", "tuple_T2T2COI"]);
    }

    #[test]
    fn test_unbox_int_borrowed() {
        let program = Program::new();
        let mut ctx = context();
        let mut em = Emitter::new(&mut ctx, &program);
        em.emit_unbox("obj_x", "arg_x", &RType::int(), &ErrorHandler::Goto("fail".into()), true, true)
            .unwrap();
        assert_eq!(
            em.lines(),
            &[
                "CPyTagged arg_x;",
                "if (likely(PyLong_Check(obj_x)))",
                "    arg_x = CPyTagged_BorrowFromObject(obj_x);",
                "else {",
                "    CPy_TypeError(\"int\", obj_x);",
                "    goto fail;",
                "}",
            ]
        );
    }

    #[test]
    fn test_cast_union_with_object_is_unchecked() {
        let program = Program::new();
        let mut ctx = context();
        let mut em = Emitter::new(&mut ctx, &program);
        let ty = RType::union(vec![RType::str(), RType::object()]);
        em.emit_cast("a", "b", &ty, &ErrorHandler::Assign, false, false).unwrap();
        assert_eq!(em.lines(), &["b = a;"]);
        assert!(em.emit_cast("a", "b", &RType::int(), &ErrorHandler::Assign, false, false).is_err());
    }

    #[test]
    fn test_literal_table_dedups() {
        let mut literals = Literals::default();
        let a = literals.index(&Literal::Str("a".into()));
        let b = literals.index(&Literal::Int("12345678901234567890".into()));
        assert_eq!(literals.index(&Literal::Str("a".into())), a);
        assert_eq!((a, b, literals.len()), (0, 1, 2));
    }
}
