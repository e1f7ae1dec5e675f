//! 原生函数体生成
//!
//! 每个 IR 值对应一个 C 局部变量（`cpy_r_` 前缀），每个基本块对应一个标签。
//! 紧跟在当前块之后的跳转目标直接落入，不生成 `goto`。

use std::collections::HashMap;
use tracing::trace;

use super::emit::{c_escape_string, c_string, Emitter, ErrorHandler};
use super::names::{sanitize_identifier, LABEL_PREFIX, REG_PREFIX};
use crate::middle::error::{CompileError, CompileResult};
use crate::middle::ir::pprint::generate_names;
use crate::middle::ir::{AddressSource, BlockId, BranchOp, ErrorKind, FuncDecl, FuncIR, Op, ValueId, ValueKind};
use crate::middle::types::RType;

/// 原生函数的 C 原型（不含分号）
pub fn native_function_header(
    em: &mut Emitter<'_>,
    decl: &FuncDecl,
) -> String {
    let mut args = Vec::with_capacity(decl.sig.args.len());
    for arg in &decl.sig.args {
        let ctype = em.ctype_spaced(&arg.ty);
        args.push(format!("{}{}{}", ctype, REG_PREFIX, sanitize_identifier(&arg.name)));
    }
    let args = if args.is_empty() { "void".to_string() } else { args.join(", ") };
    let ret = em.ctype_spaced(&decl.sig.ret_type);
    format!("{}{}({})", ret, em.native_function_name(decl), args)
}

/// 生成一个函数的原生实现
pub fn generate_native_function(
    em: &mut Emitter<'_>,
    func: &FuncIR,
) -> CompileResult<()> {
    let header = native_function_header(em, &func.decl);
    em.emit_line(format!("{} {{", header));

    let display = generate_names(func);
    let mut c_names: HashMap<ValueId, String> = HashMap::new();
    for (&id, name) in &display {
        if !func.value(id).is_constant() {
            c_names.insert(id, format!("{}{}", REG_PREFIX, sanitize_identifier(name)));
        }
    }

    // 声明：参数以外的寄存器和所有非 void 的 op
    for (idx, value) in func.values.iter().enumerate() {
        let id = ValueId(idx as u32);
        let declared = match &value.kind {
            ValueKind::Register(reg) => !reg.is_arg,
            ValueKind::Op(_) => !value.is_void(),
            ValueKind::Integer(_) | ValueKind::CString(_) => false,
        };
        if declared {
            let ctype = em.ctype_spaced(&value.ty);
            em.emit_line(format!("{}{};", ctype, c_names[&id]));
        }
    }

    let labels: HashMap<BlockId, String> = func
        .layout
        .iter()
        .enumerate()
        .map(|(i, &b)| (b, format!("{}{}", LABEL_PREFIX, i)))
        .collect();

    let mut fe = FunctionEmitter {
        em,
        func,
        c_names,
        labels,
        next_block: None,
    };
    for (i, &block) in func.layout.iter().enumerate() {
        fe.next_block = func.layout.get(i + 1).copied();
        let label = fe.label(block);
        fe.em.emit_label(&label);
        for &op_id in &func.block(block).ops {
            fe.visit(op_id)?;
        }
    }
    fe.em.emit_line("}");
    trace!(func = %func.decl.fullname(), blocks = func.layout.len(), "native function");
    Ok(())
}

struct FunctionEmitter<'e, 'a> {
    em: &'e mut Emitter<'a>,
    func: &'e FuncIR,
    c_names: HashMap<ValueId, String>,
    labels: HashMap<BlockId, String>,
    next_block: Option<BlockId>,
}

impl FunctionEmitter<'_, '_> {
    fn label(
        &self,
        block: BlockId,
    ) -> String {
        self.labels
            .get(&block)
            .cloned()
            .unwrap_or_else(|| format!("{}_b{}", LABEL_PREFIX, block.0))
    }

    /// 值在 C 中的写法：常量内联，其余是局部变量
    fn reg(
        &self,
        id: ValueId,
    ) -> String {
        let value = self.func.value(id);
        match &value.kind {
            ValueKind::Integer(n) => c_integer(*n, &value.ty),
            ValueKind::CString(bytes) => format!("\"{}\"", c_escape_string(bytes)),
            ValueKind::Register(_) | ValueKind::Op(_) => self
                .c_names
                .get(&id)
                .cloned()
                .unwrap_or_else(|| format!("{}v{}", REG_PREFIX, id.0)),
        }
    }

    fn args(
        &self,
        ids: &[ValueId],
    ) -> String {
        ids.iter().map(|&v| self.reg(v)).collect::<Vec<_>>().join(", ")
    }

    fn emit_line<S: AsRef<str>>(
        &mut self,
        line: S,
    ) {
        self.em.emit_line(line);
    }

    /// 非借用的读取结果需要自己的引用
    fn emit_owned(
        &mut self,
        id: ValueId,
    ) {
        let value = self.func.value(id);
        if !value.is_borrowed() && value.ty.is_refcounted() {
            let ty = value.ty.clone();
            let dest = self.reg(id);
            self.em.emit_inc_ref(&dest, &ty);
        }
    }

    /// `dest = ` 或空串（void 结果）
    fn assign_prefix(
        &self,
        id: ValueId,
    ) -> String {
        if self.func.value(id).is_void() {
            String::new()
        } else {
            format!("{} = ", self.reg(id))
        }
    }

    fn emit_traceback(
        &mut self,
        entry: &(String, i32),
    ) {
        let path = self.em.ctx.source_path();
        let globals = self.em.globals_name();
        self.emit_line(format!(
            "CPy_AddTraceback({}, {}, {}, {});",
            c_string(&path),
            c_string(&entry.0),
            entry.1,
            globals
        ));
    }

    fn visit(
        &mut self,
        id: ValueId,
    ) -> CompileResult<()> {
        let func = self.func;
        let program = self.em.program;
        let Some(data) = func.value(id).as_op() else {
            return Ok(());
        };
        let line = func.value(id).line;
        if self.em.ctx.options.emit_line_directives && line > 0 {
            let path = self.em.ctx.source_path();
            self.emit_line(format!("#line {} {}", line, c_string(&path)));
        }
        let ty = func.value(id).ty.clone();
        let dest = self.reg(id);

        match &data.op {
            // ==================== 控制流 ====================
            Op::Goto { label } => {
                if Some(*label) != self.next_block {
                    let target = self.label(*label);
                    self.emit_line(format!("goto {};", target));
                }
            }
            Op::Branch {
                value,
                true_label,
                false_label,
                op,
                negated,
                rare,
                traceback_entry,
            } => {
                let (mut t, mut f, mut negated, mut rare) = (*true_label, *false_label, *negated, *rare);
                if Some(t) == self.next_block && traceback_entry.is_none() {
                    std::mem::swap(&mut t, &mut f);
                    negated = !negated;
                    rare = false;
                }
                let value_ty = func.ty(*value).clone();
                let value = self.reg(*value);
                let cond = match op {
                    BranchOp::Bool => format!("{}{}", if negated { "!" } else { "" }, value),
                    BranchOp::IsError => {
                        let compare = if negated { "!=" } else { "==" };
                        self.em.error_value_check(&value, &value_ty, compare)?
                    }
                };
                let cond = if rare { format!("unlikely({})", cond) } else { cond };
                let (t_label, f_label) = (self.label(t), self.label(f));
                match traceback_entry {
                    None if Some(f) == self.next_block => {
                        self.emit_line(format!("if ({}) goto {};", cond, t_label));
                    }
                    _ => {
                        self.emit_line(format!("if ({}) {{", cond));
                        if let Some(entry) = traceback_entry {
                            self.emit_traceback(entry);
                        }
                        self.emit_line(format!("goto {};", t_label));
                        if Some(f) == self.next_block {
                            self.emit_line("}");
                        } else {
                            self.emit_line("} else");
                            self.emit_line(format!("    goto {};", f_label));
                        }
                    }
                }
            }
            Op::Return { value } => {
                let value = self.reg(*value);
                self.emit_line(format!("return {};", value));
            }
            Op::Unreachable => self.emit_line("CPy_Unreachable();"),

            // ==================== 寄存器 ====================
            Op::Assign { dest: target, src } => {
                let (target, src) = (self.reg(*target), self.reg(*src));
                if target != src {
                    self.emit_line(format!("{} = {};", target, src));
                }
            }
            Op::LoadErrorValue { .. } => {
                let error = self.em.c_error_value(&ty)?;
                self.emit_line(format!("{} = {};", dest, error));
            }
            Op::LoadLiteral { value } => {
                let index = self.em.ctx.literals.index(value);
                self.emit_line(format!("{} = CPyStatics[{}];", dest, index));
                self.emit_owned(id);
            }

            // ==================== 对象 ====================
            Op::GetAttr { obj, attr, class } => {
                let cl = program.class(*class);
                if cl.is_trait {
                    return Err(CompileError::Codegen(format!(
                        "attribute `{}` read through trait {}",
                        attr,
                        cl.fullname()
                    )));
                }
                let struct_name = self.em.struct_name(*class);
                let obj = self.reg(*obj);
                let expr = format!("(({} *){})->{}", struct_name, obj, self.em.attr(attr));
                self.emit_line(format!("{} = {};", dest, expr));
                let owned = !data.is_borrowed && ty.is_refcounted();
                if data.error_kind == ErrorKind::Never {
                    if owned {
                        self.em.emit_inc_ref(&dest, &ty);
                    }
                } else {
                    let check = self.em.error_value_check(&dest, &ty, "==")?;
                    self.emit_line(format!("if (unlikely({})) {{", check));
                    let message = format!("attribute '{}' of '{}' undefined", attr, cl.name);
                    self.emit_line(format!("PyErr_SetString(PyExc_AttributeError, {});", c_string(&message)));
                    if owned {
                        self.emit_line("} else {");
                        self.em.emit_inc_ref(&dest, &ty);
                    }
                    self.emit_line("}");
                }
            }
            Op::SetAttr {
                obj,
                attr,
                src,
                class,
                is_init,
            } => {
                let cl = program.class(*class);
                if cl.is_trait {
                    return Err(CompileError::Codegen(format!(
                        "attribute `{}` written through trait {}",
                        attr,
                        cl.fullname()
                    )));
                }
                let attr_ty = program
                    .attr_type(*class, attr)
                    .cloned()
                    .ok_or_else(|| CompileError::Codegen(format!("{} has no attribute `{}`", cl.fullname(), attr)))?;
                let struct_name = self.em.struct_name(*class);
                let obj = self.reg(*obj);
                let expr = format!("(({} *){})->{}", struct_name, obj, self.em.attr(attr));
                if !*is_init && attr_ty.is_refcounted() {
                    // 释放旧值；可能未定义时先检查
                    if cl.is_always_defined(attr) {
                        self.em.emit_dec_ref(&expr, &attr_ty, false);
                    } else {
                        let check = self.em.error_value_check(&expr, &attr_ty, "!=")?;
                        self.emit_line(format!("if ({}) {{", check));
                        self.em.emit_dec_ref(&expr, &attr_ty, false);
                        self.emit_line("}");
                    }
                }
                let src = self.reg(*src);
                self.emit_line(format!("{} = {};", expr, src));
            }
            Op::LoadStatic {
                identifier,
                module_name,
                namespace,
            } => {
                let module = module_name.clone().unwrap_or_else(|| self.em.ctx.module_name.clone());
                let name = format!("{}{}", namespace.prefix(), self.em.ctx.names.private_name(&module, identifier));
                self.emit_line(format!("{} = {};", dest, name));
                self.emit_owned(id);
            }
            Op::InitStatic {
                value,
                identifier,
                module_name,
                namespace,
            } => {
                let module = module_name.clone().unwrap_or_else(|| self.em.ctx.module_name.clone());
                let name = format!("{}{}", namespace.prefix(), self.em.ctx.names.private_name(&module, identifier));
                let value = self.reg(*value);
                self.emit_line(format!("{} = {};", name, value));
            }
            Op::LoadGlobal { identifier } => {
                self.emit_line(format!("{} = {};", dest, identifier));
                self.emit_owned(id);
            }

            // ==================== 元组 ====================
            Op::TupleSet { items } => {
                if let RType::Tuple(t) = &ty {
                    self.em.declare_tuple_struct(t);
                }
                if items.is_empty() {
                    self.emit_line(format!("{}.empty_struct_error_flag = 0;", dest));
                }
                for (i, &item) in items.iter().enumerate() {
                    let item = self.reg(item);
                    self.emit_line(format!("{}.f{} = {};", dest, i, item));
                }
            }
            Op::TupleGet { src, index } => {
                let src = self.reg(*src);
                self.emit_line(format!("{} = {}.f{};", dest, src, index));
                self.emit_owned(id);
            }

            // ==================== 类型转换 ====================
            Op::Cast { src } => {
                let src = self.reg(*src);
                let incref = !data.is_borrowed;
                self.em.emit_cast(&src, &dest, &ty, &ErrorHandler::Assign, false, incref)?;
            }
            Op::Box { src } => {
                let src_ty = func.ty(*src).clone();
                let src = self.reg(*src);
                self.em.emit_box(&src, &dest, &src_ty, false)?;
            }
            Op::Unbox { src } => {
                let src = self.reg(*src);
                self.em.emit_unbox(&src, &dest, &ty, &ErrorHandler::Assign, false, false)?;
            }
            Op::Truncate { src } => {
                let ctype = self.em.ctype(&ty);
                let src = self.reg(*src);
                self.emit_line(format!("{} = ({}){};", dest, ctype, src));
            }
            Op::Extend { src, signed } => {
                let cast = int_cast(func.ty(*src), *signed);
                let src = self.reg(*src);
                self.emit_line(format!("{} = {}{};", dest, cast, src));
            }
            Op::Unborrow { src } => {
                let src = self.reg(*src);
                self.emit_line(format!("{} = {};", dest, src));
                self.emit_owned(id);
            }

            // ==================== 调用 ====================
            Op::Call { func, args } => {
                let callee = &program.func(*func).decl;
                let name = self.em.native_function_name(callee);
                let prefix = self.assign_prefix(id);
                let args = self.args(args);
                self.emit_line(format!("{}{}({});", prefix, name, args));
            }
            Op::MethodCall {
                obj,
                method,
                class,
                args,
            } => {
                let cl = program.class(*class);
                let (method_id, _) = program.get_method(*class, method).ok_or_else(|| {
                    CompileError::Codegen(format!("{} has no method `{}`", cl.fullname(), method))
                })?;
                let decl = &program.func(method_id).decl;
                let mut all_args = vec![*obj];
                all_args.extend(args.iter().copied());
                let call_args = self.args(&all_args);
                let prefix = self.assign_prefix(id);
                let exact = matches!(&cl.children, Some(c) if c.is_empty())
                    && !cl.allow_interpreted_subclasses
                    && !cl.is_trait;
                if exact {
                    let name = self.em.native_function_name(decl);
                    self.emit_line(format!("{}{}({});", prefix, name, call_args));
                } else {
                    let index = cl.vtable_index(method).ok_or_else(|| {
                        CompileError::Codegen(format!("method `{}` missing from vtable of {}", method, cl.fullname()))
                    })?;
                    let version = if cl.is_trait { "_TRAIT" } else { "" };
                    let mut arg_types = Vec::with_capacity(decl.sig.args.len());
                    for arg in &decl.sig.args {
                        arg_types.push(self.em.ctype(&arg.ty));
                    }
                    let ret = self.em.ctype(&decl.sig.ret_type);
                    let mtype = format!("{} (*)({})", ret, arg_types.join(", "));
                    let type_name = self.em.type_struct_name(*class);
                    let struct_name = self.em.struct_name(*class);
                    let obj = self.reg(*obj);
                    self.emit_line(format!(
                        "{}CPY_GET_METHOD{}({}, {}, {}, {}, {})({}); /* {} */",
                        prefix, version, obj, type_name, index, struct_name, mtype, call_args, method
                    ));
                }
            }
            Op::CallC {
                function_name, args, ..
            } => {
                let prefix = self.assign_prefix(id);
                let args = self.args(args);
                self.emit_line(format!("{}{}({});", prefix, function_name, args));
            }
            Op::PrimitiveOp {
                name,
                args,
                c_function_name,
                ..
            } => {
                let function_name = c_function_name
                    .clone()
                    .ok_or_else(|| CompileError::UnknownPrimitive(name.clone()))?;
                let prefix = self.assign_prefix(id);
                let args = self.args(args);
                self.emit_line(format!("{}{}({});", prefix, function_name, args));
            }
            Op::RaiseStandardError { class_name, message } => {
                match message {
                    Some(message) => self.emit_line(format!(
                        "PyErr_SetString(PyExc_{}, {});",
                        class_name,
                        c_string(message)
                    )),
                    None => self.emit_line(format!("PyErr_SetNone(PyExc_{});", class_name)),
                }
                if !ty.is_void() {
                    self.emit_line(format!("{} = 0;", dest));
                }
            }

            // ==================== 底层操作 ====================
            Op::IntOp { lhs, rhs, op } => {
                let (lhs, rhs) = (self.reg(*lhs), self.reg(*rhs));
                self.emit_line(format!("{} = {} {} {};", dest, lhs, op.symbol(), rhs));
            }
            Op::ComparisonOp { lhs, rhs, op } => {
                let cast = if op.is_signed() {
                    "(Py_ssize_t)"
                } else if op.is_unsigned() {
                    "(size_t)"
                } else {
                    ""
                };
                let (lhs, rhs) = (self.reg(*lhs), self.reg(*rhs));
                self.emit_line(format!("{} = {}{} {} {}{};", dest, cast, lhs, op.symbol(), cast, rhs));
            }
            Op::LoadMem { src } => {
                let ctype = self.em.ctype(&ty);
                let src = self.reg(*src);
                self.emit_line(format!("{} = *({} *){};", dest, ctype, src));
                self.emit_owned(id);
            }
            Op::SetMem {
                dest_type,
                dest: ptr,
                src,
            } => {
                let ctype = self.em.ctype(dest_type);
                let (ptr, src) = (self.reg(*ptr), self.reg(*src));
                self.emit_line(format!("*({} *){} = {};", ctype, ptr, src));
            }
            Op::GetElementPtr { src, src_type, field } => {
                let src = self.reg(*src);
                self.emit_line(format!("{} = (CPyPtr)&(({} *){})->{};", dest, src_type.name, src, field));
            }
            Op::LoadAddress { src } => {
                let target = match src {
                    AddressSource::Symbol(symbol) => symbol.clone(),
                    AddressSource::Register(reg) => self.reg(*reg),
                };
                self.emit_line(format!("{} = (CPyPtr)&{};", dest, target));
            }
            Op::KeepAlive { .. } => {}

            // ==================== 引用计数 ====================
            Op::IncRef { src } => {
                let src_ty = func.ty(*src).clone();
                let src = self.reg(*src);
                self.em.emit_inc_ref(&src, &src_ty);
            }
            Op::DecRef { src, is_xdec } => {
                let src_ty = func.ty(*src).clone();
                let src = self.reg(*src);
                self.em.emit_dec_ref(&src, &src_ty, *is_xdec);
            }
        }
        Ok(())
    }
}

/// 整数常量；带标记整数以移位后的形式存储
fn c_integer(
    value: i64,
    ty: &RType,
) -> String {
    let value = if ty.is_tagged() { value as i128 * 2 } else { value as i128 };
    if value >= 1 << 31 || value < -(1 << 31) {
        format!("{}LL", value)
    } else {
        value.to_string()
    }
}

/// 扩展时源值的显式转换
fn int_cast(
    src: &RType,
    signed: bool,
) -> &'static str {
    match (src.size(), signed) {
        (1, true) => "(int8_t)",
        (1, false) => "(uint8_t)",
        (4, true) => "(int32_t)",
        (4, false) => "(uint32_t)",
        (_, true) => "(int64_t)",
        (_, false) => "(uint64_t)",
    }
}
