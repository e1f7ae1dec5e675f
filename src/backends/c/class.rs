//! 原生类的 C 产物
//!
//! 每个类生成：
//!
//! - 对象结构体：对象头、vtable 指针、先继承后自有的属性
//! - vtable 数组与填充函数；trait vtable 放在主 vtable 之前，每个 trait 占三项
//!   （类型、trait vtable、属性偏移表），对象持有的指针指向主 vtable 的第一项
//! - setup（分配并把属性置为未定义）、构造函数与 `tp_new`
//! - dealloc / traverse / clear
//! - 属性的 getter / setter
//! - 方法表与类型模板
//!
//! 类型对象本身在模块初始化时由模板创建。

use tracing::trace;

use super::emit::{c_string, Emitter, ErrorHandler};
use super::names::NATIVE_PREFIX;
use super::wrapper::Convention;
use crate::middle::error::{CompileError, CompileResult};
use crate::middle::ir::{ClassId, FuncDecl, FuncId, VTableEntry};
use crate::middle::types::RType;

/// 结构体定义，带防重复定义的宏保护
pub fn generate_object_struct(
    em: &mut Emitter<'_>,
    class: ClassId,
) -> CompileResult<()> {
    let struct_name = em.struct_name(class);
    let guard = format!("MYPYC_DECLARED_{}", struct_name);
    let attributes = em.program.all_attributes(class);
    em.emit_line(format!("#ifndef {}", guard));
    em.emit_line(format!("#define {}", guard));
    em.emit_line("typedef struct {");
    em.emit_line("PyObject_HEAD");
    em.emit_line("CPyVTableItem *vtable;");
    for (name, ty) in &attributes {
        let ctype = em.ctype_spaced(ty);
        let field = em.attr(name);
        em.emit_line(format!("{}{};", ctype, field));
    }
    em.emit_line(format!("}} {};", struct_name));
    em.emit_line("#endif");
    Ok(())
}

/// 类可以被实例化
pub fn is_instantiable(
    em: &Emitter<'_>,
    class: ClassId,
) -> bool {
    let program = em.program;
    let cl = program.class(class);
    !cl.is_trait && !cl.is_abstract
}

/// 构造函数的原生签名来自 `__init__`（去掉 self）
fn init_decl(
    em: &Emitter<'_>,
    class: ClassId,
) -> Option<(FuncId, FuncDecl)> {
    let (init, _) = em.program.get_method(class, "__init__")?;
    Some((init, em.program.func(init).decl.clone()))
}

/// 构造函数的 C 原型
pub fn constructor_header(
    em: &mut Emitter<'_>,
    class: ClassId,
) -> String {
    let prefix = em.class_prefix(class);
    let mut args = Vec::new();
    if let Some((_, decl)) = init_decl(em, class) {
        for arg in decl.sig.args.iter().skip(1) {
            let ctype = em.ctype_spaced(&arg.ty);
            args.push(format!("{}cpy_r_{}", ctype, super::names::sanitize_identifier(&arg.name)));
        }
    }
    let args = if args.is_empty() { "void".to_string() } else { args.join(", ") };
    format!("PyObject *{}{}({})", NATIVE_PREFIX, prefix, args)
}

/// 一个类的全部定义
pub fn generate_class(
    em: &mut Emitter<'_>,
    class: ClassId,
) -> CompileResult<()> {
    let program = em.program;
    let cl = program.class(class);
    if cl.inherits_python {
        return Err(CompileError::InvalidClass {
            class: cl.fullname(),
            message: "native classes cannot inherit from interpreted classes".to_string(),
        });
    }
    if cl.is_trait {
        generate_methods_table(em, class)?;
        generate_type_template(em, class)?;
        return Ok(());
    }
    if cl.vtable.is_none() {
        return Err(CompileError::InvalidClass {
            class: cl.fullname(),
            message: "vtable has not been computed".to_string(),
        });
    }

    generate_vtables(em, class)?;
    em.emit_line("");
    generate_setup(em, class)?;
    em.emit_line("");
    if is_instantiable(em, class) {
        generate_constructor(em, class)?;
        em.emit_line("");
    }
    generate_new(em, class);
    em.emit_line("");
    generate_traverse(em, class);
    em.emit_line("");
    generate_clear(em, class);
    em.emit_line("");
    generate_dealloc(em, class);
    em.emit_line("");
    generate_getseters(em, class)?;
    em.emit_line("");
    generate_methods_table(em, class)?;
    em.emit_line("");
    generate_type_template(em, class)?;
    trace!(class = %em.program.class(class).fullname(), "class artifacts");
    Ok(())
}

// ==================== vtable ====================

fn trait_vtable_name(
    em: &mut Emitter<'_>,
    class: ClassId,
    trait_id: ClassId,
) -> String {
    format!("{}_{}_trait_vtable", em.class_prefix(class), em.class_prefix(trait_id))
}

fn trait_offset_table_name(
    em: &mut Emitter<'_>,
    class: ClassId,
    trait_id: ClassId,
) -> String {
    format!("{}_{}_offset_table", em.class_prefix(class), em.class_prefix(trait_id))
}

/// vtable 填充函数名
pub fn vtable_setup_name(
    em: &mut Emitter<'_>,
    class: ClassId,
) -> String {
    format!("{}_vtable_setup", em.class_prefix(class))
}

fn vtable_item(
    em: &mut Emitter<'_>,
    entry: &VTableEntry,
) -> String {
    let decl = em.program.func(entry.method).decl.clone();
    format!("(CPyVTableItem){},", em.native_function_name(&decl))
}

/// 主 vtable 中 trait 项的数量
fn trait_prefix_len(
    em: &Emitter<'_>,
    class: ClassId,
) -> usize {
    3 * em.program.class(class).trait_vtables.len()
}

fn generate_vtables(
    em: &mut Emitter<'_>,
    class: ClassId,
) -> CompileResult<()> {
    let program = em.program;
    let cl = program.class(class);
    let vtable = em.vtable_name(class);
    let struct_name = em.struct_name(class);

    for (&trait_id, entries) in &cl.trait_vtables {
        let name = trait_vtable_name(em, class, trait_id);
        em.emit_line(format!("static CPyVTableItem {}[{}];", name, entries.len().max(1)));
        let offsets = trait_offset_table_name(em, class, trait_id);
        let attrs: Vec<String> = program.class(trait_id).attributes.keys().cloned().collect();
        if attrs.is_empty() {
            em.emit_line(format!("static size_t {}[1];", offsets));
        } else {
            em.emit_line(format!("static size_t {}[] = {{", offsets));
            for attr in &attrs {
                let field = em.attr(attr);
                em.emit_line(format!("offsetof({}, {}),", struct_name, field));
            }
            em.emit_line("};");
        }
    }
    let size = cl.vtable_entries.len() + trait_prefix_len(em, class);
    em.emit_line(format!("static CPyVTableItem {}[{}];", vtable, size.max(1)));

    let setup = vtable_setup_name(em, class);
    em.emit_line("static bool");
    em.emit_line(format!("{}(void)", setup));
    em.emit_line("{");
    for (&trait_id, entries) in &cl.trait_vtables {
        if entries.is_empty() {
            continue;
        }
        let name = trait_vtable_name(em, class, trait_id);
        em.emit_line(format!("CPyVTableItem {}_scratch[] = {{", name));
        for entry in entries {
            let item = vtable_item(em, entry);
            em.emit_line(item);
        }
        em.emit_line("};");
        em.emit_line(format!("memcpy({}, {}_scratch, sizeof({}));", name, name, name));
    }
    if size > 0 {
        em.emit_line(format!("CPyVTableItem {}_scratch[] = {{", vtable));
        for &trait_id in cl.trait_vtables.keys() {
            let type_name = em.type_struct_name(trait_id);
            let name = trait_vtable_name(em, class, trait_id);
            let offsets = trait_offset_table_name(em, class, trait_id);
            em.emit_line(format!("(CPyVTableItem){},", type_name));
            em.emit_line(format!("(CPyVTableItem){},", name));
            em.emit_line(format!("(CPyVTableItem){},", offsets));
        }
        for entry in &cl.vtable_entries {
            let item = vtable_item(em, entry);
            em.emit_line(item);
        }
        em.emit_line("};");
        em.emit_line(format!("memcpy({}, {}_scratch, sizeof({}));", vtable, vtable, vtable));
    }
    em.emit_line("return 1;");
    em.emit_line("}");
    Ok(())
}

// ==================== 实例创建 ====================

fn setup_name(
    em: &mut Emitter<'_>,
    class: ClassId,
) -> String {
    format!("{}_setup", em.class_prefix(class))
}

fn generate_setup(
    em: &mut Emitter<'_>,
    class: ClassId,
) -> CompileResult<()> {
    let struct_name = em.struct_name(class);
    let setup = setup_name(em, class);
    let vtable = em.vtable_name(class);
    let offset = trait_prefix_len(em, class);
    em.emit_line("static PyObject *");
    em.emit_line(format!("{}(PyTypeObject *type)", setup));
    em.emit_line("{");
    em.emit_line(format!("{} *self;", struct_name));
    em.emit_line(format!("self = ({} *)type->tp_alloc(type, 0);", struct_name));
    em.emit_line("if (self == NULL)");
    em.emit_line("    return NULL;");
    if offset > 0 {
        em.emit_line(format!("self->vtable = {} + {};", vtable, offset));
    } else {
        em.emit_line(format!("self->vtable = {};", vtable));
    }
    for (name, ty) in em.program.all_attributes(class) {
        let field = em.attr(&name);
        let undefined = em.c_error_value(&ty)?;
        em.emit_line(format!("self->{} = {};", field, undefined));
    }
    em.emit_line("return (PyObject *)self;");
    em.emit_line("}");
    Ok(())
}

fn generate_constructor(
    em: &mut Emitter<'_>,
    class: ClassId,
) -> CompileResult<()> {
    let header = constructor_header(em, class);
    let setup = setup_name(em, class);
    let type_name = em.type_struct_name(class);
    em.emit_line(header);
    em.emit_line("{");
    em.emit_line(format!("PyObject *self = {}({});", setup, type_name));
    em.emit_line("if (self == NULL)");
    em.emit_line("    return NULL;");
    if let Some((_, decl)) = init_decl(em, class) {
        let mut args = vec!["self".to_string()];
        args.extend(
            decl.sig
                .args
                .iter()
                .skip(1)
                .map(|a| format!("cpy_r_{}", super::names::sanitize_identifier(&a.name))),
        );
        let init = em.native_function_name(&decl);
        let ctype = em.ctype_spaced(&decl.sig.ret_type);
        em.emit_line(format!("{}res = {}({});", ctype, init, args.join(", ")));
        let check = em.error_value_check("res", &decl.sig.ret_type, "==")?;
        em.emit_line(format!("if ({}) {{", check));
        em.emit_line("Py_DECREF(self);");
        em.emit_line("return NULL;");
        em.emit_line("}");
    }
    em.emit_line("return self;");
    em.emit_line("}");
    Ok(())
}

fn new_name(
    em: &mut Emitter<'_>,
    class: ClassId,
) -> String {
    format!("{}_new", em.class_prefix(class))
}

/// `tp_new`：只允许精确类型，然后经旧约定包装函数调用 `__init__`
fn generate_new(
    em: &mut Emitter<'_>,
    class: ClassId,
) {
    let name = new_name(em, class);
    let type_name = em.type_struct_name(class);
    let setup = setup_name(em, class);
    let program = em.program;
    let cl = program.class(class);
    let (instantiable, allow_subclasses, class_name) =
        (is_instantiable(em, class), cl.allow_interpreted_subclasses, cl.name.clone());
    em.emit_line("static PyObject *");
    em.emit_line(format!("{}(PyTypeObject *type, PyObject *args, PyObject *kwds)", name));
    em.emit_line("{");
    if !instantiable {
        let message = format!("cannot instantiate abstract class '{}'", class_name);
        em.emit_line(format!("PyErr_SetString(PyExc_TypeError, {});", c_string(&message)));
        em.emit_line("return NULL;");
        em.emit_line("}");
        return;
    }
    if !allow_subclasses {
        em.emit_line(format!("if (type != {}) {{", type_name));
        em.emit_line("PyErr_SetString(PyExc_TypeError, \"interpreted classes cannot inherit from compiled\");");
        em.emit_line("return NULL;");
        em.emit_line("}");
    }
    em.emit_line(format!("PyObject *self = {}(type);", setup));
    em.emit_line("if (self == NULL)");
    em.emit_line("    return NULL;");
    if let Some((_, decl)) = init_decl(em, class) {
        let init = em.legacy_wrapper_function_name(&decl);
        em.emit_line(format!("PyObject *ret = {}(self, args, kwds);", init));
        em.emit_line("if (ret == NULL) {");
        em.emit_line("Py_DECREF(self);");
        em.emit_line("return NULL;");
        em.emit_line("}");
        em.emit_line("Py_DECREF(ret);");
    }
    em.emit_line("return self;");
    em.emit_line("}");
}

// ==================== GC ====================

fn generate_traverse(
    em: &mut Emitter<'_>,
    class: ClassId,
) {
    let struct_name = em.struct_name(class);
    let prefix = em.class_prefix(class);
    em.emit_line("static int");
    em.emit_line(format!("{}_traverse({} *self, visitproc visit, void *arg)", prefix, struct_name));
    em.emit_line("{");
    for (name, ty) in em.program.all_attributes(class) {
        let field = format!("self->{}", em.attr(&name));
        emit_gc_visit(em, &field, &ty);
    }
    em.emit_line("return 0;");
    em.emit_line("}");
}

fn emit_gc_visit(
    em: &mut Emitter<'_>,
    target: &str,
    ty: &RType,
) {
    match ty {
        _ if !ty.is_refcounted() => {}
        _ if ty.is_tagged() => {
            em.emit_line(format!("if (CPyTagged_CheckLong({})) {{", target));
            em.emit_line(format!("Py_VISIT(CPyTagged_LongAsObject({}));", target));
            em.emit_line("}");
        }
        RType::Tuple(t) => {
            for (i, item) in t.types.iter().enumerate() {
                emit_gc_visit(em, &format!("{}.f{}", target, i), item);
            }
        }
        _ => em.emit_line(format!("Py_VISIT({});", target)),
    }
}

fn generate_clear(
    em: &mut Emitter<'_>,
    class: ClassId,
) {
    let struct_name = em.struct_name(class);
    let prefix = em.class_prefix(class);
    em.emit_line("static int");
    em.emit_line(format!("{}_clear({} *self)", prefix, struct_name));
    em.emit_line("{");
    for (name, ty) in em.program.all_attributes(class) {
        let field = format!("self->{}", em.attr(&name));
        emit_gc_clear(em, &field, &ty);
    }
    em.emit_line("return 0;");
    em.emit_line("}");
}

fn emit_gc_clear(
    em: &mut Emitter<'_>,
    target: &str,
    ty: &RType,
) {
    match ty {
        _ if !ty.is_refcounted() => {}
        _ if ty.is_tagged() => {
            em.emit_line(format!("if (CPyTagged_CheckLong({})) {{", target));
            em.emit_line(format!("CPyTagged __tmp = {};", target));
            em.emit_line(format!("{} = CPY_INT_TAG;", target));
            em.emit_line("Py_XDECREF(CPyTagged_LongAsObject(__tmp));");
            em.emit_line("}");
        }
        RType::Tuple(t) => {
            for (i, item) in t.types.iter().enumerate() {
                emit_gc_clear(em, &format!("{}.f{}", target, i), item);
            }
        }
        _ => em.emit_line(format!("Py_CLEAR({});", target)),
    }
}

fn generate_dealloc(
    em: &mut Emitter<'_>,
    class: ClassId,
) {
    let struct_name = em.struct_name(class);
    let prefix = em.class_prefix(class);
    em.emit_line("static void");
    em.emit_line(format!("{}_dealloc({} *self)", prefix, struct_name));
    em.emit_line("{");
    em.emit_line("PyObject_GC_UnTrack(self);");
    em.emit_line(format!("CPy_TRASHCAN_BEGIN(self, {}_dealloc)", prefix));
    em.emit_line(format!("{}_clear(self);", prefix));
    em.emit_line("Py_TYPE(self)->tp_free((PyObject *)self);");
    em.emit_line("CPy_TRASHCAN_END(self)");
    em.emit_line("}");
}

// ==================== 属性访问 ====================

fn getseters_name(
    em: &mut Emitter<'_>,
    class: ClassId,
) -> String {
    format!("{}_getseters", em.class_prefix(class))
}

fn generate_getseters(
    em: &mut Emitter<'_>,
    class: ClassId,
) -> CompileResult<()> {
    let prefix = em.class_prefix(class);
    let attributes = em.program.all_attributes(class);
    for (name, ty) in &attributes {
        generate_getter(em, class, name, ty)?;
        em.emit_line("");
        generate_setter(em, class, name, ty)?;
        em.emit_line("");
    }
    let table = getseters_name(em, class);
    em.emit_line(format!("static PyGetSetDef {}[] = {{", table));
    for (name, _) in &attributes {
        let attr = super::names::sanitize_identifier(name);
        em.emit_line(format!(
            "{{{}, (getter){}_get_{}, (setter){}_set_{}, NULL, NULL}},",
            c_string(name),
            prefix,
            attr,
            prefix,
            attr
        ));
    }
    em.emit_line("{NULL}  /* Sentinel */");
    em.emit_line("};");
    Ok(())
}

fn generate_getter(
    em: &mut Emitter<'_>,
    class: ClassId,
    name: &str,
    ty: &RType,
) -> CompileResult<()> {
    let struct_name = em.struct_name(class);
    let prefix = em.class_prefix(class);
    let program = em.program;
    let cl = program.class(class);
    let (always_defined, class_name) = (cl.is_always_defined(name), cl.name.clone());
    let field = format!("self->{}", em.attr(name));

    em.emit_line("static PyObject *");
    em.emit_line(format!(
        "{}_get_{}({} *self, void *closure)",
        prefix,
        super::names::sanitize_identifier(name),
        struct_name
    ));
    em.emit_line("{");
    if !always_defined {
        let check = em.error_value_check(&field, ty, "==")?;
        em.emit_line(format!("if (unlikely({})) {{", check));
        let message = format!("attribute '{}' of '{}' undefined", name, class_name);
        em.emit_line(format!("PyErr_SetString(PyExc_AttributeError, {});", c_string(&message)));
        em.emit_line("return NULL;");
        em.emit_line("}");
    }
    em.emit_inc_ref(&field, ty);
    if ty.is_unboxed() {
        em.emit_box(&field, "retval", ty, true)?;
        em.emit_line("return retval;");
    } else {
        em.emit_line(format!("return {};", field));
    }
    em.emit_line("}");
    Ok(())
}

fn emit_release_attr(
    em: &mut Emitter<'_>,
    field: &str,
    ty: &RType,
    always_defined: bool,
) -> CompileResult<()> {
    if !ty.is_refcounted() {
        return Ok(());
    }
    if always_defined {
        em.emit_dec_ref(field, ty, false);
    } else {
        let check = em.error_value_check(field, ty, "!=")?;
        em.emit_line(format!("if ({}) {{", check));
        em.emit_dec_ref(field, ty, false);
        em.emit_line("}");
    }
    Ok(())
}

fn generate_setter(
    em: &mut Emitter<'_>,
    class: ClassId,
    name: &str,
    ty: &RType,
) -> CompileResult<()> {
    let struct_name = em.struct_name(class);
    let prefix = em.class_prefix(class);
    let program = em.program;
    let cl = program.class(class);
    let (deletable, always_defined, class_name) =
        (cl.is_deletable(name), cl.is_always_defined(name), cl.name.clone());
    let field = format!("self->{}", em.attr(name));

    em.emit_line("static int");
    em.emit_line(format!(
        "{}_set_{}({} *self, PyObject *value, void *closure)",
        prefix,
        super::names::sanitize_identifier(name),
        struct_name
    ));
    em.emit_line("{");
    if !deletable {
        em.emit_line("if (value == NULL) {");
        let message = format!("'{}' object attribute '{}' cannot be deleted", class_name, name);
        em.emit_line(format!("PyErr_SetString(PyExc_AttributeError, {});", c_string(&message)));
        em.emit_line("return -1;");
        em.emit_line("}");
    }
    if deletable {
        em.emit_line("if (value != NULL) {");
    }
    // 新值转换成功后才释放旧值
    let fail = ErrorHandler::Return("-1".to_string());
    if ty.is_unboxed() {
        em.emit_unbox("value", "tmp", ty, &fail, true, false)?;
    } else {
        em.emit_cast("value", "tmp", ty, &fail, true, true)?;
    }
    emit_release_attr(em, &field, ty, always_defined)?;
    em.emit_line(format!("{} = tmp;", field));
    if deletable {
        let undefined = em.c_error_value(ty)?;
        em.emit_line("} else {");
        emit_release_attr(em, &field, ty, always_defined)?;
        em.emit_line(format!("{} = {};", field, undefined));
        em.emit_line("}");
    }
    em.emit_line("return 0;");
    em.emit_line("}");
    Ok(())
}

// ==================== 方法表与类型模板 ====================

fn methods_name(
    em: &mut Emitter<'_>,
    class: ClassId,
) -> String {
    format!("{}_methods", em.class_prefix(class))
}

/// 方法表中使用的约定与包装函数名
pub fn table_wrapper(
    em: &mut Emitter<'_>,
    decl: &FuncDecl,
) -> (Convention, String) {
    if em.ctx.options.wrapper_convention.emits_fastcall() {
        (Convention::Fastcall, em.wrapper_function_name(decl))
    } else {
        (Convention::Legacy, em.legacy_wrapper_function_name(decl))
    }
}

fn generate_methods_table(
    em: &mut Emitter<'_>,
    class: ClassId,
) -> CompileResult<()> {
    let program = em.program;
    let table = methods_name(em, class);
    em.emit_line(format!("static PyMethodDef {}[] = {{", table));
    for (name, &method) in &program.class(class).methods {
        // 特殊方法由类型槽位暴露
        if name.starts_with("__") && name.ends_with("__") {
            continue;
        }
        let decl = program.func(method).decl.clone();
        let (convention, wrapper) = table_wrapper(em, &decl);
        em.emit_line(format!(
            "{{{}, (PyCFunction){}, {}, NULL}},",
            c_string(name),
            wrapper,
            convention.method_flags()
        ));
    }
    em.emit_line("{NULL}  /* Sentinel */");
    em.emit_line("};");
    Ok(())
}

/// 类型模板变量名
pub fn template_name(
    em: &mut Emitter<'_>,
    class: ClassId,
) -> String {
    format!("{}_template", em.type_struct_name(class))
}

fn generate_type_template(
    em: &mut Emitter<'_>,
    class: ClassId,
) -> CompileResult<()> {
    let program = em.program;
    let cl = program.class(class);
    let template = template_name(em, class);
    let struct_name = em.struct_name(class);
    let prefix = em.class_prefix(class);
    let methods = methods_name(em, class);
    let subclassable = cl.allow_interpreted_subclasses || !matches!(&cl.children, Some(c) if c.is_empty());

    em.emit_line(format!("static PyTypeObject {}_ = {{", template));
    em.emit_line("PyVarObject_HEAD_INIT(NULL, 0)");
    em.emit_line(format!(".tp_name = {},", c_string(&cl.name)));
    if !cl.is_trait {
        let getseters = getseters_name(em, class);
        em.emit_line(format!(".tp_new = {}_new,", prefix));
        em.emit_line(format!(".tp_dealloc = (destructor){}_dealloc,", prefix));
        em.emit_line(format!(".tp_traverse = (traverseproc){}_traverse,", prefix));
        em.emit_line(format!(".tp_clear = (inquiry){}_clear,", prefix));
        em.emit_line(format!(".tp_getset = {},", getseters));
    }
    em.emit_line(format!(".tp_methods = {},", methods));
    em.emit_line(format!(".tp_basicsize = sizeof({}),", struct_name));
    let mut flags = vec!["Py_TPFLAGS_DEFAULT", "Py_TPFLAGS_HAVE_GC"];
    if subclassable || cl.is_trait {
        flags.push("Py_TPFLAGS_BASETYPE");
    }
    em.emit_line(format!(".tp_flags = {},", flags.join(" | ")));
    em.emit_line("};");
    em.emit_line(format!("static PyTypeObject *{} = &{}_;", template, template));
    Ok(())
}
