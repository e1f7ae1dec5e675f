//! Native classes: layout, vtables and dispatch

use tycc::compile_to_c;
use tycc::middle::ir::{ArgKind, FuncDecl, FuncIR, FuncSignature, IrBuilder, RuntimeArg};
use tycc::middle::types::RType;
use tycc::util::config::CompilerOptions;

use crate::common::{constant_method, single_module};

#[test]
fn test_subclass_layout_and_dispatch() {
    let mut program = single_module();
    let a = program.add_class("A", "m");
    program.class_mut(a).attributes.insert("n".to_string(), RType::int());
    constant_method(&mut program, a, "A", "get", 1);
    let b = program.add_subclass("B", "m", a);
    program.class_mut(b).attributes.insert("s".to_string(), RType::str());
    constant_method(&mut program, b, "B", "get", 2);

    // def call_get(a: A) -> int: return a.get()
    let sig = FuncSignature::new(
        vec![RuntimeArg::new("a", RType::instance(a, "A"), ArgKind::Pos)],
        RType::int(),
    );
    let mut caller = FuncIR::new(FuncDecl::new("call_get", "m", sig), 5);
    let mut builder = IrBuilder::new(&mut caller);
    let obj = builder.func().arg_regs[0];
    let result = builder.method_call(obj, a, "get", vec![], RType::int(), 6);
    builder.ret(result, 6);
    program.add_function(caller);

    let files = compile_to_c(&mut program, &CompilerOptions::default()).unwrap();
    let c = &files[0].contents;

    // 子类先放继承的属性
    let b_struct: Vec<&str> = c
        .lines()
        .skip_while(|l| *l != "#define MYPYC_DECLARED_BObject")
        .take_while(|l| *l != "} BObject;")
        .collect();
    let n_pos = b_struct.iter().position(|l| l.trim() == "CPyTagged _n;").unwrap();
    let s_pos = b_struct.iter().position(|l| l.trim() == "PyObject *_s;").unwrap();
    assert!(n_pos < s_pos);

    // 覆盖方法占用父类的同一个槽位
    assert!(c.contains("(CPyVTableItem)CPyDef_A___get,"));
    assert!(c.contains("(CPyVTableItem)CPyDef_B___get,"));

    // A 有子类，调用经由 vtable
    assert!(c.contains("CPY_GET_METHOD(cpy_r_a, CPyType_A, "));
    assert!(c.contains("/* get */"));

    // 基类的类型先创建，子类以它为基
    let a_init = c.find("CPyType_A = (PyTypeObject *)CPyType_FromTemplate(").unwrap();
    let b_init = c.find("CPyType_B = (PyTypeObject *)CPyType_FromTemplate(").unwrap();
    assert!(a_init < b_init);
    assert!(c.contains("PyTuple_Pack(1, (PyObject *)CPyType_A)"));
}

#[test]
fn test_exact_class_calls_directly() {
    let mut program = single_module();
    let a = program.add_class("Leaf", "m");
    constant_method(&mut program, a, "Leaf", "get", 7);

    let sig = FuncSignature::new(
        vec![RuntimeArg::new("x", RType::instance(a, "Leaf"), ArgKind::Pos)],
        RType::int(),
    );
    let mut caller = FuncIR::new(FuncDecl::new("use_leaf", "m", sig), 1);
    let mut builder = IrBuilder::new(&mut caller);
    let obj = builder.func().arg_regs[0];
    let result = builder.method_call(obj, a, "get", vec![], RType::int(), 2);
    builder.ret(result, 2);
    program.add_function(caller);

    let files = compile_to_c(&mut program, &CompilerOptions::default()).unwrap();
    let c = &files[0].contents;
    assert!(c.contains("CPyDef_Leaf___get(cpy_r_x);"));
    assert!(!c.contains("CPY_GET_METHOD("));
    // 没有子类的类型不可被继承
    assert!(c.contains(".tp_flags = Py_TPFLAGS_DEFAULT | Py_TPFLAGS_HAVE_GC,"));
    // 方法表登记普通方法
    assert!(c.contains("{\"get\", (PyCFunction)CPyPy_Leaf___get, METH_FASTCALL | METH_KEYWORDS, NULL},"));
}

#[test]
fn test_attribute_accessors() {
    let mut program = single_module();
    let a = program.add_class("Box", "m");
    {
        let cl = program.class_mut(a);
        cl.attributes.insert("item".to_string(), RType::object());
        cl.deletable.push("item".to_string());
    }

    let files = compile_to_c(&mut program, &CompilerOptions::default()).unwrap();
    let c = &files[0].contents;
    assert!(c.contains("Box_get_item(BoxObject *self, void *closure)"));
    assert!(c.contains("Box_set_item(BoxObject *self, PyObject *value, void *closure)"));
    assert!(c.contains("PyErr_SetString(PyExc_AttributeError, \"attribute 'item' of 'Box' undefined\");"));
    assert!(c.contains("{\"item\", (getter)Box_get_item, (setter)Box_set_item, NULL, NULL},"));
    assert!(c.contains("Py_VISIT(self->_item);"));
    assert!(c.contains("Py_CLEAR(self->_item);"));
}
