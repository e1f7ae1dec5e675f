//! End-to-end: IR through the middle-end into C

use tycc::compile_to_c;
use tycc::middle::types::RType;
use tycc::util::config::{CompilerOptions, WrapperConvention};

use crate::common::{add_one, func, maybe_unbound, single_module};

#[test]
fn test_add_one_module() {
    let mut program = single_module();
    program.add_function(add_one());
    let files = compile_to_c(&mut program, &CompilerOptions::default()).unwrap();
    assert_eq!(files.len(), 1);
    let c = &files[0].contents;

    assert!(c.contains("CPyTagged CPyDef_f(CPyTagged cpy_r_x) {"));
    assert!(c.contains("CPyTagged cpy_r_y;"));
    assert!(c.contains("CPyTagged_Add(cpy_r_x, 2)"));
    assert!(c.contains("return cpy_r_y;"));
    // 包装函数检查参数类型并装箱返回值
    assert!(c.contains("CPyTagged_BorrowFromObject(obj_x)"));
    assert!(c.contains("CPyTagged_StealAsObject(retval)"));
    assert!(c.contains("PyMODINIT_FUNC PyInit_m(void)"));
}

#[test]
fn test_unbound_local_raises() {
    let mut program = single_module();
    program.add_function(maybe_unbound());
    let files = compile_to_c(&mut program, &CompilerOptions::default()).unwrap();
    let c = &files[0].contents;

    let raise = "PyErr_SetString(PyExc_UnboundLocalError, \"local variable 'z' referenced before assignment\");";
    assert_eq!(c.matches(raise).count(), 1);
    assert!(c.contains("CPy_AddTraceback(\"m.py\", \"g\""));
}

#[test]
fn test_parallel_matches_sequential() {
    let build = |parallel: bool| {
        let mut program = single_module();
        program.add_function(add_one());
        program.add_function(maybe_unbound());
        let options = CompilerOptions {
            parallel,
            ..CompilerOptions::default()
        };
        compile_to_c(&mut program, &options).unwrap()
    };
    assert_eq!(build(false), build(true));
}

#[test]
fn test_module_prefix_applies_to_symbols() {
    let mut program = single_module();
    program.add_function(add_one());
    let options = CompilerOptions {
        module_prefix: "grp_".to_string(),
        ..CompilerOptions::default()
    };
    let files = compile_to_c(&mut program, &options).unwrap();
    assert!(files[0].contents.contains("CPyDef_grp_f("));
    assert!(files[0].contents.contains("CPyPy_grp_f("));
}

#[test]
fn test_both_conventions_in_method_table() {
    let mut program = single_module();
    program.add_function(add_one());
    let options = CompilerOptions {
        wrapper_convention: WrapperConvention::Both,
        ..CompilerOptions::default()
    };
    let files = compile_to_c(&mut program, &options).unwrap();
    let c = &files[0].contents;
    assert!(c.contains("CPyArg_ParseStackAndKeywordsSimple"));
    assert!(c.contains("CPyArg_ParseTupleAndKeywords"));
    // 方法表只登记快速约定
    assert!(c.contains("(PyCFunction)CPyPy_f, METH_FASTCALL | METH_KEYWORDS"));
    assert!(!c.contains("(PyCFunction)CPyPyL_f"));
}

#[test]
fn test_string_literal_table() {
    use tycc::middle::ir::{IrBuilder, Literal};

    let mut f = func("s", &[], RType::str());
    let mut builder = IrBuilder::new(&mut f);
    let lit = builder.load_literal(Literal::Str("hi\n".to_string()), RType::str(), 1);
    builder.ret(lit, 1);
    let mut program = single_module();
    program.add_function(f);

    let files = compile_to_c(&mut program, &CompilerOptions::default()).unwrap();
    let c = &files[0].contents;
    assert!(c.contains("static PyObject *CPyStatics[1];"));
    assert!(c.contains("CPyStatics[0] = PyUnicode_FromStringAndSize(\"hi\\n\", 3);"));
    // 借用的字面量在返回前获得新引用
    assert!(c.contains("CPy_INCREF(cpy_r_r"));
}
