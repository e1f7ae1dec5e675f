//! 原语操作描述表
//!
//! 纯数据：每个原语的参数类型、返回类型、错误约定以及所有权转移约定。
//! 前端通过名称查表构造 `PrimitiveOp` / `CallC`，降级阶段按名称查找改写函数。

use indexmap::IndexMap;
use once_cell::sync::Lazy;

use crate::middle::ir::{ErrorKind, Steals};
use crate::middle::types::RType;

/// 原语描述
#[derive(Debug, Clone, PartialEq)]
pub struct PrimitiveDescription {
    pub name: &'static str,
    pub arg_types: Vec<RType>,
    pub return_type: RType,
    pub error_kind: ErrorKind,
    pub steals: Steals,
    /// 结果是借用引用
    pub is_borrowed: bool,
    /// 未被降级时直接调用的 C 函数
    pub c_function_name: Option<&'static str>,
}

impl PrimitiveDescription {
    fn new(
        name: &'static str,
        arg_types: Vec<RType>,
        return_type: RType,
        error_kind: ErrorKind,
        c_function_name: Option<&'static str>,
    ) -> Self {
        PrimitiveDescription {
            name,
            arg_types,
            return_type,
            error_kind,
            steals: Steals::Nothing,
            is_borrowed: false,
            c_function_name,
        }
    }

    fn steals(
        mut self,
        steals: Steals,
    ) -> Self {
        self.steals = steals;
        self
    }

    fn borrowed(mut self) -> Self {
        self.is_borrowed = true;
        self
    }
}

/// 抽象原语（可能被降级改写）
static PRIMITIVE_OPS: Lazy<IndexMap<&'static str, PrimitiveDescription>> = Lazy::new(|| {
    let int_cmp = |name: &'static str| {
        PrimitiveDescription::new(
            name,
            vec![RType::int(), RType::int()],
            RType::bool(),
            ErrorKind::Never,
            None,
        )
    };
    let descs = vec![
        int_cmp("int_eq"),
        int_cmp("int_ne"),
        int_cmp("int_lt"),
        int_cmp("int_le"),
        int_cmp("int_gt"),
        int_cmp("int_ge"),
        PrimitiveDescription::new(
            "int_add",
            vec![RType::int(), RType::int()],
            RType::int(),
            ErrorKind::Never,
            Some("CPyTagged_Add"),
        ),
        PrimitiveDescription::new(
            "int_sub",
            vec![RType::int(), RType::int()],
            RType::int(),
            ErrorKind::Never,
            Some("CPyTagged_Subtract"),
        ),
        PrimitiveDescription::new(
            "int_floor_div",
            vec![RType::int(), RType::int()],
            RType::int(),
            ErrorKind::Magic,
            Some("CPyTagged_FloorDivide"),
        ),
        PrimitiveDescription::new(
            "var_object_size",
            vec![RType::object()],
            RType::c_ssize_t(),
            ErrorKind::Never,
            None,
        ),
        PrimitiveDescription::new(
            "list_items",
            vec![RType::list()],
            RType::pointer(),
            ErrorKind::Never,
            None,
        ),
        PrimitiveDescription::new(
            "list_get_item_unsafe",
            vec![RType::list(), RType::c_ssize_t()],
            RType::object(),
            ErrorKind::Never,
            None,
        )
        .borrowed(),
        PrimitiveDescription::new(
            "buf_init_item",
            vec![RType::pointer(), RType::c_ssize_t(), RType::object()],
            RType::Void,
            ErrorKind::Never,
            None,
        )
        .steals(Steals::Some(vec![false, false, true])),
        PrimitiveDescription::new(
            "str_concat",
            vec![RType::str(), RType::str()],
            RType::str(),
            ErrorKind::Magic,
            Some("PyUnicode_Concat"),
        ),
    ];
    descs.into_iter().map(|d| (d.name, d)).collect()
});

/// 直接调用的 C 函数
static C_FUNCTIONS: Lazy<IndexMap<&'static str, PrimitiveDescription>> = Lazy::new(|| {
    let descs = vec![
        PrimitiveDescription::new(
            "int_equal_",
            vec![RType::int(), RType::int()],
            RType::bit(),
            ErrorKind::Never,
            Some("CPyTagged_IsEq_"),
        ),
        PrimitiveDescription::new(
            "int_less_than_",
            vec![RType::int(), RType::int()],
            RType::bit(),
            ErrorKind::Never,
            Some("CPyTagged_IsLt_"),
        ),
        PrimitiveDescription::new(
            "new_list",
            vec![RType::c_ssize_t()],
            RType::list(),
            ErrorKind::Magic,
            Some("PyList_New"),
        ),
        PrimitiveDescription::new(
            "list_append",
            vec![RType::list(), RType::object()],
            RType::bit(),
            ErrorKind::False,
            Some("CPyList_Append"),
        ),
        PrimitiveDescription::new(
            "py_getattr",
            vec![RType::object(), RType::str()],
            RType::object(),
            ErrorKind::Magic,
            Some("PyObject_GetAttr"),
        ),
        PrimitiveDescription::new(
            "py_call",
            vec![RType::object(), RType::tuple_primitive()],
            RType::object(),
            ErrorKind::Magic,
            Some("PyObject_CallObject"),
        ),
        PrimitiveDescription::new(
            "py_str",
            vec![RType::object()],
            RType::str(),
            ErrorKind::Magic,
            Some("PyObject_Str"),
        ),
        PrimitiveDescription::new(
            "raise_exception",
            vec![RType::object()],
            RType::Void,
            ErrorKind::Always,
            Some("CPy_Raise"),
        ),
    ];
    descs.into_iter().map(|d| (d.name, d)).collect()
});

/// 按名称查找抽象原语
pub fn primitive_op(name: &str) -> Option<&'static PrimitiveDescription> {
    PRIMITIVE_OPS.get(name)
}

/// 按名称查找 C 函数描述
pub fn c_function(name: &str) -> Option<&'static PrimitiveDescription> {
    C_FUNCTIONS.get(name)
}

/// 全部抽象原语名称
pub fn primitive_op_names() -> impl Iterator<Item = &'static str> {
    PRIMITIVE_OPS.keys().copied()
}
