//! Op definitions
//!
//! `Op` is a closed sum type. Passes dispatch with exhaustive `match`es, so a
//! new op kind cannot be silently ignored by an analysis or by codegen.

use serde::{Deserialize, Serialize};
use smallvec::{smallvec, SmallVec};

use super::{BlockId, ClassId, ErrorKind, FuncId, ValueId};
use crate::middle::types::{RStruct, RType};

pub type Sources = SmallVec<[ValueId; 4]>;
pub type Targets = SmallVec<[BlockId; 2]>;

/// Branch condition flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BranchOp {
    /// Branch on a C truth value
    Bool,
    /// Branch on whether a value equals its type's error sentinel
    IsError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntOpKind {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Xor,
    LeftShift,
    RightShift,
}

impl IntOpKind {
    pub fn symbol(self) -> &'static str {
        match self {
            IntOpKind::Add => "+",
            IntOpKind::Sub => "-",
            IntOpKind::Mul => "*",
            IntOpKind::Div => "/",
            IntOpKind::Mod => "%",
            IntOpKind::And => "&",
            IntOpKind::Or => "|",
            IntOpKind::Xor => "^",
            IntOpKind::LeftShift => "<<",
            IntOpKind::RightShift => ">>",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CmpOp {
    Eq,
    Neq,
    Slt,
    Sgt,
    Sle,
    Sge,
    Ult,
    Ugt,
    Ule,
    Uge,
}

impl CmpOp {
    pub fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::Neq => "!=",
            CmpOp::Slt | CmpOp::Ult => "<",
            CmpOp::Sgt | CmpOp::Ugt => ">",
            CmpOp::Sle | CmpOp::Ule => "<=",
            CmpOp::Sge | CmpOp::Uge => ">=",
        }
    }

    pub fn is_signed(self) -> bool {
        matches!(self, CmpOp::Slt | CmpOp::Sgt | CmpOp::Sle | CmpOp::Sge)
    }

    pub fn is_unsigned(self) -> bool {
        matches!(self, CmpOp::Ult | CmpOp::Ugt | CmpOp::Ule | CmpOp::Uge)
    }
}

/// Python-level literal materialized once per module
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Literal {
    Str(String),
    Bytes(Vec<u8>),
    /// Integer too large for the tagged fast path, as decimal digits
    Int(String),
    /// Float in its source representation
    Float(String),
}

/// Namespace of a static C variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Namespace {
    Static,
    Type,
    Module,
}

impl Namespace {
    pub fn prefix(self) -> &'static str {
        match self {
            Namespace::Static => "CPyStatic_",
            Namespace::Type => "CPyType_",
            Namespace::Module => "CPyModule_",
        }
    }
}

/// Which sources a call transfers ownership of
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Steals {
    #[default]
    Nothing,
    All,
    Some(Vec<bool>),
}

impl Steals {
    fn pick(
        &self,
        args: &[ValueId],
    ) -> Sources {
        match self {
            Steals::Nothing => SmallVec::new(),
            Steals::All => args.iter().copied().collect(),
            Steals::Some(flags) => args
                .iter()
                .zip(flags.iter())
                .filter(|(_, steal)| **steal)
                .map(|(a, _)| *a)
                .collect(),
        }
    }
}

/// Address operand of `LoadAddress`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddressSource {
    /// Address of a C global symbol
    Symbol(String),
    /// Address of a register
    Register(ValueId),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Op {
    // =====================
    // 控制流
    // =====================
    Goto {
        label: BlockId,
    },
    Branch {
        value: ValueId,
        true_label: BlockId,
        false_label: BlockId,
        op: BranchOp,
        negated: bool,
        /// Hint that the true branch is unlikely
        rare: bool,
        /// (function name, line) to record when the true branch is taken
        traceback_entry: Option<(String, i32)>,
    },
    Return {
        value: ValueId,
    },
    Unreachable,

    // =====================
    // 寄存器
    // =====================
    Assign {
        dest: ValueId,
        src: ValueId,
    },
    LoadErrorValue {
        /// Assigning this value makes the destination undefined again
        undefines: bool,
    },
    LoadLiteral {
        value: Literal,
    },

    // =====================
    // 对象与静态变量
    // =====================
    GetAttr {
        obj: ValueId,
        attr: String,
        class: ClassId,
    },
    SetAttr {
        obj: ValueId,
        attr: String,
        src: ValueId,
        class: ClassId,
        /// The previous value is known to be undefined
        is_init: bool,
    },
    LoadStatic {
        identifier: String,
        module_name: Option<String>,
        namespace: Namespace,
    },
    InitStatic {
        value: ValueId,
        identifier: String,
        module_name: Option<String>,
        namespace: Namespace,
    },
    LoadGlobal {
        identifier: String,
    },

    // =====================
    // 元组
    // =====================
    TupleSet {
        items: Vec<ValueId>,
    },
    TupleGet {
        src: ValueId,
        index: usize,
    },

    // =====================
    // 类型转换
    // =====================
    Cast {
        src: ValueId,
    },
    Box {
        src: ValueId,
    },
    Unbox {
        src: ValueId,
    },
    Truncate {
        src: ValueId,
    },
    Extend {
        src: ValueId,
        signed: bool,
    },
    Unborrow {
        src: ValueId,
    },

    // =====================
    // 调用
    // =====================
    Call {
        func: FuncId,
        args: Vec<ValueId>,
    },
    MethodCall {
        obj: ValueId,
        method: String,
        class: ClassId,
        args: Vec<ValueId>,
    },
    CallC {
        function_name: String,
        args: Vec<ValueId>,
        steals: Steals,
    },
    /// Abstract primitive, rewritten by lowering when a rewrite is registered
    PrimitiveOp {
        name: String,
        args: Vec<ValueId>,
        steals: Steals,
        /// C function used when no lowering rewrite applies
        c_function_name: Option<String>,
    },
    RaiseStandardError {
        class_name: String,
        message: Option<String>,
    },

    // =====================
    // 底层操作
    // =====================
    IntOp {
        lhs: ValueId,
        rhs: ValueId,
        op: IntOpKind,
    },
    ComparisonOp {
        lhs: ValueId,
        rhs: ValueId,
        op: CmpOp,
    },
    LoadMem {
        src: ValueId,
    },
    SetMem {
        dest_type: RType,
        dest: ValueId,
        src: ValueId,
    },
    GetElementPtr {
        src: ValueId,
        src_type: RStruct,
        field: String,
    },
    LoadAddress {
        src: AddressSource,
    },
    /// Keeps sources alive until this point; stripped by refcount insertion
    KeepAlive {
        srcs: Vec<ValueId>,
        steal: bool,
    },

    // =====================
    // 引用计数
    // =====================
    IncRef {
        src: ValueId,
    },
    DecRef {
        src: ValueId,
        is_xdec: bool,
    },
}

/// Standard exception raised for reads of unassigned locals
pub const UNBOUND_LOCAL_ERROR: &str = "UnboundLocalError";
pub const NAME_ERROR: &str = "NameError";
pub const ZERO_DIVISION_ERROR: &str = "ZeroDivisionError";
pub const INDEX_ERROR: &str = "IndexError";

impl Op {
    /// Values read by this op
    pub fn sources(&self) -> Sources {
        match self {
            Op::Goto { .. } | Op::Unreachable => SmallVec::new(),
            Op::Branch { value, .. } => smallvec![*value],
            Op::Return { value } => smallvec![*value],
            Op::Assign { src, .. } => smallvec![*src],
            Op::LoadErrorValue { .. } | Op::LoadLiteral { .. } => SmallVec::new(),
            Op::GetAttr { obj, .. } => smallvec![*obj],
            Op::SetAttr { obj, src, .. } => smallvec![*obj, *src],
            Op::LoadStatic { .. } | Op::LoadGlobal { .. } => SmallVec::new(),
            Op::InitStatic { value, .. } => smallvec![*value],
            Op::TupleSet { items } => items.iter().copied().collect(),
            Op::TupleGet { src, .. } => smallvec![*src],
            Op::Cast { src }
            | Op::Box { src }
            | Op::Unbox { src }
            | Op::Truncate { src }
            | Op::Extend { src, .. }
            | Op::Unborrow { src } => smallvec![*src],
            Op::Call { args, .. } => args.iter().copied().collect(),
            Op::MethodCall { obj, args, .. } => {
                let mut srcs: Sources = smallvec![*obj];
                srcs.extend(args.iter().copied());
                srcs
            }
            Op::CallC { args, .. } | Op::PrimitiveOp { args, .. } => args.iter().copied().collect(),
            Op::RaiseStandardError { .. } => SmallVec::new(),
            Op::IntOp { lhs, rhs, .. } | Op::ComparisonOp { lhs, rhs, .. } => smallvec![*lhs, *rhs],
            Op::LoadMem { src } => smallvec![*src],
            Op::SetMem { dest, src, .. } => smallvec![*src, *dest],
            Op::GetElementPtr { src, .. } => smallvec![*src],
            Op::LoadAddress { src } => match src {
                AddressSource::Register(reg) => smallvec![*reg],
                AddressSource::Symbol(_) => SmallVec::new(),
            },
            Op::KeepAlive { srcs, .. } => srcs.iter().copied().collect(),
            Op::IncRef { src } | Op::DecRef { src, .. } => smallvec![*src],
        }
    }

    /// Sources without duplicates, in first-occurrence order
    pub fn unique_sources(&self) -> Sources {
        let mut result = Sources::new();
        for src in self.sources() {
            if !result.contains(&src) {
                result.push(src);
            }
        }
        result
    }

    /// Sources whose ownership is transferred to this op
    ///
    /// The caller performs no further decref on a stolen source.
    pub fn stolen(&self) -> Sources {
        match self {
            Op::Return { value } => smallvec![*value],
            Op::Assign { src, .. } => smallvec![*src],
            Op::SetAttr { src, .. } => smallvec![*src],
            Op::InitStatic { value, .. } => smallvec![*value],
            Op::TupleSet { items } => items.iter().copied().collect(),
            Op::Box { src } => smallvec![*src],
            Op::SetMem { src, .. } => smallvec![*src],
            Op::CallC { args, steals, .. } | Op::PrimitiveOp { args, steals, .. } => steals.pick(args),
            Op::KeepAlive { srcs, steal } => {
                if *steal {
                    srcs.iter().copied().collect()
                } else {
                    SmallVec::new()
                }
            }
            Op::Goto { .. }
            | Op::Branch { .. }
            | Op::Unreachable
            | Op::LoadErrorValue { .. }
            | Op::LoadLiteral { .. }
            | Op::GetAttr { .. }
            | Op::LoadStatic { .. }
            | Op::LoadGlobal { .. }
            | Op::TupleGet { .. }
            | Op::Cast { .. }
            | Op::Unbox { .. }
            | Op::Truncate { .. }
            | Op::Extend { .. }
            | Op::Unborrow { .. }
            | Op::Call { .. }
            | Op::MethodCall { .. }
            | Op::RaiseStandardError { .. }
            | Op::IntOp { .. }
            | Op::ComparisonOp { .. }
            | Op::LoadMem { .. }
            | Op::GetElementPtr { .. }
            | Op::LoadAddress { .. }
            | Op::IncRef { .. }
            | Op::DecRef { .. } => SmallVec::new(),
        }
    }

    /// Rewrite every source through `f`
    pub fn map_sources(
        &mut self,
        mut f: impl FnMut(ValueId) -> ValueId,
    ) {
        match self {
            Op::Goto { .. } | Op::Unreachable => {}
            Op::Branch { value, .. } => *value = f(*value),
            Op::Return { value } => *value = f(*value),
            Op::Assign { src, .. } => *src = f(*src),
            Op::LoadErrorValue { .. } | Op::LoadLiteral { .. } => {}
            Op::GetAttr { obj, .. } => *obj = f(*obj),
            Op::SetAttr { obj, src, .. } => {
                *obj = f(*obj);
                *src = f(*src);
            }
            Op::LoadStatic { .. } | Op::LoadGlobal { .. } => {}
            Op::InitStatic { value, .. } => *value = f(*value),
            Op::TupleSet { items } => items.iter_mut().for_each(|v| *v = f(*v)),
            Op::TupleGet { src, .. }
            | Op::Cast { src }
            | Op::Box { src }
            | Op::Unbox { src }
            | Op::Truncate { src }
            | Op::Extend { src, .. }
            | Op::Unborrow { src }
            | Op::LoadMem { src }
            | Op::GetElementPtr { src, .. }
            | Op::IncRef { src }
            | Op::DecRef { src, .. } => *src = f(*src),
            Op::Call { args, .. } | Op::CallC { args, .. } | Op::PrimitiveOp { args, .. } => {
                args.iter_mut().for_each(|v| *v = f(*v))
            }
            Op::MethodCall { obj, args, .. } => {
                *obj = f(*obj);
                args.iter_mut().for_each(|v| *v = f(*v));
            }
            Op::RaiseStandardError { .. } => {}
            Op::IntOp { lhs, rhs, .. } | Op::ComparisonOp { lhs, rhs, .. } => {
                *lhs = f(*lhs);
                *rhs = f(*rhs);
            }
            Op::SetMem { dest, src, .. } => {
                *dest = f(*dest);
                *src = f(*src);
            }
            Op::LoadAddress { src } => {
                if let AddressSource::Register(reg) = src {
                    *reg = f(*reg);
                }
            }
            Op::KeepAlive { srcs, .. } => srcs.iter_mut().for_each(|v| *v = f(*v)),
        }
    }

    pub fn is_control(&self) -> bool {
        matches!(
            self,
            Op::Goto { .. } | Op::Branch { .. } | Op::Return { .. } | Op::Unreachable
        )
    }

    /// Successor blocks of a control op (empty for everything else)
    pub fn targets(&self) -> Targets {
        match self {
            Op::Goto { label } => smallvec![*label],
            Op::Branch {
                true_label,
                false_label,
                ..
            } => smallvec![*true_label, *false_label],
            _ => SmallVec::new(),
        }
    }

    pub fn set_target(
        &mut self,
        index: usize,
        new: BlockId,
    ) {
        match self {
            Op::Goto { label } => {
                debug_assert_eq!(index, 0);
                *label = new;
            }
            Op::Branch {
                true_label,
                false_label,
                ..
            } => {
                if index == 0 {
                    *true_label = new;
                } else {
                    *false_label = new;
                }
            }
            _ => {}
        }
    }

    /// Error kind an op gets when built without an explicit one
    pub fn default_error_kind(&self) -> ErrorKind {
        match self {
            Op::GetAttr { .. }
            | Op::Cast { .. }
            | Op::Unbox { .. }
            | Op::Call { .. }
            | Op::MethodCall { .. } => ErrorKind::Magic,
            Op::RaiseStandardError { .. } => ErrorKind::False,
            _ => ErrorKind::Never,
        }
    }

    /// Short kind name used in logs and verifier messages
    pub fn kind_name(&self) -> &'static str {
        match self {
            Op::Goto { .. } => "goto",
            Op::Branch { .. } => "branch",
            Op::Return { .. } => "return",
            Op::Unreachable => "unreachable",
            Op::Assign { .. } => "assign",
            Op::LoadErrorValue { .. } => "load_error_value",
            Op::LoadLiteral { .. } => "load_literal",
            Op::GetAttr { .. } => "get_attr",
            Op::SetAttr { .. } => "set_attr",
            Op::LoadStatic { .. } => "load_static",
            Op::InitStatic { .. } => "init_static",
            Op::LoadGlobal { .. } => "load_global",
            Op::TupleSet { .. } => "tuple_set",
            Op::TupleGet { .. } => "tuple_get",
            Op::Cast { .. } => "cast",
            Op::Box { .. } => "box",
            Op::Unbox { .. } => "unbox",
            Op::Truncate { .. } => "truncate",
            Op::Extend { .. } => "extend",
            Op::Unborrow { .. } => "unborrow",
            Op::Call { .. } => "call",
            Op::MethodCall { .. } => "method_call",
            Op::CallC { .. } => "call_c",
            Op::PrimitiveOp { .. } => "primitive_op",
            Op::RaiseStandardError { .. } => "raise_standard_error",
            Op::IntOp { .. } => "int_op",
            Op::ComparisonOp { .. } => "comparison_op",
            Op::LoadMem { .. } => "load_mem",
            Op::SetMem { .. } => "set_mem",
            Op::GetElementPtr { .. } => "get_element_ptr",
            Op::LoadAddress { .. } => "load_address",
            Op::KeepAlive { .. } => "keep_alive",
            Op::IncRef { .. } => "inc_ref",
            Op::DecRef { .. } => "dec_ref",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sources_and_stolen() {
        let op = Op::SetAttr {
            obj: ValueId(0),
            attr: "x".to_string(),
            src: ValueId(1),
            class: ClassId(0),
            is_init: false,
        };
        assert_eq!(op.sources().as_slice(), &[ValueId(0), ValueId(1)]);
        assert_eq!(op.stolen().as_slice(), &[ValueId(1)]);
    }

    #[test]
    fn test_partial_steals() {
        let op = Op::CallC {
            function_name: "PyList_SetItem".to_string(),
            args: vec![ValueId(0), ValueId(1), ValueId(2)],
            steals: Steals::Some(vec![false, false, true]),
        };
        assert_eq!(op.stolen().as_slice(), &[ValueId(2)]);
    }

    #[test]
    fn test_unique_sources() {
        let op = Op::IntOp {
            lhs: ValueId(3),
            rhs: ValueId(3),
            op: IntOpKind::Add,
        };
        assert_eq!(op.unique_sources().as_slice(), &[ValueId(3)]);
    }

    #[test]
    fn test_targets() {
        let mut op = Op::Branch {
            value: ValueId(0),
            true_label: BlockId(1),
            false_label: BlockId(2),
            op: BranchOp::Bool,
            negated: false,
            rare: false,
            traceback_entry: None,
        };
        assert!(op.is_control());
        op.set_target(1, BlockId(5));
        assert_eq!(op.targets().as_slice(), &[BlockId(1), BlockId(5)]);
        assert!(Op::Unreachable.targets().is_empty());
    }
}
