//! Intermediate Representation
//!
//! Register-based control-flow IR. Each function owns two arenas: a value
//! arena (registers, constants and ops, addressed by [`ValueId`]) and a block
//! arena (addressed by [`BlockId`]) with a separate layout order. Passes
//! rewrite block contents in place; handles stay stable for the lifetime of
//! the function.

pub mod builder;
pub mod class;
pub mod func;
pub mod module;
pub mod ops;
pub mod pprint;
pub mod verify;

use serde::{Deserialize, Serialize};

use crate::middle::types::RType;

pub use builder::IrBuilder;
pub use class::{ClassIR, GlueMethod, VTableEntry};
pub use func::{ArgKind, BasicBlock, FuncDecl, FuncIR, FuncSignature, RuntimeArg};
pub use module::{ModuleIR, Program};
pub use ops::{
    AddressSource, BranchOp, CmpOp, IntOpKind, Literal, Namespace, Op, Steals,
};

/// Line number used for ops that must never produce a traceback entry
pub const NO_TRACEBACK_LINE_NO: i32 = -10000;

/// Handle of a value in a function's value arena
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ValueId(pub u32);

/// Handle of a basic block in a function's block arena
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct BlockId(pub u32);

/// Handle of a class in [`Program::classes`]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ClassId(pub u32);

/// Handle of a function in [`Program::functions`]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct FuncId(pub u32);

impl ValueId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl BlockId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl ClassId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl FuncId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// How an op reports failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Never fails
    #[default]
    Never,
    /// Returns the result type's undefined sentinel on failure
    Magic,
    /// Returns a C false value on failure
    False,
    /// Always fails
    Always,
}

/// A named mutable slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Register {
    pub name: String,
    pub is_arg: bool,
    /// Arguments are borrowed by convention: the callee must not decref them
    /// unless it first takes ownership
    pub is_borrowed: bool,
}

/// An op stored in the value arena
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpData {
    pub op: Op,
    pub error_kind: ErrorKind,
    /// Result is a borrowed reference (no ownership to release)
    pub is_borrowed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ValueKind {
    Register(Register),
    /// Integer constant; tagged ints hold the untagged value
    Integer(i64),
    /// Raw C string constant
    CString(Vec<u8>),
    Op(OpData),
}

/// Abstract IR value: a type, a source line and what produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Value {
    pub ty: RType,
    pub line: i32,
    pub kind: ValueKind,
}

impl Value {
    pub fn is_register(&self) -> bool {
        matches!(self.kind, ValueKind::Register(_))
    }

    /// Integer and string constants carry no state worth tracking
    pub fn is_constant(&self) -> bool {
        matches!(self.kind, ValueKind::Integer(_) | ValueKind::CString(_))
    }

    pub fn is_void(&self) -> bool {
        self.ty.is_void()
    }

    pub fn as_register(&self) -> Option<&Register> {
        match &self.kind {
            ValueKind::Register(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_op(&self) -> Option<&OpData> {
        match &self.kind {
            ValueKind::Op(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_op_mut(&mut self) -> Option<&mut OpData> {
        match &mut self.kind {
            ValueKind::Op(data) => Some(data),
            _ => None,
        }
    }

    /// Borrowed values must not be decref'd by their holder
    pub fn is_borrowed(&self) -> bool {
        match &self.kind {
            ValueKind::Register(r) => r.is_borrowed,
            ValueKind::Op(data) => data.is_borrowed,
            ValueKind::Integer(_) | ValueKind::CString(_) => false,
        }
    }
}

/// (block, op index) key used by analysis results
pub type OpKey = (BlockId, usize);
