//! Function IR
//!
//! `FuncIR` owns its value arena and block arena. Blocks removed from the
//! layout stay allocated so that handles held by earlier analysis results never
//! dangle.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::{BlockId, ClassId, ErrorKind, Op, OpData, Register, Value, ValueId, ValueKind};
use crate::middle::types::RType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArgKind {
    /// Required positional
    Pos,
    /// Optional positional; the native callee receives the error value when omitted
    Opt,
    /// Required keyword-only
    Named,
    /// Optional keyword-only
    NamedOpt,
}

impl ArgKind {
    pub fn is_optional(self) -> bool {
        matches!(self, ArgKind::Opt | ArgKind::NamedOpt)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeArg {
    pub name: String,
    pub ty: RType,
    pub kind: ArgKind,
}

impl RuntimeArg {
    pub fn new(
        name: &str,
        ty: RType,
        kind: ArgKind,
    ) -> Self {
        RuntimeArg {
            name: name.to_string(),
            ty,
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuncSignature {
    pub args: Vec<RuntimeArg>,
    pub ret_type: RType,
}

impl FuncSignature {
    pub fn new(
        args: Vec<RuntimeArg>,
        ret_type: RType,
    ) -> Self {
        FuncSignature { args, ret_type }
    }

    /// Same argument kinds and types, used for vtable specialization
    pub fn is_compatible(
        &self,
        other: &FuncSignature,
    ) -> bool {
        self.ret_type == other.ret_type
            && self.args.len() == other.args.len()
            && self
                .args
                .iter()
                .zip(other.args.iter())
                .skip(1)
                .all(|(a, b)| a.ty == b.ty && a.kind == b.kind)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuncDecl {
    pub name: String,
    pub module_name: String,
    /// Defining class for methods
    pub class: Option<ClassId>,
    pub class_name: Option<String>,
    pub sig: FuncSignature,
}

impl FuncDecl {
    pub fn new(
        name: &str,
        module_name: &str,
        sig: FuncSignature,
    ) -> Self {
        FuncDecl {
            name: name.to_string(),
            module_name: module_name.to_string(),
            class: None,
            class_name: None,
            sig,
        }
    }

    pub fn method(
        name: &str,
        module_name: &str,
        class: ClassId,
        class_name: &str,
        sig: FuncSignature,
    ) -> Self {
        FuncDecl {
            name: name.to_string(),
            module_name: module_name.to_string(),
            class: Some(class),
            class_name: Some(class_name.to_string()),
            sig,
        }
    }

    /// Name without module, e.g. `C.f` or `f`
    pub fn shortname(&self) -> String {
        match &self.class_name {
            Some(class_name) => format!("{}.{}", class_name, self.name),
            None => self.name.clone(),
        }
    }

    pub fn fullname(&self) -> String {
        format!("{}.{}", self.module_name, self.shortname())
    }

    pub fn is_method(&self) -> bool {
        self.class.is_some()
    }
}

/// Basic block: an ordered op list, terminated by a control op
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BasicBlock {
    pub ops: Vec<ValueId>,
    /// Where control goes when an op in this block raises
    pub error_handler: Option<BlockId>,
}

/// Function IR
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuncIR {
    pub decl: FuncDecl,
    pub arg_regs: Vec<ValueId>,
    pub values: Vec<Value>,
    pub blocks: Vec<BasicBlock>,
    /// Block order; the first block is the entry
    pub layout: Vec<BlockId>,
    pub line: i32,
}

impl FuncIR {
    /// Create a function with argument registers for every declared argument
    pub fn new(
        decl: FuncDecl,
        line: i32,
    ) -> Self {
        let mut func = FuncIR {
            decl,
            arg_regs: Vec::new(),
            values: Vec::new(),
            blocks: Vec::new(),
            layout: Vec::new(),
            line,
        };
        let args = func.decl.sig.args.clone();
        for arg in args {
            let reg = func.add_value(Value {
                ty: arg.ty.clone(),
                line,
                kind: ValueKind::Register(Register {
                    name: arg.name.clone(),
                    is_arg: true,
                    is_borrowed: true,
                }),
            });
            func.arg_regs.push(reg);
        }
        func
    }

    pub fn name(&self) -> &str {
        &self.decl.name
    }

    pub fn ret_type(&self) -> &RType {
        &self.decl.sig.ret_type
    }

    /// Name used in tracebacks
    pub fn traceback_name(&self) -> String {
        self.decl.shortname()
    }

    // ==================== 值 ====================

    pub fn add_value(
        &mut self,
        value: Value,
    ) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(value);
        id
    }

    pub fn value(
        &self,
        id: ValueId,
    ) -> &Value {
        &self.values[id.index()]
    }

    pub fn value_mut(
        &mut self,
        id: ValueId,
    ) -> &mut Value {
        &mut self.values[id.index()]
    }

    pub fn ty(
        &self,
        id: ValueId,
    ) -> &RType {
        &self.values[id.index()].ty
    }

    /// New local register
    pub fn new_register(
        &mut self,
        name: &str,
        ty: RType,
        line: i32,
    ) -> ValueId {
        self.add_value(Value {
            ty,
            line,
            kind: ValueKind::Register(Register {
                name: name.to_string(),
                is_arg: false,
                is_borrowed: false,
            }),
        })
    }

    pub fn integer(
        &mut self,
        value: i64,
        ty: RType,
        line: i32,
    ) -> ValueId {
        self.add_value(Value {
            ty,
            line,
            kind: ValueKind::Integer(value),
        })
    }

    /// Allocate an op value without placing it in a block
    pub fn new_op(
        &mut self,
        op: Op,
        ty: RType,
        error_kind: ErrorKind,
        line: i32,
    ) -> ValueId {
        self.add_value(Value {
            ty,
            line,
            kind: ValueKind::Op(OpData {
                op,
                error_kind,
                is_borrowed: false,
            }),
        })
    }

    pub fn op(
        &self,
        id: ValueId,
    ) -> Option<&Op> {
        self.values[id.index()].as_op().map(|data| &data.op)
    }

    pub fn op_mut(
        &mut self,
        id: ValueId,
    ) -> Option<&mut Op> {
        self.values[id.index()].as_op_mut().map(|data| &mut data.op)
    }

    pub fn op_data(
        &self,
        id: ValueId,
    ) -> Option<&OpData> {
        self.values[id.index()].as_op()
    }

    pub fn error_kind(
        &self,
        id: ValueId,
    ) -> ErrorKind {
        self.op_data(id).map(|d| d.error_kind).unwrap_or_default()
    }

    pub fn is_register(
        &self,
        id: ValueId,
    ) -> bool {
        self.values[id.index()].is_register()
    }

    /// Display name of a register (used in runtime messages)
    pub fn register_name(
        &self,
        id: ValueId,
    ) -> Option<&str> {
        self.values[id.index()].as_register().map(|r| r.name.as_str())
    }

    /// All registers: arguments first, then locals in arena order
    pub fn registers(&self) -> BTreeSet<ValueId> {
        self.values
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_register())
            .map(|(i, _)| ValueId(i as u32))
            .collect()
    }

    // ==================== 基本块 ====================

    /// Allocate a block without adding it to the layout
    pub fn new_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(BasicBlock::default());
        id
    }

    pub fn block(
        &self,
        id: BlockId,
    ) -> &BasicBlock {
        &self.blocks[id.index()]
    }

    pub fn block_mut(
        &mut self,
        id: BlockId,
    ) -> &mut BasicBlock {
        &mut self.blocks[id.index()]
    }

    pub fn entry(&self) -> Option<BlockId> {
        self.layout.first().copied()
    }

    /// Last op of a block, if it is a control op
    pub fn terminator(
        &self,
        block: BlockId,
    ) -> Option<&Op> {
        let last = *self.block(block).ops.last()?;
        self.op(last).filter(|op| op.is_control())
    }

    pub fn terminator_mut(
        &mut self,
        block: BlockId,
    ) -> Option<&mut Op> {
        let last = *self.block(block).ops.last()?;
        self.op_mut(last).filter(|op| op.is_control())
    }

    /// Append an op value to a block
    pub fn push_op(
        &mut self,
        block: BlockId,
        op: ValueId,
    ) {
        self.blocks[block.index()].ops.push(op);
    }

    /// Iterate (block, index, op id, op) in layout order
    pub fn ops(&self) -> impl Iterator<Item = (BlockId, usize, ValueId, &Op)> + '_ {
        self.layout.iter().flat_map(move |&block| {
            self.block(block)
                .ops
                .iter()
                .enumerate()
                .filter_map(move |(idx, &id)| self.op(id).map(|op| (block, idx, id, op)))
        })
    }

    pub fn op_count(&self) -> usize {
        self.layout.iter().map(|b| self.block(*b).ops.len()).sum()
    }
}
