//! Low-level IR builder
//!
//! Appends ops to the current block of a function. Used by the front-end
//! collaborator, by passes that synthesize code, and by lowering rewrites.

use super::{
    AddressSource, BlockId, BranchOp, ClassId, CmpOp, ErrorKind, FuncIR, FuncId, IntOpKind,
    Literal, Op, OpData, ValueId, ValueKind,
};
use crate::middle::primitives::{self, PrimitiveDescription};
use crate::middle::types::{RStruct, RType};

pub struct IrBuilder<'f> {
    func: &'f mut FuncIR,
    current: BlockId,
    /// Error handler given to blocks activated from now on
    error_handler: Option<BlockId>,
}

impl<'f> IrBuilder<'f> {
    /// Start building at the end of the layout, creating an entry block if needed
    pub fn new(func: &'f mut FuncIR) -> Self {
        let current = match func.layout.last() {
            Some(&block) => block,
            None => {
                let block = func.new_block();
                func.layout.push(block);
                block
            }
        };
        IrBuilder {
            func,
            current,
            error_handler: None,
        }
    }

    pub fn func(&self) -> &FuncIR {
        self.func
    }

    pub fn func_mut(&mut self) -> &mut FuncIR {
        self.func
    }

    pub fn current_block(&self) -> BlockId {
        self.current
    }

    pub fn set_error_handler(
        &mut self,
        handler: Option<BlockId>,
    ) {
        self.error_handler = handler;
    }

    // ==================== 基本块 ====================

    pub fn new_block(&mut self) -> BlockId {
        self.func.new_block()
    }

    /// Make `block` current, appending it to the layout on first activation
    pub fn activate_block(
        &mut self,
        block: BlockId,
    ) {
        if !self.func.layout.contains(&block) {
            self.func.layout.push(block);
        }
        if self.func.block(block).error_handler.is_none() {
            self.func.block_mut(block).error_handler = self.error_handler;
        }
        self.current = block;
    }

    pub fn is_terminated(&self) -> bool {
        self.func.terminator(self.current).is_some()
    }

    // ==================== 通用 ====================

    pub fn add(
        &mut self,
        op: Op,
        ty: RType,
        line: i32,
    ) -> ValueId {
        let error_kind = op.default_error_kind();
        self.add_with(op, ty, error_kind, false, line)
    }

    pub fn add_with(
        &mut self,
        op: Op,
        ty: RType,
        error_kind: ErrorKind,
        is_borrowed: bool,
        line: i32,
    ) -> ValueId {
        let id = self.func.new_op(op, ty, error_kind, line);
        if is_borrowed {
            if let ValueKind::Op(OpData { is_borrowed, .. }) = &mut self.func.value_mut(id).kind {
                *is_borrowed = true;
            }
        }
        self.func.push_op(self.current, id);
        id
    }

    /// Append an existing op value to the current block
    pub fn push_existing(
        &mut self,
        op: ValueId,
    ) {
        self.func.push_op(self.current, op);
    }

    pub fn new_register(
        &mut self,
        name: &str,
        ty: RType,
        line: i32,
    ) -> ValueId {
        self.func.new_register(name, ty, line)
    }

    pub fn integer(
        &mut self,
        value: i64,
        ty: RType,
        line: i32,
    ) -> ValueId {
        self.func.integer(value, ty, line)
    }

    // ==================== 控制流 ====================

    pub fn goto(
        &mut self,
        target: BlockId,
    ) {
        if !self.is_terminated() {
            self.add(Op::Goto { label: target }, RType::Void, -1);
        }
    }

    pub fn goto_and_activate(
        &mut self,
        target: BlockId,
    ) {
        self.goto(target);
        self.activate_block(target);
    }

    pub fn branch(
        &mut self,
        value: ValueId,
        true_label: BlockId,
        false_label: BlockId,
        op: BranchOp,
        line: i32,
    ) -> ValueId {
        self.add(
            Op::Branch {
                value,
                true_label,
                false_label,
                op,
                negated: false,
                rare: false,
                traceback_entry: None,
            },
            RType::Void,
            line,
        )
    }

    pub fn ret(
        &mut self,
        value: ValueId,
        line: i32,
    ) {
        self.add(Op::Return { value }, RType::Void, line);
    }

    pub fn unreachable(&mut self) {
        self.add(Op::Unreachable, RType::Void, -1);
    }

    // ==================== 寄存器 ====================

    pub fn assign(
        &mut self,
        dest: ValueId,
        src: ValueId,
        line: i32,
    ) {
        self.add(Op::Assign { dest, src }, RType::Void, line);
    }

    pub fn load_error_value(
        &mut self,
        ty: RType,
        undefines: bool,
        line: i32,
    ) -> ValueId {
        self.add(Op::LoadErrorValue { undefines }, ty, line)
    }

    /// Literals live in a module-wide table; the loaded reference is borrowed
    pub fn load_literal(
        &mut self,
        value: Literal,
        ty: RType,
        line: i32,
    ) -> ValueId {
        self.add_with(Op::LoadLiteral { value }, ty, ErrorKind::Never, true, line)
    }

    // ==================== 对象 ====================

    pub fn get_attr(
        &mut self,
        obj: ValueId,
        class: ClassId,
        attr: &str,
        ty: RType,
        line: i32,
    ) -> ValueId {
        self.add(
            Op::GetAttr {
                obj,
                attr: attr.to_string(),
                class,
            },
            ty,
            line,
        )
    }

    pub fn set_attr(
        &mut self,
        obj: ValueId,
        class: ClassId,
        attr: &str,
        src: ValueId,
        line: i32,
    ) -> ValueId {
        self.add(
            Op::SetAttr {
                obj,
                attr: attr.to_string(),
                src,
                class,
                is_init: false,
            },
            RType::Void,
            line,
        )
    }

    pub fn call(
        &mut self,
        func: FuncId,
        args: Vec<ValueId>,
        ret_type: RType,
        line: i32,
    ) -> ValueId {
        self.add(Op::Call { func, args }, ret_type, line)
    }

    pub fn method_call(
        &mut self,
        obj: ValueId,
        class: ClassId,
        method: &str,
        args: Vec<ValueId>,
        ret_type: RType,
        line: i32,
    ) -> ValueId {
        self.add(
            Op::MethodCall {
                obj,
                method: method.to_string(),
                class,
                args,
            },
            ret_type,
            line,
        )
    }

    /// Call a C function described in the primitive table
    pub fn call_c(
        &mut self,
        desc: &PrimitiveDescription,
        args: Vec<ValueId>,
        line: i32,
    ) -> ValueId {
        let op = Op::CallC {
            function_name: desc.c_function_name.unwrap_or(desc.name).to_string(),
            args,
            steals: desc.steals.clone(),
        };
        self.add_with(op, desc.return_type.clone(), desc.error_kind, desc.is_borrowed, line)
    }

    pub fn primitive_op(
        &mut self,
        desc: &PrimitiveDescription,
        args: Vec<ValueId>,
        line: i32,
    ) -> ValueId {
        let op = Op::PrimitiveOp {
            name: desc.name.to_string(),
            args,
            steals: desc.steals.clone(),
            c_function_name: desc.c_function_name.map(str::to_string),
        };
        self.add_with(op, desc.return_type.clone(), desc.error_kind, desc.is_borrowed, line)
    }

    pub fn box_value(
        &mut self,
        src: ValueId,
        line: i32,
    ) -> ValueId {
        self.add(Op::Box { src }, RType::object(), line)
    }

    pub fn unbox(
        &mut self,
        src: ValueId,
        ty: RType,
        line: i32,
    ) -> ValueId {
        self.add(Op::Unbox { src }, ty, line)
    }

    pub fn cast(
        &mut self,
        src: ValueId,
        ty: RType,
        line: i32,
    ) -> ValueId {
        self.add(Op::Cast { src }, ty, line)
    }

    pub fn tuple_set(
        &mut self,
        items: Vec<ValueId>,
        line: i32,
    ) -> ValueId {
        let ty = RType::tuple(items.iter().map(|&v| self.func.ty(v).clone()).collect());
        self.add(Op::TupleSet { items }, ty, line)
    }

    pub fn tuple_get(
        &mut self,
        src: ValueId,
        index: usize,
        line: i32,
    ) -> ValueId {
        let ty = match self.func.ty(src) {
            RType::Tuple(t) => t.types.get(index).cloned().unwrap_or(RType::object()),
            _ => RType::object(),
        };
        self.add(Op::TupleGet { src, index }, ty, line)
    }

    pub fn raise_standard_error(
        &mut self,
        class_name: &str,
        message: Option<String>,
        line: i32,
    ) -> ValueId {
        self.add(
            Op::RaiseStandardError {
                class_name: class_name.to_string(),
                message,
            },
            RType::bool(),
            line,
        )
    }

    // ==================== 底层操作 ====================

    pub fn int_op(
        &mut self,
        ty: RType,
        lhs: ValueId,
        rhs: ValueId,
        op: IntOpKind,
        line: i32,
    ) -> ValueId {
        self.add(Op::IntOp { lhs, rhs, op }, ty, line)
    }

    pub fn comparison_op(
        &mut self,
        lhs: ValueId,
        rhs: ValueId,
        op: CmpOp,
        line: i32,
    ) -> ValueId {
        self.add(Op::ComparisonOp { lhs, rhs, op }, RType::bit(), line)
    }

    pub fn load_mem(
        &mut self,
        src: ValueId,
        ty: RType,
        line: i32,
    ) -> ValueId {
        self.add(Op::LoadMem { src }, ty, line)
    }

    pub fn set_mem(
        &mut self,
        dest_type: RType,
        dest: ValueId,
        src: ValueId,
        line: i32,
    ) {
        self.add(
            Op::SetMem {
                dest_type,
                dest,
                src,
            },
            RType::Void,
            line,
        );
    }

    pub fn get_element_ptr(
        &mut self,
        src: ValueId,
        src_type: RStruct,
        field: &str,
        line: i32,
    ) -> ValueId {
        self.add(
            Op::GetElementPtr {
                src,
                src_type,
                field: field.to_string(),
            },
            RType::pointer(),
            line,
        )
    }

    pub fn load_address(
        &mut self,
        src: AddressSource,
        ty: RType,
        line: i32,
    ) -> ValueId {
        self.add(Op::LoadAddress { src }, ty, line)
    }

    /// Check whether a tagged integer is short; returns a `bit`
    pub fn check_tagged_short_int(
        &mut self,
        value: ValueId,
        line: i32,
        negated: bool,
    ) -> ValueId {
        let int_tag = self.integer(1, RType::c_ssize_t(), line);
        let bitwise_and = self.int_op(RType::c_ssize_t(), value, int_tag, IntOpKind::And, line);
        let zero = self.integer(0, RType::c_ssize_t(), line);
        let op = if negated { CmpOp::Neq } else { CmpOp::Eq };
        self.comparison_op(bitwise_and, zero, op, line)
    }

    /// Compare two tagged integers with a fast path for short values
    ///
    /// The slow path calls into the runtime; both paths assign one bool
    /// register that becomes the result.
    pub fn compare_tagged(
        &mut self,
        lhs: ValueId,
        rhs: ValueId,
        op: &str,
        line: i32,
    ) -> ValueId {
        let (cmp, c_func, negate, swap) = match op {
            "==" => (CmpOp::Eq, "int_equal_", false, false),
            "!=" => (CmpOp::Neq, "int_equal_", true, false),
            "<" => (CmpOp::Slt, "int_less_than_", false, false),
            "<=" => (CmpOp::Sle, "int_less_than_", true, true),
            ">" => (CmpOp::Sgt, "int_less_than_", false, true),
            _ => (CmpOp::Sge, "int_less_than_", true, false),
        };
        let short_lhs = self.func.ty(lhs).is_prim(crate::middle::types::Prim::ShortInt);
        let short_rhs = self.func.ty(rhs).is_prim(crate::middle::types::Prim::ShortInt);
        if (short_lhs || short_rhs) && matches!(cmp, CmpOp::Eq | CmpOp::Neq) {
            return self.comparison_op(lhs, rhs, cmp, line);
        }

        let result = self.new_register("cmp", RType::bool(), line);
        let short_int_block = self.new_block();
        let int_block = self.new_block();
        let out = self.new_block();

        let check_lhs = self.check_tagged_short_int(lhs, line, true);
        if matches!(cmp, CmpOp::Eq | CmpOp::Neq) {
            self.branch(check_lhs, int_block, short_int_block, BranchOp::Bool, line);
        } else {
            // 非相等比较需要同时检查两侧
            let short_lhs_block = self.new_block();
            self.branch(check_lhs, int_block, short_lhs_block, BranchOp::Bool, line);
            self.activate_block(short_lhs_block);
            let check_rhs = self.check_tagged_short_int(rhs, line, true);
            self.branch(check_rhs, int_block, short_int_block, BranchOp::Bool, line);
        }

        self.activate_block(int_block);
        let args = if swap { vec![rhs, lhs] } else { vec![lhs, rhs] };
        let desc = primitives::c_function(c_func).cloned();
        let call = match desc {
            Some(desc) => self.call_c(&desc, args, line),
            None => self.comparison_op(lhs, rhs, cmp, line),
        };
        let call_result = if negate {
            let one = self.integer(1, RType::bit(), line);
            self.int_op(RType::bit(), call, one, IntOpKind::Xor, line)
        } else {
            call
        };
        self.assign(result, call_result, line);
        self.goto(out);

        self.activate_block(short_int_block);
        let eq = self.comparison_op(lhs, rhs, cmp, line);
        self.assign(result, eq, line);
        self.goto_and_activate(out);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middle::ir::{ArgKind, FuncDecl, FuncSignature, RuntimeArg};

    fn int_func() -> FuncIR {
        let sig = FuncSignature::new(
            vec![
                RuntimeArg::new("a", RType::int(), ArgKind::Pos),
                RuntimeArg::new("b", RType::int(), ArgKind::Pos),
            ],
            RType::bool(),
        );
        FuncIR::new(FuncDecl::new("f", "m", sig), 1)
    }

    #[test]
    fn test_builder_creates_entry_block() {
        let mut func = int_func();
        let mut builder = IrBuilder::new(&mut func);
        let a = builder.func().arg_regs[0];
        builder.ret(a, 1);
        assert_eq!(func.layout.len(), 1);
        assert!(func.terminator(func.layout[0]).is_some());
    }

    #[test]
    fn test_goto_not_added_after_terminator() {
        let mut func = int_func();
        let mut builder = IrBuilder::new(&mut func);
        let target = builder.new_block();
        builder.unreachable();
        builder.goto(target);
        let entry = func.layout[0];
        assert_eq!(func.block(entry).ops.len(), 1);
    }

    #[test]
    fn test_compare_tagged_adds_fast_and_slow_paths() {
        let mut func = int_func();
        let mut builder = IrBuilder::new(&mut func);
        let (a, b) = (builder.func().arg_regs[0], builder.func().arg_regs[1]);
        let result = builder.compare_tagged(a, b, "<", 1);
        builder.ret(result, 1);
        // entry, short_lhs, int, short_int, out
        assert_eq!(func.layout.len(), 5);
        assert!(func.is_register(result));
        let calls = func
            .ops()
            .filter(|(_, _, _, op)| matches!(op, Op::CallC { function_name, .. } if function_name == "CPyTagged_IsLt_"))
            .count();
        assert_eq!(calls, 1);
    }
}
