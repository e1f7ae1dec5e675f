//! IR pretty printer
//!
//! Text form used by `tycc dump`, by verifier error dumps and in tests.

use std::collections::HashMap;
use std::fmt::Write;

use super::{AddressSource, BlockId, BranchOp, FuncIR, Op, Program, ValueId, ValueKind};

/// Assign display names: registers keep their own (deduplicated), non-void ops get `rN`
pub fn generate_names(func: &FuncIR) -> HashMap<ValueId, String> {
    let mut names = HashMap::new();
    let mut used: HashMap<String, usize> = HashMap::new();
    let mut temp = 0usize;

    for (idx, value) in func.values.iter().enumerate() {
        let id = ValueId(idx as u32);
        let name = match &value.kind {
            ValueKind::Register(reg) => {
                let count = used.entry(reg.name.clone()).or_insert(0);
                *count += 1;
                if *count == 1 {
                    reg.name.clone()
                } else {
                    format!("{}_{}", reg.name, count)
                }
            }
            ValueKind::Integer(v) => v.to_string(),
            ValueKind::CString(bytes) => format!("{:?}", String::from_utf8_lossy(bytes)),
            ValueKind::Op(_) => {
                if value.is_void() {
                    continue;
                }
                let name = format!("r{}", temp);
                temp += 1;
                name
            }
        };
        names.insert(id, name);
    }
    names
}

fn label(block: BlockId) -> String {
    format!("L{}", block.0)
}

struct Printer<'a> {
    func: &'a FuncIR,
    program: Option<&'a Program>,
    names: HashMap<ValueId, String>,
}

impl<'a> Printer<'a> {
    fn n(
        &self,
        id: ValueId,
    ) -> String {
        self.names
            .get(&id)
            .cloned()
            .unwrap_or_else(|| format!("<v{}>", id.0))
    }

    fn list(
        &self,
        ids: &[ValueId],
    ) -> String {
        ids.iter().map(|&v| self.n(v)).collect::<Vec<_>>().join(", ")
    }

    fn class_name(
        &self,
        class: super::ClassId,
    ) -> String {
        match self.program {
            Some(p) if class.index() < p.classes.len() => p.class(class).name.clone(),
            _ => format!("class{}", class.0),
        }
    }

    fn format_op(
        &self,
        id: ValueId,
        op: &Op,
    ) -> String {
        let body = match op {
            Op::Goto { label: target } => format!("goto {}", label(*target)),
            Op::Branch {
                value,
                true_label,
                false_label,
                op,
                negated,
                rare,
                ..
            } => {
                let cond = match op {
                    BranchOp::Bool => self.n(*value),
                    BranchOp::IsError => format!("is_error({})", self.n(*value)),
                };
                let cond = if *negated { format!("not {}", cond) } else { cond };
                let rare = if *rare { " (rare)" } else { "" };
                format!(
                    "if {} goto {}{} else goto {}",
                    cond,
                    label(*true_label),
                    rare,
                    label(*false_label)
                )
            }
            Op::Return { value } => format!("return {}", self.n(*value)),
            Op::Unreachable => "unreachable".to_string(),
            Op::Assign { dest, src } => return format!("{} = {}", self.n(*dest), self.n(*src)),
            Op::LoadErrorValue { .. } => format!("<error> :: {}", self.func.ty(id)),
            Op::LoadLiteral { value } => format!("{:?}", value),
            Op::GetAttr { obj, attr, .. } => format!("{}.{}", self.n(*obj), attr),
            Op::SetAttr {
                obj, attr, src, is_init, ..
            } => {
                let init = if *is_init { "; init" } else { "" };
                format!("{}.{} = {}{}", self.n(*obj), attr, self.n(*src), init)
            }
            Op::LoadStatic {
                identifier,
                module_name,
                namespace,
            } => match module_name {
                Some(m) => format!("{}{}.{} :: static", namespace.prefix(), m, identifier),
                None => format!("{}{} :: static", namespace.prefix(), identifier),
            },
            Op::InitStatic {
                value, identifier, ..
            } => format!("{} = {} :: static", identifier, self.n(*value)),
            Op::LoadGlobal { identifier } => format!("load_global {}", identifier),
            Op::TupleSet { items } => format!("({})", self.list(items)),
            Op::TupleGet { src, index } => format!("{}[{}]", self.n(*src), index),
            Op::Cast { src } => format!("cast({}, {})", self.func.ty(id), self.n(*src)),
            Op::Box { src } => format!("box({}, {})", self.func.ty(*src), self.n(*src)),
            Op::Unbox { src } => format!("unbox({}, {})", self.func.ty(id), self.n(*src)),
            Op::Truncate { src } => format!("truncate {}: {} to {}", self.n(*src), self.func.ty(*src), self.func.ty(id)),
            Op::Extend { src, signed } => {
                let kind = if *signed { "signed" } else { "unsigned" };
                format!("extend {} {}: {} to {}", kind, self.n(*src), self.func.ty(*src), self.func.ty(id))
            }
            Op::Unborrow { src } => format!("unborrow {}", self.n(*src)),
            Op::Call { func, args } => {
                let callee = match self.program {
                    Some(p) if func.index() < p.functions.len() => p.func(*func).decl.shortname(),
                    _ => format!("func{}", func.0),
                };
                format!("{}({})", callee, self.list(args))
            }
            Op::MethodCall {
                obj,
                class,
                method,
                args,
            } => format!("{}.{}({}) :: {}", self.n(*obj), method, self.list(args), self.class_name(*class)),
            Op::CallC {
                function_name, args, ..
            } => format!("{}({})", function_name, self.list(args)),
            Op::PrimitiveOp { name, args, .. } => format!("{} {}", name, self.list(args)),
            Op::RaiseStandardError {
                class_name,
                message,
            } => match message {
                Some(msg) => format!("raise {}({:?})", class_name, msg),
                None => format!("raise {}", class_name),
            },
            Op::IntOp { lhs, rhs, op } => format!("{} {} {}", self.n(*lhs), op.symbol(), self.n(*rhs)),
            Op::ComparisonOp { lhs, rhs, op } => {
                let sign = if op.is_signed() {
                    " :: signed"
                } else if op.is_unsigned() {
                    " :: unsigned"
                } else {
                    ""
                };
                format!("{} {} {}{}", self.n(*lhs), op.symbol(), self.n(*rhs), sign)
            }
            Op::LoadMem { src } => format!("load_mem {} :: {}*", self.n(*src), self.func.ty(id)),
            Op::SetMem { dest_type, dest, src } => {
                format!("set_mem {}, {} :: {}*", self.n(*dest), self.n(*src), dest_type)
            }
            Op::GetElementPtr { src, src_type, field } => {
                format!("get_element_ptr {} {} :: {}", self.n(*src), field, src_type.name)
            }
            Op::LoadAddress { src } => match src {
                AddressSource::Symbol(sym) => format!("load_address {}", sym),
                AddressSource::Register(reg) => format!("load_address {}", self.n(*reg)),
            },
            Op::KeepAlive { srcs, steal } => {
                let steal = if *steal { ", steal" } else { "" };
                format!("keep_alive {}{}", self.list(srcs), steal)
            }
            Op::IncRef { src } => format!("inc_ref {}", self.n(*src)),
            Op::DecRef { src, is_xdec } => {
                let x = if *is_xdec { "x" } else { "" };
                format!("{}dec_ref {}", x, self.n(*src))
            }
        };
        match self.names.get(&id) {
            Some(name) if !self.func.value(id).is_void() && !op.is_control() => {
                format!("{} = {}", name, body)
            }
            _ => body,
        }
    }
}

/// Render one function; `program` resolves callee and class names when given
pub fn format_func(
    func: &FuncIR,
    program: Option<&Program>,
) -> String {
    let printer = Printer {
        func,
        program,
        names: generate_names(func),
    };
    let mut out = String::new();
    let args: Vec<String> = func.arg_regs.iter().map(|&a| printer.n(a)).collect();
    let _ = writeln!(out, "def {}({}):", func.decl.shortname(), args.join(", "));

    // 声明：寄存器与非 void op
    for (idx, value) in func.values.iter().enumerate() {
        let id = ValueId(idx as u32);
        let declared = match &value.kind {
            ValueKind::Register(_) => true,
            ValueKind::Op(_) => !value.is_void(),
            ValueKind::Integer(_) | ValueKind::CString(_) => false,
        };
        if declared {
            let _ = writeln!(out, "    {} :: {}", printer.n(id), value.ty);
        }
    }

    for &block in &func.layout {
        let handler = match func.block(block).error_handler {
            Some(h) => format!(" (error at {})", label(h)),
            None => String::new(),
        };
        let _ = writeln!(out, "{}:{}", label(block), handler);
        for &op_id in &func.block(block).ops {
            if let Some(op) = func.op(op_id) {
                let _ = writeln!(out, "    {}", printer.format_op(op_id, op));
            }
        }
    }
    out
}

/// Render a whole program, module by module
pub fn format_program(program: &Program) -> String {
    let mut out = String::new();
    for module in &program.modules {
        let _ = writeln!(out, "# module {}", module.fullname);
        for &class in &module.classes {
            let cls = program.class(class);
            let _ = writeln!(out, "class {}:", cls.name);
            for (name, ty) in &cls.attributes {
                let _ = writeln!(out, "    {}: {}", name, ty);
            }
            for &method in cls.methods.values() {
                out.push_str(&format_func(program.func(method), Some(program)));
            }
        }
        for &func in &module.functions {
            out.push_str(&format_func(program.func(func), Some(program)));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middle::ir::{ArgKind, FuncDecl, FuncSignature, IrBuilder, RuntimeArg};
    use crate::middle::primitives;
    use crate::middle::types::RType;

    #[test]
    fn test_format_simple_function() {
        let sig = FuncSignature::new(vec![RuntimeArg::new("x", RType::int(), ArgKind::Pos)], RType::int());
        let mut func = FuncIR::new(FuncDecl::new("f", "m", sig), 1);
        let mut builder = IrBuilder::new(&mut func);
        let x = builder.func().arg_regs[0];
        let y = builder.new_register("y", RType::int(), 1);
        let one = builder.integer(1, RType::short_int(), 1);
        let desc = primitives::primitive_op("int_add").unwrap().clone();
        let sum = builder.primitive_op(&desc, vec![x, one], 1);
        builder.assign(y, sum, 1);
        builder.ret(y, 1);

        let text = format_func(&func, None);
        assert!(text.starts_with("def f(x):"));
        assert!(text.contains("    y :: int"));
        assert!(text.contains("r0 = int_add x, 1"));
        assert!(text.contains("y = r0"));
        assert!(text.contains("return y"));
    }

    #[test]
    fn test_method_call_names_class() {
        let mut program = Program::new();
        program.add_module("m");
        let class = program.add_class("Shape", "m");
        let self_type = RType::instance(class, "Shape");
        let sig = FuncSignature::new(vec![RuntimeArg::new("s", self_type, ArgKind::Pos)], RType::int());
        let mut func = FuncIR::new(FuncDecl::new("area_of", "m", sig), 1);
        let mut builder = IrBuilder::new(&mut func);
        let s = builder.func().arg_regs[0];
        let area = builder.method_call(s, class, "area", vec![], RType::int(), 1);
        builder.ret(area, 1);

        assert!(format_func(&func, Some(&program)).contains("r0 = s.area() :: Shape"));
        // 没有程序时退回类编号
        assert!(format_func(&func, None).contains(&format!("s.area() :: class{}", class.0)));
    }

    #[test]
    fn test_duplicate_register_names() {
        let sig = FuncSignature::new(vec![], RType::none());
        let mut func = FuncIR::new(FuncDecl::new("g", "m", sig), 1);
        let a = func.new_register("a", RType::int(), 1);
        let b = func.new_register("a", RType::int(), 1);
        let names = generate_names(&func);
        assert_eq!(names[&a], "a");
        assert_eq!(names[&b], "a_2");
    }
}
