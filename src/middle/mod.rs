//! 中间层：类型模型、IR、数据流分析与变换
//!
//! 前端构造的 IR 在这里经过分析与变换，交给后端生成 C 代码。

pub mod analysis;
pub mod error;
pub mod ir;
pub mod passes;
pub mod pipeline;
pub mod primitives;
pub mod types;

#[cfg(test)]
pub mod test_utils;

pub use error::{CompileError, CompileResult};
pub use ir::{ClassIR, FuncIR, ModuleIR, Program};
pub use pipeline::{compile_program, PassStats};
pub use types::RType;
