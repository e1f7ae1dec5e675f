//! 数据流分析
//!
//! 控制流图、通用求解器，以及建立在其上的各项分析：
//! 寄存器定义、活跃性、借用参数、任意代码执行（self 泄漏）与属性总是已定义。

pub mod attr_defined;
pub mod borrowed;
pub mod cfg;
pub mod dataflow;
pub mod defined;
pub mod liveness;
pub mod self_leaks;

#[cfg(test)]
mod tests;

pub use attr_defined::analyze_always_defined_attrs;
pub use borrowed::analyze_borrowed_arguments;
pub use cfg::{cleanup_cfg, Cfg};
pub use dataflow::{
    run_analysis, run_analysis_with_observer, AnalysisKind, AnalysisResult, GenKill, OpVisitor,
};
pub use defined::{analyze_maybe_defined_regs, analyze_must_defined_regs};
pub use liveness::analyze_live_regs;
pub use self_leaks::analyze_self_leaks;
