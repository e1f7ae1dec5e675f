//! 中间层变换
//!
//! 每个函数依次经过：未初始化检查、异常检查、引用计数、降级。
//! vtable 计算是类级别的，在所有函数变换之前完成。

pub mod exceptions;
pub mod lower;
pub mod refcount;
pub mod uninit;
pub mod vtable;

#[cfg(test)]
mod tests;

pub use exceptions::insert_exception_handling;
pub use lower::lower_ir;
pub use refcount::insert_ref_count_opcodes;
pub use uninit::insert_uninit_checks;
pub use vtable::compute_vtables;
