//! 变换阶段单元测试

mod lower;
mod uninit;
