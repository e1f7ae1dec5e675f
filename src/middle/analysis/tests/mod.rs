//! 分析模块单元测试

mod defined;
