//! 工具模块
//!
//! - `log`: 条件编译日志宏
//! - `table`: 编译期静态表排序

pub mod log;
pub mod table;
