//! 任务模块
//!
//! 核心本身不创建任务; 固件用 `#[embassy_executor::task]` 包装这些循环:
//! - `hooks`: 钩子任务 (延迟调用 + 周期钩子)
//! - `console`: 控制台任务 (行编辑 + 命令执行)

pub mod console;
pub mod hooks;

pub use console::{console_task, ConsoleService, LineEditor};
pub use hooks::{hook_task, HookScheduler};
