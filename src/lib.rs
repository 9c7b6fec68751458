//! ecdispatch - 嵌入式控制器事件/分发核心
//!
//! 本库提供以下核心功能:
//! - 单生产者单消费者 (SPSC) 有界队列, 带生产者/消费者通知
//! - 延迟调用调度器 (中断上下文 → 任务上下文)
//! - 按优先级排序的钩子通知总线
//! - 按通道掩码过滤的控制台输出与命令行
//! - 主机命令分发 (protocol v3)
//! - 条件编译日志系统

#![cfg_attr(not(test), no_std)]

pub mod error;
pub mod sync;
pub mod hook;
pub mod console;
pub mod host;
pub mod tasks;
pub mod drivers;
pub mod util;

// ===== 重导出常用类型 =====
pub use error::{EcError, EcResult};
pub use sync::primitives::{CriticalCell, CriticalSignal, TaskWake};
pub use sync::queue::Queue;
pub use sync::stream::{Consumer, ConsumerOps, Pipe, Producer, ProducerOps};
pub use hook::{HookTable, HookType};
pub use hook::deferred::DeferredTable;
pub use console::{Channel, Console};
pub use host::EcStatus;

// ===== 版本信息 =====
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// 系统配置常量
pub mod config {
    /// 系统 Tick 频率 (Hz) - embassy-time 配置为 1MHz
    pub const TICK_FREQ_HZ: u32 = 1_000_000;

    /// 每秒微秒数
    pub const SECOND_US: u64 = 1_000_000;

    /// `HookType::Tick` 的触发周期 (μs)
    pub const HOOK_TICK_INTERVAL_US: u64 = 200_000;

    /// 延迟调用表的最大条目数 (编译期检查)
    pub const DEFERRED_FUNCS_MAX: usize = 16;

    /// 单个钩子表允许的最大注册数 (编译期检查)
    pub const HOOK_ENTRIES_MAX: usize = 64;

    /// 控制台输入行最多保存的可打印字节数 (不需要结尾符)
    pub const CONSOLE_INPUT_LINE_SIZE: usize = 80;

    /// 单条控制台命令的最大参数个数 (含命令名)
    pub const MAX_ARGS_PER_COMMAND: usize = 10;

    /// 控制台同时挂接的输出端数量 (UART + USB)
    pub const CONSOLE_SINKS_MAX: usize = 2;

    /// 控制台接收队列大小 (必须是 2 的幂)
    pub const CONSOLE_RX_BUF_SIZE: usize = 128;

    /// 控制台发送队列大小 (必须是 2 的幂)
    pub const CONSOLE_TX_BUF_SIZE: usize = 1024;

    /// 主机命令 v3 数据包最大长度 (请求/响应头 + 数据)
    pub const HOST_PACKET_SIZE: usize = 256;

    /// 电源按键去抖时间 (μs)
    pub const BUTTON_DEBOUNCE_US: i64 = 30_000;
}
