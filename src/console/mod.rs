//! 控制台输出
//!
//! 所有驱动共用的诊断输出前端:
//! - `cputs` / `cprintf` / `cprints` 先检查通道掩码, 通道关闭时静默返回成功
//! - 通道打开时输出扇出到所有挂接的输出端 (UART, USB 等), 报告第一个错误
//! - `cprints` 在消息前加时间戳 `[秒.微秒 `, 末尾加 `]\n`
//!
//! 控制台命令见 [`command`]
//!
//! # Example
//! ```ignore
//! cprints!(Channel::Switch, "power button {}", if pressed { "pressed" } else { "released" });
//! ```

pub mod channel;
pub mod command;

use core::cell::RefCell;
use core::fmt::{self, Write as _};

use embassy_time::Instant;
use heapless::Vec;

use crate::config::{CONSOLE_SINKS_MAX, SECOND_US};
use crate::error::{EcError, EcResult};
use crate::sync::primitives::CriticalCell;
use crate::sync::stream::Pipe;

pub use channel::{Channel, ChannelGate, CC_ALL, CC_DEFAULT};
pub use command::{CommandContext, CommandSet, ConsoleCommand};

// ===== 输出端 =====

/// 控制台输出端
///
/// 实现必须可以在任意任务上下文调用
pub trait ConsoleSink: Sync {
    /// 输出字符串
    fn puts(&self, s: &str) -> EcResult;

    /// 请求尽快发送已缓冲的输出
    fn flush(&self) {}
}

/// 发送队列输出端
///
/// `puts` 只把字节复制进发送管道并唤醒发送任务, 串口写入在发送任务中进行,
/// 锁只覆盖内存复制。`\n` 被转换为 `\r\n` (串口终端)。
/// 一行放不下时整行丢弃并返回 `Overflow`, 不写入半行。
pub struct PipeSink<const N: usize> {
    pipe: &'static Pipe<'static, u8, N>,
    /// 多个任务共用一个写端, 写入一行期间互斥
    lock: CriticalCell<()>,
}

impl<const N: usize> PipeSink<N> {
    /// 包装发送管道
    pub const fn new(pipe: &'static Pipe<'static, u8, N>) -> Self {
        Self {
            pipe,
            lock: CriticalCell::new(()),
        }
    }

    /// 发送管道 (发送任务从这里取数据)
    pub fn pipe(&self) -> &'static Pipe<'static, u8, N> {
        self.pipe
    }
}

impl<const N: usize> ConsoleSink for PipeSink<N> {
    fn puts(&self, s: &str) -> EcResult {
        let needed = s.len() + s.bytes().filter(|&b| b == b'\n').count();

        self.lock.lock(|_| {
            if self.pipe.queue().space() < needed {
                return Err(EcError::Overflow);
            }

            let mut lines = s.split('\n');
            if let Some(first) = lines.next() {
                self.pipe.add(first.as_bytes());
            }
            for line in lines {
                self.pipe.add(b"\r\n");
                self.pipe.add(line.as_bytes());
            }
            Ok(())
        })
    }

    fn flush(&self) {
        self.pipe.flush();
    }
}

/// `fmt::Write` 适配: 把格式化片段写入一个输出端, 记录第一个错误
struct SinkWriter<'a> {
    sink: &'a dyn ConsoleSink,
    result: EcResult,
}

impl fmt::Write for SinkWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        if let Err(e) = self.sink.puts(s) {
            self.result = Err(e);
            return Err(fmt::Error);
        }
        Ok(())
    }
}

// ===== 控制台 =====

type SinkList = Vec<&'static dyn ConsoleSink, CONSOLE_SINKS_MAX>;

/// 控制台: 通道门控 + 输出端列表
pub struct Console {
    gate: ChannelGate,
    sinks: CriticalCell<RefCell<SinkList>>,
}

impl Console {
    /// 以给定默认通道掩码创建控制台
    pub const fn new(default_mask: u32) -> Self {
        Self {
            gate: ChannelGate::new(default_mask),
            sinks: CriticalCell::new(RefCell::new(Vec::new())),
        }
    }

    /// 通道门控
    #[inline(always)]
    pub fn gate(&self) -> &ChannelGate {
        &self.gate
    }

    /// 挂接输出端
    ///
    /// # Errors
    /// 已满 `CONSOLE_SINKS_MAX` 时返回 `Overflow`
    pub fn add_sink(&self, sink: &'static dyn ConsoleSink) -> EcResult {
        self.sinks
            .lock(|s| s.borrow_mut().push(sink))
            .map_err(|_| EcError::Overflow)
    }

    /// 输出端快照 (在锁外输出, 避免长时间关中断)
    fn sinks(&self) -> SinkList {
        self.sinks.lock(|s| s.borrow().clone())
    }

    /// 输出字符串
    pub fn cputs(&self, channel: Channel, s: &str) -> EcResult {
        if !self.gate.is_enabled(channel) {
            return Ok(());
        }

        let mut result = Ok(());
        for sink in self.sinks() {
            let r = sink.puts(s);
            if result.is_ok() {
                result = r;
            }
        }
        result
    }

    /// 格式化输出
    pub fn cprintf(&self, channel: Channel, args: fmt::Arguments<'_>) -> EcResult {
        if !self.gate.is_enabled(channel) {
            return Ok(());
        }

        let mut result = Ok(());
        for sink in self.sinks() {
            let mut writer = SinkWriter { sink, result: Ok(()) };
            let r = match writer.write_fmt(args) {
                Ok(()) => Ok(()),
                Err(_) => writer.result.and(Err(EcError::Unknown)),
            };
            if result.is_ok() {
                result = r;
            }
        }
        result
    }

    /// 带时间戳的一行输出
    pub fn cprints(&self, channel: Channel, args: fmt::Arguments<'_>) -> EcResult {
        self.cprints_at(channel, Instant::now(), args)
    }

    /// 以指定时间戳输出一行
    pub fn cprints_at(&self, channel: Channel, now: Instant, args: fmt::Arguments<'_>) -> EcResult {
        if !self.gate.is_enabled(channel) {
            return Ok(());
        }

        let us = now.as_micros();
        self.cprintf(
            channel,
            format_args!("[{}.{:06} {}]\n", us / SECOND_US, us % SECOND_US, args),
        )
    }

    /// 命令通道输出
    pub fn ccputs(&self, s: &str) -> EcResult {
        self.cputs(Channel::Command, s)
    }

    /// 命令通道格式化输出
    pub fn ccprintf(&self, args: fmt::Arguments<'_>) -> EcResult {
        self.cprintf(Channel::Command, args)
    }

    /// 刷新所有输出端
    pub fn cflush(&self) {
        for sink in self.sinks() {
            sink.flush();
        }
    }
}

// ===== 全局控制台 =====

static CONSOLE: Console = Console::new(CC_DEFAULT);

/// 固件的全局控制台
#[inline(always)]
pub fn console() -> &'static Console {
    &CONSOLE
}

/// 全局控制台格式化输出
#[macro_export]
macro_rules! cprintf {
    ($channel:expr, $($arg:tt)*) => {
        $crate::console::console().cprintf($channel, format_args!($($arg)*))
    };
}

/// 全局控制台带时间戳输出
#[macro_export]
macro_rules! cprints {
    ($channel:expr, $($arg:tt)*) => {
        $crate::console::console().cprints($channel, format_args!($($arg)*))
    };
}

/// 全局控制台命令通道输出
#[macro_export]
macro_rules! ccprintf {
    ($($arg:tt)*) => {
        $crate::console::console().ccprintf(format_args!($($arg)*))
    };
}

/// 全局控制台字符串输出
pub fn cputs(channel: Channel, s: &str) -> EcResult {
    CONSOLE.cputs(channel, s)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::string::String;
    use std::sync::Mutex;

    /// 记录输出的测试输出端
    pub struct CaptureSink {
        out: Mutex<String>,
        fail: Option<EcError>,
    }

    impl CaptureSink {
        pub const fn new() -> Self {
            Self { out: Mutex::new(String::new()), fail: None }
        }

        pub const fn failing(err: EcError) -> Self {
            Self { out: Mutex::new(String::new()), fail: Some(err) }
        }

        pub fn take(&self) -> String {
            core::mem::take(&mut *self.out.lock().unwrap())
        }
    }

    impl ConsoleSink for CaptureSink {
        fn puts(&self, s: &str) -> EcResult {
            if let Some(e) = self.fail {
                return Err(e);
            }
            self.out.lock().unwrap().push_str(s);
            Ok(())
        }
    }

    /// 泄漏一个输出端以得到 `'static` 引用
    pub fn leak_sink(sink: CaptureSink) -> &'static CaptureSink {
        Box::leak(Box::new(sink))
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::sync::primitives::TaskWake;
    use crate::sync::queue::Queue;

    #[test]
    fn test_masked_channel_is_silent_success() {
        let console = Console::new(CC_DEFAULT);
        let sink = leak_sink(CaptureSink::new());
        console.add_sink(sink).unwrap();

        console.gate().toggle(Channel::Charger).unwrap();
        assert_eq!(console.cprintf(Channel::Charger, format_args!("msg")), Ok(()));
        assert_eq!(sink.take(), "");

        console.gate().toggle(Channel::Charger).unwrap();
        assert_eq!(console.cprintf(Channel::Charger, format_args!("msg")), Ok(()));
        assert_eq!(sink.take(), "msg");
    }

    #[test]
    fn test_fan_out_reports_first_error() {
        let console = Console::new(CC_DEFAULT);
        let bad = leak_sink(CaptureSink::failing(EcError::Busy));
        let good = leak_sink(CaptureSink::new());
        console.add_sink(bad).unwrap();
        console.add_sink(good).unwrap();

        assert_eq!(console.cputs(Channel::Gpio, "x"), Err(EcError::Busy));
        assert_eq!(console.cprintf(Channel::Gpio, format_args!("{}", 7)), Err(EcError::Busy));
        // 第二个输出端仍然收到输出
        assert_eq!(good.take(), "x7");

        let third = leak_sink(CaptureSink::new());
        assert_eq!(console.add_sink(third), Err(EcError::Overflow));
    }

    #[test]
    fn test_cprints_timestamp_format() {
        let console = Console::new(CC_DEFAULT);
        let sink = leak_sink(CaptureSink::new());
        console.add_sink(sink).unwrap();

        console
            .cprints_at(Channel::Chipset, Instant::from_micros(12_000_345), format_args!("S0 {}", 1))
            .unwrap();
        assert_eq!(sink.take(), "[12.000345 S0 1]\n");

        console.gate().disable_output();
        console.cprints(Channel::Chipset, format_args!("hidden")).unwrap();
        assert_eq!(sink.take(), "");
    }

    static TX_QUEUE: Queue<u8, 16> = Queue::new();
    static TX_WAKE: TaskWake = TaskWake::new();
    static TX_PIPE: Pipe<'static, u8, 16> = Pipe::new(&TX_QUEUE, None, Some(&TX_WAKE));

    #[test]
    fn test_pipe_sink_queues_and_wakes() {
        let sink = PipeSink::new(&TX_PIPE);
        assert!(!TX_WAKE.is_pending());

        sink.puts("a\nb\n").unwrap();
        assert!(TX_WAKE.is_pending());

        let mut out = [0u8; 16];
        let n = sink.pipe().remove(&mut out);
        assert_eq!(&out[..n], b"a\r\nb\r\n");

        // 放不下的一行整行丢弃
        TX_WAKE.reset();
        assert_eq!(sink.puts("0123456789\n\n\n\n"), Err(EcError::Overflow));
        assert!(TX_QUEUE.is_empty());
        assert!(!TX_WAKE.is_pending());

        // 刷新请求也唤醒发送任务
        sink.flush();
        assert!(TX_WAKE.is_pending());
    }
}
