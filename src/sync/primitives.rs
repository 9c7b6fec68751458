//! 同步原语封装
//!
//! 基于 embassy-sync 提供的同步原语, 统一使用 CriticalSectionRawMutex
//! 以确保中断上下文与任务上下文之间的正确性

use embassy_sync::{
    blocking_mutex::{raw::CriticalSectionRawMutex, Mutex as BlockingMutex},
    signal::Signal,
};
use portable_atomic::{AtomicBool, AtomicU64, Ordering};

use super::stream::ConsumerOps;

// ===== 类型别名: 简化使用 =====

/// 临界区信号量 - 用于任务间单值通知
///
/// 发送方可以发送一个值, 接收方异步等待
/// 多次发送只保留最后一个值
///
/// # Example
/// ```ignore
/// static WAKE: CriticalSignal<()> = CriticalSignal::new();
///
/// // 中断
/// WAKE.signal(());
///
/// // 任务 (异步)
/// WAKE.wait().await;
/// ```
pub type CriticalSignal<T> = Signal<CriticalSectionRawMutex, T>;

/// 临界区阻塞互斥锁 - 同步闭包内访问共享资源
///
/// 用于钩子/延迟调用例程这类没有参数的函数访问文件级状态
///
/// # Example
/// ```ignore
/// static STATE: CriticalCell<RefCell<u32>> = CriticalCell::new(RefCell::new(0));
///
/// STATE.lock(|s| *s.borrow_mut() += 1);
/// ```
pub type CriticalCell<T> = BlockingMutex<CriticalSectionRawMutex, T>;

// ===== 任务唤醒 =====

/// 任务唤醒器 - 最简单的消费者
///
/// 每次 `written()` (包括刷新请求) 都唤醒等待的任务,
/// 即非缓冲模式下的立即处理语义
pub struct TaskWake {
    signal: CriticalSignal<()>,
}

impl TaskWake {
    /// 创建新的唤醒器
    pub const fn new() -> Self {
        Self {
            signal: Signal::new(),
        }
    }

    /// 唤醒任务 (可在中断上下文调用)
    #[inline]
    pub fn wake(&self) {
        self.signal.signal(());
    }

    /// 等待唤醒
    pub async fn wait(&self) {
        self.signal.wait().await
    }

    /// 是否有未处理的唤醒 (不清除)
    #[inline]
    pub fn is_pending(&self) -> bool {
        self.signal.signaled()
    }

    /// 清除未处理的唤醒
    #[inline]
    pub fn reset(&self) {
        self.signal.reset();
    }
}

impl ConsumerOps for TaskWake {
    fn written(&self, _count: usize) {
        self.wake();
    }
}

impl Default for TaskWake {
    fn default() -> Self {
        Self::new()
    }
}

// ===== 优化的原子操作封装 =====

/// 原子标志 - 最快的任务间通知
///
/// 比 Signal 更轻量, 适用于简单的布尔状态通知
pub struct AtomicFlag {
    flag: AtomicBool,
}

impl AtomicFlag {
    /// 创建新的原子标志
    pub const fn new() -> Self {
        Self {
            flag: AtomicBool::new(false),
        }
    }

    /// 设置标志
    #[inline(always)]
    pub fn set(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// 清除标志
    #[inline(always)]
    pub fn clear(&self) {
        self.flag.store(false, Ordering::Release);
    }

    /// 检查并清除标志 (test-and-clear)
    #[inline(always)]
    pub fn take(&self) -> bool {
        self.flag.swap(false, Ordering::AcqRel)
    }

    /// 检查标志 (不清除)
    #[inline(always)]
    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// 原子计数器 - 用于统计
pub struct AtomicCounter {
    count: AtomicU64,
}

impl AtomicCounter {
    /// 创建新的计数器
    pub const fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
        }
    }

    /// 增加并返回新值
    #[inline(always)]
    pub fn increment(&self) -> u64 {
        self.count.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// 记录最大值, 返回更新后的最大值
    #[inline(always)]
    pub fn max(&self, value: u64) -> u64 {
        self.count.fetch_max(value, Ordering::Relaxed).max(value)
    }

    /// 设置为指定值
    #[inline(always)]
    pub fn set(&self, value: u64) {
        self.count.store(value, Ordering::Relaxed);
    }

    /// 获取当前值
    #[inline(always)]
    pub fn get(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// 重置为 0
    #[inline(always)]
    pub fn reset(&self) {
        self.count.store(0, Ordering::Relaxed);
    }
}

impl Default for AtomicFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl Default for AtomicCounter {
    fn default() -> Self {
        Self::new()
    }
}
