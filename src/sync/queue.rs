//! 有界 SPSC 队列
//!
//! 固定容量的单生产者单消费者循环缓冲区
//! 特点:
//! - 无锁实现 (使用原子操作), 可在一个中断上下文和一个任务上下文间共享
//! - 编译时确定容量 (必须是 2 的幂)
//! - 满/空不报错: 通过返回的实际单元数表达背压
//! - 写入超出剩余空间时只写入能放下的部分, 从不覆盖未读数据
//!
//! 头索引 (`head`) 只由消费者推进, 尾索引 (`tail`) 只由生产者推进,
//! 两者单调递增, 用掩码取模

use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use portable_atomic::{AtomicU8, AtomicUsize, Ordering};

// ===== 队列状态标志 =====

/// 缓冲模式: 消费者可以合并多次 `written()` 通知, 直到收到刷新请求
pub const QUEUE_BUFFERED_MODE: u8 = 1 << 0;

/// 有界 SPSC 队列
///
/// # Type Parameters
/// * `T` - 单元类型 (单元大小即 `size_of::<T>()`)
/// * `N` - 容量 (必须是 2 的幂以优化取模运算)
///
/// # Example
/// ```ignore
/// static RX: Queue<u8, 64> = Queue::new();
///
/// // 生产者 (中断)
/// RX.add(&[1, 2, 3]);
///
/// // 消费者 (任务)
/// let mut buf = [0u8; 8];
/// let n = RX.remove(&mut buf);
/// ```
#[repr(C, align(32))] // 缓存行对齐
pub struct Queue<T, const N: usize> {
    /// 数据存储
    buffer: UnsafeCell<[MaybeUninit<T>; N]>,
    /// 读取位置 (消费者更新)
    head: AtomicUsize,
    /// 写入位置 (生产者更新)
    tail: AtomicUsize,
    /// 状态标志 (`QUEUE_BUFFERED_MODE`)
    flags: AtomicU8,
}

// Safety: 在 SPSC 场景下, 每个索引只有一方写入, 数据区由索引发布保护
unsafe impl<T: Send, const N: usize> Send for Queue<T, N> {}
unsafe impl<T: Send, const N: usize> Sync for Queue<T, N> {}

impl<T, const N: usize> Queue<T, N> {
    const CAPACITY_OK: () = assert!(N > 0 && (N & (N - 1)) == 0, "N must be a power of 2");

    /// 创建新的空队列 (非缓冲模式)
    ///
    /// # Panics
    /// 编译时检查 N 必须是 2 的幂
    pub const fn new() -> Self {
        Self::with_flags(0)
    }

    /// 创建缓冲模式的空队列
    pub const fn new_buffered() -> Self {
        Self::with_flags(QUEUE_BUFFERED_MODE)
    }

    const fn with_flags(flags: u8) -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::CAPACITY_OK;

        Self {
            // Safety: MaybeUninit 数组本身不需要初始化
            buffer: UnsafeCell::new(unsafe { MaybeUninit::uninit().assume_init() }),
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            flags: AtomicU8::new(flags),
        }
    }

    /// 队列容量
    #[inline(always)]
    pub const fn capacity(&self) -> usize {
        N
    }

    /// 当前未读单元数量
    #[inline(always)]
    pub fn count(&self) -> usize {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        tail.wrapping_sub(head)
    }

    /// 剩余可写空间
    #[inline(always)]
    pub fn space(&self) -> usize {
        N - self.count()
    }

    /// 是否为空
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// 是否已满
    #[inline(always)]
    pub fn is_full(&self) -> bool {
        self.count() >= N
    }

    /// 是否处于缓冲模式
    #[inline(always)]
    pub fn is_buffered(&self) -> bool {
        self.flags.load(Ordering::Acquire) & QUEUE_BUFFERED_MODE != 0
    }

    /// 设置或清除缓冲模式
    pub fn set_buffered_mode(&self, enable: bool) {
        if enable {
            self.flags.fetch_or(QUEUE_BUFFERED_MODE, Ordering::AcqRel);
        } else {
            self.flags.fetch_and(!QUEUE_BUFFERED_MODE, Ordering::AcqRel);
        }
    }

    /// 丢弃所有未读内容 (read = write)
    ///
    /// 只能由消费者调用; 重复调用与调用一次等价
    #[inline]
    pub fn flush(&self) {
        let tail = self.tail.load(Ordering::Acquire);
        self.head.store(tail, Ordering::Release);
    }

    /// 丢弃最多 `count` 个未读单元, 返回实际丢弃数
    ///
    /// `usize::MAX` 丢弃全部
    pub fn advance_head(&self, count: usize) -> usize {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        let dropped = count.min(tail.wrapping_sub(head));
        self.head.store(head.wrapping_add(dropped), Ordering::Release);
        dropped
    }

    /// 掩码 (用于快速取模)
    #[inline(always)]
    const fn mask(&self) -> usize {
        N - 1
    }

    #[inline(always)]
    fn slot(&self, index: usize) -> *mut T {
        // Safety: index 已经过掩码, 始终在数组范围内;
        // [MaybeUninit<T>; N] 与 [T; N] 布局相同
        unsafe { (self.buffer.get() as *mut T).add(index & self.mask()) }
    }
}

impl<T: Copy, const N: usize> Queue<T, N> {
    /// 写入一个单元
    ///
    /// # Returns
    /// - `true`: 写入成功
    /// - `false`: 队列已满
    #[inline]
    pub fn add_unit(&self, value: T) -> bool {
        self.add(core::slice::from_ref(&value)) == 1
    }

    /// 批量写入 (只能由生产者调用)
    ///
    /// # Returns
    /// 实际写入的单元数; 空间不足时只写入能放下的部分, 队列满时为 0
    pub fn add(&self, data: &[T]) -> usize {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);

        let free = N - tail.wrapping_sub(head);
        let count = free.min(data.len());

        for (i, unit) in data[..count].iter().enumerate() {
            // Safety: [tail, tail + count) 位于空闲区, 消费者不会访问
            unsafe { self.slot(tail.wrapping_add(i)).write(*unit) };
        }

        // 发布写入
        self.tail.store(tail.wrapping_add(count), Ordering::Release);
        count
    }

    /// 读取一个单元
    ///
    /// # Returns
    /// - `Some(T)`: 读取成功
    /// - `None`: 队列为空
    #[inline]
    pub fn remove_unit(&self) -> Option<T> {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        if head == tail {
            return None; // 为空
        }

        // Safety: head != tail, 该槽已由生产者发布
        let value = unsafe { self.slot(head).read() };
        self.head.store(head.wrapping_add(1), Ordering::Release);
        Some(value)
    }

    /// 批量读取并推进读指针 (只能由消费者调用)
    ///
    /// # Returns
    /// 实际读取的单元数
    pub fn remove(&self, out: &mut [T]) -> usize {
        let count = self.peek_at(0, out);
        let head = self.head.load(Ordering::Relaxed);
        self.head.store(head.wrapping_add(count), Ordering::Release);
        count
    }

    /// 查看队首单元, 不推进读指针
    pub fn peek_unit(&self) -> Option<T> {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        if head == tail {
            return None;
        }
        // Safety: 该槽已由生产者发布
        Some(unsafe { self.slot(head).read() })
    }

    /// 批量查看, 不推进读指针
    #[inline]
    pub fn peek(&self, out: &mut [T]) -> usize {
        self.peek_at(0, out)
    }

    /// 从第 `offset` 个未读单元开始批量查看, 不推进读指针
    pub fn peek_at(&self, offset: usize, out: &mut [T]) -> usize {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);

        let available = tail.wrapping_sub(head);
        if offset >= available {
            return 0;
        }
        let count = (available - offset).min(out.len());

        let start = head.wrapping_add(offset);
        for (i, unit) in out[..count].iter_mut().enumerate() {
            // Safety: [head, tail) 已由生产者发布
            *unit = unsafe { self.slot(start.wrapping_add(i)).read() };
        }
        count
    }
}

impl<T, const N: usize> Default for Queue<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

// ===== 特化版本: 字节队列 =====

/// 字节队列类型别名
pub type ByteQueue<const N: usize> = Queue<u8, N>;
