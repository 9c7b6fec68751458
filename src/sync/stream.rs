//! 生产者/消费者通知
//!
//! 在 [`Queue`] 之上加一层通知约定:
//! - 生产者写入成功 (`n > 0`) 后调用消费者的 `written(n)`
//! - `written(0)` 是刷新请求: 消费者必须立即处理已缓冲的数据
//! - 消费者取出数据后调用生产者的 `read(n)`, 让生产者补充数据
//!
//! 队列满/空都不是错误, 背压只通过返回的实际单元数表达,
//! 重试或丢弃策略由调用方决定。
//!
//! 非缓冲模式 (默认) 的消费者必须把每次 `written()` 当作立即处理的触发;
//! 只有队列设置了 `QUEUE_BUFFERED_MODE` 时, 消费者才可以合并多次通知
//! (例如凑满一个 USB 包) 再处理, 但收到刷新请求时必须立即处理。

use super::primitives::AtomicFlag;
use super::queue::Queue;

// ===== 回调接口 =====

/// 消费者回调
///
/// 实现通常只置位标志、唤醒任务或武装延迟调用, 必须可以在中断上下文调用
pub trait ConsumerOps: Sync {
    /// 队列中新写入了 `count` 个单元; `count == 0` 表示刷新请求
    fn written(&self, count: usize);
}

/// 生产者回调
pub trait ProducerOps: Sync {
    /// 消费者从队列中取走了 `count` 个单元
    fn read(&self, count: usize);
}

// ===== 队列两端 =====

/// 队列的读端: 引用且只引用一个队列, 回调可为空
pub struct Consumer<'a, T, const N: usize> {
    queue: &'a Queue<T, N>,
    ops: Option<&'a dyn ConsumerOps>,
}

impl<'a, T, const N: usize> Consumer<'a, T, N> {
    /// 创建读端
    pub const fn new(queue: &'a Queue<T, N>, ops: Option<&'a dyn ConsumerOps>) -> Self {
        Self { queue, ops }
    }

    /// 所读取的队列
    #[inline(always)]
    pub fn queue(&self) -> &'a Queue<T, N> {
        self.queue
    }

    /// 通知消费者 (无回调时为空操作)
    #[inline]
    pub fn notify_written(&self, count: usize) {
        if let Some(ops) = self.ops {
            ops.written(count);
        }
    }
}

/// 队列的写端: 引用且只引用一个队列, 回调可为空
pub struct Producer<'a, T, const N: usize> {
    queue: &'a Queue<T, N>,
    ops: Option<&'a dyn ProducerOps>,
}

impl<'a, T, const N: usize> Producer<'a, T, N> {
    /// 创建写端
    pub const fn new(queue: &'a Queue<T, N>, ops: Option<&'a dyn ProducerOps>) -> Self {
        Self { queue, ops }
    }

    /// 所写入的队列
    #[inline(always)]
    pub fn queue(&self) -> &'a Queue<T, N> {
        self.queue
    }

    /// 通知生产者 (无回调时为空操作)
    #[inline]
    pub fn notify_read(&self, count: usize) {
        if let Some(ops) = self.ops {
            ops.read(count);
        }
    }
}

// ===== 直连策略 =====

/// 直连管道: 把一个队列的写端和读端连接起来
///
/// 两端都没有回调时就是一个普通队列
///
/// # Example
/// ```ignore
/// static RX_QUEUE: Queue<u8, 128> = Queue::new();
/// static RX_PIPE: Pipe<'static, u8, 128> =
///     Pipe::new(&RX_QUEUE, None, Some(&CONSOLE_RX_WAKE));
///
/// // 中断: 写入并通知消费者
/// RX_PIPE.add(&bytes);
///
/// // 任务: 取出并通知生产者
/// let n = RX_PIPE.remove(&mut buf);
/// ```
pub struct Pipe<'a, T, const N: usize> {
    producer: Producer<'a, T, N>,
    consumer: Consumer<'a, T, N>,
}

impl<'a, T: Copy, const N: usize> Pipe<'a, T, N> {
    /// 创建管道
    ///
    /// * `producer_ops` - 数据被读走时回调 (`read`)
    /// * `consumer_ops` - 数据写入时回调 (`written`)
    pub const fn new(
        queue: &'a Queue<T, N>,
        producer_ops: Option<&'a dyn ProducerOps>,
        consumer_ops: Option<&'a dyn ConsumerOps>,
    ) -> Self {
        Self {
            producer: Producer::new(queue, producer_ops),
            consumer: Consumer::new(queue, consumer_ops),
        }
    }

    /// 写端
    #[inline(always)]
    pub fn producer(&self) -> &Producer<'a, T, N> {
        &self.producer
    }

    /// 读端
    #[inline(always)]
    pub fn consumer(&self) -> &Consumer<'a, T, N> {
        &self.consumer
    }

    /// 底层队列
    #[inline(always)]
    pub fn queue(&self) -> &'a Queue<T, N> {
        self.producer.queue
    }

    /// 写入数据并通知消费者
    ///
    /// # Returns
    /// 实际写入的单元数 (只有 `> 0` 时才通知)
    pub fn add(&self, data: &[T]) -> usize {
        let count = self.producer.queue.add(data);
        if count > 0 {
            self.consumer.notify_written(count);
        }
        count
    }

    /// 写入一个单元并通知消费者
    pub fn add_unit(&self, value: T) -> bool {
        self.add(core::slice::from_ref(&value)) == 1
    }

    /// 发送刷新请求 (`written(0)`)
    ///
    /// 在协议边界 (例如一个包结束) 没有新数据需要报告时使用
    pub fn flush(&self) {
        self.consumer.notify_written(0);
    }

    /// 取出数据并通知生产者
    pub fn remove(&self, out: &mut [T]) -> usize {
        let count = self.consumer.queue.remove(out);
        if count > 0 {
            self.producer.notify_read(count);
        }
        count
    }

    /// 取出一个单元并通知生产者
    pub fn remove_unit(&self) -> Option<T> {
        let unit = self.consumer.queue.remove_unit()?;
        self.producer.notify_read(1);
        Some(unit)
    }

    /// 查看数据, 不推进读指针也不通知
    #[inline]
    pub fn peek(&self, out: &mut [T]) -> usize {
        self.consumer.queue.peek(out)
    }
}

// ===== 缓冲模式消费者辅助 =====

/// 帧门控: 缓冲模式消费者的发送判定
///
/// 缓冲模式下, 数据不足一帧且未收到刷新请求时不发送;
/// 收到 `written(0)` 后锁存刷新标志, 直到队列被取空才清除。
/// 非缓冲模式下每次都立即发送。
pub struct FrameGate {
    flush_pending: AtomicFlag,
}

impl FrameGate {
    /// 创建门控
    pub const fn new() -> Self {
        Self {
            flush_pending: AtomicFlag::new(),
        }
    }

    /// 在消费者的 `written()` 回调中调用
    ///
    /// 只有缓冲模式队列的刷新请求会被锁存
    pub fn on_written<T, const N: usize>(&self, queue: &Queue<T, N>, count: usize) {
        if count == 0 && queue.is_buffered() {
            self.flush_pending.set();
        }
    }

    /// 是否有未完成的刷新请求
    #[inline(always)]
    pub fn flush_pending(&self) -> bool {
        self.flush_pending.is_set()
    }

    /// 取出最多一帧数据
    ///
    /// # Returns
    /// 取出的单元数; 0 表示当前应继续等待 (或队列为空)
    pub fn take_frame<T: Copy, const N: usize>(&self, queue: &Queue<T, N>, frame: &mut [T]) -> usize {
        if queue.is_buffered() && !self.flush_pending() && queue.count() < frame.len() {
            // 数据不足一帧, 等待更多数据或显式刷新
            return 0;
        }

        let count = queue.remove(frame);
        if count < frame.len() {
            // 队列已取空, 本次刷新完成
            self.flush_pending.clear();
        }
        count
    }
}

impl Default for FrameGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portable_atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// 记录所有通知的测试消费者
    struct Recorder {
        calls: Mutex<Vec<usize>>,
    }

    impl Recorder {
        fn new() -> Self {
            Self { calls: Mutex::new(Vec::new()) }
        }

        fn calls(&self) -> Vec<usize> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ConsumerOps for Recorder {
        fn written(&self, count: usize) {
            self.calls.lock().unwrap().push(count);
        }
    }

    struct ReadCounter {
        total: AtomicUsize,
    }

    impl ProducerOps for ReadCounter {
        fn read(&self, count: usize) {
            self.total.fetch_add(count, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_add_notifies_written_count() {
        let queue: Queue<u8, 8> = Queue::new();
        let recorder = Recorder::new();
        let pipe = Pipe::new(&queue, None, Some(&recorder));

        assert_eq!(pipe.add(&[1, 2, 3]), 3);
        assert_eq!(pipe.add(&[4, 5, 6, 7, 8, 9]), 5);
        // 队列已满: 不通知
        assert_eq!(pipe.add(&[10]), 0);
        pipe.flush();

        assert_eq!(recorder.calls(), vec![3, 5, 0]);
    }

    #[test]
    fn test_remove_notifies_producer() {
        let queue: Queue<u8, 8> = Queue::new();
        let counter = ReadCounter { total: AtomicUsize::new(0) };
        let pipe = Pipe::new(&queue, Some(&counter), None);

        pipe.add(&[1, 2, 3, 4]);
        let mut out = [0u8; 3];
        assert_eq!(pipe.remove(&mut out), 3);
        assert_eq!(pipe.remove_unit(), Some(4));
        assert_eq!(pipe.remove_unit(), None);
        assert_eq!(pipe.remove(&mut out), 0);

        assert_eq!(counter.total.load(Ordering::Relaxed), 4);
    }

    #[test]
    fn test_null_pipe_is_plain_queue() {
        let queue: Queue<u16, 4> = Queue::new();
        let pipe = Pipe::new(&queue, None, None);

        assert!(pipe.add_unit(0x1234));
        let mut out = [0u16; 1];
        assert_eq!(pipe.peek(&mut out), 1);
        assert_eq!(out[0], 0x1234);
        assert_eq!(pipe.queue().count(), 1);
    }

    #[test]
    fn test_frame_gate_eager_mode_sends_immediately() {
        let queue: Queue<u8, 16> = Queue::new();
        let gate = FrameGate::new();
        queue.add(&[1, 2]);

        let mut frame = [0u8; 8];
        assert_eq!(gate.take_frame(&queue, &mut frame), 2);
    }

    #[test]
    fn test_frame_gate_buffered_waits_for_flush() {
        let queue: Queue<u8, 16> = Queue::new_buffered();
        let gate = FrameGate::new();
        let mut frame = [0u8; 4];

        queue.add(&[1, 2, 3]);
        gate.on_written(&queue, 3);
        assert_eq!(gate.take_frame(&queue, &mut frame), 0);

        // 凑满一帧即可发送
        queue.add(&[4, 5]);
        gate.on_written(&queue, 2);
        assert_eq!(gate.take_frame(&queue, &mut frame), 4);
        assert_eq!(frame, [1, 2, 3, 4]);

        // 剩余不足一帧, 刷新后发送并清除刷新标志
        assert_eq!(gate.take_frame(&queue, &mut frame), 0);
        gate.on_written(&queue, 0);
        assert!(gate.flush_pending());
        assert_eq!(gate.take_frame(&queue, &mut frame), 1);
        assert_eq!(frame[0], 5);
        assert!(!gate.flush_pending());
    }

    #[test]
    fn test_flush_on_eager_queue_is_not_latched() {
        let queue: Queue<u8, 16> = Queue::new();
        let gate = FrameGate::new();
        gate.on_written(&queue, 0);
        assert!(!gate.flush_pending());
    }
}
