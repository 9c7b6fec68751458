//! 同步原语模块
//!
//! 提供中断安全的同步原语:
//! - `Queue`: 有界 SPSC 队列
//! - `Pipe` / `Consumer` / `Producer`: 队列两端的通知约定
//! - `CriticalSignal` / `CriticalCell`: 基于 embassy-sync 的信号与阻塞锁
//! - `TaskWake`: 唤醒任务的消费者

pub mod primitives;
pub mod queue;
pub mod stream;

pub use primitives::{AtomicCounter, AtomicFlag, CriticalCell, CriticalSignal, TaskWake};
pub use queue::{ByteQueue, Queue, QUEUE_BUFFERED_MODE};
pub use stream::{Consumer, ConsumerOps, FrameGate, Pipe, Producer, ProducerOps};
