//! 延迟调用调度器
//!
//! 中断处理函数不能安全地执行总线事务 (I2C/SMBus 读写), 必须把工作交给任务上下文:
//! 中断里只武装一个延迟调用然后立即返回, 钩子任务在截止时间到达后同步执行它。
//!
//! 状态机: `Idle → Pending → Fired → Idle`
//! - 每个延迟调用身份 (由 [`declare_deferred!`] 生成的枚举键) 最多只有一个挂起实例
//! - 对挂起中的调用再次武装只替换截止时间, 不会叠加
//! - 延迟 `<= 0` 取消挂起的调用, 不执行
//! - 一旦进入 `Fired` 就不可取消, 总是同步执行完毕
//! - 表的大小超过 `DEFERRED_FUNCS_MAX` 是编译期错误
//!
//! 武装操作只使用原子操作, 可在中断上下文中调用
//!
//! # Example
//! ```ignore
//! fn button_debounce() { /* 读取 GPIO, 通知钩子 */ }
//!
//! declare_deferred! {
//!     pub static DEFERRED: Deferred = {
//!         ButtonDebounce => button_debounce,
//!     }
//! }
//!
//! // GPIO 中断
//! DEFERRED.call_deferred(Deferred::ButtonDebounce, 30_000);
//! ```

use core::marker::PhantomData;

use embassy_time::Instant;
use portable_atomic::{AtomicU64, AtomicU8, Ordering};

use crate::config::DEFERRED_FUNCS_MAX;
use crate::log_debug;
use crate::sync::primitives::TaskWake;

/// 延迟调用身份
///
/// 由 [`declare_deferred!`] 为生成的枚举实现
pub trait DeferredKey: Copy {
    /// 在表中的位置
    fn index(self) -> usize;

    /// 名称 (用于日志)
    fn name(self) -> &'static str;
}

/// 延迟调用状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum DeferredState {
    /// 空闲
    Idle = 0,
    /// 已武装, 等待截止时间
    Pending = 1,
    /// 正在执行
    Fired = 2,
}

impl DeferredState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => DeferredState::Pending,
            2 => DeferredState::Fired,
            _ => DeferredState::Idle,
        }
    }
}

/// 截止时间 0 表示没有挂起的调用
const NO_DEADLINE: u64 = 0;

/// 表中的一个槽位
pub struct DeferredSlot {
    routine: fn(),
    /// 截止时间 (μs, 单调时钟)
    deadline: AtomicU64,
    state: AtomicU8,
}

fn unassigned() {}

#[allow(clippy::declare_interior_mutable_const)]
const SLOT_INIT: DeferredSlot = DeferredSlot {
    routine: unassigned,
    deadline: AtomicU64::new(NO_DEADLINE),
    state: AtomicU8::new(DeferredState::Idle as u8),
};

/// 延迟调用表
///
/// # Type Parameters
/// * `K` - 身份枚举
/// * `N` - 条目数 (编译期确定, 不超过 `DEFERRED_FUNCS_MAX`)
pub struct DeferredTable<K, const N: usize> {
    slots: [DeferredSlot; N],
    /// 武装/取消时唤醒钩子任务, 让它重新计算睡眠时间
    wake: TaskWake,
    _key: PhantomData<K>,
}

impl<K: DeferredKey, const N: usize> DeferredTable<K, N> {
    const BOUND_OK: () = assert!(N <= DEFERRED_FUNCS_MAX, "too many deferred functions");

    /// 构建延迟调用表, `routines[i]` 对应 `K::index() == i`
    ///
    /// 通常通过 [`declare_deferred!`] 调用
    pub const fn new(routines: [fn(); N]) -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::BOUND_OK;

        let mut slots = [SLOT_INIT; N];
        let mut i = 0;
        while i < N {
            slots[i].routine = routines[i];
            i += 1;
        }

        Self {
            slots,
            wake: TaskWake::new(),
            _key: PhantomData,
        }
    }

    #[inline(always)]
    fn slot(&self, key: K) -> &DeferredSlot {
        &self.slots[key.index()]
    }

    /// 武装/重新武装/取消一个延迟调用 (`hook_call_deferred`)
    ///
    /// * `delay_us > 0` - 在 `now + delay_us` 执行; 已挂起时替换截止时间
    /// * `delay_us <= 0` - 取消挂起的调用
    pub fn call_deferred(&self, key: K, delay_us: i64) {
        self.call_deferred_at(key, Instant::now(), delay_us);
    }

    /// 以指定的当前时间武装延迟调用
    pub fn call_deferred_at(&self, key: K, now: Instant, delay_us: i64) {
        if delay_us <= 0 {
            self.cancel(key);
            return;
        }

        let deadline = now
            .as_micros()
            .saturating_add(delay_us as u64)
            .max(NO_DEADLINE + 1);

        let slot = self.slot(key);
        slot.deadline.store(deadline, Ordering::Release);
        slot.state.store(DeferredState::Pending as u8, Ordering::Release);
        self.wake.wake();
    }

    /// 取消挂起的调用; 正在执行的调用不受影响
    pub fn cancel(&self, key: K) {
        let slot = self.slot(key);
        if slot.deadline.swap(NO_DEADLINE, Ordering::AcqRel) != NO_DEADLINE {
            let _ = slot.state.compare_exchange(
                DeferredState::Pending as u8,
                DeferredState::Idle as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
            log_debug!("deferred {} cancelled", key.name());
            self.wake.wake();
        }
    }

    /// 当前状态
    pub fn state(&self, key: K) -> DeferredState {
        DeferredState::from_raw(self.slot(key).state.load(Ordering::Acquire))
    }

    /// 是否挂起
    pub fn is_pending(&self, key: K) -> bool {
        self.slot(key).deadline.load(Ordering::Acquire) != NO_DEADLINE
    }

    /// 挂起调用的截止时间
    pub fn deadline(&self, key: K) -> Option<Instant> {
        match self.slot(key).deadline.load(Ordering::Acquire) {
            NO_DEADLINE => None,
            us => Some(Instant::from_micros(us)),
        }
    }

    /// 所有挂起调用中最早的截止时间
    pub fn next_deadline(&self) -> Option<Instant> {
        self.slots
            .iter()
            .map(|s| s.deadline.load(Ordering::Acquire))
            .filter(|&d| d != NO_DEADLINE)
            .min()
            .map(Instant::from_micros)
    }

    /// 执行所有已到期的调用 (只能由钩子任务调用)
    ///
    /// # Returns
    /// 执行完后最早的挂起截止时间
    pub fn run_expired(&self, now: Instant) -> Option<Instant> {
        let now_us = now.as_micros();

        for slot in &self.slots {
            let deadline = slot.deadline.load(Ordering::Acquire);
            if deadline == NO_DEADLINE || deadline > now_us {
                continue;
            }

            // 与中断中的重新武装竞争: 只有截止时间未变时才认领
            if slot
                .deadline
                .compare_exchange(deadline, NO_DEADLINE, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                continue;
            }

            slot.state.store(DeferredState::Fired as u8, Ordering::Release);
            (slot.routine)();

            // 例程 (或执行期间的中断) 可能重新武装了它, 此时回到 Pending
            let next = if slot.deadline.load(Ordering::Acquire) != NO_DEADLINE {
                DeferredState::Pending
            } else {
                DeferredState::Idle
            };
            let _ = slot.state.compare_exchange(
                DeferredState::Fired as u8,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }

        self.next_deadline()
    }

    /// 等待武装/取消通知
    pub async fn wait_wake(&self) {
        self.wake.wait().await
    }

    /// 条目数
    pub const fn len(&self) -> usize {
        N
    }

    /// 是否为空表
    pub const fn is_empty(&self) -> bool {
        N == 0
    }
}

/// 静态声明延迟调用表, 同时生成身份枚举
///
/// ```ignore
/// declare_deferred! {
///     pub static DEFERRED: Deferred = {
///         ButtonDebounce => button_debounce,
///         UsbTx => usb_tx,
///     }
/// }
/// ```
#[macro_export]
macro_rules! declare_deferred {
    (
        $vis:vis static $table:ident: $key:ident = {
            $( $variant:ident => $routine:expr ),+ $(,)?
        }
    ) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        #[repr(usize)]
        $vis enum $key {
            $( $variant ),+
        }

        impl $crate::hook::deferred::DeferredKey for $key {
            #[inline(always)]
            fn index(self) -> usize {
                self as usize
            }

            fn name(self) -> &'static str {
                match self {
                    $( $key::$variant => stringify!($variant) ),+
                }
            }
        }

        $vis static $table: $crate::hook::deferred::DeferredTable<
            $key,
            { $crate::count_items!($($variant)+) },
        > = $crate::hook::deferred::DeferredTable::new([$( $routine ),+]);
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use portable_atomic::AtomicU32;

    static DEBOUNCE_RUNS: AtomicU32 = AtomicU32::new(0);
    static REARM_RUNS: AtomicU32 = AtomicU32::new(0);
    static OTHER_RUNS: AtomicU32 = AtomicU32::new(0);

    fn debounce() {
        DEBOUNCE_RUNS.fetch_add(1, Ordering::Relaxed);
    }

    fn rearm() {
        // 自我重新武装: 1ms 后再运行
        if REARM_RUNS.fetch_add(1, Ordering::Relaxed) == 0 {
            TABLE.call_deferred_at(TestKey::Rearm, Instant::from_millis(1_000), 1_000);
        }
    }

    fn other() {
        OTHER_RUNS.fetch_add(1, Ordering::Relaxed);
    }

    declare_deferred! {
        static TABLE: TestKey = {
            Debounce => debounce,
            Rearm => rearm,
            Other => other,
        }
    }

    #[test]
    fn test_rearm_replaces_not_stacks() {
        let t0 = Instant::from_millis(0);
        TABLE.call_deferred_at(TestKey::Debounce, t0, 100_000);
        TABLE.call_deferred_at(TestKey::Debounce, t0, 50_000);
        assert_eq!(TABLE.state(TestKey::Debounce), DeferredState::Pending);
        assert_eq!(TABLE.deadline(TestKey::Debounce), Some(Instant::from_millis(50)));

        TABLE.run_expired(Instant::from_millis(49));
        assert_eq!(DEBOUNCE_RUNS.load(Ordering::Relaxed), 0);

        TABLE.run_expired(Instant::from_millis(50));
        assert_eq!(DEBOUNCE_RUNS.load(Ordering::Relaxed), 1);
        assert_eq!(TABLE.state(TestKey::Debounce), DeferredState::Idle);

        // 原来 100ms 的实例不存在
        TABLE.run_expired(Instant::from_millis(200));
        assert_eq!(DEBOUNCE_RUNS.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_zero_delay_cancels() {
        let t0 = Instant::from_millis(0);
        TABLE.call_deferred_at(TestKey::Other, t0, 10_000);
        assert!(TABLE.is_pending(TestKey::Other));

        TABLE.call_deferred_at(TestKey::Other, t0, 0);
        assert!(!TABLE.is_pending(TestKey::Other));
        assert_eq!(TABLE.state(TestKey::Other), DeferredState::Idle);

        TABLE.call_deferred_at(TestKey::Other, t0, 10_000);
        TABLE.call_deferred_at(TestKey::Other, t0, -1);
        TABLE.run_expired(Instant::from_millis(100));
        assert_eq!(OTHER_RUNS.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_routine_can_rearm_itself() {
        TABLE.call_deferred_at(TestKey::Rearm, Instant::from_millis(0), 500_000);

        let next = TABLE.run_expired(Instant::from_millis(500));
        assert_eq!(REARM_RUNS.load(Ordering::Relaxed), 1);
        assert_eq!(TABLE.state(TestKey::Rearm), DeferredState::Pending);
        assert_eq!(TABLE.deadline(TestKey::Rearm), Some(Instant::from_millis(1_001)));
        assert!(next.is_some());

        TABLE.run_expired(Instant::from_millis(1_001));
        assert_eq!(REARM_RUNS.load(Ordering::Relaxed), 2);
        assert_eq!(TABLE.state(TestKey::Rearm), DeferredState::Idle);
    }

    fn idle_routine() {}

    // 独立的表, 唤醒信号不受其他测试影响
    declare_deferred! {
        static WAKE_TABLE: WakeKey = {
            Armed => idle_routine,
            Unused => idle_routine,
        }
    }

    #[test]
    fn test_arm_and_cancel_raise_wake() {
        let t0 = Instant::from_millis(0);
        assert!(!WAKE_TABLE.wake.is_pending());

        WAKE_TABLE.call_deferred_at(WakeKey::Armed, t0, 10_000);
        assert!(WAKE_TABLE.wake.is_pending());
        WAKE_TABLE.wake.reset();

        WAKE_TABLE.cancel(WakeKey::Armed);
        assert!(WAKE_TABLE.wake.is_pending());
        WAKE_TABLE.wake.reset();

        // 取消空闲的调用不打扰钩子任务
        WAKE_TABLE.cancel(WakeKey::Unused);
        WAKE_TABLE.call_deferred_at(WakeKey::Armed, t0, 0);
        assert!(!WAKE_TABLE.wake.is_pending());
    }

    #[test]
    fn test_key_metadata() {
        assert_eq!(TABLE.len(), 3);
        assert_eq!(TestKey::Rearm.index(), 1);
        assert_eq!(TestKey::Other.name(), "Other");
    }
}
