//! 钩子任务
//!
//! 唯一执行延迟调用的任务上下文:
//! - 先执行所有到期的延迟调用
//! - 再按周期发出 `HookType::Tick` (200ms) 和 `HookType::Second` (1s)
//! - 睡眠到下一个截止时间, 或被新武装的延迟调用提前唤醒
//!
//! 处理函数运行超时导致错过的周期不会补发, 下一周期从当前时间重新计算

use embassy_futures::select::select;
use embassy_time::{Duration, Instant, Timer};

use crate::config::{HOOK_TICK_INTERVAL_US, SECOND_US};
use crate::hook::deferred::{DeferredKey, DeferredTable};
use crate::hook::{HookTable, HookType};
use crate::log_warn;

/// 周期钩子调度状态
pub struct HookScheduler {
    next_tick: Instant,
    next_second: Instant,
}

impl HookScheduler {
    /// 以启动时间创建调度器
    pub fn new(now: Instant) -> Self {
        Self {
            next_tick: now + Duration::from_micros(HOOK_TICK_INTERVAL_US),
            next_second: now + Duration::from_micros(SECOND_US),
        }
    }

    /// 下一次 `Tick`
    pub fn next_tick(&self) -> Instant {
        self.next_tick
    }

    /// 下一次 `Second`
    pub fn next_second(&self) -> Instant {
        self.next_second
    }

    /// 处理一轮: 延迟调用, 然后到期的周期钩子
    ///
    /// # Returns
    /// 下一次需要唤醒的时间
    pub fn service<K: DeferredKey, const H: usize, const D: usize>(
        &mut self,
        hooks: &HookTable<H>,
        deferred: &DeferredTable<K, D>,
        now: Instant,
    ) -> Instant {
        deferred.run_expired(now);

        if now >= self.next_tick {
            hooks.notify(HookType::Tick);
            self.next_tick = advance(self.next_tick, now, HOOK_TICK_INTERVAL_US);
        }

        if now >= self.next_second {
            hooks.notify(HookType::Second);
            self.next_second = advance(self.next_second, now, SECOND_US);
        }

        // 周期钩子中的处理函数可能武装了新的延迟调用
        let wake = self.next_tick.min(self.next_second);
        match deferred.next_deadline() {
            Some(deadline) => wake.min(deadline),
            None => wake,
        }
    }
}

fn advance(last: Instant, now: Instant, interval_us: u64) -> Instant {
    let interval = Duration::from_micros(interval_us);
    let next = last + interval;
    if next <= now {
        log_warn!("periodic hook overrun by {}us", (now - last).as_micros());
        now + interval
    } else {
        next
    }
}

/// 钩子任务主循环
///
/// 固件用 `#[embassy_executor::task]` 包装并传入静态表
pub async fn hook_task<K: DeferredKey, const H: usize, const D: usize>(
    hooks: &'static HookTable<H>,
    deferred: &'static DeferredTable<K, D>,
) -> ! {
    let mut scheduler = HookScheduler::new(Instant::now());

    loop {
        let wake_at = scheduler.service(hooks, deferred, Instant::now());
        select(Timer::at(wake_at), deferred.wait_wake()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{declare_deferred, declare_hooks};
    use portable_atomic::{AtomicU32, Ordering};

    static TICKS: AtomicU32 = AtomicU32::new(0);
    static SECONDS: AtomicU32 = AtomicU32::new(0);
    static FIRED: AtomicU32 = AtomicU32::new(0);

    fn on_tick() {
        TICKS.fetch_add(1, Ordering::Relaxed);
    }

    fn on_second() {
        SECONDS.fetch_add(1, Ordering::Relaxed);
    }

    fn work() {
        FIRED.fetch_add(1, Ordering::Relaxed);
    }

    declare_hooks! {
        static PERIODIC = [
            (HookType::Tick, on_tick, crate::hook::HOOK_PRIO_DEFAULT),
            (HookType::Second, on_second, crate::hook::HOOK_PRIO_DEFAULT),
        ];
    }

    declare_hooks! {
        static NONE = [];
    }

    declare_deferred! {
        static PERIODIC_DEFERRED: PeriodicKey = {
            Unused => work,
        }
    }

    declare_deferred! {
        static WORK: WorkKey = {
            Work => work,
        }
    }

    #[test]
    fn test_tick_and_second_cadence() {
        let t0 = Instant::from_secs(100);
        let mut scheduler = HookScheduler::new(t0);

        let mut wake = scheduler.service(&PERIODIC, &PERIODIC_DEFERRED, t0);
        assert_eq!(wake, t0 + Duration::from_millis(200));
        for _ in 0..5 {
            wake = scheduler.service(&PERIODIC, &PERIODIC_DEFERRED, wake);
        }

        assert_eq!(TICKS.load(Ordering::Relaxed), 5);
        assert_eq!(SECONDS.load(Ordering::Relaxed), 1);
        assert_eq!(scheduler.next_second(), t0 + Duration::from_secs(2));

        // 错过的周期不补发
        let late = t0 + Duration::from_millis(1_900);
        scheduler.service(&PERIODIC, &PERIODIC_DEFERRED, late);
        assert_eq!(TICKS.load(Ordering::Relaxed), 6);
        assert_eq!(scheduler.next_tick(), late + Duration::from_millis(200));
    }

    #[test]
    fn test_wakes_for_deferred_deadline() {
        let t0 = Instant::from_secs(10);
        let mut scheduler = HookScheduler::new(t0);

        WORK.call_deferred_at(WorkKey::Work, t0, 50_000);
        let wake = scheduler.service(&NONE, &WORK, t0);
        assert_eq!(wake, t0 + Duration::from_millis(50));

        let wake = scheduler.service(&NONE, &WORK, wake);
        assert_eq!(FIRED.load(Ordering::Relaxed), 1);
        assert_eq!(wake, t0 + Duration::from_millis(200));
    }
}
