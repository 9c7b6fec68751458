//! 钩子通知总线
//!
//! 固件生命周期事件 (初始化、周期 tick、电源状态变化等) 的同步发布/订阅:
//! - 处理函数在编译期通过 [`declare_hooks!`] 静态注册, 运行时没有注册接口
//! - 同一事件的处理函数按优先级升序执行, 优先级相同时按注册顺序 (稳定排序)
//! - 排序在编译期完成, `notify` 只做一次线性遍历
//! - 处理函数不返回状态; 某个处理函数出错时自行通过控制台通道报告,
//!   总线不会因此中止其余处理函数
//!
//! # Example
//! ```ignore
//! fn pwm_init() { /* ... */ }
//! fn led_init() { /* ... */ }
//!
//! declare_hooks! {
//!     pub static HOOKS = [
//!         (HookType::Init, led_init, HOOK_PRIO_DEFAULT),
//!         (HookType::Init, pwm_init, HOOK_PRIO_INIT_PWM),
//!     ];
//! }
//!
//! HOOKS.notify(HookType::Init); // pwm_init 先于 led_init
//! ```

pub mod deferred;

use crate::config::HOOK_ENTRIES_MAX;
use crate::sync::primitives::AtomicCounter;
use crate::{log_trace, timed};

// ===== 优先级 =====

/// 最先执行
pub const HOOK_PRIO_FIRST: i32 = 1;
/// 紧随最先执行的处理函数之后
pub const HOOK_PRIO_POST_FIRST: i32 = HOOK_PRIO_FIRST + 1;
/// 默认优先级
pub const HOOK_PRIO_DEFAULT: i32 = 5000;
/// 默认优先级之前
pub const HOOK_PRIO_PRE_DEFAULT: i32 = HOOK_PRIO_DEFAULT - 1;
/// 默认优先级之后
pub const HOOK_PRIO_POST_DEFAULT: i32 = HOOK_PRIO_DEFAULT + 1;
/// 最后执行
pub const HOOK_PRIO_LAST: i32 = 9999;

// `HookType::Init` 专用优先级: 被依赖的模块必须先初始化
/// 芯片组状态机
pub const HOOK_PRIO_INIT_CHIPSET: i32 = HOOK_PRIO_FIRST + 1;
/// I2C 总线 (其它驱动依赖)
pub const HOOK_PRIO_INIT_I2C: i32 = HOOK_PRIO_FIRST + 2;
/// 盖子开关
pub const HOOK_PRIO_INIT_LID: i32 = HOOK_PRIO_FIRST + 3;
/// 外部电源检测
pub const HOOK_PRIO_INIT_EXTPOWER: i32 = HOOK_PRIO_FIRST + 4;
/// ADC
pub const HOOK_PRIO_INIT_ADC: i32 = HOOK_PRIO_DEFAULT;
/// PWM 通道选择 (必须先于依赖它输出的 LED 处理函数)
pub const HOOK_PRIO_INIT_PWM: i32 = HOOK_PRIO_DEFAULT - 1;
/// 温度传感器 (依赖 ADC)
pub const HOOK_PRIO_TEMP_SENSOR: i32 = HOOK_PRIO_DEFAULT + 1;

// ===== 钩子类型 =====

/// 钩子事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum HookType {
    /// 系统初始化 (任务启动前, 只通知一次)
    Init = 0,
    /// 系统时钟频率即将改变
    PreFreqChange,
    /// 系统时钟频率已改变
    FreqChange,
    /// 即将跳转到另一镜像
    Sysjump,
    /// 芯片组上电前初始化
    ChipsetPreInit,
    /// 芯片组启动 (S5 → S3)
    ChipsetStartup,
    /// 芯片组恢复 (S3 → S0)
    ChipsetResume,
    /// 芯片组挂起 (S0 → S3)
    ChipsetSuspend,
    /// 芯片组关机 (S3 → S5)
    ChipsetShutdown,
    /// 芯片组复位
    ChipsetReset,
    /// 外部电源接入/断开
    AcChange,
    /// 盖子打开/合上
    LidChange,
    /// 平板模式切换
    TabletModeChange,
    /// 电源按键状态变化
    PowerButtonChange,
    /// 充电状态变化
    ChargeStateChange,
    /// 电池电量变化
    BatterySocChange,
    /// 周期 tick (`HOOK_TICK_INTERVAL_US`)
    Tick,
    /// 每秒一次
    Second,
}

impl HookType {
    /// 钩子类型数量
    pub const COUNT: usize = 18;

    /// 所有钩子类型
    pub const ALL: [HookType; Self::COUNT] = [
        HookType::Init,
        HookType::PreFreqChange,
        HookType::FreqChange,
        HookType::Sysjump,
        HookType::ChipsetPreInit,
        HookType::ChipsetStartup,
        HookType::ChipsetResume,
        HookType::ChipsetSuspend,
        HookType::ChipsetShutdown,
        HookType::ChipsetReset,
        HookType::AcChange,
        HookType::LidChange,
        HookType::TabletModeChange,
        HookType::PowerButtonChange,
        HookType::ChargeStateChange,
        HookType::BatterySocChange,
        HookType::Tick,
        HookType::Second,
    ];

    /// 钩子名称 (用于统计输出)
    pub const fn name(self) -> &'static str {
        match self {
            HookType::Init => "init",
            HookType::PreFreqChange => "pre_freq_change",
            HookType::FreqChange => "freq_change",
            HookType::Sysjump => "sysjump",
            HookType::ChipsetPreInit => "chipset_pre_init",
            HookType::ChipsetStartup => "chipset_startup",
            HookType::ChipsetResume => "chipset_resume",
            HookType::ChipsetSuspend => "chipset_suspend",
            HookType::ChipsetShutdown => "chipset_shutdown",
            HookType::ChipsetReset => "chipset_reset",
            HookType::AcChange => "ac_change",
            HookType::LidChange => "lid_change",
            HookType::TabletModeChange => "tablet_mode_change",
            HookType::PowerButtonChange => "pwrbtn_change",
            HookType::ChargeStateChange => "charge_state_change",
            HookType::BatterySocChange => "battery_soc_change",
            HookType::Tick => "tick",
            HookType::Second => "second",
        }
    }

    #[inline(always)]
    const fn index(self) -> usize {
        self as usize
    }
}

// ===== 注册条目 =====

/// 一条钩子注册: (事件, 处理函数, 优先级)
#[derive(Clone, Copy)]
pub struct HookEntry {
    /// 事件
    pub hook: HookType,
    /// 处理函数
    pub routine: fn(),
    /// 优先级 (越小越先执行)
    pub priority: i32,
}

impl HookEntry {
    /// 创建注册条目
    pub const fn new(hook: HookType, routine: fn(), priority: i32) -> Self {
        Self { hook, routine, priority }
    }
}

/// 单个钩子类型的运行统计
pub struct HookStats {
    notifies: AtomicCounter,
    last_us: AtomicCounter,
    max_us: AtomicCounter,
}

impl HookStats {
    const fn new() -> Self {
        Self {
            notifies: AtomicCounter::new(),
            last_us: AtomicCounter::new(),
            max_us: AtomicCounter::new(),
        }
    }

    /// 通知次数
    pub fn notifies(&self) -> u64 {
        self.notifies.get()
    }

    /// 最近一次通知耗时 (μs)
    pub fn last_us(&self) -> u64 {
        self.last_us.get()
    }

    /// 最长一次通知耗时 (μs)
    pub fn max_us(&self) -> u64 {
        self.max_us.get()
    }
}

// ===== 钩子表 =====

/// 编译期排好序的钩子表
pub struct HookTable<const N: usize> {
    entries: [HookEntry; N],
    stats: [HookStats; HookType::COUNT],
}

#[allow(clippy::declare_interior_mutable_const)]
const STATS_INIT: HookStats = HookStats::new();

impl<const N: usize> HookTable<N> {
    const BOUND_OK: () = assert!(N <= HOOK_ENTRIES_MAX, "too many hook registrations");

    /// 构建钩子表 (按优先级稳定排序)
    ///
    /// 通常通过 [`declare_hooks!`] 调用
    pub const fn new(mut entries: [HookEntry; N]) -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::BOUND_OK;

        crate::const_insertion_sort!(entries, |e| e.priority);

        Self {
            entries,
            stats: [STATS_INIT; HookType::COUNT],
        }
    }

    /// 某事件的所有处理函数, 按执行顺序
    pub fn handlers(&self, hook: HookType) -> impl Iterator<Item = &HookEntry> + '_ {
        self.entries.iter().filter(move |e| e.hook == hook)
    }

    /// 同步通知某事件的所有处理函数
    ///
    /// 在调用者的上下文中执行 (通常是钩子任务或初始化序列)
    pub fn notify(&self, hook: HookType) {
        let (count, elapsed_us) = timed!({
            let mut count = 0u32;
            for entry in self.handlers(hook) {
                (entry.routine)();
                count += 1;
            }
            count
        });

        let stats = &self.stats[hook.index()];
        stats.notifies.increment();
        stats.last_us.set(elapsed_us);
        stats.max_us.max(elapsed_us);

        log_trace!("hook {}: {} handlers in {}us", hook.name(), count, elapsed_us);
    }

    /// 某事件的运行统计
    pub fn stats(&self, hook: HookType) -> &HookStats {
        &self.stats[hook.index()]
    }

    /// 注册总数
    pub const fn len(&self) -> usize {
        N
    }

    /// 是否没有任何注册
    pub const fn is_empty(&self) -> bool {
        N == 0
    }
}

/// 静态声明钩子表
///
/// 每条注册为 `(HookType, 处理函数, 优先级)`
#[macro_export]
macro_rules! declare_hooks {
    (
        $vis:vis static $name:ident = [
            $( ($hook:expr, $routine:expr, $prio:expr) ),* $(,)?
        ];
    ) => {
        $vis static $name: $crate::hook::HookTable<{ $crate::count_items!($($routine)*) }> =
            $crate::hook::HookTable::new([
                $( $crate::hook::HookEntry::new($hook, $routine, $prio) ),*
            ]);
    };
}
