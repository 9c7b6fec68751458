//! 控制台通道掩码
//!
//! 每个诊断输出类别是一个通道, 对应 32 位掩码中的一位:
//! - 掩码中该位清零时, 该通道的输出是静默的空操作 (仍然返回成功)
//! - 掩码设置/切换命令总是保留 `Command` 通道位
//! - 受限模式下, 默认掩码之外的通道是受限通道, 命令不能打开它们

use portable_atomic::{AtomicBool, AtomicU32, Ordering};

use crate::error::{EcError, EcResult};

/// 控制台通道
///
/// 通道集合在编译期固定; `Command` 必须是 0
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Channel {
    /// 控制台命令的输出
    Command = 0,
    Accel,
    Charger,
    Chipset,
    Clock,
    Dma,
    Events,
    Gesture,
    Gpio,
    HostCmd,
    I2c,
    Keyboard,
    KeyScan,
    LidAngle,
    Lpc,
    Motion,
    Pd,
    Port80,
    Pwm,
    Spi,
    Switch,
    System,
    Task,
    Thermal,
    UsbCharge,
    UsbPd,
    Hook,
}

impl Channel {
    /// 通道数量
    pub const COUNT: usize = 27;

    /// 所有通道, 按编号排列
    pub const ALL: [Channel; Self::COUNT] = [
        Channel::Command,
        Channel::Accel,
        Channel::Charger,
        Channel::Chipset,
        Channel::Clock,
        Channel::Dma,
        Channel::Events,
        Channel::Gesture,
        Channel::Gpio,
        Channel::HostCmd,
        Channel::I2c,
        Channel::Keyboard,
        Channel::KeyScan,
        Channel::LidAngle,
        Channel::Lpc,
        Channel::Motion,
        Channel::Pd,
        Channel::Port80,
        Channel::Pwm,
        Channel::Spi,
        Channel::Switch,
        Channel::System,
        Channel::Task,
        Channel::Thermal,
        Channel::UsbCharge,
        Channel::UsbPd,
        Channel::Hook,
    ];

    /// 通道名 (`chan` 命令使用)
    pub const fn name(self) -> &'static str {
        match self {
            Channel::Command => "command",
            Channel::Accel => "accel",
            Channel::Charger => "charger",
            Channel::Chipset => "chipset",
            Channel::Clock => "clock",
            Channel::Dma => "dma",
            Channel::Events => "events",
            Channel::Gesture => "gesture",
            Channel::Gpio => "gpio",
            Channel::HostCmd => "hostcmd",
            Channel::I2c => "i2c",
            Channel::Keyboard => "keyboard",
            Channel::KeyScan => "keyscan",
            Channel::LidAngle => "lidangle",
            Channel::Lpc => "lpc",
            Channel::Motion => "motion",
            Channel::Pd => "pd",
            Channel::Port80 => "port80",
            Channel::Pwm => "pwm",
            Channel::Spi => "spi",
            Channel::Switch => "switch",
            Channel::System => "system",
            Channel::Task => "task",
            Channel::Thermal => "thermal",
            Channel::UsbCharge => "usbcharge",
            Channel::UsbPd => "usbpd",
            Channel::Hook => "hook",
        }
    }

    /// 按名称查找通道 (不区分大小写)
    pub fn from_name(name: &str) -> Option<Channel> {
        Self::ALL
            .iter()
            .copied()
            .find(|ch| ch.name().eq_ignore_ascii_case(name))
    }

    /// 通道位 (`CC_MASK`)
    #[inline(always)]
    pub const fn mask(self) -> u32 {
        1 << (self as u32)
    }
}

const _: () = assert!(Channel::COUNT <= 32, "channel mask is 32 bits");

/// 所有通道
pub const CC_ALL: u32 = if Channel::COUNT == 32 {
    u32::MAX
} else {
    (1u32 << Channel::COUNT) - 1
};

/// 默认打开的通道
pub const CC_DEFAULT: u32 = CC_ALL;

// ===== 通道门控 =====

/// 通道掩码状态
pub struct ChannelGate {
    mask: AtomicU32,
    /// `disable_output`/`chan save` 共用的保存槽
    saved: AtomicU32,
    default: u32,
    restricted: AtomicBool,
    /// `disable_output` 已生效, 尚未 `enable_output`
    disabled: AtomicBool,
}

impl ChannelGate {
    /// 以给定默认掩码创建门控
    pub const fn new(default: u32) -> Self {
        Self {
            mask: AtomicU32::new(default),
            saved: AtomicU32::new(default),
            default,
            restricted: AtomicBool::new(false),
            disabled: AtomicBool::new(false),
        }
    }

    /// 当前掩码
    #[inline(always)]
    pub fn mask(&self) -> u32 {
        self.mask.load(Ordering::Relaxed)
    }

    /// 默认掩码
    pub const fn default_mask(&self) -> u32 {
        self.default
    }

    /// 受限通道集合 (默认掩码之外的通道)
    pub const fn restricted_mask(&self) -> u32 {
        (CC_ALL ^ self.default) & CC_ALL
    }

    /// 通道是否打开
    #[inline(always)]
    pub fn is_enabled(&self, channel: Channel) -> bool {
        self.mask() & channel.mask() != 0
    }

    /// 控制台是否处于受限模式
    pub fn is_restricted(&self) -> bool {
        self.restricted.load(Ordering::Relaxed)
    }

    /// 进入/退出受限模式
    pub fn set_restricted(&self, restricted: bool) {
        self.restricted.store(restricted, Ordering::Relaxed);
    }

    /// 关闭全部输出, 保存当前掩码 (单层)
    ///
    /// 已关闭时再次调用不做任何事, 嵌套的调用对只有最外层生效
    pub fn disable_output(&self) {
        if self.disabled.swap(true, Ordering::AcqRel) {
            return;
        }
        let mask = self.mask.swap(0, Ordering::Relaxed);
        self.saved.store(mask, Ordering::Relaxed);
    }

    /// 恢复 `disable_output` 保存的掩码; 未关闭时不做任何事
    pub fn enable_output(&self) {
        if !self.disabled.swap(false, Ordering::AcqRel) {
            return;
        }
        self.mask.store(self.saved.load(Ordering::Relaxed), Ordering::Relaxed);
    }

    /// 输出是否被 `disable_output` 关闭
    pub fn is_output_disabled(&self) -> bool {
        self.disabled.load(Ordering::Relaxed)
    }

    /// 保存当前掩码 (只保存非受限通道)
    pub fn save(&self) {
        self.saved.store(self.mask() & self.default, Ordering::Relaxed);
    }

    /// 恢复保存的掩码
    pub fn restore(&self) -> EcResult {
        self.update_mask(self.saved.load(Ordering::Relaxed))
    }

    /// 切换一个通道, 返回切换后是否打开
    ///
    /// `Command` 通道不会被关闭
    pub fn toggle(&self, channel: Channel) -> EcResult<bool> {
        let new_mask = (self.mask() ^ channel.mask()) | Channel::Command.mask();
        self.update_mask(new_mask)?;
        Ok(new_mask & channel.mask() != 0)
    }

    /// 命令路径设置完整掩码 (总是保留 `Command` 通道)
    pub fn set_mask_from_command(&self, mask: u32) -> EcResult {
        self.update_mask(mask | Channel::Command.mask())
    }

    /// 按名称打开通道
    pub fn channel_enable(&self, name: &str) -> EcResult {
        let channel = Channel::from_name(name).ok_or(EcError::Inval)?;
        self.update_mask(self.mask() | channel.mask())
    }

    /// 按名称关闭通道
    pub fn channel_disable(&self, name: &str) -> EcResult {
        let channel = Channel::from_name(name).ok_or(EcError::Inval)?;
        self.update_mask((self.mask() & !channel.mask()) | Channel::Command.mask())
    }

    /// 写入新掩码; 受限模式下包含受限通道时拒绝
    pub fn update_mask(&self, new_mask: u32) -> EcResult {
        if self.is_restricted() && new_mask & self.restricted_mask() != 0 {
            return Err(EcError::AccessDenied);
        }
        self.mask.store(new_mask, Ordering::Relaxed);
        Ok(())
    }
}

impl Default for ChannelGate {
    fn default() -> Self {
        Self::new(CC_DEFAULT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_table() {
        assert_eq!(Channel::ALL.len(), Channel::COUNT);
        for (i, ch) in Channel::ALL.iter().enumerate() {
            assert_eq!(*ch as usize, i);
            assert_eq!(Channel::from_name(ch.name()), Some(*ch));
        }
        assert_eq!(Channel::from_name("USBPD"), Some(Channel::UsbPd));
        assert_eq!(Channel::from_name("nope"), None);
        assert_eq!(CC_ALL, 0x07ff_ffff);
    }

    #[test]
    fn test_command_bit_survives_mask_set() {
        let gate = ChannelGate::default();
        gate.set_mask_from_command(0).unwrap();
        assert!(gate.is_enabled(Channel::Command));
        assert_eq!(gate.mask(), Channel::Command.mask());

        // 切换 command 本身也关不掉
        assert_eq!(gate.toggle(Channel::Command), Ok(true));
        assert!(gate.is_enabled(Channel::Command));
    }

    #[test]
    fn test_toggle_and_by_name() {
        let gate = ChannelGate::default();
        assert_eq!(gate.toggle(Channel::Pd), Ok(false));
        assert!(!gate.is_enabled(Channel::Pd));
        gate.channel_enable("pd").unwrap();
        assert!(gate.is_enabled(Channel::Pd));
        gate.channel_disable("command").unwrap();
        assert!(gate.is_enabled(Channel::Command));
        assert_eq!(gate.channel_enable("bogus"), Err(EcError::Inval));
    }

    #[test]
    fn test_disable_enable_output_pair() {
        let gate = ChannelGate::default();
        gate.toggle(Channel::Gpio).unwrap();
        let before = gate.mask();

        gate.disable_output();
        assert_eq!(gate.mask(), 0);
        assert!(!gate.is_enabled(Channel::Command));

        gate.enable_output();
        assert_eq!(gate.mask(), before);
    }

    #[test]
    fn test_nested_disable_enable_collapses() {
        let gate = ChannelGate::default();
        let before = gate.mask();

        gate.disable_output();
        gate.disable_output();
        assert!(gate.is_output_disabled());
        assert_eq!(gate.mask(), 0);

        gate.enable_output();
        assert!(!gate.is_output_disabled());
        assert_eq!(gate.mask(), before);

        // 多余的 enable 不改变掩码
        gate.toggle(Channel::Pd).unwrap();
        let after = gate.mask();
        gate.enable_output();
        assert_eq!(gate.mask(), after);
    }

    #[test]
    fn test_restricted_channels_rejected() {
        let default = CC_ALL & !Channel::Port80.mask();
        let gate = ChannelGate::new(default);
        gate.set_restricted(true);

        assert_eq!(gate.toggle(Channel::Port80), Err(EcError::AccessDenied));
        assert_eq!(gate.set_mask_from_command(CC_ALL), Err(EcError::AccessDenied));
        assert_eq!(gate.mask(), default);

        // 不受限时可以打开
        gate.set_restricted(false);
        assert_eq!(gate.toggle(Channel::Port80), Ok(true));

        // save 只保存非受限通道, 所以受限模式下 restore 成功
        gate.save();
        gate.set_restricted(true);
        assert_eq!(gate.restore(), Ok(()));
        assert!(!gate.is_enabled(Channel::Port80));
    }
}
