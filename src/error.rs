//! 固件内部错误码
//!
//! 控制台命令, 驱动与控制台输出端共用的结果类型。
//! 数值与 EC 固件的 `EC_ERROR_*` 保持一致, 控制台会把它们打印出来。
//! 主机协议上的结果码见 [`crate::host::EcStatus`]。

use core::fmt;

/// 固件内部错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u32)]
pub enum EcError {
    /// 未知错误
    Unknown = 1,
    /// 功能未实现
    Unimplemented = 2,
    /// 溢出
    Overflow = 3,
    /// 超时
    Timeout = 4,
    /// 无效参数
    Inval = 5,
    /// 忙
    Busy = 6,
    /// 拒绝访问 (受限通道等)
    AccessDenied = 7,
    /// 设备未上电
    NotPowered = 8,
    /// 未校准
    NotCalibrated = 9,
    /// CRC 错误
    Crc = 10,
    /// 第 1 个参数无效
    Param1 = 11,
    /// 第 2 个参数无效
    Param2 = 12,
    /// 第 3 个参数无效
    Param3 = 13,
    /// 第 4 个参数无效
    Param4 = 14,
    /// 第 5 个参数无效
    Param5 = 15,
    /// 第 6 个参数无效
    Param6 = 16,
    /// 第 7 个参数无效
    Param7 = 17,
    /// 第 8 个参数无效
    Param8 = 18,
    /// 第 9 个参数无效
    Param9 = 19,
    /// 参数个数错误
    ParamCount = 20,
    /// 未处理
    NotHandled = 21,
    /// 无变化
    Unchanged = 22,
    /// 内存分配失败
    MemoryAllocation = 23,
    /// 配置无效
    InvalidConfig = 24,
    /// 硬件内部错误
    HwInternal = 25,
}

/// 固件内部结果类型
pub type EcResult<T = ()> = Result<T, EcError>;

impl EcError {
    /// 按位置构造参数错误 (`1..=9`), 超出范围时退化为 `Inval`
    pub const fn param(n: usize) -> Self {
        match n {
            1 => EcError::Param1,
            2 => EcError::Param2,
            3 => EcError::Param3,
            4 => EcError::Param4,
            5 => EcError::Param5,
            6 => EcError::Param6,
            7 => EcError::Param7,
            8 => EcError::Param8,
            9 => EcError::Param9,
            _ => EcError::Inval,
        }
    }

    /// 若为参数错误, 返回参数位置 (从 1 开始)
    pub const fn param_index(self) -> Option<u32> {
        let code = self as u32;
        if code >= EcError::Param1 as u32 && code <= EcError::Param9 as u32 {
            Some(code - EcError::Param1 as u32 + 1)
        } else {
            None
        }
    }

    /// 数值错误码
    #[inline(always)]
    pub const fn code(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for EcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.param_index() {
            Some(n) => write!(f, "parameter {} invalid", n),
            None => match self {
                EcError::ParamCount => f.write_str("wrong number of params"),
                EcError::AccessDenied => f.write_str("access denied"),
                EcError::Overflow => f.write_str("overflow"),
                EcError::Timeout => f.write_str("timeout"),
                EcError::Busy => f.write_str("busy"),
                other => write!(f, "error {}", other.code()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_round_trip() {
        for n in 1..=9 {
            assert_eq!(EcError::param(n).param_index(), Some(n as u32));
        }
        assert_eq!(EcError::param(0), EcError::Inval);
        assert_eq!(EcError::param(10), EcError::Inval);
        assert_eq!(EcError::ParamCount.param_index(), None);
    }

    #[test]
    fn test_codes_match_firmware_values() {
        assert_eq!(EcError::Param1.code(), 11);
        assert_eq!(EcError::ParamCount.code(), 20);
        assert_eq!(EcError::AccessDenied.code(), 7);
    }
}
