//! 主机命令分发
//!
//! 主机 (AP) 通过 protocol v3 数据包向 EC 发送命令:
//! - 命令表在编译期按命令码排好序, 重复的命令码是编译期错误
//! - 每条命令带版本掩码, 请求的版本位未置位时返回 `InvalidVersion`
//! - 处理函数写入响应缓冲区并返回 [`EcStatus`]
//!
//! 数据包格式见 [`packet`]

pub mod packet;

use core::fmt;

use crate::console::Channel;
use crate::log_debug;

// ===== 结果码 =====

/// 主机命令结果码 (线上格式 u16)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u16)]
pub enum EcStatus {
    Success = 0,
    InvalidCommand = 1,
    Error = 2,
    InvalidParam = 3,
    AccessDenied = 4,
    InvalidResponse = 5,
    InvalidVersion = 6,
    InvalidChecksum = 7,
    /// 已接受, 仍在处理
    InProgress = 8,
    /// 没有可用响应
    Unavailable = 9,
    Timeout = 10,
    Overflow = 11,
    /// 请求头数据无效
    InvalidHeader = 12,
    /// 请求不完整
    RequestTruncated = 13,
    /// 响应超出传输缓冲区
    ResponseTooBig = 14,
    BusError = 15,
    /// 忙, 主机应重试
    Busy = 16,
}

impl EcStatus {
    /// 由线上数值解析
    pub const fn from_u16(raw: u16) -> Option<Self> {
        Some(match raw {
            0 => EcStatus::Success,
            1 => EcStatus::InvalidCommand,
            2 => EcStatus::Error,
            3 => EcStatus::InvalidParam,
            4 => EcStatus::AccessDenied,
            5 => EcStatus::InvalidResponse,
            6 => EcStatus::InvalidVersion,
            7 => EcStatus::InvalidChecksum,
            8 => EcStatus::InProgress,
            9 => EcStatus::Unavailable,
            10 => EcStatus::Timeout,
            11 => EcStatus::Overflow,
            12 => EcStatus::InvalidHeader,
            13 => EcStatus::RequestTruncated,
            14 => EcStatus::ResponseTooBig,
            15 => EcStatus::BusError,
            16 => EcStatus::Busy,
            _ => return None,
        })
    }

    /// 线上数值
    #[inline(always)]
    pub const fn code(self) -> u16 {
        self as u16
    }
}

impl fmt::Display for EcStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EcStatus::Success => "success",
            EcStatus::InvalidCommand => "invalid command",
            EcStatus::Error => "error",
            EcStatus::InvalidParam => "invalid param",
            EcStatus::AccessDenied => "access denied",
            EcStatus::InvalidResponse => "invalid response",
            EcStatus::InvalidVersion => "invalid version",
            EcStatus::InvalidChecksum => "invalid checksum",
            EcStatus::InProgress => "in progress",
            EcStatus::Unavailable => "unavailable",
            EcStatus::Timeout => "timeout",
            EcStatus::Overflow => "overflow",
            EcStatus::InvalidHeader => "invalid header",
            EcStatus::RequestTruncated => "request truncated",
            EcStatus::ResponseTooBig => "response too big",
            EcStatus::BusError => "bus error",
            EcStatus::Busy => "busy",
        };
        f.write_str(s)
    }
}

// ===== 命令码 =====

/// 回显测试: 响应 = 请求 + 0x01020304
pub const EC_CMD_HELLO: u16 = 0x0001;
/// 查询命令支持的版本掩码
pub const EC_CMD_GET_CMD_VERSIONS: u16 = 0x0008;

/// 版本 `v` 对应的掩码位
#[inline(always)]
pub const fn ec_ver_mask(version: u8) -> u32 {
    1 << version
}

// ===== 命令参数 =====

/// 查询命令表的接口 (供 `GET_CMD_VERSIONS` 使用)
pub trait HostCommandLookup {
    /// 命令的版本掩码; 未注册时返回 `None`
    fn versions(&self, command: u16) -> Option<u32>;
}

/// 一次主机命令调用
pub struct HostCmdArgs<'a> {
    /// 命令码
    pub command: u16,
    /// 命令版本
    pub version: u8,
    /// 请求数据
    pub params: &'a [u8],
    /// 响应缓冲区
    pub response: &'a mut [u8],
    /// 实际响应长度 (处理函数设置)
    pub response_size: usize,
    lookup: &'a dyn HostCommandLookup,
}

impl<'a> HostCmdArgs<'a> {
    /// 读取请求中的 little-endian u32
    pub fn param_u32(&self, offset: usize) -> Option<u32> {
        let bytes = self.params.get(offset..offset + 4)?;
        Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// 读取请求中的 little-endian u16
    pub fn param_u16(&self, offset: usize) -> Option<u16> {
        let bytes = self.params.get(offset..offset + 2)?;
        Some(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    /// 写入响应数据
    ///
    /// # Errors
    /// 超出响应缓冲区时返回 `InvalidResponse`
    pub fn set_response(&mut self, data: &[u8]) -> Result<(), EcStatus> {
        let out = self
            .response
            .get_mut(..data.len())
            .ok_or(EcStatus::InvalidResponse)?;
        out.copy_from_slice(data);
        self.response_size = data.len();
        Ok(())
    }

    /// 查询命令表
    pub fn lookup(&self) -> &dyn HostCommandLookup {
        self.lookup
    }
}

/// 主机命令处理函数
pub type HostCmdHandler = fn(&mut HostCmdArgs<'_>) -> EcStatus;

/// 一条主机命令注册
#[derive(Clone, Copy)]
pub struct HostCommand {
    /// 命令码
    pub command: u16,
    /// 支持的版本 (`ec_ver_mask` 之和)
    pub version_mask: u32,
    /// 处理函数
    pub handler: HostCmdHandler,
}

impl HostCommand {
    /// 创建注册
    pub const fn new(command: u16, handler: HostCmdHandler, version_mask: u32) -> Self {
        Self { command, version_mask, handler }
    }
}

/// 一次分发的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostResponse {
    /// 结果码
    pub status: EcStatus,
    /// 响应数据长度 (失败时为 0)
    pub size: usize,
}

// ===== 命令表 =====

/// 编译期按命令码排好序的主机命令表
pub struct HostCommandTable<const N: usize> {
    commands: [HostCommand; N],
}

impl<const N: usize> HostCommandTable<N> {
    /// 构建命令表 (排序并检查重复)
    ///
    /// 通常通过 [`declare_host_commands!`] 调用
    pub const fn new(mut commands: [HostCommand; N]) -> Self {
        crate::const_insertion_sort!(commands, |c| c.command);

        let mut i = 1;
        while i < N {
            if commands[i].command == commands[i - 1].command {
                panic!("duplicate host command");
            }
            i += 1;
        }

        Self { commands }
    }

    /// 查找命令 (二分)
    pub fn find(&self, command: u16) -> Option<&HostCommand> {
        self.commands
            .binary_search_by_key(&command, |c| c.command)
            .ok()
            .map(|i| &self.commands[i])
    }

    /// 所有命令, 按命令码升序
    pub fn iter(&self) -> impl Iterator<Item = &HostCommand> {
        self.commands.iter()
    }

    /// 分发一条命令
    ///
    /// * `response` - 响应缓冲区, 其长度即允许的最大响应
    pub fn process(&self, command: u16, version: u8, params: &[u8], response: &mut [u8]) -> HostResponse {
        let _ = crate::console::console().cprints(
            Channel::HostCmd,
            format_args!("HC 0x{:04x}.{}", command, version),
        );

        let Some(cmd) = self.find(command) else {
            return HostResponse { status: EcStatus::InvalidCommand, size: 0 };
        };

        if version >= 32 || cmd.version_mask & ec_ver_mask(version) == 0 {
            return HostResponse { status: EcStatus::InvalidVersion, size: 0 };
        }

        let max = response.len();
        let mut args = HostCmdArgs {
            command,
            version,
            params,
            response,
            response_size: 0,
            lookup: self,
        };

        let mut status = (cmd.handler)(&mut args);
        if status == EcStatus::Success && args.response_size > max {
            status = EcStatus::InvalidResponse;
        }

        if status != EcStatus::Success {
            log_debug!("host command {} failed: {}", command, status.code());
            return HostResponse { status, size: 0 };
        }
        HostResponse { status, size: args.response_size }
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

impl<const N: usize> HostCommandLookup for HostCommandTable<N> {
    fn versions(&self, command: u16) -> Option<u32> {
        self.find(command).map(|c| c.version_mask)
    }
}

/// 静态声明主机命令表
///
/// 每条注册为 `(命令码, 处理函数, 版本掩码)`
///
/// ```ignore
/// declare_host_commands! {
///     pub static HOST_COMMANDS = [
///         (EC_CMD_HELLO, host_command_hello, ec_ver_mask(0)),
///     ];
/// }
/// ```
#[macro_export]
macro_rules! declare_host_commands {
    (
        $vis:vis static $name:ident = [
            $( ($command:expr, $handler:expr, $mask:expr) ),* $(,)?
        ];
    ) => {
        $vis static $name: $crate::host::HostCommandTable<{ $crate::count_items!($($handler)*) }> =
            $crate::host::HostCommandTable::new([
                $( $crate::host::HostCommand::new($command, $handler, $mask) ),*
            ]);
    };
}

// ===== 内置命令 =====

/// `EC_CMD_HELLO`: 请求 u32, 响应 u32 = 请求 + 0x01020304
pub fn host_command_hello(args: &mut HostCmdArgs<'_>) -> EcStatus {
    let Some(input) = args.param_u32(0) else {
        return EcStatus::InvalidParam;
    };
    match args.set_response(&input.wrapping_add(0x0102_0304).to_le_bytes()) {
        Ok(()) => EcStatus::Success,
        Err(status) => status,
    }
}

/// `EC_CMD_GET_CMD_VERSIONS`: v0 请求 u8 命令码, v1 请求 u16 命令码; 响应 u32 版本掩码
pub fn host_command_get_cmd_versions(args: &mut HostCmdArgs<'_>) -> EcStatus {
    let command = match args.version {
        0 => args.params.first().map(|&c| c as u16),
        _ => args.param_u16(0),
    };
    let Some(command) = command else {
        return EcStatus::InvalidParam;
    };
    let Some(mask) = args.lookup().versions(command) else {
        return EcStatus::InvalidParam;
    };
    match args.set_response(&mask.to_le_bytes()) {
        Ok(()) => EcStatus::Success,
        Err(status) => status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn big_response(args: &mut HostCmdArgs<'_>) -> EcStatus {
        args.response_size = args.response.len() + 1;
        EcStatus::Success
    }

    fn busy(_args: &mut HostCmdArgs<'_>) -> EcStatus {
        EcStatus::Busy
    }

    declare_host_commands! {
        static TEST_COMMANDS = [
            (0x0100, busy, ec_ver_mask(0)),
            (EC_CMD_GET_CMD_VERSIONS, host_command_get_cmd_versions, ec_ver_mask(0) | ec_ver_mask(1)),
            (0x00ff, big_response, ec_ver_mask(0)),
            (EC_CMD_HELLO, host_command_hello, ec_ver_mask(0)),
        ];
    }

    #[test]
    fn test_table_sorted_by_code() {
        let codes: Vec<u16> = TEST_COMMANDS.iter().map(|c| c.command).collect();
        assert_eq!(codes, vec![0x0001, 0x0008, 0x00ff, 0x0100]);
        assert!(TEST_COMMANDS.find(0x0002).is_none());
    }

    #[test]
    fn test_hello() {
        let mut out = [0u8; 8];
        let r = TEST_COMMANDS.process(EC_CMD_HELLO, 0, &0xa0b0_c0d0u32.to_le_bytes(), &mut out);
        assert_eq!(r, HostResponse { status: EcStatus::Success, size: 4 });
        assert_eq!(u32::from_le_bytes([out[0], out[1], out[2], out[3]]), 0xa1b2_c3d4);

        let r = TEST_COMMANDS.process(EC_CMD_HELLO, 0, &[1, 2], &mut out);
        assert_eq!(r.status, EcStatus::InvalidParam);
    }

    #[test]
    fn test_dispatch_errors() {
        let mut out = [0u8; 8];
        assert_eq!(TEST_COMMANDS.process(0x0002, 0, &[], &mut out).status, EcStatus::InvalidCommand);
        assert_eq!(TEST_COMMANDS.process(EC_CMD_HELLO, 1, &[0; 4], &mut out).status, EcStatus::InvalidVersion);
        assert_eq!(TEST_COMMANDS.process(EC_CMD_HELLO, 40, &[0; 4], &mut out).status, EcStatus::InvalidVersion);
        assert_eq!(TEST_COMMANDS.process(0x00ff, 0, &[], &mut out).status, EcStatus::InvalidResponse);
        assert_eq!(
            TEST_COMMANDS.process(0x0100, 0, &[], &mut out),
            HostResponse { status: EcStatus::Busy, size: 0 }
        );

        // 响应缓冲区不足
        let mut small = [0u8; 2];
        assert_eq!(TEST_COMMANDS.process(EC_CMD_HELLO, 0, &[0; 4], &mut small).status, EcStatus::InvalidResponse);
    }

    #[test]
    fn test_get_cmd_versions() {
        let mut out = [0u8; 4];
        let r = TEST_COMMANDS.process(EC_CMD_GET_CMD_VERSIONS, 0, &[0x08], &mut out);
        assert_eq!(r.status, EcStatus::Success);
        assert_eq!(u32::from_le_bytes(out), 0b11);

        let r = TEST_COMMANDS.process(EC_CMD_GET_CMD_VERSIONS, 1, &0x0100u16.to_le_bytes(), &mut out);
        assert_eq!(r.status, EcStatus::Success);
        assert_eq!(u32::from_le_bytes(out), 0b1);

        let r = TEST_COMMANDS.process(EC_CMD_GET_CMD_VERSIONS, 1, &0x0555u16.to_le_bytes(), &mut out);
        assert_eq!(r.status, EcStatus::InvalidParam);
    }

    #[test]
    fn test_status_codes() {
        for raw in 0..=16u16 {
            let status = EcStatus::from_u16(raw).unwrap();
            assert_eq!(status.code(), raw);
        }
        assert_eq!(EcStatus::from_u16(17), None);
    }
}
