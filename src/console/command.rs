//! 控制台命令
//!
//! 命令在编译期以静态切片声明, 按行执行:
//! - 按空白切分参数 (最多 `MAX_ARGS_PER_COMMAND` 个, 含命令名)
//! - 命令名完全匹配优先, 否则接受唯一前缀 (`ch` → `chan`), 不区分大小写
//! - 处理函数的错误码被翻译为文本输出到 `Command` 通道

use heapless::Vec;

use super::channel::Channel;
use super::Console;
use crate::config::MAX_ARGS_PER_COMMAND;
use crate::error::{EcError, EcResult};
use crate::log_debug;

/// 受限模式下不可执行
pub const CMD_FLAG_RESTRICTED: u32 = 1 << 0;

/// 命令处理函数: `argv[0]` 是命令名
pub type CommandHandler = fn(&CommandContext<'_>, &[&str]) -> EcResult;

/// 一条控制台命令
#[derive(Clone, Copy)]
pub struct ConsoleCommand {
    /// 命令名
    pub name: &'static str,
    /// 处理函数
    pub handler: CommandHandler,
    /// 参数说明
    pub argdesc: &'static str,
    /// 帮助文本
    pub help: &'static str,
    /// `CMD_FLAG_*`
    pub flags: u32,
}

impl ConsoleCommand {
    /// 声明命令
    pub const fn new(
        name: &'static str,
        handler: CommandHandler,
        argdesc: &'static str,
        help: &'static str,
    ) -> Self {
        Self { name, handler, argdesc, help, flags: 0 }
    }

    /// 设置标志
    pub const fn with_flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }
}

/// 命令集合: 若干静态命令表 (内置命令 + 板级命令)
#[derive(Clone, Copy)]
pub struct CommandSet<'a> {
    tables: &'a [&'a [ConsoleCommand]],
}

/// 命令查找失败
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupError {
    NotFound,
    Ambiguous,
}

impl<'a> CommandSet<'a> {
    /// 由命令表创建集合
    pub const fn new(tables: &'a [&'a [ConsoleCommand]]) -> Self {
        Self { tables }
    }

    /// 所有命令
    pub fn iter(&self) -> impl Iterator<Item = &'a ConsoleCommand> + 'a {
        self.tables.iter().flat_map(|t| t.iter())
    }

    /// 完全匹配或唯一前缀匹配
    pub fn find(&self, name: &str) -> Result<&'a ConsoleCommand, LookupError> {
        if name.is_empty() {
            return Err(LookupError::NotFound);
        }

        if let Some(cmd) = self.iter().find(|c| c.name.eq_ignore_ascii_case(name)) {
            return Ok(cmd);
        }

        let mut found = None;
        for cmd in self.iter().filter(|c| starts_with_ignore_case(c.name, name)) {
            if found.is_some() {
                return Err(LookupError::Ambiguous);
            }
            found = Some(cmd);
        }
        found.ok_or(LookupError::NotFound)
    }
}

fn starts_with_ignore_case(s: &str, prefix: &str) -> bool {
    s.len() >= prefix.len() && s.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}

/// 命令执行上下文
pub struct CommandContext<'a> {
    /// 输出所用控制台
    pub console: &'a Console,
    /// 可用命令 (`help` 使用)
    pub commands: CommandSet<'a>,
}

impl<'a> CommandContext<'a> {
    /// 创建上下文
    pub const fn new(console: &'a Console, commands: CommandSet<'a>) -> Self {
        Self { console, commands }
    }

    /// 命令通道格式化输出 (输出失败不影响命令结果)
    pub fn print(&self, args: core::fmt::Arguments<'_>) {
        let _ = self.console.ccprintf(args);
    }

    /// 执行一行命令, 错误码翻译为文本输出
    ///
    /// # Returns
    /// 处理函数的结果; 空行返回 `Ok(())`
    pub fn execute_line(&self, line: &str) -> EcResult {
        let mut argv: Vec<&str, MAX_ARGS_PER_COMMAND> = Vec::new();
        for arg in line.split_ascii_whitespace() {
            if argv.push(arg).is_err() {
                self.print(format_args!("Too many arguments\n"));
                return Err(EcError::ParamCount);
            }
        }

        let Some(&name) = argv.first() else {
            return Ok(());
        };

        let cmd = match self.commands.find(name) {
            Ok(cmd) => cmd,
            Err(_) => {
                self.print(format_args!("Command '{}' not found or ambiguous.\n", name));
                return Err(EcError::Unknown);
            }
        };

        let result = if cmd.flags & CMD_FLAG_RESTRICTED != 0 && self.console.gate().is_restricted() {
            Err(EcError::AccessDenied)
        } else {
            log_debug!("console command: {}", cmd.name);
            (cmd.handler)(self, &argv)
        };

        if let Err(e) = result {
            self.report_error(e);
        }
        result
    }

    fn report_error(&self, err: EcError) {
        match err {
            EcError::ParamCount => self.print(format_args!("Wrong number of params\n")),
            EcError::AccessDenied => self.print(format_args!("Access denied\n")),
            e => match e.param_index() {
                Some(n) => self.print(format_args!("Parameter {} invalid\n", n)),
                None => self.print(format_args!("Command returned error {}\n", e.code())),
            },
        }
    }
}

// ===== 参数解析 =====

/// 解析整数参数 (`strtoi(.., 0)`): 可选符号, `0x` 十六进制, 前导 `0` 八进制, 否则十进制
pub fn parse_int(s: &str) -> Option<i64> {
    let (negative, digits) = match s.as_bytes().first()? {
        b'-' => (true, &s[1..]),
        b'+' => (false, &s[1..]),
        _ => (false, s),
    };

    let value = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()?
    } else if digits.len() > 1 && digits.starts_with('0') {
        i64::from_str_radix(&digits[1..], 8).ok()?
    } else {
        digits.parse::<i64>().ok()?
    };

    Some(if negative { -value } else { value })
}

// ===== 内置命令 =====

fn command_chan(ctx: &CommandContext<'_>, argv: &[&str]) -> EcResult {
    let gate = ctx.console.gate();

    if argv.len() == 2 {
        let arg = argv[1];
        if arg.eq_ignore_ascii_case("save") {
            gate.save();
            return Ok(());
        }
        if arg.eq_ignore_ascii_case("restore") {
            return gate.restore();
        }
        if let Some(channel) = Channel::from_name(arg) {
            let on = (gate.mask() ^ channel.mask()) | Channel::Command.mask();
            ctx.print(format_args!(
                "setting {} to {}\n",
                arg,
                if on & channel.mask() != 0 { "on" } else { "off" }
            ));
            return gate.toggle(channel).map(|_| ());
        }

        let mask = parse_int(arg).ok_or(EcError::Param1)?;
        return report_restricted(ctx, gate.set_mask_from_command(mask as u32), mask as u32);
    }

    ctx.print(format_args!(" # Mask     E Channel\n"));
    for channel in Channel::ALL {
        ctx.print(format_args!(
            "{:2} {:08x} {} {}\n",
            channel as u8,
            channel.mask(),
            if gate.is_enabled(channel) { '*' } else { ' ' },
            channel.name()
        ));
        ctx.console.cflush();
    }
    Ok(())
}

fn report_restricted(ctx: &CommandContext<'_>, result: EcResult, mask: u32) -> EcResult {
    if result == Err(EcError::AccessDenied) {
        let restricted = mask & ctx.console.gate().restricted_mask();
        ctx.print(format_args!("restricted chan: 0x{:08x}\n", restricted));
    }
    result
}

fn command_help(ctx: &CommandContext<'_>, argv: &[&str]) -> EcResult {
    match argv.len() {
        1 => {
            ctx.print(format_args!("Known commands:\n"));
            for cmd in ctx.commands.iter() {
                ctx.print(format_args!("  {:<14} {}\n", cmd.name, cmd.help));
            }
            Ok(())
        }
        2 => {
            let prefix = argv[1];
            let mut any = false;
            for cmd in ctx.commands.iter().filter(|c| starts_with_ignore_case(c.name, prefix)) {
                any = true;
                ctx.print(format_args!("Usage: {} {}\n  {}\n", cmd.name, cmd.argdesc, cmd.help));
            }
            if any {
                Ok(())
            } else {
                Err(EcError::Param1)
            }
        }
        _ => Err(EcError::ParamCount),
    }
}

/// 内置命令表
pub static BUILTIN_COMMANDS: [ConsoleCommand; 2] = [
    ConsoleCommand::new(
        "chan",
        command_chan,
        "[ save | restore | <chan_name> | <mask> ]",
        "Save, restore, get or set console channel mask",
    ),
    ConsoleCommand::new("help", command_help, "[ <prefix> ]", "Print command help"),
];
