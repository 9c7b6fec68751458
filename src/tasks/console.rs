//! 控制台任务
//!
//! 串口中断把收到的字节写入 RX 队列并唤醒本任务;
//! 本任务取出字节做行编辑, 收到回车后执行命令。

use heapless::String;

use crate::config::CONSOLE_INPUT_LINE_SIZE;
use crate::console::command::CommandContext;
use crate::sync::primitives::TaskWake;
use crate::sync::stream::Pipe;

const CTRL_C: u8 = 0x03;
const BACKSPACE: u8 = 0x08;
const CTRL_U: u8 = 0x15;
const DEL: u8 = 0x7f;

/// 提示符
pub const PROMPT: &str = "> ";

/// 一个输入字节的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditAction {
    /// 忽略
    None,
    /// 字符已追加, 需要回显
    Echo(u8),
    /// 删除了一个字符
    Erase,
    /// 一行输入完成, 用 `line()` 取出
    Submit,
    /// 当前行被丢弃
    Cancel,
}

/// 行编辑器
pub struct LineEditor {
    line: String<CONSOLE_INPUT_LINE_SIZE>,
    last_was_cr: bool,
}

impl LineEditor {
    /// 创建空行
    pub const fn new() -> Self {
        Self {
            line: String::new(),
            last_was_cr: false,
        }
    }

    /// 处理一个输入字节
    pub fn feed(&mut self, byte: u8) -> EditAction {
        let after_cr = core::mem::replace(&mut self.last_was_cr, byte == b'\r');

        match byte {
            b'\r' => EditAction::Submit,
            // CRLF 只算一次回车
            b'\n' if after_cr => EditAction::None,
            b'\n' => EditAction::Submit,
            BACKSPACE | DEL => match self.line.pop() {
                Some(_) => EditAction::Erase,
                None => EditAction::None,
            },
            CTRL_C | CTRL_U => {
                self.line.clear();
                EditAction::Cancel
            }
            0x20..=0x7e => match self.line.push(byte as char) {
                Ok(()) => EditAction::Echo(byte),
                // 行已满, 丢弃
                Err(()) => EditAction::None,
            },
            _ => EditAction::None,
        }
    }

    /// 当前行
    pub fn line(&self) -> &str {
        &self.line
    }

    /// 清空当前行
    pub fn clear(&mut self) {
        self.line.clear();
    }
}

impl Default for LineEditor {
    fn default() -> Self {
        Self::new()
    }
}

/// 控制台服务: 行编辑 + 命令执行
pub struct ConsoleService<'a> {
    ctx: CommandContext<'a>,
    editor: LineEditor,
}

impl<'a> ConsoleService<'a> {
    /// 创建服务
    pub fn new(ctx: CommandContext<'a>) -> Self {
        Self {
            ctx,
            editor: LineEditor::new(),
        }
    }

    /// 输出提示符
    pub fn prompt(&self) {
        let _ = self.ctx.console.ccputs(PROMPT);
    }

    /// 处理收到的字节
    pub fn process_input(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            match self.editor.feed(byte) {
                EditAction::None => {}
                EditAction::Echo(c) => {
                    let mut buf = [0u8; 4];
                    let _ = self.ctx.console.ccputs((c as char).encode_utf8(&mut buf));
                }
                EditAction::Erase => {
                    let _ = self.ctx.console.ccputs("\x08 \x08");
                }
                EditAction::Cancel => {
                    let _ = self.ctx.console.ccputs("\n");
                    self.prompt();
                }
                EditAction::Submit => {
                    let _ = self.ctx.console.ccputs("\n");
                    // 错误已经由命令层输出
                    let _ = self.ctx.execute_line(self.editor.line());
                    self.editor.clear();
                    self.prompt();
                }
            }
        }
    }
}

/// 控制台任务主循环
///
/// * `rx` - 中断写入的 RX 管道, 其消费者回调应为 `wake`
pub async fn console_task<const N: usize>(
    mut service: ConsoleService<'_>,
    rx: &Pipe<'_, u8, N>,
    wake: &TaskWake,
) -> ! {
    let mut buf = [0u8; 16];
    service.prompt();

    loop {
        wake.wait().await;
        loop {
            let n = rx.remove(&mut buf);
            if n == 0 {
                break;
            }
            service.process_input(&buf[..n]);
        }
    }
}
