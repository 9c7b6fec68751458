//! ecdispatch 固件 - ESP32-S3
//!
//! 把事件/分发核心接到真实硬件上:
//! - 通知 `HookType::Init`, 然后启动钩子任务与控制台任务
//! - UART0 作为控制台 (TX 队列 + 发送任务, RX 队列)
//! - GPIO0 作为电源按键: 中断 → 去抖延迟调用 → `PowerButtonChange` 钩子
//! - 主机命令表可以通过 `hostcmd` 控制台命令以 v3 数据包方式调用
//!
//! 硬件目标: ESP32-S3-N16R8

#![no_std]
#![no_main]

esp_bootloader_esp_idf::esp_app_desc!();

use core::cell::RefCell;

use embassy_executor::Spawner;
use embassy_time::{Duration, Timer};
use esp_hal::{
    gpio::{Event, Input, InputConfig, Io, Pull},
    handler, ram,
    timer::timg::TimerGroup,
    uart::{Config as UartConfig, Uart, UartRx, UartTx},
    Async,
};

use ecdispatch::config::{BUTTON_DEBOUNCE_US, CONSOLE_RX_BUF_SIZE, CONSOLE_TX_BUF_SIZE, HOST_PACKET_SIZE};
use ecdispatch::console::command::{parse_int, BUILTIN_COMMANDS};
use ecdispatch::console::{console, Channel, CommandContext, CommandSet, ConsoleCommand, PipeSink};
use ecdispatch::drivers::button::DebouncedButton;
use ecdispatch::hook::{HookType, HOOK_PRIO_DEFAULT, HOOK_PRIO_LAST};
use ecdispatch::host::packet::{encode_request, parse_response, process_packet};
use ecdispatch::host::{
    ec_ver_mask, host_command_get_cmd_versions, host_command_hello, EC_CMD_GET_CMD_VERSIONS,
    EC_CMD_HELLO,
};
use ecdispatch::tasks::ConsoleService;
use ecdispatch::{
    cprints, declare_deferred, declare_host_commands, declare_hooks, log_error, log_info, log_warn,
};
use ecdispatch::{CriticalCell, EcError, EcResult, Pipe, Queue, TaskWake};

#[cfg(feature = "log-defmt")]
use defmt_rtt as _;

// ===== Panic Handler =====
#[cfg(any(feature = "dev", feature = "log-println"))]
use esp_backtrace as _;

#[cfg(not(any(feature = "dev", feature = "log-println")))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop {
        core::hint::spin_loop();
    }
}

// ===== 静态表 =====

declare_hooks! {
    static HOOKS = [
        (HookType::Init, power_button_init, HOOK_PRIO_DEFAULT),
        (HookType::PowerButtonChange, power_button_report, HOOK_PRIO_DEFAULT),
        (HookType::Second, heartbeat, HOOK_PRIO_LAST),
    ];
}

declare_deferred! {
    static DEFERRED: Deferred = {
        ButtonDebounce => power_button_debounce,
    }
}

declare_host_commands! {
    static HOST_COMMANDS = [
        (EC_CMD_HELLO, host_command_hello, ec_ver_mask(0)),
        (EC_CMD_GET_CMD_VERSIONS, host_command_get_cmd_versions, ec_ver_mask(0) | ec_ver_mask(1)),
    ];
}

static BOARD_COMMANDS: [ConsoleCommand; 3] = [
    ConsoleCommand::new("hookstats", command_hookstats, "", "Print hook statistics"),
    ConsoleCommand::new(
        "hostcmd",
        command_hostcmd,
        "<cmd> [<version> [<byte>...]]",
        "Run a host command through the v3 packet path",
    ),
    ConsoleCommand::new("pwrbtn", command_pwrbtn, "", "Print power button state"),
];

static CONSOLE_COMMANDS: [&[ConsoleCommand]; 2] = [&BUILTIN_COMMANDS, &BOARD_COMMANDS];

// ===== 控制台 I/O =====

static RX_QUEUE: Queue<u8, CONSOLE_RX_BUF_SIZE> = Queue::new();
static RX_WAKE: TaskWake = TaskWake::new();
static RX_PIPE: Pipe<'static, u8, CONSOLE_RX_BUF_SIZE> = Pipe::new(&RX_QUEUE, None, Some(&RX_WAKE));

static TX_QUEUE: Queue<u8, CONSOLE_TX_BUF_SIZE> = Queue::new();
static TX_WAKE: TaskWake = TaskWake::new();
static TX_PIPE: Pipe<'static, u8, CONSOLE_TX_BUF_SIZE> = Pipe::new(&TX_QUEUE, None, Some(&TX_WAKE));

/// 控制台输出只进发送队列, 串口写入在 `uart_tx_task` 中进行
static UART_SINK: PipeSink<CONSOLE_TX_BUF_SIZE> = PipeSink::new(&TX_PIPE);

// ===== 电源按键 =====

type PowerButton = DebouncedButton<Input<'static>>;

static POWER_BUTTON: CriticalCell<RefCell<Option<PowerButton>>> = CriticalCell::new(RefCell::new(None));

fn power_button_init() {
    // 上电时按键可能已经按下, 立即采样一次
    DEFERRED.call_deferred(Deferred::ButtonDebounce, BUTTON_DEBOUNCE_US);
}

fn power_button_debounce() {
    // 锁内只采样, 输出和钩子通知都在锁外
    let sampled = POWER_BUTTON.lock(|b| b.borrow_mut().as_mut().map(|b| b.sample()));
    match sampled {
        Some(Ok(Some(_))) => HOOKS.notify(HookType::PowerButtonChange),
        Some(Err(e)) => {
            let _ = cprints!(Channel::Switch, "power button sample failed: {}", e);
        }
        _ => {}
    }
}

fn power_button_pressed() -> bool {
    POWER_BUTTON.lock(|b| b.borrow().as_ref().is_some_and(|b| b.is_pressed()))
}

fn power_button_report() {
    let _ = cprints!(
        Channel::Switch,
        "power button {}",
        if power_button_pressed() { "down" } else { "up" }
    );
}

fn heartbeat() {
    let _ = cprints!(Channel::System, "alive");
}

#[handler]
#[ram]
fn gpio_handler() {
    let fired = POWER_BUTTON.lock(|b| match b.borrow_mut().as_mut() {
        Some(button) if button.pin_mut().is_interrupt_set() => {
            button.pin_mut().clear_interrupt();
            true
        }
        _ => false,
    });

    // 抖动期间每次中断都把截止时间往后推
    if fired {
        DEFERRED.call_deferred(Deferred::ButtonDebounce, BUTTON_DEBOUNCE_US);
    }
}

// ===== 板级控制台命令 =====

fn command_hookstats(ctx: &CommandContext<'_>, _argv: &[&str]) -> EcResult {
    ctx.print(format_args!("hook                  count    last     max\n"));
    for hook in HookType::ALL {
        let stats = HOOKS.stats(hook);
        if stats.notifies() == 0 {
            continue;
        }
        ctx.print(format_args!(
            "{:<20} {:>6} {:>6}us {:>6}us\n",
            hook.name(),
            stats.notifies(),
            stats.last_us(),
            stats.max_us()
        ));
    }
    Ok(())
}

fn command_hostcmd(ctx: &CommandContext<'_>, argv: &[&str]) -> EcResult {
    if argv.len() < 2 {
        return Err(EcError::ParamCount);
    }

    let command = parse_int(argv[1])
        .and_then(|v| u16::try_from(v).ok())
        .ok_or(EcError::Param1)?;
    let version = match argv.get(2) {
        Some(arg) => parse_int(arg)
            .and_then(|v| u8::try_from(v).ok())
            .ok_or(EcError::Param2)?,
        None => 0,
    };

    let mut params: heapless::Vec<u8, 8> = heapless::Vec::new();
    for (i, arg) in argv.iter().enumerate().skip(3) {
        let byte = parse_int(arg)
            .and_then(|v| u8::try_from(v).ok())
            .ok_or(EcError::param(i))?;
        params.push(byte).map_err(|_| EcError::ParamCount)?;
    }

    let mut request = [0u8; HOST_PACKET_SIZE];
    let len = encode_request(command, version, &params, &mut request).ok_or(EcError::Overflow)?;

    let mut response = [0u8; HOST_PACKET_SIZE];
    let n = process_packet(&HOST_COMMANDS, &request[..len], &mut response);
    let (status, data) = parse_response(&response[..n]).map_err(|_| EcError::Unknown)?;

    ctx.print(format_args!("result {} ({})\n", status.code(), status));
    for byte in data {
        ctx.print(format_args!("{:02x} ", byte));
    }
    ctx.print(format_args!("\n"));
    Ok(())
}

fn command_pwrbtn(ctx: &CommandContext<'_>, _argv: &[&str]) -> EcResult {
    ctx.print(format_args!(
        "power button {}\n",
        if power_button_pressed() { "pressed" } else { "released" }
    ));
    Ok(())
}

// ===== 任务 =====

/// 钩子任务: 延迟调用 + Tick/Second
#[embassy_executor::task]
async fn hooks_task() {
    ecdispatch::tasks::hook_task(&HOOKS, &DEFERRED).await
}

/// 控制台任务: 行编辑 + 命令执行
#[embassy_executor::task]
async fn console_task() {
    let ctx = CommandContext::new(console(), CommandSet::new(&CONSOLE_COMMANDS));
    ecdispatch::tasks::console_task(ConsoleService::new(ctx), &RX_PIPE, &RX_WAKE).await
}

/// UART 发送: 把发送队列写到串口
#[embassy_executor::task]
async fn uart_tx_task(mut tx: UartTx<'static, Async>) {
    let mut buf = [0u8; 64];
    loop {
        TX_WAKE.wait().await;

        loop {
            let n = TX_PIPE.remove(&mut buf);
            if n == 0 {
                break;
            }

            let mut sent = 0;
            while sent < n {
                match tx.write_async(&buf[sent..n]).await {
                    Ok(written) => sent += written,
                    Err(_) => {
                        log_warn!("console tx error");
                        break;
                    }
                }
            }
        }

        let _ = tx.flush_async().await;
    }
}

/// UART 接收: 字节写入 RX 管道并唤醒控制台任务
#[embassy_executor::task]
async fn uart_rx_task(mut rx: UartRx<'static, Async>) {
    let mut buf = [0u8; 16];
    loop {
        match rx.read_async(&mut buf).await {
            Ok(n) => {
                if RX_PIPE.add(&buf[..n]) < n {
                    log_warn!("console rx overflow");
                }
            }
            Err(_) => log_warn!("console rx error"),
        }
    }
}

// ===== 主入口点 =====
#[esp_rtos::main]
async fn main(spawner: Spawner) {
    // ========================================
    // 1. 硬件初始化
    // ========================================
    let peripherals = esp_hal::init(esp_hal::Config::default());

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    log_info!("{} {} starting on ESP32-S3", ecdispatch::NAME, ecdispatch::VERSION);

    // ========================================
    // 2. 控制台 UART
    // ========================================
    match Uart::new(peripherals.UART0, UartConfig::default()) {
        Ok(uart) => {
            let uart = uart
                .with_tx(peripherals.GPIO43)
                .with_rx(peripherals.GPIO44)
                .into_async();
            let (rx, tx) = uart.split();

            if console().add_sink(&UART_SINK).is_err() {
                log_error!("console sink table full");
            }
            spawner.must_spawn(uart_tx_task(tx));
            spawner.must_spawn(uart_rx_task(rx));
        }
        Err(_) => log_error!("uart0 config rejected, console disabled"),
    }

    // ========================================
    // 3. 电源按键 (低电平有效, 内部上拉)
    // ========================================
    let mut io = Io::new(peripherals.IO_MUX);
    io.set_interrupt_handler(gpio_handler);

    let mut pin = Input::new(peripherals.GPIO0, InputConfig::default().with_pull(Pull::Up));
    pin.listen(Event::AnyEdge);
    POWER_BUTTON.lock(|b| *b.borrow_mut() = Some(DebouncedButton::new(pin, true)));

    // ========================================
    // 4. 初始化钩子, 然后启动任务
    // ========================================
    HOOKS.notify(HookType::Init);

    spawner.must_spawn(hooks_task());
    spawner.must_spawn(console_task());

    log_info!("all tasks spawned");

    loop {
        Timer::after(Duration::from_secs(60)).await;
    }
}
