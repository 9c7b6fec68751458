//! 去抖按键
//!
//! 典型接法 (电源按键):
//! 1. GPIO 中断只武装去抖延迟调用 `call_deferred(key, BUTTON_DEBOUNCE_US)`;
//!    抖动期间的每次中断都会把截止时间往后推
//! 2. 延迟调用在钩子任务中调用 [`DebouncedButton::sample`]
//! 3. 状态变化时通知 `HookType::PowerButtonChange`

use embedded_hal::digital::InputPin;

use crate::error::{EcError, EcResult};

/// 去抖后的按键状态
pub struct DebouncedButton<P> {
    pin: P,
    active_low: bool,
    pressed: bool,
}

impl<P: InputPin> DebouncedButton<P> {
    /// 包装输入引脚, 初始为未按下
    ///
    /// * `active_low` - 按下时为低电平 (上拉接法)
    pub const fn new(pin: P, active_low: bool) -> Self {
        Self {
            pin,
            active_low,
            pressed: false,
        }
    }

    /// 最近一次稳定的状态
    pub fn is_pressed(&self) -> bool {
        self.pressed
    }

    /// 采样引脚 (抖动已结束时调用)
    ///
    /// 不产生控制台输出, 可以在持锁时调用; 由调用方在锁外报告结果
    ///
    /// # Returns
    /// 状态变化时返回 `Some(pressed)`, 否则 `None`
    ///
    /// # Errors
    /// 引脚读取失败时返回 `Unknown`, 并保持原状态
    pub fn sample(&mut self) -> EcResult<Option<bool>> {
        let high = self.pin.is_high().map_err(|_| EcError::Unknown)?;

        let pressed = high != self.active_low;
        if pressed == self.pressed {
            return Ok(None);
        }

        self.pressed = pressed;
        Ok(Some(pressed))
    }

    /// 访问引脚 (例如清除中断标志)
    pub fn pin_mut(&mut self) -> &mut P {
        &mut self.pin
    }

    /// 取回引脚
    pub fn release(self) -> P {
        self.pin
    }
}
