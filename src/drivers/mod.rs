//! 参考驱动
//!
//! - `button`: 去抖按键 (GPIO 中断 → 延迟调用 → 钩子通知)

pub mod button;
