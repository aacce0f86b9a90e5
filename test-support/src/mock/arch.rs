//! 中断控制的 Mock 实现

use core::sync::atomic::{AtomicBool, Ordering};

/// Mock 中断控制器
///
/// 记录本地中断是否开启，以及是否正处于中断处理程序中。
pub struct MockIntr {
    pub interrupt_state: AtomicBool,
    pub in_irq: AtomicBool,
}

impl MockIntr {
    pub const fn new() -> Self {
        Self {
            interrupt_state: AtomicBool::new(true),
            in_irq: AtomicBool::new(false),
        }
    }

    pub fn read_and_disable_interrupts(&self) -> usize {
        self.interrupt_state.swap(false, Ordering::SeqCst) as usize
    }

    pub fn restore_interrupts(&self, flags: usize) {
        self.interrupt_state.store(flags != 0, Ordering::SeqCst);
    }

    pub fn interrupts_enabled(&self) -> bool {
        self.interrupt_state.load(Ordering::SeqCst)
    }

    pub fn set_interrupts_enabled(&self, enabled: bool) {
        self.interrupt_state.store(enabled, Ordering::SeqCst);
    }

    pub fn in_interrupt_context(&self) -> bool {
        self.in_irq.load(Ordering::SeqCst)
    }

    /// 进入中断处理程序：关中断并置中断上下文标志，返回之前的中断状态
    pub fn enter_irq(&self) -> usize {
        let flags = self.read_and_disable_interrupts();
        self.in_irq.store(true, Ordering::SeqCst);
        flags
    }

    /// 离开中断处理程序
    pub fn exit_irq(&self, flags: usize) {
        self.in_irq.store(false, Ordering::SeqCst);
        self.restore_interrupts(flags);
    }
}

impl Default for MockIntr {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disable_and_restore() {
        let intr = MockIntr::new();
        let flags = intr.read_and_disable_interrupts();
        assert_eq!(flags, 1);
        assert!(!intr.interrupts_enabled());
        // 嵌套关中断得到的旧状态为关闭
        let inner = intr.read_and_disable_interrupts();
        assert_eq!(inner, 0);
        intr.restore_interrupts(inner);
        assert!(!intr.interrupts_enabled());
        intr.restore_interrupts(flags);
        assert!(intr.interrupts_enabled());
    }

    #[test]
    fn test_irq_context() {
        let intr = MockIntr::new();
        let flags = intr.enter_irq();
        assert!(intr.in_interrupt_context());
        assert!(!intr.interrupts_enabled());
        intr.exit_irq(flags);
        assert!(!intr.in_interrupt_context());
        assert!(intr.interrupts_enabled());
    }
}
