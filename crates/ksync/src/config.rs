//! 配置常量

use crate::sched::Priority;

/// 最低优先级
pub const PRI_MIN: Priority = 0;

/// 新建线程的默认优先级
pub const PRI_DEFAULT: Priority = 31;

/// 最高优先级
pub const PRI_MAX: Priority = 63;

/// 调度模式
///
/// 在锁构造时注入。MLFQ 模式下有效优先级完全由外部调度器计算，
/// 锁不做任何捐赠。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedMode {
    /// 严格优先级调度，启用优先级捐赠
    #[default]
    Priority,
    /// 多级反馈队列调度，禁用捐赠
    Mlfqs,
}

impl SchedMode {
    /// 该模式下锁是否进行优先级捐赠
    pub const fn donates(self) -> bool {
        matches!(self, SchedMode::Priority)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_range() {
        assert_eq!((PRI_MIN, PRI_DEFAULT, PRI_MAX), (0, 31, 63));
    }

    #[test]
    fn test_only_priority_mode_donates() {
        assert_eq!(SchedMode::default(), SchedMode::Priority);
        assert!(SchedMode::Priority.donates());
        assert!(!SchedMode::Mlfqs.donates());
    }
}
