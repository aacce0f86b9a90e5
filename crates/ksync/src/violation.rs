//! 前置条件违例
//!
//! 本 crate 中没有可恢复的错误：所有失败都是调用方的编程错误，
//! 继续执行只会破坏共享状态，因此统一在违例发生处终止。

use core::fmt;

/// 前置条件违例的种类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
    /// 在中断上下文中调用了可能睡眠的操作
    BlockInInterrupt(&'static str),
    /// 重复获取当前线程已持有的锁
    Reacquire,
    /// 释放当前线程未持有的锁
    ReleaseUnheld,
    /// 未持有关联锁就使用条件变量
    ConditionWithoutLock(&'static str),
    /// 新的等待会让锁等待链回到等待者自身
    DonationCycle,
    /// 嵌套访问同一个 [`IntrCell`](crate::IntrCell)
    NestedAccess,
    /// 外部操作尚未注册
    Unregistered(&'static str),
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::BlockInInterrupt(op) => {
                write!(f, "{} may sleep and cannot run in interrupt context", op)
            }
            Violation::Reacquire => write!(f, "lock already held by current thread"),
            Violation::ReleaseUnheld => write!(f, "lock not held by current thread"),
            Violation::ConditionWithoutLock(op) => {
                write!(f, "condition {} without holding its lock", op)
            }
            Violation::DonationCycle => write!(f, "lock wait chain forms a cycle (deadlock)"),
            Violation::NestedAccess => write!(f, "nested access to an IntrCell"),
            Violation::Unregistered(ops) => {
                write!(f, "{} not registered, call register_* first", ops)
            }
        }
    }
}

/// 报告违例并终止
#[cold]
#[track_caller]
pub(crate) fn fatal(violation: Violation) -> ! {
    log::error!("ksync: {}", violation);
    panic!("ksync: {}", violation)
}

/// 条件不成立时报告违例
#[inline]
#[track_caller]
pub(crate) fn ensure(cond: bool, violation: Violation) {
    if !cond {
        fatal(violation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn test_messages_name_the_operation() {
        assert_eq!(
            Violation::BlockInInterrupt("Lock::acquire").to_string(),
            "Lock::acquire may sleep and cannot run in interrupt context"
        );
        assert_eq!(
            Violation::ConditionWithoutLock("signal").to_string(),
            "condition signal without holding its lock"
        );
        assert_eq!(
            Violation::Unregistered("SchedOps").to_string(),
            "SchedOps not registered, call register_* first"
        );
    }

    #[test]
    #[should_panic(expected = "ksync: lock not held by current thread")]
    fn test_ensure_failure_is_fatal() {
        ensure(true, Violation::Reacquire);
        ensure(false, Violation::ReleaseUnheld);
    }
}
