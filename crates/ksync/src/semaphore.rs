//! 计数信号量
//!
//! 信号量是一个非负整数加上两个原子操作：
//!
//! - down（P）：等待值变为正数，然后将其减一；
//! - up（V）：将值加一，并唤醒一个等待者（如果有）。
//!
//! 等待者按有效优先级降序排队，`up` 总是唤醒当前优先级最高的等待者。

use alloc::vec::Vec;

use crate::intr::{IntrGuard, in_interrupt_context};
use crate::intr_cell::IntrCell;
use crate::ordered::{OrderedQueue, thread_outranks};
use crate::sched::{Priority, ThreadId, current_thread, priority_of, sched_ops};
use crate::violation::{Violation, ensure};

struct SemaInner {
    value: usize,
    waiters: OrderedQueue<ThreadId>,
}

/// 计数信号量
pub struct Semaphore {
    inner: IntrCell<SemaInner>,
}

impl Semaphore {
    /// 创建一个初始值为 `value` 的信号量
    pub const fn new(value: usize) -> Self {
        Semaphore {
            inner: IntrCell::new(SemaInner {
                value,
                waiters: OrderedQueue::new(),
            }),
        }
    }

    /// 等待值变为正数，然后将其减一
    ///
    /// 可能睡眠，不能在中断上下文中调用。
    #[track_caller]
    pub fn down(&self) {
        self.down_with(|| {});
    }

    /// 同 [`Semaphore::down`]，但每次即将阻塞前先执行 `before_block`
    ///
    /// `before_block` 在关中断状态下执行，且不得访问本信号量。
    #[track_caller]
    pub(crate) fn down_with(&self, mut before_block: impl FnMut()) {
        ensure(
            !in_interrupt_context(),
            Violation::BlockInInterrupt("Semaphore::down"),
        );

        let _intr = IntrGuard::new();
        let current = current_thread();
        loop {
            {
                let mut inner = self.inner.lock();
                if inner.value > 0 {
                    inner.value -= 1;
                    return;
                }
            }
            before_block();
            self.inner
                .lock()
                .waiters
                .insert_ordered(current, thread_outranks);
            sched_ops().block_current();
        }
    }

    /// 值为正时减一并返回 true，否则立即返回 false
    ///
    /// 不会睡眠，可以在中断上下文中调用。
    pub fn try_down(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.value > 0 {
            inner.value -= 1;
            true
        } else {
            false
        }
    }

    /// 将值加一，并唤醒优先级最高的等待者
    ///
    /// 可以在中断上下文中调用。
    pub fn up(&self) {
        let _intr = IntrGuard::new();
        let woken = {
            let mut inner = self.inner.lock();
            // 排队期间等待者的优先级可能因捐赠而改变
            inner.waiters.sort(thread_outranks);
            let woken = inner.waiters.pop_front();
            inner.value += 1;
            woken
        };
        if let Some(thread) = woken {
            log::trace!("ksync: sema up wakes {}", thread);
            sched_ops().unblock(thread);
        }
        sched_ops().yield_if_outranked();
    }

    /// 当前值
    pub fn value(&self) -> usize {
        self.inner.lock().value
    }

    /// 阻塞在该信号量上的线程数
    pub fn waiter_count(&self) -> usize {
        self.inner.lock().waiters.len()
    }

    /// 等待队列首个线程的优先级
    pub(crate) fn head_priority(&self) -> Option<Priority> {
        let head = self.inner.lock().waiters.front().copied();
        head.map(priority_of)
    }

    /// 按队列顺序列出等待者
    pub(crate) fn waiting_threads(&self) -> Vec<ThreadId> {
        self.inner.lock().waiters.iter().copied().collect()
    }

    /// `thread` 的优先级变化后调整其在等待队列中的位置
    pub(crate) fn reposition(&self, thread: ThreadId) {
        self.inner.lock().waiters.reposition(&thread, thread_outranks);
    }
}

impl core::fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Semaphore")
            .field("value", &inner.value)
            .field("waiters", &inner.waiters.len())
            .finish()
    }
}
