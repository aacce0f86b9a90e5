//! Mesa 风格条件变量
//!
//! 条件变量让一段代码发出“条件已满足”的信号，另一段代码接收信号并据此行动。
//! 每个条件变量只与一个锁关联，而一个锁可以关联任意多个条件变量。
//!
//! 发送信号与被唤醒者重新检查条件不是原子的：从 [`Condition::wait`] 返回时，
//! 其它线程可能已经运行过，调用者必须在循环中重新检查条件。

use core::fmt;
use core::ptr::NonNull;

use crate::intr::in_interrupt_context;
use crate::intr_cell::IntrCell;
use crate::lock::Lock;
use crate::ordered::OrderedQueue;
use crate::sched::{Priority, ThreadId, current_thread, priority_of};
use crate::semaphore::Semaphore;
use crate::violation::{Violation, ensure};

/// 条件变量的一个等待者：一次 `wait` 调用栈上的私有信号量
///
/// 只存在于 [`Condition`] 的等待队列中，生命周期严格短于对应的 `wait` 调用。
pub struct Waiter {
    sema: NonNull<Semaphore>,
    thread: ThreadId,
}

impl Waiter {
    fn new(sema: &Semaphore, thread: ThreadId) -> Self {
        Waiter {
            sema: NonNull::from(sema),
            thread,
        }
    }

    fn sema(&self) -> &Semaphore {
        // SAFETY: 等待者先被移出队列，其私有信号量才会被 up，
        // 而 wait 要等到 up 之后才会返回并释放该信号量
        unsafe { self.sema.as_ref() }
    }

    /// 发起等待的线程
    pub fn thread(&self) -> ThreadId {
        self.thread
    }

    /// 排序所用的优先级：私有信号量上首个等待线程的优先级
    ///
    /// 刚入队、尚未阻塞在私有信号量上时，就是发起等待的线程本身。
    pub fn priority(&self) -> Priority {
        self.sema()
            .head_priority()
            .unwrap_or_else(|| priority_of(self.thread))
    }
}

impl fmt::Debug for Waiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Waiter").field("thread", &self.thread).finish()
    }
}

// Safety: 私有信号量的访问都发生在关中断的临界区内
unsafe impl Send for Waiter {}

/// 按等待者私有信号量的首个线程优先级比较
pub fn waiter_outranks(a: &Waiter, b: &Waiter) -> bool {
    a.priority() > b.priority()
}

/// 条件变量
pub struct Condition {
    waiters: IntrCell<OrderedQueue<Waiter>>,
}

impl Condition {
    /// 创建一个没有等待者的条件变量
    pub const fn new() -> Self {
        Condition {
            waiters: IntrCell::new(OrderedQueue::new()),
        }
    }

    /// 原子地释放 `lock` 并等待信号，被唤醒后重新获取 `lock` 再返回
    ///
    /// 调用前必须持有 `lock`。可能睡眠，不能在中断上下文中调用。
    #[track_caller]
    pub fn wait(&self, lock: &Lock) {
        ensure(
            !in_interrupt_context(),
            Violation::BlockInInterrupt("Condition::wait"),
        );
        ensure(
            lock.held_by_current_thread(),
            Violation::ConditionWithoutLock("wait"),
        );

        let sema = Semaphore::new(0);
        self.waiters
            .lock()
            .insert_ordered(Waiter::new(&sema, current_thread()), waiter_outranks);
        lock.release();
        sema.down();
        lock.acquire();
    }

    /// 唤醒优先级最高的一个等待者（如果有）
    ///
    /// 调用前必须持有 `lock`。
    #[track_caller]
    pub fn signal(&self, lock: &Lock) {
        ensure(
            !in_interrupt_context(),
            Violation::BlockInInterrupt("Condition::signal"),
        );
        ensure(
            lock.held_by_current_thread(),
            Violation::ConditionWithoutLock("signal"),
        );

        let next = {
            let mut waiters = self.waiters.lock();
            // 等待期间优先级可能因捐赠而改变
            waiters.sort(waiter_outranks);
            waiters.pop_front()
        };
        if let Some(waiter) = next {
            log::trace!("ksync: condition signals {}", waiter.thread);
            waiter.sema().up();
        }
    }

    /// 唤醒所有等待者，每次唤醒都按 [`Condition::signal`] 的规则选择
    ///
    /// 调用前必须持有 `lock`。
    #[track_caller]
    pub fn broadcast(&self, lock: &Lock) {
        ensure(
            lock.held_by_current_thread(),
            Violation::ConditionWithoutLock("broadcast"),
        );
        while self.has_waiters() {
            self.signal(lock);
        }
    }

    /// 等待者数量
    pub fn waiter_count(&self) -> usize {
        self.waiters.lock().len()
    }

    /// 是否有等待者
    pub fn has_waiters(&self) -> bool {
        !self.waiters.lock().is_empty()
    }
}

impl Default for Condition {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Condition")
            .field("waiters", &self.waiter_count())
            .finish()
    }
}
