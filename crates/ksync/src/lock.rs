//! 带优先级捐赠的互斥锁
//!
//! 锁是初值为 1 的信号量的特化，区别有两点：
//! 值最多为 1；锁有持有者，获取和释放必须由同一线程完成。
//! 锁不可重入，持有者再次获取属于致命错误。
//!
//! 高优先级线程阻塞在低优先级线程持有的锁上时，会把自己的优先级捐赠给持有者，
//! 并沿持有者正在等待的锁继续向上传递。

use core::fmt;
use core::ptr::{self, NonNull};

use crate::config::SchedMode;
use crate::donation;
use crate::intr::{IntrGuard, in_interrupt_context};
use crate::intr_cell::IntrCell;
use crate::sched::{ThreadId, current_thread};
use crate::semaphore::Semaphore;
use crate::violation::{Violation, ensure};

/// 睡眠互斥锁
pub struct Lock {
    holder: IntrCell<Option<ThreadId>>,
    pub(crate) sema: Semaphore,
    mode: SchedMode,
}

impl Lock {
    /// 创建一个启用优先级捐赠的锁
    pub const fn new() -> Self {
        Self::with_mode(SchedMode::Priority)
    }

    /// 以指定调度模式创建锁
    pub const fn with_mode(mode: SchedMode) -> Self {
        Lock {
            holder: IntrCell::new(None),
            sema: Semaphore::new(1),
            mode,
        }
    }

    /// 获取锁，必要时睡眠直到锁可用
    ///
    /// 锁被占用时，当前线程先向持有者捐赠优先级再阻塞。
    /// 可能睡眠，不能在中断上下文中调用。
    #[track_caller]
    pub fn acquire(&self) {
        ensure(
            !in_interrupt_context(),
            Violation::BlockInInterrupt("Lock::acquire"),
        );
        ensure(!self.held_by_current_thread(), Violation::Reacquire);

        let _intr = IntrGuard::new();
        let current = current_thread();
        // 每次即将阻塞时都向当时的持有者捐赠：被唤醒后若锁又被抢走，需要重新捐赠
        self.sema.down_with(|| {
            if let Some(holder) = self.holder() {
                donation::donate(current, self, holder);
            }
        });
        donation::settle(current);
        *self.holder.lock() = Some(current);
        donation::adopt_waiters(current, self);
    }

    /// 尝试获取锁，成功返回 true
    ///
    /// 不会睡眠，也不做捐赠。
    #[track_caller]
    pub fn try_acquire(&self) -> bool {
        ensure(!self.held_by_current_thread(), Violation::Reacquire);

        let _intr = IntrGuard::new();
        if !self.sema.try_down() {
            return false;
        }
        let current = current_thread();
        *self.holder.lock() = Some(current);
        donation::adopt_waiters(current, self);
        true
    }

    /// 释放当前线程持有的锁
    ///
    /// 撤销因本锁获得的捐赠，恢复有效优先级后唤醒优先级最高的等待者。
    #[track_caller]
    pub fn release(&self) {
        ensure(self.held_by_current_thread(), Violation::ReleaseUnheld);

        let _intr = IntrGuard::new();
        let current = current_thread();
        if self.mode.donates() {
            donation::revoke(current, self);
        }
        *self.holder.lock() = None;
        self.sema.up();
    }

    /// 当前线程是否持有该锁
    ///
    /// 判断其它线程是否持有是有竞争的，因此只提供对当前线程的判断。
    pub fn held_by_current_thread(&self) -> bool {
        self.holder() == Some(current_thread())
    }

    /// 当前持有者
    pub fn holder(&self) -> Option<ThreadId> {
        *self.holder.lock()
    }

    /// 锁的调度模式
    pub fn mode(&self) -> SchedMode {
        self.mode
    }

    /// 阻塞在该锁上的线程数
    pub fn waiter_count(&self) -> usize {
        self.sema.waiter_count()
    }
}

impl Default for Lock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Lock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lock")
            .field("holder", &self.holder())
            .field("mode", &self.mode)
            .finish()
    }
}

/// 指向锁的非拥有句柄，记录在等待者的 [`ThreadSync`](crate::ThreadSync) 中
///
/// 句柄只在其线程处于该锁的 [`Lock::acquire`] 内部时存在，
/// 这期间 `acquire` 的借用保证锁不会被移动或释放。
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct LockRef(NonNull<Lock>);

impl LockRef {
    pub(crate) fn of(lock: &Lock) -> Self {
        LockRef(NonNull::from(lock))
    }

    /// 是否指向 `lock`
    pub fn is(self, lock: &Lock) -> bool {
        ptr::eq(self.0.as_ptr(), lock)
    }

    /// # Safety
    /// 记录该句柄的线程必须仍处于对应锁的 `acquire` 中
    #[allow(single_use_lifetimes)]
    pub(crate) unsafe fn get<'a>(self) -> &'a Lock {
        // SAFETY: 由调用者保证锁仍然存活
        unsafe { self.0.as_ref() }
    }
}

impl fmt::Debug for LockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LockRef({:p})", self.0)
    }
}

// Safety: LockRef 只作为标识在线程控制块之间传递，解引用受 `get` 的约束
unsafe impl Send for LockRef {}
unsafe impl Sync for LockRef {}

unsafe impl lock_api::RawMutex for Lock {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Lock::new();

    type GuardMarker = lock_api::GuardNoSend;

    fn lock(&self) {
        self.acquire();
    }

    fn try_lock(&self) -> bool {
        self.try_acquire()
    }

    unsafe fn unlock(&self) {
        self.release();
    }

    fn is_locked(&self) -> bool {
        self.holder().is_some()
    }
}
