//! 数据型互斥锁
//!
//! [`Lock`] 实现了 [`lock_api::RawMutex`]，因此可以直接作为 `lock_api::Mutex`
//! 的底层锁，得到一个保护数据、带优先级捐赠的睡眠互斥锁。
//!
//! # 示例
//! ```ignore
//! static QUEUE: Mutex<VecDeque<u32>> = Mutex::new(VecDeque::new());
//! static NOT_EMPTY: Condition = Condition::new();
//!
//! let mut queue = QUEUE.lock();
//! while queue.is_empty() {
//!     NOT_EMPTY.wait_guard(&mut queue);
//! }
//! let item = queue.pop_front();
//! ```

use crate::condvar::Condition;
use crate::lock::Lock;

/// 以 [`Lock`] 为底层锁的互斥锁
pub type Mutex<T> = lock_api::Mutex<Lock, T>;

/// [`Mutex`] 的 RAII 保护器
pub type MutexGuard<'a, T> = lock_api::MutexGuard<'a, Lock, T>;

/// 取出保护器背后的 [`Lock`]
fn raw_lock<'a, T>(guard: &MutexGuard<'a, T>) -> &'a Lock {
    // SAFETY: 只用于 Condition 的释放/重新获取，返回前锁仍由当前线程持有
    unsafe { MutexGuard::mutex(guard).raw() }
}

impl Condition {
    /// 以互斥锁保护器的形式调用 [`Condition::wait`]
    ///
    /// 返回时锁已重新获取，`guard` 仍然有效。
    #[track_caller]
    pub fn wait_guard<T>(&self, guard: &mut MutexGuard<'_, T>) {
        self.wait(raw_lock(guard));
    }

    /// 以互斥锁保护器的形式调用 [`Condition::signal`]
    #[track_caller]
    pub fn signal_guard<T>(&self, guard: &MutexGuard<'_, T>) {
        self.signal(raw_lock(guard));
    }

    /// 以互斥锁保护器的形式调用 [`Condition::broadcast`]
    #[track_caller]
    pub fn broadcast_guard<T>(&self, guard: &MutexGuard<'_, T>) {
        self.broadcast(raw_lock(guard));
    }
}
