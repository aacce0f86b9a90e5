//! 中断保护单元
//!
//! 单 CPU 上关闭中断即可独占数据，因此这里不需要自旋：
//! 如果在临界区内再次访问同一个单元，只能是调用路径上的重入错误，直接终止。

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut, Drop};
use core::sync::atomic::{AtomicBool, Ordering};

use crate::intr::IntrGuard;
use crate::violation::{Violation, fatal};

/// 由中断保护的数据单元。
///
/// 内部包含一个占用标志和一个 UnsafeCell 用于存储数据。
///
/// # 示例
/// ```ignore
/// let cell = IntrCell::new(0);
/// {
///     let mut guard = cell.lock(); // 禁用中断
///     *guard += 1;
/// } // 离开作用域，恢复中断状态
/// ```
///
/// # 注意
/// IntrCell 不可重入，持有 guard 时再次调用 [`IntrCell::lock`] 会触发致命错误。
/// 持有 guard 期间不得阻塞当前线程。
#[derive(Debug)]
pub struct IntrCell<T> {
    borrowed: AtomicBool,
    data: UnsafeCell<T>,
}

impl<T> IntrCell<T> {
    /// 创建一个新的 IntrCell 实例。
    pub const fn new(data: T) -> Self {
        IntrCell {
            borrowed: AtomicBool::new(false),
            data: UnsafeCell::new(data),
        }
    }

    /// 禁用中断并返回访问数据的 RAII 保护器。
    #[track_caller]
    pub fn lock(&self) -> IntrCellGuard<'_, T> {
        let intr_guard = IntrGuard::new();

        if self
            .borrowed
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            drop(intr_guard);
            fatal(Violation::NestedAccess);
        }

        IntrCellGuard {
            cell: self,
            // SAFETY: borrowed 标志保证同一时刻只有一个可变引用
            data: unsafe { &mut *self.data.get() },
            _intr_guard: intr_guard,
        }
    }

    /// 通过独占引用直接访问数据
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    /// 取出内部数据
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: Default> Default for IntrCell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// IntrCell 的 RAII 保护器。
///
/// 退出作用域时先清除占用标志，再恢复中断状态。
pub struct IntrCellGuard<'a, T> {
    cell: &'a IntrCell<T>,
    data: &'a mut T,
    _intr_guard: IntrGuard,
}

impl<T> Deref for IntrCellGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        self.data
    }
}

impl<T> DerefMut for IntrCellGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.data
    }
}

impl<T> Drop for IntrCellGuard<'_, T> {
    fn drop(&mut self) {
        self.cell.borrowed.store(false, Ordering::Release);
    }
}

// Safety: 对数据的访问由 borrowed 标志与关中断共同保证互斥
unsafe impl<T: Send> Send for IntrCell<T> {}
unsafe impl<T: Send> Sync for IntrCell<T> {}
