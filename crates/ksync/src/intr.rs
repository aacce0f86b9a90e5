//! 中断控制
//!
//! 单 CPU 上关闭本地中断是本 crate 唯一的互斥手段。
//! 中断的实际开关由架构代码通过 [`IntrOps`] 提供，[`IntrGuard`] 基于 RAII 使用它。

use core::ops::Drop;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::violation::{Violation, fatal};

/// 中断屏蔽相关操作的 trait
///
/// 由内核的架构层实现并注册。
pub trait IntrOps: Send + Sync {
    /// 读取并禁用中断，返回之前的状态
    ///
    /// 返回值非零表示进入前中断处于开启状态。
    ///
    /// # Safety
    /// 调用者必须在之后以返回值调用 [`IntrOps::restore_interrupts`]
    unsafe fn read_and_disable_interrupts(&self) -> usize;

    /// 恢复中断状态
    ///
    /// # Safety
    /// flags 必须是之前 read_and_disable_interrupts 返回的值
    unsafe fn restore_interrupts(&self, flags: usize);

    /// 当前是否正在执行中断处理程序
    fn in_interrupt_context(&self) -> bool;
}

static INTR_OPS_DATA: AtomicUsize = AtomicUsize::new(0);
static INTR_OPS_VTABLE: AtomicUsize = AtomicUsize::new(0);

/// 注册中断操作实现
///
/// # Safety
/// 必须在单线程环境下调用，且只能调用一次
pub unsafe fn register_intr_ops(ops: &'static dyn IntrOps) {
    let ptr = ops as *const dyn IntrOps;
    // SAFETY: fat pointer 的布局是 (data, vtable)
    let (data, vtable) =
        unsafe { core::mem::transmute::<*const dyn IntrOps, (usize, usize)>(ptr) };
    INTR_OPS_DATA.store(data, Ordering::Release);
    INTR_OPS_VTABLE.store(vtable, Ordering::Release);
}

/// 获取已注册的中断操作实现
#[inline]
pub(crate) fn intr_ops() -> &'static dyn IntrOps {
    let data = INTR_OPS_DATA.load(Ordering::Acquire);
    let vtable = INTR_OPS_VTABLE.load(Ordering::Acquire);
    if data == 0 {
        fatal(Violation::Unregistered("IntrOps"));
    }
    // SAFETY: data 和 vtable 是通过 register_intr_ops 设置的有效指针
    unsafe { &*core::mem::transmute::<(usize, usize), *const dyn IntrOps>((data, vtable)) }
}

/// 当前是否处于中断上下文
#[inline]
pub fn in_interrupt_context() -> bool {
    intr_ops().in_interrupt_context()
}

/// 中断保护器，基于 RAII 实现中断保护。
///
/// 在创建时原子地禁用中断并保存之前的状态；
/// 在销毁时（包括 panic 展开时）自动恢复之前的中断状态。
///
/// # 示例
/// ```ignore
/// {
///     let _guard = IntrGuard::new(); // 禁用中断
///     // 临界区代码
/// } // 离开作用域，自动恢复中断状态
/// ```
pub struct IntrGuard {
    flags: usize,
}

impl IntrGuard {
    /// 原子地禁用中断并返回一个 IntrGuard 实例。
    pub fn new() -> Self {
        // SAFETY: flags 会在 drop 时原样交还给 restore_interrupts
        let flags = unsafe { intr_ops().read_and_disable_interrupts() };
        IntrGuard { flags }
    }

    /// 进入临界区前中断是否处于开启状态
    pub fn was_enabled(&self) -> bool {
        self.flags != 0
    }
}

impl Default for IntrGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for IntrGuard {
    fn drop(&mut self) {
        // SAFETY: flags 是在创建 IntrGuard 时保存的
        unsafe { intr_ops().restore_interrupts(self.flags) };
    }
}
