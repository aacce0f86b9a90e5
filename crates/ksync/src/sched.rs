//! 调度器接口
//!
//! 线程控制块和调度器由内核的任务子系统实现，本 crate 只通过 [`SchedOps`] 使用它们。
//! 线程侧的捐赠记录 [`ThreadSync`] 由线程控制块持有，但只由本 crate 修改。

use core::fmt;
use core::sync::atomic::{AtomicUsize, Ordering};

use alloc::vec::Vec;

use crate::lock::LockRef;
use crate::ordered::OrderedQueue;
use crate::violation::{Violation, fatal};

/// 线程优先级，数值越大优先级越高
pub type Priority = u8;

/// 线程标识
///
/// 线程本身由调度器管理，同步原语只保存标识，不持有线程。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub u32);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tid {}", self.0)
    }
}

/// 线程侧的捐赠记录
///
/// 嵌入在线程控制块中，通过 [`SchedOps::with_thread_sync`] 交给本 crate 访问。
#[derive(Debug, Default)]
pub struct ThreadSync {
    /// 线程当前阻塞等待的锁，仅在 `Lock::acquire` 内部有值
    pub(crate) wait_on_lock: Option<LockRef>,
    /// 向该线程捐赠优先级的线程，按捐赠者优先级降序
    pub(crate) donations: OrderedQueue<ThreadId>,
}

impl ThreadSync {
    /// 创建一个空的捐赠记录
    pub const fn new() -> Self {
        ThreadSync {
            wait_on_lock: None,
            donations: OrderedQueue::new(),
        }
    }

    /// 线程当前阻塞等待的锁
    pub fn wait_on_lock(&self) -> Option<LockRef> {
        self.wait_on_lock
    }

    /// 当前的捐赠者列表
    pub fn donors(&self) -> Vec<ThreadId> {
        self.donations.iter().copied().collect()
    }
}

/// 调度器与线程控制块操作
///
/// 由任务子系统实现并注册。实现必须保证：
/// - `with_thread_sync` 调用回调期间，其它方法仍可被调用（回调会比较优先级）；
/// - `block_current` 只在当前线程被 `unblock` 之后才返回。
pub trait SchedOps: Send + Sync {
    /// 当前线程
    fn current_thread(&self) -> ThreadId;

    /// 阻塞当前线程并切换到其它线程，直到被 [`SchedOps::unblock`] 唤醒后才返回
    ///
    /// 调用时中断已被禁用。
    fn block_current(&self);

    /// 将一个阻塞的线程置为就绪，本身不触发抢占
    fn unblock(&self, thread: ThreadId);

    /// 若就绪队列中有优先级高于当前线程的线程则让出 CPU
    ///
    /// 可在中断上下文中调用，此时应推迟到中断返回时再让出。
    fn yield_if_outranked(&self);

    /// 线程的有效优先级
    fn priority_of(&self, thread: ThreadId) -> Priority;

    /// 线程的基础优先级（不含捐赠）
    fn base_priority_of(&self, thread: ThreadId) -> Priority;

    /// 设置线程的有效优先级
    fn set_priority(&self, thread: ThreadId, priority: Priority);

    /// 以可变方式访问线程的捐赠记录
    fn with_thread_sync(&self, thread: ThreadId, f: &mut dyn FnMut(&mut ThreadSync));
}

static SCHED_OPS_DATA: AtomicUsize = AtomicUsize::new(0);
static SCHED_OPS_VTABLE: AtomicUsize = AtomicUsize::new(0);

/// 注册调度器操作实现
///
/// # Safety
/// 必须在单线程环境下调用，且只能调用一次
pub unsafe fn register_sched_ops(ops: &'static dyn SchedOps) {
    let ptr = ops as *const dyn SchedOps;
    // SAFETY: 将 fat pointer 拆分为 data 和 vtable 两部分存储
    let (data, vtable) =
        unsafe { core::mem::transmute::<*const dyn SchedOps, (usize, usize)>(ptr) };
    SCHED_OPS_DATA.store(data, Ordering::Release);
    SCHED_OPS_VTABLE.store(vtable, Ordering::Release);
}

/// 获取已注册的调度器操作实现
#[inline]
pub(crate) fn sched_ops() -> &'static dyn SchedOps {
    let data = SCHED_OPS_DATA.load(Ordering::Acquire);
    let vtable = SCHED_OPS_VTABLE.load(Ordering::Acquire);
    if data == 0 {
        fatal(Violation::Unregistered("SchedOps"));
    }
    // SAFETY: 重组 fat pointer
    unsafe { &*core::mem::transmute::<(usize, usize), *const dyn SchedOps>((data, vtable)) }
}

/// 当前线程
#[inline]
pub fn current_thread() -> ThreadId {
    sched_ops().current_thread()
}

#[inline]
pub(crate) fn priority_of(thread: ThreadId) -> Priority {
    sched_ops().priority_of(thread)
}

/// 在线程的捐赠记录上执行 `f`
///
/// 回调内不得再次访问同一线程的记录。
pub(crate) fn with_sync<R>(thread: ThreadId, f: impl FnOnce(&mut ThreadSync) -> R) -> R {
    let mut f = Some(f);
    let mut out = None;
    sched_ops().with_thread_sync(thread, &mut |sync: &mut ThreadSync| {
        if let Some(f) = f.take() {
            out = Some(f(sync));
        }
    });
    match out {
        Some(out) => out,
        None => panic!("ksync: with_thread_sync did not run the callback for {}", thread),
    }
}
