//! 可睡眠同步原语
//!
//! 向内核其它模块提供按优先级唤醒的睡眠型同步原语：
//!
//! - [`Semaphore`] - 计数信号量，其它原语的基础
//! - [`Lock`] - 带优先级捐赠的互斥锁，构建于值为 1 的信号量之上
//! - [`Condition`] - Mesa 风格条件变量，构建于 [`Lock`] 与 [`Semaphore`] 之上
//! - [`Mutex`] - 基于 `lock_api` 的数据型互斥锁，底层锁即 [`Lock`]
//!
//! # 调度模型
//!
//! 本 crate 假设单个逻辑 CPU 上的协作式调度：关闭本地中断即可获得原子临界区。
//! 所有等待队列都按线程的**有效优先级**降序排列，同优先级保持入队顺序；
//! 由于捐赠可能在线程排队期间抬高其优先级，队列在唤醒时才重新排序。
//!
//! # 外部依赖
//!
//! 线程控制块与调度器、中断屏蔽都不属于本 crate，而是通过两个 trait 抽象：
//!
//! - [`SchedOps`]：当前线程、阻塞/唤醒、优先级读写、线程侧捐赠记录
//! - [`IntrOps`]：关闭/恢复中断、判断是否处于中断上下文
//!
//! 使用前必须分别调用 [`register_sched_ops`] 与 [`register_intr_ops`] 注册实现。

#![no_std]

extern crate alloc;

mod condvar;
mod config;
mod donation;
mod intr;
mod intr_cell;
mod lock;
mod mutex;
mod ordered;
mod sched;
mod semaphore;
mod violation;

pub use condvar::{Condition, Waiter, waiter_outranks};
pub use config::{PRI_DEFAULT, PRI_MAX, PRI_MIN, SchedMode};
pub use donation::{donors_of, refresh_priority};
pub use intr::{IntrGuard, IntrOps, in_interrupt_context, register_intr_ops};
pub use intr_cell::{IntrCell, IntrCellGuard};
pub use lock::{Lock, LockRef};
pub use mutex::{Mutex, MutexGuard};
pub use ordered::{OrderedQueue, Outranks, thread_outranks};
pub use sched::{Priority, SchedOps, ThreadId, ThreadSync, current_thread, register_sched_ops};
pub use semaphore::Semaphore;
pub use violation::Violation;
