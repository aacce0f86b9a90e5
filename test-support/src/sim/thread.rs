//! 模拟线程内可用的操作
//!
//! 这些函数只能在 [`Sim::run`](super::Sim::run) 启动的模拟线程中调用。

use ksync::{Priority, SchedOps, ThreadId};

use super::{SIM_OPS, context, start};

/// 创建一个就绪的模拟线程
///
/// 新线程优先级高于当前线程时立即让出 CPU。
pub fn spawn<F>(name: &str, priority: Priority, f: F) -> ThreadId
where
    F: FnOnce() + Send + 'static,
{
    let (shared, _) = context();
    let tid = shared.create(name, priority);
    start(shared, tid, name, f);
    SIM_OPS.yield_if_outranked();
    tid
}

/// 当前模拟线程
pub fn current() -> ThreadId {
    context().1
}

/// 让出 CPU，同优先级的就绪线程也会先于当前线程运行
pub fn yield_now() {
    let (shared, me) = context();
    let mut state = shared.lock();
    shared.switch_out(&mut state, me, super::Status::Ready);
    shared.wait_turn(state, me);
}

/// 当前线程的有效优先级
pub fn priority() -> Priority {
    priority_of(current())
}

/// 当前线程的基础优先级
pub fn base_priority() -> Priority {
    SIM_OPS.base_priority_of(current())
}

/// 任意线程的有效优先级
pub fn priority_of(thread: ThreadId) -> Priority {
    SIM_OPS.priority_of(thread)
}

/// 修改当前线程的基础优先级
///
/// 有效优先级按剩余捐赠重新计算，降低后若被压过则立即让出 CPU。
pub fn set_priority(priority: Priority) {
    let (shared, me) = context();
    shared.lock().thread_mut(me).base_priority = priority;
    ksync::refresh_priority(me);
    SIM_OPS.yield_if_outranked();
}

/// 记录一个事件，[`Sim::run`](super::Sim::run) 返回时按记录顺序交给调用者
pub fn record(event: impl Into<String>) {
    let (shared, _) = context();
    shared.lock().events.push(event.into());
}

/// 在模拟的中断处理程序中执行 `f`
///
/// `f` 中要求的让出推迟到中断返回之后。
pub fn interrupt<F: FnOnce()>(f: F) {
    let (shared, _) = context();
    let flags = shared.intr.enter_irq();
    f();
    shared.intr.exit_irq(flags);
    let pending = std::mem::take(&mut shared.lock().yield_on_return);
    if pending {
        SIM_OPS.yield_if_outranked();
    }
}
