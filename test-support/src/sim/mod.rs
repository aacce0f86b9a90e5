//! 单 CPU 协作式调度模拟器
//!
//! 每个模拟线程对应一个宿主线程，但任意时刻只有被调度的那一个在运行，
//! 其余都停在条件变量上等待轮到自己。调度规则与内核一致：
//! 总是运行有效优先级最高的就绪线程，同优先级按进入就绪队列的顺序。
//!
//! [`SimOps`] 同时实现 [`IntrOps`] 与 [`SchedOps`]，全局只注册一次；
//! 具体转发到哪个模拟器由宿主线程的线程局部变量决定，因此各个测试可以并行运行。
//!
//! # 示例
//! ```ignore
//! let events = Sim::new().run(PRI_DEFAULT, || {
//!     thread::spawn("worker", PRI_DEFAULT + 1, || thread::record("worker"));
//!     thread::record("main");
//! });
//! assert_eq!(events, ["worker", "main"]);
//! ```

pub mod thread;

use std::any::Any;
use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Once, PoisonError};

use ksync::{IntrOps, Priority, SchedOps, ThreadId, ThreadSync};

use crate::mock::arch::MockIntr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Ready,
    Running,
    Blocked,
    Dying,
}

struct SimThread {
    name: String,
    priority: Priority,
    base_priority: Priority,
    status: Status,
    /// 被切换出去时的中断开关状态
    saved_intr: bool,
    sync: Arc<Mutex<ThreadSync>>,
}

enum Outcome {
    Finished,
    Deadlock(Vec<String>),
    Panicked(Box<dyn Any + Send>),
}

struct State {
    threads: BTreeMap<ThreadId, SimThread>,
    ready: VecDeque<ThreadId>,
    running: Option<ThreadId>,
    next_tid: u32,
    /// 中断处理程序要求返回时让出 CPU
    yield_on_return: bool,
    outcome: Option<Outcome>,
    events: Vec<String>,
}

impl State {
    fn thread(&self, tid: ThreadId) -> &SimThread {
        match self.threads.get(&tid) {
            Some(thread) => thread,
            None => panic!("sim: unknown thread {}", tid),
        }
    }

    fn thread_mut(&mut self, tid: ThreadId) -> &mut SimThread {
        match self.threads.get_mut(&tid) {
            Some(thread) => thread,
            None => panic!("sim: unknown thread {}", tid),
        }
    }

    /// 从就绪队列中取出优先级最高者，同优先级取最早进入的
    fn pick_next(&mut self) -> Option<ThreadId> {
        let mut best: Option<(usize, Priority)> = None;
        for (idx, tid) in self.ready.iter().enumerate() {
            let priority = self.thread(*tid).priority;
            if best.is_none_or(|(_, p)| priority > p) {
                best = Some((idx, priority));
            }
        }
        best.and_then(|(idx, _)| self.ready.remove(idx))
    }

    fn outranked(&self, tid: ThreadId) -> bool {
        let mine = self.thread(tid).priority;
        self.ready.iter().any(|t| self.thread(*t).priority > mine)
    }
}

struct Shared {
    state: Mutex<State>,
    turn: Condvar,
    intr: MockIntr,
}

impl Shared {
    fn new() -> Self {
        Shared {
            state: Mutex::new(State {
                threads: BTreeMap::new(),
                ready: VecDeque::new(),
                running: None,
                next_tid: 1,
                yield_on_return: false,
                outcome: None,
                events: Vec::new(),
            }),
            turn: Condvar::new(),
            intr: MockIntr::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 创建一个就绪线程
    fn create(&self, name: &str, priority: Priority) -> ThreadId {
        let mut state = self.lock();
        let tid = ThreadId(state.next_tid);
        state.next_tid += 1;
        state.threads.insert(
            tid,
            SimThread {
                name: name.to_string(),
                priority,
                base_priority: priority,
                status: Status::Ready,
                saved_intr: true,
                sync: Arc::new(Mutex::new(ThreadSync::new())),
            },
        );
        state.ready.push_back(tid);
        log::trace!("sim: create {} ({}) at priority {}", name, tid, priority);
        tid
    }

    /// 选出下一个运行的线程；没有就绪线程时结束模拟
    fn dispatch(&self, state: &mut State) {
        match state.pick_next() {
            Some(next) => {
                let thread = state.thread_mut(next);
                log::trace!("sim: switch to {}", thread.name);
                thread.status = Status::Running;
                let intr = thread.saved_intr;
                state.running = Some(next);
                self.intr.set_interrupts_enabled(intr);
            }
            None => {
                state.running = None;
                let blocked: Vec<String> = state
                    .threads
                    .values()
                    .filter(|t| t.status == Status::Blocked)
                    .map(|t| t.name.clone())
                    .collect();
                if state.outcome.is_none() {
                    state.outcome = Some(if blocked.is_empty() {
                        Outcome::Finished
                    } else {
                        Outcome::Deadlock(blocked)
                    });
                }
            }
        }
        self.turn.notify_all();
    }

    /// 当前线程让出 CPU 并进入 `status` 状态
    fn switch_out(&self, state: &mut State, me: ThreadId, status: Status) {
        let intr = self.intr.interrupts_enabled();
        let thread = state.thread_mut(me);
        thread.saved_intr = intr;
        thread.status = status;
        if status == Status::Ready {
            state.ready.push_back(me);
        }
        self.dispatch(state);
    }

    /// 等待直到轮到 `me` 运行
    ///
    /// 模拟结束后仍未轮到的线程会一直停在这里。
    fn wait_turn(&self, mut state: MutexGuard<'_, State>, me: ThreadId) {
        while state.running != Some(me) {
            state = self.turn.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn sync_of(&self, tid: ThreadId) -> Arc<Mutex<ThreadSync>> {
        self.lock().thread(tid).sync.clone()
    }
}

thread_local! {
    static CURRENT: RefCell<Option<(Arc<Shared>, ThreadId)>> = const { RefCell::new(None) };
}

fn try_context() -> Option<(Arc<Shared>, ThreadId)> {
    CURRENT.with(|c| c.borrow().clone())
}

fn context() -> (Arc<Shared>, ThreadId) {
    match try_context() {
        Some(ctx) => ctx,
        None => panic!("sim: not running inside a simulated thread"),
    }
}

/// 为模拟线程启动宿主线程
fn start<F>(shared: Arc<Shared>, tid: ThreadId, name: &str, f: F)
where
    F: FnOnce() + Send + 'static,
{
    let builder = std::thread::Builder::new().name(format!("sim-{}", name));
    let spawned = builder.spawn(move || {
        CURRENT.with(|c| *c.borrow_mut() = Some((shared.clone(), tid)));
        shared.wait_turn(shared.lock(), tid);

        let result = panic::catch_unwind(AssertUnwindSafe(f));

        let mut state = shared.lock();
        state.thread_mut(tid).status = Status::Dying;
        match result {
            Ok(()) => shared.dispatch(&mut state),
            Err(payload) => {
                state.running = None;
                state.outcome = Some(Outcome::Panicked(payload));
                shared.turn.notify_all();
            }
        }
    });
    if let Err(e) = spawned {
        panic!("sim: failed to spawn host thread: {}", e);
    }
}

/// 同时实现中断与调度操作的转发器
struct SimOps;

static SIM_OPS: SimOps = SimOps;
static REGISTER: Once = Once::new();

impl IntrOps for SimOps {
    unsafe fn read_and_disable_interrupts(&self) -> usize {
        try_context().map_or(0, |(shared, _)| shared.intr.read_and_disable_interrupts())
    }

    unsafe fn restore_interrupts(&self, flags: usize) {
        if let Some((shared, _)) = try_context() {
            shared.intr.restore_interrupts(flags);
        }
    }

    fn in_interrupt_context(&self) -> bool {
        try_context().is_some_and(|(shared, _)| shared.intr.in_interrupt_context())
    }
}

impl SchedOps for SimOps {
    fn current_thread(&self) -> ThreadId {
        context().1
    }

    fn block_current(&self) {
        let (shared, me) = context();
        assert!(
            !shared.intr.interrupts_enabled(),
            "sim: block_current called with interrupts enabled"
        );
        let mut state = shared.lock();
        log::trace!("sim: {} blocks", state.thread(me).name);
        shared.switch_out(&mut state, me, Status::Blocked);
        shared.wait_turn(state, me);
    }

    fn unblock(&self, thread: ThreadId) {
        let (shared, _) = context();
        let mut state = shared.lock();
        let sim_thread = state.thread_mut(thread);
        assert_eq!(
            sim_thread.status,
            Status::Blocked,
            "sim: unblock of a thread that is not blocked"
        );
        sim_thread.status = Status::Ready;
        state.ready.push_back(thread);
    }

    fn yield_if_outranked(&self) {
        let (shared, me) = context();
        let mut state = shared.lock();
        if shared.intr.in_interrupt_context() {
            state.yield_on_return = true;
            return;
        }
        if state.outranked(me) {
            shared.switch_out(&mut state, me, Status::Ready);
            shared.wait_turn(state, me);
        }
    }

    fn priority_of(&self, thread: ThreadId) -> Priority {
        context().0.lock().thread(thread).priority
    }

    fn base_priority_of(&self, thread: ThreadId) -> Priority {
        context().0.lock().thread(thread).base_priority
    }

    fn set_priority(&self, thread: ThreadId, priority: Priority) {
        context().0.lock().thread_mut(thread).priority = priority;
    }

    fn with_thread_sync(&self, thread: ThreadId, f: &mut dyn FnMut(&mut ThreadSync)) {
        // 回调会再次查询优先级，不能持有状态锁
        let sync = context().0.sync_of(thread);
        let mut sync = sync.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut sync);
    }
}

/// 一次模拟运行
pub struct Sim {
    shared: Arc<Shared>,
}

impl Sim {
    /// 创建模拟器，首次调用时注册全局的中断与调度操作
    pub fn new() -> Self {
        REGISTER.call_once(|| unsafe {
            ksync::register_intr_ops(&SIM_OPS);
            ksync::register_sched_ops(&SIM_OPS);
        });
        Sim {
            shared: Arc::new(Shared::new()),
        }
    }

    /// 以 `priority` 运行主线程 `f`，直到所有模拟线程结束
    ///
    /// 返回各线程通过 [`thread::record`] 记录的事件。
    /// 模拟线程 panic 时原样向上传播；所有剩余线程都阻塞时报告死锁。
    pub fn run<F>(&self, priority: Priority, f: F) -> Vec<String>
    where
        F: FnOnce() + Send + 'static,
    {
        let tid = self.shared.create("main", priority);
        {
            let mut state = self.shared.lock();
            self.shared.dispatch(&mut state);
        }
        start(self.shared.clone(), tid, "main", f);

        let mut state = self.shared.lock();
        while state.outcome.is_none() {
            state = self
                .shared
                .turn
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        match state.outcome.take() {
            Some(Outcome::Deadlock(blocked)) => {
                panic!("sim: deadlock, blocked threads: {:?}", blocked)
            }
            Some(Outcome::Panicked(payload)) => {
                drop(state);
                panic::resume_unwind(payload)
            }
            _ => std::mem::take(&mut state.events),
        }
    }
}

impl Default for Sim {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ksync::{PRI_DEFAULT, PRI_MIN, Semaphore};

    #[test]
    fn test_higher_priority_spawn_runs_first() {
        let events = Sim::new().run(PRI_DEFAULT, || {
            thread::spawn("low", PRI_MIN, || thread::record("low"));
            thread::spawn("high", PRI_DEFAULT + 1, || thread::record("high"));
            thread::record("main");
        });
        assert_eq!(events, ["high", "main", "low"]);
    }

    #[test]
    fn test_yield_rotates_equal_priority() {
        let events = Sim::new().run(PRI_DEFAULT, || {
            thread::spawn("other", PRI_DEFAULT, || thread::record("other"));
            thread::record("main 1");
            thread::yield_now();
            thread::record("main 2");
        });
        assert_eq!(events, ["main 1", "other", "main 2"]);
    }

    #[test]
    fn test_threads_have_distinct_ids() {
        Sim::new().run(PRI_DEFAULT, || {
            let main = thread::current();
            let child = thread::spawn("child", PRI_MIN, || {});
            assert_ne!(main, child);
            assert_eq!(thread::priority_of(child), PRI_MIN);
        });
    }

    #[test]
    #[should_panic(expected = "deadlock")]
    fn test_all_blocked_is_deadlock() {
        Sim::new().run(PRI_DEFAULT, || {
            let sema = Semaphore::new(0);
            sema.down();
        });
    }

    #[test]
    #[should_panic(expected = "boom")]
    fn test_thread_panic_propagates() {
        Sim::new().run(PRI_DEFAULT, || {
            thread::spawn("child", PRI_DEFAULT + 1, || panic!("boom"));
        });
    }
}
