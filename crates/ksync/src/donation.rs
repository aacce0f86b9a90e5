//! 优先级捐赠
//!
//! 线程 T 阻塞在线程 H 持有的锁上时：
//!
//! 1. T 记录 `wait_on_lock`，并按优先级插入 H 的捐赠列表；
//! 2. H 的有效优先级提升为 `max(H, T)`；若 H 自己也在等待某个锁，
//!    则沿等待链继续向上提升，直到某个线程不再等待任何锁。
//!
//! H 释放锁时，只撤销 `wait_on_lock` 指向该锁的捐赠者：H 可能同时持有多个锁，
//! 其它锁上的捐赠仍然有效。之后 H 的有效优先级重新计算为
//! `max(基础优先级, 剩余捐赠者的最高优先级)`。

use alloc::vec::Vec;

use crate::lock::{Lock, LockRef};
use crate::ordered::thread_outranks;
use crate::sched::{ThreadId, priority_of, sched_ops, with_sync};
use crate::violation::{Violation, fatal};

fn wait_on_lock(thread: ThreadId) -> Option<LockRef> {
    with_sync(thread, |sync| sync.wait_on_lock)
}

/// `donor` 即将阻塞在 `holder` 持有的 `lock` 上
pub(crate) fn donate(donor: ThreadId, lock: &Lock, holder: ThreadId) {
    with_sync(donor, |sync| sync.wait_on_lock = Some(LockRef::of(lock)));
    if !lock.mode().donates() {
        return;
    }
    with_sync(holder, |sync| {
        if !sync.donations.contains(&donor) {
            sync.donations.insert_ordered(donor, thread_outranks);
        }
    });
    log::trace!("ksync: {} donates to {}", donor, holder);
    propagate(donor);
}

/// 沿等待链向上传递 `from` 的优先级
fn propagate(from: ThreadId) {
    let mut donor = from;
    while let Some(lock_ref) = wait_on_lock(donor) {
        // SAFETY: donor 记录了 wait_on_lock，说明它仍处于该锁的 acquire 中
        let lock = unsafe { lock_ref.get() };
        if !lock.mode().donates() {
            break;
        }
        let Some(holder) = lock.holder() else {
            break;
        };
        if holder == from {
            fatal(Violation::DonationCycle);
        }

        let priority = priority_of(donor);
        if priority > priority_of(holder) {
            log::trace!("ksync: {} raised to {} by {}", holder, priority, donor);
            sched_ops().set_priority(holder, priority);
            requeue(holder);
        }
        donor = holder;
    }
}

/// `thread` 的优先级变化后，调整它在所等待的锁相关队列中的位置
fn requeue(thread: ThreadId) {
    let Some(lock_ref) = wait_on_lock(thread) else {
        return;
    };
    // SAFETY: 同 propagate
    let lock = unsafe { lock_ref.get() };
    lock.sema.reposition(thread);
    if let Some(holder) = lock.holder() {
        with_sync(holder, |sync| {
            sync.donations.reposition(&thread, thread_outranks);
        });
    }
}

/// `holder` 释放 `lock`：撤销因该锁获得的捐赠并重新计算优先级
pub(crate) fn revoke(holder: ThreadId, lock: &Lock) {
    let donors = donors_of(holder);
    let stale: Vec<ThreadId> = donors
        .into_iter()
        .filter(|&donor| wait_on_lock(donor).is_some_and(|l| l.is(lock)))
        .collect();
    if !stale.is_empty() {
        with_sync(holder, |sync| sync.donations.retain(|d| !stale.contains(d)));
        log::trace!("ksync: {} drops {} donor(s)", holder, stale.len());
    }
    refresh_priority(holder);
}

/// 当前线程已拿到锁，不再等待
pub(crate) fn settle(thread: ThreadId) {
    with_sync(thread, |sync| sync.wait_on_lock = None);
}

/// 新持有者接管仍排在锁上的等待者作为捐赠者
///
/// 这些等待者此前捐赠给旧持有者，旧持有者释放时已撤销。
pub(crate) fn adopt_waiters(holder: ThreadId, lock: &Lock) {
    if !lock.mode().donates() {
        return;
    }
    let waiters = lock.sema.waiting_threads();
    if waiters.is_empty() {
        return;
    }
    with_sync(holder, |sync| {
        for &waiter in &waiters {
            if !sync.donations.contains(&waiter) {
                sync.donations.insert_ordered(waiter, thread_outranks);
            }
        }
    });
    log::trace!("ksync: {} adopts {} waiter(s)", holder, waiters.len());
    refresh_priority(holder);
}

/// 重新计算线程的有效优先级：`max(基础优先级, 所有捐赠者的最高优先级)`
///
/// 线程的基础优先级被修改后，调度器也应调用此函数。
pub fn refresh_priority(thread: ThreadId) {
    let ops = sched_ops();
    // 捐赠列表按入队时的优先级排序，之后捐赠者的优先级可能变化，因此取全体最大值
    let donated = donors_of(thread).into_iter().map(priority_of).max();
    let base = ops.base_priority_of(thread);
    let priority = donated.map_or(base, |p| p.max(base));
    if priority != ops.priority_of(thread) {
        ops.set_priority(thread, priority);
        requeue(thread);
    }
}

/// 线程当前的捐赠者，按捐赠列表顺序
pub fn donors_of(thread: ThreadId) -> Vec<ThreadId> {
    with_sync(thread, |sync| sync.donors())
}
