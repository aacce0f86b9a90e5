//! Integration tests for priority donation through locks.

use std::sync::Arc;

use ksync::{Lock, PRI_DEFAULT, SchedMode, donors_of};
use test_support::Sim;
use test_support::sim::thread;

#[test]
fn test_holder_runs_at_donor_priority() {
    let events = Sim::new().run(1, || {
        let lock = Arc::new(Lock::new());
        lock.acquire();

        let l = lock.clone();
        let hi = thread::spawn("hi", 10, move || {
            l.acquire();
            thread::record("hi acquired");
            l.release();
        });

        assert_eq!(thread::priority(), 10);
        assert_eq!(thread::base_priority(), 1);
        assert_eq!(donors_of(thread::current()), [hi]);

        lock.release();
        thread::record("lo released");
        assert_eq!(thread::priority(), 1);
        assert!(donors_of(thread::current()).is_empty());
    });
    assert_eq!(events, ["hi acquired", "lo released"]);
}

#[test]
fn test_donation_follows_wait_chain() {
    let events = Sim::new().run(1, || {
        let a = Arc::new(Lock::new());
        let b = Arc::new(Lock::new());
        a.acquire();

        let (la, lb) = (a.clone(), b.clone());
        let m = thread::spawn("m", 5, move || {
            lb.acquire();
            la.acquire();
            thread::record("m got a");
            la.release();
            lb.release();
            thread::record("m done");
        });
        assert_eq!(thread::priority(), 5);

        let lb = b.clone();
        let h = thread::spawn("h", 10, move || {
            lb.acquire();
            thread::record("h got b");
            lb.release();
        });

        assert_eq!(thread::priority_of(h), 10);
        assert_eq!(thread::priority_of(m), 10);
        assert_eq!(thread::priority(), 10);

        a.release();
        assert_eq!(thread::priority(), 1);
        thread::record("main done");
    });
    assert_eq!(events, ["m got a", "h got b", "m done", "main done"]);
}

#[test]
fn test_release_keeps_donations_from_other_locks() {
    let events = Sim::new().run(1, || {
        let a = Arc::new(Lock::new());
        let b = Arc::new(Lock::new());
        a.acquire();
        b.acquire();

        let la = a.clone();
        thread::spawn("t5", 5, move || {
            la.acquire();
            thread::record("t5");
            la.release();
        });
        let lb = b.clone();
        thread::spawn("t8", 8, move || {
            lb.acquire();
            thread::record("t8");
            lb.release();
        });
        assert_eq!(thread::priority(), 8);

        b.release();
        assert_eq!(thread::priority(), 5);
        a.release();
        assert_eq!(thread::priority(), 1);
    });
    assert_eq!(events, ["t8", "t5"]);
}

#[test]
fn test_release_lower_donor_lock_first() {
    let events = Sim::new().run(1, || {
        let a = Arc::new(Lock::new());
        let b = Arc::new(Lock::new());
        a.acquire();
        b.acquire();

        let la = a.clone();
        thread::spawn("t5", 5, move || {
            la.acquire();
            thread::record("t5");
            la.release();
        });
        let lb = b.clone();
        thread::spawn("t8", 8, move || {
            lb.acquire();
            thread::record("t8");
            lb.release();
        });

        // t5 的优先级低于仍在捐赠的 t8，释放后不会抢占
        a.release();
        assert_eq!(thread::priority(), 8);
        b.release();
        assert_eq!(thread::priority(), 1);
    });
    assert_eq!(events, ["t8", "t5"]);
}

#[test]
fn test_raised_waiter_moves_up_lock_queue() {
    let events = Sim::new().run(1, || {
        let a = Arc::new(Lock::new());
        let b = Arc::new(Lock::new());
        a.acquire();

        let (la, lb) = (a.clone(), b.clone());
        let x = thread::spawn("x", 5, move || {
            lb.acquire();
            la.acquire();
            thread::record("x got a");
            la.release();
            lb.release();
        });

        let la = a.clone();
        thread::spawn("y", 7, move || {
            la.acquire();
            thread::record("y got a");
            la.release();
        });
        assert_eq!(thread::priority(), 7);

        // z 经由 b 把 x 抬到 9，使 x 排到 y 之前
        let lb = b.clone();
        thread::spawn("z", 9, move || {
            lb.acquire();
            thread::record("z got b");
            lb.release();
        });
        assert_eq!(thread::priority_of(x), 9);
        assert_eq!(thread::priority(), 9);

        a.release();
    });
    assert_eq!(events, ["x got a", "z got b", "y got a"]);
}

#[test]
fn test_set_priority_while_donated() {
    Sim::new().run(PRI_DEFAULT, || {
        let lock = Arc::new(Lock::new());
        lock.acquire();
        let l = lock.clone();
        thread::spawn("hi", 40, move || {
            l.acquire();
            l.release();
        });
        assert_eq!(thread::priority(), 40);

        thread::set_priority(20);
        assert_eq!(thread::base_priority(), 20);
        assert_eq!(thread::priority(), 40);

        thread::set_priority(50);
        assert_eq!(thread::priority(), 50);

        thread::set_priority(20);
        assert_eq!(thread::priority(), 40);

        lock.release();
        assert_eq!(thread::priority(), 20);
    });
}

#[test]
fn test_new_holder_inherits_remaining_waiters() {
    let events = Sim::new().run(1, || {
        let lock = Arc::new(Lock::new());
        lock.acquire();

        let l = lock.clone();
        let mid = thread::spawn("mid", 5, move || {
            l.acquire();
            thread::record(format!("mid at {}", thread::priority()));
            l.release();
        });
        let l = lock.clone();
        let top = thread::spawn("top", 9, move || {
            l.acquire();
            thread::record("top");
            l.release();
        });
        assert_eq!(donors_of(thread::current()), [top, mid]);

        // top 先拿到锁并接管 mid，再释放时 mid 才运行
        lock.release();
    });
    assert_eq!(events, ["top", "mid at 5"]);
}

#[test]
fn test_mlfqs_lock_does_not_donate() {
    let events = Sim::new().run(1, || {
        let lock = Arc::new(Lock::with_mode(SchedMode::Mlfqs));
        lock.acquire();
        let l = lock.clone();
        thread::spawn("hi", 10, move || {
            l.acquire();
            thread::record("hi acquired");
            l.release();
        });
        assert_eq!(thread::priority(), 1);
        assert!(donors_of(thread::current()).is_empty());
        assert_eq!(lock.waiter_count(), 1);
        lock.release();
        thread::record("lo released");
    });
    assert_eq!(events, ["hi acquired", "lo released"]);
}

#[test]
#[should_panic(expected = "lock wait chain forms a cycle")]
fn test_donation_cycle_is_fatal() {
    Sim::new().run(1, || {
        let a = Arc::new(Lock::new());
        let b = Arc::new(Lock::new());
        a.acquire();
        let (la, lb) = (a.clone(), b.clone());
        thread::spawn("t", 5, move || {
            lb.acquire();
            la.acquire();
        });
        b.acquire();
    });
}
