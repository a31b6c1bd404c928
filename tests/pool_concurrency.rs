use ferrous_container::{ContainerError, InstancePool, PoolConfig};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

// ===== Concurrent Pool Access =====

#[derive(Debug)]
struct Worker {
    id: usize,
    in_use: AtomicBool,
}

fn worker_pool(max: usize, timeout: Duration) -> (InstancePool<Arc<Worker>>, Arc<AtomicUsize>) {
    let created = Arc::new(AtomicUsize::new(0));
    let counter = created.clone();
    let config = PoolConfig {
        max_size: max,
        access_timeout: timeout,
        ..PoolConfig::default()
    };
    let pool = InstancePool::from_fn(config, move || {
        let id = counter.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(Worker { id, in_use: AtomicBool::new(false) }))
    })
    .unwrap();
    (pool, created)
}

#[test]
fn no_two_threads_hold_the_same_instance() {
    let (pool, created) = worker_pool(3, Duration::from_secs(10));
    let overlaps = AtomicUsize::new(0);

    crossbeam_utils::thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|_| {
                for _ in 0..25 {
                    let lease = pool.checkout().unwrap();
                    if lease.in_use.swap(true, Ordering::SeqCst) {
                        overlaps.fetch_add(1, Ordering::SeqCst);
                    }
                    thread::yield_now();
                    lease.in_use.store(false, Ordering::SeqCst);
                    lease.checkin();
                }
            });
        }
    })
    .unwrap();

    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    assert!(created.load(Ordering::SeqCst) <= 3);
    let stats = pool.stats();
    assert_eq!(stats.checkouts, 200);
    assert_eq!(stats.instances_active, 0);
}

#[test]
fn five_callers_share_two_instances() {
    let (pool, created) = worker_pool(2, Duration::from_secs(10));
    let active = AtomicUsize::new(0);
    let peak = AtomicUsize::new(0);
    let served = AtomicUsize::new(0);

    crossbeam_utils::thread::scope(|s| {
        for _ in 0..5 {
            s.spawn(|_| {
                let lease = pool.checkout().unwrap();
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(20));
                active.fetch_sub(1, Ordering::SeqCst);
                served.fetch_add(1, Ordering::SeqCst);
                drop(lease);
            });
        }
    })
    .unwrap();

    assert_eq!(served.load(Ordering::SeqCst), 5);
    assert!(created.load(Ordering::SeqCst) <= 2);
    assert!(peak.load(Ordering::SeqCst) <= 2);
}

#[test]
fn strict_pool_times_out_when_exhausted() {
    let (pool, _) = worker_pool(1, Duration::from_millis(30));
    let held = pool.checkout().unwrap();

    let err = pool.checkout().unwrap_err();
    match err {
        ContainerError::PoolExhausted { waited, .. } => assert!(waited >= Duration::from_millis(30)),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(pool.stats().access_timeouts, 1);

    let err = pool.checkout_timeout(Duration::ZERO).unwrap_err();
    assert!(matches!(err, ContainerError::PoolExhausted { .. }));
    assert_eq!(pool.stats().access_timeouts, 2);
    drop(held);
    assert!(pool.checkout_timeout(Duration::ZERO).is_ok());
}

#[test]
fn waiter_wakes_when_instance_returns() {
    let (pool, _) = worker_pool(1, Duration::from_secs(10));
    let first = pool.checkout().unwrap();
    let first_id = first.id;

    crossbeam_utils::thread::scope(|s| {
        let waiter = s.spawn(|_| pool.checkout().map(|lease| lease.id));
        thread::sleep(Duration::from_millis(20));
        first.checkin();
        assert_eq!(waiter.join().unwrap().unwrap(), first_id);
    })
    .unwrap();
}

#[test]
fn overdraft_instances_are_destroyed_when_pool_is_full() {
    let config = PoolConfig {
        max_size: 1,
        strict: false,
        ..PoolConfig::default()
    };
    let pool = InstancePool::from_fn(config, || Ok(())).unwrap();

    let a = pool.checkout().unwrap();
    let b = pool.checkout().unwrap();
    assert!(!a.is_overdraft());
    assert!(b.is_overdraft());
    assert_eq!(pool.stats().instances_overdraft, 1);

    a.checkin();
    b.checkin();
    let stats = pool.stats();
    assert_eq!(stats.discarded_full, 1);
    assert_eq!(stats.instances_idle, 1);
    assert_eq!(stats.overdrafts, 1);
}

// ===== Unhealthy Instances =====

#[test]
fn unhealthy_checkin_shrinks_pool_and_is_never_reused() {
    let (pool, created) = worker_pool(2, Duration::from_millis(50));
    let a = pool.checkout().unwrap();
    let b = pool.checkout().unwrap();
    let bad_id = a.id;
    b.checkin();

    let before = pool.stats().instances_pooled;
    pool.checkin(a, false);
    assert_eq!(pool.stats().instances_pooled, before - 1);
    assert_eq!(pool.stats().unhealthy, 1);

    let leases: Vec<_> = (0..2).map(|_| pool.checkout().unwrap()).collect();
    assert!(leases.iter().all(|l| l.id != bad_id));
    assert_eq!(created.load(Ordering::SeqCst), 3);
}

#[test]
fn panicking_holder_discards_its_instance() {
    let (pool, _) = worker_pool(1, Duration::from_millis(50));
    let pool = Arc::new(pool);

    let holder = pool.clone();
    let result = thread::spawn(move || {
        let _lease = holder.checkout().unwrap();
        panic!("worker crashed");
    })
    .join();
    assert!(result.is_err());

    let stats = pool.stats();
    assert_eq!(stats.unhealthy, 1);
    assert_eq!(stats.instances_pooled, 0);
    assert_eq!(pool.checkout().unwrap().id, 1);
}

// ===== Shutdown =====

#[test]
fn close_waits_for_outstanding_leases() {
    let (pool, _) = worker_pool(2, Duration::from_secs(1));
    let idle = pool.checkout().unwrap();
    idle.checkin();
    let lease = pool.checkout().unwrap();

    crossbeam_utils::thread::scope(|s| {
        s.spawn(|_| {
            thread::sleep(Duration::from_millis(30));
            drop(lease);
        });
        assert!(pool.close(Duration::from_secs(5)));
    })
    .unwrap();

    assert!(pool.is_closed());
    assert!(matches!(pool.checkout(), Err(ContainerError::ShuttingDown)));
    assert_eq!(pool.stats().instances_pooled, 0);
}

#[test]
fn close_reports_leases_that_never_return() {
    let (pool, _) = worker_pool(1, Duration::from_secs(1));
    let lease = pool.checkout().unwrap();
    assert!(!pool.close(Duration::from_millis(20)));
    drop(lease);
    assert_eq!(pool.stats().closed, 1);
}
