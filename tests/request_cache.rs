use ferrous_container::{ContainerError, Dispose, DisposalHandle, ThreadCorrelatedCache};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

// ===== Request Cache Basics =====

#[derive(Debug)]
struct Session {
    serial: usize,
    visits: u32,
}

#[test]
fn factory_runs_once_per_request() {
    let request = ThreadCorrelatedCache::new();
    let calls = Cell::new(0);

    let first = request
        .get_or_create("session", |_| {
            calls.set(calls.get() + 1);
            Ok(Session { serial: 1, visits: 0 })
        })
        .unwrap();
    first.borrow_mut().visits += 1;

    let second = request
        .get_or_create("session", |_| {
            calls.set(calls.get() + 1);
            Ok(Session { serial: 2, visits: 0 })
        })
        .unwrap();

    assert_eq!(calls.get(), 1);
    assert!(Rc::ptr_eq(&first, &second));
    assert_eq!(second.borrow().serial, 1);
    assert_eq!(second.borrow().visits, 1);
}

#[test]
fn separate_requests_never_share_instances() {
    let a = ThreadCorrelatedCache::new();
    let b = ThreadCorrelatedCache::new();

    let from_a = a.get_or_create("session", |_| Ok(Session { serial: 1, visits: 0 })).unwrap();
    let from_b = b.get_or_create("session", |_| Ok(Session { serial: 2, visits: 0 })).unwrap();

    assert!(!Rc::ptr_eq(&from_a, &from_b));
    assert_eq!(from_b.borrow().serial, 2);
}

#[test]
fn threads_get_their_own_instances() {
    let serials = AtomicUsize::new(0);
    let seen = Mutex::new(Vec::new());

    crossbeam_utils::thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|_| {
                let request = ThreadCorrelatedCache::new();
                let first = request
                    .get_or_create("session", |_| {
                        Ok(Session { serial: serials.fetch_add(1, Ordering::SeqCst), visits: 0 })
                    })
                    .unwrap();
                first.borrow_mut().visits += 1;
                let again = request
                    .get_or_create("session", |_| Ok(Session { serial: usize::MAX, visits: 0 }))
                    .unwrap();

                assert!(Rc::ptr_eq(&first, &again));
                assert_eq!(again.borrow().visits, 1);
                seen.lock().unwrap().push(again.borrow().serial);
            });
        }
    })
    .unwrap();

    let mut seen = seen.into_inner().unwrap();
    seen.sort_unstable();
    assert_eq!(seen, vec![0, 1, 2, 3]);
}

// ===== Disposal =====

#[test]
fn clear_disposes_in_reverse_creation_order() {
    let request = ThreadCorrelatedCache::new();
    let order = Rc::new(RefCell::new(Vec::new()));

    for name in ["first", "second", "third"] {
        let log = order.clone();
        request
            .get_or_create(name, move |handle: &DisposalHandle| {
                handle.push(move || log.borrow_mut().push(name));
                Ok(())
            })
            .unwrap();
    }
    assert_eq!(request.ids().len(), 3);

    request.clear_for_thread();
    assert_eq!(*order.borrow(), vec!["third", "second", "first"]);
    assert!(request.is_empty());
}

#[test]
fn dropping_the_request_clears_it() {
    let disposed = Rc::new(Cell::new(false));
    {
        let request = ThreadCorrelatedCache::new();
        let flag = disposed.clone();
        request
            .get_or_create("temp", move |handle| {
                handle.push(move || flag.set(true));
                Ok(0u8)
            })
            .unwrap();
        assert!(!disposed.get());
    }
    assert!(disposed.get());
}

struct TempFile {
    removed: Rc<Cell<u32>>,
}

impl Dispose for TempFile {
    fn dispose(&mut self) {
        self.removed.set(self.removed.get() + 1);
    }
}

#[test]
fn registered_disposers_run_once() {
    let request = ThreadCorrelatedCache::new();
    let removed = Rc::new(Cell::new(0));

    let file = request
        .get_or_create("scratch", |_| Ok(TempFile { removed: removed.clone() }))
        .unwrap();
    let handle = request.disposal_handle("scratch").unwrap();
    handle.register_disposer(file.clone());
    assert_eq!(handle.pending(), 1);

    request.clear_for_thread();
    request.clear_for_thread();
    assert_eq!(removed.get(), 1);
    assert!(handle.is_disposed());
}

#[test]
fn missing_handle_is_none() {
    let request = ThreadCorrelatedCache::new();
    assert!(request.disposal_handle("nothing").is_none());
}

#[test]
fn factory_errors_leave_no_entry() {
    let request = ThreadCorrelatedCache::new();
    let result = request.get_or_create::<u32, _>("broken", |_| {
        Err(ContainerError::Instantiation { component: None, reason: "disk full".into() })
    });
    assert!(matches!(result, Err(ContainerError::Instantiation { .. })));
    assert!(!request.contains("broken"));

    let retry = request.get_or_create("broken", |_| Ok(9u32)).unwrap();
    assert_eq!(*retry.borrow(), 9);
}
