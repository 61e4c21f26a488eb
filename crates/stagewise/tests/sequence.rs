use crossbeam_channel::select;
use proptest::prelude::*;
use stagewise::{Coordinator, ShutdownConfig, Stage};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn coordinator() -> Coordinator {
    init_tracing();
    Coordinator::with_config(ShutdownConfig::with_timeout(Duration::from_secs(1)))
}

fn flag() -> Arc<AtomicBool> {
    Arc::new(AtomicBool::new(false))
}

fn set(flag: Arc<AtomicBool>) {
    flag.store(true, Ordering::SeqCst);
}

fn is_set(flag: &AtomicBool) -> bool {
    flag.load(Ordering::SeqCst)
}

/// Shutdown must finish well inside this bound in every test.
fn assert_quick(start: Instant) {
    assert!(
        start.elapsed() < Duration::from_secs(4),
        "shutdown took {:?}",
        start.elapsed()
    );
}

#[test]
fn test_stage_order_with_channels() {
    let c = coordinator();

    let t3 = c.third();
    assert!(!c.started());
    let t2 = c.second();
    assert!(!c.started());
    let t1 = c.first();
    assert!(!c.started());

    let listener = thread::spawn(move || {
        let mut seen = Vec::new();
        while seen.len() < 3 {
            select! {
                recv(t1.receiver()) -> msg => {
                    if let Ok(a) = msg {
                        seen.push(1);
                        a.done();
                    }
                }
                recv(t2.receiver()) -> msg => {
                    if let Ok(a) = msg {
                        seen.push(2);
                        a.done();
                    }
                }
                recv(t3.receiver()) -> msg => {
                    if let Ok(a) = msg {
                        seen.push(3);
                        a.done();
                    }
                }
            }
        }
        seen
    });

    let start = Instant::now();
    c.shutdown();
    assert_quick(start);

    assert_eq!(listener.join().unwrap(), vec![1, 2, 3]);
}

#[test]
fn test_recursive_channel_registration() {
    let c = coordinator();
    let t1 = c.first();
    let (ok1, ok2, ok3) = (flag(), flag(), flag());

    let listener = {
        let c = c.clone();
        let (ok1, ok2, ok3) = (ok1.clone(), ok2.clone(), ok3.clone());
        thread::spawn(move || {
            let a1 = t1.recv().unwrap();
            set(ok1);
            let t2 = c.second();
            a1.done();

            let a2 = t2.recv().unwrap();
            set(ok2);
            let t3 = c.third();
            a2.done();

            let a3 = t3.recv().unwrap();
            set(ok3);
            a3.done();
        })
    };

    let start = Instant::now();
    c.shutdown();
    assert_quick(start);
    listener.join().unwrap();

    assert!(is_set(&ok1) && is_set(&ok2) && is_set(&ok3));
}

#[test]
fn test_callback_stage_order() {
    let c = coordinator();
    let order = Arc::new(Mutex::new(Vec::new()));

    for stage in [Stage::Third, Stage::Second, Stage::First] {
        let _ = c.register_func(
            stage,
            |(order, n): (Arc<Mutex<Vec<u8>>>, u8)| order.lock().unwrap().push(n),
            (order.clone(), stage.number()),
        );
        assert!(!c.started());
    }

    assert!(order.lock().unwrap().is_empty());
    c.shutdown();
    assert_eq!(*order.lock().unwrap(), vec![1, 2, 3]);
}

#[test]
fn test_recursive_callback_registration() {
    let c = coordinator();
    let (ok1, ok2, ok3) = (flag(), flag(), flag());

    let inner = c.clone();
    let _ = c.first_func(
        move |(ok1, ok2, ok3)| {
            set(ok1);
            let innermost = inner.clone();
            let _ = inner.second_func(
                move |(ok2, ok3)| {
                    set(ok2);
                    let _ = innermost.third_func(set, ok3);
                },
                (ok2, ok3),
            );
        },
        (ok1.clone(), ok2.clone(), ok3.clone()),
    );

    assert!(!c.started());
    c.shutdown();
    assert!(is_set(&ok1) && is_set(&ok2) && is_set(&ok3));
}

#[test]
fn test_earlier_stage_registered_late_is_ignored() {
    let c = coordinator();
    let (ok1, ok2, ok3) = (flag(), flag(), flag());
    let inert = Arc::new(AtomicUsize::new(0));

    let inner = c.clone();
    let counter = inert.clone();
    let _ = c.third_func(
        move |(ok1, ok2, ok3)| {
            set(ok3);
            for notifier in [inner.second_func(set, ok2), inner.first_func(set, ok1)] {
                if notifier.is_inert() {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            }
        },
        (ok1.clone(), ok2.clone(), ok3.clone()),
    );

    c.shutdown();
    assert!(!is_set(&ok1));
    assert!(!is_set(&ok2));
    assert!(is_set(&ok3));
    assert_eq!(inert.load(Ordering::SeqCst), 2);
}

#[test]
fn test_same_stage_registered_from_handler_is_ignored() {
    let c = coordinator();
    let late = flag();

    let inner = c.clone();
    let _ = c.second_func(
        move |late| {
            let _ = inner.second_func(set, late);
        },
        late.clone(),
    );

    c.shutdown();
    assert!(!is_set(&late));
}

#[test]
fn test_callback_cancel() {
    let c = coordinator();
    let called = flag();
    let notifier = c.first_func(set, called.clone());
    notifier.cancel();

    c.shutdown();
    assert!(!is_set(&called));
    assert!(notifier.recv().is_err());
}

#[test]
fn test_callback_panic_does_not_stop_sequence() {
    let c = coordinator();
    let called = flag();
    let later = flag();

    let _ = c.first_func(
        |called| {
            set(called);
            panic!("expected in test");
        },
        called.clone(),
    );
    let _ = c.second_func(set, later.clone());

    let start = Instant::now();
    c.shutdown();
    assert_quick(start);
    assert!(is_set(&called));
    assert!(is_set(&later));
}

#[test]
fn test_callback_notifier_delivers_once() {
    let c = coordinator();
    let called = flag();
    let notifier = c.first_func(set, called.clone());

    c.shutdown();

    assert!(notifier.try_recv().is_ok(), "notifier closed before a notification");
    assert!(notifier.try_recv().is_err(), "notifier not closed after notification");
    assert!(is_set(&called));
}

#[test]
fn test_single_cancel_leaves_others() {
    let c = coordinator();
    let (ok1, ok2, ok3, cancelled) = (flag(), flag(), flag(), flag());

    let _ = c.third_func(set, ok3.clone());
    let _ = c.second_func(set, ok2.clone());
    let cancel = c.second_func(set, cancelled.clone());
    let _ = c.first_func(set, ok1.clone());
    assert!(!c.started());
    assert_eq!(c.pending(Stage::Second), 2);

    cancel.cancel();
    assert_eq!(c.pending(Stage::Second), 1);
    c.shutdown();

    assert!(is_set(&ok1) && is_set(&ok2) && is_set(&ok3));
    assert!(!is_set(&cancelled));
}

#[test]
fn test_lock_with_competing_workers() {
    let c = coordinator();
    let notifier = c.first();
    let got = flag();
    let listener = {
        let got = got.clone();
        thread::spawn(move || {
            if let Ok(activation) = notifier.recv() {
                set(got);
                activation.done();
            }
        })
    };

    assert!(c.lock());
    c.unlock();

    let workers: Vec<_> = (0..10)
        .map(|_| {
            let c = c.clone();
            thread::spawn(move || {
                if c.lock() {
                    thread::sleep(Duration::from_millis(200));
                    c.unlock();
                }
            })
        })
        .collect();

    let start = Instant::now();
    c.shutdown();
    assert_quick(start);
    listener.join().unwrap();
    for worker in workers {
        worker.join().unwrap();
    }

    assert!(is_set(&got));
    assert!(c.started());
    assert!(!c.lock());
    assert_eq!(c.holders(), 0);
}

#[test]
fn test_lock_refused_while_stage_runs() {
    let c = coordinator();
    let (tx, rx) = crossbeam_channel::bounded(1);

    let inner = c.clone();
    let _ = c.first_func(
        move |tx: crossbeam_channel::Sender<(bool, bool, usize)>| {
            let before = inner.holders();
            let started = inner.started();
            let admitted = inner.lock();
            let after = inner.holders();
            let _ = tx.send((started, admitted, after - before));
        },
        tx,
    );

    c.shutdown();

    let (started, admitted, added) = rx.try_recv().unwrap();
    assert!(started);
    assert!(!admitted);
    assert_eq!(added, 0);
    assert_eq!(c.holders(), 0);
}

#[test]
fn test_first_stage_registration_during_drain_is_honored() {
    let c = coordinator();
    let fired = flag();

    assert!(c.lock());
    let holder = {
        let c = c.clone();
        let fired = fired.clone();
        thread::spawn(move || {
            while !c.started() {
                thread::sleep(Duration::from_millis(1));
            }
            let notifier = c.first_func(set, fired);
            let inert = notifier.is_inert();
            c.unlock();
            inert
        })
    };

    let start = Instant::now();
    c.shutdown();
    assert_quick(start);

    assert!(!holder.join().unwrap());
    assert!(is_set(&fired));
}

#[test]
fn test_gate_drains_before_first_stage() {
    let c = coordinator();
    let released = flag();
    let seen_released = flag();

    assert!(c.lock());
    let worker = {
        let c = c.clone();
        let released = released.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            set(released);
            c.unlock();
        })
    };

    let _ = c.first_func(
        move |(released, seen)| {
            if is_set(&released) {
                set(seen);
            }
        },
        (released, seen_released.clone()),
    );

    c.shutdown();
    worker.join().unwrap();
    assert!(is_set(&seen_released));
}

#[test]
fn test_each_stage_gets_its_own_timeout() {
    init_tracing();
    let c = Coordinator::with_config(ShutdownConfig::with_timeout(Duration::from_millis(50)));
    // Kept alive and never read: each stage waits out its full timeout.
    let held: Vec<_> = Stage::ALL.iter().map(|&stage| c.register(stage)).collect();

    let start = Instant::now();
    c.shutdown();
    let elapsed = start.elapsed();

    assert!(elapsed >= Duration::from_millis(150));
    assert!(elapsed < Duration::from_secs(2));
    assert!(held.iter().all(|n| n.try_recv().is_ok()));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_stages_never_interleave(first in 0usize..4, second in 0usize..4, third in 0usize..4) {
        let c = Coordinator::with_config(ShutdownConfig::with_timeout(Duration::from_secs(2)));
        let log = Arc::new(Mutex::new(Vec::new()));

        for (stage, count) in [(Stage::Third, third), (Stage::First, first), (Stage::Second, second)] {
            for _ in 0..count {
                let _ = c.register_func(
                    stage,
                    |(log, n): (Arc<Mutex<Vec<u8>>>, u8)| {
                        thread::sleep(Duration::from_millis(1));
                        log.lock().unwrap().push(n);
                    },
                    (log.clone(), stage.number()),
                );
            }
        }

        c.shutdown();

        let log = log.lock().unwrap();
        prop_assert_eq!(log.len(), first + second + third);
        prop_assert!(log.windows(2).all(|w| w[0] <= w[1]));
    }
}
