//! Lazy service wiring through the registry facade.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use lokstra::prelude::*;
use serde_json::Value;

struct Counter {
    n: usize,
}

#[test]
fn cycle_diagnostic_names_every_vertex() {
    let registry = Registry::new();
    for (name, dep) in [("a", "b"), ("b", "c"), ("c", "a")] {
        registry.register_lazy_service_with_deps(
            name,
            ServiceFactory::no_arg(|| Ok(ServiceHandle::new(()))),
            HashMap::from([("next".to_string(), dep.to_string())]),
            Value::Null,
            ProvideMode::PanicIfExists,
        );
    }

    let err = registry.get_service::<()>("a").unwrap_err();
    match &err {
        Error::ServiceCycle { chain } => assert_eq!(chain, &["a", "b", "c", "a"]),
        other => panic!("expected ServiceCycle, got {other}"),
    }
    assert!(err.to_string().contains("a -> b -> c -> a"), "got: {err}");
}

#[test]
fn concurrent_callers_share_one_build() {
    let registry = Arc::new(Registry::new());
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_in_factory = calls.clone();
    registry.register_lazy_service(
        "shared",
        ServiceFactory::no_arg(move || {
            calls_in_factory.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(20));
            Ok(ServiceHandle::new(Counter { n: 1 }))
        }),
        Value::Null,
    );

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let registry = registry.clone();
            std::thread::spawn(move || registry.get_service::<Counter>("shared").expect("get"))
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().expect("thread").n, 1);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn factory_may_pull_deps_at_runtime() {
    // no declared deps: the factory resolves its own through the registry
    let registry = Arc::new(Registry::new());
    registry.register_lazy_service(
        "base",
        ServiceFactory::no_arg(|| Ok(ServiceHandle::new(Counter { n: 40 }))),
        Value::Null,
    );
    let registry_in_factory = registry.clone();
    registry.register_lazy_service(
        "derived",
        ServiceFactory::no_arg(move || {
            let base = registry_in_factory.must_get_service::<Counter>("base");
            Ok(ServiceHandle::new(Counter { n: base.n + 2 }))
        }),
        Value::Null,
    );

    assert_eq!(registry.must_get_service::<Counter>("derived").n, 42);
}

#[test]
fn try_get_reports_miss_and_mismatch_quietly() {
    let registry = Registry::new();
    registry.register_service("svc", ServiceHandle::new(Counter { n: 1 }));

    assert!(registry.try_get_service::<Counter>("svc").is_some());
    assert!(registry.try_get_service::<String>("svc").is_none());
    assert!(registry.try_get_service::<Counter>("ghost").is_none());
}

#[test]
#[should_panic(expected = "must_get")]
fn must_get_panics_on_miss() {
    let registry = Registry::new();
    let _ = registry.must_get_service::<Counter>("ghost");
}

#[test]
fn cached_wrapper_is_shareable_across_calls() {
    let registry = Registry::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_in_factory = calls.clone();
    registry.register_lazy_service(
        "counted",
        ServiceFactory::no_arg(move || {
            calls_in_factory.fetch_add(1, Ordering::SeqCst);
            Ok(ServiceHandle::new(Counter { n: 5 }))
        }),
        Value::Null,
    );

    let cached: Cached<Counter> = Cached::new("counted");
    for _ in 0..4 {
        assert_eq!(cached.get(registry.services()).expect("get").n, 5);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

struct FailingPool {
    drained: Arc<AtomicUsize>,
}

impl Shutdown for FailingPool {
    fn shutdown(&self) -> Result<()> {
        self.drained.fetch_add(1, Ordering::SeqCst);
        Err(Error::Message("socket already closed".to_string()))
    }
}

#[test]
fn shutdown_aggregates_hook_errors() {
    let registry = Registry::new();
    let drained = Arc::new(AtomicUsize::new(0));
    registry.register_service(
        "flaky",
        ServiceHandle::with_shutdown(FailingPool {
            drained: drained.clone(),
        }),
    );
    registry.register_service("plain", ServiceHandle::new(Counter { n: 0 }));

    let errors = registry.shutdown_services();
    assert_eq!(drained.load(Ordering::SeqCst), 1);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("socket already closed"));
}
