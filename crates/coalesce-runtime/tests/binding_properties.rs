//! End-to-end scheduling guarantees of render bindings.
//!
//! Run with: cargo test -p coalesce-runtime --test binding_properties

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use coalesce_runtime::{
    Behavior, BindingHandle, BindingOptions, CommitContext, CommitError, ErrorPolicy,
    ErrorReport, ErrorSink, EventLoop, ManualClock, Observable, Phase, Promise, RegistryError,
    RenderBinding, RenderRuntime, RenderStrategy, ScheduleHandle, SlotSources, SlotStatus,
    SourceError, StrategyConfig, StrategyRegistry, Subject, Value, Work,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

struct Harness {
    clock: ManualClock,
    host: EventLoop,
    runtime: RenderRuntime,
    reports: Rc<RefCell<Vec<ErrorReport>>>,
}

fn harness(config: StrategyConfig) -> Harness {
    init_tracing();
    let clock = ManualClock::new();
    let host = EventLoop::new(clock.clone());
    let reports = Rc::new(RefCell::new(Vec::new()));
    let r = Rc::clone(&reports);
    let registry = StrategyRegistry::with_builtins(&host, &config).expect("builtin registry");
    let runtime = RenderRuntime::builder(host.clone(), registry)
        .error_sink(ErrorSink::with_handler(host.clone(), move |report| {
            r.borrow_mut().push(report.clone());
        }))
        .error_policy(config.error_policy)
        .build();
    Harness {
        clock,
        host,
        runtime,
        reports,
    }
}

type Commits = Rc<RefCell<Vec<Vec<(String, i32)>>>>;

fn bind(
    runtime: &RenderRuntime,
    sources: SlotSources<i32>,
    strategy: Option<&str>,
) -> (BindingHandle<i32>, Commits) {
    let commits: Commits = Rc::new(RefCell::new(Vec::new()));
    let log = Rc::clone(&commits);
    let handle = RenderBinding::create(runtime, sources, strategy, move |ctx| {
        log.borrow_mut()
            .push(ctx.values().map(|(k, v)| (k.to_owned(), *v)).collect());
        Ok(())
    })
    .expect("binding created");
    (handle, commits)
}

fn pairs(items: &[(&str, i32)]) -> Vec<(String, i32)> {
    items.iter().map(|(k, v)| ((*k).to_owned(), *v)).collect()
}

#[test]
fn updates_within_one_window_collapse_into_one_commit() {
    let h = harness(StrategyConfig::default());
    let a = Subject::<i32>::new();
    let b = Subject::<i32>::new();
    let (_handle, commits) = bind(
        &h.runtime,
        SlotSources::new().with("a", a.clone()).with("b", b.clone()),
        Some("local"),
    );

    a.next(1);
    a.next(2);
    b.next(3);
    h.host.run_microtasks();

    assert_eq!(*commits.borrow(), vec![pairs(&[("a", 2), ("b", 3)])]);
}

#[test]
fn synchronous_strategy_commits_every_trigger_in_order() {
    let h = harness(StrategyConfig::default());
    let a = Subject::<i32>::new();
    let (_handle, commits) = bind(&h.runtime, SlotSources::new().with("a", a.clone()), Some("native"));

    for v in 1..=5 {
        a.next(v);
    }

    let seen: Vec<i32> = commits.borrow().iter().map(|c| c[0].1).collect();
    assert_eq!(seen, vec![1, 2, 3, 4, 5]);
}

#[test]
fn replaced_source_late_emission_never_commits() {
    let h = harness(StrategyConfig::default());
    let old = Subject::<i32>::new();
    let (handle, commits) = bind(&h.runtime, SlotSources::new().with("a", old.clone()), Some("native"));
    old.next(1);

    let new = Subject::<i32>::new();
    handle.set_source("a", new.clone());
    old.next(99);
    new.next(2);

    // The swap itself commits the empty slot; 99 never shows up.
    assert_eq!(
        *commits.borrow(),
        vec![pairs(&[("a", 1)]), Vec::new(), pairs(&[("a", 2)])]
    );
    assert_eq!(old.observer_count(), 0);
}

#[test]
fn destroy_before_deferred_commit_prevents_callback() {
    for strategy in ["local", "global", "idle"] {
        let h = harness(StrategyConfig::default());
        let a = Subject::<i32>::new();
        let (handle, commits) = bind(&h.runtime, SlotSources::new().with("a", a.clone()), Some(strategy));
        a.next(1);
        assert!(handle.is_pending(), "{strategy}: commit is deferred");
        handle.destroy();

        h.clock.advance(Duration::from_secs(5));
        h.host.tick();
        h.host.run_idle();
        assert!(commits.borrow().is_empty(), "{strategy}: callback ran after destroy");
        assert!(!h.host.has_pending(), "{strategy}: host work left behind");
    }
}

#[test]
fn global_flush_commits_in_binding_creation_order() {
    let h = harness(StrategyConfig::default());
    let order = Rc::new(RefCell::new(Vec::new()));
    let subjects: Vec<Subject<i32>> = (0..3).map(|_| Subject::new()).collect();
    let handles: Vec<_> = subjects
        .iter()
        .enumerate()
        .map(|(i, subject)| {
            let order = Rc::clone(&order);
            RenderBinding::create(
                &h.runtime,
                SlotSources::new().with("v", subject.clone()),
                Some("global"),
                move |_ctx: &CommitContext<i32>| {
                    order.borrow_mut().push(i + 1);
                    Ok(())
                },
            )
            .expect("binding created")
        })
        .collect();

    subjects[2].next(1);
    subjects[0].next(1);
    subjects[1].next(1);
    h.host.run_microtasks();
    assert!(order.borrow().is_empty());
    h.host.run_frame();

    assert_eq!(*order.borrow(), vec![1, 2, 3]);
    assert!(handles.windows(2).all(|w| w[0].id() < w[1].id()));
}

#[test]
fn idle_strategy_forces_flush_at_configured_deadline() {
    let config = StrategyConfig::default().with_idle_deadline(Duration::from_millis(100));
    let h = harness(config);
    let a = Subject::<i32>::new();
    let (_handle, commits) = bind(&h.runtime, SlotSources::new().with("a", a.clone()), Some("idle"));
    a.next(7);

    h.clock.advance(Duration::from_millis(99));
    h.host.tick();
    assert!(commits.borrow().is_empty());

    h.clock.advance(Duration::from_millis(1));
    h.host.tick();
    assert_eq!(*commits.borrow(), vec![pairs(&[("a", 7)])]);
}

#[test]
fn idle_window_flushes_before_deadline() {
    let h = harness(StrategyConfig::default());
    let a = Subject::<i32>::new();
    let (_handle, commits) = bind(&h.runtime, SlotSources::new().with("a", a.clone()), Some("idle"));
    a.next(1);
    a.next(2);
    h.host.run_idle();
    assert_eq!(*commits.borrow(), vec![pairs(&[("a", 2)])]);

    h.clock.advance(Duration::from_secs(2));
    h.host.tick();
    assert_eq!(commits.borrow().len(), 1, "deadline was disarmed");
}

#[test]
fn errors_stay_with_the_binding_that_raised_them() {
    let h = harness(StrategyConfig::default());
    let failing = Subject::<i32>::new();
    let healthy = Subject::<i32>::new();

    let broken = RenderBinding::create(
        &h.runtime,
        SlotSources::new().with("a", failing.clone()),
        Some("native"),
        |_ctx: &CommitContext<i32>| Err(CommitError::msg("render target gone")),
    )
    .expect("binding created");
    let (ok, commits) = bind(&h.runtime, SlotSources::new().with("b", healthy.clone()), Some("native"));

    failing.next(1);
    failing.error(SourceError::msg("socket reset"));
    healthy.next(10);
    healthy.next(11);

    let seen: Vec<i32> = commits.borrow().iter().map(|c| c[0].1).collect();
    assert_eq!(seen, vec![10, 11]);

    let reports = h.reports.borrow();
    assert!(!reports.is_empty());
    assert!(reports.iter().all(|r| r.context.binding == broken.id()));
    assert!(reports.iter().all(|r| r.context.binding != ok.id()));
    assert!(
        reports
            .iter()
            .any(|r| r.context.phase == Phase::Emission && r.context.slot.as_deref() == Some("a"))
    );
    assert!(reports.iter().any(|r| r.context.phase == Phase::Commit));
}

struct FrameCase {
    h: Harness,
    failing: Subject<i32>,
    healthy: Subject<i32>,
    broken: BindingHandle<i32>,
    ok: BindingHandle<i32>,
    commits: Commits,
}

fn frame_case(policy: ErrorPolicy) -> FrameCase {
    let h = harness(StrategyConfig::default());
    let failing = Subject::<i32>::new();
    let healthy = Subject::<i32>::new();
    let broken = RenderBinding::create_with(
        &h.runtime,
        SlotSources::new().with("a", failing.clone()),
        BindingOptions::default()
            .strategy("global")
            .error_policy(policy),
        |_ctx: &CommitContext<i32>| Err(CommitError::msg("render target gone")),
    )
    .expect("binding created");
    let (ok, commits) = bind(
        &h.runtime,
        SlotSources::new().with("b", healthy.clone()),
        Some("global"),
    );
    FrameCase {
        h,
        failing,
        healthy,
        broken,
        ok,
        commits,
    }
}

#[test]
fn failing_binding_does_not_hold_back_its_frame() {
    let c = frame_case(ErrorPolicy::KeepLastValue);
    c.failing.next(1);
    c.failing.error(SourceError::msg("socket reset"));
    c.healthy.next(10);
    assert!(c.broken.is_pending() && c.ok.is_pending());

    c.h.host.run_frame();
    assert_eq!(*c.commits.borrow(), vec![pairs(&[("b", 10)])]);
    assert_eq!(c.broken.commit_count(), 1);

    let reports = c.h.reports.borrow();
    let phases: Vec<Phase> = reports.iter().map(|r| r.context.phase).collect();
    assert_eq!(phases, vec![Phase::Emission, Phase::Commit]);
    assert!(reports.iter().all(|r| r.context.binding == c.broken.id()));
    drop(reports);

    c.healthy.next(11);
    c.h.host.run_frame();
    assert_eq!(c.commits.borrow().last().cloned(), Some(pairs(&[("b", 11)])));
}

#[test]
fn suppressed_binding_does_not_hold_back_its_frame() {
    let c = frame_case(ErrorPolicy::SuppressUntilReplaced);
    c.failing.next(1);
    c.healthy.next(10);
    c.failing.error(SourceError::msg("socket reset"));

    c.h.host.run_frame();
    assert_eq!(*c.commits.borrow(), vec![pairs(&[("b", 10)])]);
    assert_eq!(c.broken.commit_count(), 0, "suppressed until replaced");
    assert_eq!(c.h.reports.borrow().len(), 1);
    assert_eq!(c.h.reports.borrow()[0].context.phase, Phase::Emission);

    c.broken.set_source("a", Value(2));
    c.healthy.next(12);
    c.h.host.run_frame();
    assert_eq!(c.broken.commit_count(), 1);
    assert_eq!(c.commits.borrow().last().cloned(), Some(pairs(&[("b", 12)])));
}

#[test]
fn commit_context_exposes_suspense_and_completion() {
    let h = harness(StrategyConfig::default());
    let seen = Rc::new(RefCell::new(Vec::new()));
    let log = Rc::clone(&seen);
    let (promise, resolver) = Promise::<i32>::new();
    let ticker = Observable::new(0);
    let handle = RenderBinding::create(
        &h.runtime,
        SlotSources::new()
            .with("user", promise)
            .with("ticker", ticker.clone()),
        Some("native"),
        move |ctx: &CommitContext<i32>| {
            log.borrow_mut()
                .push((ctx.is_suspended(), ctx.status("user"), ctx.get("user").copied()));
            Ok(())
        },
    )
    .expect("binding created");

    assert_eq!(
        seen.borrow().last().cloned(),
        Some((true, Some(SlotStatus::Pending), None))
    );
    resolver.resolve(42);
    assert_eq!(
        seen.borrow().last().cloned(),
        Some((false, Some(SlotStatus::Live), Some(42)))
    );
    assert_eq!(seen.borrow().len(), 2, "completion after the value is silent");
    assert_eq!(handle.slot_status("user"), Some(SlotStatus::Completed));
}

#[test]
fn unhandled_errors_surface_on_the_host() {
    init_tracing();
    let host = EventLoop::new(ManualClock::new());
    let runtime =
        RenderRuntime::from_config(host.clone(), &StrategyConfig::default()).expect("runtime");
    let subject = Subject::<i32>::new();
    let _handle = RenderBinding::create(
        &runtime,
        SlotSources::new().with("a", subject.clone()),
        None,
        |_| Ok(()),
    )
    .expect("binding created");

    subject.error(SourceError::msg("upstream closed"));
    host.run_microtasks();
    let uncaught = host.take_uncaught();
    assert_eq!(uncaught.len(), 1);
    assert_eq!(uncaught[0].context.phase, Phase::Emission);
}

/// Holds work until the embedder drains it, e.g. at the end of a batch.
#[derive(Default)]
struct ManualBatch {
    next: std::cell::Cell<u64>,
    queue: RefCell<Vec<(u64, Work)>>,
}

impl ManualBatch {
    fn drain(&self) -> usize {
        let work = std::mem::take(&mut *self.queue.borrow_mut());
        let n = work.len();
        for (_, w) in work {
            w.run();
        }
        n
    }
}

impl RenderStrategy for ManualBatch {
    fn behavior(&self) -> Behavior {
        Behavior::DEFERRED
    }

    fn schedule(&self, work: Work) -> ScheduleHandle {
        let token = self.next.get() + 1;
        self.next.set(token);
        self.queue.borrow_mut().push((token, work));
        ScheduleHandle::Token(token)
    }

    fn cancel(&self, handle: ScheduleHandle) {
        if let ScheduleHandle::Token(token) = handle {
            self.queue.borrow_mut().retain(|(t, _)| *t != token);
        }
    }
}

#[test]
fn custom_strategy_sits_next_to_builtins() {
    init_tracing();
    let host = EventLoop::new(ManualClock::new());
    let batch = Rc::new(ManualBatch::default());
    let mut builder = StrategyRegistry::builtins(&host, &StrategyConfig::default());
    builder
        .register_shared("batch", batch.clone())
        .expect("fresh name");
    assert_eq!(
        builder.register("local", ManualBatch::default()).err(),
        Some(RegistryError::DuplicateStrategy("local".into()))
    );
    let registry = builder.build().expect("registry");
    assert!(registry.contains("batch"));
    let runtime = RenderRuntime::builder(host.clone(), registry).build();

    let a = Subject::<i32>::new();
    let (handle, commits) = bind(&runtime, SlotSources::new().with("a", a.clone()), Some("batch"));
    a.next(1);
    a.next(2);
    host.tick();
    assert!(commits.borrow().is_empty());
    assert_eq!(batch.drain(), 1);
    assert_eq!(*commits.borrow(), vec![pairs(&[("a", 2)])]);

    a.next(3);
    handle.destroy();
    assert_eq!(batch.drain(), 0, "destroy cancelled the queued work");
}
