//! Benchmarks for trigger coalescing and batched frame flushes.
//!
//! Run with: cargo bench -p coalesce-runtime --bench coalesce_bench

use std::cell::Cell;
use std::hint::black_box;
use std::rc::Rc;

use coalesce_runtime::{
    BindingHandle, CommitContext, EventLoop, ManualClock, Observable, RenderBinding,
    RenderRuntime, SlotSources, StrategyConfig,
};
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};

fn runtime() -> (EventLoop, RenderRuntime) {
    let host = EventLoop::new(ManualClock::new());
    let runtime = RenderRuntime::from_config(host.clone(), &StrategyConfig::default())
        .expect("builtin strategies");
    (host, runtime)
}

fn counted_binding(
    runtime: &RenderRuntime,
    slots: &[Observable<u64>],
    strategy: &str,
    commits: &Rc<Cell<u64>>,
) -> BindingHandle<u64> {
    let sources = slots
        .iter()
        .enumerate()
        .fold(SlotSources::new(), |acc, (i, obs)| {
            acc.with(format!("s{i}"), obs.clone())
        });
    let commits = Rc::clone(commits);
    RenderBinding::create(
        runtime,
        sources,
        Some(strategy),
        move |ctx: &CommitContext<u64>| {
            black_box(ctx.values().map(|(_, v)| *v).sum::<u64>());
            commits.set(commits.get() + 1);
            Ok(())
        },
    )
    .expect("binding created")
}

/// Many updates to one binding inside a single microtask window.
fn bench_trigger_burst(c: &mut Criterion) {
    let mut group = c.benchmark_group("coalesce/burst");

    for updates in [1u64, 16, 256, 4096] {
        group.throughput(Throughput::Elements(updates));
        let (host, runtime) = runtime();
        let slot = Observable::new(0u64);
        let commits = Rc::new(Cell::new(0));
        let handle = counted_binding(&runtime, &[slot.clone()], "local", &commits);
        host.run_microtasks();
        group.bench_with_input(BenchmarkId::new("local", updates), &updates, |b, &n| {
            b.iter(|| {
                for _ in 0..n {
                    slot.update(|v| *v += 1);
                }
                black_box(host.run_microtasks())
            });
        });
        drop(handle);
    }

    group.finish();
}

/// Synchronous commits, one per update, as the non-coalescing baseline.
fn bench_trigger_synchronous(c: &mut Criterion) {
    let mut group = c.benchmark_group("coalesce/synchronous");

    for updates in [1u64, 16, 256] {
        group.throughput(Throughput::Elements(updates));
        let (_host, runtime) = runtime();
        let slot = Observable::new(0u64);
        let commits = Rc::new(Cell::new(0));
        let handle = counted_binding(&runtime, &[slot.clone()], "native", &commits);
        group.bench_with_input(BenchmarkId::new("native", updates), &updates, |b, &n| {
            b.iter(|| {
                for _ in 0..n {
                    slot.update(|v| *v += 1);
                }
                black_box(commits.get())
            });
        });
        drop(handle);
    }

    group.finish();
}

/// One frame flushing N bindings that share the global strategy.
fn bench_global_flush(c: &mut Criterion) {
    let mut group = c.benchmark_group("coalesce/global_flush");

    for bindings in [8usize, 64, 512] {
        group.throughput(Throughput::Elements(bindings as u64));
        let (host, runtime) = runtime();
        let commits = Rc::new(Cell::new(0));
        let slots: Vec<Observable<u64>> = (0..bindings).map(|_| Observable::new(0)).collect();
        let handles: Vec<_> = slots
            .iter()
            .map(|slot| counted_binding(&runtime, std::slice::from_ref(slot), "global", &commits))
            .collect();
        host.run_frame();
        group.bench_with_input(
            BenchmarkId::new("frame", bindings),
            &bindings,
            |b, _| {
                b.iter(|| {
                    for slot in slots.iter().rev() {
                        slot.update(|v| *v += 1);
                    }
                    black_box(host.run_frame())
                });
            },
        );
        drop(handles);
    }

    group.finish();
}

/// Binding creation plus teardown with a handful of slots.
fn bench_binding_lifecycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("coalesce/lifecycle");

    for slot_count in [1usize, 8, 32] {
        let (host, runtime) = runtime();
        let slots: Vec<Observable<u64>> = (0..slot_count).map(|_| Observable::new(1)).collect();
        let commits = Rc::new(Cell::new(0));
        group.bench_with_input(
            BenchmarkId::new("create_destroy", slot_count),
            &slot_count,
            |b, _| {
                b.iter(|| {
                    let handle = counted_binding(&runtime, &slots, "local", &commits);
                    handle.destroy();
                    black_box(host.run_microtasks())
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_trigger_burst,
    bench_trigger_synchronous,
    bench_global_flush,
    bench_binding_lifecycle,
);

criterion_main!(benches);
