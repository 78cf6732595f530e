//! Hot-path benchmarks for the authorization surface
//!
//! `confirmation_mode` and capability matching are called on every agent
//! action; the decision read path must stay sub-millisecond.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::Arc;

use arbor_common::config::{ArborConfig, ConfirmationConfig};
use arbor_common::signal::SignalBus;
use arbor_common::{CapabilitySource, Constraints, TrustTier};
use arbor_security::{
    CapabilityPolicy, CapabilitySigner, CapabilityStore, ConfirmationMatrix, ConfirmationTracker,
};
use arbor_trust::{EventStore, ProfileStore};

fn build_policy() -> (Arc<CapabilityPolicy>, Arc<CapabilityStore>) {
    let config = ArborConfig::default();
    let bus = Arc::new(SignalBus::default());
    let events = Arc::new(EventStore::in_memory(1000));
    let profiles = Arc::new(ProfileStore::new(&config, events, bus.clone(), None));
    let store = Arc::new(CapabilityStore::new(
        CapabilitySigner::generate("arbor-policy"),
        bus.clone(),
        config.capabilities.max_delegation_depth,
        config.capabilities.max_capabilities_per_agent,
    ));
    let tracker = Arc::new(ConfirmationTracker::new(
        ConfirmationConfig::default(),
        bus.clone(),
    ));
    let policy = Arc::new(CapabilityPolicy::new(
        config.capabilities.clone(),
        ConfirmationMatrix::default(),
        store.clone(),
        profiles.clone(),
        tracker,
        bus,
    ));

    let runtime = tokio::runtime::Runtime::new().unwrap();
    runtime.block_on(async {
        profiles.create("agent-bench").await.unwrap();
        profiles
            .update_raw("agent-bench", |profile| profile.tier = TrustTier::Trusted)
            .await
            .unwrap();
    });

    for i in 0..64 {
        store
            .grant(
                "agent-bench",
                &format!("arbor://code/read/agent-bench/module-{}/*", i),
                Constraints::none(),
                CapabilitySource::TrustTier,
                None,
            )
            .unwrap();
    }

    (policy, store)
}

fn bench_confirmation_mode(c: &mut Criterion) {
    let (policy, _store) = build_policy();
    c.bench_function("confirmation_mode bundled", |b| {
        b.iter(|| {
            black_box(policy.confirmation_mode(
                black_box("agent-bench"),
                black_box("arbor://code/write/agent-bench/impl/x.rs"),
            ))
        })
    });
    c.bench_function("confirmation_mode shell", |b| {
        b.iter(|| {
            black_box(policy.confirmation_mode(
                black_box("agent-bench"),
                black_box("arbor://shell/exec/agent-bench/build.sh"),
            ))
        })
    });
}

fn bench_capability_match(c: &mut Criterion) {
    let (_policy, store) = build_policy();
    c.bench_function("find_matching over 64 grants", |b| {
        b.iter(|| {
            black_box(store.find_matching(
                black_box("agent-bench"),
                black_box("arbor://code/read/agent-bench/module-42/lib.rs"),
                black_box(1_000_000),
            ))
        })
    });
}

fn bench_allowed(c: &mut Criterion) {
    let (policy, _store) = build_policy();
    c.bench_function("allowed via templates", |b| {
        b.iter(|| {
            black_box(policy.allowed(
                black_box("agent-bench"),
                black_box("arbor://code/read/agent-bench/lib.rs"),
            ))
        })
    });
}

criterion_group!(
    benches,
    bench_confirmation_mode,
    bench_capability_match,
    bench_allowed
);
criterion_main!(benches);
