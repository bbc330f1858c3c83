//! End-to-end tests for pool-backed generators.

mod common;

use common::{RecordingConnector, Unreachable, init_tracing, provisioned};
use slotflake::{Error, UniqueId, decode};
use slotflake_pool::{
    Coordinator, CreateMode, MemoryEnsemble, PoolConfig, SynchronizedGenerators, ensure_path,
};
use std::{
    collections::HashSet,
    sync::{Arc, Barrier},
    thread,
    time::Duration,
};

const ENDPOINT: &str = "memory:2181";
const POOL: &str = "/ids/east";

type Registry = SynchronizedGenerators<RecordingConnector>;

fn registry(ensemble: MemoryEnsemble) -> (Registry, RecordingConnector) {
    registry_with(ensemble, PoolConfig::default())
}

fn registry_with(ensemble: MemoryEnsemble, config: PoolConfig) -> (Registry, RecordingConnector) {
    let connector = RecordingConnector::new(ensemble);
    let generators = SynchronizedGenerators::new(connector.clone(), config).unwrap();
    (generators, connector)
}

fn bound_slots(ensemble: &MemoryEnsemble) -> Vec<String> {
    ensemble.session().children("/ids/east/pool").unwrap()
}

#[test]
fn generates_eight_byte_ids_stamped_with_the_pool_cluster() {
    init_tracing();
    let ensemble = provisioned(POOL, 4);
    let (generators, _) = registry(ensemble.clone());

    let generator = generators.generator(ENDPOINT, POOL).unwrap();
    let id = generator.generate().unwrap();

    let bytes = id.to_bytes();
    assert_eq!(bytes.len(), 8);
    let blueprint = decode(&bytes).unwrap();
    assert_eq!(blueprint.cluster_id, 4);
    assert_eq!(Some(blueprint.generator_id), generator.generator_id());
    assert_eq!(bound_slots(&ensemble), [blueprint.generator_id.to_string()]);
}

#[test]
fn one_instance_per_endpoint_and_pool() {
    init_tracing();
    let ensemble = provisioned(POOL, 1);
    provision_second(&ensemble);
    let (generators, connector) = registry(ensemble);

    let a = generators.generator(ENDPOINT, POOL).unwrap();
    let b = generators.generator(ENDPOINT, POOL).unwrap();
    let other = generators.generator(ENDPOINT, "/ids/west").unwrap();

    assert!(Arc::ptr_eq(&a, &b));
    assert!(!Arc::ptr_eq(&a, &other));
    assert_eq!(other.cluster_id(), 2);
    assert_eq!(generators.len(), 2);
    // Both pools share the endpoint's session.
    assert_eq!(connector.sessions().len(), 1);
}

fn provision_second(ensemble: &MemoryEnsemble) {
    slotflake_pool::provision(&ensemble.session(), "/ids/west", 2).unwrap();
}

#[test]
fn concurrent_first_use_creates_exactly_one_generator() {
    init_tracing();
    const THREADS: usize = 16;
    let ensemble = provisioned(POOL, 3);
    let (generators, connector) = registry(ensemble.clone());
    let barrier = Barrier::new(THREADS);

    let instances: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                s.spawn(|| {
                    barrier.wait();
                    generators.generator(ENDPOINT, POOL).unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert!(instances.iter().all(|g| Arc::ptr_eq(g, &instances[0])));
    assert_eq!(connector.sessions().len(), 1);
    assert_eq!(bound_slots(&ensemble).len(), 1);
}

#[test]
fn concurrent_batches_never_repeat() {
    init_tracing();
    const THREADS: usize = 20;
    const BATCH: usize = 500;
    let (generators, _) = registry(provisioned(POOL, 0));
    let generator = generators.generator(ENDPOINT, POOL).unwrap();

    let ids: Vec<UniqueId> = thread::scope(|s| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| s.spawn(|| generator.batch(BATCH).unwrap()))
            .collect();
        handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect()
    });

    let unique: HashSet<_> = ids.iter().collect();
    assert_eq!(ids.len(), THREADS * BATCH);
    assert_eq!(unique.len(), THREADS * BATCH);
}

#[test]
fn independent_registries_on_one_pool_never_collide() {
    init_tracing();
    const PROCESSES: usize = 4;
    const IDS: usize = 5_000;
    let ensemble = provisioned(POOL, 5);
    // Everyone keeps their slot until all are done, so no slot changes hands.
    let done = Barrier::new(PROCESSES);

    let ids: Vec<UniqueId> = thread::scope(|s| {
        let handles: Vec<_> = (0..PROCESSES)
            .map(|_| {
                let ensemble = ensemble.clone();
                let done = &done;
                s.spawn(move || {
                    let (generators, _) = registry(ensemble);
                    let generator = generators.generator(ENDPOINT, POOL).unwrap();
                    let ids = (0..IDS)
                        .map(|_| generator.generate().unwrap())
                        .collect::<Vec<_>>();
                    done.wait();
                    ids
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect()
    });

    let unique: HashSet<_> = ids.iter().collect();
    assert_eq!(unique.len(), PROCESSES * IDS);
    let generator_ids: HashSet<u8> = ids.iter().map(UniqueId::generator_id).collect();
    assert_eq!(generator_ids.len(), PROCESSES);
}

#[test]
fn slots_handed_over_between_registries_never_repeat_ids() {
    init_tracing();
    const PROCESSES: usize = 6;
    const IDS: usize = 3_000;
    let ensemble = provisioned(POOL, 5);
    let config = PoolConfig::default().with_pool_size(2);

    // More registries than slots: each one drops its generator while others
    // are still queued for a slot.
    let ids: Vec<UniqueId> = thread::scope(|s| {
        let handles: Vec<_> = (0..PROCESSES)
            .map(|_| {
                let ensemble = ensemble.clone();
                let config = config.clone();
                s.spawn(move || {
                    let (generators, _) = registry_with(ensemble, config);
                    let generator = generators.generator(ENDPOINT, POOL).unwrap();
                    (0..IDS)
                        .map(|_| generator.generate().unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect()
    });

    let unique: HashSet<_> = ids.iter().collect();
    assert_eq!(unique.len(), PROCESSES * IDS);
    assert!(ids.iter().all(|id| id.generator_id() < 2));
    assert!(bound_slots(&ensemble).is_empty());
}

#[test]
fn relinquish_claims_a_fresh_slot_on_next_use() {
    init_tracing();
    let ensemble = provisioned(POOL, 0);
    let (generators, _) = registry(ensemble.clone());
    let generator = generators.generator(ENDPOINT, POOL).unwrap();
    let before = generator.generator_id().unwrap();
    let ticket_before = binding_owner(&ensemble, before);

    generator.relinquish();
    assert_eq!(generator.generator_id(), None);
    assert!(bound_slots(&ensemble).is_empty());

    generator.generate().unwrap();
    let after = generator.generator_id().unwrap();
    assert_ne!(binding_owner(&ensemble, after), ticket_before);
}

fn binding_owner(ensemble: &MemoryEnsemble, slot: u8) -> Vec<u8> {
    ensemble
        .session()
        .get_data(&format!("{POOL}/pool/{slot}"))
        .unwrap()
}

#[test]
fn removed_generator_frees_its_key_and_slot() {
    init_tracing();
    let ensemble = provisioned(POOL, 0);
    let (generators, _) = registry(ensemble.clone());
    let first = generators.generator(ENDPOINT, POOL).unwrap();

    let removed = generators.remove(ENDPOINT, POOL).unwrap();
    assert!(Arc::ptr_eq(&first, &removed));
    assert!(generators.is_empty());
    assert!(bound_slots(&ensemble).is_empty());
    drop((first, removed));

    let second = generators.generator(ENDPOINT, POOL).unwrap();
    second.generate().unwrap();
    assert_eq!(bound_slots(&ensemble).len(), 1);
}

#[test]
fn claim_timeout_rolls_over_to_a_new_claim() {
    init_tracing();
    let ensemble = provisioned(POOL, 0);
    let config = PoolConfig::default().with_claim_timeout(Duration::from_millis(100));
    let (generators, _) = registry_with(ensemble.clone(), config);
    let generator = generators.generator(ENDPOINT, POOL).unwrap();

    let first = generator.generate().unwrap();
    thread::sleep(Duration::from_millis(200));
    let second = generator.generate().unwrap();

    assert!(second > first);
    assert_eq!(bound_slots(&ensemble).len(), 1);
}

#[test]
fn expired_session_is_survived_by_reclaiming() {
    init_tracing();
    let ensemble = provisioned(POOL, 0);
    let (generators, connector) = registry(ensemble.clone());
    let generator = generators.generator(ENDPOINT, POOL).unwrap();
    let first = generator.generate().unwrap();

    connector.only_session().expire();
    assert_eq!(generator.generator_id(), None);

    let second = generator.generate().unwrap();
    assert!(second > first);
    assert_eq!(bound_slots(&ensemble), [second.generator_id().to_string()]);
}

#[test]
fn outage_surfaces_generator_error_then_recovers() {
    init_tracing();
    let ensemble = provisioned(POOL, 0);
    let (generators, connector) = registry(ensemble.clone());
    let generator = generators.generator(ENDPOINT, POOL).unwrap();
    generator.generate().unwrap();

    let session = connector.only_session();
    session.disconnect();
    match generator.generate() {
        Err(Error::Generator(inner)) => {
            assert!(matches!(*inner, Error::ClaimUnavailable { .. }));
        }
        other => panic!("expected a generator error, got {other:?}"),
    }

    session.reconnect();
    generator.generate().unwrap();
    assert_eq!(bound_slots(&ensemble).len(), 1);
}

#[test]
fn out_of_range_cluster_id_is_configuration_error() {
    init_tracing();
    let ensemble = MemoryEnsemble::new();
    let session = ensemble.session();
    ensure_path(&session, POOL).unwrap();
    session
        .create("/ids/east/cluster-id", b"16", CreateMode::Persistent)
        .unwrap();
    let (generators, _) = registry(ensemble);

    let result = generators.generator(ENDPOINT, POOL);
    assert!(matches!(result, Err(Error::Configuration(_))));
    assert!(generators.is_empty());
}

#[test]
fn unprovisioned_pool_is_configuration_error() {
    init_tracing();
    let (generators, _) = registry(MemoryEnsemble::new());
    let result = generators.generator(ENDPOINT, "/nowhere");
    assert!(matches!(result, Err(Error::Configuration(_))));
}

#[test]
fn unreachable_endpoint_is_unavailable_and_retryable() {
    init_tracing();
    let generators = SynchronizedGenerators::new(Unreachable, PoolConfig::default()).unwrap();
    let result = generators.generator(ENDPOINT, POOL);
    assert!(matches!(result, Err(Error::ClaimUnavailable { .. })));
    assert!(generators.is_empty());
}

#[test]
fn full_pool_surfaces_unavailable_after_the_wait_ceiling() {
    init_tracing();
    let ensemble = provisioned(POOL, 0);
    let config = PoolConfig::default()
        .with_pool_size(1)
        .with_acquire_timeout(Duration::from_millis(100));
    let (holder, _) = registry_with(ensemble.clone(), config.clone());
    let _held = holder.generator(ENDPOINT, POOL).unwrap();

    let (waiter, _) = registry_with(ensemble, config);
    let result = waiter.generator(ENDPOINT, POOL);
    assert!(matches!(result, Err(Error::ClaimUnavailable { .. })));
}

#[test]
fn invalid_config_is_rejected() {
    let result = SynchronizedGenerators::new(
        RecordingConnector::default(),
        PoolConfig::default().with_pool_size(0),
    );
    assert!(matches!(result, Err(Error::Configuration(_))));
}
