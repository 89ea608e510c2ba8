/// Property-based tests for runtime state and stats arithmetic
///
/// These tests generate random inputs and check invariants that must hold
/// regardless of ordering or values:
/// - A service is never running without a container reference
/// - The store always reflects the last recorded runtime state
/// - CPU percentages are never negative and only exist for a positive system delta
/// - Image references normalize idempotently
use mission_control::model::{RuntimeState, ServiceSpec};
use mission_control::runtime::{normalize_image_ref, split_image_ref, CpuStats, CpuUsage, StatsSample};
use mission_control::state::SqliteServiceStore;
use mission_control::streaming::cpu_percent;
use proptest::prelude::*;

/// State transitions a service record can go through
#[derive(Debug, Clone)]
enum Transition {
    Run(String),
    Stop,
}

fn container_id_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[0-9a-f]{12}").expect("Valid regex")
}

fn transition_strategy() -> impl Strategy<Value = Transition> {
    prop_oneof![
        container_id_strategy().prop_map(Transition::Run),
        Just(Transition::Stop),
    ]
}

fn image_strategy() -> impl Strategy<Value = String> {
    (
        prop::option::of(prop::string::string_regex("[a-z]{2,6}(:[0-9]{4})?/").expect("Valid regex")),
        prop::string::string_regex("[a-z][a-z0-9-]{1,10}").expect("Valid regex"),
        prop::option::of(prop::string::string_regex(":[a-z0-9.]{1,6}").expect("Valid regex")),
    )
        .prop_map(|(registry, name, tag)| {
            format!(
                "{}{}{}",
                registry.unwrap_or_default(),
                name,
                tag.unwrap_or_default()
            )
        })
}

fn sample(total: u64, previous_total: u64, system: u64, previous_system: u64, cpus: u32) -> StatsSample {
    StatsSample {
        cpu_stats: CpuStats {
            cpu_usage: CpuUsage {
                total_usage: Some(total),
            },
            system_cpu_usage: Some(system),
            online_cpus: Some(cpus),
        },
        precpu_stats: CpuStats {
            cpu_usage: CpuUsage {
                total_usage: Some(previous_total),
            },
            system_cpu_usage: Some(previous_system),
            online_cpus: Some(cpus),
        },
        ..Default::default()
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: columns never decode to running without a reference
    #[test]
    fn prop_running_implies_reference(
        is_running in any::<bool>(),
        reference in prop::option::of("[0-9a-f]{0,12}"),
    ) {
        let state = RuntimeState::from_columns(is_running, reference.clone());
        if state.is_running() {
            let id = state.container_reference();
            prop_assert!(id.is_some_and(|id| !id.is_empty()));
            prop_assert_eq!(id, reference.as_deref());
        } else {
            prop_assert_eq!(state.container_reference(), None);
        }
    }

    /// Property: the stored state is always the last one recorded
    #[test]
    fn prop_store_tracks_last_transition(
        transitions in prop::collection::vec(transition_strategy(), 1..12)
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let store = SqliteServiceStore::new_ephemeral().await.unwrap();
            store.initialize().await.unwrap();
            let mut service = store.insert(ServiceSpec::new("web", "nginx")).await.unwrap();

            let mut expected = RuntimeState::Stopped;
            for transition in &transitions {
                expected = match transition {
                    Transition::Run(id) => RuntimeState::running(id.clone()),
                    Transition::Stop => RuntimeState::Stopped,
                };
                store
                    .record_runtime_state(&mut service, expected.clone())
                    .await
                    .unwrap();
            }

            let stored = store.get(service.id()).await.unwrap().unwrap();
            assert_eq!(*stored.runtime_state(), expected);
            assert_eq!(stored.is_running(), stored.container_reference().is_some());
        });
    }

    /// Property: CPU usage is non-negative and bounded by the online CPUs
    #[test]
    fn prop_cpu_percent_bounds(
        previous_total in 0u64..1_000_000,
        cpu_delta in 0u64..1_000_000,
        previous_system in 0u64..1_000_000,
        system_delta in 0u64..1_000_000,
        cpus in 1u32..64,
    ) {
        let s = sample(
            previous_total + cpu_delta,
            previous_total,
            previous_system + system_delta,
            previous_system,
            cpus,
        );
        match cpu_percent(&s) {
            None => prop_assert_eq!(system_delta, 0),
            Some(percent) => {
                prop_assert!(system_delta > 0);
                prop_assert!(percent >= 0.0);
                if cpu_delta <= system_delta {
                    prop_assert!(percent <= f64::from(cpus) * 100.0 + 0.01);
                }
            }
        }
    }

    /// Property: a system counter that went backwards yields no reading
    #[test]
    fn prop_cpu_percent_rejects_counter_reset(
        system in 0u64..1_000_000,
        backwards in 1u64..1_000,
        cpus in 1u32..8,
    ) {
        let s = sample(10, 5, system, system + backwards, cpus);
        prop_assert_eq!(cpu_percent(&s), None);
    }

    /// Property: normalizing an image reference twice changes nothing
    #[test]
    fn prop_normalize_is_idempotent(image in image_strategy()) {
        let once = normalize_image_ref(&image);
        prop_assert_eq!(normalize_image_ref(&once), once.clone());

        let (name, tag) = split_image_ref(&image);
        prop_assert_eq!(format!("{}:{}", name, tag), once);
    }
}
