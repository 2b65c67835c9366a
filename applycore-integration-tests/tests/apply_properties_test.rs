//! Property tests over whole applies.

use std::time::Duration;

use applycore::config::Parallelism;
use applycore::testing::prelude::*;
use applycore_integration_tests::scenarios;
use proptest::prelude::*;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap()
}

fn oracle_for(addrs: &[ResourceInstanceAddr]) -> StaticOracle {
    addrs.iter().fold(
        StaticOracle::new().with_provider_config(fixtures::provider_instance(), Value::Null),
        |oracle, addr| oracle.with_desired(fixtures::desired(addr, &addr.name)),
    )
}

fn named(count: usize) -> Vec<ResourceInstanceAddr> {
    (0..count).map(|i| fixtures::managed_addr(&format!("r{i}"))).collect()
}

fn run(addrs: &[ResourceInstanceAddr], provider: &Arc<MockProvider>, config: ApplyConfig) -> ApplyOutcome {
    let plan = scenarios::plan(State::new(), &scenarios::create_all(addrs).unwrap()).unwrap();
    let plugins = Arc::new(fixtures::plugins(Arc::clone(provider)));
    let oracle = Arc::new(oracle_for(addrs));
    runtime().block_on(apply(&plan, plugins, oracle, config, CancelSignal::never()))
}

#[test]
fn either_instance_may_finish_first() {
    let addrs = named(2);
    let slow = |name: &str| Arc::new(MockProvider::new().with_apply_delay_for(name, Duration::from_millis(30)));

    let first_slow = slow("r0");
    let second_slow = slow("r1");
    let a = run(&addrs, &first_slow, ApplyConfig::default());
    let b = run(&addrs, &second_slow, ApplyConfig::default());

    assert_eq!(first_slow.applied(), ["r1", "r0"]);
    assert_eq!(second_slow.applied(), ["r0", "r1"]);
    assert!(a.diagnostics.is_empty() && b.diagnostics.is_empty());
    assert_eq!(a.state.resources, b.state.resources);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn every_independent_instance_is_created(addrs in arb_distinct_managed_addrs(1, 8)) {
        let provider = Arc::new(MockProvider::new());
        let outcome = run(&addrs, &provider, ApplyConfig::default());

        prop_assert!(outcome.diagnostics.is_empty(), "{}", outcome.diagnostics);
        prop_assert_eq!(outcome.state.serial, 1);
        for addr in &addrs {
            let src = outcome.state.object(addr, DeposedKey::NOT_DEPOSED);
            prop_assert!(src.is_some_and(|src| src.status == ObjectStatus::Ready), "{} missing", addr);
        }
        let applies = provider.calls().iter().filter(|c| *c == "apply test_thing").count();
        prop_assert_eq!(applies, addrs.len());
    }

    #[test]
    fn provider_calls_never_exceed_the_parallelism(
        addrs in arb_distinct_managed_addrs(2, 8),
        limit in 1_usize..4,
    ) {
        let provider = Arc::new(MockProvider::new().with_apply_delay(Duration::from_millis(5)));
        let config = ApplyConfig::default().with_parallelism(Parallelism::try_new(limit).unwrap());
        let outcome = run(&addrs, &provider, config);

        prop_assert!(outcome.diagnostics.is_empty(), "{}", outcome.diagnostics);
        prop_assert!(provider.max_in_flight() <= limit);
    }

    #[test]
    fn completion_order_does_not_change_the_new_state(
        delays in prop::collection::vec(0_u64..20, 2..6),
    ) {
        let addrs = named(delays.len());
        let reference = run(&addrs, &Arc::new(MockProvider::new()), ApplyConfig::default());
        prop_assert!(reference.diagnostics.is_empty(), "{}", reference.diagnostics);

        let provider = addrs.iter().zip(&delays).fold(MockProvider::new(), |provider, (addr, ms)| {
            provider.with_apply_delay_for(&addr.name, Duration::from_millis(*ms))
        });
        let provider = Arc::new(provider);
        let outcome = run(&addrs, &provider, ApplyConfig::default());

        prop_assert!(outcome.diagnostics.is_empty(), "{}", outcome.diagnostics);
        prop_assert_eq!(provider.applied().len(), addrs.len());
        prop_assert_eq!(&outcome.state.resources, &reference.state.resources);
    }
}
