// tests/property/lane_affinity_test.rs

//! Property-based tests for worker lane assignment

use proptest::prelude::*;
use riftline::core::dispatcher::Dispatcher;

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_lane_is_id_mod_pool_size(
        size in 1usize..32,
        ids in prop::collection::vec(any::<u64>(), 1..50),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let dispatcher = Dispatcher::new();
            dispatcher.start_work_pool(size, 4).unwrap();
            for id in ids {
                let lane = dispatcher.lane_for(id).unwrap();
                assert_eq!(lane, (id % size as u64) as usize);
                assert!(lane < size);
            }
        });
    }
}
