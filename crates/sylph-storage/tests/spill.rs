use proptest::prelude::*;
use sylph_storage::{CacheConfig, Column, SpillCache};

fn arb_column() -> impl Strategy<Value = Column> {
    prop_oneof![
        prop::collection::vec(any::<i64>(), 0..64).prop_map(Column::Int64),
        prop::collection::vec(any::<bool>(), 0..64).prop_map(Column::Bool),
        prop::collection::vec("[a-z/\\\\ ]{0,12}", 0..16).prop_map(Column::Text),
    ]
}

proptest! {
    #[test]
    fn resident_bytes_stay_under_the_cap(
        max_bytes in 16usize..512,
        columns in prop::collection::vec(arb_column(), 1..24),
    ) {
        let cache = SpillCache::new(CacheConfig { max_bytes, spill_dir: None });
        let mut handles = Vec::new();
        for column in columns {
            handles.push(cache.insert(column).expect("insert"));
            let metrics = cache.metrics();
            prop_assert!(metrics.resident_bytes <= max_bytes || metrics.resident_entries < 2);
        }
    }

    #[test]
    fn spilled_values_come_back_unchanged(columns in prop::collection::vec(arb_column(), 2..12)) {
        let cache = SpillCache::new(CacheConfig { max_bytes: 1, spill_dir: None });
        let handles: Vec<_> = columns
            .iter()
            .cloned()
            .map(|column| cache.insert(column).expect("insert"))
            .collect();
        for (handle, column) in handles.iter().zip(&columns) {
            prop_assert_eq!(&*handle.get().expect("get"), column);
        }
    }
}
