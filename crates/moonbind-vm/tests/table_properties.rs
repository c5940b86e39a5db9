//! Property-based tests for table storage
//!
//! - Integral float keys address the same field as the integer key
//! - The border length of a filled sequence is its element count
//! - `next` visits every live field exactly once, even while clearing

use std::collections::HashSet;

use moonbind_vm::{Table, Value};
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn integral_floats_normalize(k in -1_000_000i64..1_000_000, v in any::<i64>()) {
        let mut t = Table::new();
        t.set(Value::Number(k as f64), Value::Integer(v)).unwrap();
        prop_assert_eq!(t.get_int(k).to_integer(), Some(v));

        let (key, _) = t.next(&Value::Nil).unwrap().unwrap();
        prop_assert!(matches!(key, Value::Integer(i) if i == k));
    }

    #[test]
    fn border_of_filled_sequence(n in 0i64..64) {
        let mut t = Table::new();
        for i in 1..=n {
            t.set_int(i, Value::Integer(i * 10));
        }
        prop_assert_eq!(t.len(), n);

        if n > 0 {
            t.set_int(n, Value::Nil);
            prop_assert_eq!(t.len(), n - 1);
        }
    }

    #[test]
    fn next_visits_each_field_once(
        keys in proptest::collection::hash_set("[a-z]{1,6}", 0..40),
        clear in any::<bool>(),
    ) {
        let mut t = Table::new();
        for k in &keys {
            t.set_str(k, Value::Boolean(true));
        }

        let mut seen = HashSet::new();
        let mut key = Value::Nil;
        while let Some((k, _)) = t.next(&key).unwrap() {
            let name = k.as_string().unwrap().to_string_lossy();
            prop_assert!(seen.insert(name));
            if clear {
                t.set(k.clone(), Value::Nil).unwrap();
            }
            key = k;
        }
        prop_assert_eq!(seen.len(), keys.len());
        prop_assert_eq!(t.is_empty(), clear || keys.is_empty());
    }
}
