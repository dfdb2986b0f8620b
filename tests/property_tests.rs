//! Property-based tests using proptest.
//!
//! Properties cover insert/get fidelity for arbitrary JSON, the payload
//! ceiling, last-write-wins ordering, and configuration parsing under
//! arbitrary input.

use proptest::prelude::*;
use serde_json::Value;

use task_cache::{CacheError, CacheLimits, InMemoryTaskCache, Settings, TaskResult};

// ─── Arbitrary Strategies ───────────────────────────────────────────────────

fn arb_json() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        "[a-zA-Z0-9 _-]{0,24}".prop_map(Value::String),
    ];
    leaf.prop_recursive(3, 32, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,8}", inner, 0..6)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

fn arb_task_id() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9:_-]{1,40}"
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

// ─── Cache Properties ───────────────────────────────────────────────────────

proptest! {
    /// Any JSON value inserted is read back unchanged.
    #[test]
    fn prop_insert_get_preserves_json(task_id in arb_task_id(), value in arb_json()) {
        runtime().block_on(async {
            let cache = InMemoryTaskCache::in_memory();
            cache.open().await.unwrap();
            cache.insert(&task_id, serde_json::to_vec(&value).unwrap()).await.unwrap();

            let result = cache.get(&task_id).await.unwrap();
            prop_assert_eq!(result, TaskResult::Completed { data: value });
            Ok(())
        })?;
    }

    /// Identifiers never written are pending, whatever else is stored.
    #[test]
    fn prop_unwritten_ids_are_pending(
        written in prop::collection::hash_set(arb_task_id(), 0..10),
        probe in arb_task_id(),
    ) {
        prop_assume!(!written.contains(&probe));
        runtime().block_on(async {
            let cache = InMemoryTaskCache::in_memory();
            cache.open().await.unwrap();
            for id in &written {
                cache.insert(id, &b"{}"[..]).await.unwrap();
            }
            prop_assert_eq!(cache.get(&probe).await.unwrap(), TaskResult::Pending);
            Ok(())
        })?;
    }

    /// Payloads above the ceiling are rejected; at or below are accepted.
    #[test]
    fn prop_payload_ceiling(limit in 2usize..256, len in 0usize..512) {
        runtime().block_on(async {
            let cache = InMemoryTaskCache::in_memory()
                .with_limits(CacheLimits::default().with_max_payload_bytes(limit));
            cache.open().await.unwrap();

            let payload = vec![b' '; len];
            let result = cache.insert("t", payload).await;
            if len > limit {
                let rejected = matches!(
                    result,
                    Err(CacheError::PayloadTooLarge { size, limit: l, .. }) if size == len && l == limit
                );
                prop_assert!(rejected);
                prop_assert_eq!(cache.get("t").await.unwrap(), TaskResult::Pending);
            } else {
                prop_assert!(result.is_ok());
            }
            Ok(())
        })?;
    }

    /// Sequential writes to one id leave the last value visible.
    #[test]
    fn prop_last_write_wins(values in prop::collection::vec(arb_json(), 1..8)) {
        runtime().block_on(async {
            let cache = InMemoryTaskCache::in_memory();
            cache.open().await.unwrap();
            for value in &values {
                cache.insert("t", serde_json::to_vec(value).unwrap()).await.unwrap();
            }
            let last = values.last().cloned();
            prop_assert_eq!(cache.get("t").await.unwrap().into_data(), last);
            Ok(())
        })?;
    }
}

// ─── Fuzz-style Tests ───────────────────────────────────────────────────────

proptest! {
    /// Arbitrary bytes either decode as JSON or surface as corrupt, never
    /// as pending and never as a panic.
    #[test]
    fn fuzz_arbitrary_payload_bytes(bytes in prop::collection::vec(any::<u8>(), 0..128)) {
        runtime().block_on(async {
            let cache = InMemoryTaskCache::in_memory();
            cache.open().await.unwrap();
            cache.insert("t", bytes.clone()).await.unwrap();

            match cache.get("t").await {
                Ok(TaskResult::Completed { data }) => {
                    let expected: Value = serde_json::from_slice(&bytes).unwrap();
                    prop_assert_eq!(data, expected);
                },
                Err(CacheError::CorruptRecord { .. }) => {
                    prop_assert!(serde_json::from_slice::<Value>(&bytes).is_err());
                },
                other => prop_assert!(false, "unexpected result {:?}", other),
            }
            Ok(())
        })?;
    }

    /// Arbitrary TOML never panics the settings parser.
    #[test]
    fn fuzz_settings_from_toml(input in "\\PC{0,200}") {
        let _ = Settings::from_toml(&input);
    }

    /// Arbitrary environment values never leave settings invalid.
    #[test]
    fn fuzz_env_overrides_keep_settings_valid(
        ttl in "\\PC{0,12}",
        interval in "\\PC{0,12}",
        level in "\\PC{0,12}",
    ) {
        let mut settings = Settings::default();
        settings.apply_overrides(|key| match key {
            "TASK_CACHE_TTL_SECS" => Some(ttl.clone()),
            "TASK_CACHE_RECLAIM_INTERVAL_SECS" => Some(interval.clone()),
            "LOG_LEVEL" => Some(level.clone()),
            _ => None,
        });
        prop_assert!(settings.validate().is_ok());
    }
}
