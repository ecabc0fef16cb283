//! Error propagation: user errors, failing fetch effects, and incomplete
//! source responses.

mod common;

use common::{FailingSource, posts, users};
use fetch_plan::{CacheStore, DataSource, FetchError, InMemoryCache, Plan, many, one, run, run_env};
use std::sync::Arc;

#[tokio::test]
async fn test_user_errors_surface_unchanged() {
    let plan: Plan<u32> = Plan::fail(anyhow::anyhow!("nothing to see here"));
    let error = run(plan, InMemoryCache::empty()).await.unwrap_err();

    match error {
        FetchError::User(inner) => assert_eq!(inner.to_string(), "nothing to see here"),
        other => panic!("expected a user error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_failing_fetch_effect_becomes_a_source_error() {
    let flaky = Arc::new(FailingSource);
    let error = run(one(&flaky, 1), InMemoryCache::empty()).await.unwrap_err();

    assert_eq!(error.source_name(), Some("Flaky"));
    match error {
        FetchError::Source { error, .. } => {
            assert!(error.to_string().contains("connection reset"));
        }
        other => panic!("expected a source error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_missing_identity_fails_the_run() {
    let users = users();
    let error = run(one(&users, 99), InMemoryCache::empty()).await.unwrap_err();

    assert!(error.is_missing_identity());
    assert_eq!(error.source_name(), Some("Users"));
    match &error {
        FetchError::MissingIdentity {
            identities, env, ..
        } => {
            assert_eq!(identities, &vec![users.identity(&99)]);
            // The attempted round is on the log; the cache is untouched.
            assert_eq!(env.rounds().len(), 1);
            assert!(env.cache().get(&users.identity(&99)).is_none());
        }
        other => panic!("expected a missing-identity error, got {other:?}"),
    }
    assert_eq!(users.call_count(), 1);
}

#[tokio::test]
async fn test_partial_batch_response_reports_every_missing_id() {
    let users = users();
    let error = run(many(&users, vec![1, 98, 99]), InMemoryCache::empty())
        .await
        .unwrap_err();

    match error {
        FetchError::MissingIdentity { identities, .. } => {
            assert_eq!(identities, vec![users.identity(&98), users.identity(&99)]);
        }
        other => panic!("expected a missing-identity error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_missing_identity_inside_a_concurrent_round() {
    let users = users();
    let posts = posts();
    let plan = one(&users, 99).join(one(&posts, 10));
    let error = run(plan, InMemoryCache::empty()).await.unwrap_err();

    match error {
        FetchError::MissingIdentity {
            source_name, env, ..
        } => {
            assert_eq!(source_name, "Users");
            assert_eq!(env.rounds().len(), 1);
            // The sibling batch's result was still integrated for diagnosis.
            assert!(env.cache().get(&posts.identity(&10)).is_some());
        }
        other => panic!("expected a missing-identity error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_error_in_one_join_side_aborts_the_run() {
    let users = users();
    let plan = one(&users, 1).join(Plan::<String>::fail(anyhow::anyhow!("boom")));
    let error = run(plan, InMemoryCache::empty()).await.unwrap_err();

    assert!(matches!(error, FetchError::User(_)));
}

#[tokio::test]
async fn test_failed_run_still_exposes_the_round_log() {
    let users = users();
    let inner = Arc::clone(&users);
    let plan = one(&users, 1).flat_map(move |_| one(&inner, 99));
    let error = run(plan, InMemoryCache::empty()).await.unwrap_err();

    let env = error.env().expect("missing-identity carries the environment");
    // The successful first round and the attempted second one.
    assert_eq!(env.rounds().len(), 2);
    assert!(env.cache().get(&users.identity(&1)).is_some());
}

#[tokio::test]
async fn test_flat_map_after_failure_never_runs() {
    let users = users();
    let inner = Arc::clone(&users);
    let plan = Plan::<String>::fail(anyhow::anyhow!("boom")).flat_map(move |_| one(&inner, 1));
    let error = run(plan, InMemoryCache::empty()).await.unwrap_err();

    assert!(matches!(error, FetchError::User(_)));
    assert_eq!(users.call_count(), 0);
}

#[tokio::test]
async fn test_source_error_propagates_out_of_a_concurrent_round() {
    let users = users();
    let flaky = Arc::new(FailingSource);
    let plan = one(&users, 1).join(one(&flaky, 5));
    let error = run(plan, InMemoryCache::empty()).await.unwrap_err();

    assert_eq!(error.source_name(), Some("Flaky"));
}

#[tokio::test]
async fn test_environment_is_usable_after_a_failed_run() {
    let users = users();
    let env = run_env(one(&users, 1), InMemoryCache::empty()).await.unwrap();

    // A later failing run does not poison the earlier cache snapshot.
    let _ = run(one(&users, 99), Arc::clone(env.cache())).await.unwrap_err();
    let value = run(one(&users, 1), Arc::clone(env.cache())).await.unwrap();
    assert_eq!(value, "a");
    assert_eq!(users.call_count(), 2);
}
