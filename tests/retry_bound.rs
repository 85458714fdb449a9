// tests/retry_bound.rs
use ainews_pipeline::transform::client::{ServiceError, TextGenClient};
use ainews_pipeline::transform::retry::{ErrorClass, RetryPolicy};
use ainews_pipeline::ScriptedClient;
use std::time::Duration;

fn policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 5,
        base_delay: Duration::from_secs(3),
        max_delay: Duration::from_secs(30),
        rate_limit_floor: Duration::from_secs(10),
        jitter: Duration::from_millis(500),
    }
}

#[tokio::test(start_paused = true)]
async fn always_failing_call_makes_exactly_five_attempts() {
    let client = ScriptedClient::new(Vec::new()).with_fallback(|| Err(ServiceError::Timeout));
    let p = policy();
    let start = tokio::time::Instant::now();

    let res = p.run("test", |_| client.complete("sys", "user")).await;

    let err = res.unwrap_err();
    assert_eq!(err.attempts, 5);
    assert!(matches!(err.last, ServiceError::Timeout));
    assert_eq!(client.calls(), 5);

    let elapsed = start.elapsed();
    let floor: Duration = (1..5).map(|a| p.delay_for(a, ErrorClass::Transient)).sum();
    assert!(elapsed >= floor, "elapsed {elapsed:?} < {floor:?}");
    // timer wheel has millisecond granularity
    let bound = p.max_total_delay() + Duration::from_millis(10);
    assert!(elapsed <= bound, "elapsed {elapsed:?} > {bound:?}");
}

#[tokio::test(start_paused = true)]
async fn rate_limits_wait_at_least_the_floor() {
    let client = ScriptedClient::new(vec![Err(ServiceError::RateLimited), Ok("done".into())]);
    let start = tokio::time::Instant::now();
    let out = policy()
        .run("test", |_| client.complete("sys", "user"))
        .await
        .unwrap();
    assert_eq!(out, "done");
    assert!(start.elapsed() >= Duration::from_secs(10));
}

#[tokio::test(start_paused = true)]
async fn malformed_request_is_not_retried() {
    let client = ScriptedClient::new(vec![Err(ServiceError::Rejected {
        status: 422,
        body: "bad schema".into(),
    })]);
    let err = policy()
        .run("test", |_| client.complete("sys", "user"))
        .await
        .unwrap_err();
    assert_eq!(err.attempts, 1);
    assert_eq!(client.calls(), 1);
}
