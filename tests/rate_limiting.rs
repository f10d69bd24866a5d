//! End-to-end rate limiting through the HTTP service.

use reqwest::StatusCode;
use serde_json::{json, Value};

use campus_guard::RateLimitPolicy;

mod common;
use common::{client, closed_port, start_guard, test_config, ADMIN_KEY};

#[tokio::test]
async fn test_read_preset_counts_down_then_rejects() {
    let mut config = test_config(closed_port().await);
    config.rate_limit.presets.read = RateLimitPolicy::new(3, 60_000);
    let (addr, shutdown) = start_guard(config).await;
    let client = client();
    let url = format!("http://{}/api/health", addr);

    for expected_remaining in ["2", "1", "0"] {
        let res = client
            .get(&url)
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()["x-ratelimit-limit"], "3");
        assert_eq!(res.headers()["x-ratelimit-remaining"], expected_remaining);
        assert!(res.headers().contains_key("x-request-id"));
    }

    let res = client
        .get(&url)
        .header("x-forwarded-for", "203.0.113.7")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = res.headers()["retry-after"].to_str().unwrap().parse().unwrap();
    assert!((1..=60).contains(&retry_after));
    assert_eq!(res.headers()["x-ratelimit-remaining"], "0");

    let body: Value = res.json().await.unwrap();
    assert_eq!(body["code"], "RATE_LIMITED");
    assert_eq!(body["retryAfter"], retry_after);

    // Another client is unaffected.
    let res = client
        .get(&url)
        .header("x-real-ip", "198.51.100.20")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    shutdown.trigger();
}

#[tokio::test]
async fn test_disabled_limiter_allows_everything() {
    let mut config = test_config(closed_port().await);
    config.rate_limit.enabled = false;
    config.rate_limit.presets.read = RateLimitPolicy::new(1, 60_000);
    let (addr, shutdown) = start_guard(config).await;
    let client = client();

    for _ in 0..5 {
        let res = client.get(format!("http://{}/api/health", addr)).send().await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert!(!res.headers().contains_key("x-ratelimit-limit"));
    }

    shutdown.trigger();
}

#[tokio::test]
async fn test_check_endpoint_blocks_and_admin_unblocks() {
    let (addr, shutdown) = start_guard(test_config(closed_port().await)).await;
    let client = client();
    let check = format!("http://{}/api/rate-limit/check", addr);
    let body = json!({ "key": "login:student@campus.edu", "preset": "auth" });

    for remaining in (0..5).rev() {
        let res = client.post(&check).json(&body).send().await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()["x-ratelimit-limit"], "5");
        let result: Value = res.json().await.unwrap();
        assert_eq!(result["success"], true);
        assert_eq!(result["remaining"], remaining);
    }

    let res = client.post(&check).json(&body).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    let result: Value = res.json().await.unwrap();
    assert_eq!(result["success"], false);
    assert!(result["retryAfter"].as_u64().unwrap() >= 1);

    // The auth preset blocks for 30 minutes; the admin API shows it.
    let res = client
        .get(format!("http://{}/admin/limiter", addr))
        .bearer_auth(ADMIN_KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let report: Value = res.json().await.unwrap();
    let blocked = report["blocked"].as_array().unwrap();
    assert!(blocked.iter().any(|b| b["key"] == "ext:login:student@campus.edu"));
    assert_eq!(report["presets"]["auth"]["limit"], 5);

    let res = client
        .delete(format!("http://{}/admin/blocks/ext:login:student@campus.edu", addr))
        .bearer_auth(ADMIN_KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = client
        .delete(format!("http://{}/admin/blocks/ext:login:student@campus.edu", addr))
        .bearer_auth(ADMIN_KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    shutdown.trigger();
}

#[tokio::test]
async fn test_check_endpoint_per_user_and_bad_request() {
    let (addr, shutdown) = start_guard(test_config(closed_port().await)).await;
    let client = client();
    let check = format!("http://{}/api/rate-limit/check", addr);

    let res = client
        .post(&check)
        .json(&json!({ "userId": "u-42", "action": "review", "preset": "write" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let result: Value = res.json().await.unwrap();
    assert_eq!(result["limit"], 30);
    assert_eq!(result["remaining"], 29);

    let res = client
        .post(&check)
        .json(&json!({ "preset": "write" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    shutdown.trigger();
}

#[tokio::test]
async fn test_admin_requires_api_key() {
    let (addr, shutdown) = start_guard(test_config(closed_port().await)).await;
    let client = client();
    let status = format!("http://{}/admin/status", addr);

    let res = client.get(&status).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client.get(&status).bearer_auth("wrong").send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client.get(&status).bearer_auth(ADMIN_KEY).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    // Admin routes carry the admin preset's headers.
    assert_eq!(res.headers()["x-ratelimit-limit"], "50");
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "operational");
    assert_eq!(body["backend"], "memory");

    let res = client
        .post(format!("http://{}/admin/sweep", addr))
        .bearer_auth(ADMIN_KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    shutdown.trigger();
}

#[tokio::test]
async fn test_named_key_cannot_block_client_address() {
    let (addr, shutdown) = start_guard(test_config(closed_port().await)).await;
    let client = client();
    let check = format!("http://{}/api/rate-limit/check", addr);
    let body = json!({ "key": "203.0.113.9", "preset": "auth" });

    for _ in 0..5 {
        let res = client
            .post(&check)
            .header("x-forwarded-for", "198.51.100.1")
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }
    let res = client
        .post(&check)
        .header("x-forwarded-for", "198.51.100.1")
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);

    // The address named in the body still reaches the public routes.
    let res = client
        .get(format!("http://{}/api/health", addr))
        .header("x-forwarded-for", "203.0.113.9")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["x-ratelimit-remaining"], "199");

    shutdown.trigger();
}

#[tokio::test]
async fn test_presets_count_separately_for_one_client() {
    let mut config = test_config(closed_port().await);
    config.rate_limit.presets.read = RateLimitPolicy::new(3, 60_000);
    let (addr, shutdown) = start_guard(config).await;
    let client = client();

    for _ in 0..3 {
        let res = client
            .get(format!("http://{}/api/health", addr))
            .header("x-forwarded-for", "10.9.9.9")
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }
    let res = client
        .get(format!("http://{}/api/health", addr))
        .header("x-forwarded-for", "10.9.9.9")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);

    // Exhausting reads leaves the api preset untouched.
    let res = client
        .post(format!("http://{}/api/rate-limit/check", addr))
        .header("x-forwarded-for", "10.9.9.9")
        .json(&json!({ "key": "report:42", "preset": "write" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    shutdown.trigger();
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let mut config = test_config(closed_port().await);
    config.listener.max_body_bytes = 64;
    let (addr, shutdown) = start_guard(config).await;

    let res = client()
        .post(format!("http://{}/api/rate-limit/check", addr))
        .json(&json!({ "key": "x".repeat(200), "preset": "api" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::PAYLOAD_TOO_LARGE);

    shutdown.trigger();
}
