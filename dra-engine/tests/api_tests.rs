//! HTTP API tests: authentication, analysis, reports, dashboard and health

mod helpers;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use dra_engine::archive::SourceError;
use helpers::{
    authed, body_json, harness, test_config, yearly_snapshots, FakeSource, ADMIN_PASSWORD,
    ADMIN_USER,
};
use serde_json::json;
use tower::ServiceExt;

fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_health_is_public() {
    let h = harness(test_config(), FakeSource::new(Vec::new()), None).await;
    let app = h.app(None).await;

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "dra-engine");
    assert_eq!(body["in_flight"], 0);
}

#[tokio::test]
async fn test_protected_routes_require_token() {
    let h = harness(test_config(), FakeSource::new(Vec::new()), None).await;
    let app = h.app(None).await;

    let missing = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/v1/analyze_domain",
            json!({"domain": "example.com"}),
        ))
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(missing).await["error"]["code"], "UNAUTHORIZED");

    let forged = app
        .clone()
        .oneshot(authed("GET", "/api/v1/reports", "Bearer admin.99999999999999.abc", None))
        .await
        .unwrap();
    assert_eq!(forged.status(), StatusCode::UNAUTHORIZED);

    let dashboard = app
        .oneshot(Request::builder().uri("/api/v1/dashboard").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(dashboard.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(h.source.calls(), 0);
}

#[tokio::test]
async fn test_login_then_analyze() {
    let h = harness(test_config(), FakeSource::new(yearly_snapshots(2010, 2023)), None).await;
    let app = h.app(None).await;

    let wrong = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/v1/login",
            json!({"username": ADMIN_USER, "password": "nope"}),
        ))
        .await
        .unwrap();
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

    let unknown = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/v1/login",
            json!({"username": "mallory", "password": ADMIN_PASSWORD}),
        ))
        .await
        .unwrap();
    assert_eq!(unknown.status(), StatusCode::UNAUTHORIZED);

    let login = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/v1/login",
            json!({"username": ADMIN_USER, "password": ADMIN_PASSWORD}),
        ))
        .await
        .unwrap();
    assert_eq!(login.status(), StatusCode::OK);
    let login = body_json(login).await;
    assert_eq!(login["token_type"], "bearer");
    let bearer = format!("Bearer {}", login["access_token"].as_str().unwrap());

    let response = app
        .oneshot(authed(
            "POST",
            "/api/v1/analyze_domain",
            &bearer,
            Some(json!({"domain": "https://www.Example.com/"})),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let report = body_json(response).await;
    assert_eq!(report["domain"], "example.com");
    assert_eq!(report["total_snapshots"], 14);
    assert_eq!(report["years_covered"], 14);
    assert_eq!(report["category"], "Recommended");
    assert_eq!(report["recommended"], true);
    assert_eq!(report["narrative_status"], "disabled");
}

#[tokio::test]
async fn test_invalid_domain_is_bad_request() {
    let h = harness(test_config(), FakeSource::new(Vec::new()), None).await;
    let app = h.app(None).await;

    let response = app
        .oneshot(authed(
            "POST",
            "/api/v1/analyze_domain",
            &h.bearer(),
            Some(json!({"domain": "definitely not a domain"})),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "INVALID_DOMAIN");
    assert_eq!(body["error"]["retryable"], false);
}

#[tokio::test]
async fn test_source_outage_is_service_unavailable() {
    let mut config = test_config();
    config.retry.retry_attempts = 2;
    let h = harness(
        config,
        FakeSource::new(Vec::new()).failing_with(vec![
            SourceError::Transient("502".into()),
            SourceError::Transient("502".into()),
        ]),
        None,
    )
    .await;
    let app = h.app(None).await;

    let response = app
        .oneshot(authed(
            "POST",
            "/api/v1/analyze_domain",
            &h.bearer(),
            Some(json!({"domain": "example.com"})),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "SOURCE_UNAVAILABLE");
    assert_eq!(body["error"]["retryable"], true);
}

/// Analyze `empty.org` (never archived) then `history.com`
async fn seed_two_reports(app: &axum::Router, bearer: &str) {
    for domain in ["empty.org", "history.com"] {
        let response = app
            .clone()
            .oneshot(authed(
                "POST",
                "/api/v1/analyze_domain",
                bearer,
                Some(json!({ "domain": domain })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}

fn unarchived_then_history() -> FakeSource {
    FakeSource::new(yearly_snapshots(2008, 2024))
        .failing_with(vec![SourceError::NotFound("empty.org".into())])
}

#[tokio::test]
async fn test_reports_filter_and_search() {
    let h = harness(test_config(), unarchived_then_history(), None).await;
    let app = h.app(None).await;
    let bearer = h.bearer();
    seed_two_reports(&app, &bearer).await;

    let domains = |body: serde_json::Value| -> Vec<String> {
        body["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["domain"].as_str().unwrap().to_string())
            .collect()
    };

    let all = app
        .clone()
        .oneshot(authed("GET", "/api/v1/reports", &bearer, None))
        .await
        .unwrap();
    assert_eq!(all.status(), StatusCode::OK);
    assert_eq!(domains(body_json(all).await), ["empty.org", "history.com"]);

    let recommended = app
        .clone()
        .oneshot(authed("GET", "/api/v1/reports?filter=recommended", &bearer, None))
        .await
        .unwrap();
    assert_eq!(domains(body_json(recommended).await), ["history.com"]);

    let low = app
        .clone()
        .oneshot(authed("GET", "/api/v1/reports?filter=low_quality", &bearer, None))
        .await
        .unwrap();
    assert_eq!(domains(body_json(low).await), ["empty.org"]);

    let search = app
        .clone()
        .oneshot(authed("GET", "/api/v1/reports?search=HIST", &bearer, None))
        .await
        .unwrap();
    assert_eq!(domains(body_json(search).await), ["history.com"]);

    let bogus = app
        .oneshot(authed("GET", "/api/v1/reports?filter=best", &bearer, None))
        .await
        .unwrap();
    assert_eq!(bogus.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_get_report_and_invalidate_cache() {
    let h = harness(test_config(), unarchived_then_history(), None).await;
    let app = h.app(None).await;
    let bearer = h.bearer();

    let missing = app
        .clone()
        .oneshot(authed("GET", "/api/v1/report/history.com", &bearer, None))
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    seed_two_reports(&app, &bearer).await;

    let found = app
        .clone()
        .oneshot(authed("GET", "/api/v1/report/WWW.History.com", &bearer, None))
        .await
        .unwrap();
    assert_eq!(found.status(), StatusCode::OK);
    let report = body_json(found).await;
    assert_eq!(report["domain"], "history.com");
    assert_eq!(report["total_snapshots"], 17);

    let invalidated = app
        .clone()
        .oneshot(authed("DELETE", "/api/v1/report/history.com/cache", &bearer, None))
        .await
        .unwrap();
    assert_eq!(invalidated.status(), StatusCode::OK);
    let body = body_json(invalidated).await;
    assert_eq!(body["domain"], "history.com");
    assert_eq!(body["invalidated"], true);

    // Stored report survives invalidation
    let still_there = app
        .oneshot(authed("GET", "/api/v1/report/history.com", &bearer, None))
        .await
        .unwrap();
    assert_eq!(still_there.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_dashboard_rollup() {
    let h = harness(test_config(), unarchived_then_history(), None).await;
    let app = h.app(None).await;
    let bearer = h.bearer();
    seed_two_reports(&app, &bearer).await;

    let response = app
        .oneshot(authed("GET", "/api/v1/dashboard", &bearer, None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let stats = body_json(response).await;
    assert_eq!(stats["total_domains"], 2);
    assert_eq!(stats["domains_with_snapshots"], 1);
    assert_eq!(stats["recommended_domains"], 1);
    assert_eq!(stats["quality_distribution"]["recommended"], 1);
    assert_eq!(stats["quality_distribution"]["low_quality"], 1);
    assert_eq!(stats["tier_histogram"]["Recommended"], 1);
    assert_eq!(stats["tier_histogram"]["LowQuality"], 1);
}

#[tokio::test]
async fn test_batch_analyze() {
    let h = harness(
        test_config(),
        FakeSource::new(yearly_snapshots(2016, 2021)).rejecting("blocked.net"),
        None,
    )
    .await;
    let app = h.app(None).await;
    let bearer = h.bearer();

    let empty = app
        .clone()
        .oneshot(authed(
            "POST",
            "/api/v1/batch_analyze",
            &bearer,
            Some(json!({"domains": []})),
        ))
        .await
        .unwrap();
    assert_eq!(empty.status(), StatusCode::BAD_REQUEST);

    let too_many: Vec<String> = (0..51).map(|i| format!("d{}.com", i)).collect();
    let oversized = app
        .clone()
        .oneshot(authed(
            "POST",
            "/api/v1/batch_analyze",
            &bearer,
            Some(json!({ "domains": too_many })),
        ))
        .await
        .unwrap();
    assert_eq!(oversized.status(), StatusCode::BAD_REQUEST);
    assert_eq!(h.source.calls(), 0);

    let response = app
        .oneshot(authed(
            "POST",
            "/api/v1/batch_analyze",
            &bearer,
            Some(json!({"domains": ["fine.com", "blocked.net"]})),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    let items = body["data"].as_array().unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["status"], "completed");
    assert_eq!(items[0]["domain"], "fine.com");
    assert_eq!(items[1]["status"], "error");
    assert_eq!(items[1]["domain"], "blocked.net");
    assert_eq!(items[1]["error"]["code"], "INVALID_DOMAIN");
}

#[tokio::test]
async fn test_malformed_json_uses_error_envelope() {
    let h = harness(test_config(), FakeSource::new(Vec::new()), None).await;
    let app = h.app(None).await;

    let login = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/login")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{\"username\": \"admin\""))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(login.status(), StatusCode::BAD_REQUEST);
    let body = body_json(login).await;
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
    assert_eq!(body["error"]["retryable"], false);

    let wrong_shape = app
        .oneshot(authed(
            "POST",
            "/api/v1/analyze_domain",
            &h.bearer(),
            Some(json!({"domains": "example.com"})),
        ))
        .await
        .unwrap();
    assert_eq!(wrong_shape.status(), StatusCode::BAD_REQUEST);
    let body = body_json(wrong_shape).await;
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
    assert!(body["error"]["message"].as_str().unwrap().contains("domain"));
    assert_eq!(h.source.calls(), 0);
}
