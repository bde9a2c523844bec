//! Integration tests for the daemon's HTTP endpoints

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use std::sync::Arc;
use tower::ServiceExt;
use upsguard::api::{create_router, AppState};
use upsguard_lib::{health::components, GuardError, GuardMetrics, HealthRegistry, UpsStats};

async fn setup_test_app() -> (Router, Arc<AppState>) {
    let health_registry = HealthRegistry::with_default_components().await;
    let state = Arc::new(AppState::new(health_registry, GuardMetrics::new()));
    (create_router(state.clone()), state)
}

async fn get(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

#[tokio::test]
async fn test_healthz_lists_daemon_components() {
    let (app, _state) = setup_test_app().await;

    let (status, body) = get(app, "/healthz").await;
    assert_eq!(status, StatusCode::OK);

    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "healthy");
    for name in components::ALL {
        assert!(health["components"][name].is_object(), "missing {name}");
    }
}

#[tokio::test]
async fn test_telemetry_outage_is_degraded_but_ok() {
    let (app, state) = setup_test_app().await;
    state
        .health_registry
        .record_error(&GuardError::unreachable("10.0.0.5", "request timed out"))
        .await;

    let (status, body) = get(app, "/healthz").await;
    assert_eq!(status, StatusCode::OK);

    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "degraded");
    assert_eq!(health["components"]["telemetry"]["status"], "degraded");
}

#[tokio::test]
async fn test_persistence_failure_is_503() {
    let (app, state) = setup_test_app().await;
    state
        .health_registry
        .record_error(&GuardError::PersistenceWriteFailed {
            path: "/var/lib/upsguard/upsguard.state".into(),
            message: "no space left on device".into(),
        })
        .await;

    let (status, body) = get(app, "/healthz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "unhealthy");
    assert_eq!(health["components"]["state_store"]["status"], "unhealthy");
}

#[tokio::test]
async fn test_readyz_before_first_pass() {
    let (app, _state) = setup_test_app().await;

    let (status, body) = get(app, "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let readiness: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(readiness["ready"], false);
}

#[tokio::test]
async fn test_readyz_after_first_pass() {
    let (app, state) = setup_test_app().await;
    state.health_registry.set_ready(true).await;

    let (status, body) = get(app, "/readyz").await;
    assert_eq!(status, StatusCode::OK);

    let readiness: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(readiness["ready"], true);
}

#[tokio::test]
async fn test_metrics_expose_deployment_series() {
    let (app, state) = setup_test_app().await;
    state.metrics.observe_stats(
        "api-test",
        &UpsStats {
            input_voltage: 0,
            is_discharging: true,
            minutes_left: 9.0,
            pct_left: 31.0,
        },
    );
    state.metrics.inc_shutdown_attempts("api-test");
    state.metrics.observe_pass(0.4, 1_700_000_000);

    let (status, body) = get(app, "/metrics").await;
    assert_eq!(status, StatusCode::OK);

    let text = String::from_utf8(body).unwrap();
    assert!(text.contains(r#"upsguard_battery_pct{deployment="api-test"} 31"#));
    assert!(text.contains(r#"upsguard_on_battery{deployment="api-test"} 1"#));
    assert!(text.contains(r#"upsguard_shutdown_attempts_total{deployment="api-test"} 1"#));
    assert!(text.contains("upsguard_pass_duration_seconds_bucket"));
    assert!(text.contains("upsguard_last_pass_timestamp_seconds 1700000000"));
}
