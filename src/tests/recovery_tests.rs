use axum::{
    body::Body,
    http::{header, StatusCode},
    routing::get,
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use super::{get_request, TestApp};
use crate::config::AppConfig;
use crate::routes;

fn panicking_app(t: &TestApp) -> Router {
    async fn boom() -> &'static str {
        panic!("handler exploded with secret detail")
    }
    async fn formatted() -> &'static str {
        let id = 7;
        panic!("formatted panic {id}")
    }
    async fn payload() -> &'static str {
        #[derive(Debug)]
        struct LedgerCorrupted {
            #[allow(dead_code)]
            account: u64,
        }
        std::panic::panic_any(LedgerCorrupted { account: 42 })
    }
    async fn missing() -> &'static str {
        let lookup: Option<&'static str> = None;
        lookup.unwrap()
    }
    async fn fine() -> &'static str {
        "fine"
    }
    let app = Router::new()
        .route("/boom", get(boom))
        .route("/formatted", get(formatted))
        .route("/payload", get(payload))
        .route("/missing", get(missing))
        .route("/fine", get(fine));
    routes::with_security_layers(app, &t.state)
}

#[tokio::test]
async fn test_panic_becomes_single_opaque_500() {
    let t = TestApp::new(AppConfig::default()).await;
    let app = panicking_app(&t);

    for uri in ["/boom", "/formatted", "/payload", "/missing"] {
        let res = app.clone().oneshot(get_request(uri).body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(res.headers().get(header::CONTENT_TYPE).unwrap(), "application/json");
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body, json!({ "error": "Internal server error", "code": 500 }));
        assert!(!String::from_utf8_lossy(&bytes).contains("secret"));
    }
}

#[tokio::test]
async fn test_service_keeps_serving_after_panic() {
    let t = TestApp::new(AppConfig::default()).await;
    let app = panicking_app(&t);

    let res = app.clone().oneshot(get_request("/boom").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let res = app.oneshot(get_request("/fine").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"fine");
}

#[tokio::test]
async fn test_non_string_panic_payload_is_recovered() {
    let t = TestApp::new(AppConfig::default()).await;
    let app = panicking_app(&t);

    for uri in ["/payload", "/missing", "/payload"] {
        let res = app.clone().oneshot(get_request(uri).body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body, json!({ "error": "Internal server error", "code": 500 }));

        let res = app.clone().oneshot(get_request("/fine").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }
}
