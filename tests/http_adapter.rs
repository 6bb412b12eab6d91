use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};

use op_lifecycle::lifecycle::adapters::http::IDEMPOTENCY_HEADER;
use op_lifecycle::lifecycle::{
    ActiveOperationRegistry, AmountBounds, EngineConfig, ErrorKind, HttpAdapter, IdempotencyKey,
    OperationAdapter, OperationEngine, OperationId, OperationKind, OperationStatus,
    RequiredAction, StaticCredentials, TransportError, ValidationRules, Validator,
};

#[derive(Default)]
struct Seen {
    keys: Vec<String>,
    auth: Vec<Option<String>>,
    bodies: Vec<Value>,
}

type Shared = Arc<Mutex<Seen>>;

async fn submit_transfer(
    State(seen): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let mut seen = seen.lock().unwrap();
    seen.keys.push(
        headers
            .get(IDEMPOTENCY_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string(),
    );
    seen.auth.push(
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    );
    seen.bodies.push(body);
    Json(json!({
        "success": true,
        "data": { "operationId": "tr_1001", "status": "PROCESSING" }
    }))
}

async fn transfer_status(Path(id): Path<String>) -> impl IntoResponse {
    Json(json!({
        "success": true,
        "data": { "id": id, "status": "SUCCESSFUL" }
    }))
}

async fn rejected_withdrawal() -> impl IntoResponse {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({
            "success": false,
            "error": "2FA_REQUIRED",
            "message": "Two-factor authentication has not been set up"
        })),
    )
}

async fn rejected_pin() -> impl IntoResponse {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "message": "Password PIN is invalid" })),
    )
}

async fn gateway_error() -> impl IntoResponse {
    (StatusCode::BAD_GATEWAY, "<html>upstream unavailable</html>")
}

async fn serve(seen: Shared) -> String {
    let app = Router::new()
        .route("/transfers/internal", post(submit_transfer))
        .route("/transfers/internal/{id}/status", get(transfer_status))
        .route("/withdrawals/crypto", post(rejected_withdrawal))
        .route("/withdrawals/fiat", post(rejected_pin))
        .route("/withdrawals/fiat/{id}/status", get(gateway_error))
        .with_state(seen);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn adapter(kind: OperationKind, base_url: &str, token: Option<&str>) -> HttpAdapter {
    HttpAdapter::for_kind(
        kind,
        base_url,
        Arc::new(StaticCredentials(token.map(str::to_string))),
        Duration::from_secs(5),
    )
    .unwrap()
}

#[tokio::test]
async fn test_submit_sends_key_and_token() {
    let seen = Shared::default();
    let base = serve(seen.clone()).await;
    let adapter = adapter(OperationKind::InternalTransfer, &base, Some("sess-abc"));

    let payload = json!({ "amount": 50, "recipient": "user_3", "pin": "123456" })
        .as_object()
        .cloned()
        .unwrap();
    let key = IdempotencyKey::generate();
    let resp = adapter.submit(&payload, &key).await.unwrap();

    assert!(resp.success);
    assert_eq!(resp.operation_id(), Some("tr_1001"));
    assert_eq!(resp.status(), Some("PROCESSING"));

    let seen = seen.lock().unwrap();
    assert_eq!(seen.keys, vec![key.as_str().to_string()]);
    assert_eq!(seen.auth, vec![Some("Bearer sess-abc".to_string())]);
    assert_eq!(seen.bodies[0]["recipient"], "user_3");
}

#[tokio::test]
async fn test_error_envelope_on_4xx_is_decoded() {
    let base = serve(Shared::default()).await;
    let adapter = adapter(OperationKind::ExternalWithdrawal, &base, None);

    let resp = adapter
        .submit(&Default::default(), &IdempotencyKey::generate())
        .await
        .unwrap();
    assert!(!resp.success);
    assert_eq!(resp.error.as_deref(), Some("2FA_REQUIRED"));
}

#[tokio::test]
async fn test_non_envelope_5xx_is_transport_error() {
    let base = serve(Shared::default()).await;
    let adapter = adapter(OperationKind::FiatWithdrawal, &base, None);

    let err = adapter
        .check_status(&OperationId::from("fw_1"))
        .await
        .unwrap_err();
    match err {
        TransportError::Http { status, body } => {
            assert_eq!(status, 502);
            assert!(body.contains("upstream unavailable"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_connection_refused_is_connect_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let adapter = adapter(OperationKind::InternalTransfer, &format!("http://{addr}"), None);
    let err = adapter
        .check_status(&OperationId::from("tr_1"))
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Connect(_)));
}

#[tokio::test]
async fn test_engine_over_http() {
    let seen = Shared::default();
    let base = serve(seen.clone()).await;
    let engine = OperationEngine::new(
        OperationKind::InternalTransfer,
        Validator::new(ValidationRules::for_kind(
            OperationKind::InternalTransfer,
            AmountBounds::default(),
        )),
        Arc::new(adapter(OperationKind::InternalTransfer, &base, Some("tok"))),
        Arc::new(ActiveOperationRegistry::new()),
        EngineConfig::default(),
    );

    let payload = json!({ "amount": "75.50", "recipient": "user_4", "pin": "654321" })
        .as_object()
        .cloned()
        .unwrap();
    let op = engine.submit(payload).await.unwrap();
    assert_eq!(op.status, OperationStatus::Pending);
    assert_eq!(op.id, Some(OperationId::from("tr_1001")));

    let refreshed = engine.refresh_status(None).await.unwrap();
    assert_eq!(refreshed.status, OperationStatus::Successful);
    assert_eq!(engine.state().status_text, "Completed");
}

#[tokio::test]
async fn test_engine_classifies_http_rejection() {
    let base = serve(Shared::default()).await;
    let engine = OperationEngine::new(
        OperationKind::ExternalWithdrawal,
        Validator::new(ValidationRules::for_kind(
            OperationKind::ExternalWithdrawal,
            AmountBounds::default(),
        )),
        Arc::new(adapter(OperationKind::ExternalWithdrawal, &base, None)),
        Arc::new(ActiveOperationRegistry::new()),
        EngineConfig::default(),
    );

    let payload = json!({
        "amount": "0.05",
        "address": "bc1qxy2kgdygjrsqtzq2n0yrf2493p83kkfjhx0wlh",
        "network": "BTC",
        "pin": "123456",
        "twoFactorCode": "000111"
    })
    .as_object()
    .cloned()
    .unwrap();
    let err = engine.submit(payload).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::AuthSetupRequired);
    assert_eq!(err.required_action, RequiredAction::SetupTwoFactor);
}

#[tokio::test]
async fn test_engine_classifies_bare_error_body() {
    let base = serve(Shared::default()).await;
    let engine = OperationEngine::new(
        OperationKind::FiatWithdrawal,
        Validator::new(ValidationRules::for_kind(
            OperationKind::FiatWithdrawal,
            AmountBounds::default(),
        )),
        Arc::new(adapter(OperationKind::FiatWithdrawal, &base, Some("tok"))),
        Arc::new(ActiveOperationRegistry::new()),
        EngineConfig::default(),
    );

    let payload = json!({
        "amount": "15000",
        "accountNumber": "0123456789",
        "accountName": "Ada Obi",
        "bankName": "First Bank",
        "bankCode": "011",
        "pin": "000000"
    })
    .as_object()
    .cloned()
    .unwrap();
    let err = engine.submit(payload).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::AuthCredential);
    assert_eq!(err.required_action, RequiredAction::RetryPin);
    assert_eq!(err.original_message, "Password PIN is invalid");
}
