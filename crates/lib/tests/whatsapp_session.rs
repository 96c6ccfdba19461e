//! Integration tests: drive a WhatsApp session against a fake gateway on a free port.
//! The fake answers from scripted queues and records every call it sees.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{delete, get, post},
    Json, Router,
};
use lib::channels::whatsapp::{LifecycleState, SessionStatus, SessionTiming, WhatsAppSession};
use lib::channels::ChannelHandle;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

type Reply = (u16, Value);

#[derive(Default)]
struct FakeGateway {
    create: Mutex<Option<Reply>>,
    /// Connect replies in order; the last one repeats.
    connect: Mutex<VecDeque<Reply>>,
    connect_delay: Mutex<Duration>,
    deletes: AtomicUsize,
    connects: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    names: Mutex<Vec<String>>,
    api_keys: Mutex<Vec<String>>,
    sent: Mutex<Vec<Value>>,
}

impl FakeGateway {
    fn new(create: Reply, connect: Vec<Reply>) -> Arc<Self> {
        let fake = Self::default();
        *fake.create.lock().unwrap() = Some(create);
        *fake.connect.lock().unwrap() = connect.into();
        Arc::new(fake)
    }

    fn record(&self, headers: &HeaderMap, name: &str) {
        self.names.lock().unwrap().push(name.to_string());
        if let Some(key) = headers.get("apikey").and_then(|v| v.to_str().ok()) {
            self.api_keys.lock().unwrap().push(key.to_string());
        }
    }
}

/// Counts a connect request as in flight until dropped, even if the client goes away mid-request.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn reply((status, body): Reply) -> (StatusCode, Json<Value>) {
    (
        StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        Json(body),
    )
}

async fn delete_instance(
    State(fake): State<Arc<FakeGateway>>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> (StatusCode, Json<Value>) {
    fake.deletes.fetch_add(1, Ordering::SeqCst);
    fake.record(&headers, &name);
    reply((404, json!({"error": "instance not found"})))
}

async fn create_instance(
    State(fake): State<Arc<FakeGateway>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let name = body["instanceName"].as_str().unwrap_or_default().to_string();
    assert_eq!(body["qrcode"], true);
    fake.record(&headers, &name);
    let scripted = fake.create.lock().unwrap().clone();
    reply(scripted.unwrap_or((201, json!({}))))
}

async fn connect_instance(
    State(fake): State<Arc<FakeGateway>>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> (StatusCode, Json<Value>) {
    fake.connects.fetch_add(1, Ordering::SeqCst);
    fake.record(&headers, &name);
    let now = fake.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    fake.max_in_flight.fetch_max(now, Ordering::SeqCst);
    let _in_flight = InFlight(&fake.in_flight);
    let delay = *fake.connect_delay.lock().unwrap();
    tokio::time::sleep(delay).await;
    let next = {
        let mut queue = fake.connect.lock().unwrap();
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    };
    reply(next.unwrap_or((404, json!({}))))
}

async fn send_text(
    State(fake): State<Arc<FakeGateway>>,
    headers: HeaderMap,
    Path(name): Path<String>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    fake.record(&headers, &name);
    fake.sent.lock().unwrap().push(body);
    reply((201, json!({"status": "PENDING"})))
}

async fn serve(fake: Arc<FakeGateway>) -> String {
    let app = Router::new()
        .route("/instance/delete/:name", delete(delete_instance))
        .route("/instance/create", post(create_instance))
        .route("/instance/connect/:name", get(connect_instance))
        .route("/message/sendText/:name", post(send_text))
        .with_state(fake);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind free port");
    let addr = listener.local_addr().expect("local_addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{}", addr)
}

fn fast() -> SessionTiming {
    SessionTiming {
        settle_delay: Duration::from_millis(10),
        poll_interval: Duration::from_millis(20),
    }
}

async fn wait_for(
    rx: &mut watch::Receiver<SessionStatus>,
    pred: impl FnMut(&SessionStatus) -> bool,
) -> SessionStatus {
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(pred))
        .await
        .expect("timed out waiting for session state")
        .expect("status channel closed")
        .clone()
}

#[tokio::test]
async fn conflict_then_waiting_then_open_connects() {
    let fake = FakeGateway::new(
        (409, json!({"error": "instance already in use"})),
        vec![
            (404, json!({})),
            (404, json!({})),
            (200, json!({"instance": {"instanceName": "salesbot", "state": "open"}})),
        ],
    );
    let url = serve(fake.clone()).await;
    let session = WhatsAppSession::new(fast());
    let mut rx = session.subscribe();

    let after_create = session.start_session("Sales_Bot!", &url, "secret").await;
    assert_eq!(after_create.name, "salesbot");
    assert_eq!(after_create.state, LifecycleState::AwaitingQr);
    assert!(after_create.last_error.is_none());

    let waiting = wait_for(&mut rx, |s| s.gateway_status.as_deref() == Some("WAITING")).await;
    assert_eq!(waiting.state, LifecycleState::AwaitingQr);

    let connected = wait_for(&mut rx, |s| s.state == LifecycleState::Connected).await;
    assert_eq!(connected.gateway_status.as_deref(), Some("OPEN"));
    assert!(connected.qr.is_none());

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(!session.is_polling());
    assert_eq!(fake.connects.load(Ordering::SeqCst), 3);
    assert_eq!(fake.deletes.load(Ordering::SeqCst), 1);
    assert!(fake.names.lock().unwrap().iter().all(|n| n == "salesbot"));
    assert!(fake.api_keys.lock().unwrap().iter().all(|k| k == "secret"));
}

#[tokio::test]
async fn qr_from_create_then_open_clears_qr() {
    let fake = FakeGateway::new(
        (201, json!({"instance": {"instanceName": "loja"}, "qrcode": {"base64": "data:image/png;base64,QUJD"}})),
        vec![
            (200, json!({"base64": "data:image/png;base64,REVG", "code": "2@abc"})),
            (200, json!({"instance": {"status": "OPEN"}})),
        ],
    );
    let url = serve(fake.clone()).await;
    let session = WhatsAppSession::new(fast());
    let mut rx = session.subscribe();

    let after_create = session.start_session("loja", &url, "k").await;
    assert_eq!(after_create.state, LifecycleState::AwaitingScan);
    assert_eq!(after_create.qr.as_deref(), Some("data:image/png;base64,QUJD"));

    let refreshed = wait_for(&mut rx, |s| s.qr.as_deref() == Some("data:image/png;base64,REVG")).await;
    assert_eq!(refreshed.state, LifecycleState::AwaitingScan);

    let connected = wait_for(&mut rx, |s| s.state == LifecycleState::Connected).await;
    assert!(connected.qr.is_none());
    assert_eq!(session.current_status(), connected);
}

#[tokio::test]
async fn waiting_while_awaiting_scan_keeps_qr() {
    let fake = FakeGateway::new(
        (201, json!({"qrcode": {"base64": "data:image/png;base64,QUJD"}})),
        vec![
            (404, json!({"error": "not found"})),
            (200, json!({"instance": {"state": "open"}})),
        ],
    );
    let url = serve(fake.clone()).await;
    let session = WhatsAppSession::new(fast());
    let mut rx = session.subscribe();

    let after_create = session.start_session("loja", &url, "k").await;
    assert_eq!(after_create.state, LifecycleState::AwaitingScan);

    let waiting = wait_for(&mut rx, |s| s.gateway_status.as_deref() == Some("WAITING")).await;
    assert_eq!(waiting.state, LifecycleState::AwaitingScan);
    assert_eq!(waiting.qr.as_deref(), Some("data:image/png;base64,QUJD"));

    let connected = wait_for(&mut rx, |s| s.state == LifecycleState::Connected).await;
    assert!(connected.qr.is_none());
}

#[tokio::test]
async fn unexpected_create_status_is_fatal_and_retryable() {
    let fake = FakeGateway::new((500, json!({"message": "boom"})), vec![(404, json!({}))]);
    let url = serve(fake.clone()).await;
    let session = WhatsAppSession::new(fast());

    let status = session.start_session("vendas", &url, "k").await;
    assert_eq!(status.state, LifecycleState::Error);
    let error = status.last_error.expect("error detail");
    assert!(error.contains("500"), "{error}");
    assert!(error.contains("boom"), "{error}");

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(fake.connects.load(Ordering::SeqCst), 0);

    *fake.create.lock().unwrap() = Some((201, json!({})));
    let status = session.retry().await.expect("retry from error");
    assert_eq!(status.state, LifecycleState::AwaitingQr);
    assert_eq!(fake.deletes.load(Ordering::SeqCst), 2);
    session.stop_polling();
}

#[tokio::test]
async fn other_poll_errors_show_status_code_and_keep_polling() {
    let fake = FakeGateway::new(
        (201, json!({})),
        vec![
            (503, json!({"error": "busy"})),
            (200, json!({"instance": {"state": "connecting"}})),
            (200, json!({"instance": {"state": "Open"}})),
        ],
    );
    let url = serve(fake.clone()).await;
    let session = WhatsAppSession::new(fast());
    let mut rx = session.subscribe();
    session.start_session("vendas", &url, "k").await;

    let errored = wait_for(&mut rx, |s| s.gateway_status.as_deref() == Some("503")).await;
    assert_eq!(errored.state, LifecycleState::AwaitingQr);
    let connecting = wait_for(&mut rx, |s| s.gateway_status.as_deref() == Some("CONNECTING")).await;
    assert_eq!(connecting.state, LifecycleState::AwaitingQr);
    wait_for(&mut rx, |s| s.state == LifecycleState::Connected).await;
}

#[tokio::test]
async fn restart_never_runs_two_pollers() {
    let fake = FakeGateway::new((201, json!({})), vec![(200, json!({"instance": {"state": "connecting"}}))]);
    *fake.connect_delay.lock().unwrap() = Duration::from_millis(15);
    let url = serve(fake.clone()).await;
    let session = WhatsAppSession::new(fast());

    session.start_session("vendas", &url, "k").await;
    tokio::time::sleep(Duration::from_millis(90)).await;
    let restarted = session.start_session("vendas", &url, "k").await;
    assert_eq!(restarted.state, LifecycleState::AwaitingQr);
    tokio::time::sleep(Duration::from_millis(120)).await;

    assert_eq!(fake.deletes.load(Ordering::SeqCst), 2);
    assert!(fake.connects.load(Ordering::SeqCst) >= 2);
    assert_eq!(fake.max_in_flight.load(Ordering::SeqCst), 1);

    session.stop_polling();
    session.stop_polling();
    tokio::time::sleep(Duration::from_millis(30)).await;
    let frozen = fake.connects.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(fake.connects.load(Ordering::SeqCst), frozen);
    assert_eq!(session.current_status().state, LifecycleState::AwaitingQr);
}

#[tokio::test]
async fn response_after_stop_is_discarded() {
    let fake = FakeGateway::new((201, json!({})), vec![(200, json!({"instance": {"state": "open"}}))]);
    *fake.connect_delay.lock().unwrap() = Duration::from_millis(100);
    let url = serve(fake.clone()).await;
    let session = WhatsAppSession::new(fast());
    session.start_session("vendas", &url, "k").await;

    for _ in 0..100 {
        if fake.connects.load(Ordering::SeqCst) > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    session.close();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(session.current_status().state, LifecycleState::AwaitingQr);
}

#[tokio::test]
async fn connected_session_delivers_messages() {
    let fake = FakeGateway::new((201, json!({})), vec![(200, json!({"instance": {"state": "open"}}))]);
    let url = serve(fake.clone()).await;
    let session = WhatsAppSession::new(fast());
    let mut rx = session.subscribe();

    assert!(session.send_message("5511999990000", "oi").await.is_err());
    session.start_session("vendas", &url, "k").await;
    wait_for(&mut rx, |s| s.state == LifecycleState::Connected).await;

    session
        .send_message("5511999990000", "Total: R$9000")
        .await
        .expect("send after connected");
    let sent = fake.sent.lock().unwrap().clone();
    assert_eq!(sent, vec![json!({"number": "5511999990000", "text": "Total: R$9000"})]);
    assert_eq!(session.id(), "whatsapp");
}

#[tokio::test]
async fn stop_during_reset_lands_in_retryable_error() {
    let fake = FakeGateway::new((201, json!({})), vec![(404, json!({}))]);
    let url = serve(fake.clone()).await;
    let session = Arc::new(WhatsAppSession::new(SessionTiming {
        settle_delay: Duration::from_millis(200),
        poll_interval: Duration::from_millis(20),
    }));

    let starting = tokio::spawn({
        let session = session.clone();
        let url = url.clone();
        async move { session.start_session("vendas", &url, "k").await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    session.stop_polling();

    let stopped = session.current_status();
    assert_eq!(stopped.state, LifecycleState::Error);
    let error = stopped.last_error.expect("error detail");
    assert!(error.contains("stopped"), "{error}");
    assert!(!session.is_polling());

    let finished = starting.await.expect("start task");
    assert_eq!(finished.state, LifecycleState::Error);
    assert_eq!(fake.connects.load(Ordering::SeqCst), 0);

    let retried = session.retry().await.expect("retry after stop");
    assert_eq!(retried.state, LifecycleState::AwaitingQr);
    assert!(retried.last_error.is_none());
    session.stop_polling();
}
