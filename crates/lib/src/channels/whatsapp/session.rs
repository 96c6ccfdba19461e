//! WhatsApp session lifecycle: reset → create → await QR → await scan → connected.
//!
//! One [`WhatsAppSession`] owns one named gateway instance. Every transition is published on a
//! `watch` channel so observers (CLI, UI) can render the current state and QR image.
//!
//! Each start bumps an epoch. Phase results and poll responses carry the epoch they were issued
//! under and are dropped if it no longer matches, so a response that lands after
//! [`WhatsAppSession::stop_polling`] or a restart never touches the state.

use crate::channels::whatsapp::client::GatewayClient;
use crate::channels::whatsapp::protocol::{normalize_instance_name, parse_connect_body, qr_from_body};
use crate::channels::{ChannelError, ChannelHandle};
use crate::schedule::{RecurringTask, TaskSlot};
use async_trait::async_trait;
use serde::Serialize;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

pub const DEFAULT_INTEGRATION: &str = "WHATSAPP-BAILEYS";

/// Status text shown while the gateway answers 404 (instance not provisioned yet).
const WAITING_STATUS: &str = "WAITING";
/// Status text shown when a poll could not reach the gateway at all.
const UNREACHABLE_STATUS: &str = "UNREACHABLE";

/// Lifecycle of a channel session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LifecycleState {
    Idle,
    Resetting,
    Creating,
    AwaitingQr,
    AwaitingScan,
    Connected,
    Error,
}

impl LifecycleState {
    /// States in which the connect endpoint is polled.
    pub fn is_polling(self) -> bool {
        matches!(self, Self::AwaitingQr | Self::AwaitingScan)
    }

    /// States from which the operator may retry.
    pub fn allows_retry(self) -> bool {
        matches!(self, Self::Connected | Self::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Resetting => "resetting",
            Self::Creating => "creating",
            Self::AwaitingQr => "awaiting-qr",
            Self::AwaitingScan => "awaiting-scan",
            Self::Connected => "connected",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a session, as returned by [`WhatsAppSession::current_status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    /// Normalized instance name.
    pub name: String,
    pub state: LifecycleState,
    /// Last gateway-reported status, uppercased for display.
    pub gateway_status: Option<String>,
    /// QR image payload; only set while awaiting a scan.
    pub qr: Option<String>,
    pub last_error: Option<String>,
}

impl SessionStatus {
    fn idle() -> Self {
        Self {
            name: String::new(),
            state: LifecycleState::Idle,
            gateway_status: None,
            qr: None,
            last_error: None,
        }
    }

    fn set_gateway_status(&mut self, raw: &str) {
        self.gateway_status = Some(raw.trim().to_uppercase());
    }

    fn fail(&mut self, message: String) {
        self.state = LifecycleState::Error;
        self.qr = None;
        self.last_error = Some(message);
    }
}

/// Delays used by the lifecycle. Shorten them in tests.
#[derive(Debug, Clone, Copy)]
pub struct SessionTiming {
    /// Pause after the best-effort delete so the gateway can release the old instance.
    pub settle_delay: Duration,
    /// Interval between connect/status polls.
    pub poll_interval: Duration,
}

impl Default for SessionTiming {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(2),
            poll_interval: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("retry is only allowed from connected or error (current state: {0})")]
    RetryNotAllowed(LifecycleState),
    #[error("no session has been started")]
    NoSession,
}

/// Status channel plus the epoch that guards it.
struct Shared {
    status: watch::Sender<SessionStatus>,
    epoch: AtomicU64,
}

impl Shared {
    fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Start a new epoch and reset the snapshot. Returns the new epoch.
    fn begin(&self, name: &str) -> u64 {
        let mut epoch = 0;
        self.status.send_modify(|s| {
            epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
            *s = SessionStatus {
                name: name.to_string(),
                state: LifecycleState::Resetting,
                ..SessionStatus::idle()
            };
        });
        epoch
    }

    /// Invalidate everything issued under the current epoch.
    ///
    /// A reset or create phase that is cut short can never finish, so it lands in `error`
    /// (retryable). Any other snapshot is left as it is.
    fn invalidate(&self) {
        self.status.send_if_modified(|s| {
            self.epoch.fetch_add(1, Ordering::SeqCst);
            match s.state {
                LifecycleState::Resetting | LifecycleState::Creating => {
                    let message = format!("stopped while {}", s.state);
                    s.fail(message);
                    true
                }
                _ => false,
            }
        });
    }

    /// Apply `f` if `epoch` is still current. Returns false when the update was stale.
    fn apply(&self, epoch: u64, f: impl FnOnce(&mut SessionStatus) -> bool) -> bool {
        let mut current = false;
        self.status.send_if_modified(|s| {
            if self.epoch.load(Ordering::SeqCst) != epoch {
                return false;
            }
            current = true;
            f(s)
        });
        current
    }
}

/// Last start parameters, kept for retry and message delivery.
#[derive(Clone)]
struct Target {
    name: String,
    client: GatewayClient,
}

/// Owns one gateway session and is the only writer of its state.
pub struct WhatsAppSession {
    shared: Arc<Shared>,
    poller: TaskSlot,
    timing: SessionTiming,
    integration: String,
    http: reqwest::Client,
    target: Mutex<Option<Target>>,
}

impl Default for WhatsAppSession {
    fn default() -> Self {
        Self::new(SessionTiming::default())
    }
}

impl WhatsAppSession {
    pub fn new(timing: SessionTiming) -> Self {
        let (status, _) = watch::channel(SessionStatus::idle());
        Self {
            shared: Arc::new(Shared {
                status,
                epoch: AtomicU64::new(0),
            }),
            poller: TaskSlot::new(),
            timing,
            integration: DEFAULT_INTEGRATION.to_string(),
            http: reqwest::Client::new(),
            target: Mutex::new(None),
        }
    }

    /// Gateway flavor sent on create (default "WHATSAPP-BAILEYS").
    pub fn with_integration(mut self, integration: impl Into<String>) -> Self {
        self.integration = integration.into();
        self
    }

    /// Start (or restart) the session: reset, create, then poll until connected.
    ///
    /// Returns once the create phase has settled; polling continues in the background.
    /// Disallowed characters in `name` are stripped, not rejected.
    pub async fn start_session(
        &self,
        name: &str,
        gateway_url: &str,
        credential: &str,
    ) -> SessionStatus {
        let name = normalize_instance_name(name);
        let client = GatewayClient::with_client(gateway_url, credential, self.http.clone());
        *self.lock_target() = Some(Target {
            name: name.clone(),
            client: client.clone(),
        });
        self.run(name, client).await
    }

    /// Manual retry with the last name, URL, and credential. Only from `connected` or `error`.
    pub async fn retry(&self) -> Result<SessionStatus, SessionError> {
        let state = self.current_status().state;
        if !state.allows_retry() {
            return Err(SessionError::RetryNotAllowed(state));
        }
        let target = self.lock_target().clone().ok_or(SessionError::NoSession)?;
        Ok(self.run(target.name, target.client).await)
    }

    /// Cancel polling; the remote instance is left as it is. Idempotent.
    pub fn stop_polling(&self) {
        self.poller.cancel();
        self.shared.invalidate();
    }

    /// The operator closed the session surface.
    pub fn close(&self) {
        log::debug!("whatsapp session: closed by operator");
        self.stop_polling();
    }

    pub fn current_status(&self) -> SessionStatus {
        self.shared.status.borrow().clone()
    }

    /// Receiver that sees every published transition.
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.shared.status.subscribe()
    }

    /// True while a poller is installed and running.
    pub fn is_polling(&self) -> bool {
        self.poller.is_active()
    }

    fn lock_target(&self) -> std::sync::MutexGuard<'_, Option<Target>> {
        self.target.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn run(&self, name: String, client: GatewayClient) -> SessionStatus {
        self.poller.cancel();
        let epoch = self.shared.begin(&name);
        log::info!("whatsapp session {}: resetting", name);

        if name.is_empty() {
            self.shared.apply(epoch, |s| {
                s.fail("session name has no usable characters".to_string());
                true
            });
            return self.current_status();
        }

        // Best-effort cleanup: the instance usually does not exist yet.
        match client.delete_instance(&name).await {
            Ok(res) => log::debug!("whatsapp session {}: delete returned {}", name, res.status),
            Err(e) => log::debug!("whatsapp session {}: delete ignored: {}", name, e),
        }
        tokio::time::sleep(self.timing.settle_delay).await;

        let creating = self.shared.apply(epoch, |s| {
            s.state = LifecycleState::Creating;
            true
        });
        if !creating {
            return self.current_status();
        }
        log::info!("whatsapp session {}: creating instance", name);

        let outcome = client.create_instance(&name, &self.integration).await;
        let applied = self.shared.apply(epoch, |s| {
            match outcome {
                Ok(res) if res.is_success() => match qr_from_body(&res.json()) {
                    Some(qr) => {
                        s.state = LifecycleState::AwaitingScan;
                        s.qr = Some(qr);
                    }
                    None => s.state = LifecycleState::AwaitingQr,
                },
                Ok(res) if res.status == 403 || res.status == 409 => {
                    log::debug!(
                        "whatsapp session {}: instance already exists ({})",
                        s.name,
                        res.status
                    );
                    s.state = LifecycleState::AwaitingQr;
                }
                Ok(res) => {
                    log::warn!("whatsapp session {}: create failed: {}", s.name, res.status);
                    s.fail(format!("create instance failed: {} {}", res.status, res.body));
                }
                Err(e) => {
                    log::warn!("whatsapp session {}: create failed: {}", s.name, e);
                    s.fail(format!("create instance failed: {}", e));
                }
            }
            true
        });

        if applied && self.current_status().state.is_polling() {
            self.start_polling(epoch, name, client);
        }
        self.current_status()
    }

    fn start_polling(&self, epoch: u64, name: String, client: GatewayClient) {
        if self.shared.epoch() != epoch {
            return;
        }
        let shared = self.shared.clone();
        let interval = self.timing.poll_interval;
        let task = RecurringTask::spawn(interval, interval, move || {
            let shared = shared.clone();
            let client = client.clone();
            let name = name.clone();
            async move { poll_once(&shared, epoch, &client, &name).await }
        });
        self.poller.replace(task);
    }
}

/// One connect/status round trip. Breaks the loop once connected or superseded.
async fn poll_once(
    shared: &Shared,
    epoch: u64,
    client: &GatewayClient,
    name: &str,
) -> ControlFlow<()> {
    if shared.epoch() != epoch {
        return ControlFlow::Break(());
    }
    let outcome = client.connect_instance(name).await;
    let mut keep_polling = true;
    let current = shared.apply(epoch, |s| {
        // Connected is sticky until an explicit reset.
        if !s.state.is_polling() {
            keep_polling = false;
            return false;
        }
        match outcome {
            Ok(res) if res.is_success() => {
                let status = parse_connect_body(&res.json());
                if let Some(raw) = status.raw_state.as_deref() {
                    s.set_gateway_status(raw);
                }
                if status.state.is_open() {
                    log::info!("whatsapp session {}: connected", s.name);
                    s.state = LifecycleState::Connected;
                    s.qr = None;
                    keep_polling = false;
                } else if let Some(qr) = status.qr {
                    s.state = LifecycleState::AwaitingScan;
                    s.qr = Some(qr);
                }
            }
            Ok(res) if res.status == 404 => s.set_gateway_status(WAITING_STATUS),
            Ok(res) => {
                log::debug!("whatsapp session {}: poll returned {}", s.name, res.status);
                s.set_gateway_status(&res.status.to_string());
            }
            Err(e) => {
                log::debug!("whatsapp session {}: poll failed: {}", s.name, e);
                s.set_gateway_status(UNREACHABLE_STATUS);
            }
        }
        true
    });
    if current && keep_polling {
        ControlFlow::Continue(())
    } else {
        ControlFlow::Break(())
    }
}

#[async_trait]
impl ChannelHandle for WhatsAppSession {
    fn id(&self) -> &str {
        "whatsapp"
    }

    fn stop(&self) {
        self.stop_polling();
    }

    /// Deliver `text` to the WhatsApp number `conversation_id`. Requires a connected session.
    async fn send_message(&self, conversation_id: &str, text: &str) -> Result<(), ChannelError> {
        let state = self.current_status().state;
        if state != LifecycleState::Connected {
            return Err(ChannelError::NotConnected(state));
        }
        let target = self.lock_target().clone().ok_or(ChannelError::NotConnected(state))?;
        target
            .client
            .send_text(&target.name, conversation_id, text)
            .await?;
        Ok(())
    }
}
