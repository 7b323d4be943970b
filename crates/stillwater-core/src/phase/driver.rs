//! Async driver for the phase machine.
//!
//! One tokio task owns the [`PhaseMachine`] and applies every input in
//! arrival order. Timers and network fetches run as separate tasks and
//! report back through the same inbox, so state is only ever touched from
//! the driver task. The current [`GatewayView`] is published on a watch
//! channel for the presentation layer.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::machine::{Command, Input, PhaseMachine, TimerKind};
use super::{ConsentOutcome, GatewayView};
use crate::attribution::{AttributionRecord, AttributionSource, DeepLinkPayload};
use crate::capabilities::{AttributionIdentity, DeviceContext, PushTokenProvider};
use crate::remote_config::{ConfigRequest, ConfigSource};

/// Collaborators the driver calls out to.
#[derive(Clone)]
pub struct GatewayServices {
    pub attribution: Arc<dyn AttributionSource>,
    pub config: Arc<dyn ConfigSource>,
    pub identity: Arc<dyn AttributionIdentity>,
    pub push_tokens: Arc<dyn PushTokenProvider>,
    pub device: DeviceContext,
}

enum Message {
    Input(Input),
    Shutdown,
}

/// Cheap handle for feeding events into a running gateway.
///
/// Every method is fire-and-forget; events sent after the gateway stopped
/// are dropped.
#[derive(Clone)]
pub struct GatewayHandle {
    tx: mpsc::UnboundedSender<Message>,
    view: watch::Receiver<GatewayView>,
}

impl GatewayHandle {
    fn send(&self, input: Input) {
        if self.tx.send(Message::Input(input)).is_err() {
            tracing::debug!("gateway stopped, dropping event");
        }
    }

    pub fn conversion_data_received(&self, info: AttributionRecord) {
        self.send(Input::ConversionDataReceived(info));
    }

    pub fn conversion_data_failed(&self) {
        self.send(Input::ConversionDataFailed);
    }

    pub fn deep_link_resolved(&self, payload: DeepLinkPayload) {
        self.send(Input::DeepLinkResolved(payload));
    }

    pub fn connectivity_changed(&self, connected: bool) {
        self.send(Input::ConnectivityChanged { connected });
    }

    pub fn consent_resolved(&self, outcome: ConsentOutcome) {
        self.send(Input::ConsentResolved(outcome));
    }

    pub fn push_received(&self, payload: Value) {
        self.send(Input::PushReceived(payload));
    }

    pub fn push_token_received(&self, token: impl Into<String>) {
        self.send(Input::PushTokenReceived(token.into()));
    }

    pub fn suspended(&self) {
        self.send(Input::Suspended);
    }

    pub fn resumed(&self) {
        self.send(Input::Resumed);
    }

    /// Stop the driver task and cancel pending timers.
    pub fn shutdown(&self) {
        let _ = self.tx.send(Message::Shutdown);
    }

    /// Latest published view.
    pub fn view(&self) -> GatewayView {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<GatewayView> {
        self.view.clone()
    }
}

pub struct Gateway {
    machine: PhaseMachine,
    services: GatewayServices,
    inbox: mpsc::UnboundedReceiver<Message>,
    loopback: mpsc::WeakUnboundedSender<Message>,
    view_tx: watch::Sender<GatewayView>,
    timers: HashMap<TimerKind, JoinHandle<()>>,
}

impl Gateway {
    /// Start the driver on the current tokio runtime.
    ///
    /// The machine receives [`Input::Launched`] before any queued event.
    /// The task ends on [`GatewayHandle::shutdown`] or once every handle
    /// and pending task is gone.
    pub fn spawn(machine: PhaseMachine, services: GatewayServices) -> (GatewayHandle, JoinHandle<()>) {
        let (tx, inbox) = mpsc::unbounded_channel();
        let (view_tx, view_rx) = watch::channel(machine.view());

        let gateway = Gateway {
            machine,
            services,
            inbox,
            loopback: tx.downgrade(),
            view_tx,
            timers: HashMap::new(),
        };
        let task = tokio::spawn(gateway.run());

        (GatewayHandle { tx, view: view_rx }, task)
    }

    async fn run(mut self) {
        tracing::info!("gateway started");
        self.apply(Input::Launched);

        while let Some(message) = self.inbox.recv().await {
            match message {
                Message::Input(input) => self.apply(input),
                Message::Shutdown => break,
            }
        }

        for (_, timer) in self.timers.drain() {
            timer.abort();
        }
        tracing::info!(phase = self.machine.phase().as_str(), "gateway stopped");
    }

    fn apply(&mut self, input: Input) {
        if let Input::TimerFired(kind) = &input {
            self.timers.remove(kind);
        }

        if let Err(e) = self.machine.handle(input, Utc::now()) {
            tracing::error!("failed to apply gateway input: {e}");
        }

        for command in self.machine.drain_commands() {
            self.execute(command);
        }

        let next = self.machine.view();
        self.view_tx.send_if_modified(|view| {
            if *view == next {
                false
            } else {
                *view = next;
                true
            }
        });
    }

    fn execute(&mut self, command: Command) {
        let Some(tx) = self.loopback.upgrade() else {
            return;
        };

        match command {
            Command::StartTimer { timer, after } => {
                if let Some(previous) = self.timers.remove(&timer) {
                    previous.abort();
                }
                let handle = tokio::spawn(async move {
                    tokio::time::sleep(after).await;
                    let _ = tx.send(Message::Input(Input::TimerFired(timer)));
                });
                self.timers.insert(timer, handle);
            }
            Command::CancelTimer(timer) => {
                if let Some(handle) = self.timers.remove(&timer) {
                    handle.abort();
                }
            }
            Command::FetchAttribution => {
                let source = Arc::clone(&self.services.attribution);
                let device_id = self.services.identity.attribution_uid();
                tokio::spawn(async move {
                    let result = source.fetch_organic(&device_id).await;
                    let _ = tx.send(Message::Input(Input::AttributionFetched(result)));
                });
            }
            Command::FetchConfig {
                ticket,
                attribution,
                push_token,
            } => {
                let request = ConfigRequest {
                    attribution,
                    device: self.services.device.clone(),
                    attribution_uid: self.services.identity.attribution_uid(),
                    push_token: push_token.or_else(|| self.services.push_tokens.push_token()),
                };
                let source = Arc::clone(&self.services.config);
                tracing::debug!(ticket, "fetching remote config");
                tokio::spawn(async move {
                    let result = source.fetch_destination(request).await;
                    let _ = tx.send(Message::Input(Input::ConfigFetched { ticket, result }));
                });
            }
            Command::RegisterForPush => {
                tracing::info!("notifications granted, registering for push");
                self.services.push_tokens.register_for_push();
            }
        }
    }
}
