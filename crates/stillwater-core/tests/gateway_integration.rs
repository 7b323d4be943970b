//! Integration tests for the async gateway.
//!
//! These run the real driver task on a paused tokio clock, with fake
//! attribution and remote config sources, and observe the published view.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use stillwater_core::attribution::{AttributionRecord, AttributionSource};
use stillwater_core::capabilities::{DeviceContext, StaticIdentity, StaticPushToken};
use stillwater_core::error::{AttributionFetchError, ConfigFetchError};
use stillwater_core::phase::{
    ConsentOutcome, Gateway, GatewayHandle, GatewayServices, GatewayView, MachineSettings, Phase,
    PhaseMachine,
};
use stillwater_core::remote_config::{ConfigRequest, ConfigSource};
use stillwater_core::storage::{AppMode, StateStore};
use tempfile::TempDir;
use tokio::sync::Notify;
use url::Url;

struct FakeAttribution {
    response: Option<Value>,
    calls: AtomicUsize,
}

#[async_trait]
impl AttributionSource for FakeAttribution {
    async fn fetch_organic(&self, _device_id: &str) -> Result<AttributionRecord, AttributionFetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.response {
            Some(value) => Ok(AttributionRecord::from_value(value.clone())),
            None => Err(AttributionFetchError::Status(503)),
        }
    }
}

/// Answers call `n` with `urls[n]` (the last entry repeats). `None` fails.
struct FakeConfig {
    urls: Vec<Option<&'static str>>,
    delay: Duration,
    requests: Mutex<Vec<ConfigRequest>>,
    started: Notify,
}

impl FakeConfig {
    fn new(urls: Vec<Option<&'static str>>) -> Self {
        Self {
            urls,
            delay: Duration::ZERO,
            requests: Mutex::new(Vec::new()),
            started: Notify::new(),
        }
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn last_request(&self) -> ConfigRequest {
        self.requests.lock().unwrap().last().cloned().expect("no config request")
    }
}

#[async_trait]
impl ConfigSource for FakeConfig {
    async fn fetch_destination(&self, request: ConfigRequest) -> Result<Url, ConfigFetchError> {
        let call = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request);
            requests.len() - 1
        };
        self.started.notify_one();
        tokio::time::sleep(self.delay).await;

        let answer = self.urls.get(call).or(self.urls.last()).copied().flatten();
        match answer {
            Some(url) => Ok(Url::parse(url).unwrap()),
            None => Err(ConfigFetchError::Status(500)),
        }
    }
}

struct Harness {
    dir: TempDir,
    handle: GatewayHandle,
    attribution: Arc<FakeAttribution>,
    config: Arc<FakeConfig>,
}

impl Harness {
    fn store(&self) -> StateStore {
        open_store(&self.dir)
    }

    async fn settle(&self, phase: Phase) -> GatewayView {
        self.wait(|view| view.phase == phase).await
    }

    async fn wait(&self, predicate: impl FnMut(&GatewayView) -> bool) -> GatewayView {
        let mut rx = self.handle.subscribe();
        let view = tokio::time::timeout(Duration::from_secs(600), rx.wait_for(predicate))
            .await
            .expect("gateway did not settle")
            .expect("gateway stopped")
            .clone();
        view
    }
}

fn open_store(dir: &TempDir) -> StateStore {
    StateStore::open_at(&dir.path().join("state.db")).unwrap()
}

fn device() -> DeviceContext {
    DeviceContext {
        os: "iOS".into(),
        bundle_id: "com.example.stillwater".into(),
        project_id: Some("stillwater-prod".into()),
        store_id: "id123".into(),
        locale: "EN".into(),
    }
}

fn start(
    dir: TempDir,
    settings: MachineSettings,
    attribution: FakeAttribution,
    config: FakeConfig,
) -> Harness {
    let attribution = Arc::new(attribution);
    let config = Arc::new(config);
    let services = GatewayServices {
        attribution: attribution.clone(),
        config: config.clone(),
        identity: Arc::new(StaticIdentity("uid-42".into())),
        push_tokens: Arc::new(StaticPushToken(Some("fcm-token".into()))),
        device: device(),
    };
    let machine = PhaseMachine::new(open_store(&dir), settings);
    let (handle, _task) = Gateway::spawn(machine, services);
    Harness {
        dir,
        handle,
        attribution,
        config,
    }
}

fn no_attribution() -> FakeAttribution {
    FakeAttribution {
        response: None,
        calls: AtomicUsize::new(0),
    }
}

/// Temp dir whose store already recorded a granted notification consent.
fn consented_dir() -> TempDir {
    let dir = TempDir::new().unwrap();
    open_store(&dir).set_notifications_outcome(true).unwrap();
    dir
}

fn record(value: Value) -> AttributionRecord {
    AttributionRecord::from_value(value)
}

#[tokio::test(start_paused = true)]
async fn test_paid_install_prompts_then_goes_active() {
    let h = start(
        TempDir::new().unwrap(),
        MachineSettings::default(),
        no_attribution(),
        FakeConfig::new(vec![Some("https://dest.example/home")]),
    );

    h.handle
        .conversion_data_received(record(json!({"af_status": "Non-organic", "campaign": "spring"})));

    let view = h.wait(|v| v.consent_requested).await;
    assert_eq!(view.phase, Phase::Pending);

    let request = h.config.last_request();
    let body = request.to_json();
    assert_eq!(body["campaign"], "spring");
    assert_eq!(body["af_id"], "uid-42");
    assert_eq!(body["push_token"], "fcm-token");
    assert_eq!(body["firebase_project_id"], "stillwater-prod");

    h.handle.consent_resolved(ConsentOutcome::Skipped);
    let view = h.settle(Phase::Active).await;
    assert_eq!(view.destination.unwrap().as_str(), "https://dest.example/home");

    let state = h.store().load().unwrap();
    assert_eq!(state.mode, Some(AppMode::Active));
    assert!(state.has_launched_before);
    assert!(state.attribution_dispatched);
    assert!(state.last_notification_prompt_at.is_some());
    assert!(!state.notifications_accepted);
}

#[tokio::test(start_paused = true)]
async fn test_merge_order_conversion_first() {
    let h = start(
        consented_dir(),
        MachineSettings::default(),
        no_attribution(),
        FakeConfig::new(vec![Some("https://dest.example/")]),
    );

    h.handle.conversion_data_received(record(json!({"a": 1})));
    h.handle.deep_link_resolved(record(json!({"a": 2, "b": 3})));
    h.settle(Phase::Active).await;

    assert_eq!(h.config.calls(), 1);
    assert_eq!(h.config.last_request().attribution, record(json!({"a": 1, "b": 3})));
}

#[tokio::test(start_paused = true)]
async fn test_merge_order_deep_link_first() {
    let h = start(
        consented_dir(),
        MachineSettings::default(),
        no_attribution(),
        FakeConfig::new(vec![Some("https://dest.example/")]),
    );

    h.handle.deep_link_resolved(record(json!({"a": 2, "b": 3})));
    h.handle.conversion_data_received(record(json!({"a": 1})));
    h.settle(Phase::Active).await;

    assert_eq!(h.config.calls(), 1);
    assert_eq!(h.config.last_request().attribution, record(json!({"a": 1, "b": 3})));
}

#[tokio::test(start_paused = true)]
async fn test_deep_link_alone_dispatches_after_merge_window() {
    let h = start(
        consented_dir(),
        MachineSettings::default(),
        no_attribution(),
        FakeConfig::new(vec![Some("https://dest.example/")]),
    );

    h.handle.deep_link_resolved(record(json!({"deep_link_value": "promo"})));
    h.settle(Phase::Active).await;
    assert_eq!(
        h.config.last_request().attribution,
        record(json!({"deep_link_value": "promo"}))
    );
}

#[tokio::test(start_paused = true)]
async fn test_organic_first_launch_fetches_config_once_after_grace() {
    let h = start(
        consented_dir(),
        MachineSettings::default(),
        FakeAttribution {
            response: Some(json!({"af_status": "Organic", "media_source": "organic"})),
            calls: AtomicUsize::new(0),
        },
        FakeConfig::new(vec![Some("https://dest.example/organic")]),
    );

    h.handle.deep_link_resolved(record(json!({"deep_link_value": "x", "media_source": "link"})));
    h.handle
        .conversion_data_received(record(json!({"af_status": "Organic"})));

    let view = h.settle(Phase::Active).await;
    assert_eq!(view.destination.unwrap().as_str(), "https://dest.example/organic");
    assert_eq!(h.attribution.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.config.calls(), 1);

    let attribution = h.config.last_request().attribution;
    assert_eq!(attribution.get("media_source"), Some(&json!("organic")));
    assert_eq!(attribution.get("deep_link_value"), Some(&json!("x")));
}

#[tokio::test(start_paused = true)]
async fn test_organic_lookup_failure_degrades() {
    let h = start(
        TempDir::new().unwrap(),
        MachineSettings::default(),
        no_attribution(),
        FakeConfig::new(vec![Some("https://dest.example/")]),
    );

    h.handle
        .conversion_data_received(record(json!({"af_status": "Organic"})));
    h.settle(Phase::Degraded).await;
    assert_eq!(h.config.calls(), 0);
    assert_eq!(h.store().mode().unwrap(), Some(AppMode::Legacy));
}

#[tokio::test(start_paused = true)]
async fn test_config_failure_without_cache_degrades() {
    let h = start(
        TempDir::new().unwrap(),
        MachineSettings::default(),
        no_attribution(),
        FakeConfig::new(vec![None]),
    );

    h.handle.conversion_data_received(record(json!({"campaign": "c"})));
    let view = h.settle(Phase::Degraded).await;
    assert!(view.destination.is_none());

    let state = h.store().load().unwrap();
    assert_eq!(state.mode, Some(AppMode::Legacy));
    assert!(state.has_launched_before);
}

#[tokio::test(start_paused = true)]
async fn test_config_failure_with_cache_uses_it() {
    let dir = consented_dir();
    let store = open_store(&dir);
    store
        .record_config_success(&Url::parse("https://x/y").unwrap())
        .unwrap();
    drop(store);

    let h = start(dir, MachineSettings::default(), no_attribution(), FakeConfig::new(vec![None]));
    h.handle.conversion_data_received(record(json!({"campaign": "c"})));

    let view = h.settle(Phase::Active).await;
    assert_eq!(view.destination.unwrap().as_str(), "https://x/y");
    assert_eq!(h.store().mode().unwrap(), Some(AppMode::Active));
}

#[tokio::test(start_paused = true)]
async fn test_failed_conversion_degrades() {
    let h = start(
        TempDir::new().unwrap(),
        MachineSettings::default(),
        no_attribution(),
        FakeConfig::new(vec![Some("https://dest.example/")]),
    );

    h.handle.conversion_data_failed();
    h.settle(Phase::Degraded).await;
    assert_eq!(h.config.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_connectivity_loss_while_pending_degrades() {
    let h = start(
        TempDir::new().unwrap(),
        MachineSettings::default(),
        no_attribution(),
        FakeConfig::new(vec![Some("https://dest.example/")]),
    );

    h.handle.connectivity_changed(false);
    h.settle(Phase::Degraded).await;

    // Terminal: later attribution is ignored.
    h.handle.conversion_data_received(record(json!({"campaign": "c"})));
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.handle.view().phase, Phase::Degraded);
    assert_eq!(h.config.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_connectivity_loss_while_active_goes_offline_and_back() {
    let h = start(
        consented_dir(),
        MachineSettings::default(),
        no_attribution(),
        FakeConfig::new(vec![Some("https://dest.example/")]),
    );

    h.handle.conversion_data_received(record(json!({"campaign": "c"})));
    h.settle(Phase::Active).await;

    h.handle.connectivity_changed(false);
    h.settle(Phase::Offline).await;

    h.handle.connectivity_changed(true);
    let view = h.settle(Phase::Active).await;
    assert_eq!(view.destination.unwrap().as_str(), "https://dest.example/");
}

#[tokio::test(start_paused = true)]
async fn test_relaunch_in_legacy_mode_degrades_without_events() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    store.mark_attribution_dispatched().unwrap();
    store.switch_to_legacy().unwrap();
    drop(store);

    let h = start(
        dir,
        MachineSettings::default(),
        no_attribution(),
        FakeConfig::new(vec![Some("https://dest.example/")]),
    );
    h.settle(Phase::Degraded).await;
    assert_eq!(h.config.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_relaunch_in_active_mode_refetches_config() {
    let dir = consented_dir();
    let store = open_store(&dir);
    store.mark_attribution_dispatched().unwrap();
    store
        .record_config_success(&Url::parse("https://old.example/").unwrap())
        .unwrap();
    drop(store);

    let h = start(
        dir,
        MachineSettings::default(),
        no_attribution(),
        FakeConfig::new(vec![Some("https://new.example/")]),
    );

    // A replayed conversion callback must not dispatch twice.
    h.handle.conversion_data_received(record(json!({"campaign": "c"})));

    let view = h.settle(Phase::Active).await;
    assert_eq!(view.destination.unwrap().as_str(), "https://new.example/");
    assert_eq!(h.config.calls(), 1);
    assert!(h.config.last_request().attribution.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_suspend_discards_stale_config_result() {
    let mut config = FakeConfig::new(vec![Some("https://stale.example/"), Some("https://fresh.example/")]);
    config.delay = Duration::from_secs(5);
    let h = start(consented_dir(), MachineSettings::default(), no_attribution(), config);

    h.handle.conversion_data_received(record(json!({"campaign": "c"})));
    h.config.started.notified().await;

    h.handle.suspended();
    h.handle.resumed();

    let view = h.settle(Phase::Active).await;
    assert_eq!(view.destination.unwrap().as_str(), "https://fresh.example/");
    assert_eq!(h.config.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_push_url_restored_on_first_launch() {
    let h = start(
        consented_dir(),
        MachineSettings::default(),
        no_attribution(),
        FakeConfig::new(vec![Some("https://dest.example/")]),
    );

    h.handle
        .push_received(json!({"aps": {"alert": "Offer"}, "data": {"url": "https://push.example/offer"}}));
    h.handle.conversion_data_received(record(json!({"campaign": "c"})));

    let view = h.settle(Phase::Active).await;
    assert_eq!(view.destination.unwrap().as_str(), "https://push.example/offer");
    assert_eq!(h.config.calls(), 0);
    assert!(h.store().temp_destination_url().unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_build_guard_forces_degraded() {
    let settings = MachineSettings {
        not_before: Some(Utc::now() + chrono::Duration::days(30)),
        ..MachineSettings::default()
    };
    let h = start(
        consented_dir(),
        settings,
        no_attribution(),
        FakeConfig::new(vec![Some("https://dest.example/")]),
    );

    h.handle.conversion_data_received(record(json!({"campaign": "c"})));
    h.settle(Phase::Degraded).await;
    assert_eq!(h.config.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_push_token_persisted_after_degrade() {
    let h = start(
        TempDir::new().unwrap(),
        MachineSettings::default(),
        no_attribution(),
        FakeConfig::new(vec![None]),
    );

    h.handle.connectivity_changed(false);
    h.settle(Phase::Degraded).await;

    h.handle.push_token_received("late-token");
    h.handle.shutdown();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(h.store().push_token().unwrap().as_deref(), Some("late-token"));
}
