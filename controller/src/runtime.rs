use std::{sync::Arc, time::Duration};

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};
use zonelight_common::{
    CommandError, DriverSettings, FetchPurpose, ResponseBody, TimerKey, TransportError,
    ZoneAction, ZoneAttributes, ZoneEngine,
};

use crate::{scheduler::Scheduler, store::StateStore, transport::ZoneTransport};

#[derive(Debug, Clone, PartialEq)]
pub enum ZoneCommand {
    PowerOn,
    PowerOff,
    ApplyPattern(String),
    Capture,
    Refresh,
    RenamePattern { from: String, to: String },
    DeletePattern(String),
    LoadPredefined,
    StartDiscovery { hub_subnet: Option<String> },
    StopDiscovery,
    UpdateSettings(DriverSettings),
}

pub enum ZoneEvent {
    Command {
        command: ZoneCommand,
        reply: oneshot::Sender<Result<ZoneView, CommandError>>,
    },
    View {
        reply: oneshot::Sender<ZoneView>,
    },
    Timer {
        key: TimerKey,
        token: u64,
    },
    CommandSent {
        token: u64,
        result: Result<(), TransportError>,
    },
    StatusFetched {
        purpose: FetchPurpose,
        result: Result<ResponseBody, TransportError>,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneView {
    pub attributes: ZoneAttributes,
    pub patterns: Vec<String>,
    pub settings: DriverSettings,
}

#[derive(Debug, Error)]
pub enum HandleError {
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error("zone runtime is not running")]
    Stopped,
}

/// Cloneable front door to a running zone.
#[derive(Clone)]
pub struct ZoneHandle {
    events: mpsc::UnboundedSender<ZoneEvent>,
}

impl ZoneHandle {
    pub async fn command(&self, command: ZoneCommand) -> Result<ZoneView, HandleError> {
        let (reply, response) = oneshot::channel();
        self.events
            .send(ZoneEvent::Command { command, reply })
            .map_err(|_| HandleError::Stopped)?;
        Ok(response.await.map_err(|_| HandleError::Stopped)??)
    }

    pub async fn view(&self) -> Result<ZoneView, HandleError> {
        let (reply, response) = oneshot::channel();
        self.events
            .send(ZoneEvent::View { reply })
            .map_err(|_| HandleError::Stopped)?;
        response.await.map_err(|_| HandleError::Stopped)
    }
}

/// Single task that owns the engine. Network calls run in their own tasks and
/// report back through the event channel, so the engine never waits on I/O.
struct ZoneRuntime<T> {
    engine: ZoneEngine,
    transport: Arc<T>,
    scheduler: Scheduler,
    store: Option<StateStore>,
    attributes: watch::Sender<ZoneAttributes>,
    events_tx: mpsc::UnboundedSender<ZoneEvent>,
    events_rx: mpsc::UnboundedReceiver<ZoneEvent>,
}

pub fn spawn_zone<T: ZoneTransport>(
    engine: ZoneEngine,
    transport: Arc<T>,
    store: Option<StateStore>,
) -> (ZoneHandle, watch::Receiver<ZoneAttributes>) {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (attributes, attributes_rx) = watch::channel(engine.attributes().clone());

    let runtime = ZoneRuntime {
        engine,
        transport,
        scheduler: Scheduler::new(events_tx.clone()),
        store,
        attributes,
        events_tx: events_tx.clone(),
        events_rx,
    };
    tokio::spawn(runtime.run());

    (ZoneHandle { events: events_tx }, attributes_rx)
}

impl<T: ZoneTransport> ZoneRuntime<T> {
    async fn run(mut self) {
        let actions = self.engine.resume(now_ms());
        self.execute(actions).await;

        while let Some(event) = self.events_rx.recv().await {
            let now = now_ms();
            match event {
                ZoneEvent::Command { command, reply } => {
                    debug!("zone command: {command:?}");
                    let outcome = match self.apply(command, now) {
                        Ok(actions) => {
                            self.execute(actions).await;
                            Ok(self.view())
                        }
                        Err(err) => {
                            warn!("zone command rejected: {err}");
                            let actions = self.engine.report_error(&err, now);
                            self.execute(actions).await;
                            Err(err)
                        }
                    };
                    let _ = reply.send(outcome);
                }
                ZoneEvent::View { reply } => {
                    let _ = reply.send(self.view());
                }
                ZoneEvent::Timer { key, token } => {
                    let actions = self.engine.on_timer(key, token, now);
                    self.execute(actions).await;
                }
                ZoneEvent::CommandSent { token, result } => {
                    if let Err(err) = &result {
                        warn!("pattern command failed: {err}");
                    }
                    let actions = self.engine.on_command_sent(token, result, now);
                    self.execute(actions).await;
                }
                ZoneEvent::StatusFetched { purpose, result } => {
                    if let Err(err) = &result {
                        debug!("status fetch for {purpose:?} failed: {err}");
                    }
                    let actions = self.engine.on_status(purpose, result, now);
                    self.execute(actions).await;
                }
            }
        }
    }

    fn apply(&mut self, command: ZoneCommand, now: u64) -> Result<Vec<ZoneAction>, CommandError> {
        match command {
            ZoneCommand::PowerOn => self.engine.power_on(now),
            ZoneCommand::PowerOff => self.engine.power_off(now),
            ZoneCommand::ApplyPattern(name) => self.engine.apply_pattern(&name, now),
            ZoneCommand::Capture => self.engine.capture(),
            ZoneCommand::Refresh => self.engine.refresh(),
            ZoneCommand::RenamePattern { from, to } => self.engine.rename_pattern(&from, &to, now),
            ZoneCommand::DeletePattern(name) => self.engine.delete_pattern(&name, now),
            ZoneCommand::LoadPredefined => self.engine.load_predefined(now),
            ZoneCommand::StartDiscovery { hub_subnet } => {
                self.engine.start_discovery(hub_subnet.as_deref(), now)
            }
            ZoneCommand::StopDiscovery => Ok(self.engine.stop_discovery(now)),
            ZoneCommand::UpdateSettings(settings) => Ok(self.engine.update_settings(settings, now)),
        }
    }

    async fn execute(&mut self, actions: Vec<ZoneAction>) {
        for action in actions {
            debug!("zone action: {action:?}");
            match action {
                ZoneAction::Schedule {
                    key,
                    token,
                    delay_ms,
                } => self
                    .scheduler
                    .schedule(key, token, Duration::from_millis(delay_ms)),
                ZoneAction::Cancel(key) => self.scheduler.cancel(key),
                ZoneAction::FetchStatus {
                    purpose,
                    address,
                    timeout_ms,
                } => {
                    let transport = self.transport.clone();
                    let events = self.events_tx.clone();
                    tokio::spawn(async move {
                        let result = transport
                            .fetch_status(&address, Duration::from_millis(timeout_ms))
                            .await;
                        let _ = events.send(ZoneEvent::StatusFetched { purpose, result });
                    });
                }
                ZoneAction::SendCommand {
                    token,
                    url,
                    timeout_ms,
                } => {
                    info!("sending pattern command: {url}");
                    let transport = self.transport.clone();
                    let events = self.events_tx.clone();
                    tokio::spawn(async move {
                        let result = transport
                            .send_command(&url, Duration::from_millis(timeout_ms))
                            .await;
                        let _ = events.send(ZoneEvent::CommandSent { token, result });
                    });
                }
                ZoneAction::Persist => {
                    if let Some(store) = &self.store {
                        if let Err(err) = store.save_context(self.engine.context()).await {
                            warn!("failed to persist zone state: {err:#}");
                        }
                    }
                }
                ZoneAction::Publish => {
                    let current = self.engine.attributes().clone();
                    let previous = self.attributes.send_replace(current);
                    let status = &self.engine.attributes().last_status;
                    if previous.last_status != *status && !status.is_empty() {
                        info!("zone status: {status}");
                    }
                }
            }
        }
    }

    fn view(&self) -> ZoneView {
        ZoneView {
            attributes: self.engine.attributes().clone(),
            patterns: self.engine.pattern_names(),
            settings: self.engine.settings().clone(),
        }
    }
}

fn now_ms() -> u64 {
    Utc::now().timestamp_millis().try_into().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use pretty_assertions::assert_eq;
    use zonelight_common::{types::ParameterSet, RuntimeConfig, SwitchState, ZoneContext};

    #[derive(Default)]
    struct FakeTransport {
        sent: Mutex<Vec<String>>,
        status: Mutex<String>,
    }

    impl FakeTransport {
        fn reporting(body: &str) -> Arc<Self> {
            let transport = Self::default();
            *transport.status.lock().unwrap() = body.to_string();
            Arc::new(transport)
        }

        fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl ZoneTransport for FakeTransport {
        async fn fetch_status(&self, _address: &str, _timeout: Duration) -> Result<ResponseBody, TransportError> {
            Ok(ResponseBody::Text(self.status.lock().unwrap().clone()))
        }

        async fn send_command(&self, url: &str, _timeout: Duration) -> Result<(), TransportError> {
            self.sent.lock().unwrap().push(url.to_string());
            Ok(())
        }
    }

    fn config(verify: bool) -> RuntimeConfig {
        let mut config = RuntimeConfig::default();
        config.driver.controller_address = Some("10.1.1.5".to_string());
        config.driver.auto_poll = false;
        config.verification.enabled = verify;
        config
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_commands_collapse_into_one_send() {
        let transport = FakeTransport::reporting("[]");
        let engine = ZoneEngine::new(&config(false), ZoneContext::default());
        let (zone, _) = spawn_zone(engine, transport.clone(), None);

        zone.command(ZoneCommand::LoadPredefined).await.unwrap();
        zone.command(ZoneCommand::PowerOff).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        zone.command(ZoneCommand::PowerOff).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        zone.command(ZoneCommand::ApplyPattern("Warm White".to_string()))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(3)).await;

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("patternType=stationary"));

        let view = zone.view().await.unwrap();
        assert_eq!(view.attributes.switch, SwitchState::On);
        assert_eq!(view.attributes.last_pattern.as_deref(), Some("Warm White"));
    }

    #[tokio::test(start_paused = true)]
    async fn off_command_is_confirmed_by_status_probe() {
        let transport = FakeTransport::reporting(r#"[{"num":1,"pattern":"off","isOn":false}]"#);
        let engine = ZoneEngine::new(&config(true), ZoneContext::default());
        let (zone, mut attributes) = spawn_zone(engine, transport.clone(), None);

        zone.command(ZoneCommand::PowerOff).await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(transport.sent(), vec![ParameterSet::off(1).command_url("10.1.1.5")]);
        let published = attributes.borrow_and_update().clone();
        assert_eq!(published.switch, SwitchState::Off);
        assert!(published.verification.starts_with("VERIFIED"));
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_command_surfaces_error() {
        let transport = FakeTransport::reporting("[]");
        let engine = ZoneEngine::new(&config(true), ZoneContext::default());
        let (zone, _) = spawn_zone(engine, transport, None);

        let err = zone
            .command(ZoneCommand::ApplyPattern("missing".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, HandleError::Command(CommandError::Pattern(_))));

        let view = zone.view().await.unwrap();
        assert_eq!(view.attributes.last_status, "no pattern named 'missing'");
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_publishes_observed_state() {
        let transport =
            FakeTransport::reporting(r#"[{"num":1,"pattern":"twinkle","enabled":"true"}]"#);
        let engine = ZoneEngine::new(&config(true), ZoneContext::default());
        let (zone, mut attributes) = spawn_zone(engine, transport, None);

        zone.command(ZoneCommand::Refresh).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let published = attributes.borrow_and_update().clone();
        assert_eq!(published.switch, SwitchState::On);
        assert_eq!(published.pattern, "twinkle");
    }
}
