use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};

use crate::{
    config::{DiscoveryConfig, DriverSettings, RuntimeConfig, VerificationConfig},
    discovery::{candidate_subnets, DiscoveryOutcome, DiscoveryScanner, ScanStep},
    dispatch::{DebounceBuffer, PatternFollowUp},
    error::{CommandError, PatternError, TransportError},
    patterns::{self, CaptureOutcome, PatternStore},
    types::{ParameterSet, SwitchState, ZoneAttributes, ZoneObservation},
    verify::{ExpectedState, VerifyStep, Verifier},
    wire::{self, ResponseBody},
};

pub const DRIVER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimerKey {
    Debounce,
    VerifyRetry,
    Poll,
    DiscoverySafetyNet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPurpose {
    Verify { session: u64 },
    Poll,
    Refresh,
    Capture,
    Discovery { seq: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ZoneAction {
    Schedule {
        key: TimerKey,
        token: u64,
        delay_ms: u64,
    },
    Cancel(TimerKey),
    FetchStatus {
        purpose: FetchPurpose,
        address: String,
        timeout_ms: u64,
    },
    SendCommand {
        token: u64,
        url: String,
        timeout_ms: u64,
    },
    Persist,
    Publish,
}

/// Everything one zone instance keeps between invocations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneContext {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub patterns: PatternStore,
    #[serde(default)]
    pub last_pattern: Option<String>,
    // Session layouts differ between driver versions. An unreadable session
    // loads as empty so the rest of the snapshot survives to be migrated.
    #[serde(default, deserialize_with = "or_default")]
    pub debounce: DebounceBuffer,
    #[serde(default, deserialize_with = "or_default")]
    pub verification: Verifier,
    #[serde(default, deserialize_with = "or_default")]
    pub discovery: DiscoveryScanner,
    #[serde(default)]
    pub controller_address: Option<String>,
    #[serde(default, deserialize_with = "or_default")]
    pub attributes: ZoneAttributes,
}

fn or_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

impl Default for ZoneContext {
    fn default() -> Self {
        Self {
            version: DRIVER_VERSION.to_string(),
            patterns: PatternStore::default(),
            last_pattern: None,
            debounce: DebounceBuffer::default(),
            verification: Verifier::default(),
            discovery: DiscoveryScanner::default(),
            controller_address: None,
            attributes: ZoneAttributes::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ZoneEngine {
    settings: DriverSettings,
    verification: VerificationConfig,
    discovery: DiscoveryConfig,
    context: ZoneContext,
    poll_generation: u64,
}

impl ZoneEngine {
    pub fn new(config: &RuntimeConfig, mut context: ZoneContext) -> Self {
        let mut config = config.clone();
        config.sanitize();

        if context.version != DRIVER_VERSION {
            // Session layouts may have changed; patterns are kept.
            context = ZoneContext {
                patterns: context.patterns,
                last_pattern: context.last_pattern,
                controller_address: context.controller_address,
                attributes: context.attributes,
                ..ZoneContext::default()
            };
        }
        if let Some(address) = config.driver.controller_address.clone() {
            context.controller_address = Some(address);
        }

        Self {
            settings: config.driver,
            verification: config.verification,
            discovery: config.discovery,
            context,
            poll_generation: 0,
        }
    }

    pub fn context(&self) -> &ZoneContext {
        &self.context
    }

    pub fn settings(&self) -> &DriverSettings {
        &self.settings
    }

    pub fn attributes(&self) -> &ZoneAttributes {
        &self.context.attributes
    }

    pub fn pattern_names(&self) -> Vec<String> {
        self.context.patterns.list_names()
    }

    /// Re-arm whatever the previous process left behind.
    pub fn resume(&mut self, now_ms: u64) -> Vec<ZoneAction> {
        let mut actions = Vec::new();

        self.context.debounce.forget_in_flight();
        if let Some(pending) = self.context.debounce.pending() {
            actions.push(ZoneAction::Schedule {
                key: TimerKey::Debounce,
                token: pending.token,
                delay_ms: 0,
            });
        }

        if let Some(session) = self.context.verification.session() {
            actions.push(ZoneAction::Schedule {
                key: TimerKey::VerifyRetry,
                token: session.id,
                delay_ms: 0,
            });
        }

        let step = self.context.discovery.resume(now_ms);
        self.handle_scan_step(step, now_ms, &mut actions);

        actions.extend(self.restart_polling());
        self.touch(now_ms, &mut actions);
        actions
    }

    pub fn update_settings(&mut self, mut settings: DriverSettings, now_ms: u64) -> Vec<ZoneAction> {
        settings.sanitize();
        if let Some(address) = settings.controller_address.clone() {
            self.context.controller_address = Some(address);
        }
        self.settings = settings;

        let mut actions = self.restart_polling();
        self.touch(now_ms, &mut actions);
        actions
    }

    pub fn power_on(&mut self, now_ms: u64) -> Result<Vec<ZoneAction>, CommandError> {
        let patterns = &self.context.patterns;
        let name = self
            .context
            .last_pattern
            .as_deref()
            .filter(|name| patterns.get(name).is_some())
            .or_else(|| patterns.first().map(|pattern| pattern.name.as_str()))
            .map(str::to_string)
            .ok_or(CommandError::NoPatterns)?;
        self.apply_pattern(&name, now_ms)
    }

    pub fn power_off(&mut self, now_ms: u64) -> Result<Vec<ZoneAction>, CommandError> {
        let address = self.address()?;
        let params = ParameterSet::off(self.settings.zone);
        params.validate()?;
        Ok(self.submit(params.command_url(&address), None, now_ms))
    }

    pub fn apply_pattern(&mut self, name: &str, now_ms: u64) -> Result<Vec<ZoneAction>, CommandError> {
        let address = self.address()?;
        let params = self.context.patterns.resolve(
            name,
            self.settings.zone,
            &self.settings.spotlight_plan,
            self.settings.max_leds as usize,
        )?;

        let follow_up = self.verification.enabled.then(|| PatternFollowUp {
            name: name.to_string(),
            pattern_type: params.pattern_type.clone(),
        });
        self.context.last_pattern = Some(name.to_string());
        Ok(self.submit(params.command_url(&address), follow_up, now_ms))
    }

    pub fn capture(&mut self) -> Result<Vec<ZoneAction>, CommandError> {
        let address = self.address()?;
        Ok(vec![self.fetch(FetchPurpose::Capture, address)])
    }

    pub fn refresh(&mut self) -> Result<Vec<ZoneAction>, CommandError> {
        let address = self.address()?;
        Ok(vec![self.fetch(FetchPurpose::Refresh, address)])
    }

    pub fn rename_pattern(
        &mut self,
        old_name: &str,
        new_name: &str,
        now_ms: u64,
    ) -> Result<Vec<ZoneAction>, CommandError> {
        if !self.context.patterns.rename(old_name, new_name)? {
            return Ok(Vec::new());
        }
        if self.context.last_pattern.as_deref() == Some(old_name) {
            self.context.last_pattern = Some(new_name.trim().to_string());
        }
        let mut actions = Vec::new();
        self.set_status(format!("renamed '{old_name}' to '{}'", new_name.trim()), now_ms, &mut actions);
        Ok(actions)
    }

    pub fn delete_pattern(&mut self, name: &str, now_ms: u64) -> Result<Vec<ZoneAction>, CommandError> {
        if self.context.patterns.delete(name).is_none() {
            return Err(PatternError::NotFound(name.to_string()).into());
        }
        if self.context.last_pattern.as_deref() == Some(name) {
            self.context.last_pattern = None;
        }
        let mut actions = Vec::new();
        self.set_status(format!("deleted pattern '{name}'"), now_ms, &mut actions);
        Ok(actions)
    }

    pub fn load_predefined(&mut self, now_ms: u64) -> Result<Vec<ZoneAction>, CommandError> {
        let mut loaded = 0;
        for (name, params) in patterns::predefined(self.settings.zone) {
            if let CaptureOutcome::Inserted(_) = self.context.patterns.load_predefined(name, params)? {
                loaded += 1;
            }
        }
        let mut actions = Vec::new();
        self.set_status(format!("loaded {loaded} predefined patterns"), now_ms, &mut actions);
        Ok(actions)
    }

    pub fn start_discovery(
        &mut self,
        hub_subnet: Option<&str>,
        now_ms: u64,
    ) -> Result<Vec<ZoneAction>, CommandError> {
        if self.context.discovery.is_scanning() {
            return Err(CommandError::Busy("discovery"));
        }
        let subnets = candidate_subnets(
            hub_subnet,
            self.settings.user_subnet.as_deref(),
            &self.discovery.fallback_subnets,
        );
        let step = self.context.discovery.start(subnets, now_ms);
        let mut actions = Vec::new();
        self.handle_scan_step(step, now_ms, &mut actions);
        self.touch(now_ms, &mut actions);
        Ok(actions)
    }

    pub fn stop_discovery(&mut self, now_ms: u64) -> Vec<ZoneAction> {
        let mut actions = vec![ZoneAction::Cancel(TimerKey::DiscoverySafetyNet)];
        let status = if self.context.discovery.stop() {
            "discovery stopped"
        } else {
            "discovery was not running"
        };
        self.set_status(status.to_string(), now_ms, &mut actions);
        actions
    }

    /// Record a rejected command so it shows up in the published status.
    pub fn report_error(&mut self, err: &CommandError, now_ms: u64) -> Vec<ZoneAction> {
        let mut actions = Vec::new();
        self.set_status(err.to_string(), now_ms, &mut actions);
        actions
    }

    pub fn on_timer(&mut self, key: TimerKey, token: u64, now_ms: u64) -> Vec<ZoneAction> {
        let mut actions = Vec::new();
        match key {
            TimerKey::Debounce => {
                let Some(command) = self.context.debounce.fire(token) else {
                    return actions;
                };
                // A new send makes any earlier verification meaningless.
                self.context.verification.cancel();
                actions.push(ZoneAction::Cancel(TimerKey::VerifyRetry));
                actions.push(ZoneAction::SendCommand {
                    token: command.token,
                    url: command.url,
                    timeout_ms: self.settings.command_timeout_ms,
                });
                actions.push(ZoneAction::Persist);
            }
            TimerKey::VerifyRetry => {
                let step = self.context.verification.on_timer(token, now_ms, &self.verification);
                self.handle_verify_step(token, step, now_ms, &mut actions);
            }
            TimerKey::Poll => {
                if token != self.poll_generation || !self.settings.auto_poll {
                    return actions;
                }
                match self.context.controller_address.clone() {
                    Some(address) => actions.push(self.fetch(FetchPurpose::Poll, address)),
                    None => actions.extend(self.schedule_poll()),
                }
            }
            TimerKey::DiscoverySafetyNet => {
                let step = self.context.discovery.on_safety_net(token, now_ms);
                self.handle_scan_step(step, now_ms, &mut actions);
            }
        }
        actions
    }

    pub fn on_command_sent(
        &mut self,
        token: u64,
        result: Result<(), TransportError>,
        now_ms: u64,
    ) -> Vec<ZoneAction> {
        let mut actions = Vec::new();
        let Some(command) = self.context.debounce.complete(token) else {
            return actions;
        };

        if let Err(err) = result {
            self.set_status(format!("command failed: {err}"), now_ms, &mut actions);
            return actions;
        }

        let params = ParameterSet::from_command_url(&command.url).ok();
        let expected = params.as_ref().map(ExpectedState::from_parameters);

        match (command.follow_up, expected) {
            (Some(follow_up), Some(expected)) => {
                let label = follow_up.name.clone();
                self.begin_verification(command.url, expected, Some(follow_up), now_ms, &mut actions);
                self.set_status(format!("sent '{label}', verifying"), now_ms, &mut actions);
            }
            (None, Some(expected)) if self.verification.enabled => {
                self.begin_verification(command.url, expected, None, now_ms, &mut actions);
                self.set_status("command sent, verifying".to_string(), now_ms, &mut actions);
            }
            _ => {
                if let Some(params) = params {
                    self.context.attributes.switch = SwitchState::from_on(!params.is_off());
                    self.context.attributes.pattern = params.pattern_type;
                }
                self.set_status("command sent".to_string(), now_ms, &mut actions);
            }
        }
        actions
    }

    pub fn on_status(
        &mut self,
        purpose: FetchPurpose,
        result: Result<ResponseBody, TransportError>,
        now_ms: u64,
    ) -> Vec<ZoneAction> {
        let mut actions = Vec::new();
        let zone = self.settings.zone;

        match purpose {
            FetchPurpose::Verify { session } => {
                let observed = result
                    .and_then(|body| wire::find_zone(body, zone))
                    .map(|status| status.observation());
                let step = self
                    .context
                    .verification
                    .on_probe(session, observed, now_ms, &self.verification);
                self.handle_verify_step(session, step, now_ms, &mut actions);
            }
            FetchPurpose::Poll | FetchPurpose::Refresh => {
                match result.and_then(|body| wire::find_zone(body, zone)) {
                    Ok(status) => {
                        self.apply_observation(&status.observation());
                        self.set_status("status refreshed".to_string(), now_ms, &mut actions);
                    }
                    Err(err) => {
                        self.set_status(format!("status fetch failed: {err}"), now_ms, &mut actions)
                    }
                }
                if purpose == FetchPurpose::Poll {
                    actions.extend(self.schedule_poll());
                }
            }
            FetchPurpose::Capture => {
                let status = match result.and_then(|body| wire::find_zone(body, zone)) {
                    Ok(status) => status,
                    Err(err) => {
                        self.set_status(format!("capture failed: {err}"), now_ms, &mut actions);
                        return actions;
                    }
                };
                let observation = status.observation();
                let captured = status
                    .parameters(zone)
                    .map_err(PatternError::from)
                    .and_then(|params| self.context.patterns.capture(&observation, params));
                let message = match captured {
                    Ok(outcome) => {
                        let name = self.context.patterns.slots()[outcome.slot()]
                            .as_ref()
                            .map(|pattern| pattern.name.clone())
                            .unwrap_or_default();
                        match outcome {
                            CaptureOutcome::Inserted(_) => format!("captured new pattern '{name}'"),
                            CaptureOutcome::Updated(_) => format!("updated pattern '{name}'"),
                        }
                    }
                    Err(err) => format!("capture failed: {err}"),
                };
                self.apply_observation(&observation);
                self.set_status(message, now_ms, &mut actions);
            }
            FetchPurpose::Discovery { seq } => {
                let found = result.map(wire::looks_like_controller).unwrap_or(false);
                let step = self.context.discovery.on_response(seq, found, now_ms);
                self.handle_scan_step(step, now_ms, &mut actions);
            }
        }
        actions
    }

    fn submit(&mut self, url: String, follow_up: Option<PatternFollowUp>, now_ms: u64) -> Vec<ZoneAction> {
        let token = self.context.debounce.submit(url, follow_up, now_ms);
        vec![
            ZoneAction::Cancel(TimerKey::Debounce),
            ZoneAction::Schedule {
                key: TimerKey::Debounce,
                token,
                delay_ms: self.settings.debounce_ms,
            },
            ZoneAction::Persist,
        ]
    }

    fn begin_verification(
        &mut self,
        url: String,
        expected: ExpectedState,
        follow_up: Option<PatternFollowUp>,
        now_ms: u64,
        actions: &mut Vec<ZoneAction>,
    ) {
        let session = self.context.verification.start(url, expected, follow_up, now_ms);
        actions.push(ZoneAction::Schedule {
            key: TimerKey::VerifyRetry,
            token: session,
            delay_ms: self.verification.retry_delay_ms,
        });
    }

    fn handle_verify_step(&mut self, session: u64, step: VerifyStep, now_ms: u64, actions: &mut Vec<ZoneAction>) {
        match step {
            VerifyStep::Ignored => {}
            VerifyStep::Probe => match self.context.controller_address.clone() {
                Some(address) => actions.push(self.fetch(FetchPurpose::Verify { session }, address)),
                None => {
                    let step = self.context.verification.on_probe(
                        session,
                        Err(TransportError::Connect {
                            address: String::new(),
                            reason: "no controller address".to_string(),
                        }),
                        now_ms,
                        &self.verification,
                    );
                    self.handle_verify_step(session, step, now_ms, actions);
                }
            },
            VerifyStep::Retry { delay_ms } => {
                actions.push(ZoneAction::Schedule {
                    key: TimerKey::VerifyRetry,
                    token: session,
                    delay_ms,
                });
                self.touch(now_ms, actions);
            }
            VerifyStep::Verified { observed, follow_up } => {
                self.apply_observation(&observed);
                let message = match follow_up {
                    Some(follow_up) => format!("verified '{}'", follow_up.name),
                    None => "command verified".to_string(),
                };
                self.set_status(message, now_ms, actions);
            }
            VerifyStep::Failed { attempts } => {
                self.set_status(
                    format!("verification failed after {attempts} attempts"),
                    now_ms,
                    actions,
                );
            }
            VerifyStep::TimedOut { elapsed_ms } => {
                self.set_status(
                    format!("verification timed out after {elapsed_ms} ms"),
                    now_ms,
                    actions,
                );
            }
            VerifyStep::Error { reason, .. } => {
                self.set_status(format!("verification error: {reason}"), now_ms, actions);
            }
        }
    }

    fn handle_scan_step(&mut self, step: ScanStep, now_ms: u64, actions: &mut Vec<ZoneAction>) {
        match step {
            ScanStep::Ignored => {}
            ScanStep::Probe { address, seq } => {
                actions.push(ZoneAction::FetchStatus {
                    purpose: FetchPurpose::Discovery { seq },
                    address,
                    timeout_ms: self.discovery.probe_timeout_ms,
                });
                actions.push(ZoneAction::Schedule {
                    key: TimerKey::DiscoverySafetyNet,
                    token: seq,
                    delay_ms: self
                        .discovery
                        .probe_timeout_ms
                        .saturating_add(self.discovery.safety_margin_ms),
                });
                actions.push(ZoneAction::Persist);
            }
            ScanStep::Finished(DiscoveryOutcome::Found(address)) => {
                actions.push(ZoneAction::Cancel(TimerKey::DiscoverySafetyNet));
                self.context.controller_address = Some(address.clone());
                actions.extend(self.restart_polling());
                self.set_status(format!("controller found at {address}"), now_ms, actions);
            }
            ScanStep::Finished(outcome) => {
                actions.push(ZoneAction::Cancel(TimerKey::DiscoverySafetyNet));
                let message = match outcome {
                    DiscoveryOutcome::Stopped => "discovery stopped",
                    _ => "controller not found on any candidate subnet",
                };
                self.set_status(message.to_string(), now_ms, actions);
            }
        }
    }

    fn apply_observation(&mut self, observed: &ZoneObservation) {
        let attributes = &mut self.context.attributes;
        attributes.switch = SwitchState::from_on(observed.is_on);
        attributes.pattern = observed.pattern_name.clone();
        attributes.matched_pattern = self
            .context
            .patterns
            .matching_type(&observed.pattern_name)
            .map(|pattern| pattern.name.clone());
    }

    fn restart_polling(&mut self) -> Vec<ZoneAction> {
        self.poll_generation = self.poll_generation.wrapping_add(1);
        if !self.settings.auto_poll {
            return vec![ZoneAction::Cancel(TimerKey::Poll)];
        }
        self.schedule_poll()
    }

    fn schedule_poll(&self) -> Vec<ZoneAction> {
        if !self.settings.auto_poll {
            return Vec::new();
        }
        vec![ZoneAction::Schedule {
            key: TimerKey::Poll,
            token: self.poll_generation,
            delay_ms: self.settings.poll_interval_secs.saturating_mul(1_000),
        }]
    }

    fn fetch(&self, purpose: FetchPurpose, address: String) -> ZoneAction {
        ZoneAction::FetchStatus {
            purpose,
            address,
            timeout_ms: self.settings.command_timeout_ms,
        }
    }

    fn address(&self) -> Result<String, CommandError> {
        self.context
            .controller_address
            .clone()
            .ok_or(CommandError::NoController)
    }

    fn set_status(&mut self, message: String, now_ms: u64, actions: &mut Vec<ZoneAction>) {
        self.context.attributes.last_status = message;
        self.touch(now_ms, actions);
    }

    /// Refresh derived attributes and ask the host to persist and publish.
    fn touch(&mut self, now_ms: u64, actions: &mut Vec<ZoneAction>) {
        let attributes = &mut self.context.attributes;
        attributes.verification = self.context.verification.status_line();
        attributes.discovery = self.context.discovery.status_line();
        attributes.controller_address = self.context.controller_address.clone();
        attributes.last_pattern = self.context.last_pattern.clone();
        attributes.updated_at_ms = now_ms;

        if !actions.contains(&ZoneAction::Persist) {
            actions.push(ZoneAction::Persist);
        }
        if !actions.contains(&ZoneAction::Publish) {
            actions.push(ZoneAction::Publish);
        }
    }
}
