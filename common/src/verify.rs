use serde::{Deserialize, Serialize};

use crate::{
    config::VerificationConfig,
    dispatch::PatternFollowUp,
    error::TransportError,
    types::{ParameterSet, ZoneObservation, OFF_PATTERN},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationState {
    #[default]
    Idle,
    Pending,
    Verified,
    Failed,
    TimedOut,
    Error,
}

impl VerificationState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Pending => "PENDING",
            Self::Verified => "VERIFIED",
            Self::Failed => "FAILED",
            Self::TimedOut => "TIMED_OUT",
            Self::Error => "ERROR",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpectedState {
    pub pattern_type: String,
    pub is_off: bool,
}

impl ExpectedState {
    pub fn from_parameters(params: &ParameterSet) -> Self {
        Self {
            pattern_type: params.pattern_type.clone(),
            is_off: params.is_off(),
        }
    }

    /// The controller only reports the running pattern's name, so anything
    /// that is not off counts as a match for an "on" command.
    pub fn matches(&self, observed: &ZoneObservation) -> bool {
        let observed_off =
            observed.pattern_name.eq_ignore_ascii_case(OFF_PATTERN) || !observed.is_on;
        if self.is_off {
            observed_off
        } else {
            !observed_off
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationSession {
    pub id: u64,
    pub command_url: String,
    pub expected: ExpectedState,
    pub attempt: u32,
    pub started_at_ms: u64,
    #[serde(default)]
    pub follow_up: Option<PatternFollowUp>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum VerifyStep {
    /// Stale timer or probe result for a session that no longer exists.
    Ignored,
    /// Issue a status probe now.
    Probe,
    /// Probe again after `delay_ms`.
    Retry { delay_ms: u64 },
    Verified {
        observed: ZoneObservation,
        follow_up: Option<PatternFollowUp>,
    },
    Failed { attempts: u32 },
    TimedOut { elapsed_ms: u64 },
    Error { attempts: u32, reason: String },
}

/// Post-send confirmation loop for one zone. At most one session exists; a
/// new `start` replaces any session still pending.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Verifier {
    session: Option<VerificationSession>,
    state: VerificationState,
    next_id: u64,
    detail: String,
}

impl Verifier {
    pub fn state(&self) -> VerificationState {
        self.state
    }

    pub fn session(&self) -> Option<&VerificationSession> {
        self.session.as_ref()
    }

    pub fn status_line(&self) -> String {
        if self.detail.is_empty() {
            self.state.as_str().to_string()
        } else {
            format!("{} ({})", self.state.as_str(), self.detail)
        }
    }

    pub fn start(
        &mut self,
        command_url: String,
        expected: ExpectedState,
        follow_up: Option<PatternFollowUp>,
        now_ms: u64,
    ) -> u64 {
        self.next_id = self.next_id.wrapping_add(1);
        self.session = Some(VerificationSession {
            id: self.next_id,
            command_url,
            expected,
            attempt: 0,
            started_at_ms: now_ms,
            follow_up,
        });
        self.state = VerificationState::Pending;
        self.detail.clear();
        self.next_id
    }

    /// Forget bookkeeping without reporting an outcome; used when a newer
    /// command supersedes the one being verified.
    pub fn cancel(&mut self) {
        if self.session.take().is_some() {
            self.state = VerificationState::Idle;
            self.detail = "superseded".to_string();
        }
    }

    pub fn on_timer(&mut self, token: u64, now_ms: u64, config: &VerificationConfig) -> VerifyStep {
        let Some(session) = self.current(token) else {
            return VerifyStep::Ignored;
        };
        let elapsed_ms = now_ms.saturating_sub(session.started_at_ms);
        if elapsed_ms > config.timeout_ms {
            return self.finish_timed_out(elapsed_ms);
        }
        VerifyStep::Probe
    }

    pub fn on_probe(
        &mut self,
        token: u64,
        result: Result<ZoneObservation, TransportError>,
        now_ms: u64,
        config: &VerificationConfig,
    ) -> VerifyStep {
        let Some(session) = self.session.as_mut().filter(|session| session.id == token) else {
            return VerifyStep::Ignored;
        };
        session.attempt = session.attempt.saturating_add(1);
        let attempt = session.attempt;
        let elapsed_ms = now_ms.saturating_sub(session.started_at_ms);

        let error = match result {
            Ok(observed) if session.expected.matches(&observed) => {
                let follow_up = session.follow_up.clone();
                self.session = None;
                self.state = VerificationState::Verified;
                self.detail = format!("attempt {attempt}");
                return VerifyStep::Verified {
                    observed,
                    follow_up,
                };
            }
            Ok(_) => None,
            Err(err) => Some(err.to_string()),
        };

        if elapsed_ms > config.timeout_ms {
            return self.finish_timed_out(elapsed_ms);
        }

        if attempt >= config.max_retries {
            self.session = None;
            return match error {
                Some(reason) => {
                    self.state = VerificationState::Error;
                    self.detail = reason.clone();
                    VerifyStep::Error {
                        attempts: attempt,
                        reason,
                    }
                }
                None => {
                    self.state = VerificationState::Failed;
                    self.detail = format!("{attempt} attempts");
                    VerifyStep::Failed { attempts: attempt }
                }
            };
        }

        self.detail = format!("attempt {attempt}/{}", config.max_retries);
        VerifyStep::Retry {
            delay_ms: config.retry_delay_ms,
        }
    }

    fn current(&self, token: u64) -> Option<&VerificationSession> {
        self.session.as_ref().filter(|session| session.id == token)
    }

    fn finish_timed_out(&mut self, elapsed_ms: u64) -> VerifyStep {
        self.session = None;
        self.state = VerificationState::TimedOut;
        self.detail = format!("{elapsed_ms} ms");
        VerifyStep::TimedOut { elapsed_ms }
    }
}
