use serde::{Deserialize, Serialize};

/// Follow-up registered when a named pattern is submitted; runs once the
/// controller acknowledges the send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternFollowUp {
    pub name: String,
    pub pattern_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingCommand {
    pub url: String,
    pub scheduled_at_ms: u64,
    pub token: u64,
    #[serde(default)]
    pub follow_up: Option<PatternFollowUp>,
}

/// Single-slot debounce buffer. Each submission mints a new token and
/// replaces whatever was waiting, so only the newest command can ever fire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DebounceBuffer {
    pending: Option<PendingCommand>,
    in_flight: Option<PendingCommand>,
    next_token: u64,
}

impl DebounceBuffer {
    pub fn submit(&mut self, url: String, follow_up: Option<PatternFollowUp>, now_ms: u64) -> u64 {
        self.next_token = self.next_token.wrapping_add(1);
        self.pending = Some(PendingCommand {
            url,
            scheduled_at_ms: now_ms,
            token: self.next_token,
            follow_up,
        });
        self.next_token
    }

    pub fn pending(&self) -> Option<&PendingCommand> {
        self.pending.as_ref()
    }

    /// Take the pending command if `token` still identifies it. A stale timer
    /// (superseded or already fired) gets `None`.
    pub fn fire(&mut self, token: u64) -> Option<PendingCommand> {
        if self.pending.as_ref().map(|pending| pending.token) != Some(token) {
            return None;
        }
        let command = self.pending.take()?;
        self.in_flight = Some(command.clone());
        Some(command)
    }

    /// Match a send completion to the command that is still in flight.
    pub fn complete(&mut self, token: u64) -> Option<PendingCommand> {
        if self.in_flight.as_ref().map(|command| command.token) != Some(token) {
            return None;
        }
        self.in_flight.take()
    }

    /// Drop anything a previous process left in flight; its reply is lost.
    pub fn forget_in_flight(&mut self) {
        self.in_flight = None;
    }
}
