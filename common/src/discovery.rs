use serde::{Deserialize, Serialize};

use crate::config::normalize_subnet;

pub const FIRST_HOST: u8 = 1;
pub const LAST_HOST: u8 = 254;

/// Hub subnet first, then the user's, then the fallbacks; invalid entries and
/// repeats are dropped without disturbing that precedence.
pub fn candidate_subnets(
    hub_subnet: Option<&str>,
    user_subnet: Option<&str>,
    fallback: &[String],
) -> Vec<String> {
    let mut subnets: Vec<String> = Vec::new();
    let ordered = hub_subnet
        .into_iter()
        .chain(user_subnet)
        .chain(fallback.iter().map(String::as_str));
    for raw in ordered {
        if let Some(subnet) = normalize_subnet(raw) {
            if !subnets.contains(&subnet) {
                subnets.push(subnet);
            }
        }
    }
    subnets
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastProbe {
    pub address: String,
    pub started_at_ms: u64,
    pub seq: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoverySession {
    pub subnets: Vec<String>,
    pub subnet_index: usize,
    pub host_index: u8,
    pub stopped: bool,
    pub last_probe: Option<LastProbe>,
}

impl DiscoverySession {
    fn current_address(&self) -> Option<String> {
        self.subnets
            .get(self.subnet_index)
            .map(|subnet| format!("{subnet}.{}", self.host_index))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryOutcome {
    Found(String),
    NotFound,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanStep {
    /// Late callback for a probe that already lost its race, or a scan that
    /// is no longer running.
    Ignored,
    Probe { address: String, seq: u64 },
    Finished(DiscoveryOutcome),
}

/// Sequential host-by-host scanner. Each probe gets a sequence number; the
/// probe's response and its safety-net timer both report against it, and
/// whichever arrives second finds the number already retired.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DiscoveryScanner {
    session: Option<DiscoverySession>,
    next_seq: u64,
    last_outcome: Option<DiscoveryOutcome>,
}

impl DiscoveryScanner {
    pub fn session(&self) -> Option<&DiscoverySession> {
        self.session.as_ref()
    }

    pub fn is_scanning(&self) -> bool {
        self.session.as_ref().is_some_and(|session| !session.stopped)
    }

    pub fn status_line(&self) -> String {
        if let Some(probe) = self.session.as_ref().and_then(|s| s.last_probe.as_ref()) {
            return format!("scanning {}", probe.address);
        }
        match &self.last_outcome {
            Some(DiscoveryOutcome::Found(address)) => format!("found {address}"),
            Some(DiscoveryOutcome::NotFound) => "not found".to_string(),
            Some(DiscoveryOutcome::Stopped) => "stopped".to_string(),
            None => "idle".to_string(),
        }
    }

    pub fn start(&mut self, subnets: Vec<String>, now_ms: u64) -> ScanStep {
        self.session = Some(DiscoverySession {
            subnets,
            subnet_index: 0,
            host_index: FIRST_HOST,
            stopped: false,
            last_probe: None,
        });
        self.last_outcome = None;
        self.issue_probe(now_ms)
    }

    /// Re-issue the probe for the recorded position, e.g. after a restart
    /// dropped the in-flight request.
    pub fn resume(&mut self, now_ms: u64) -> ScanStep {
        if !self.is_scanning() {
            self.session = None;
            return ScanStep::Ignored;
        }
        self.issue_probe(now_ms)
    }

    pub fn on_response(&mut self, seq: u64, found: bool, now_ms: u64) -> ScanStep {
        let Some(address) = self.claim_probe(seq) else {
            return ScanStep::Ignored;
        };
        if found {
            self.session = None;
            let outcome = DiscoveryOutcome::Found(address);
            self.last_outcome = Some(outcome.clone());
            return ScanStep::Finished(outcome);
        }
        self.advance(now_ms)
    }

    pub fn on_safety_net(&mut self, seq: u64, now_ms: u64) -> ScanStep {
        if self.claim_probe(seq).is_none() {
            return ScanStep::Ignored;
        }
        self.advance(now_ms)
    }

    /// Flags the running session as stopped. The flagged session is dropped by
    /// whichever step touches it next. Returns `false` when nothing was running.
    pub fn stop(&mut self) -> bool {
        let Some(session) = self.session.as_mut().filter(|session| !session.stopped) else {
            return false;
        };
        session.stopped = true;
        session.last_probe = None;
        self.last_outcome = Some(DiscoveryOutcome::Stopped);
        true
    }

    fn claim_probe(&mut self, seq: u64) -> Option<String> {
        if self.session.as_ref().is_some_and(|session| session.stopped) {
            self.session = None;
        }
        let session = self.session.as_mut()?;
        let probe = session.last_probe.as_ref().filter(|probe| probe.seq == seq)?;
        let address = probe.address.clone();
        session.last_probe = None;
        Some(address)
    }

    fn advance(&mut self, now_ms: u64) -> ScanStep {
        let Some(session) = self.session.as_mut() else {
            return ScanStep::Ignored;
        };
        if session.host_index >= LAST_HOST {
            session.host_index = FIRST_HOST;
            session.subnet_index += 1;
        } else {
            session.host_index += 1;
        }
        self.issue_probe(now_ms)
    }

    fn issue_probe(&mut self, now_ms: u64) -> ScanStep {
        if self.session.as_ref().is_some_and(|session| session.stopped) {
            self.session = None;
        }
        let Some(session) = self.session.as_mut() else {
            return ScanStep::Ignored;
        };
        let Some(address) = session.current_address() else {
            self.session = None;
            self.last_outcome = Some(DiscoveryOutcome::NotFound);
            return ScanStep::Finished(DiscoveryOutcome::NotFound);
        };

        self.next_seq = self.next_seq.wrapping_add(1);
        session.last_probe = Some(LastProbe {
            address: address.clone(),
            started_at_ms: now_ms,
            seq: self.next_seq,
        });
        ScanStep::Probe {
            address,
            seq: self.next_seq,
        }
    }
}
