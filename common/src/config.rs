use serde::{Deserialize, Serialize};

use crate::types::{MAX_ZONE, MIN_ZONE};

pub const MIN_POLL_INTERVAL_SECS: u64 = 5;
pub const MAX_POLL_INTERVAL_SECS: u64 = 86_400;

pub const DEFAULT_FALLBACK_SUBNETS: [&str; 6] = [
    "192.168.1",
    "192.168.0",
    "10.0.0",
    "10.0.1",
    "192.168.2",
    "172.16.0",
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DriverSettings {
    pub controller_address: Option<String>,
    pub zone: u8,
    pub max_leds: u32,
    pub spotlight_plan: String,
    pub user_subnet: Option<String>,
    pub auto_poll: bool,
    pub poll_interval_secs: u64,
    pub debounce_ms: u64,
    pub command_timeout_ms: u64,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            controller_address: None,
            zone: 1,
            max_leds: 100,
            spotlight_plan: "1".to_string(),
            user_subnet: None,
            auto_poll: true,
            poll_interval_secs: 300,
            debounce_ms: 1_000,
            command_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VerificationConfig {
    pub enabled: bool,
    pub max_retries: u32,
    pub timeout_ms: u64,
    pub retry_delay_ms: u64,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 3,
            timeout_ms: 30_000,
            retry_delay_ms: 3_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub probe_timeout_ms: u64,
    pub safety_margin_ms: u64,
    pub fallback_subnets: Vec<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            probe_timeout_ms: 1_500,
            safety_margin_ms: 1_000,
            fallback_subnets: DEFAULT_FALLBACK_SUBNETS
                .iter()
                .map(|subnet| subnet.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
    pub http_port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            mqtt_host: "192.168.1.100".to_string(),
            mqtt_port: 1883,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
            http_port: 8080,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub driver: DriverSettings,
    #[serde(default)]
    pub verification: VerificationConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub network: NetworkConfig,
}

impl RuntimeConfig {
    pub fn sanitize(&mut self) {
        self.driver.sanitize();
        self.verification.sanitize();
        self.discovery.sanitize();
    }
}

impl DriverSettings {
    pub fn sanitize(&mut self) {
        self.zone = self.zone.clamp(MIN_ZONE, MAX_ZONE);
        self.max_leds = self.max_leds.clamp(1, 2_000);
        self.poll_interval_secs = self
            .poll_interval_secs
            .clamp(MIN_POLL_INTERVAL_SECS, MAX_POLL_INTERVAL_SECS);
        self.debounce_ms = self.debounce_ms.clamp(100, 10_000);
        self.command_timeout_ms = self.command_timeout_ms.clamp(1_000, 60_000);

        self.controller_address = self
            .controller_address
            .take()
            .map(|address| address.trim().to_string())
            .filter(|address| !address.is_empty());
        self.user_subnet = self
            .user_subnet
            .take()
            .and_then(|subnet| normalize_subnet(&subnet));
    }
}

impl VerificationConfig {
    pub fn sanitize(&mut self) {
        self.max_retries = self.max_retries.clamp(1, 20);
        self.retry_delay_ms = self.retry_delay_ms.clamp(250, 60_000);
        if self.timeout_ms < self.retry_delay_ms {
            self.timeout_ms = self.retry_delay_ms;
        }
    }
}

impl DiscoveryConfig {
    pub fn sanitize(&mut self) {
        self.probe_timeout_ms = self.probe_timeout_ms.clamp(200, 10_000);
        self.safety_margin_ms = self.safety_margin_ms.clamp(100, 10_000);
        self.fallback_subnets = self
            .fallback_subnets
            .iter()
            .filter_map(|subnet| normalize_subnet(subnet))
            .collect();
    }
}

/// Accepts `a.b.c`, `a.b.c.`, `a.b.c.d` or `a.b.c.0/24` and returns the first
/// three octets.
pub fn normalize_subnet(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_end_matches('.');
    let without_mask = trimmed.split('/').next().unwrap_or(trimmed);
    let octets = without_mask
        .split('.')
        .map(|octet| octet.trim().parse::<u8>().ok())
        .collect::<Option<Vec<_>>>()?;
    match octets.len() {
        3 | 4 => Some(format!("{}.{}.{}", octets[0], octets[1], octets[2])),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subnet_forms_normalise() {
        assert_eq!(normalize_subnet("10.0.0").as_deref(), Some("10.0.0"));
        assert_eq!(normalize_subnet(" 10.0.0. ").as_deref(), Some("10.0.0"));
        assert_eq!(normalize_subnet("192.168.4.17").as_deref(), Some("192.168.4"));
        assert_eq!(normalize_subnet("192.168.4.0/24").as_deref(), Some("192.168.4"));
        assert_eq!(normalize_subnet("192.168"), None);
        assert_eq!(normalize_subnet("300.1.1"), None);
    }

    #[test]
    fn sanitize_clamps_driver_settings() {
        let mut config = RuntimeConfig::default();
        config.driver.zone = 9;
        config.driver.max_leds = 0;
        config.driver.controller_address = Some("  ".to_string());
        config.driver.user_subnet = Some("10.1.2.3".to_string());
        config.verification.max_retries = 0;
        config.sanitize();

        assert_eq!(config.driver.zone, 6);
        assert_eq!(config.driver.max_leds, 1);
        assert_eq!(config.driver.controller_address, None);
        assert_eq!(config.driver.user_subnet.as_deref(), Some("10.1.2"));
        assert_eq!(config.verification.max_retries, 1);
    }

    #[test]
    fn poll_interval_is_bounded_both_ways() {
        let mut settings = DriverSettings {
            poll_interval_secs: u64::MAX / 10,
            ..DriverSettings::default()
        };
        settings.sanitize();
        assert_eq!(settings.poll_interval_secs, MAX_POLL_INTERVAL_SECS);

        settings.poll_interval_secs = 0;
        settings.sanitize();
        assert_eq!(settings.poll_interval_secs, MIN_POLL_INTERVAL_SECS);
    }

    #[test]
    fn partial_driver_settings_fill_defaults() {
        let settings: DriverSettings =
            serde_json::from_str(r#"{"zone":3,"spotlight_plan":"2"}"#).unwrap();
        assert_eq!(settings.zone, 3);
        assert_eq!(settings.spotlight_plan, "2");
        assert_eq!(settings.max_leds, 100);
    }
}
