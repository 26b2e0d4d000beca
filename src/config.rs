use std::path::PathBuf;
use std::time::Duration;

use crate::auth::{AuthOptions, KeyFlow};
use crate::notify::gpio::{GpioConfig, PinPulse};
use crate::notify::mqtt::MqttTopics;

pub const APP_NAME: &str = "homekey-reader";
/// Name of the persisted reader-data blob.
pub const STORE_KEY: &str = "READERDATA";
pub const MAX_ISSUERS: usize = 16;
pub const MAX_ENDPOINTS_PER_ISSUER: usize = 16;
pub const APDU_TIMEOUT_MS: u64 = 500;
pub const SESSION_BUDGET_MS: u64 = 800;
pub const EVENT_QUEUE_DEPTH: usize = 16;

#[derive(clap::Parser, Debug, Clone)]
pub struct Config {
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
    /// Directory holding the reader-data blob (default: XDG data dir).
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = KeyFlow::Fast)]
    pub preferred_flow: KeyFlow,
    #[arg(long, default_value_t = APDU_TIMEOUT_MS)]
    pub apdu_timeout_ms: u64,
    #[arg(long, default_value_t = SESSION_BUDGET_MS)]
    pub session_budget_ms: u64,
    /// Send the failure control APDU when a HomeKey tap fails.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub send_failure_status: bool,

    #[arg(long, default_value = "homekey/auth")]
    pub mqtt_auth_topic: String,
    #[arg(long, default_value = "homekey/state")]
    pub mqtt_state_topic: String,
    #[arg(long, default_value = "homekey/status")]
    pub mqtt_lwt_topic: String,
    /// Publish taps of non-HomeKey tags on the auth topic.
    #[arg(long)]
    pub publish_tag_taps: bool,

    #[arg(long)]
    pub success_pin: Option<u8>,
    #[arg(long)]
    pub success_level_high: bool,
    #[arg(long, default_value_t = 1000)]
    pub success_ms: u64,
    #[arg(long)]
    pub fail_pin: Option<u8>,
    #[arg(long)]
    pub fail_level_high: bool,
    #[arg(long, default_value_t = 1000)]
    pub fail_ms: u64,
    /// Lock pin that returns to idle after `--momentary-timeout-ms`.
    #[arg(long)]
    pub momentary_pin: Option<u8>,
    #[arg(long, default_value_t = 5000)]
    pub momentary_timeout_ms: u64,

    /// Erase the persisted reader data, then exit.
    #[arg(long)]
    pub wipe: bool,
    /// Apply one base64 control-point request offline, print the response.
    #[arg(long, value_name = "BASE64")]
    pub control_point: Option<String>,
}

impl Config {
    pub fn data_dir(&self) -> anyhow::Result<PathBuf> {
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }
        Ok(directories::ProjectDirs::from("", "", APP_NAME)
            .ok_or_else(|| anyhow::anyhow!("cannot determine XDG data dir"))?
            .data_dir()
            .to_path_buf())
    }

    pub fn auth_options(&self) -> AuthOptions {
        AuthOptions {
            preferred_flow: self.preferred_flow,
            apdu_timeout: Duration::from_millis(self.apdu_timeout_ms),
            session_budget: Duration::from_millis(self.session_budget_ms),
            send_failure_status: self.send_failure_status,
        }
    }

    pub fn mqtt_topics(&self) -> MqttTopics {
        MqttTopics {
            auth: self.mqtt_auth_topic.clone(),
            state: self.mqtt_state_topic.clone(),
            lwt: self.mqtt_lwt_topic.clone(),
            publish_tag_taps: self.publish_tag_taps,
        }
    }

    pub fn gpio(&self) -> GpioConfig {
        GpioConfig {
            success: self.success_pin.map(|pin| PinPulse {
                pin,
                active_high: self.success_level_high,
                duration: Duration::from_millis(self.success_ms),
            }),
            fail: self.fail_pin.map(|pin| PinPulse {
                pin,
                active_high: self.fail_level_high,
                duration: Duration::from_millis(self.fail_ms),
            }),
            momentary: self.momentary_pin.map(|pin| PinPulse {
                pin,
                active_high: true,
                duration: Duration::from_millis(self.momentary_timeout_ms),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_defaults() {
        let cfg = Config::parse_from(["homekey-reader"]);
        assert_eq!(cfg.preferred_flow, KeyFlow::Fast);
        let opts = cfg.auth_options();
        assert_eq!(opts.apdu_timeout, Duration::from_millis(500));
        assert_eq!(opts.session_budget, Duration::from_millis(800));
        assert!(cfg.gpio().success.is_none());
        assert!(!cfg.mqtt_topics().publish_tag_taps);
    }

    #[test]
    fn test_failure_status_default_matches_library() {
        let cfg = Config::parse_from(["homekey-reader"]);
        assert_eq!(cfg.auth_options().send_failure_status, AuthOptions::default().send_failure_status);
        assert!(cfg.send_failure_status);

        let cfg = Config::parse_from(["homekey-reader", "--send-failure-status", "false"]);
        assert!(!cfg.auth_options().send_failure_status);
    }

    #[test]
    fn test_flags() {
        let cfg = Config::parse_from([
            "homekey-reader",
            "-vv",
            "--preferred-flow",
            "attestation",
            "--success-pin",
            "4",
            "--success-level-high",
            "--success-ms",
            "250",
            "--data-dir",
            "/tmp/hk",
        ]);
        assert_eq!(cfg.verbose, 2);
        assert_eq!(cfg.preferred_flow, KeyFlow::Attestation);
        let success = cfg.gpio().success.unwrap();
        assert_eq!((success.pin, success.active_high), (4, true));
        assert_eq!(success.duration, Duration::from_millis(250));
        assert_eq!(cfg.data_dir().unwrap(), PathBuf::from("/tmp/hk"));
    }
}
