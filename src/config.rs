// src/config.rs
// Environment-driven configuration for the gateway.
// Every reputation tunable is an injected parameter, never a compile-time
// literal; defaults below match the documented policy.

use std::env;

use crate::classifier::VerdictParser;

pub const DEFAULT_STRIKE_THRESHOLD: u32 = 3;
pub const DEFAULT_STRIKE_TTL_SECONDS: u64 = 600;
pub const DEFAULT_BLOCK_TTL_SECONDS: u64 = 3600;
pub const DEFAULT_INSPECT_METHODS: &str = "POST,PUT,DELETE";
pub const DEFAULT_CLASSIFIER_MODEL: &str = "llama2-chat";

const STRIKE_THRESHOLD_MIN: u32 = 1;
const STRIKE_THRESHOLD_MAX: u32 = 100;
const STRIKE_TTL_MIN: u64 = 10;
const STRIKE_TTL_MAX: u64 = 86_400;
const BLOCK_TTL_MIN: u64 = 10;
const BLOCK_TTL_MAX: u64 = 604_800;

#[derive(Debug, Clone)]
pub struct Config {
    /// Upstream origin URL; unset means forwarding verdicts answer 500.
    pub upstream_url: Option<String>,
    pub strike_threshold: u32,
    pub strike_ttl_seconds: u64,
    pub block_ttl_seconds: u64,
    /// Uppercased HTTP method names whose bodies are inspected.
    pub inspect_methods: Vec<String>,
    pub classifier_model: String,
    /// Strict boolean verdict parsing instead of the substring match.
    pub strict_verdict: bool,
    /// KV outage policy: forward uninspected (open) or refuse (closed).
    pub kv_fail_open: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            upstream_url: None,
            strike_threshold: DEFAULT_STRIKE_THRESHOLD,
            strike_ttl_seconds: DEFAULT_STRIKE_TTL_SECONDS,
            block_ttl_seconds: DEFAULT_BLOCK_TTL_SECONDS,
            inspect_methods: parse_method_list(DEFAULT_INSPECT_METHODS),
            classifier_model: DEFAULT_CLASSIFIER_MODEL.to_string(),
            strict_verdict: false,
            kv_fail_open: true,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Config {
            upstream_url: env_nonempty("GATE_UPSTREAM_URL"),
            strike_threshold: env_u32(
                "GATE_STRIKE_THRESHOLD",
                DEFAULT_STRIKE_THRESHOLD,
                STRIKE_THRESHOLD_MIN,
                STRIKE_THRESHOLD_MAX,
            ),
            strike_ttl_seconds: env_u64(
                "GATE_STRIKE_TTL_SECONDS",
                DEFAULT_STRIKE_TTL_SECONDS,
                STRIKE_TTL_MIN,
                STRIKE_TTL_MAX,
            ),
            block_ttl_seconds: env_u64(
                "GATE_BLOCK_TTL_SECONDS",
                DEFAULT_BLOCK_TTL_SECONDS,
                BLOCK_TTL_MIN,
                BLOCK_TTL_MAX,
            ),
            inspect_methods: parse_method_list(
                env_nonempty("GATE_INSPECT_METHODS")
                    .as_deref()
                    .unwrap_or(DEFAULT_INSPECT_METHODS),
            ),
            classifier_model: env_nonempty("GATE_CLASSIFIER_MODEL")
                .unwrap_or_else(|| DEFAULT_CLASSIFIER_MODEL.to_string()),
            strict_verdict: env_flag("GATE_STRICT_VERDICT", false),
            kv_fail_open: env_flag("GATE_KV_STORE_FAIL_OPEN", true),
        }
    }

    pub fn is_inspectable_method(&self, method: &str) -> bool {
        self.inspect_methods.iter().any(|m| m == method)
    }

    pub fn verdict_parser(&self) -> VerdictParser {
        if self.strict_verdict {
            VerdictParser::Strict
        } else {
            VerdictParser::Substring
        }
    }
}

fn parse_method_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|m| m.trim().to_ascii_uppercase())
        .filter(|m| !m.is_empty())
        .collect()
}

fn env_nonempty(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(val) if !val.trim().is_empty() => Some(val.trim().to_string()),
        _ => None,
    }
}

fn env_flag(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(val) => match val.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => true,
            "0" | "false" | "no" => false,
            other => {
                eprintln!(
                    "[config] unrecognized boolean {:?} for {}; keeping default {}",
                    other, key, default
                );
                default
            }
        },
        Err(_) => default,
    }
}

fn env_u32(key: &str, default: u32, min: u32, max: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u32>().ok())
        .unwrap_or(default)
        .clamp(min, max)
}

fn env_u64(key: &str, default: u64, min: u64, max: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
        .clamp(min, max)
}
