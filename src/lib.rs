// src/lib.rs
// Entry point for the strike-gate Spin app: an inline request-inspection
// gateway in front of an upstream API. Every inbound request is screened for
// malicious intent before being proxied; repeat offenders accumulate strikes
// and are temporarily blocked outright.

use spin_sdk::http::{Method, Request, Response};
#[cfg(target_arch = "wasm32")]
use spin_sdk::http_component;
use std::env;

pub mod audit;      // Threat audit trail (SQLite)
pub mod classifier; // Payload classification adapter (Spin LLM)
pub mod config;     // Env-driven configuration
mod metrics;        // Prometheus metrics
pub mod pipeline;   // Ordered inspection state machine + deferred side effects
mod proxy;          // Upstream forwarding
pub mod reputation; // Strike/block state machine
pub mod store;      // Key-value store boundary
#[cfg(test)]
mod test_support;

use audit::{SqliteThreatLog, ThreatLog};
use classifier::LlmClassifier;
use config::Config;
use pipeline::Verdict;

pub(crate) const ANALYTICS_PATH: &str = "/analytics";
pub(crate) const ANALYTICS_LIMIT: u32 = 20;

/// Returns true if forwarded IP headers should be trusted for this request.
/// If GATE_FORWARDED_IP_SECRET is set, require a matching
/// X-Gate-Forwarded-Secret header.
fn forwarded_ip_trusted(req: &Request) -> bool {
    match env::var("GATE_FORWARDED_IP_SECRET") {
        Ok(secret) => req
            .header("x-gate-forwarded-secret")
            .and_then(|v| v.as_str())
            .map(|v| v == secret)
            .unwrap_or(false),
        Err(_) => true,
    }
}

/// Extract the best available client IP from the request. `None` disables
/// all reputation bookkeeping for the request; inspection still happens.
pub(crate) fn extract_client_ip(req: &Request) -> Option<String> {
    if !forwarded_ip_trusted(req) {
        return None;
    }
    // Prefer X-Forwarded-For (may be a comma-separated list).
    if let Some(h) = req.header("x-forwarded-for") {
        let val = h.as_str().unwrap_or("");
        if let Some(ip) = val.split(',').next() {
            let ip = ip.trim();
            if !ip.is_empty() && ip != "unknown" {
                return Some(ip.to_string());
            }
        }
    }
    // Fallback: X-Real-IP.
    if let Some(h) = req.header("x-real-ip") {
        let val = h.as_str().unwrap_or("");
        if !val.is_empty() && val != "unknown" {
            return Some(val.to_string());
        }
    }
    None
}

pub(crate) fn now_ts() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Fixed status/body pair for a rejecting verdict; `None` means the request
/// is forwarded upstream. Only these bodies are ever user-visible.
pub(crate) fn rejection_for(verdict: Verdict) -> Option<(u16, &'static str)> {
    match verdict {
        Verdict::AlreadyBlocked => {
            Some((429, "Too Many Bad Requests: Your IP is temporarily blocked."))
        }
        Verdict::MalformedBody => Some((400, "Bad Request: Malformed JSON.")),
        Verdict::ClassifierFailure => {
            Some((500, "Internal Server Error: AI analysis failed."))
        }
        Verdict::Malicious => Some((403, "Forbidden: Malicious payload detected.")),
        Verdict::NotInspectable | Verdict::Safe => None,
    }
}

fn verdict_metric(verdict: Verdict) -> metrics::MetricName {
    match verdict {
        Verdict::AlreadyBlocked => metrics::MetricName::BlockedTotal,
        Verdict::MalformedBody => metrics::MetricName::MalformedTotal,
        Verdict::ClassifierFailure => metrics::MetricName::ClassifierFailuresTotal,
        Verdict::Malicious => metrics::MetricName::MaliciousTotal,
        Verdict::NotInspectable | Verdict::Safe => metrics::MetricName::ForwardedTotal,
    }
}

fn handle_health(req: &Request) -> Response {
    let allowed = ["127.0.0.1", "::1"];
    let ip = extract_client_ip(req).unwrap_or_default();
    if !allowed.contains(&ip.as_str()) {
        return Response::new(403, "Forbidden");
    }
    match store::open_default() {
        Some(kv) => {
            let test_key = "health:test";
            let _ = kv.set(test_key, b"ok");
            let ok = kv.get(test_key).is_ok();
            let _ = kv.delete(test_key);
            if ok {
                return Response::builder()
                    .status(200)
                    .header("X-KV-Status", "available")
                    .body("OK")
                    .build();
            }
            Response::new(500, "Key-value store error")
        }
        None => {
            println!("[KV OUTAGE] Key-value store unavailable during health check");
            Response::builder()
                .status(500)
                .header("X-KV-Status", "unavailable")
                .body("Key-value store error")
                .build()
        }
    }
}

/// Read-only analytics endpoint: the most recent threat entries,
/// newest-first, CORS-open. Bypasses the inspection pipeline entirely.
fn handle_analytics() -> Response {
    let log = match SqliteThreatLog::open_default() {
        Ok(log) => log,
        Err(err) => {
            eprintln!("[audit] threat log unavailable: {:?}", err);
            return Response::new(500, "Internal Server Error: analytics unavailable.");
        }
    };
    match log.list_recent(ANALYTICS_LIMIT) {
        Ok(rows) => match serde_json::to_string(&rows) {
            Ok(body) => Response::builder()
                .status(200)
                .header("Content-Type", "application/json")
                .header("Access-Control-Allow-Origin", "*")
                .body(body)
                .build(),
            Err(err) => {
                eprintln!("[audit] failed to serialize analytics rows: {}", err);
                Response::new(500, "Internal Server Error: analytics unavailable.")
            }
        },
        Err(err) => {
            eprintln!("[audit] analytics query failed: {:?}", err);
            Response::new(500, "Internal Server Error: analytics unavailable.")
        }
    }
}

async fn forward(req: &Request, cfg: &Config) -> Response {
    let Some(upstream) = cfg.upstream_url.as_deref() else {
        eprintln!("[proxy] GATE_UPSTREAM_URL is not configured");
        return Response::new(500, "Internal Server Error: upstream origin not configured.");
    };
    match proxy::forward_upstream(req, upstream).await {
        Ok(resp) => resp,
        Err(err) => {
            eprintln!("[proxy] upstream send failed: {}", err);
            Response::new(502, "Bad Gateway: upstream unreachable.")
        }
    }
}

/// What to do with a request when the reputation store is unreachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OutageAction {
    /// Fail-open: forward uninspected.
    ForwardUninspected,
    /// Fail-closed: refuse with a 500.
    Refuse,
}

pub(crate) fn kv_outage_action(cfg: &Config) -> OutageAction {
    if cfg.kv_fail_open {
        OutageAction::ForwardUninspected
    } else {
        OutageAction::Refuse
    }
}

/// KV outage contract: fail-open forwards the request uninspected, fail-closed
/// refuses it. Either way the outage is operator-visible.
async fn handle_kv_outage(req: &Request, cfg: &Config) -> Response {
    println!(
        "[KV OUTAGE] Store unavailable during request handling; GATE_KV_STORE_FAIL_OPEN={}",
        cfg.kv_fail_open
    );
    match kv_outage_action(cfg) {
        OutageAction::ForwardUninspected => forward(req, cfg).await,
        OutageAction::Refuse => {
            Response::new(500, "Internal Server Error: reputation store unavailable.")
        }
    }
}

/// Main handler logic, testable as a plain Rust function.
pub async fn handle_gateway_impl(req: Request) -> Response {
    let cfg = Config::from_env();
    let path = req.path();

    // Operational endpoints, outside the inspection pipeline.
    if path == "/health" {
        return handle_health(&req);
    }
    if path == ANALYTICS_PATH && *req.method() == Method::Get {
        if let Some(kv) = store::open_default() {
            metrics::increment(&kv, metrics::MetricName::AnalyticsReadsTotal);
        }
        return handle_analytics();
    }
    if path == "/metrics" && *req.method() == Method::Get {
        return match store::open_default() {
            Some(kv) => Response::builder()
                .status(200)
                .header("Content-Type", "text/plain; version=0.0.4")
                .body(metrics::render(&kv))
                .build(),
            None => Response::new(500, "Key-value store error"),
        };
    }

    // Everything else enters the inspection pipeline.
    let kv = match store::open_default() {
        Some(kv) => kv,
        None => return handle_kv_outage(&req, &cfg).await,
    };
    metrics::increment(&kv, metrics::MetricName::RequestsTotal);

    let client_ip = extract_client_ip(&req);
    let now = now_ts();
    let llm = LlmClassifier::new(cfg.classifier_model.clone());
    let inspection = pipeline::inspect(&kv, &llm, &cfg, &req, client_ip.as_deref(), now);
    metrics::increment(&kv, verdict_metric(inspection.verdict));

    // Deferred reputation/audit writes: drained after the verdict is decided,
    // before the instance is torn down. Failures cannot change the response.
    if !inspection.effects.is_empty() {
        let log = match SqliteThreatLog::open_default() {
            Ok(log) => Some(log),
            Err(err) => {
                eprintln!("[audit] threat log unavailable: {:?}", err);
                None
            }
        };
        pipeline::drain_side_effects(&kv, log.as_ref(), &cfg, now, inspection.effects);
    }

    match rejection_for(inspection.verdict) {
        Some((status, body)) => Response::new(status, body),
        None => forward(&req, &cfg).await,
    }
}

#[cfg(target_arch = "wasm32")]
#[http_component]
async fn spin_entrypoint(req: Request) -> Response {
    handle_gateway_impl(req).await
}

#[cfg(test)]
mod lib_tests {
    use super::*;

    fn request_with_headers(path: &str, headers: &[(&str, &str)]) -> Request {
        let mut builder = Request::builder();
        builder.method(Method::Get).uri(path);
        for (key, value) in headers {
            builder.header(*key, *value);
        }
        builder.build()
    }

    #[test]
    fn client_ip_prefers_first_forwarded_entry() {
        let _lock = test_support::lock_env();
        let req = request_with_headers(
            "/",
            &[("x-forwarded-for", "203.0.113.7, 10.0.0.1"), ("x-real-ip", "10.0.0.2")],
        );
        assert_eq!(extract_client_ip(&req).as_deref(), Some("203.0.113.7"));
    }

    #[test]
    fn client_ip_falls_back_to_real_ip_then_none() {
        let _lock = test_support::lock_env();
        let req = request_with_headers("/", &[("x-real-ip", "198.51.100.4")]);
        assert_eq!(extract_client_ip(&req).as_deref(), Some("198.51.100.4"));

        let bare = request_with_headers("/", &[]);
        assert_eq!(extract_client_ip(&bare), None);
    }

    #[test]
    fn forwarded_headers_require_the_secret_when_configured() {
        let _lock = test_support::lock_env();
        std::env::set_var("GATE_FORWARDED_IP_SECRET", "s3cret");
        let untrusted = request_with_headers("/", &[("x-forwarded-for", "203.0.113.7")]);
        assert_eq!(extract_client_ip(&untrusted), None);

        let trusted = request_with_headers(
            "/",
            &[
                ("x-forwarded-for", "203.0.113.7"),
                ("x-gate-forwarded-secret", "s3cret"),
            ],
        );
        assert_eq!(extract_client_ip(&trusted).as_deref(), Some("203.0.113.7"));
        std::env::remove_var("GATE_FORWARDED_IP_SECRET");
    }

    #[test]
    fn rejecting_verdicts_map_to_fixed_status_and_body() {
        assert_eq!(
            rejection_for(Verdict::AlreadyBlocked),
            Some((429, "Too Many Bad Requests: Your IP is temporarily blocked."))
        );
        assert_eq!(
            rejection_for(Verdict::MalformedBody),
            Some((400, "Bad Request: Malformed JSON."))
        );
        assert_eq!(
            rejection_for(Verdict::ClassifierFailure),
            Some((500, "Internal Server Error: AI analysis failed."))
        );
        assert_eq!(
            rejection_for(Verdict::Malicious),
            Some((403, "Forbidden: Malicious payload detected."))
        );
        assert_eq!(rejection_for(Verdict::NotInspectable), None);
        assert_eq!(rejection_for(Verdict::Safe), None);
    }

    #[test]
    fn kv_outage_action_follows_the_fail_open_flag() {
        let _lock = test_support::lock_env();
        std::env::set_var("GATE_KV_STORE_FAIL_OPEN", "false");
        let cfg = Config::from_env();
        assert_eq!(kv_outage_action(&cfg), OutageAction::Refuse);

        std::env::set_var("GATE_KV_STORE_FAIL_OPEN", "true");
        let cfg = Config::from_env();
        assert_eq!(kv_outage_action(&cfg), OutageAction::ForwardUninspected);

        // Unset: the documented default is fail-open.
        std::env::remove_var("GATE_KV_STORE_FAIL_OPEN");
        let cfg = Config::from_env();
        assert_eq!(kv_outage_action(&cfg), OutageAction::ForwardUninspected);
    }
}
