// src/pipeline.rs
// The inspection pipeline: strictly ordered per-request state machine
// (block check -> gating -> body parse -> classification -> verdict), plus
// the deferred side-effect queue. The pipeline only decides; reputation and
// audit writes are enqueued and drained after the response is decided, so a
// failing write can never change an already-decided verdict.

use spin_sdk::http::{Method, Request};

use crate::audit::{snippet_of, ThreatEntry, ThreatLog};
use crate::classifier::Classifier;
use crate::config::Config;
use crate::reputation;
use crate::store::KeyValueStore;

/// Snippet recorded when a blocked client keeps sending requests.
pub const REPEAT_ATTEMPT_SNIPPET: &str = "(repeat attempt while blocked)";

/// Terminal classification of a single request. Never persisted; it only
/// drives the response mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    AlreadyBlocked,
    NotInspectable,
    MalformedBody,
    ClassifierFailure,
    Malicious,
    Safe,
}

/// Deferred write issued by the pipeline and executed by the drain
/// supervisor. The threat-log insert of a strike is ordered after the strike
/// write succeeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideEffect {
    StrikeAndLog { ip: String, entry: ThreatEntry },
    LogThreat { entry: ThreatEntry },
}

#[derive(Debug)]
pub struct Inspection {
    pub verdict: Verdict,
    pub effects: Vec<SideEffect>,
}

impl Inspection {
    fn terminal(verdict: Verdict) -> Self {
        Inspection {
            verdict,
            effects: Vec::new(),
        }
    }
}

pub(crate) fn method_name(method: &Method) -> &str {
    match method {
        Method::Get => "GET",
        Method::Head => "HEAD",
        Method::Post => "POST",
        Method::Put => "PUT",
        Method::Delete => "DELETE",
        Method::Connect => "CONNECT",
        Method::Options => "OPTIONS",
        Method::Trace => "TRACE",
        Method::Patch => "PATCH",
        Method::Other(name) => name.as_str(),
    }
}

/// Country as reported by the edge geo header; "Unknown" when absent.
pub(crate) fn origin_country(req: &Request) -> String {
    req.header("x-geo-country")
        .and_then(|v| v.as_str())
        .filter(|c| !c.trim().is_empty())
        .map(|c| c.trim().to_string())
        .unwrap_or_else(|| "Unknown".to_string())
}

fn is_json_content_type(req: &Request) -> bool {
    req.header("content-type")
        .and_then(|v| v.as_str())
        .map(|ct| ct.to_ascii_lowercase().contains("application/json"))
        .unwrap_or(false)
}

/// Runs the ordered inspection state machine for one request.
///
/// `client_ip` is `None` when no usable client identifier was found; in that
/// case all reputation bookkeeping is disabled but inspection still happens.
pub fn inspect<S: KeyValueStore, C: Classifier>(
    store: &S,
    classifier: &C,
    cfg: &Config,
    req: &Request,
    client_ip: Option<&str>,
    now: u64,
) -> Inspection {
    // 1. Block check. Repeat attempts while blocked are still audited.
    if let Some(ip) = client_ip {
        if reputation::is_blocked(store, ip, now) {
            return Inspection {
                verdict: Verdict::AlreadyBlocked,
                effects: vec![SideEffect::LogThreat {
                    entry: ThreatEntry {
                        ip: ip.to_string(),
                        country: origin_country(req),
                        payload_snippet: REPEAT_ATTEMPT_SNIPPET.to_string(),
                        timestamp: now,
                    },
                }],
            };
        }
    }

    // 2. Gating: non-mutating methods and non-JSON bodies pass through
    // uninspected (fail-open by design).
    if !cfg.is_inspectable_method(method_name(req.method())) || !is_json_content_type(req) {
        return Inspection::terminal(Verdict::NotInspectable);
    }

    // 3. Body parse. The body bytes are already buffered, so the original
    // stays intact for forwarding; a parse failure rejects the request.
    let payload: serde_json::Value = match serde_json::from_slice(req.body()) {
        Ok(value) => value,
        Err(_) => return Inspection::terminal(Verdict::MalformedBody),
    };
    let serialized = payload.to_string();

    // 4. Classification. Adapter failure or an unusable verdict is a hard
    // stop for this request, never a silent forward.
    let raw_verdict = match classifier.classify(&serialized) {
        Ok(text) => text,
        Err(err) => {
            eprintln!("[classifier] inference failed: {:?}", err);
            return Inspection::terminal(Verdict::ClassifierFailure);
        }
    };
    let malicious = match cfg.verdict_parser().parse(&raw_verdict) {
        Some(verdict) => verdict,
        None => {
            eprintln!("[classifier] unusable verdict text: {:?}", raw_verdict);
            return Inspection::terminal(Verdict::ClassifierFailure);
        }
    };

    // 5./6. Verdict application.
    if malicious {
        let mut effects = Vec::new();
        if let Some(ip) = client_ip {
            effects.push(SideEffect::StrikeAndLog {
                ip: ip.to_string(),
                entry: ThreatEntry {
                    ip: ip.to_string(),
                    country: origin_country(req),
                    payload_snippet: snippet_of(&serialized),
                    timestamp: now,
                },
            });
        }
        return Inspection {
            verdict: Verdict::Malicious,
            effects,
        };
    }

    Inspection::terminal(Verdict::Safe)
}

/// Drains deferred side effects after the verdict is decided. Failures are
/// logged for the operator and never retried here; the response has already
/// been chosen and is not affected.
pub fn drain_side_effects<S: KeyValueStore, L: ThreatLog>(
    store: &S,
    log: Option<&L>,
    cfg: &Config,
    now: u64,
    effects: Vec<SideEffect>,
) {
    for effect in effects {
        match effect {
            SideEffect::StrikeAndLog { ip, entry } => {
                match reputation::record_strike(store, &ip, now, cfg) {
                    Ok(outcome) => {
                        if outcome.just_blocked {
                            println!(
                                "[reputation] blocked {} after {} strikes",
                                ip, outcome.new_count
                            );
                        }
                        record_entry(log, &entry);
                    }
                    Err(()) => {
                        eprintln!("[deferred] strike write failed for {}", ip);
                    }
                }
            }
            SideEffect::LogThreat { entry } => record_entry(log, &entry),
        }
    }
}

fn record_entry<L: ThreatLog>(log: Option<&L>, entry: &ThreatEntry) {
    let Some(log) = log else {
        return;
    };
    if let Err(err) = log.record_threat(entry) {
        eprintln!("[deferred] threat log insert failed: {:?}", err);
    }
}
