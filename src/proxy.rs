// src/proxy.rs
// Upstream forwarding: rebuild the inbound request against the configured
// origin (method, headers, body preserved) and return the origin's response
// verbatim.

use spin_sdk::http::{Request, Response};

pub(crate) fn build_target_url(upstream: &str, path: &str, query: &str) -> String {
    let base = upstream.trim_end_matches('/');
    if query.is_empty() {
        format!("{}{}", base, path)
    } else {
        format!("{}{}?{}", base, path, query)
    }
}

/// Rebuilds the inbound request against the origin. Header values are copied
/// as raw bytes, so non-UTF-8 values survive the hop unchanged.
pub(crate) fn build_outbound(req: &Request, upstream_url: &str) -> Request {
    let target = build_target_url(upstream_url, req.path(), req.query());

    let mut builder = Request::builder();
    builder.method(req.method().clone()).uri(target);
    let headers: Vec<(String, Vec<u8>)> = req
        .headers()
        // The host header belongs to the gateway, not the origin.
        .filter(|(name, _)| !name.eq_ignore_ascii_case("host"))
        .map(|(name, value)| (name.to_string(), value.as_bytes().to_vec()))
        .collect();
    builder.headers(headers);
    builder.body(req.body().to_vec());
    builder.build()
}

/// Forwards the original request to the upstream origin. The body bytes are
/// the same buffer the pipeline inspected; nothing is rewritten.
pub async fn forward_upstream(req: &Request, upstream_url: &str) -> Result<Response, String> {
    spin_sdk::http::send::<_, Response>(build_outbound(req, upstream_url))
        .await
        .map_err(|err| format!("{:?}", err))
}
