use reqwest::Client;
use std::time::Duration;

/// What the metadata probe learned about the resource.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    /// Final URL after redirects; every later request in the job uses it.
    pub resolved_url: String,
    /// True only when the server advertises `Accept-Ranges: bytes`.
    pub supports_ranges: bool,
    /// Size reported by the server, if any.
    pub size: Option<u64>,
}

/// Issues a HEAD request to discover the post-redirect URL, range support
/// and (when available) the total size.
///
/// This step never fails the job: a timeout, connection error or non-2xx
/// status degrades to "no range support, URL unchanged" and the engine
/// proceeds with a single-stream transfer.
pub async fn probe(
    client: &Client,
    url: &str,
    bearer_token: Option<&str>,
    timeout: Duration,
) -> ProbeResult {
    let degraded = ProbeResult {
        resolved_url: url.to_string(),
        supports_ranges: false,
        size: None,
    };

    let mut request = client.head(url).timeout(timeout);
    if let Some(token) = bearer_token {
        request = request.bearer_auth(token);
    }

    let response = match request.send().await {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(url, error = %e, "probe request failed, assuming no range support");
            return degraded;
        }
    };

    if !response.status().is_success() {
        tracing::warn!(
            url,
            status = %response.status(),
            "probe returned non-success status, assuming no range support"
        );
        return degraded;
    }

    let resolved_url = response.url().to_string();

    let supports_ranges = response
        .headers()
        .get(reqwest::header::ACCEPT_RANGES)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("bytes"))
        .unwrap_or(false);

    let size = response
        .headers()
        .get(reqwest::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
        .filter(|&n| n > 0);

    tracing::debug!(
        url,
        resolved = %resolved_url,
        supports_ranges,
        size = size.unwrap_or(0),
        "probe complete"
    );

    ProbeResult {
        resolved_url,
        supports_ranges,
        size,
    }
}
