use std::time::{Duration, Instant};

use chrono::Utc;
use metrics::{counter, histogram};
use reqwest::Client;
use tracing::warn;

use crate::model::{Service, Status, StatusResult};

/// Body reads for the substring assertion are capped at this many bytes
/// regardless of the upstream response size.
const MAX_BODY_BYTES: usize = 256 * 1024;

/// Runs one logical health check for `service`: up to `service.retries + 1`
/// attempts, each bounded by `service.timeout_ms`, separated by
/// `service.retry_backoff_ms` on failure. Never returns an error to the
/// caller: transport failures are encoded as `Status::Fail`.
pub async fn check(client: &Client, service: &Service) -> StatusResult {
    let start = Instant::now();
    let total_attempts = service.retries + 1;

    let mut status = Status::Fail;
    for attempt in 0..total_attempts {
        status = attempt_once(client, service).await;
        if status == Status::Ok {
            break;
        }
        if attempt + 1 < total_attempts {
            warn!(
                service = service.name.as_str(),
                url = service.url.as_str(),
                attempt = attempt + 1,
                "probe failed, retrying"
            );
            tokio::time::sleep(Duration::from_millis(service.retry_backoff_ms)).await;
        }
    }

    let response_ms = start.elapsed().as_millis() as u64;
    match status {
        Status::Ok => {
            histogram!("watchtower_probe_latency_ms").record(response_ms as f64);
            counter!("watchtower_probe_ok_total").increment(1);
        }
        Status::Fail => {
            counter!("watchtower_probe_fail_total").increment(1);
        }
    }

    StatusResult {
        service_id: service.id,
        name: service.name.clone(),
        url: service.url.clone(),
        status,
        response_ms,
        checked_at: Utc::now().to_rfc3339(),
    }
}

async fn attempt_once(client: &Client, service: &Service) -> Status {
    let request = client
        .get(&service.url)
        .timeout(Duration::from_millis(service.timeout_ms));

    let response = match request.send().await {
        Ok(resp) => resp,
        Err(_) => return Status::Fail,
    };

    if response.status().as_u16() != service.expected_status {
        return Status::Fail;
    }

    let Some(needle) = service.contains.as_deref().filter(|s| !s.is_empty()) else {
        return Status::Ok;
    };

    match read_capped_body(response).await {
        Some(body) if body.windows(needle.len()).any(|w| w == needle.as_bytes()) => Status::Ok,
        _ => Status::Fail,
    }
}

/// Reads at most `MAX_BODY_BYTES` of the response body, stopping early
/// once the cap is reached regardless of how much more the server sends.
async fn read_capped_body(response: reqwest::Response) -> Option<Vec<u8>> {
    use futures::StreamExt;

    let mut buf = Vec::with_capacity(4096);
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.ok()?;
        let remaining = MAX_BODY_BYTES.saturating_sub(buf.len());
        if remaining == 0 {
            break;
        }
        let take = remaining.min(chunk.len());
        buf.extend_from_slice(&chunk[..take]);
        if buf.len() >= MAX_BODY_BYTES {
            break;
        }
    }
    Some(buf)
}
