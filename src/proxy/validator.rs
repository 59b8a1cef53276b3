//! Parallel proxy validator pool.
//!
//! Splits the candidate list into fixed-size chunks and probes each chunk in
//! an isolated worker. A probe failure is a classification (the proxy gets a
//! fail tag), never a pool error; only a crashed worker aborts the batch.

use std::time::Duration;

use futures::future::join_all;
use thiserror::Error;
use tracing::{debug, info};

/// Default number of proxies handed to one worker.
pub const DEFAULT_CHUNK_SIZE: usize = 10;
/// Default per-probe timeout in seconds.
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 10;

/// Validator errors
#[derive(Error, Debug)]
pub enum ValidatorError {
    #[error("Validation worker crashed: {0}")]
    Worker(String),
}

/// Probe configuration
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeConfig {
    /// Fixed endpoint probed through each candidate proxy.
    pub target_url: String,
    /// Tag recorded for the probed service.
    pub service_tag: String,
    /// Proxies per worker chunk.
    pub chunk_size: usize,
    /// Per-probe timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            target_url: "https://api.ipify.org".to_string(),
            service_tag: "portal".to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            timeout_secs: DEFAULT_PROBE_TIMEOUT_SECS,
        }
    }
}

impl ProbeConfig {
    /// Probe config for one service's target endpoint.
    pub fn for_service(service_tag: &str, target_url: &str) -> Self {
        Self {
            target_url: target_url.to_string(),
            service_tag: service_tag.to_string(),
            ..Default::default()
        }
    }
}

/// Per-proxy probe outcome: which service tags the proxy reached and which
/// it failed.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeResult {
    pub proxy: String,
    pub success: Vec<String>,
    pub fail: Vec<String>,
}

/// Proxy validator pool.
pub struct ProxyValidator {
    config: ProbeConfig,
}

impl ProxyValidator {
    pub fn new(config: ProbeConfig) -> Self {
        Self { config }
    }

    /// Probe every candidate proxy. The output has exactly one entry per
    /// input proxy; entry order is not guaranteed to match input order
    /// (results land chunk by chunk as workers finish).
    pub async fn validate(&self, proxies: &[String]) -> Result<Vec<ProbeResult>, ValidatorError> {
        if proxies.is_empty() {
            return Ok(Vec::new());
        }

        let chunks = partition(proxies, self.config.chunk_size);
        info!(
            "Validating {} proxies in {} chunks (chunk size {})",
            proxies.len(),
            chunks.len(),
            self.config.chunk_size.max(1)
        );

        let mut workers = Vec::with_capacity(chunks.len());
        for (idx, chunk) in chunks.into_iter().enumerate() {
            let config = self.config.clone();
            workers.push(tokio::spawn(async move {
                let mut results = Vec::with_capacity(chunk.len());
                for proxy in &chunk {
                    results.push(probe_proxy(&config, proxy).await);
                }
                debug!(chunk = idx, probed = results.len(), "Chunk complete");
                results
            }));
        }

        let mut out = Vec::with_capacity(proxies.len());
        for joined in join_all(workers).await {
            match joined {
                Ok(results) => out.extend(results),
                Err(e) => return Err(ValidatorError::Worker(e.to_string())),
            }
        }

        let reachable = out.iter().filter(|r| !r.success.is_empty()).count();
        info!("Validation complete: {}/{} proxies reachable", reachable, out.len());
        Ok(out)
    }
}

/// Split `items` into chunks of `chunk_size` (the last may be short).
fn partition(items: &[String], chunk_size: usize) -> Vec<Vec<String>> {
    items
        .chunks(chunk_size.max(1))
        .map(|c| c.to_vec())
        .collect()
}

/// Probe one proxy and classify it. Timeouts, connect errors, TLS errors,
/// and non-200 statuses are all the same fail classification.
async fn probe_proxy(config: &ProbeConfig, proxy: &str) -> ProbeResult {
    let tag = config.service_tag.clone();
    if probe_once(config, proxy).await {
        ProbeResult { proxy: proxy.to_string(), success: vec![tag], fail: vec![] }
    } else {
        ProbeResult { proxy: proxy.to_string(), success: vec![], fail: vec![tag] }
    }
}

async fn probe_once(config: &ProbeConfig, proxy: &str) -> bool {
    let upstream = match reqwest::Proxy::all(proxy) {
        Ok(p) => p,
        Err(e) => {
            debug!("Invalid proxy URL {}: {}", proxy, e);
            return false;
        }
    };

    let client = match reqwest::Client::builder()
        .proxy(upstream)
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
    {
        Ok(c) => c,
        Err(e) => {
            debug!("Failed to build probe client for {}: {}", proxy, e);
            return false;
        }
    };

    match client.get(&config.target_url).send().await {
        Ok(response) => response.status() == reqwest::StatusCode::OK,
        Err(e) => {
            debug!("Probe through {} failed: {}", proxy, e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn partition_splits_into_fixed_chunks() {
        let proxies: Vec<String> = (0..23).map(|i| format!("http://127.0.0.1:{}", 2000 + i)).collect();
        let chunks = partition(&proxies, 10);

        let sizes: Vec<usize> = chunks.iter().map(|c| c.len()).collect();
        assert_eq!(sizes, vec![10, 10, 3]);
    }

    #[test]
    fn partition_tolerates_zero_chunk_size() {
        let proxies = vec!["http://127.0.0.1:2000".to_string()];
        assert_eq!(partition(&proxies, 0).len(), 1);
    }

    #[tokio::test]
    async fn every_input_proxy_appears_exactly_once() {
        // Ports in the reserved low range refuse quickly; classification is
        // fail, not a pool error.
        let proxies: Vec<String> = (1..=23).map(|p| format!("http://127.0.0.1:{}", p)).collect();
        let validator = ProxyValidator::new(ProbeConfig {
            target_url: "http://example.com/".to_string(),
            service_tag: "portal".to_string(),
            chunk_size: 10,
            timeout_secs: 2,
        });

        let results = validator.validate(&proxies).await.unwrap();
        assert_eq!(results.len(), 23);

        let input: HashSet<&str> = proxies.iter().map(|s| s.as_str()).collect();
        let output: HashSet<&str> = results.iter().map(|r| r.proxy.as_str()).collect();
        assert_eq!(input, output);

        for r in &results {
            assert_eq!(r.fail, vec!["portal".to_string()]);
            assert!(r.success.is_empty());
        }
    }

    #[tokio::test]
    async fn empty_input_yields_empty_output() {
        let validator = ProxyValidator::new(ProbeConfig::default());
        let results = validator.validate(&[]).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn reachable_proxy_is_classified_success() {
        // Minimal HTTP proxy: answer any request with a bare 200.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let _ = socket
                    .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                    .await;
            }
        });

        let proxies = vec![format!("http://{}", addr)];
        let validator = ProxyValidator::new(ProbeConfig {
            target_url: "http://example.com/".to_string(),
            service_tag: "portal".to_string(),
            chunk_size: 10,
            timeout_secs: 5,
        });

        let results = validator.validate(&proxies).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].success, vec!["portal".to_string()]);
        assert!(results[0].fail.is_empty());
    }

    #[tokio::test]
    async fn invalid_proxy_url_is_a_fail_classification() {
        let proxies = vec!["not a proxy url".to_string()];
        let validator = ProxyValidator::new(ProbeConfig {
            timeout_secs: 2,
            ..Default::default()
        });

        let results = validator.validate(&proxies).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].success.is_empty());
        assert_eq!(results[0].fail.len(), 1);
    }
}
