use color_eyre::{eyre::eyre, Result};
use reqwest::Method;

use crate::cache::{Request, ResponseSnapshot};
use crate::config::Config;

use super::{Network, NetworkResponse};

/// HTTP client wrapper
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
  /// Larger bodies are passed through without being stored
  max_entry_bytes: usize,
}

impl HttpNetwork {
  pub fn new(config: &Config) -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(config.user_agent.as_str())
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      max_entry_bytes: config.max_entry_bytes,
    })
  }
}

impl Network for HttpNetwork {
  async fn fetch(&self, request: &Request) -> Result<NetworkResponse> {
    let key = &request.key;
    let method = Method::from_bytes(key.method.as_bytes())
      .map_err(|e| eyre!("Invalid method '{}': {}", key.method, e))?;

    let mut builder = self.client.request(method, key.url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", key, e))?;

    let status = response.status().as_u16();
    // Non-UTF-8 header values are dropped from the snapshot
    let headers: Vec<(String, String)> = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();

    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", key, e))?;

    let snapshot = ResponseSnapshot::new(status, headers, body.to_vec());
    Ok(classify(snapshot, self.max_entry_bytes))
  }
}

/// Decide whether a complete response may be copied into the store.
fn classify(snapshot: ResponseSnapshot, max_entry_bytes: usize) -> NetworkResponse {
  if snapshot.body.len() > max_entry_bytes {
    return NetworkResponse::Uncacheable {
      reason: format!(
        "body of {} bytes exceeds the {} byte entry limit",
        snapshot.body.len(),
        max_entry_bytes
      ),
      snapshot,
    };
  }

  NetworkResponse::Storable(snapshot)
}
