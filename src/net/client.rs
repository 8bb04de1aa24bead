use futures::future::BoxFuture;
use std::time::Duration;
use url::Url;

use super::error::FetchError;
use super::types::{Request, Response, ResponseType};

/// Network access used by the worker.
///
/// Resolves with whatever the server answered (any status); rejects only when
/// no response was received.
pub trait Fetcher: Send + Sync {
  fn fetch<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<Response, FetchError>>;
}

/// Fetcher backed by a reqwest client
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
  origin: Url,
}

impl HttpFetcher {
  pub fn new(origin: Url, timeout: Option<Duration>) -> Result<Self, FetchError> {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = timeout {
      builder = builder.timeout(timeout);
    }
    let client = builder.build()?;

    Ok(Self { client, origin })
  }

  fn response_type(&self, url: &Url) -> ResponseType {
    if url.origin() == self.origin.origin() {
      ResponseType::Basic
    } else {
      ResponseType::Cors
    }
  }

  async fn send(&self, request: &Request) -> Result<Response, FetchError> {
    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone());

    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(ref body) = request.body {
      builder = builder.body(body.clone());
    }

    let response = builder.send().await?;

    let status = response.status().as_u16();
    let response_type = self.response_type(response.url());
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();
    let body = response.bytes().await?.to_vec();

    Ok(Response {
      status,
      headers,
      body,
      response_type,
    })
  }
}

impl Fetcher for HttpFetcher {
  fn fetch<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<Response, FetchError>> {
    Box::pin(self.send(request))
  }
}
