use url::Url;

/// Request classes with their caching strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
  /// API/command traffic, served network-first
  Api,
  /// Everything else, served cache-first
  Asset,
}

impl RequestClass {
  pub fn classify(url: &Url, api_prefixes: &[String]) -> Self {
    let path = url.path();
    if api_prefixes.iter().any(|prefix| path.starts_with(prefix.as_str())) {
      RequestClass::Api
    } else {
      RequestClass::Asset
    }
  }
}
