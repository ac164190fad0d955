//! Synthesized answers for requests nothing else could satisfy.

use tracing::warn;
use url::Url;

use crate::cache::{CacheEntry, CacheStorage, Partition};
use crate::network::{Destination, Request, Response};

/// Supplies the last-resort response. Never fails.
pub struct FallbackProvider<S: CacheStorage> {
  essentials: Partition<S>,
  offline_url: Url,
  placeholder_image: Option<Url>,
  title: String,
}

impl<S: CacheStorage> FallbackProvider<S> {
  pub fn new(
    essentials: Partition<S>,
    offline_url: Url,
    placeholder_image: Option<Url>,
    title: &str,
  ) -> Self {
    Self {
      essentials,
      offline_url,
      placeholder_image,
      title: title.to_string(),
    }
  }

  /// The copy of `request` cached at install, if it is one of the essentials.
  pub fn precached(&self, request: &Request) -> Option<CacheEntry> {
    if !request.is_get() {
      return None;
    }
    match self.essentials.get(request) {
      Ok(entry) => entry,
      Err(e) => {
        warn!(url = %request.url, "Failed to read essentials: {}", e);
        None
      }
    }
  }

  pub fn fallback_for(&self, request: &Request) -> Response {
    match request.destination {
      Destination::Document => self
        .cached(&self.offline_url)
        .unwrap_or_else(|| offline_page(&self.title)),
      Destination::Image => self
        .placeholder_image
        .as_ref()
        .and_then(|url| self.cached(url))
        .unwrap_or_else(Response::network_error),
      _ => Response::network_error(),
    }
  }

  fn cached(&self, url: &Url) -> Option<Response> {
    match self.essentials.match_url(url) {
      Ok(entry) => entry.map(|e| e.response),
      Err(e) => {
        warn!(url = %url, "Failed to read fallback from cache: {}", e);
        None
      }
    }
  }
}

/// Built-in offline page, used when the real one could not be fetched.
pub fn offline_page(title: &str) -> Response {
  let html = format!(
    r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>Offline - {title}</title>
<style>
body {{ font-family: sans-serif; text-align: center; padding: 48px; background: #f5f5f5; }}
main {{ background: #fff; padding: 32px; border-radius: 8px; display: inline-block; }}
</style>
</head>
<body>
<main>
<h1>You're offline</h1>
<p>{title} will be available again once your connection is restored.</p>
<p><button onclick="location.reload()">Retry</button></p>
</main>
<script>window.addEventListener('online', () => location.reload());</script>
</body>
</html>
"#
  );
  Response::text(200, "text/html; charset=utf-8", html)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{PartitionLimits, SqliteStorage};
  use crate::db::Database;
  use std::sync::Arc;

  fn provider() -> FallbackProvider<SqliteStorage> {
    let storage = Arc::new(SqliteStorage::new(Database::open_in_memory().unwrap()));
    let essentials = Partition::new(storage, "gen-v1-essentials".to_string(), PartitionLimits::default());
    FallbackProvider::new(
      essentials,
      Url::parse("https://school.test/offline").unwrap(),
      Some(Url::parse("https://school.test/static/offline.svg").unwrap()),
      "School",
    )
  }

  fn request(url: &str, destination: Destination) -> Request {
    Request::parse(url).unwrap().with_destination(destination)
  }

  #[test]
  fn test_document_gets_cached_offline_page() {
    let provider = provider();
    let page = Response::text(200, "text/html", "<h1>cached offline</h1>");
    provider
      .essentials
      .put(&Request::parse("https://school.test/offline").unwrap(), page.clone())
      .unwrap();

    let response = provider.fallback_for(&request("https://school.test/grades", Destination::Document));
    assert_eq!(response, page);
  }

  #[test]
  fn test_document_without_cached_page_gets_builtin_page() {
    let provider = provider();
    let response = provider.fallback_for(&request("https://school.test/grades", Destination::Document));
    assert_eq!(response.status, 200);
    assert!(response.content_type().unwrap().starts_with("text/html"));
    assert!(String::from_utf8(response.body).unwrap().contains("School"));
  }

  #[test]
  fn test_precached_matches_only_reads_of_cached_urls() {
    let provider = provider();
    let login = Request::parse("https://school.test/login").unwrap();
    provider
      .essentials
      .put(&login, Response::text(200, "text/html", "login"))
      .unwrap();

    let navigation = request("https://school.test/login", Destination::Document);
    assert_eq!(provider.precached(&navigation).unwrap().response.body, b"login");
    assert!(provider.precached(&login.clone().with_method("POST")).is_none());
    assert!(provider
      .precached(&request("https://school.test/grades", Destination::Document))
      .is_none());
  }

  #[test]
  fn test_image_gets_placeholder_when_cached() {
    let provider = provider();
    let svg = Response::text(200, "image/svg+xml", "<svg/>");
    provider
      .essentials
      .put(
        &Request::parse("https://school.test/static/offline.svg").unwrap(),
        svg.clone(),
      )
      .unwrap();

    let response = provider.fallback_for(&request("https://school.test/a.png", Destination::Image));
    assert_eq!(response, svg);
  }

  #[test]
  fn test_image_without_placeholder_gets_error() {
    let provider = provider();
    let response = provider.fallback_for(&request("https://school.test/a.png", Destination::Image));
    assert_eq!(response.status, 408);
  }

  #[test]
  fn test_other_kinds_get_408_text() {
    let provider = provider();
    let response = provider.fallback_for(&request("https://school.test/api/x", Destination::Other));
    assert_eq!(response.status, 408);
    assert_eq!(response.content_type(), Some("text/plain"));
    assert_eq!(response.body, b"Network Error");
  }
}
