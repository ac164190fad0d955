use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use url::Url;

/// What kind of resource a request is loading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
  /// Top-level navigation
  Document,
  Style,
  Script,
  Image,
  Font,
  #[default]
  Other,
}

impl FromStr for Destination {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self> {
    match s.to_lowercase().as_str() {
      "document" | "navigate" => Ok(Self::Document),
      "style" => Ok(Self::Style),
      "script" => Ok(Self::Script),
      "image" => Ok(Self::Image),
      "font" => Ok(Self::Font),
      "other" | "" => Ok(Self::Other),
      other => Err(eyre!("Unknown request destination: {}", other)),
    }
  }
}

impl fmt::Display for Destination {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Self::Document => "document",
      Self::Style => "style",
      Self::Script => "script",
      Self::Image => "image",
      Self::Font => "font",
      Self::Other => "other",
    };
    f.write_str(name)
  }
}

/// An outbound request issued by the host application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  pub method: String,
  pub url: Url,
  pub destination: Destination,
  pub headers: Vec<(String, String)>,
  pub body: Option<Vec<u8>>,
}

impl Request {
  /// A GET request for a sub-resource.
  pub fn get(url: Url) -> Self {
    Self {
      method: "GET".to_string(),
      url,
      destination: Destination::Other,
      headers: Vec::new(),
      body: None,
    }
  }

  /// A top-level page navigation.
  pub fn navigate(url: Url) -> Self {
    Self::get(url).with_destination(Destination::Document)
  }

  /// Parse `url` and build a GET request for it.
  pub fn parse(url: &str) -> Result<Self> {
    let url = Url::parse(url).map_err(|e| eyre!("Invalid request URL '{}': {}", url, e))?;
    Ok(Self::get(url))
  }

  pub fn with_method(mut self, method: &str) -> Self {
    self.method = method.to_uppercase();
    self
  }

  pub fn with_destination(mut self, destination: Destination) -> Self {
    self.destination = destination;
    self
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
    self.body = Some(body.into());
    self
  }

  pub fn is_get(&self) -> bool {
    self.method.eq_ignore_ascii_case("GET")
  }

  /// Normalized identity used for cache keys: method plus URL without fragment.
  pub fn identity(&self) -> String {
    let mut url = self.url.clone();
    url.set_fragment(None);
    format!("{} {}", self.method.to_uppercase(), url)
  }
}

/// A fully buffered response.
///
/// The body is owned, so cloning produces an independent copy: the copy handed
/// to the cache and the copy returned to the caller never share a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: Vec::new(),
    }
  }

  /// A response with a single content type and a text body.
  pub fn text(status: u16, content_type: &str, body: impl Into<String>) -> Self {
    Self::new(status)
      .with_header("Content-Type", content_type)
      .with_body(body.into().into_bytes())
  }

  /// The synthetic transport error used when nothing else can answer.
  pub fn network_error() -> Self {
    Self::text(408, "text/plain", "Network Error")
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
    self.body = body.into();
    self
  }

  /// Case-insensitive header lookup.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  pub fn content_type(&self) -> Option<&str> {
    self.header("Content-Type")
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Whether this response may be written to a cache partition.
  /// Partial content is never cached.
  pub fn is_cacheable(&self) -> bool {
    self.is_success() && self.status != 206
  }
}
