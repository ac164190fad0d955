use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

use crate::cache::CacheGeneration;
use crate::network::Destination;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
  /// Application title, used for the synthesized offline page and push notices
  pub title: String,
  /// The application's own origin, e.g. "https://school.example.com"
  pub origin: String,
  /// Current cache generation; bump the version to invalidate every partition
  pub generation: CacheGeneration,
  pub essentials: EssentialsConfig,
  /// Cross-origin hosts whose requests may be intercepted (CDNs, font hosts)
  pub external_hosts: Vec<String>,
  /// Ordered routing rules, first match wins
  pub routes: Vec<RouteConfig>,
  pub queue: QueueConfig,
  /// Activate right after install instead of waiting for an explicit activation
  pub skip_waiting: bool,
  /// Timeout applied by the HTTP transport to every request
  pub request_timeout_seconds: u64,
  /// Overrides the default data directory for the database and logs
  pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EssentialsConfig {
  /// Partition holding the app shell and offline assets
  pub partition: String,
  /// App-shell URLs cached at install; failures are skipped
  pub urls: Vec<String>,
  /// Page served to navigations when nothing else can answer
  pub offline_url: String,
  /// Image served to image requests when nothing else can answer
  pub placeholder_image: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueConfig {
  /// Queued writes older than this are discarded instead of replayed
  pub retention_hours: u64,
}

/// Which origins a route applies to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OriginScope {
  /// Same-origin and allow-listed external hosts
  #[default]
  Any,
  /// The application's own origin only
  Same,
  /// Allow-listed external hosts only
  External,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
  CacheFirst,
  NetworkFirst,
  StaleWhileRevalidate,
  /// Forward to the network without caching
  NetworkOnly,
  /// Forward state-changing requests, queueing them when offline
  WriteSync,
  /// Do not intercept
  Bypass,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteConfig {
  pub name: String,
  pub strategy: StrategyKind,
  /// Empty matches every destination
  #[serde(default)]
  pub destinations: Vec<Destination>,
  #[serde(default)]
  pub origin: OriginScope,
  /// Regular expression tested against the full request URL
  #[serde(default)]
  pub pattern: Option<String>,
  /// Defaults to GET for caching strategies and to POST/PUT/PATCH/DELETE for write-sync
  #[serde(default)]
  pub methods: Vec<String>,
  /// Partition name for caching strategies
  #[serde(default)]
  pub partition: Option<String>,
  #[serde(default)]
  pub max_entries: Option<usize>,
  #[serde(default)]
  pub max_age_seconds: Option<u64>,
  /// Network-first only; defaults to 5 seconds
  #[serde(default)]
  pub network_timeout_seconds: Option<u64>,
  /// Write-sync only; the trigger tag that replays this route's queue
  #[serde(default)]
  pub sync_tag: Option<String>,
}

impl RouteConfig {
  fn new(name: &str, strategy: StrategyKind) -> Self {
    Self {
      name: name.to_string(),
      strategy,
      destinations: Vec::new(),
      origin: OriginScope::Any,
      pattern: None,
      methods: Vec::new(),
      partition: None,
      max_entries: None,
      max_age_seconds: None,
      network_timeout_seconds: None,
      sync_tag: None,
    }
  }

  fn cached(name: &str, strategy: StrategyKind, partition: &str) -> Self {
    Self {
      partition: Some(partition.to_string()),
      ..Self::new(name, strategy)
    }
  }

  /// Writes to exactly `path` on the application's origin, with or without a query.
  fn write_sync(name: &str, path: &str, tag: &str) -> Self {
    Self {
      origin: OriginScope::Same,
      pattern: Some(format!(r"^https?://[^/]+{}/?(\?|$)", regex::escape(path))),
      methods: vec!["POST".to_string()],
      sync_tag: Some(tag.to_string()),
      ..Self::new(name, StrategyKind::WriteSync)
    }
  }

  fn limits(mut self, max_entries: usize, max_age_seconds: u64) -> Self {
    self.max_entries = Some(max_entries);
    self.max_age_seconds = Some(max_age_seconds);
    self
  }
}

const DAY: u64 = 24 * 60 * 60;

impl Default for Config {
  fn default() -> Self {
    Self {
      title: "School Management System".to_string(),
      origin: "http://localhost:5000".to_string(),
      generation: CacheGeneration::new("school-ms", "1.4.0"),
      essentials: EssentialsConfig::default(),
      external_hosts: vec![
        "cdn.jsdelivr.net".to_string(),
        "cdnjs.cloudflare.com".to_string(),
        "fonts.googleapis.com".to_string(),
        "fonts.gstatic.com".to_string(),
      ],
      routes: default_routes(),
      queue: QueueConfig::default(),
      skip_waiting: true,
      request_timeout_seconds: 30,
      data_dir: None,
    }
  }
}

impl Default for EssentialsConfig {
  fn default() -> Self {
    Self {
      partition: "essentials".to_string(),
      urls: vec![
        "/".to_string(),
        "/login".to_string(),
        "/static/css/mobile.css".to_string(),
      ],
      offline_url: "/offline".to_string(),
      placeholder_image: Some("/static/images/offline-fallback.svg".to_string()),
    }
  }
}

impl Default for QueueConfig {
  fn default() -> Self {
    Self { retention_hours: 24 }
  }
}

fn default_routes() -> Vec<RouteConfig> {
  use StrategyKind::*;

  vec![
    RouteConfig::write_sync("attendance", "/api/attendance", "attendance-sync"),
    RouteConfig::write_sync("grades", "/api/grades", "grades-sync"),
    RouteConfig::write_sync("notifications", "/api/notifications", "notifications-sync"),
    RouteConfig {
      destinations: vec![Destination::Document],
      origin: OriginScope::Same,
      ..RouteConfig::cached("pages", StaleWhileRevalidate, "pages")
    },
    RouteConfig {
      destinations: vec![Destination::Style, Destination::Script],
      origin: OriginScope::Same,
      ..RouteConfig::cached("assets", StaleWhileRevalidate, "assets").limits(50, 30 * DAY)
    },
    RouteConfig {
      destinations: vec![Destination::Image],
      ..RouteConfig::cached("images", CacheFirst, "images").limits(100, 7 * DAY)
    },
    RouteConfig {
      pattern: Some(r"^https://fonts\.googleapis\.com".to_string()),
      ..RouteConfig::cached("font-stylesheets", StaleWhileRevalidate, "google-fonts-stylesheets")
    },
    RouteConfig {
      pattern: Some(r"^https://fonts\.gstatic\.com".to_string()),
      ..RouteConfig::cached("webfonts", CacheFirst, "google-fonts-webfonts").limits(30, 365 * DAY)
    },
    RouteConfig {
      pattern: Some(r"^https://cdn\.jsdelivr\.net".to_string()),
      ..RouteConfig::cached("jsdelivr", StaleWhileRevalidate, "jsdelivr-cdn").limits(30, 30 * DAY)
    },
    RouteConfig {
      pattern: Some(r"^https://cdnjs\.cloudflare\.com".to_string()),
      ..RouteConfig::cached("cloudflare", StaleWhileRevalidate, "cloudflare-cdn")
        .limits(30, 30 * DAY)
    },
    RouteConfig {
      pattern: Some(r"^https?://[^/]+/api/".to_string()),
      origin: OriginScope::Same,
      network_timeout_seconds: Some(5),
      ..RouteConfig::cached("api", NetworkFirst, "api").limits(50, 5 * 60)
    },
  ]
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offline-first.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offline-first/config.yaml
  ///
  /// Without any file, the built-in defaults are used.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("offline-first.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offline-first").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    config.origin_url()?;
    Ok(config)
  }

  pub fn origin_url(&self) -> Result<Url> {
    Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))
  }

  /// Resolve a configured URL (absolute or origin-relative).
  pub fn resolve(&self, url: &str) -> Result<Url> {
    self
      .origin_url()?
      .join(url)
      .map_err(|e| eyre!("Invalid URL '{}': {}", url, e))
  }

  /// Directory for the database and log files.
  pub fn data_dir(&self) -> Result<PathBuf> {
    match &self.data_dir {
      Some(dir) => Ok(dir.clone()),
      None => crate::db::Database::default_dir(),
    }
  }

  pub fn retention(&self) -> chrono::Duration {
    chrono::Duration::hours(self.queue.retention_hours as i64)
  }
}
