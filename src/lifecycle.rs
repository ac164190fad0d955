//! Install and activate: populate the current generation, retire the old ones.

use color_eyre::{eyre::eyre, Result};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{CacheGeneration, CacheStorage, Partition, PartitionLimits};
use crate::fallback::offline_page;
use crate::network::{Request, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
  /// Nothing has run yet
  Parsed,
  /// Install completed; waiting to activate
  Installed,
  /// Old generations deleted; requests are being intercepted
  Activated,
}

/// What Install cached and what it had to skip.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
  pub cached: Vec<String>,
  pub skipped: Vec<String>,
  /// The offline page could not be fetched and was generated locally
  pub offline_page_synthesized: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivateReport {
  pub deleted: Vec<String>,
}

/// The app shell and offline assets cached at install time.
#[derive(Debug, Clone)]
pub struct Essentials {
  pub urls: Vec<Url>,
  pub offline_url: Url,
  pub placeholder_image: Option<Url>,
  pub title: String,
}

/// Runs Install then Activate, each once per process activation.
pub struct LifecycleManager<S: CacheStorage, N: Transport> {
  storage: Arc<S>,
  transport: Arc<N>,
  generation: CacheGeneration,
  essentials_partition: Partition<S>,
  partitions: Vec<Partition<S>>,
  essentials: Essentials,
  state: LifecycleState,
}

impl<S: CacheStorage, N: Transport> LifecycleManager<S, N> {
  pub fn new(
    storage: Arc<S>,
    transport: Arc<N>,
    generation: CacheGeneration,
    essentials_partition: Partition<S>,
    partitions: Vec<Partition<S>>,
    essentials: Essentials,
  ) -> Self {
    Self {
      storage,
      transport,
      generation,
      essentials_partition,
      partitions,
      essentials,
      state: LifecycleState::Parsed,
    }
  }

  pub fn state(&self) -> LifecycleState {
    self.state
  }

  pub fn is_active(&self) -> bool {
    self.state == LifecycleState::Activated
  }

  /// Open every partition of the current generation and populate essentials.
  ///
  /// Individual URLs that fail are skipped; only storage failures while
  /// opening partitions abort the install.
  pub async fn install(&mut self) -> Result<InstallReport> {
    if self.state != LifecycleState::Parsed {
      return Err(eyre!("Install already ran for {}", self.generation));
    }
    info!(generation = %self.generation, "Installing");

    self.storage.open(self.essentials_partition.name())?;
    for partition in &self.partitions {
      self.storage.open(partition.name())?;
    }

    let mut report = InstallReport::default();

    let offline_url = self.essentials.offline_url.clone();
    if !self.precache(&offline_url, &mut report).await {
      // A copy from an earlier install beats the built-in page
      match self.essentials_partition.match_url(&offline_url) {
        Ok(Some(_)) => info!("Offline page unavailable, keeping the cached copy"),
        _ => {
          info!("Offline page unavailable, using built-in page");
          let request = Request::get(offline_url);
          match self
            .essentials_partition
            .put(&request, offline_page(&self.essentials.title))
          {
            Ok(()) => report.offline_page_synthesized = true,
            Err(e) => warn!("Failed to store built-in offline page: {}", e),
          }
        }
      }
    }

    let mut urls = self.essentials.urls.clone();
    urls.extend(self.essentials.placeholder_image.clone());
    for url in urls {
      self.precache(&url, &mut report).await;
    }

    info!(
      cached = report.cached.len(),
      skipped = report.skipped.len(),
      "Install complete"
    );
    self.state = LifecycleState::Installed;
    Ok(report)
  }

  /// Fetch `url` into the essentials partition. Returns whether it was cached.
  async fn precache(&self, url: &Url, report: &mut InstallReport) -> bool {
    let request = Request::get(url.clone());
    let outcome = match self.transport.send(&request).await {
      Ok(response) if response.is_cacheable() => self
        .essentials_partition
        .put(&request, response)
        .map_err(|e| e.to_string()),
      Ok(response) => Err(format!("status {}", response.status)),
      Err(e) => Err(e.to_string()),
    };

    match outcome {
      Ok(()) => {
        debug!(url = %url, "Precached");
        report.cached.push(url.to_string());
        true
      }
      Err(reason) => {
        warn!(url = %url, "Skipping essential URL: {}", reason);
        report.skipped.push(url.to_string());
        false
      }
    }
  }

  /// Delete every cache of this application that does not belong to the
  /// current generation, then take control.
  pub fn activate(&mut self) -> Result<ActivateReport> {
    match self.state {
      LifecycleState::Installed => {}
      LifecycleState::Parsed => return Err(eyre!("Cannot activate before install")),
      LifecycleState::Activated => return Err(eyre!("Already activated")),
    }
    info!(generation = %self.generation, "Activating");

    let current: HashSet<&str> = std::iter::once(self.essentials_partition.name())
      .chain(self.partitions.iter().map(|p| p.name()))
      .collect();

    let mut report = ActivateReport::default();
    for name in self.storage.list_names()? {
      if self.generation.is_app_cache(&name) && !current.contains(name.as_str()) {
        info!(cache = %name, "Deleting old cache");
        self.storage.delete_cache(&name)?;
        report.deleted.push(name);
      }
    }

    self.state = LifecycleState::Activated;
    info!("Activated and claimed");
    Ok(report)
  }
}

/// Build the partition handles for `generation`.
pub fn generation_partitions<S: CacheStorage>(
  storage: &Arc<S>,
  generation: &CacheGeneration,
  partitions: &[(String, PartitionLimits)],
) -> Vec<Partition<S>> {
  partitions
    .iter()
    .map(|(name, limits)| {
      Partition::new(Arc::clone(storage), generation.cache_name(name), *limits)
    })
    .collect()
}
