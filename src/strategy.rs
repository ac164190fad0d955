//! Read strategies that combine a cache partition with the network.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cache::{CacheEntry, CacheResult, CacheStorage, Partition};
use crate::network::{FetchError, Request, Response, Transport};

/// Read policy applied to a class of requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  /// Serve from cache when present and unexpired, otherwise fetch and store
  CacheFirst,
  /// Race the network against `timeout`, falling back to cache
  NetworkFirst { timeout: Duration },
  /// Serve from cache immediately and refresh it in the background
  StaleWhileRevalidate,
}

/// Runs strategies against the network transport.
///
/// Cache write failures are logged and never fail the request being cached.
pub struct StrategyEngine<N: Transport> {
  transport: Arc<N>,
}

impl<N: Transport> StrategyEngine<N> {
  pub fn new(transport: Arc<N>) -> Self {
    Self { transport }
  }

  /// Answer `request` from `partition` and/or the network.
  ///
  /// An `Err` means neither source could answer; the caller falls back.
  pub async fn handle<S: CacheStorage>(
    &self,
    strategy: Strategy,
    request: &Request,
    partition: &Partition<S>,
  ) -> Result<CacheResult<Response>, FetchError> {
    match strategy {
      Strategy::CacheFirst => self.cache_first(request, partition).await,
      Strategy::NetworkFirst { timeout } => self.network_first(request, partition, timeout).await,
      Strategy::StaleWhileRevalidate => self.stale_while_revalidate(request, partition).await,
    }
  }

  /// 1. Unexpired cache entry: return it, the network is not touched
  /// 2. Otherwise fetch, store a copy on success, return
  /// 3. Network failure propagates
  async fn cache_first<S: CacheStorage>(
    &self,
    request: &Request,
    partition: &Partition<S>,
  ) -> Result<CacheResult<Response>, FetchError> {
    if let Some(entry) = lookup(partition, request) {
      debug!(url = %request.url, cache = partition.name(), "Cache hit");
      return Ok(CacheResult::from_cache(entry.response, entry.stored_at, false));
    }

    self.fetch_and_store(request, partition).await
  }

  /// The fetch runs as its own task. If the timeout wins, the task is
  /// detached and still writes its response to the cache when it lands.
  async fn network_first<S: CacheStorage>(
    &self,
    request: &Request,
    partition: &Partition<S>,
    timeout: Duration,
  ) -> Result<CacheResult<Response>, FetchError> {
    let fetch = self.spawn_fetch(request.clone(), partition.clone());

    let outcome = match tokio::time::timeout(timeout, fetch).await {
      Ok(Ok(result)) => result,
      Ok(Err(e)) => Err(FetchError::NetworkUnavailable(format!("fetch task failed: {}", e))),
      Err(_) => {
        debug!(url = %request.url, ?timeout, "Network timed out, trying cache");
        Err(FetchError::NetworkTimeout(timeout))
      }
    };

    match outcome {
      Ok(response) => Ok(CacheResult::from_network(response)),
      Err(err) => match lookup(partition, request) {
        Some(entry) => {
          debug!(url = %request.url, error = %err, "Serving cached entry");
          Ok(CacheResult::offline(entry.response, entry.stored_at))
        }
        None => Err(err),
      },
    }
  }

  /// The returned entry is whatever was cached before the call; the refresh
  /// only affects later reads.
  async fn stale_while_revalidate<S: CacheStorage>(
    &self,
    request: &Request,
    partition: &Partition<S>,
  ) -> Result<CacheResult<Response>, FetchError> {
    match lookup(partition, request) {
      Some(entry) => {
        debug!(url = %request.url, cache = partition.name(), "Cache hit, revalidating");
        self.revalidate_in_background(request.clone(), partition.clone());
        Ok(CacheResult::from_cache(entry.response, entry.stored_at, true))
      }
      None => self.fetch_and_store(request, partition).await,
    }
  }

  async fn fetch_and_store<S: CacheStorage>(
    &self,
    request: &Request,
    partition: &Partition<S>,
  ) -> Result<CacheResult<Response>, FetchError> {
    let response = self.transport.send(request).await?;
    store(partition, request, &response);
    Ok(CacheResult::from_network(response))
  }

  fn spawn_fetch<S: CacheStorage>(
    &self,
    request: Request,
    partition: Partition<S>,
  ) -> JoinHandle<Result<Response, FetchError>> {
    let transport = Arc::clone(&self.transport);
    tokio::spawn(async move {
      let response = transport.send(&request).await?;
      store(&partition, &request, &response);
      Ok(response)
    })
  }

  /// Detached: the caller never joins this task and its failure is only logged.
  fn revalidate_in_background<S: CacheStorage>(&self, request: Request, partition: Partition<S>) {
    let transport = Arc::clone(&self.transport);
    tokio::spawn(async move {
      match transport.send(&request).await {
        Ok(response) => store(&partition, &request, &response),
        Err(e) => debug!(url = %request.url, error = %e, "Background revalidation failed"),
      }
    });
  }
}

impl<N: Transport> Clone for StrategyEngine<N> {
  fn clone(&self) -> Self {
    Self {
      transport: Arc::clone(&self.transport),
    }
  }
}

/// Read errors count as misses.
fn lookup<S: CacheStorage>(partition: &Partition<S>, request: &Request) -> Option<CacheEntry> {
  match partition.get(request) {
    Ok(entry) => entry,
    Err(e) => {
      warn!(url = %request.url, cache = partition.name(), "Cache read failed: {}", e);
      None
    }
  }
}

/// Write an independent copy of `response`. Only successful, complete responses
/// are stored; write failures are logged.
fn store<S: CacheStorage>(partition: &Partition<S>, request: &Request, response: &Response) {
  if !response.is_cacheable() {
    debug!(url = %request.url, status = response.status, "Not caching response");
    return;
  }

  if let Err(e) = partition.put(request, response.clone()) {
    warn!(url = %request.url, cache = partition.name(), "Cache write failed: {}", e);
  }
}
