//! The interception engine: routes every request to a strategy, the write
//! queue or the fallback provider.

use color_eyre::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::{CacheResult, CacheStorage, Partition, PartitionLimits};
use crate::config::Config;
use crate::fallback::FallbackProvider;
use crate::lifecycle::{
  generation_partitions, ActivateReport, Essentials, InstallReport, LifecycleManager,
  LifecycleState,
};
use crate::network::{Request, Response, Transport};
use crate::push::{PushHook, PushNotice};
use crate::queue::{QueueStorage, QueuedWrite, ReplayError, ReplayReport, WriteQueue};
use crate::router::{RouteAction, Router};
use crate::strategy::StrategyEngine;

/// The decision for one request.
#[derive(Debug, Clone)]
pub enum Intercepted {
  /// Answer with this response instead of the network
  Respond(CacheResult<Response>),
  /// Let the request go to the network untouched
  Passthrough,
}

/// An external replay trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncTrigger {
  /// A named background-sync tag such as "attendance-sync"
  Tag(String),
  /// Connectivity came back; replay every tag
  Reconnect,
}

/// Messages the host page can post to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerMessage {
  /// Activate now instead of waiting
  SkipWaiting,
}

pub struct Interceptor<S: CacheStorage, Q: QueueStorage, N: Transport> {
  router: Router,
  engine: StrategyEngine<N>,
  transport: Arc<N>,
  lifecycle: LifecycleManager<S, N>,
  partitions: HashMap<String, Partition<S>>,
  fallback: FallbackProvider<S>,
  queue: WriteQueue<Q, N>,
  push: PushHook,
  skip_waiting: bool,
}

impl<S: CacheStorage, Q: QueueStorage, N: Transport> Interceptor<S, Q, N> {
  pub fn new(
    config: &Config,
    storage: Arc<S>,
    queue_storage: Arc<Q>,
    transport: Arc<N>,
  ) -> Result<Self> {
    let router = Router::new(config)?;
    let generation = config.generation.clone();

    let partition_limits = router.partitions();
    let partitions = generation_partitions(&storage, &generation, &partition_limits);
    let essentials_partition = Partition::new(
      Arc::clone(&storage),
      generation.cache_name(&config.essentials.partition),
      PartitionLimits::default(),
    );

    let essentials = Essentials {
      urls: config
        .essentials
        .urls
        .iter()
        .map(|u| config.resolve(u))
        .collect::<Result<Vec<_>>>()?,
      offline_url: config.resolve(&config.essentials.offline_url)?,
      placeholder_image: config
        .essentials
        .placeholder_image
        .as_deref()
        .map(|u| config.resolve(u))
        .transpose()?,
      title: config.title.clone(),
    };

    let fallback = FallbackProvider::new(
      essentials_partition.clone(),
      essentials.offline_url.clone(),
      essentials.placeholder_image.clone(),
      &config.title,
    );

    let by_name = partition_limits
      .iter()
      .map(|(name, _)| name.clone())
      .zip(partitions.iter().cloned())
      .collect();

    let lifecycle = LifecycleManager::new(
      storage,
      Arc::clone(&transport),
      generation,
      essentials_partition,
      partitions,
      essentials,
    );

    let queue = WriteQueue::new(queue_storage, Arc::clone(&transport), config.retention());

    Ok(Self {
      router,
      engine: StrategyEngine::new(Arc::clone(&transport)),
      transport,
      lifecycle,
      partitions: by_name,
      fallback,
      queue,
      push: PushHook::new(&config.title, "/"),
      skip_waiting: config.skip_waiting,
    })
  }

  /// Install, then activate unless activation has to wait.
  pub async fn start(&mut self) -> Result<()> {
    self.install().await?;
    if self.skip_waiting {
      self.activate()?;
    } else {
      info!("Installed, waiting for activation");
    }
    Ok(())
  }

  pub async fn install(&mut self) -> Result<InstallReport> {
    self.lifecycle.install().await
  }

  pub fn activate(&mut self) -> Result<ActivateReport> {
    self.lifecycle.activate()
  }

  pub fn state(&self) -> LifecycleState {
    self.lifecycle.state()
  }

  pub fn on_message(&mut self, message: &WorkerMessage) -> Result<()> {
    match message {
      WorkerMessage::SkipWaiting => {
        self.skip_waiting = true;
        if self.lifecycle.state() == LifecycleState::Installed {
          self.activate()?;
        }
        Ok(())
      }
    }
  }

  /// Decide how to answer `request`.
  ///
  /// Nothing is intercepted until activation has completed. Once intercepted,
  /// a read always gets some response.
  pub async fn handle_fetch(&self, request: &Request) -> Intercepted {
    if !self.lifecycle.is_active() {
      return Intercepted::Passthrough;
    }

    let rule = self.router.match_request(request);
    debug!(url = %request.url, method = %request.method, rule = %rule.name, "Routing request");

    match &rule.action {
      RouteAction::Bypass => Intercepted::Passthrough,
      RouteAction::NetworkOnly => match self.transport.send(request).await {
        Ok(response) => Intercepted::Respond(CacheResult::from_network(response)),
        Err(e) => {
          debug!(url = %request.url, error = %e, "Network-only request failed");
          self.respond_with_fallback(request)
        }
      },
      RouteAction::WriteSync { tag } => self.send_or_enqueue(tag, request).await,
      RouteAction::Cache {
        strategy,
        partition,
        ..
      } => {
        let Some(partition) = self.partitions.get(partition) else {
          warn!(partition = %partition, "Route names an unknown partition");
          return Intercepted::Passthrough;
        };
        match self.engine.handle(*strategy, request, partition).await {
          Ok(result) => Intercepted::Respond(result),
          Err(e) => {
            debug!(url = %request.url, error = %e, "Strategy failed, using fallback");
            self.respond_with_fallback(request)
          }
        }
      }
    }
  }

  /// Serve the install-time copy of `request` if there is one, else the fallback.
  fn respond_with_fallback(&self, request: &Request) -> Intercepted {
    if let Some(entry) = self.fallback.precached(request) {
      debug!(url = %request.url, "Serving precached copy");
      return Intercepted::Respond(CacheResult::offline(entry.response, entry.stored_at));
    }
    Intercepted::Respond(CacheResult::fallback(self.fallback.fallback_for(request)))
  }

  /// Forward a write; on connectivity loss capture it instead of failing.
  async fn send_or_enqueue(&self, tag: &str, request: &Request) -> Intercepted {
    let err = match self.transport.send(request).await {
      Ok(response) => return Intercepted::Respond(CacheResult::from_network(response)),
      Err(e) => e,
    };

    if !err.is_connectivity() {
      warn!(url = %request.url, error = %err, "Write failed");
      return self.respond_with_fallback(request);
    }

    match self.queue.enqueue(tag, request) {
      Ok(id) => {
        let body = serde_json::json!({ "queued": true, "tag": tag, "id": id });
        Intercepted::Respond(CacheResult::queued(Response::text(
          202,
          "application/json",
          body.to_string(),
        )))
      }
      Err(e) => {
        warn!(url = %request.url, "Failed to queue write: {}", e);
        self.respond_with_fallback(request)
      }
    }
  }

  /// Replay deferred writes for a trigger. One result per replayed tag.
  pub async fn on_sync(&self, trigger: &SyncTrigger) -> Vec<Result<ReplayReport, ReplayError>> {
    match trigger {
      SyncTrigger::Tag(tag) => vec![self.queue.replay(tag).await],
      SyncTrigger::Reconnect => {
        let mut tags = self.router.sync_tags();
        match self.queue.all() {
          Ok(writes) => {
            for write in writes {
              if !tags.contains(&write.tag) {
                tags.push(write.tag);
              }
            }
          }
          Err(e) => warn!("Failed to list queued writes: {}", e),
        }
        self.queue.replay_tags(&tags).await
      }
    }
  }

  pub fn queued_writes(&self) -> Result<Vec<QueuedWrite>> {
    self.queue.all()
  }

  pub fn on_push(&self, payload: Option<&[u8]>) -> PushNotice {
    self.push.notice(payload)
  }

  pub fn on_notification_click(&self, action: Option<&str>) -> Option<String> {
    self.push.click_target(action)
  }

  /// Partition handle by configured name.
  pub fn partition(&self, name: &str) -> Option<&Partition<S>> {
    self.partitions.get(name)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheSource, SqliteStorage};
  use crate::db::Database;
  use crate::network::mock::MockTransport;
  use crate::network::Destination;
  use crate::queue::SqliteQueue;
  use std::time::Duration;

  type TestInterceptor = Interceptor<SqliteStorage, SqliteQueue, MockTransport>;

  const ORIGIN: &str = "https://school.test";

  fn config() -> Config {
    Config {
      origin: ORIGIN.to_string(),
      ..Config::default()
    }
  }

  fn url(path: &str) -> String {
    format!("{}{}", ORIGIN, path)
  }

  async fn started(config: &Config, db: &Database, transport: &Arc<MockTransport>) -> TestInterceptor {
    let mut interceptor = Interceptor::new(
      config,
      Arc::new(SqliteStorage::new(db.clone())),
      Arc::new(SqliteQueue::new(db.clone())),
      Arc::clone(transport),
    )
    .unwrap();
    interceptor.start().await.unwrap();
    interceptor
  }

  fn respond(intercepted: Intercepted) -> CacheResult<Response> {
    match intercepted {
      Intercepted::Respond(result) => result,
      Intercepted::Passthrough => panic!("expected a response, got passthrough"),
    }
  }

  fn image(path: &str) -> Request {
    Request::parse(&url(path))
      .unwrap()
      .with_destination(Destination::Image)
  }

  #[tokio::test]
  async fn test_offline_navigation_gets_offline_page() {
    let db = Database::open_in_memory().unwrap();
    let transport = Arc::new(MockTransport::new());
    let interceptor = started(&config(), &db, &transport).await;

    let request = Request::navigate(url("/student/dashboard").parse().unwrap());
    let result = respond(interceptor.handle_fetch(&request).await);

    assert_eq!(result.source, CacheSource::Fallback);
    assert_eq!(result.data.status, 200);
    assert!(result.data.content_type().unwrap().starts_with("text/html"));
    assert!(String::from_utf8(result.data.body).unwrap().contains("offline"));
  }

  #[tokio::test]
  async fn test_offline_navigation_to_precached_page_serves_it() {
    let db = Database::open_in_memory().unwrap();
    let transport = Arc::new(MockTransport::new());
    transport
      .respond(&url("/login"), Response::text(200, "text/html", "LOGIN PAGE"))
      .fail(&url("/login"));
    let interceptor = started(&config(), &db, &transport).await;

    let request = Request::navigate(url("/login").parse().unwrap());
    let result = respond(interceptor.handle_fetch(&request).await);

    assert_eq!(result.source, CacheSource::Offline);
    assert_eq!(result.data.status, 200);
    assert_eq!(result.data.body, b"LOGIN PAGE");
  }

  #[tokio::test]
  async fn test_offline_restart_keeps_cached_offline_page() {
    let db = Database::open_in_memory().unwrap();
    let online = Arc::new(MockTransport::new());
    online.respond(&url("/offline"), Response::text(200, "text/html", "REAL OFFLINE"));
    started(&config(), &db, &online).await;

    let offline = Arc::new(MockTransport::new());
    let interceptor = started(&config(), &db, &offline).await;

    let request = Request::navigate(url("/timetable").parse().unwrap());
    let result = respond(interceptor.handle_fetch(&request).await);

    assert_eq!(result.source, CacheSource::Fallback);
    assert_eq!(result.data.body, b"REAL OFFLINE");
  }

  #[tokio::test]
  async fn test_image_partition_keeps_two_most_recent() {
    let mut config = config();
    config.routes = serde_yaml::from_str(
      r#"
- name: images
  strategy: cache-first
  destinations: [image]
  partition: images
  max_entries: 2
"#,
    )
    .unwrap();
    let db = Database::open_in_memory().unwrap();
    let transport = Arc::new(MockTransport::new());
    for path in ["/1.png", "/2.png", "/3.png"] {
      transport.respond(&url(path), Response::text(200, "image/png", path));
    }
    let interceptor = started(&config, &db, &transport).await;

    for path in ["/1.png", "/2.png", "/3.png"] {
      let result = respond(interceptor.handle_fetch(&image(path)).await);
      assert_eq!(result.source, CacheSource::Network);
      // Distinct insertion times
      tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let urls: Vec<String> = interceptor
      .partition("images")
      .unwrap()
      .keys()
      .unwrap()
      .into_iter()
      .map(|k| k.url)
      .collect();
    assert_eq!(urls, vec![url("/2.png"), url("/3.png")]);
  }

  #[tokio::test]
  async fn test_network_first_late_response_without_cache_falls_back() {
    let mut config = config();
    config.routes = serde_yaml::from_str(
      r#"
- name: api
  strategy: network-first
  pattern: "/api/"
  partition: api
  network_timeout_seconds: 1
"#,
    )
    .unwrap();
    let db = Database::open_in_memory().unwrap();
    let transport = Arc::new(MockTransport::new());
    transport.respond_after(
      &url("/api/students"),
      Duration::from_millis(1200),
      Response::text(200, "application/json", "[]"),
    );
    let interceptor = started(&config, &db, &transport).await;

    let request = Request::parse(&url("/api/students")).unwrap();
    let result = respond(interceptor.handle_fetch(&request).await);

    assert_eq!(result.source, CacheSource::Fallback);
    assert_eq!(result.data.status, 408);
  }

  #[tokio::test]
  async fn test_offline_write_is_queued_then_replayed() {
    let db = Database::open_in_memory().unwrap();
    let transport = Arc::new(MockTransport::new());
    let interceptor = started(&config(), &db, &transport).await;

    let write = Request::parse(&url("/api/attendance"))
      .unwrap()
      .with_method("POST")
      .with_header("Content-Type", "application/json")
      .with_body(r#"{"student":1,"present":true}"#);
    let result = respond(interceptor.handle_fetch(&write).await);

    assert_eq!(result.source, CacheSource::Queued);
    assert_eq!(result.data.status, 202);
    assert_eq!(interceptor.queued_writes().unwrap().len(), 1);

    transport.respond(&url("/api/attendance"), Response::new(201));
    let results = interceptor
      .on_sync(&SyncTrigger::Tag("attendance-sync".to_string()))
      .await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].as_ref().unwrap().delivered.len(), 1);
    assert!(interceptor.queued_writes().unwrap().is_empty());
    let replayed = transport.calls().pop().unwrap();
    assert_eq!(replayed.body, write.body);
  }

  #[tokio::test]
  async fn test_online_write_goes_straight_through() {
    let db = Database::open_in_memory().unwrap();
    let transport = Arc::new(MockTransport::new());
    transport.respond(&url("/api/grades"), Response::new(201));
    let interceptor = started(&config(), &db, &transport).await;

    let write = Request::parse(&url("/api/grades")).unwrap().with_method("POST");
    let result = respond(interceptor.handle_fetch(&write).await);

    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(result.data.status, 201);
    assert!(interceptor.queued_writes().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_reconnect_replays_every_tag() {
    let db = Database::open_in_memory().unwrap();
    let transport = Arc::new(MockTransport::new());
    let interceptor = started(&config(), &db, &transport).await;
    for path in ["/api/attendance", "/api/grades"] {
      let write = Request::parse(&url(path)).unwrap().with_method("POST");
      interceptor.handle_fetch(&write).await;
    }
    transport
      .respond(&url("/api/attendance"), Response::new(200))
      .respond(&url("/api/grades"), Response::new(200));

    let results = interceptor.on_sync(&SyncTrigger::Reconnect).await;

    assert!(results.iter().all(|r| r.is_ok()));
    assert!(interceptor.queued_writes().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_unlisted_external_host_passes_through() {
    let db = Database::open_in_memory().unwrap();
    let transport = Arc::new(MockTransport::new());
    let interceptor = started(&config(), &db, &transport).await;

    let request = Request::parse("https://analytics.example/collect").unwrap();
    assert!(matches!(
      interceptor.handle_fetch(&request).await,
      Intercepted::Passthrough
    ));
  }

  #[tokio::test]
  async fn test_nothing_intercepted_until_activated() {
    let mut config = config();
    config.skip_waiting = false;
    let db = Database::open_in_memory().unwrap();
    let transport = Arc::new(MockTransport::new());
    let mut interceptor = started(&config, &db, &transport).await;
    assert_eq!(interceptor.state(), LifecycleState::Installed);

    let request = Request::navigate(url("/").parse().unwrap());
    assert!(matches!(
      interceptor.handle_fetch(&request).await,
      Intercepted::Passthrough
    ));

    interceptor.on_message(&WorkerMessage::SkipWaiting).unwrap();
    assert_eq!(interceptor.state(), LifecycleState::Activated);
    assert!(matches!(
      interceptor.handle_fetch(&request).await,
      Intercepted::Respond(_)
    ));
  }

  #[tokio::test]
  async fn test_generation_bump_removes_previous_partitions() {
    let db = Database::open_in_memory().unwrap();
    let transport = Arc::new(MockTransport::new());
    started(&config(), &db, &transport).await;

    let mut bumped = config();
    bumped.generation.version = "2.0.0".to_string();
    started(&bumped, &db, &transport).await;

    let names = SqliteStorage::new(db.clone()).list_names().unwrap();
    assert!(!names.is_empty());
    assert!(names.iter().all(|n| n.starts_with("school-ms-v2.0.0-")));
  }

  #[tokio::test]
  async fn test_push_hook() {
    let db = Database::open_in_memory().unwrap();
    let transport = Arc::new(MockTransport::new());
    let interceptor = started(&config(), &db, &transport).await;

    let notice = interceptor.on_push(Some(b"Fees due"));
    assert_eq!(notice.title, "School Management System");
    assert_eq!(notice.body, "Fees due");
    assert_eq!(interceptor.on_notification_click(Some("close")), None);
  }
}
