//! Deferred write queue: state-changing requests made while offline are
//! persisted and replayed later, at least once.
//!
//! Each queued write is either delivered (and removed) or stays pending with
//! its retry count bumped. Writes older than the retention ceiling are
//! discarded and reported instead of replayed.

mod storage;

pub use storage::{QueueStorage, QueuedWrite, SqliteQueue};

use chrono::{Duration, Utc};
use color_eyre::Result;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::network::{Request, Transport};

/// Outcome of one replay run for a tag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
  pub tag: String,
  /// Ids delivered and removed
  pub delivered: Vec<i64>,
  /// Ids still queued after a failed attempt
  pub retried: Vec<i64>,
  /// Writes dropped for exceeding the retention ceiling
  pub discarded: Vec<QueuedWrite>,
}

#[derive(Error, Debug)]
pub enum ReplayError {
  /// Some writes are still queued; the host should schedule another replay
  #[error("{} write(s) for '{}' still queued", .0.retried.len(), .0.tag)]
  Incomplete(ReplayReport),

  #[error("Replay for '{0}' is already running")]
  AlreadyRunning(String),

  #[error("Queue storage error: {0}")]
  Storage(String),
}

impl From<color_eyre::Report> for ReplayError {
  fn from(err: color_eyre::Report) -> Self {
    ReplayError::Storage(err.to_string())
  }
}

/// Persists and replays writes, one tag at a time.
pub struct WriteQueue<Q: QueueStorage, N: Transport> {
  storage: Arc<Q>,
  transport: Arc<N>,
  retention: Duration,
  running: Mutex<HashSet<String>>,
}

/// Marks a tag as replaying until dropped.
struct RunningGuard<'a> {
  running: &'a Mutex<HashSet<String>>,
  tag: String,
}

impl Drop for RunningGuard<'_> {
  fn drop(&mut self) {
    if let Ok(mut running) = self.running.lock() {
      running.remove(&self.tag);
    }
  }
}

impl<Q: QueueStorage, N: Transport> WriteQueue<Q, N> {
  pub fn new(storage: Arc<Q>, transport: Arc<N>, retention: Duration) -> Self {
    Self {
      storage,
      transport,
      retention,
      running: Mutex::new(HashSet::new()),
    }
  }

  /// Capture `request` in full for later replay under `tag`.
  pub fn enqueue(&self, tag: &str, request: &Request) -> Result<i64> {
    let id = self.storage.push(tag, request, Utc::now())?;
    info!(tag, id, url = %request.url, "Queued write for replay");
    Ok(id)
  }

  pub fn all(&self) -> Result<Vec<QueuedWrite>> {
    self.storage.all()
  }

  /// Replay every write queued under `tag`, sequentially in enqueue order.
  ///
  /// Failed deliveries stay queued with their retry count incremented and
  /// make the whole run return `ReplayError::Incomplete`.
  pub async fn replay(&self, tag: &str) -> Result<ReplayReport, ReplayError> {
    let _guard = self.begin(tag)?;
    let mut report = ReplayReport {
      tag: tag.to_string(),
      ..Default::default()
    };

    for write in self.storage.pending(tag)? {
      if Utc::now() - write.enqueued_at > self.retention {
        warn!(
          tag,
          id = write.id,
          url = %write.url,
          retries = write.retry_count,
          "Discarding write past retention ceiling"
        );
        self.storage.remove(write.id)?;
        report.discarded.push(write);
        continue;
      }

      if self.deliver(&write).await {
        self.storage.remove(write.id)?;
        report.delivered.push(write.id);
      } else {
        let retries = self.storage.mark_retry(write.id)?;
        debug!(tag, id = write.id, retries, "Write stays queued");
        report.retried.push(write.id);
      }
    }

    info!(
      tag,
      delivered = report.delivered.len(),
      retried = report.retried.len(),
      discarded = report.discarded.len(),
      "Replay finished"
    );

    if report.retried.is_empty() {
      Ok(report)
    } else {
      Err(ReplayError::Incomplete(report))
    }
  }

  /// Replay several tags concurrently; each tag still runs sequentially.
  pub async fn replay_tags(&self, tags: &[String]) -> Vec<Result<ReplayReport, ReplayError>> {
    futures::future::join_all(tags.iter().map(|tag| self.replay(tag))).await
  }

  /// Server errors are retried; any other response counts as delivered.
  async fn deliver(&self, write: &QueuedWrite) -> bool {
    let request = match write.to_request() {
      Ok(request) => request,
      Err(e) => {
        warn!(id = write.id, "Cannot rebuild queued write: {}", e);
        return false;
      }
    };

    match self.transport.send(&request).await {
      Ok(response) if response.status >= 500 => {
        debug!(id = write.id, status = response.status, "Server rejected replay");
        false
      }
      Ok(_) => true,
      Err(e) => {
        debug!(id = write.id, error = %e, "Replay failed");
        false
      }
    }
  }

  fn begin(&self, tag: &str) -> Result<RunningGuard<'_>, ReplayError> {
    let mut running = self
      .running
      .lock()
      .map_err(|e| ReplayError::Storage(format!("Lock poisoned: {}", e)))?;
    if !running.insert(tag.to_string()) {
      return Err(ReplayError::AlreadyRunning(tag.to_string()));
    }
    Ok(RunningGuard {
      running: &self.running,
      tag: tag.to_string(),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::db::Database;
  use crate::network::mock::MockTransport;
  use crate::network::Response;

  const URL: &str = "https://school.test/api/attendance";

  fn setup() -> (
    WriteQueue<SqliteQueue, MockTransport>,
    Arc<SqliteQueue>,
    Arc<MockTransport>,
  ) {
    let storage = Arc::new(SqliteQueue::new(Database::open_in_memory().unwrap()));
    let transport = Arc::new(MockTransport::new());
    let queue = WriteQueue::new(
      Arc::clone(&storage),
      Arc::clone(&transport),
      Duration::hours(24),
    );
    (queue, storage, transport)
  }

  fn write(body: &str) -> Request {
    Request::parse(URL)
      .unwrap()
      .with_method("POST")
      .with_body(body)
  }

  #[tokio::test]
  async fn test_second_of_three_fails() {
    let (queue, storage, transport) = setup();
    let ids: Vec<i64> = ["1", "2", "3"]
      .iter()
      .map(|b| queue.enqueue("attendance-sync", &write(b)).unwrap())
      .collect();
    transport
      .respond(URL, Response::new(201))
      .fail(URL)
      .respond(URL, Response::new(201));

    let result = queue.replay("attendance-sync").await;

    let report = match result {
      Err(ReplayError::Incomplete(report)) => report,
      other => panic!("expected incomplete replay, got {:?}", other),
    };
    assert_eq!(report.delivered, vec![ids[0], ids[2]]);
    assert_eq!(report.retried, vec![ids[1]]);

    let remaining = storage.pending("attendance-sync").unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, ids[1]);
    assert_eq!(remaining[0].retry_count, 1);
    assert_eq!(remaining[0].body.as_deref(), Some(b"2".as_slice()));
  }

  #[tokio::test]
  async fn test_replay_in_enqueue_order() {
    let (queue, _storage, transport) = setup();
    for body in ["a", "b", "c"] {
      queue.enqueue("attendance-sync", &write(body)).unwrap();
    }
    transport.respond(URL, Response::new(200));

    let report = queue.replay("attendance-sync").await.unwrap();

    assert_eq!(report.delivered.len(), 3);
    let bodies: Vec<Vec<u8>> = transport
      .calls()
      .into_iter()
      .filter_map(|r| r.body)
      .collect();
    assert_eq!(bodies, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
  }

  #[tokio::test]
  async fn test_server_error_is_retried_client_error_is_delivered() {
    let (queue, storage, transport) = setup();
    queue.enqueue("attendance-sync", &write("1")).unwrap();
    queue.enqueue("attendance-sync", &write("2")).unwrap();
    transport
      .respond(URL, Response::new(503))
      .respond(URL, Response::new(422));

    assert!(queue.replay("attendance-sync").await.is_err());
    assert_eq!(storage.pending("attendance-sync").unwrap().len(), 1);
  }

  #[tokio::test]
  async fn test_expired_writes_are_discarded() {
    let (queue, storage, transport) = setup();
    storage
      .push(
        "attendance-sync",
        &write("old"),
        Utc::now() - Duration::hours(25),
      )
      .unwrap();
    transport.respond(URL, Response::new(200));

    let report = queue.replay("attendance-sync").await.unwrap();

    assert_eq!(report.discarded.len(), 1);
    assert!(report.delivered.is_empty());
    assert_eq!(transport.calls().len(), 0);
    assert!(storage.all().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_tags_are_independent() {
    let (queue, storage, transport) = setup();
    queue.enqueue("attendance-sync", &write("a")).unwrap();
    queue
      .enqueue(
        "grades-sync",
        &Request::parse("https://school.test/api/grades")
          .unwrap()
          .with_method("POST"),
      )
      .unwrap();
    transport.respond(URL, Response::new(200));

    let results = queue
      .replay_tags(&["attendance-sync".to_string(), "grades-sync".to_string()])
      .await;

    assert!(results[0].is_ok());
    assert!(matches!(results[1], Err(ReplayError::Incomplete(_))));
    assert_eq!(storage.all().unwrap().len(), 1);
  }

  #[tokio::test]
  async fn test_same_tag_is_not_reentrant() {
    let (queue, _storage, transport) = setup();
    queue.enqueue("attendance-sync", &write("a")).unwrap();
    transport.respond_after(URL, std::time::Duration::from_millis(50), Response::new(200));

    let (first, second) = tokio::join!(
      queue.replay("attendance-sync"),
      queue.replay("attendance-sync")
    );

    let outcomes = [first, second];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(outcomes
      .iter()
      .any(|r| matches!(r, Err(ReplayError::AlreadyRunning(_)))));
  }

  #[tokio::test]
  async fn test_empty_queue_replays_cleanly() {
    let (queue, _storage, _transport) = setup();
    let report = queue.replay("grades-sync").await.unwrap();
    assert_eq!(report, ReplayReport {
      tag: "grades-sync".to_string(),
      ..Default::default()
    });
  }
}
