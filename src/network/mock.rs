//! Scripted transport for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use super::client::Transport;
use super::error::FetchError;
use super::types::{Request, Response};

#[derive(Debug, Clone)]
pub enum MockReply {
  Respond(Response),
  RespondAfter(Duration, Response),
  Fail,
}

/// Replies are queued per URL; the last reply for a URL repeats forever.
/// Unknown URLs fail as if the network were down.
#[derive(Default)]
pub struct MockTransport {
  replies: Mutex<HashMap<String, VecDeque<MockReply>>>,
  calls: Mutex<Vec<Request>>,
}

fn normalize(url: &str) -> String {
  url::Url::parse(url)
    .map(|u| u.to_string())
    .unwrap_or_else(|_| url.to_string())
}

impl MockTransport {
  pub fn new() -> Self {
    Self::default()
  }

  /// Queue a reply for `url`.
  pub fn push(&self, url: &str, reply: MockReply) -> &Self {
    self
      .replies
      .lock()
      .unwrap()
      .entry(normalize(url))
      .or_default()
      .push_back(reply);
    self
  }

  pub fn respond(&self, url: &str, response: Response) -> &Self {
    self.push(url, MockReply::Respond(response))
  }

  pub fn respond_after(&self, url: &str, delay: Duration, response: Response) -> &Self {
    self.push(url, MockReply::RespondAfter(delay, response))
  }

  pub fn fail(&self, url: &str) -> &Self {
    self.push(url, MockReply::Fail)
  }

  /// Every request sent so far, in order.
  pub fn calls(&self) -> Vec<Request> {
    self.calls.lock().unwrap().clone()
  }

  pub fn call_count(&self, url: &str) -> usize {
    let url = normalize(url);
    self
      .calls
      .lock()
      .unwrap()
      .iter()
      .filter(|r| r.url.as_str() == url)
      .count()
  }

  fn next_reply(&self, url: &str) -> MockReply {
    let mut replies = self.replies.lock().unwrap();
    match replies.get_mut(url) {
      Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or(MockReply::Fail),
      Some(queue) => queue.front().cloned().unwrap_or(MockReply::Fail),
      None => MockReply::Fail,
    }
  }
}

impl Transport for MockTransport {
  async fn send(&self, request: &Request) -> Result<Response, FetchError> {
    self.calls.lock().unwrap().push(request.clone());

    match self.next_reply(request.url.as_str()) {
      MockReply::Respond(response) => Ok(response),
      MockReply::RespondAfter(delay, response) => {
        tokio::time::sleep(delay).await;
        Ok(response)
      }
      MockReply::Fail => Err(FetchError::NetworkUnavailable(format!(
        "no route to {}",
        request.url
      ))),
    }
  }
}
