//! Push hook. Turns an opaque payload into notice data; showing it is the host's job.

const DEFAULT_BODY: &str = "New notification available";
const NOTICE_TAG: &str = "app-notification";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushNotice {
  pub title: String,
  pub body: String,
  /// Notices sharing a tag replace each other
  pub tag: String,
  /// Where a click on the notice should lead
  pub url: String,
}

pub struct PushHook {
  title: String,
  open_url: String,
}

impl PushHook {
  pub fn new(title: &str, open_url: &str) -> Self {
    Self {
      title: title.to_string(),
      open_url: open_url.to_string(),
    }
  }

  /// Empty or non-UTF-8 payloads get the default body.
  pub fn notice(&self, payload: Option<&[u8]>) -> PushNotice {
    let body = payload
      .and_then(|bytes| std::str::from_utf8(bytes).ok())
      .map(str::trim)
      .filter(|text| !text.is_empty())
      .unwrap_or(DEFAULT_BODY);

    PushNotice {
      title: self.title.clone(),
      body: body.to_string(),
      tag: NOTICE_TAG.to_string(),
      url: self.open_url.clone(),
    }
  }

  /// URL to open for a notice action; `close` opens nothing.
  pub fn click_target(&self, action: Option<&str>) -> Option<String> {
    match action {
      None | Some("") | Some("open") | Some("explore") => Some(self.open_url.clone()),
      Some(_) => None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_payload_becomes_body() {
    let hook = PushHook::new("School", "/");
    let notice = hook.notice(Some(b"Grades posted"));
    assert_eq!(notice.title, "School");
    assert_eq!(notice.body, "Grades posted");
    assert_eq!(notice.url, "/");
  }

  #[test]
  fn test_missing_payload_uses_default() {
    let hook = PushHook::new("School", "/");
    assert_eq!(hook.notice(None).body, DEFAULT_BODY);
    assert_eq!(hook.notice(Some(b"  ")).body, DEFAULT_BODY);
  }

  #[test]
  fn test_click_targets() {
    let hook = PushHook::new("School", "/");
    assert_eq!(hook.click_target(None), Some("/".to_string()));
    assert_eq!(hook.click_target(Some("open")), Some("/".to_string()));
    assert_eq!(hook.click_target(Some("close")), None);
  }
}
