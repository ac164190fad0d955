//! Ordered routing rules mapping requests to a handling action.

use color_eyre::{eyre::eyre, Result};
use regex::Regex;
use std::collections::HashMap;
use std::time::Duration;
use url::{Origin, Url};

use crate::cache::PartitionLimits;
use crate::config::{Config, OriginScope, RouteConfig, StrategyKind};
use crate::network::{Destination, Request};
use crate::strategy::Strategy;

const DEFAULT_NETWORK_TIMEOUT_SECS: u64 = 5;
const WRITE_METHODS: [&str; 4] = ["POST", "PUT", "PATCH", "DELETE"];

/// What to do with a matched request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteAction {
  /// Answer through a caching strategy backed by `partition`
  Cache {
    strategy: Strategy,
    partition: String,
    limits: PartitionLimits,
  },
  /// Forward to the network, falling back when it fails
  NetworkOnly,
  /// Forward a state-changing request, queueing it under `tag` when offline
  WriteSync { tag: String },
  /// Let the request pass through untouched
  Bypass,
}

impl RouteAction {
  fn is_caching(&self) -> bool {
    matches!(self, Self::Cache { .. })
  }
}

#[derive(Debug, Clone)]
pub struct RoutingRule {
  pub name: String,
  destinations: Vec<Destination>,
  origin: OriginScope,
  pattern: Option<Regex>,
  methods: Vec<String>,
  pub action: RouteAction,
}

impl RoutingRule {
  fn bypass() -> Self {
    Self {
      name: "default".to_string(),
      destinations: Vec::new(),
      origin: OriginScope::Any,
      pattern: None,
      methods: Vec::new(),
      action: RouteAction::Bypass,
    }
  }

  fn compile(route: &RouteConfig) -> Result<Self> {
    let pattern = route
      .pattern
      .as_deref()
      .map(Regex::new)
      .transpose()
      .map_err(|e| eyre!("Route '{}' has an invalid pattern: {}", route.name, e))?;

    let action = match route.strategy {
      StrategyKind::CacheFirst | StrategyKind::NetworkFirst | StrategyKind::StaleWhileRevalidate => {
        let partition = route
          .partition
          .clone()
          .ok_or_else(|| eyre!("Route '{}' caches but names no partition", route.name))?;
        let strategy = match route.strategy {
          StrategyKind::CacheFirst => Strategy::CacheFirst,
          StrategyKind::NetworkFirst => Strategy::NetworkFirst {
            timeout: Duration::from_secs(
              route
                .network_timeout_seconds
                .unwrap_or(DEFAULT_NETWORK_TIMEOUT_SECS),
            ),
          },
          _ => Strategy::StaleWhileRevalidate,
        };
        RouteAction::Cache {
          strategy,
          partition,
          limits: PartitionLimits {
            max_entries: route.max_entries,
            max_age_seconds: route.max_age_seconds,
          },
        }
      }
      StrategyKind::NetworkOnly => RouteAction::NetworkOnly,
      StrategyKind::WriteSync => RouteAction::WriteSync {
        tag: route
          .sync_tag
          .clone()
          .ok_or_else(|| eyre!("Write-sync route '{}' has no sync_tag", route.name))?,
      },
      StrategyKind::Bypass => RouteAction::Bypass,
    };

    if route.max_entries == Some(0) {
      return Err(eyre!("Route '{}' allows zero entries", route.name));
    }

    let methods = if route.methods.is_empty() {
      match action {
        RouteAction::WriteSync { .. } => WRITE_METHODS.iter().map(|m| m.to_string()).collect(),
        _ => vec!["GET".to_string()],
      }
    } else {
      route.methods.iter().map(|m| m.to_uppercase()).collect()
    };

    Ok(Self {
      name: route.name.clone(),
      destinations: route.destinations.clone(),
      origin: route.origin,
      pattern,
      methods,
      action,
    })
  }

  fn matches(&self, request: &Request, same_origin: bool) -> bool {
    // Only GET reads are ever cached
    if self.action.is_caching() && !request.is_get() {
      return false;
    }
    if !self.methods.is_empty() && !self.methods.iter().any(|m| *m == request.method.to_uppercase())
    {
      return false;
    }
    if !self.destinations.is_empty() && !self.destinations.contains(&request.destination) {
      return false;
    }
    match self.origin {
      OriginScope::Same if !same_origin => return false,
      OriginScope::External if same_origin => return false,
      _ => {}
    }
    match &self.pattern {
      Some(pattern) => pattern.is_match(request.url.as_str()),
      None => true,
    }
  }
}

/// First-match router over the configured rules.
///
/// Cross-origin requests to hosts outside the allow-list are never intercepted.
pub struct Router {
  origin: Origin,
  external_hosts: Vec<String>,
  rules: Vec<RoutingRule>,
  default_rule: RoutingRule,
}

impl Router {
  pub fn new(config: &Config) -> Result<Self> {
    let origin = config.origin_url()?.origin();
    let rules = config
      .routes
      .iter()
      .map(RoutingRule::compile)
      .collect::<Result<Vec<_>>>()?;

    // One partition name must mean one set of limits
    let mut partitions: HashMap<&str, PartitionLimits> = HashMap::new();
    for rule in &rules {
      if let RouteAction::Cache {
        partition, limits, ..
      } = &rule.action
      {
        if let Some(existing) = partitions.insert(partition, *limits) {
          if existing != *limits {
            return Err(eyre!(
              "Partition '{}' is configured with conflicting limits",
              partition
            ));
          }
        }
      }
    }
    if partitions.contains_key(config.essentials.partition.as_str()) {
      return Err(eyre!(
        "Partition '{}' is reserved for essentials",
        config.essentials.partition
      ));
    }

    Ok(Self {
      origin,
      external_hosts: config
        .external_hosts
        .iter()
        .map(|h| h.to_lowercase())
        .collect(),
      rules,
      default_rule: RoutingRule::bypass(),
    })
  }

  /// The rule that applies to `request`. Always returns a rule; unmatched
  /// requests get the default bypass rule.
  pub fn match_request(&self, request: &Request) -> &RoutingRule {
    let same_origin = request.url.origin() == self.origin;
    if !same_origin && !self.is_allowed_host(&request.url) {
      return &self.default_rule;
    }

    self
      .rules
      .iter()
      .find(|rule| rule.matches(request, same_origin))
      .unwrap_or(&self.default_rule)
  }

  fn is_allowed_host(&self, url: &Url) -> bool {
    let Some(host) = url.host_str() else {
      return false;
    };
    let host = host.to_lowercase();
    self
      .external_hosts
      .iter()
      .any(|allowed| host == *allowed || host.ends_with(&format!(".{}", allowed)))
  }

  /// Every caching partition with its limits, deduplicated, in rule order.
  pub fn partitions(&self) -> Vec<(String, PartitionLimits)> {
    let mut seen: Vec<(String, PartitionLimits)> = Vec::new();
    for rule in &self.rules {
      if let RouteAction::Cache {
        partition, limits, ..
      } = &rule.action
      {
        if !seen.iter().any(|(name, _)| name == partition) {
          seen.push((partition.clone(), *limits));
        }
      }
    }
    seen
  }

  /// Every write-sync tag, deduplicated, in rule order.
  pub fn sync_tags(&self) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for rule in &self.rules {
      if let RouteAction::WriteSync { tag } = &rule.action {
        if !tags.contains(tag) {
          tags.push(tag.clone());
        }
      }
    }
    tags
  }
}
