//! Path-prefix matching of inbound requests to registered services.
//!
//! Matching is a literal string comparison: an entry matches when the inbound
//! path starts with its `path_prefix`, byte for byte. It is not segment-aware,
//! so `/api/chatbot` matches an entry registered for `/api/chat`. Among the
//! matching entries the longest prefix wins; on equal length the first
//! candidate (lowest id) is kept.

use crate::db::ServiceRecord;
use crate::registry::ServiceRegistry;
use std::sync::Arc;
use tracing::debug;

/// Select the enabled entry with the longest prefix of `path`
pub fn longest_prefix_match<'a>(
    candidates: &'a [ServiceRecord],
    path: &str,
) -> Option<&'a ServiceRecord> {
    candidates
        .iter()
        .filter(|service| service.enabled && path.starts_with(service.path_prefix.as_str()))
        .fold(None, |best: Option<&ServiceRecord>, service| match best {
            Some(current) if current.path_prefix.len() >= service.path_prefix.len() => {
                Some(current)
            }
            _ => Some(service),
        })
}

/// Resolves inbound paths against the service registry
pub struct PathMatcher {
    registry: Arc<dyn ServiceRegistry>,
}

impl PathMatcher {
    pub fn new(registry: Arc<dyn ServiceRegistry>) -> Self {
        Self { registry }
    }

    /// Find the service owning `path`, or `None` if no enabled prefix matches
    pub fn find(&self, path: &str) -> anyhow::Result<Option<ServiceRecord>> {
        let candidates = self.registry.enabled_candidates()?;
        let matched = longest_prefix_match(&candidates, path).cloned();

        match &matched {
            Some(service) => debug!(
                path,
                service_id = service.id,
                prefix = %service.path_prefix,
                "Route matched"
            ),
            None => debug!(path, candidates = candidates.len(), "No route matched"),
        }

        Ok(matched)
    }
}
