//! Controller settings.
//!
//! Loading these from files or the environment is left to the owning process;
//! the binary fills them from command-line flags.

use crate::controller::reconciler::RETRY_DELAY_SECONDS;
use crate::domain::ResourceKind;
use crate::k8s::cache::CacheConfig;
use crate::k8s::cache::manager::DEFAULT_NAMESPACE;
use std::time::Duration;
use tracing::warn;

/// Resources watched when none are configured
pub const DEFAULT_RESOURCES: &str = "deployments,services,pods";

pub const DEFAULT_LOG_LEVEL: &str = "INFO";

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub namespaces: Vec<String>,
    pub resources: Vec<String>,
    pub retry_delay: Duration,
    pub log_level: String,
    pub cache: CacheConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            namespaces: vec![DEFAULT_NAMESPACE.to_string()],
            resources: parse_list(DEFAULT_RESOURCES),
            retry_delay: Duration::from_secs(RETRY_DELAY_SECONDS),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            cache: CacheConfig::default(),
        }
    }
}

impl ControllerConfig {
    /// Replace the namespaces; an empty list keeps the current ones
    #[must_use]
    pub fn with_namespaces(mut self, namespaces: Vec<String>) -> Self {
        if !namespaces.is_empty() {
            self.namespaces = namespaces;
        }
        self
    }

    /// Replace the watched resources; an empty list keeps the current ones
    #[must_use]
    pub fn with_resources(mut self, resources: Vec<String>) -> Self {
        if !resources.is_empty() {
            self.resources = resources;
        }
        self
    }

    #[must_use]
    pub fn with_log_level(mut self, level: &str) -> Self {
        if !level.trim().is_empty() {
            self.log_level = level.trim().to_ascii_uppercase();
        }
        self
    }

    /// Resolve configured resource names, skipping unsupported ones
    #[must_use]
    pub fn kinds(&self) -> Vec<ResourceKind> {
        let mut kinds = Vec::with_capacity(self.resources.len());
        for name in &self.resources {
            match ResourceKind::from_resource_name(name) {
                Some(kind) if !kinds.contains(&kind) => kinds.push(kind),
                Some(_) => {}
                None => warn!(resource = %name, "Unsupported resource type, skipping"),
            }
        }
        kinds
    }
}

/// Split a comma-separated value, dropping blank items
#[must_use]
pub fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ControllerConfig::default();
        assert_eq!(config.namespaces, vec!["default"]);
        assert_eq!(
            config.kinds(),
            vec![ResourceKind::Deployment, ResourceKind::Service, ResourceKind::Pod]
        );
        assert_eq!(config.retry_delay, Duration::from_secs(30));
        assert_eq!(config.cache.initial_sync_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_parse_list_trims_blanks() {
        assert_eq!(parse_list(" a, b,,c ,"), vec!["a", "b", "c"]);
        assert!(parse_list(" , ").is_empty());
    }

    #[test]
    fn test_empty_overrides_are_ignored() {
        let config = ControllerConfig::default()
            .with_namespaces(vec![])
            .with_resources(parse_list(""))
            .with_log_level(" ");
        assert_eq!(config.namespaces, vec!["default"]);
        assert_eq!(config.resources.len(), 3);
        assert_eq!(config.log_level, "INFO");
    }

    #[test]
    fn test_unsupported_resources_are_skipped() {
        let config = ControllerConfig::default()
            .with_resources(parse_list("pods,statefulsets,Pod,cm"))
            .with_log_level("debug");
        assert_eq!(config.kinds(), vec![ResourceKind::Pod, ResourceKind::ConfigMap]);
        assert_eq!(config.log_level, "DEBUG");
    }
}
