//! YAML subscription registry for running without a database.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{bail, Context, Result};
use feedloom_core::{resolve_cron_label, Subscription};
use serde::Deserialize;
use tokio::fs;
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionRegistry {
    pub subscriptions: Vec<Subscription>,
}

pub async fn load_subscription_registry(path: &Path) -> Result<SubscriptionRegistry> {
    let raw = fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let registry: SubscriptionRegistry =
        serde_yaml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;

    let mut ids = HashSet::new();
    for subscription in &registry.subscriptions {
        if !ids.insert(subscription.id) {
            bail!("duplicate subscription id {} in {}", subscription.id, path.display());
        }
        if resolve_cron_label(&subscription.cron).is_none() {
            warn!(
                subscription_id = %subscription.id,
                label = %subscription.cron,
                "registry entry has an unknown cron label; it will not be scheduled"
            );
        }
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[tokio::test]
    async fn loads_subscriptions_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"subscriptions:
  - id: 7f0c5a52-3c1e-4c4f-9a51-0d7f1a1f0e01
    owner_id: 2b9d7c11-5a43-4f1f-8a0e-6f5e0c3d9a10
    url: https://radio.example.com/feed.xml
    cron: every hour
    enabled: true
  - id: 7f0c5a52-3c1e-4c4f-9a51-0d7f1a1f0e02
    owner_id: 2b9d7c11-5a43-4f1f-8a0e-6f5e0c3d9a10
    url: https://mirror.example.org/releases.atom
    cron: every 6 hours
    enabled: false
    proxy: http://127.0.0.1:3128
    max_retry: 3
"#
        )
        .unwrap();

        let registry = load_subscription_registry(file.path()).await.unwrap();
        assert_eq!(registry.subscriptions.len(), 2);
        assert_eq!(registry.subscriptions[0].max_retry, 0);
        assert_eq!(registry.subscriptions[0].proxy, None);
        assert_eq!(registry.subscriptions[1].proxy.as_deref(), Some("http://127.0.0.1:3128"));
        assert_eq!(registry.subscriptions[1].max_retry, 3);
        assert!(!registry.subscriptions[1].enabled);
    }

    #[tokio::test]
    async fn duplicate_ids_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let entry = r#"  - id: 7f0c5a52-3c1e-4c4f-9a51-0d7f1a1f0e01
    owner_id: 2b9d7c11-5a43-4f1f-8a0e-6f5e0c3d9a10
    url: https://radio.example.com/feed.xml
    cron: every hour
    enabled: true
"#;
        write!(file, "subscriptions:\n{entry}{entry}").unwrap();

        let err = load_subscription_registry(file.path()).await.unwrap_err();
        assert!(err.to_string().contains("duplicate subscription id"));
    }

    #[tokio::test]
    async fn missing_file_names_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.yaml");
        let err = load_subscription_registry(&path).await.unwrap_err();
        assert!(err.to_string().contains("absent.yaml"));
    }
}
