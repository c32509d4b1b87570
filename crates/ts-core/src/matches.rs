//! Append-only collection of permission matches shared by scan workers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;
use ts_connectors::PermissionGrant;

/// A grant found for the target principal on one site.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PermissionMatch {
    /// Position of the site in the de-duplicated site list.
    pub resource_index: usize,
    pub site_url: String,
    pub grant: PermissionGrant,
    pub found_at: DateTime<Utc>,
}

impl PermissionMatch {
    pub fn new(resource_index: usize, grant: PermissionGrant) -> Self {
        Self {
            resource_index,
            site_url: grant.site_url.clone(),
            grant,
            found_at: Utc::now(),
        }
    }

    /// Ordering key independent of discovery time.
    fn sort_key(&self) -> (usize, ts_connectors::PermissionSurface, &str) {
        (
            self.resource_index,
            self.grant.surface,
            self.grant.container.as_str(),
        )
    }
}

/// Matches written concurrently by scan workers.
///
/// There is no removal API; the only mutation is [`MatchCollection::append`].
#[derive(Debug, Default)]
pub struct MatchCollection {
    items: Mutex<Vec<PermissionMatch>>,
    count: AtomicUsize,
}

impl MatchCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a collection, e.g. from a checkpoint.
    pub fn from_matches(matches: Vec<PermissionMatch>) -> Self {
        Self {
            count: AtomicUsize::new(matches.len()),
            items: Mutex::new(matches),
        }
    }

    /// Appends a match and returns the new total.
    pub async fn append(&self, item: PermissionMatch) -> usize {
        let mut items = self.items.lock().await;
        items.push(item);
        self.count.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Current number of matches, readable without the lock.
    pub fn len(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the matches sorted by site position, surface and container,
    /// so scheduling order never shows up in results.
    pub async fn snapshot(&self) -> Vec<PermissionMatch> {
        let mut items = self.items.lock().await.clone();
        items.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use ts_connectors::testing::sample_admin_grant;

    fn sample(index: usize) -> PermissionMatch {
        PermissionMatch::new(
            index,
            sample_admin_grant(
                &format!("https://contoso.sharepoint.com/sites/s{}", index),
                "i:0#.f|membership|jdoe@contoso.com",
            ),
        )
    }

    #[tokio::test]
    async fn test_append_and_len() {
        let collection = MatchCollection::new();
        assert!(collection.is_empty());
        assert_eq!(collection.append(sample(3)).await, 1);
        assert_eq!(collection.append(sample(1)).await, 2);
        assert_eq!(collection.len(), 2);
    }

    #[tokio::test]
    async fn test_snapshot_order_is_independent_of_append_order() {
        let a = MatchCollection::new();
        let b = MatchCollection::new();
        for i in [5, 2, 9] {
            a.append(sample(i)).await;
        }
        for i in [9, 5, 2] {
            b.append(sample(i)).await;
        }

        let indices = |v: Vec<PermissionMatch>| -> Vec<usize> {
            v.into_iter().map(|m| m.resource_index).collect()
        };
        assert_eq!(indices(a.snapshot().await), vec![2, 5, 9]);
        assert_eq!(indices(b.snapshot().await), vec![2, 5, 9]);
    }

    #[tokio::test]
    async fn test_concurrent_appends() {
        let collection = Arc::new(MatchCollection::new());
        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..50 {
            let collection = Arc::clone(&collection);
            tasks.spawn(async move {
                collection.append(sample(i)).await;
            });
        }
        while let Some(result) = tasks.join_next().await {
            result.unwrap();
        }
        assert_eq!(collection.len(), 50);
        assert_eq!(collection.snapshot().await.len(), 50);
    }

    #[tokio::test]
    async fn test_seeded_collection() {
        let collection = MatchCollection::from_matches(vec![sample(1), sample(2)]);
        assert_eq!(collection.len(), 2);
    }
}
