//! Deferred commit resolution for branch and tag listings.

use crate::error::Result;
use crate::models::Commit;
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Looks a commit up by hash; `None` when the backend does not know it.
pub type CommitResolver =
    Arc<dyn Fn(String) -> BoxFuture<'static, Result<Option<Commit>>> + Send + Sync>;

/// Commit metadata that is fetched only when first inspected.
///
/// Clones share the memoized result. A failed resolution is not memoized,
/// so the next call tries again.
#[derive(Clone)]
pub struct LazyCommit {
    hash: String,
    cell: Arc<OnceCell<Option<Commit>>>,
    resolver: Option<CommitResolver>,
}

impl LazyCommit {
    /// Already known commit.
    pub fn resolved(commit: Commit) -> Self {
        Self {
            hash: commit.hash.clone(),
            cell: Arc::new(OnceCell::new_with(Some(Some(commit)))),
            resolver: None,
        }
    }

    pub fn deferred(hash: &str, resolver: CommitResolver) -> Self {
        Self {
            hash: hash.to_string(),
            cell: Arc::new(OnceCell::new()),
            resolver: Some(resolver),
        }
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn is_resolved(&self) -> bool {
        self.cell.initialized()
    }

    pub async fn get(&self) -> Result<Option<Commit>> {
        let commit = self
            .cell
            .get_or_try_init(|| async {
                match &self.resolver {
                    Some(resolver) => resolver(self.hash.clone()).await,
                    None => Ok(None),
                }
            })
            .await?;
        Ok(commit.clone())
    }
}

impl std::fmt::Debug for LazyCommit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyCommit")
            .field("hash", &self.hash)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_resolver(calls: Arc<AtomicUsize>) -> CommitResolver {
        Arc::new(move |hash: String| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(Some(Commit::new(&hash)))
            }
            .boxed()
        })
    }

    #[tokio::test]
    async fn test_resolves_once_on_demand() {
        let calls = Arc::new(AtomicUsize::new(0));
        let lazy = LazyCommit::deferred("abc", counting_resolver(calls.clone()));

        assert!(!lazy.is_resolved());
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let copy = lazy.clone();
        let first = lazy.get().await.unwrap().unwrap();
        let second = copy.get().await.unwrap().unwrap();

        assert_eq!(first.hash, "abc");
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(lazy.is_resolved());
    }

    #[tokio::test]
    async fn test_failure_is_retried_on_next_call() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let resolver: CommitResolver = Arc::new(move |hash: String| {
            let attempt = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 0 {
                    Err(ApiError::Cancelled)
                } else {
                    Ok(Some(Commit::new(&hash)))
                }
            }
            .boxed()
        });
        let lazy = LazyCommit::deferred("def", resolver);

        assert!(lazy.get().await.is_err());
        assert!(lazy.get().await.unwrap().is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_resolved_needs_no_resolver() {
        let lazy = LazyCommit::resolved(Commit::new("123"));
        assert!(lazy.is_resolved());
        assert_eq!(lazy.get().await.unwrap().unwrap().hash, "123");
    }
}
