//! Collector
//!
//! Drains a paginated listing into one ordered sequence. Failures the
//! API classifies as absence or lack of access collapse to an empty
//! collection; everything else propagates.

use async_trait::async_trait;
use serde_json::Value;

use super::SyncError;
use crate::gcp::error::{ApiError, ErrorClass};
use crate::resource::ResourceDef;

/// Result of one page request
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub items: Vec<Value>,
    pub next_token: Option<String>,
}

/// Paginated "list resources under scope" operation.
#[async_trait]
pub trait ResourceLister: Send + Sync {
    async fn list_page(
        &self,
        def: &ResourceDef,
        scope_id: &str,
        page_token: Option<&str>,
    ) -> Result<Page, ApiError>;
}

/// How a collection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectOutcome {
    /// Every page was listed.
    Listed,
    /// The service is disabled for the scope.
    NotProvisioned,
    /// The scope does not exist.
    NotFound,
    /// The caller may not list this resource type.
    AccessDenied,
}

impl CollectOutcome {
    /// Whether an empty result here is genuine absence and may be swept.
    pub fn allows_cleanup(self) -> bool {
        !matches!(self, Self::AccessDenied)
    }
}

#[derive(Debug, Clone)]
pub struct Collection {
    pub records: Vec<Value>,
    pub outcome: CollectOutcome,
}

impl Collection {
    fn empty(outcome: CollectOutcome) -> Self {
        Self {
            records: Vec::new(),
            outcome,
        }
    }
}

/// Fetch all resources (auto-paginate)
pub async fn collect(
    lister: &dyn ResourceLister,
    def: &ResourceDef,
    scope_id: &str,
) -> Result<Collection, SyncError> {
    let mut records = Vec::new();
    let mut page_token: Option<String> = None;
    let mut pages = 0usize;

    loop {
        let page = match lister.list_page(def, scope_id, page_token.as_deref()).await {
            Ok(page) => page,
            Err(err) => return classified(def, scope_id, err),
        };
        pages += 1;
        tracing::debug!(
            resource = %def.key,
            project = scope_id,
            page = pages,
            items = page.items.len(),
            "Listed page"
        );
        records.extend(page.items);

        match page.next_token {
            Some(token) => page_token = Some(token),
            None => break,
        }
    }

    Ok(Collection {
        records,
        outcome: CollectOutcome::Listed,
    })
}

fn classified(def: &ResourceDef, scope_id: &str, err: ApiError) -> Result<Collection, SyncError> {
    let outcome = match err.classify() {
        ErrorClass::NotProvisioned => {
            tracing::info!(
                "{} API not enabled on project {}, skipping: {}",
                def.display_name, scope_id, err
            );
            CollectOutcome::NotProvisioned
        }
        ErrorClass::AccessDenied => {
            tracing::warn!(
                "Could not list {} on project {} due to permissions: {}",
                def.display_name, scope_id, err
            );
            CollectOutcome::AccessDenied
        }
        ErrorClass::NotFound => {
            tracing::warn!(
                "Project {} not found while listing {}: {}",
                scope_id, def.display_name, err
            );
            CollectOutcome::NotFound
        }
        ErrorClass::Fatal => {
            return Err(SyncError::Api {
                resource: def.key.clone(),
                scope: scope_id.to_string(),
                source: err,
            })
        }
    };
    Ok(Collection::empty(outcome))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::get_resource;
    use serde_json::json;
    use std::sync::Mutex;

    /// Returns scripted responses in order and records the tokens it saw.
    struct Scripted {
        pages: Mutex<Vec<Result<Page, ApiError>>>,
        tokens: Mutex<Vec<Option<String>>>,
    }

    impl Scripted {
        fn new(mut pages: Vec<Result<Page, ApiError>>) -> Self {
            pages.reverse();
            Self {
                pages: Mutex::new(pages),
                tokens: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ResourceLister for Scripted {
        async fn list_page(
            &self,
            _def: &ResourceDef,
            _scope_id: &str,
            page_token: Option<&str>,
        ) -> Result<Page, ApiError> {
            self.tokens.lock().unwrap().push(page_token.map(str::to_string));
            self.pages.lock().unwrap().pop().unwrap_or_else(|| Ok(Page::default()))
        }
    }

    fn status(code: u16, status: &str, message: &str) -> ApiError {
        ApiError::Status {
            code,
            status: Some(status.to_string()),
            reason: None,
            message: message.to_string(),
        }
    }

    #[tokio::test]
    async fn test_follows_continuation_tokens() {
        let def = get_resource("cloud-functions").unwrap();
        let lister = Scripted::new(vec![
            Ok(Page {
                items: vec![json!({"name": "a"})],
                next_token: Some("p2".into()),
            }),
            Ok(Page {
                items: vec![json!({"name": "b"}), json!({"name": "c"})],
                next_token: None,
            }),
        ]);

        let collection = collect(&lister, def, "proj").await.unwrap();
        assert_eq!(collection.outcome, CollectOutcome::Listed);
        assert_eq!(collection.records.len(), 3);
        assert_eq!(collection.records[2], json!({"name": "c"}));
        assert_eq!(
            *lister.tokens.lock().unwrap(),
            vec![None, Some("p2".to_string())]
        );
    }

    #[tokio::test]
    async fn test_classified_failures_are_empty() {
        let def = get_resource("cloud-functions").unwrap();
        let cases = [
            (
                status(403, "PERMISSION_DENIED", "Cloud Functions API has not been used in project"),
                CollectOutcome::NotProvisioned,
            ),
            (
                status(403, "PERMISSION_DENIED", "Permission denied on resource"),
                CollectOutcome::AccessDenied,
            ),
            (status(404, "NOT_FOUND", "Project not found"), CollectOutcome::NotFound),
        ];

        for (err, expected) in cases {
            let lister = Scripted::new(vec![Err(err)]);
            let collection = collect(&lister, def, "proj").await.unwrap();
            assert_eq!(collection.outcome, expected);
            assert!(collection.records.is_empty());
        }
    }

    #[tokio::test]
    async fn test_failure_on_later_page_drops_earlier_pages() {
        let def = get_resource("cloud-functions").unwrap();
        let lister = Scripted::new(vec![
            Ok(Page {
                items: vec![json!({"name": "a"})],
                next_token: Some("p2".into()),
            }),
            Err(status(403, "PERMISSION_DENIED", "Permission denied")),
        ]);

        let collection = collect(&lister, def, "proj").await.unwrap();
        assert_eq!(collection.outcome, CollectOutcome::AccessDenied);
        assert!(collection.records.is_empty());
    }

    #[tokio::test]
    async fn test_unclassified_failure_propagates() {
        let def = get_resource("storage-buckets").unwrap();
        let lister = Scripted::new(vec![Err(status(500, "INTERNAL", "backend error"))]);

        let err = collect(&lister, def, "proj").await.unwrap_err();
        assert!(matches!(err, SyncError::Api { .. }));
    }

    #[test]
    fn test_only_access_denied_blocks_cleanup() {
        assert!(CollectOutcome::Listed.allows_cleanup());
        assert!(CollectOutcome::NotProvisioned.allows_cleanup());
        assert!(CollectOutcome::NotFound.allows_cleanup());
        assert!(!CollectOutcome::AccessDenied.allows_cleanup());
    }
}
