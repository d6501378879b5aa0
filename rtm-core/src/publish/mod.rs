mod confluence;

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

pub use confluence::ConfluenceClient;

pub type PublishResult<T> = Result<T, PublishError>;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("invalid wiki url {url}: {detail}")]
    Url { url: String, detail: String },
    #[error("request to {url} failed: {source}")]
    Http { url: String, source: reqwest::Error },
    #[error("{url} returned {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },
    #[error("malformed payload from {url}: {detail}")]
    Malformed { url: String, detail: String },
    #[error("found {count} pages titled {title:?} in space {space}; refusing to pick one")]
    InconsistentState {
        count: usize,
        title: String,
        space: String,
    },
    #[error("attachment {filename} failed: {detail}")]
    Attachment { filename: String, detail: String },
    #[error("failed to read artifact {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// A page as the remote reports it: id, current version, resolved URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePage {
    pub id: String,
    pub version: u32,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAttachment {
    pub id: String,
    pub filename: String,
}

/// What the find-or-create protocol decided to do. Update always submits
/// exactly current+1 so a concurrent edit surfaces as a remote conflict
/// instead of a silent overwrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageAction {
    Create,
    Update { page_id: String, next_version: u32 },
}

pub fn plan_page_action(
    matches: &[RemotePage],
    space: &str,
    title: &str,
) -> PublishResult<PageAction> {
    match matches {
        [] => Ok(PageAction::Create),
        [page] => Ok(PageAction::Update {
            page_id: page.id.clone(),
            next_version: page.version + 1,
        }),
        _ => Err(PublishError::InconsistentState {
            count: matches.len(),
            title: title.to_string(),
            space: space.to_string(),
        }),
    }
}

/// Remote wiki operations. Implemented over Confluence-shaped REST; tests
/// drive the publisher against an in-memory fake.
#[async_trait(?Send)]
pub trait WikiApi {
    async fn find_pages(&self, space: &str, title: &str) -> PublishResult<Vec<RemotePage>>;
    async fn create_page(
        &self,
        space: &str,
        title: &str,
        body_html: &str,
    ) -> PublishResult<RemotePage>;
    async fn update_page(
        &self,
        page_id: &str,
        space: &str,
        title: &str,
        body_html: &str,
        version: u32,
    ) -> PublishResult<RemotePage>;
    async fn list_attachments(
        &self,
        page_id: &str,
        filename: &str,
    ) -> PublishResult<Vec<RemoteAttachment>>;
    async fn delete_attachment(&self, attachment_id: &str) -> PublishResult<()>;
    async fn upload_attachment(
        &self,
        page_id: &str,
        filename: &str,
        bytes: Vec<u8>,
    ) -> PublishResult<()>;
}

#[derive(Debug, Clone)]
pub struct PublishedPage {
    pub id: String,
    pub version: u32,
    pub url: Option<String>,
}

/// Idempotent create-or-update of the report page plus attachment
/// replacement, keyed by (space, title).
pub struct WikiPublisher<A: WikiApi> {
    api: A,
    space: String,
    title: String,
}

impl<A: WikiApi> WikiPublisher<A> {
    pub fn new(api: A, space: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            api,
            space: space.into(),
            title: title.into(),
        }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub async fn publish(
        &self,
        body_html: &str,
        attachments: &[(String, Vec<u8>)],
    ) -> PublishResult<PublishedPage> {
        let matches = self.api.find_pages(&self.space, &self.title).await?;
        let page = match plan_page_action(&matches, &self.space, &self.title)? {
            PageAction::Create => {
                info!(space = %self.space, title = %self.title, "creating wiki page");
                self.api
                    .create_page(&self.space, &self.title, body_html)
                    .await?
            }
            PageAction::Update {
                page_id,
                next_version,
            } => {
                info!(page_id = %page_id, version = next_version, "updating wiki page");
                self.api
                    .update_page(&page_id, &self.space, &self.title, body_html, next_version)
                    .await?
            }
        };

        for (filename, bytes) in attachments {
            // Stale copies are removed best-effort; the upload proceeds even
            // if a delete fails, and the remote converges on upload.
            for existing in self.api.list_attachments(&page.id, filename).await? {
                if let Err(err) = self.api.delete_attachment(&existing.id).await {
                    warn!(filename = %filename, error = %err, "failed to delete stale attachment");
                }
            }
            self.api
                .upload_attachment(&page.id, filename, bytes.clone())
                .await?;
            info!(filename = %filename, page_id = %page.id, "attachment uploaded");
        }

        Ok(PublishedPage {
            id: page.id,
            version: page.version,
            url: page.url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(id: &str, version: u32) -> RemotePage {
        RemotePage {
            id: id.to_string(),
            version,
            url: None,
        }
    }

    #[test]
    fn no_match_plans_a_create() {
        let action = plan_page_action(&[], "DEMO", "RTM Report").unwrap();
        assert_eq!(action, PageAction::Create);
    }

    #[test]
    fn single_match_plans_update_at_current_plus_one() {
        let action = plan_page_action(&[page("101", 3)], "DEMO", "RTM Report").unwrap();
        assert_eq!(
            action,
            PageAction::Update {
                page_id: "101".to_string(),
                next_version: 4
            }
        );
    }

    #[test]
    fn duplicate_titles_are_an_error() {
        let err = plan_page_action(&[page("101", 3), page("102", 1)], "DEMO", "RTM Report")
            .unwrap_err();
        assert!(matches!(
            err,
            PublishError::InconsistentState { count: 2, .. }
        ));
    }
}
