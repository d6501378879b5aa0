use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;
use url::Url;

use crate::config::{Credentials, WikiSection};

use super::{PublishError, PublishResult, RemoteAttachment, RemotePage, WikiApi};

/// Confluence Cloud REST implementation of [`WikiApi`].
pub struct ConfluenceClient {
    http: reqwest::Client,
    base_url: Url,
    credentials: Credentials,
}

impl ConfluenceClient {
    pub fn new(wiki: &WikiSection, credentials: Credentials) -> PublishResult<Self> {
        let base_url = Url::parse(&wiki.base_url).map_err(|err| PublishError::Url {
            url: wiki.base_url.clone(),
            detail: err.to_string(),
        })?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(wiki.timeout_seconds))
            .build()
            .map_err(|source| PublishError::Http {
                url: wiki.base_url.clone(),
                source,
            })?;
        Ok(Self {
            http,
            base_url,
            credentials,
        })
    }

    fn endpoint(&self, path: &str) -> PublishResult<Url> {
        // Url::join would strip a non-slash-terminated base path segment.
        let mut url = self.base_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| PublishError::Url {
                url: self.base_url.to_string(),
                detail: "base url cannot carry path segments".to_string(),
            })?;
            segments.pop_if_empty();
            for segment in path.split('/') {
                segments.push(segment);
            }
        }
        Ok(url)
    }

    fn request(&self, method: reqwest::Method, url: &Url) -> reqwest::RequestBuilder {
        self.http
            .request(method, url.clone())
            .basic_auth(&self.credentials.user, Some(&self.credentials.secret))
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &Url,
        response: reqwest::Response,
    ) -> PublishResult<T> {
        let status = response.status();
        let body = response.text().await.map_err(|source| PublishError::Http {
            url: url.to_string(),
            source,
        })?;
        if !status.is_success() {
            return Err(PublishError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        serde_json::from_str(&body).map_err(|err| PublishError::Malformed {
            url: url.to_string(),
            detail: err.to_string(),
        })
    }

    fn page_payload(&self, space: &str, title: &str, body_html: &str) -> serde_json::Value {
        json!({
            "type": "page",
            "title": title,
            "space": { "key": space },
            "body": {
                "storage": { "value": body_html, "representation": "storage" }
            }
        })
    }
}

#[async_trait(?Send)]
impl WikiApi for ConfluenceClient {
    async fn find_pages(&self, space: &str, title: &str) -> PublishResult<Vec<RemotePage>> {
        let mut url = self.endpoint("rest/api/content")?;
        url.query_pairs_mut()
            .append_pair("title", title)
            .append_pair("spaceKey", space)
            .append_pair("expand", "version");
        debug!(url = %url, "wiki page lookup");
        let response = self
            .request(reqwest::Method::GET, &url)
            .send()
            .await
            .map_err(|source| PublishError::Http {
                url: url.to_string(),
                source,
            })?;
        let payload: ContentListPayload = self.read_json(&url, response).await?;
        let base_link = payload.links.and_then(|links| links.base);
        Ok(payload
            .results
            .into_iter()
            .map(|entry| entry.into_remote_page(base_link.as_deref()))
            .collect())
    }

    async fn create_page(
        &self,
        space: &str,
        title: &str,
        body_html: &str,
    ) -> PublishResult<RemotePage> {
        let url = self.endpoint("rest/api/content")?;
        let response = self
            .request(reqwest::Method::POST, &url)
            .json(&self.page_payload(space, title, body_html))
            .send()
            .await
            .map_err(|source| PublishError::Http {
                url: url.to_string(),
                source,
            })?;
        let entry: ContentEntry = self.read_json(&url, response).await?;
        Ok(entry.into_remote_page(None))
    }

    async fn update_page(
        &self,
        page_id: &str,
        space: &str,
        title: &str,
        body_html: &str,
        version: u32,
    ) -> PublishResult<RemotePage> {
        let url = self.endpoint(&format!("rest/api/content/{page_id}"))?;
        let mut payload = self.page_payload(space, title, body_html);
        payload["version"] = json!({ "number": version });
        let response = self
            .request(reqwest::Method::PUT, &url)
            .json(&payload)
            .send()
            .await
            .map_err(|source| PublishError::Http {
                url: url.to_string(),
                source,
            })?;
        let entry: ContentEntry = self.read_json(&url, response).await?;
        Ok(entry.into_remote_page(None))
    }

    async fn list_attachments(
        &self,
        page_id: &str,
        filename: &str,
    ) -> PublishResult<Vec<RemoteAttachment>> {
        let mut url = self.endpoint(&format!("rest/api/content/{page_id}/child/attachment"))?;
        url.query_pairs_mut().append_pair("filename", filename);
        let response = self
            .request(reqwest::Method::GET, &url)
            .send()
            .await
            .map_err(|source| PublishError::Http {
                url: url.to_string(),
                source,
            })?;
        let payload: AttachmentListPayload = self.read_json(&url, response).await?;
        Ok(payload
            .results
            .into_iter()
            .map(|entry| RemoteAttachment {
                id: entry.id,
                filename: entry.title,
            })
            .collect())
    }

    async fn delete_attachment(&self, attachment_id: &str) -> PublishResult<()> {
        let url = self.endpoint(&format!("rest/api/content/{attachment_id}"))?;
        let response = self
            .request(reqwest::Method::DELETE, &url)
            .send()
            .await
            .map_err(|source| PublishError::Http {
                url: url.to_string(),
                source,
            })?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PublishError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    async fn upload_attachment(
        &self,
        page_id: &str,
        filename: &str,
        bytes: Vec<u8>,
    ) -> PublishResult<()> {
        let url = self.endpoint(&format!("rest/api/content/{page_id}/child/attachment"))?;
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str("application/octet-stream")
            .map_err(|err| PublishError::Attachment {
                filename: filename.to_string(),
                detail: err.to_string(),
            })?;
        let form = reqwest::multipart::Form::new().part("file", part);
        let response = self
            .request(reqwest::Method::POST, &url)
            .header("X-Atlassian-Token", "nocheck")
            .multipart(form)
            .send()
            .await
            .map_err(|source| PublishError::Http {
                url: url.to_string(),
                source,
            })?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PublishError::Attachment {
                filename: filename.to_string(),
                detail: format!("{} returned {}: {body}", url, status.as_u16()),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct ContentListPayload {
    #[serde(default)]
    results: Vec<ContentEntry>,
    #[serde(rename = "_links")]
    links: Option<Links>,
}

#[derive(Debug, Deserialize)]
struct ContentEntry {
    id: String,
    version: Option<VersionRef>,
    #[serde(rename = "_links")]
    links: Option<Links>,
}

impl ContentEntry {
    fn into_remote_page(self, base_link: Option<&str>) -> RemotePage {
        let url = self.links.as_ref().and_then(|links| {
            let webui = links.webui.as_deref()?;
            let base = links.base.as_deref().or(base_link)?;
            Some(format!("{}{}", base.trim_end_matches('/'), webui))
        });
        RemotePage {
            id: self.id,
            version: self.version.map(|v| v.number).unwrap_or(1),
            url,
        }
    }
}

#[derive(Debug, Deserialize)]
struct VersionRef {
    number: u32,
}

#[derive(Debug, Deserialize)]
struct Links {
    base: Option<String>,
    webui: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AttachmentListPayload {
    #[serde(default)]
    results: Vec<AttachmentEntry>,
}

#[derive(Debug, Deserialize)]
struct AttachmentEntry {
    id: String,
    title: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_entry_resolves_page_url_from_list_base() {
        let payload: ContentListPayload = serde_json::from_str(
            r#"{
                "results": [
                    {
                        "id": "101",
                        "version": { "number": 3 },
                        "_links": { "webui": "/display/DEMO/RTM+Report" }
                    }
                ],
                "_links": { "base": "https://example.atlassian.net/wiki" }
            }"#,
        )
        .unwrap();
        let base = payload.links.and_then(|l| l.base).unwrap();
        let page = payload
            .results
            .into_iter()
            .next()
            .unwrap()
            .into_remote_page(Some(&base));
        assert_eq!(page.version, 3);
        assert_eq!(
            page.url.as_deref(),
            Some("https://example.atlassian.net/wiki/display/DEMO/RTM+Report")
        );
    }
}
