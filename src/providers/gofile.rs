//! GoFile provider: guest-account bootstrap and recursive container
//! resolution.
//!
//! Every folder costs one `contents/<id>` listing call. The tree is
//! mirrored onto the local filesystem while it is walked: folders become
//! directories, files become manifest entries pointing at their download
//! links.

use std::path::Path;

use anyhow::{bail, Context, Result};
use futures::future::BoxFuture;
use reqwest::header::{HeaderMap, HeaderValue, COOKIE};
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::{Resolution, ResolveError};
use crate::manifest::Manifest;
use crate::transfer::HttpClient;

const API_BASE_URL: &str = "https://api.gofile.io";

/// Website token the listing endpoint expects alongside the account token.
const WEBSITE_TOKEN: &str = "4fd6sg89d7s6";

/// Extract the container id from a `…/d/<id>` share URL.
pub fn container_id(url: &str) -> Option<String> {
    let mut parts = url.trim_end_matches('/').rsplit('/');
    let id = parts.next()?;
    let marker = parts.next()?;
    if marker != "d" || id.is_empty() {
        return None;
    }
    Some(id.to_string())
}

/// Passwords travel as their SHA-256 hex digest, never in the clear.
fn sha256_hex(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    status: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct AccountData {
    token: String,
}

#[derive(Debug, Deserialize)]
struct ContentNode {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    id: String,
    name: String,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    link: Option<String>,
    #[serde(default)]
    children: Option<serde_json::Map<String, Value>>,
    #[serde(default, rename = "passwordStatus")]
    password_status: Option<String>,
}

impl ContentNode {
    fn is_folder(&self) -> bool {
        self.kind == "folder"
    }
}

/// GoFile API client bound to one account token.
pub struct GoFileClient {
    client: reqwest::Client,
    api_base: String,
    token: String,
}

impl GoFileClient {
    /// Connect with an existing token, or create a guest account. Account
    /// bootstrap failure is fatal for the whole run; nothing can be listed
    /// or downloaded without a token.
    pub async fn connect(http: &HttpClient, token: Option<String>) -> Result<Self> {
        let client = http.inner().clone();
        let token = match token {
            Some(token) => token,
            None => Self::create_guest_account(&client, API_BASE_URL).await?,
        };
        Ok(Self {
            client,
            api_base: API_BASE_URL.to_string(),
            token,
        })
    }

    #[cfg(test)]
    fn with_base(http: &HttpClient, api_base: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: http.inner().clone(),
            api_base: api_base.into(),
            token: token.into(),
        }
    }

    async fn create_guest_account(client: &reqwest::Client, api_base: &str) -> Result<String> {
        let response = client
            .post(format!("{api_base}/accounts"))
            .send()
            .await
            .context("Failed to reach the GoFile accounts endpoint")?;

        if !response.status().is_success() {
            bail!("GoFile account creation failed: HTTP {}", response.status());
        }

        let envelope: ApiEnvelope<AccountData> = response
            .json()
            .await
            .context("Failed to parse account creation response")?;

        if envelope.status != "ok" {
            bail!("GoFile account creation failed: status {}", envelope.status);
        }

        envelope
            .data
            .map(|data| data.token)
            .context("Account creation response carried no token")
    }

    /// Headers every download request for this account must carry.
    pub fn download_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_str(&format!("accountToken={}", self.token))
                .context("Invalid account token format")?,
        );
        Ok(headers)
    }

    /// Resolve a container into a mirrored local tree and a manifest.
    ///
    /// A single top-level file gets no wrapper directory and lands
    /// directly in `root_dir`; a folder container is mirrored under
    /// `<root_dir>/<container_id>`.
    pub async fn resolve(
        &self,
        container_id: &str,
        password: Option<&str>,
        root_dir: &Path,
    ) -> Result<Resolution, ResolveError> {
        let hashed = password.map(sha256_hex);
        let node = self.list_container(container_id, hashed.as_deref()).await?;

        let mut manifest = Manifest::new();
        let mut content_dir = None;

        if node.is_folder() {
            let dir = root_dir.join(container_id);
            std::fs::create_dir_all(&dir)?;
            content_dir = Some(dir.clone());
            self.mirror_folder(&node, &dir, hashed.as_deref(), &mut manifest)
                .await?;
        } else {
            let link = node.link.clone().ok_or_else(|| {
                ResolveError::Parse(format!("file node {} has no download link", node.name))
            })?;
            manifest.push(root_dir, &node.name, link, node.size)?;
        }

        if manifest.is_empty() {
            if let Some(dir) = &content_dir {
                let _ = std::fs::remove_dir_all(dir);
            }
            return Err(ResolveError::EmptyContainer);
        }

        debug!(
            "resolved {} entries from container {}",
            manifest.len(),
            container_id
        );
        Ok(Resolution {
            content_dir,
            manifest,
        })
    }

    /// Depth-first descent. A listing failure below the root skips that
    /// subtree and keeps going.
    fn mirror_folder<'a>(
        &'a self,
        node: &'a ContentNode,
        dir: &'a Path,
        password: Option<&'a str>,
        manifest: &'a mut Manifest,
    ) -> BoxFuture<'a, Result<(), ResolveError>> {
        Box::pin(async move {
            let Some(children) = &node.children else {
                return Ok(());
            };

            for raw in children.values() {
                let child: ContentNode = match serde_json::from_value(raw.clone()) {
                    Ok(child) => child,
                    Err(err) => {
                        warn!("malformed child entry in {}: {}", node.name, err);
                        continue;
                    }
                };

                if child.is_folder() {
                    let child_dir = dir.join(&child.name);
                    std::fs::create_dir_all(&child_dir)?;
                    match self.list_container(&child.id, password).await {
                        Ok(listed) => {
                            self.mirror_folder(&listed, &child_dir, password, manifest)
                                .await?
                        }
                        Err(err) => warn!("skipping subtree {}: {}", child.name, err),
                    }
                } else {
                    match child.link {
                        Some(link) => manifest.push(dir, &child.name, link, child.size)?,
                        None => warn!("file {} has no download link, skipping", child.name),
                    }
                }
            }

            Ok(())
        })
    }

    async fn list_container(
        &self,
        content_id: &str,
        password: Option<&str>,
    ) -> Result<ContentNode, ResolveError> {
        let mut url = format!(
            "{}/contents/{}?wt={}&cache=true",
            self.api_base, content_id, WEBSITE_TOKEN
        );
        if let Some(password) = password {
            url.push_str("&password=");
            url.push_str(password);
        }

        let response = self.client.get(&url).bearer_auth(&self.token).send().await?;
        if !response.status().is_success() {
            return Err(ResolveError::Http(response.status()));
        }

        let envelope: ApiEnvelope<ContentNode> = response.json().await?;
        if envelope.status != "ok" {
            return Err(ResolveError::BadStatus(envelope.status));
        }

        let node = envelope
            .data
            .ok_or_else(|| ResolveError::Parse("listing response carried no data".to_string()))?;

        if node
            .password_status
            .as_deref()
            .is_some_and(|status| status != "passwordOk")
        {
            return Err(ResolveError::PasswordRequired);
        }

        Ok(node)
    }
}
