//! Cloud Mail.ru provider: share-page scrape, dispatcher lookup, flat
//! folder listing.
//!
//! Unlike GoFile there is no tree to recurse into; the folder API returns
//! one flat list and every file lands in a single content directory named
//! after the weblink.

use std::path::Path;

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, REFERER};
use serde::Deserialize;
use tracing::debug;

use super::{Resolution, ResolveError};
use crate::manifest::Manifest;
use crate::transfer::HttpClient;

const API_BASE_URL: &str = "https://cloud.mail.ru/api/v2";

static PAGE_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"pageId['"]?\s*:\s*['"]([^'"]+)['"]"#).unwrap());
static WEBLINK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"/public/([^/]+/[^/?#]+)").unwrap());

/// Extract the weblink id (`<folder>/<share>`) from a public share URL.
pub fn parse_weblink(url: &str) -> Option<String> {
    WEBLINK_RE.captures(url).map(|caps| caps[1].to_string())
}

/// The share page embeds its page id in inline script.
fn parse_page_id(html: &str) -> Option<String> {
    PAGE_ID_RE.captures(html).map(|caps| caps[1].to_string())
}

#[derive(Debug, Deserialize)]
struct DispatcherResponse {
    body: DispatcherBody,
}

#[derive(Debug, Deserialize)]
struct DispatcherBody {
    #[serde(default)]
    weblink_get: Vec<WeblinkGet>,
}

#[derive(Debug, Deserialize)]
struct WeblinkGet {
    url: String,
}

#[derive(Debug, Deserialize)]
struct FolderResponse {
    body: FolderBody,
}

#[derive(Debug, Deserialize)]
struct FolderBody {
    #[serde(default)]
    list: Vec<FolderItem>,
}

#[derive(Debug, Deserialize)]
struct FolderItem {
    #[serde(rename = "type")]
    kind: String,
    name: String,
    #[serde(default)]
    size: Option<u64>,
}

/// Cloud Mail.ru API client.
pub struct CloudMailClient {
    client: reqwest::Client,
    api_base: String,
}

impl CloudMailClient {
    pub fn new(http: &HttpClient) -> Self {
        Self {
            client: http.inner().clone(),
            api_base: API_BASE_URL.to_string(),
        }
    }

    #[cfg(test)]
    fn with_base(http: &HttpClient, api_base: impl Into<String>) -> Self {
        Self {
            client: http.inner().clone(),
            api_base: api_base.into(),
        }
    }

    /// Headers download requests must carry.
    pub fn download_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(REFERER, HeaderValue::from_static("https://cloud.mail.ru/"));
        Ok(headers)
    }

    /// Resolve a public share into a content directory and manifest.
    pub async fn resolve(&self, share_url: &str, root_dir: &Path) -> Result<Resolution, ResolveError> {
        let weblink = parse_weblink(share_url).ok_or_else(|| {
            ResolveError::Parse(format!("not a Cloud Mail.ru public link: {share_url}"))
        })?;

        let page_id = self.fetch_page_id(share_url).await?;
        let base_url = self.fetch_download_base(&page_id).await?;
        let listing = self.fetch_listing(&weblink, &page_id).await?;

        let dir = root_dir.join(weblink.replace('/', "_"));
        std::fs::create_dir_all(&dir)?;

        let mut manifest = Manifest::new();
        for item in &listing {
            if item.kind != "file" {
                debug!("skipping non-file entry {}", item.name);
                continue;
            }
            let link = format!("{base_url}/{weblink}/{}", item.name);
            manifest.push(&dir, &item.name, link, item.size)?;
        }

        if manifest.is_empty() {
            let _ = std::fs::remove_dir_all(&dir);
            return Err(ResolveError::EmptyContainer);
        }

        Ok(Resolution {
            content_dir: Some(dir),
            manifest,
        })
    }

    async fn fetch_page_id(&self, share_url: &str) -> Result<String, ResolveError> {
        let response = self.client.get(share_url).send().await?;
        if !response.status().is_success() {
            return Err(ResolveError::Http(response.status()));
        }
        let html = response.text().await?;
        parse_page_id(&html)
            .ok_or_else(|| ResolveError::Parse("share page carried no pageId".to_string()))
    }

    async fn fetch_download_base(&self, page_id: &str) -> Result<String, ResolveError> {
        let url = format!("{}/dispatcher?x-page-id={page_id}", self.api_base);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(ResolveError::Http(response.status()));
        }
        let dispatcher: DispatcherResponse = response.json().await?;
        dispatcher
            .body
            .weblink_get
            .first()
            .map(|endpoint| endpoint.url.clone())
            .ok_or_else(|| {
                ResolveError::Parse("dispatcher returned no weblink_get endpoint".to_string())
            })
    }

    async fn fetch_listing(
        &self,
        weblink: &str,
        page_id: &str,
    ) -> Result<Vec<FolderItem>, ResolveError> {
        let url = format!(
            "{}/folder?weblink={weblink}&x-page-id={page_id}",
            self.api_base
        );
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(ResolveError::Http(response.status()));
        }
        let folder: FolderResponse = response.json().await?;
        Ok(folder.body.list)
    }
}
