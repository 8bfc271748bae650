//! Webhook sink: POSTs each artifact to an HTTP endpoint as
//! `multipart/form-data` with a `destination` field and the streamed
//! file body.

use std::path::Path;

use reqwest::multipart::{Form, Part};
use reqwest::Body;
use tokio_util::io::ReaderStream;

use super::{ArtifactSink, SinkError};

pub struct WebhookSink {
    client: reqwest::Client,
    endpoint: String,
}

impl WebhookSink {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

impl ArtifactSink for WebhookSink {
    async fn accept(&self, destination: &str, file: &Path) -> Result<(), SinkError> {
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "artifact".to_string());

        let handle = tokio::fs::File::open(file).await?;
        let part = Part::stream(Body::wrap_stream(ReaderStream::new(handle))).file_name(name);
        let form = Form::new()
            .text("destination", destination.to_string())
            .part("file", part);

        let response = self.client.post(&self.endpoint).multipart(form).send().await?;
        if !response.status().is_success() {
            return Err(SinkError::Endpoint(response.status()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_accept_posts_multipart() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/relay"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.bin");
        std::fs::write(&file, b"payload").unwrap();

        let sink = WebhookSink::new(reqwest::Client::new(), format!("{}/relay", server.uri()));
        sink.accept("chat-42", &file).await.unwrap();
    }

    #[tokio::test]
    async fn test_endpoint_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/relay"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.bin");
        std::fs::write(&file, b"payload").unwrap();

        let sink = WebhookSink::new(reqwest::Client::new(), format!("{}/relay", server.uri()));
        let err = sink.accept("chat-42", &file).await.unwrap_err();
        assert!(matches!(err, SinkError::Endpoint(status) if status.as_u16() == 500));
    }
}
