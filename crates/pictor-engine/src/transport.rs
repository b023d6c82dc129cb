use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::blocking::multipart::{Form as MultipartForm, Part as MultipartPart};
use reqwest::blocking::Client as HttpClient;
use tracing::debug;

use crate::request::{FormField, ImageRequest, RequestBody};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Raw HTTP outcome; interpretation happens in [`crate::response`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub status_text: String,
    pub body: String,
}

impl HttpReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The only seam that touches the network.
pub trait Transport {
    fn send(&self, request: &ImageRequest) -> Result<HttpReply>;
    /// Downloads an image referenced by URL.
    fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

pub struct HttpTransport {
    http: HttpClient,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(timeout)
            .connect_timeout(CONNECT_TIMEOUT.min(timeout))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { http })
    }
}

impl Transport for HttpTransport {
    fn send(&self, request: &ImageRequest) -> Result<HttpReply> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .with_context(|| format!("invalid HTTP method '{}'", request.method))?;
        let mut builder = self.http.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = match &request.body {
            RequestBody::Json(value) => builder.body(serde_json::to_vec(value)?),
            RequestBody::Multipart(fields) => builder.multipart(multipart_form(fields)?),
        };

        debug!(operation = request.operation.as_str(), "sending image request");
        let response = builder
            .send()
            .with_context(|| format!("image API request failed ({})", request.operation.as_str()))?;
        let status = response.status();
        let body = response.text().context("image API response body read failed")?;
        Ok(HttpReply {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            body,
        })
    }

    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(url)
            .send()
            .with_context(|| format!("failed downloading image ({url})"))?;
        if !response.status().is_success() {
            let code = response.status().as_u16();
            bail!("image download failed ({code})");
        }
        Ok(response
            .bytes()
            .context("failed reading image bytes")?
            .to_vec())
    }
}

fn multipart_form(fields: &[FormField]) -> Result<MultipartForm> {
    let mut form = MultipartForm::new();
    for field in fields {
        form = match field {
            FormField::Text { name, value } => form.text(name.clone(), value.clone()),
            FormField::File {
                name,
                file_name,
                mime,
                bytes,
            } => {
                let part = MultipartPart::bytes(bytes.clone())
                    .file_name(file_name.clone())
                    .mime_str(mime)
                    .with_context(|| format!("invalid mime '{mime}' for {file_name}"))?;
                form.part(name.clone(), part)
            }
        };
    }
    Ok(form)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_range_is_2xx() {
        let reply = |status| HttpReply {
            status,
            status_text: String::new(),
            body: String::new(),
        };
        assert!(reply(200).is_success());
        assert!(reply(204).is_success());
        assert!(!reply(199).is_success());
        assert!(!reply(429).is_success());
    }

    #[test]
    fn multipart_form_accepts_png_parts() -> anyhow::Result<()> {
        let fields = vec![
            FormField::File {
                name: "image".to_string(),
                file_name: "image.png".to_string(),
                mime: "image/png".to_string(),
                bytes: vec![0x89, b'P', b'N', b'G'],
            },
            FormField::Text {
                name: "prompt".to_string(),
                value: "a hat".to_string(),
            },
        ];
        let form = multipart_form(&fields)?;
        assert!(!form.boundary().is_empty());
        Ok(())
    }

    #[test]
    fn client_builds_with_short_timeouts() -> anyhow::Result<()> {
        HttpTransport::new(Duration::from_secs(2))?;
        Ok(())
    }
}
