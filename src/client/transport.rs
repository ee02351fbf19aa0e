//! How the controller reaches the server
//!
//! - `HttpTransport`: a real server over HTTP (reqwest)
//! - `LocalTransport`: a [`WireRouter`] in the same process

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart;
use url::Url;

use super::{ClientError, ClientResult, TrackerPayload};
use crate::exchange::Request;
use crate::wire::WireRouter;

/// Request timeout of the HTTP transport
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[async_trait]
pub trait Transport: Send + Sync {
    /// GET a static resource; the body as text
    async fn get(&self, path: &str) -> ClientResult<String>;

    /// POST a tracker payload; the body as text
    async fn post(&self, path: &str, payload: &TrackerPayload) -> ClientResult<String>;
}

fn failed(path: &str, reason: impl ToString) -> ClientError {
    ClientError::Transport {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}

// ============================================================================
// HTTP
// ============================================================================

pub struct HttpTransport {
    client: reqwest::Client,
    base: Url,
}

impl HttpTransport {
    pub fn new(base: &str) -> ClientResult<Self> {
        let base = Url::parse(base).map_err(|e| failed(base, e))?;
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent("nulls/0.1")
            .build()
            .map_err(|e| failed(base.as_str(), e))?;
        Ok(Self { client, base })
    }

    fn url(&self, path: &str) -> ClientResult<Url> {
        self.base.join(path).map_err(|e| failed(path, e))
    }

    async fn text(path: &str, response: reqwest::Response) -> ClientResult<String> {
        let status = response.status();
        if !status.is_success() {
            return Err(failed(path, format!("status {}", status)));
        }
        response.text().await.map_err(|e| failed(path, e))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, path: &str) -> ClientResult<String> {
        let response = self
            .client
            .get(self.url(path)?)
            .send()
            .await
            .map_err(|e| failed(path, e))?;
        Self::text(path, response).await
    }

    async fn post(&self, path: &str, payload: &TrackerPayload) -> ClientResult<String> {
        let request = self.client.post(self.url(path)?);
        let request = if payload.files.is_empty() {
            request.form(&payload.fields)
        } else {
            let mut form = multipart::Form::new();
            for (name, value) in &payload.fields {
                form = form.text(name.clone(), value.clone());
            }
            for (name, file) in &payload.files {
                let part = multipart::Part::bytes(file.bytes.clone())
                    .file_name(file.filename.clone())
                    .mime_str(&file.content_type)
                    .map_err(|e| failed(path, e))?;
                form = form.part(name.clone(), part);
            }
            request.multipart(form)
        };
        let response = request.send().await.map_err(|e| failed(path, e))?;
        Self::text(path, response).await
    }
}

// ============================================================================
// IN PROCESS
// ============================================================================

/// Serves requests straight from a router, without a socket
#[derive(Clone)]
pub struct LocalTransport {
    router: WireRouter,
}

impl LocalTransport {
    const BOUNDARY: &'static str = "nulls-local-boundary";

    pub fn new(router: WireRouter) -> Self {
        Self { router }
    }

    fn multipart(payload: &TrackerPayload) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, value) in &payload.fields {
            body.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                    Self::BOUNDARY,
                    name,
                    value
                )
                .as_bytes(),
            );
        }
        for (name, file) in &payload.files {
            body.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                    Self::BOUNDARY,
                    name,
                    file.filename,
                    file.content_type
                )
                .as_bytes(),
            );
            body.extend_from_slice(&file.bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", Self::BOUNDARY).as_bytes());
        body
    }

    async fn send(&self, path: &str, request: Request) -> ClientResult<String> {
        let response = self.router.handle(request).await;
        if response.status >= 400 {
            return Err(failed(path, format!("status {}", response.status)));
        }
        Ok(response.body_text())
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn get(&self, path: &str) -> ClientResult<String> {
        self.send(path, Request::get(path)).await
    }

    async fn post(&self, path: &str, payload: &TrackerPayload) -> ClientResult<String> {
        let request = if payload.files.is_empty() {
            Request::post(path).with_body("application/x-www-form-urlencoded", payload.urlencoded())
        } else {
            Request::post(path).with_body(
                &format!("multipart/form-data; boundary={}", Self::BOUNDARY),
                Self::multipart(payload),
            )
        };
        self.send(path, request).await
    }
}
