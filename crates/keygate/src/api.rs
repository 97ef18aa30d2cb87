//! Backend request layer.
//!
//! ```text
//!  request ──→ needs_renewal? ──yes──→ refresh(5) ──err──→ force_login, RenewalFailed
//!                  │ no                    │ ok
//!                  ▼                       ▼
//!           Authorization: Bearer <token> (when signed in)
//!                  │
//!                  ▼
//!              response ──401──→ force_login, SessionInvalid
//! ```
//!
//! A 401 always restarts login, whatever the local expiry check thinks.
//! Several 401s arriving together still reach the provider only once.

use chrono::{DateTime, Utc};
use keygate_session::IdpClient;
use keygate_token::TokenLifecycle;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::{ApiError, ConfigError};

/// One entry of the document listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub name: String,
    pub path: String,
    pub uploaded_at: DateTime<Utc>,
}

/// HTTP client that carries the session's bearer token.
pub struct ApiClient<I: IdpClient> {
    http: reqwest::Client,
    base: Url,
    lifecycle: TokenLifecycle<I>,
}

impl<I: IdpClient> ApiClient<I> {
    /// # Errors
    /// [`ConfigError::InvalidValue`] when `backend_url` isn't an absolute URL.
    pub fn new(backend_url: &str, lifecycle: TokenLifecycle<I>) -> Result<Self, ConfigError> {
        Self::with_client(reqwest::Client::new(), backend_url, lifecycle)
    }

    /// Like [`new`](Self::new) with a preconfigured `reqwest::Client`.
    pub fn with_client(
        http: reqwest::Client,
        backend_url: &str,
        lifecycle: TokenLifecycle<I>,
    ) -> Result<Self, ConfigError> {
        // `Url::join` replaces the last segment unless the base ends in '/'.
        let normalized = format!("{}/", backend_url.trim_end_matches('/'));
        let base = Url::parse(&normalized).map_err(|e| ConfigError::InvalidValue {
            key: "backend_url".to_string(),
            value: backend_url.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self { http, base, lifecycle })
    }

    /// Resolves `path` against the backend base. A leading `/` is relative
    /// to the base, not the host.
    pub fn url(&self, path: &str) -> Result<Url, ApiError> {
        self.base
            .join(path.trim_start_matches('/'))
            .map_err(|e| ApiError::InvalidPath {
                path: path.to_string(),
                reason: e.to_string(),
            })
    }

    /// A request builder for `path`. Authorization is added by
    /// [`send`](Self::send), not here.
    pub fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, ApiError> {
        Ok(self.http.request(method, self.url(path)?))
    }

    /// Renews the token if needed, attaches it, sends, and reacts to 401.
    ///
    /// Any other status is returned as-is.
    pub async fn send(&self, request: RequestBuilder) -> Result<Response, ApiError> {
        let manager = self.lifecycle.manager();
        if self.lifecycle.needs_renewal() {
            let min = self.lifecycle.config().request_min_validity_secs;
            if let Err(e) = self.lifecycle.refresh(min).await {
                warn!(error = %e, "token renewal before request failed, restarting login");
                self.restart_login().await;
                return Err(ApiError::RenewalFailed(e));
            }
        }

        let request = match manager.token() {
            Some(token) => request.bearer_auth(token),
            None => request,
        };

        let response = request.send().await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            warn!(url = %response.url(), "backend rejected the session, restarting login");
            self.restart_login().await;
            return Err(ApiError::SessionInvalid);
        }
        debug!(url = %response.url(), status = response.status().as_u16(), "backend request complete");
        Ok(response)
    }

    pub async fn get(&self, path: &str) -> Result<Response, ApiError> {
        self.send(self.request(Method::GET, path)?).await
    }

    pub async fn delete(&self, path: &str) -> Result<Response, ApiError> {
        self.send(self.request(Method::DELETE, path)?).await
    }

    pub async fn post_json<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<Response, ApiError> {
        self.send(self.request(Method::POST, path)?.json(body)).await
    }

    // -----------------------------------------------------------------------
    // Document endpoints
    // -----------------------------------------------------------------------

    /// `GET /documents`.
    pub async fn list_documents(&self) -> Result<Vec<Document>, ApiError> {
        let response = self.get("documents").await?.error_for_status()?;
        Ok(response.json().await?)
    }

    /// `POST /documents` as a multipart form with one `document` part.
    pub async fn upload_document(&self, file_name: &str, contents: Vec<u8>) -> Result<(), ApiError> {
        let part = reqwest::multipart::Part::bytes(contents).file_name(file_name.to_string());
        let form = reqwest::multipart::Form::new().part("document", part);
        let request = self.request(Method::POST, "documents")?.multipart(form);
        self.send(request).await?.error_for_status()?;
        Ok(())
    }

    /// `DELETE /documents/<name>`. The backend allows this for `admin` only.
    pub async fn delete_document(&self, file_name: &str) -> Result<(), ApiError> {
        let url = self.document_url(file_name)?;
        let request = self.http.request(Method::DELETE, url);
        self.send(request).await?.error_for_status()?;
        Ok(())
    }

    /// Download address of a document. The name is percent-encoded as one
    /// path segment.
    pub fn document_url(&self, file_name: &str) -> Result<Url, ApiError> {
        let mut url = self.url("documents")?;
        url.path_segments_mut()
            .map_err(|()| ApiError::InvalidPath {
                path: file_name.to_string(),
                reason: "backend URL cannot carry a path".to_string(),
            })?
            .push(file_name);
        Ok(url)
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    async fn restart_login(&self) {
        if let Err(e) = self.lifecycle.manager().force_login().await {
            warn!(error = %e, "could not restart login");
        }
    }
}
