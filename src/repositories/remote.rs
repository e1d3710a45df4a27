use std::time::Duration;

use futures::future::BoxFuture;

use crate::error::{AppError, Result};
use crate::models::session::UserId;
use crate::models::user::RemoteIdentity;

/// The remote source of truth for identities.
pub trait RemoteIdentityService: Send + Sync {
    /// Lists every identity; used only for the initial credential match.
    fn list_identities(&self) -> BoxFuture<'_, Result<Vec<RemoteIdentity>>>;

    /// Fetches the full record of one identity, including its role object.
    fn fetch_identity<'a>(&'a self, id: &'a UserId) -> BoxFuture<'a, Result<RemoteIdentity>>;
}

/// A `RemoteIdentityService` speaking JSON over HTTP.
#[derive(Clone)]
pub struct HttpIdentityService {
    client: reqwest::Client,
    base_url: reqwest::Url,
}

impl HttpIdentityService {
    /// Creates a new `HttpIdentityService`.
    ///
    /// # Arguments
    ///
    /// * `base_url` - The API base URL; a trailing slash is ignored.
    /// * `timeout` - Bounded timeout applied to every request.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `HttpIdentityService`, or `Validation` if
    /// `base_url` is not an absolute http(s) URL.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = reqwest::Url::parse(base_url.trim_end_matches('/'))
            .map_err(|e| AppError::Validation(format!("Invalid API base URL {}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(AppError::Validation(format!(
                "API base URL {} cannot carry a path",
                base_url
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()?;

        Ok(Self { client, base_url })
    }

    /// Appends each segment to the base URL, percent-encoding as needed.
    fn endpoint(&self, segments: &[&str]) -> Result<reqwest::Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                AppError::Validation(format!("API base URL {} cannot carry a path", self.base_url))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T>(&self, url: reqwest::Url) -> Result<T>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        tracing::debug!("🌐 GET {}", url);

        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::NetworkUnavailable(format!(
                "GET {} returned {}",
                url.path(),
                status
            )));
        }

        let body = response.text().await?;
        Ok(sonic_rs::from_str(&body)?)
    }
}

impl RemoteIdentityService for HttpIdentityService {
    fn list_identities(&self) -> BoxFuture<'_, Result<Vec<RemoteIdentity>>> {
        Box::pin(async move { self.get_json(self.endpoint(&["identities"])?).await })
    }

    fn fetch_identity<'a>(&'a self, id: &'a UserId) -> BoxFuture<'a, Result<RemoteIdentity>> {
        Box::pin(async move {
            self.get_json(self.endpoint(&["identities", id.as_str()])?)
                .await
        })
    }
}
