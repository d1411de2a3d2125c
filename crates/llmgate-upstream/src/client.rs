//! Typed calls to an upstream admin API (§4.F): pricing, token inventory,
//! balance, checkin, and token create/delete — bound to one
//! `(base_url, admin_token, user_id)` triple.

use std::time::Duration;

use wreq::{Proxy, StatusCode};

use crate::cloudflare::looks_like_challenge;
use crate::types::{
    CreateTokenRequest, UpstreamCheckinData, UpstreamEnvelope, UpstreamModelList, UpstreamPricing,
    UpstreamToken, UpstreamUserSelf,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("upstream transport error: {0}")]
    Transport(#[from] wreq::Error),
    #[error("upstream returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("upstream reported failure: {0}")]
    Failed(String),
    #[error("upstream response did not parse: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("upstream is behind a Cloudflare challenge (status {status})")]
    CloudflareChallenge { status: u16 },
}

pub struct UpstreamAdminClient {
    base_url: String,
    admin_token: String,
    user_id: i64,
    client: wreq::Client,
}

impl UpstreamAdminClient {
    pub fn new(
        base_url: impl Into<String>,
        admin_token: impl Into<String>,
        user_id: i64,
        proxy: Option<&str>,
    ) -> Result<Self, UpstreamError> {
        let mut builder = wreq::Client::builder().timeout(REQUEST_TIMEOUT);
        if let Some(proxy) = proxy.filter(|p| !p.trim().is_empty()) {
            builder = builder.proxy(Proxy::all(proxy)?);
        }
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            admin_token: admin_token.into(),
            user_id,
            client: builder.build()?,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(
        &self,
        method: wreq::Method,
        path: &str,
        json_body: Option<&serde_json::Value>,
    ) -> Result<bytes::Bytes, UpstreamError> {
        let mut builder = self
            .client
            .request(method, self.url(path))
            .header("Authorization", format!("Bearer {}", self.admin_token))
            .header("New-Api-User", self.user_id.to_string())
            .header("Content-Type", "application/json");
        if let Some(body) = json_body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        if status != StatusCode::OK {
            let text = String::from_utf8_lossy(&body).into_owned();
            if looks_like_challenge(status.as_u16(), &headers, &text) {
                return Err(UpstreamError::CloudflareChallenge {
                    status: status.as_u16(),
                });
            }
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(body)
    }

    pub async fn get_pricing(&self) -> Result<Vec<UpstreamPricing>, UpstreamError> {
        let body = self.send(wreq::Method::GET, "/api/pricing", None).await?;
        let envelope: UpstreamEnvelope<Vec<UpstreamPricing>> = serde_json::from_slice(&body)?;
        if !envelope.success {
            return Err(UpstreamError::Failed(envelope.message));
        }
        Ok(envelope.data)
    }

    pub async fn get_tokens_page(
        &self,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<UpstreamToken>, UpstreamError> {
        let path = format!("/api/token/?p={page}&page_size={page_size}");
        let body = self.send(wreq::Method::GET, &path, None).await?;
        let envelope: UpstreamEnvelope<Vec<UpstreamToken>> = serde_json::from_slice(&body)?;
        if !envelope.success {
            return Err(UpstreamError::Failed(envelope.message));
        }
        Ok(envelope.data)
    }

    /// Walks every page until one comes back short of `page_size`.
    pub async fn get_all_tokens(&self, page_size: u32) -> Result<Vec<UpstreamToken>, UpstreamError> {
        let mut page = 1;
        let mut all = Vec::new();
        loop {
            let batch = self.get_tokens_page(page, page_size).await?;
            let got = batch.len() as u32;
            all.extend(batch);
            if got < page_size {
                break;
            }
            page += 1;
        }
        Ok(all)
    }

    pub async fn get_user_self(&self) -> Result<UpstreamUserSelf, UpstreamError> {
        let body = self.send(wreq::Method::GET, "/api/user/self", None).await?;
        let envelope: UpstreamEnvelope<UpstreamUserSelf> = serde_json::from_slice(&body)?;
        if !envelope.success {
            return Err(UpstreamError::Failed(envelope.message));
        }
        Ok(envelope.data)
    }

    pub async fn checkin(&self) -> Result<UpstreamCheckinData, UpstreamError> {
        let body = self
            .send(wreq::Method::POST, "/api/user/checkin", None)
            .await?;
        let envelope: UpstreamEnvelope<UpstreamCheckinData> = serde_json::from_slice(&body)?;
        if !envelope.success {
            return Err(UpstreamError::Failed(envelope.message));
        }
        Ok(envelope.data)
    }

    pub async fn create_token(
        &self,
        request: &CreateTokenRequest,
    ) -> Result<UpstreamToken, UpstreamError> {
        let value = serde_json::to_value(request)?;
        let body = self.send(wreq::Method::POST, "/api/token/", Some(&value)).await?;
        let envelope: UpstreamEnvelope<UpstreamToken> = serde_json::from_slice(&body)?;
        if !envelope.success {
            return Err(UpstreamError::Failed(envelope.message));
        }
        Ok(envelope.data)
    }

    /// Upstream accepts the delete path with or without a trailing slash
    /// depending on deployment; try the canonical form first.
    pub async fn delete_token(&self, id: i64) -> Result<(), UpstreamError> {
        let path = format!("/api/token/{id}");
        match self.send(wreq::Method::DELETE, &path, None).await {
            Ok(_) => Ok(()),
            Err(UpstreamError::Status { status: 404, .. }) => {
                let fallback = format!("/api/token/{id}/");
                self.send(wreq::Method::DELETE, &fallback, None).await?;
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

/// Key-only providers skip the admin surface entirely and discover their
/// model list from the OpenAI-compatible `/v1/models` endpoint, bearing the
/// single configured API key (§4.F).
pub struct KeyOnlyClient {
    base_url: String,
    api_key: String,
    client: wreq::Client,
}

impl KeyOnlyClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        proxy: Option<&str>,
    ) -> Result<Self, UpstreamError> {
        let mut builder = wreq::Client::builder().timeout(REQUEST_TIMEOUT);
        if let Some(proxy) = proxy.filter(|p| !p.trim().is_empty()) {
            builder = builder.proxy(Proxy::all(proxy)?);
        }
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client: builder.build()?,
        })
    }

    pub async fn list_models(&self) -> Result<Vec<String>, UpstreamError> {
        let url = format!("{}/v1/models", self.base_url);
        let response = self
            .client
            .get(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;
        if status != StatusCode::OK {
            let text = String::from_utf8_lossy(&body).into_owned();
            if looks_like_challenge(status.as_u16(), &headers, &text) {
                return Err(UpstreamError::CloudflareChallenge {
                    status: status.as_u16(),
                });
            }
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body: text,
            });
        }
        let list: UpstreamModelList = serde_json::from_slice(&body)?;
        Ok(list.data.into_iter().map(|entry| entry.id).collect())
    }
}
