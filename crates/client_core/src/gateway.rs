use std::sync::Arc;

use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Client, Method, StatusCode,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use shared::error::{ErrorBody, GENERIC_REQUEST_FAILED};
use thiserror::Error;
use tracing::debug;

use crate::session_store::SessionStore;

/// Outcome taxonomy for one gateway call. The gateway never retries and
/// never hides a failure: every call ends in a payload or one of these.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Transport failure; no HTTP response was received.
    #[error("network failure: {source}")]
    Network {
        #[source]
        source: reqwest::Error,
    },
    /// The server rejected the bearer token. The session store has already
    /// been cleared by the time this is surfaced.
    #[error("session expired")]
    SessionExpired,
    /// Any other non-success response, with the server-supplied message when
    /// the body was parseable.
    #[error("request failed with status {status}: {message}")]
    Api { status: u16, message: String },
}

impl GatewayError {
    pub fn status(&self) -> Option<u16> {
        match self {
            GatewayError::Api { status, .. } => Some(*status),
            GatewayError::SessionExpired => Some(StatusCode::UNAUTHORIZED.as_u16()),
            GatewayError::Network { .. } => None,
        }
    }
}

/// Options for a single call. Defaults to a body-less GET with no extra
/// headers.
#[derive(Debug, Default)]
pub struct RequestOptions {
    pub method: Method,
    pub body: Option<Value>,
    /// Merged over the gateway's defaults; a caller-supplied `Content-Type`
    /// or `Authorization` wins.
    pub headers: HeaderMap,
}

/// Performs HTTP calls against the remote API with uniform headers and the
/// error-translation policy above.
///
/// Its only side effects are the network call itself and, on a 401 to a
/// request that carried the bearer token, clearing the session store.
pub struct ApiGateway {
    http: Client,
    base_url: String,
    session: Arc<SessionStore>,
}

impl ApiGateway {
    pub fn new(base_url: impl Into<String>, session: Arc<SessionStore>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            http: Client::new(),
            base_url,
            session,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// One call, translated into a JSON payload or a [`GatewayError`].
    pub async fn request(&self, path: &str, options: RequestOptions) -> Result<Value, GatewayError> {
        let (_, value) = self
            .send_raw(
                options.method,
                path,
                options.body.as_ref(),
                options.headers,
            )
            .await?;
        Ok(value)
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, GatewayError> {
        let (status, value) = self
            .send_raw::<Value>(Method::GET, path, None, HeaderMap::new())
            .await?;
        decode(status, value)
    }

    pub async fn post<T, B>(&self, path: &str, body: &B) -> Result<T, GatewayError>
    where
        T: DeserializeOwned,
        B: Serialize,
    {
        let (status, value) = self
            .send_raw(Method::POST, path, Some(body), HeaderMap::new())
            .await?;
        decode(status, value)
    }

    pub async fn put<T, B>(&self, path: &str, body: &B) -> Result<T, GatewayError>
    where
        T: DeserializeOwned,
        B: Serialize,
    {
        let (status, value) = self
            .send_raw(Method::PUT, path, Some(body), HeaderMap::new())
            .await?;
        decode(status, value)
    }

    async fn send_raw<B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        extra_headers: HeaderMap,
    ) -> Result<(StatusCode, Value), GatewayError> {
        let url = format!("{}{}", self.base_url, path);

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let token_attached = match self.session.token().await {
            Some(token) => match HeaderValue::from_str(&format!("Bearer {token}")) {
                Ok(value) => {
                    headers.insert(AUTHORIZATION, value);
                    true
                }
                Err(_) => {
                    // A token that cannot form a header can never authenticate.
                    debug!("bearer token contains invalid header characters, omitting");
                    false
                }
            },
            None => false,
        };
        for (name, value) in extra_headers.iter() {
            headers.insert(name, value.clone());
        }

        let mut builder = self.http.request(method, &url);
        if let Some(body) = body {
            builder = builder.json(body);
        }
        // Applied after the body so caller overrides survive `json()`.
        builder = builder.headers(headers);

        let response = builder
            .send()
            .await
            .map_err(|source| GatewayError::Network { source })?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED && token_attached {
            // The sole reactive invalidation path: a 401 specifically (not any
            // 4xx) on a request that carried the bearer token ends the session.
            debug!(%url, "server rejected bearer token, clearing session");
            self.session.clear().await;
            return Err(GatewayError::SessionExpired);
        }

        if !status.is_success() {
            let message = match response.json::<ErrorBody>().await {
                Ok(body) => body.error,
                Err(_) => GENERIC_REQUEST_FAILED.to_string(),
            };
            return Err(GatewayError::Api {
                status: status.as_u16(),
                message,
            });
        }

        match response.json::<Value>().await {
            Ok(value) => Ok((status, value)),
            // Every endpoint in scope is contractually JSON; a non-JSON
            // success body is a malformed response, not a transport failure.
            Err(err) if err.is_decode() => Err(malformed(status)),
            Err(source) => Err(GatewayError::Network { source }),
        }
    }
}

fn decode<T: DeserializeOwned>(status: StatusCode, value: Value) -> Result<T, GatewayError> {
    serde_json::from_value(value).map_err(|_| malformed(status))
}

fn malformed(status: StatusCode) -> GatewayError {
    GatewayError::Api {
        status: status.as_u16(),
        message: "malformed response body".to_string(),
    }
}

#[cfg(test)]
#[path = "tests/gateway_tests.rs"]
mod tests;
