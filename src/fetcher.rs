use reqwest::header::{HeaderMap, HeaderName, HeaderValue, COOKIE};
use reqwest::{redirect, Client, Method, Response};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::RetryPolicy;
use crate::error::{NetworkCause, NetworkError};

const USER_AGENT: &str = concat!("bookdl/", env!("CARGO_PKG_VERSION"));
const TOKEN_HEADER: &str = "x-csrf-token";

/// Opaque credentials attached to every outbound request.
#[derive(Clone, Default)]
pub struct SessionContext {
    pub cookie: Option<String>,
    pub token: Option<String>,
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("cookie", &self.cookie.as_ref().map(|_| "<redacted>"))
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl SessionContext {
    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(value) = self.cookie.as_deref().and_then(|c| HeaderValue::from_str(c).ok()) {
            headers.insert(COOKIE, value);
        }
        if let Some(value) = self.token.as_deref().and_then(|t| HeaderValue::from_str(t).ok()) {
            headers.insert(HeaderName::from_static(TOKEN_HEADER), value);
        }
        headers
    }
}

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
    /// Treat 3xx as success and do not follow it
    pub accept_redirect: bool,
    pub cancel: Option<CancellationToken>,
}

impl FetchRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
            accept_redirect: false,
            cancel: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn accept_redirect(mut self) -> Self {
        self.accept_redirect = true;
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

#[derive(Debug, Clone)]
pub struct RetryingFetcher {
    client: Client,
    manual_redirect_client: Client,
    session: SessionContext,
}

impl RetryingFetcher {
    pub fn new(session: SessionContext) -> Self {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());
        let manual_redirect_client = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(10))
            .redirect(redirect::Policy::none())
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            manual_redirect_client,
            session,
        }
    }

    /// Send `request`, retrying failures according to `policy`.
    ///
    /// `on_retry` receives the 1-based number of the attempt about to be
    /// made, before the backoff sleep starts.
    pub async fn fetch<F>(
        &self,
        request: &FetchRequest,
        policy: &RetryPolicy,
        mut on_retry: F,
    ) -> Result<Response, NetworkError>
    where
        F: FnMut(u32),
    {
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let cause = match self.send_once(request).await {
                Ok(response) if is_success(&response, request.accept_redirect) => {
                    if attempt > 1 {
                        tracing::info!(url = %request.url, attempts = attempt, "request succeeded after retry");
                    }
                    return Ok(response);
                }
                Ok(response) => {
                    let status = response.status();
                    NetworkCause::Status {
                        code: status.as_u16(),
                        reason: status.canonical_reason().unwrap_or_default().to_string(),
                    }
                }
                Err(cause) => cause,
            };

            if cause == NetworkCause::Cancelled || attempt >= max_attempts {
                if cause != NetworkCause::Cancelled {
                    tracing::error!(url = %request.url, attempts = attempt, cause = %cause, "request failed, retries exhausted");
                }
                return Err(NetworkError {
                    url: request.url.clone(),
                    cause,
                    attempts: attempt,
                });
            }

            attempt += 1;
            let delay = policy.delay_before(attempt);
            tracing::warn!(
                url = %request.url,
                cause = %cause,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                "request failed, retrying"
            );
            on_retry(attempt);

            if !sleep_unless_cancelled(delay, request.cancel.as_ref()).await {
                return Err(NetworkError {
                    url: request.url.clone(),
                    cause: NetworkCause::Cancelled,
                    attempts: attempt - 1,
                });
            }
        }
    }

    async fn send_once(&self, request: &FetchRequest) -> Result<Response, NetworkCause> {
        let client = if request.accept_redirect {
            &self.manual_redirect_client
        } else {
            &self.client
        };

        let mut builder = client
            .request(request.method.clone(), &request.url)
            .headers(self.session.headers())
            .headers(request.headers.clone());
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let send = builder.send();
        let result = match &request.cancel {
            Some(token) => tokio::select! {
                _ = token.cancelled() => return Err(NetworkCause::Cancelled),
                result = send => result,
            },
            None => send.await,
        };

        result.map_err(|e| NetworkCause::Transport(e.to_string()))
    }
}

fn is_success(response: &Response, accept_redirect: bool) -> bool {
    let status = response.status();
    status.is_success() || (accept_redirect && status.is_redirection())
}

/// Returns false if the token fired before the delay elapsed.
async fn sleep_unless_cancelled(delay: Duration, cancel: Option<&CancellationToken>) -> bool {
    match cancel {
        Some(token) => tokio::select! {
            _ = token.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        },
        None => {
            tokio::time::sleep(delay).await;
            true
        }
    }
}
