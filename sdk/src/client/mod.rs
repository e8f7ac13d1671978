use {
    anyhow::{Error, Result, format_err},
    cadd::ops::Cadd,
    hushsync_protocol::{
        ReplicaUid,
        credentials::TokenCredentials,
        endpoints::{SYNC_FROM_SEGMENT, SYNC_STREAM_CONTENT_TYPE},
    },
    reqwest::{
        RequestBuilder, Url,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    std::{
        fmt::{self, Debug},
        future::Future,
        sync::Arc,
        time::Duration,
    },
    tokio::time::sleep,
    tracing::{instrument, warn},
};

/// Sends a sync stream to the remote replica and returns the response stream.
pub trait SyncTransport: Send + Sync {
    fn send_sync_stream(
        &self,
        source_replica_uid: &ReplicaUid,
        body: String,
    ) -> impl Future<Output = Result<String>> + Send;
}

/// Adds authentication to outgoing requests.
pub trait RequestSigner: Send + Sync {
    fn sign(&self, request: RequestBuilder) -> RequestBuilder;
}

impl RequestSigner for TokenCredentials {
    #[inline]
    fn sign(&self, request: RequestBuilder) -> RequestBuilder {
        request.header(AUTHORIZATION, self.authorization_header())
    }
}

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: usize,
    pub period: Duration,
}

impl Default for RetryPolicy {
    #[inline]
    fn default() -> Self {
        Self {
            attempts: 5,
            period: Duration::from_secs(10),
        }
    }
}

/// Sync transport over HTTP.
///
/// Reuse created transport or clone it in order to reuse a connection pool.
#[derive(Clone)]
pub struct HttpTransport {
    reqwest: reqwest::Client,
    server_url: Url,
    signer: Option<Arc<dyn RequestSigner>>,
    retry: RetryPolicy,
}

impl HttpTransport {
    #[inline]
    pub fn new(server_url: Url) -> Result<Self> {
        Ok(Self {
            server_url,
            reqwest: reqwest::Client::builder()
                .timeout(DEFAULT_TIMEOUT)
                .build()?,
            signer: None,
            retry: RetryPolicy::default(),
        })
    }

    #[must_use]
    #[inline]
    pub fn with_signer(mut self, signer: Arc<dyn RequestSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    #[must_use]
    #[inline]
    pub fn with_token(self, credentials: TokenCredentials) -> Self {
        self.with_signer(Arc::new(credentials))
    }

    #[must_use]
    #[inline]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    #[inline]
    pub fn server_url(&self) -> &Url {
        &self.server_url
    }

    fn sync_url(&self, source_replica_uid: &ReplicaUid) -> Result<Url> {
        let mut url = self.server_url.clone();
        url.path_segments_mut()
            .map_err(|()| format_err!("failed server URL extension"))?
            .pop_if_empty()
            .push(SYNC_FROM_SEGMENT)
            .push(source_replica_uid.as_str());
        Ok(url)
    }
}

impl Debug for HttpTransport {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport")
            .field("server_url", &self.server_url.as_str())
            .field("signed", &self.signer.is_some())
            .finish()
    }
}

impl SyncTransport for HttpTransport {
    #[instrument(skip_all, fields(source = %source_replica_uid))]
    #[inline]
    async fn send_sync_stream(&self, source_replica_uid: &ReplicaUid, body: String) -> Result<String> {
        let url = self.sync_url(source_replica_uid)?;
        ok_or_retry(self.retry, || async {
            let mut request = self
                .reqwest
                .post(url.clone())
                .header(CONTENT_TYPE, SYNC_STREAM_CONTENT_TYPE)
                .body(body.clone());
            if let Some(signer) = &self.signer {
                request = signer.sign(request);
            }
            let response = request.send().await.map_err(RequestError::transport)?;
            let status = response.status();
            let text = response.text().await.map_err(RequestError::transport)?;
            if !status.is_success() {
                return Err(RequestError::application(format_err!(
                    "server returned {status}: {text}"
                )));
            }
            Ok(text)
        })
        .await
    }
}

/// Retries the request if an error arises due to the transport.
async fn ok_or_retry<T, F, Fut>(policy: RetryPolicy, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RequestError>>,
{
    let mut attempt = 0;
    loop {
        attempt = attempt.cadd(1_usize)?;
        let transport_err = match f().await {
            Ok(x) => break Ok(x),
            Err(RequestError::Application(err)) => break Err(err),
            Err(RequestError::Transport(err)) => err,
        };
        if attempt >= policy.attempts {
            break Err(transport_err);
        }
        warn!(error = %transport_err, attempt, "transport failed, will retry");
        sleep(policy.period).await;
    }
}

enum RequestError {
    Transport(Error),
    Application(Error),
}

impl RequestError {
    fn application(err: impl Into<Error>) -> Self {
        Self::Application(err.into())
    }

    fn transport(err: impl Into<Error>) -> Self {
        Self::Transport(err.into())
    }
}
