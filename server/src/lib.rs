//! Reference sync server: stores encrypted documents of its users in memory
//! and serves sync exchanges over HTTP.

pub mod handler;
pub mod storage;
pub mod util;

use {
    crate::storage::Databases,
    anyhow::{Context as _, Result, bail, format_err},
    http_body_util::{BodyExt, Full, Limited},
    hushsync_protocol::{
        ReplicaUid,
        credentials::{AccessToken, TokenCredentials},
        endpoints::{SYNC_FROM_SEGMENT, SYNC_STREAM_CONTENT_TYPE},
    },
    hushsync_sdk::server::serve,
    hyper::{
        Method, Request, Response, StatusCode,
        body::{Bytes, Incoming},
        header::{AUTHORIZATION, CONTENT_TYPE, HeaderValue},
    },
    parking_lot::Mutex,
    serde::{Deserialize, Serialize},
    std::{
        collections::HashMap,
        convert::Infallible,
        future::Future,
        net::SocketAddr,
        path::{Path, PathBuf},
        sync::Arc,
    },
    tokio::net::TcpListener,
    tracing::{info, warn},
};

/// Upper bound of a sync request body.
const MAX_REQUEST_SIZE: usize = 64 * 1024 * 1024;


#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub replica_uid: ReplicaUid,
    /// Access token of every user, by user uuid.
    pub tokens: HashMap<String, AccessToken>,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_log_filter() -> String {
    "info".into()
}

impl Config {
    #[inline]
    pub fn parse(path: &Path) -> Result<Self> {
        json5::from_str(&fs_err::read_to_string(path)?)
            .with_context(|| format!("failed to parse config file {path:?}"))
    }
}

/// Shared state of all connections.
#[derive(Debug, Clone)]
pub struct Server {
    databases: Arc<Mutex<Databases>>,
    tokens: Arc<HashMap<String, AccessToken>>,
}

impl Server {
    #[must_use]
    #[inline]
    pub fn new(config: &Config) -> Self {
        Self {
            databases: Arc::new(Mutex::new(Databases::new(config.replica_uid.clone()))),
            tokens: Arc::new(config.tokens.clone()),
        }
    }

    #[must_use]
    #[inline]
    pub fn databases(&self) -> &Mutex<Databases> {
        &self.databases
    }

    /// Serves sync requests on `listener` until `shutdown` resolves.
    #[inline]
    pub async fn run(&self, listener: TcpListener, shutdown: impl Future<Output = ()>) -> Result<()> {
        info!(addr = %listener.local_addr()?, "listening");
        let server = self.clone();
        serve(
            listener,
            move |request| {
                let server = server.clone();
                async move { server.handle_request(request).await }
            },
            shutdown,
        )
        .await;
        Ok(())
    }

    async fn handle_request(
        &self,
        request: Request<Incoming>,
    ) -> Result<Response<Full<Bytes>>, Infallible> {
        match self.try_handle_request(request).await {
            Ok(body) => {
                let mut response = Response::new(Full::new(Bytes::from(body)));
                response.headers_mut().insert(
                    CONTENT_TYPE,
                    HeaderValue::from_static(SYNC_STREAM_CONTENT_TYPE),
                );
                Ok(response)
            }
            Err(code) => {
                let mut response = Response::new(Full::new(Bytes::from(code.to_string())));
                *response.status_mut() = code;
                Ok(response)
            }
        }
    }

    async fn try_handle_request(&self, request: Request<Incoming>) -> Result<String, StatusCode> {
        let user = self.auth(&request).map_err(|err| {
            warn!(error = %err, "auth error");
            StatusCode::UNAUTHORIZED
        })?;
        let source: ReplicaUid = request
            .uri()
            .path()
            .strip_prefix('/')
            .and_then(|path| path.strip_prefix(SYNC_FROM_SEGMENT))
            .and_then(|path| path.strip_prefix('/'))
            .filter(|source| !source.is_empty() && !source.contains('/'))
            .ok_or(StatusCode::NOT_FOUND)?
            .into();
        if request.method() != Method::POST {
            return Err(StatusCode::METHOD_NOT_ALLOWED);
        }
        let body = read_body(request).await?;
        handler::sync_from(&self.databases, &user, &source, &body)
    }

    /// Returns the uuid of the user that signed the request.
    fn auth(&self, request: &Request<Incoming>) -> Result<String> {
        let header = request
            .headers()
            .get(AUTHORIZATION)
            .ok_or_else(|| format_err!("missing authorization header"))?
            .to_str()?;
        let credentials = TokenCredentials::from_authorization_header(header)?;
        let token = self
            .tokens
            .get(&credentials.uuid)
            .ok_or_else(|| format_err!("unknown user {:?}", credentials.uuid))?;
        if *token != credentials.token {
            bail!("invalid access token of user {:?}", credentials.uuid);
        }
        Ok(credentials.uuid)
    }
}

async fn read_body(request: Request<Incoming>) -> Result<String, StatusCode> {
    let bytes = Limited::new(request.into_body(), MAX_REQUEST_SIZE)
        .collect()
        .await
        .map_err(|err| {
            warn!(error = %err, "failed to read request body");
            StatusCode::BAD_REQUEST
        })?
        .to_bytes();
    String::from_utf8(bytes.to_vec()).map_err(|err| {
        warn!(error = %err, "request body is not UTF-8");
        StatusCode::BAD_REQUEST
    })
}
