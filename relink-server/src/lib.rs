mod auth;
mod chats;
mod context;
mod docs;
mod errors;
mod gateway;
mod limiter;
mod offers;
mod schemas;
mod serialized;

use std::{
    env,
    net::{Ipv6Addr, SocketAddr},
    path::PathBuf,
    str::FromStr,
    sync::Arc,
    time::Duration,
};

use axum::{http::HeaderName, middleware::from_fn_with_state, routing::get, Json};
use log::{info, warn};
use relink_core::{Config, JsonStorage, MemoryStorage, SharedStorage, StorageResult};
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

pub use auth::{
    Identity, IdentityError, IdentityProvider, TokenIdentities, TrustedHeader,
    DEFAULT_TRUSTED_HEADER,
};
pub use context::ServerContext;
pub use errors::*;
pub use gateway::{ClientFrame, ServerFrame};
pub use limiter::RateLimiter;

use serialized::Health;

/// The default port the server will listen on.
pub const DEFAULT_PORT: u16 = 5050;
pub const DEFAULT_RATE_LIMIT: usize = 120;
pub const DEFAULT_RATE_WINDOW: Duration = Duration::from_secs(60);

pub type Router = axum::Router<ServerContext>;

/// Everything the server reads from the environment
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// Where offers and chats are persisted. Kept in memory if not set.
    pub data_dir: Option<PathBuf>,
    /// A `token:user_id,...` table. When set, callers are identified by bearer token.
    pub tokens: Option<String>,
    /// The header a fronting auth proxy sets, used when no token table is configured
    pub trusted_header: String,
    pub rate_limit: usize,
    pub rate_window: Duration,
    pub core: Config,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} must be {expected}, got {value:?}")]
    Invalid {
        name: &'static str,
        expected: &'static str,
        value: String,
    },
    #[error("{0:?} is not a valid header name")]
    InvalidHeader(String),
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        let port = read(&lookup, "RELINK_SERVER_PORT", "a port number")?.unwrap_or(DEFAULT_PORT);
        let rate_limit =
            read(&lookup, "RATE_LIMIT", "a number of requests")?.unwrap_or(DEFAULT_RATE_LIMIT);
        let rate_window = read(&lookup, "RATE_WINDOW", "a number of seconds")?
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_RATE_WINDOW);

        let core = Config {
            outbound_queue_size: read(&lookup, "RELINK_OUTBOUND_QUEUE", "a queue size")?
                .unwrap_or(defaults.outbound_queue_size),
            max_rooms_per_session: read(&lookup, "RELINK_MAX_ROOMS", "a number of rooms")?
                .unwrap_or(defaults.max_rooms_per_session),
            max_message_length: read(
                &lookup,
                "RELINK_MAX_MESSAGE_LENGTH",
                "a number of characters",
            )?
            .unwrap_or(defaults.max_message_length),
        };

        Ok(Self {
            port,
            data_dir: lookup("RELINK_DATA_DIR")
                .filter(|d| !d.trim().is_empty())
                .map(PathBuf::from),
            tokens: lookup("RELINK_TOKENS").filter(|t| !t.trim().is_empty()),
            trusted_header: lookup("RELINK_TRUSTED_HEADER")
                .unwrap_or_else(|| DEFAULT_TRUSTED_HEADER.to_string()),
            rate_limit,
            rate_window,
            core,
        })
    }

    /// Opens the configured storage
    pub fn storage(&self) -> StorageResult<SharedStorage> {
        match &self.data_dir {
            Some(dir) => Ok(Arc::new(JsonStorage::open(dir)?)),
            None => {
                warn!("RELINK_DATA_DIR is not set, offers and chats will be lost on restart");
                Ok(Arc::new(MemoryStorage::new()))
            }
        }
    }

    /// Picks how callers are identified
    pub fn identities(&self) -> Result<Arc<dyn IdentityProvider>, ConfigError> {
        if let Some(tokens) = &self.tokens {
            let tokens = TokenIdentities::parse(tokens);
            info!("Identifying callers by bearer token ({} known)", tokens.len());

            return Ok(Arc::new(tokens));
        }

        let header = HeaderName::from_str(&self.trusted_header)
            .map_err(|_| ConfigError::InvalidHeader(self.trusted_header.clone()))?;

        info!("Trusting the {} header to identify callers", header);
        Ok(Arc::new(TrustedHeader::new(header)))
    }

    pub fn rate_limiter(&self) -> RateLimiter {
        RateLimiter::new(self.rate_limit, self.rate_window)
    }
}

fn read<T, F>(lookup: &F, name: &'static str, expected: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|value| {
            value.trim().parse().map_err(|_| ConfigError::Invalid {
                name,
                expected,
                value,
            })
        })
        .transpose()
}

/// Builds the full router of the server
pub fn router(context: ServerContext) -> axum::Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let version_one_router = Router::new()
        .nest("/posts", offers::router())
        .nest("/chats", chats::router())
        .merge(gateway::router())
        .layer(from_fn_with_state(
            context.limiter.clone(),
            limiter::limit_requests,
        ));

    Router::new()
        .nest("/v1", version_one_router)
        .route("/health", get(health))
        .route("/api.json", get(docs::docs))
        .layer(cors)
        .with_state(context)
}

async fn health() -> Json<Health> {
    Json(Health::ok())
}

/// Starts the reLink server
pub async fn run_server(context: ServerContext, port: u16) -> std::io::Result<()> {
    let addr: SocketAddr = (Ipv6Addr::UNSPECIFIED, port).into();
    let listener = TcpListener::bind(&addr).await?;

    info!("Listening on port {}", port);

    axum::serve(
        listener,
        router(context).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
}
