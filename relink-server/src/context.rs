use std::sync::Arc;

use axum::extract::FromRef;
use relink_core::Coordinator;

use crate::{auth::IdentityProvider, limiter::RateLimiter};

#[derive(Clone, FromRef)]
pub struct ServerContext {
    pub coordinator: Arc<Coordinator>,
    pub identities: Arc<dyn IdentityProvider>,
    pub limiter: Arc<RateLimiter>,
}

impl ServerContext {
    pub fn new(
        coordinator: Coordinator,
        identities: Arc<dyn IdentityProvider>,
        limiter: RateLimiter,
    ) -> Self {
        Self {
            coordinator: Arc::new(coordinator),
            identities,
            limiter: Arc::new(limiter),
        }
    }
}
