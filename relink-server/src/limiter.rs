use std::{
    collections::{HashMap, VecDeque},
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
    time::{Duration, Instant},
};

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use log::debug;
use parking_lot::Mutex;

use crate::errors::ServerError;

/// Past this many tracked peers, idle ones are swept out on the next hit
const SWEEP_THRESHOLD: usize = 4096;

/// Allows at most `limit` requests per peer inside any sliding `window`
#[derive(Debug)]
pub struct RateLimiter {
    limit: usize,
    window: Duration,
    hits: Mutex<HashMap<IpAddr, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            hits: Default::default(),
        }
    }

    /// Records a hit for the peer, returning false if it is over the limit
    pub fn allow(&self, peer: IpAddr) -> bool {
        self.allow_at(peer, Instant::now())
    }

    fn allow_at(&self, peer: IpAddr, now: Instant) -> bool {
        let mut hits = self.hits.lock();

        if hits.len() > SWEEP_THRESHOLD {
            hits.retain(|_, h| h.back().is_some_and(|last| now.duration_since(*last) < self.window));
        }

        let peer_hits = hits.entry(peer).or_default();

        while peer_hits
            .front()
            .is_some_and(|first| now.duration_since(*first) >= self.window)
        {
            peer_hits.pop_front();
        }

        if peer_hits.len() >= self.limit {
            return false;
        }

        peer_hits.push_back(now);
        true
    }
}

/// Rejects requests of peers that exceeded the limit
pub async fn limit_requests(
    State(limiter): State<Arc<RateLimiter>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request,
    next: Next,
) -> Response {
    // Without connection info all requests share one bucket
    let peer = connect_info
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

    if !limiter.allow(peer) {
        debug!("Rate limited {}", peer);
        return ServerError::RateLimited.into_response();
    }

    next.run(request).await
}

#[cfg(test)]
mod test {
    use std::{
        net::{IpAddr, Ipv4Addr},
        time::{Duration, Instant},
    };

    use super::RateLimiter;

    const ANNA: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
    const BOB: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));

    #[test]
    fn rejects_after_the_limit_inside_the_window() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        let start = Instant::now();

        for i in 0..3 {
            assert!(limiter.allow_at(ANNA, start + Duration::from_secs(i)));
        }

        assert!(!limiter.allow_at(ANNA, start + Duration::from_secs(10)));

        // Other peers have their own budget
        assert!(limiter.allow_at(BOB, start + Duration::from_secs(10)));
    }

    #[test]
    fn the_window_slides() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        let start = Instant::now();

        assert!(limiter.allow_at(ANNA, start));
        assert!(limiter.allow_at(ANNA, start + Duration::from_secs(30)));
        assert!(!limiter.allow_at(ANNA, start + Duration::from_secs(59)));

        // The first hit has left the window, the second hasn't
        assert!(limiter.allow_at(ANNA, start + Duration::from_secs(60)));
        assert!(!limiter.allow_at(ANNA, start + Duration::from_secs(61)));
    }
}
