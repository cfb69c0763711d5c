use std::sync::Arc;

use application::{DeliveryService, RateLimiter, RealtimeHub};
use config::WebSocketConfig;

use crate::JwtService;

#[derive(Clone)]
pub struct AppState {
    pub delivery_service: DeliveryService,
    pub jwt_service: Arc<JwtService>,
    /// 为 `None` 时不限流
    pub rate_limiter: Option<Arc<RateLimiter>>,
    pub websocket: WebSocketConfig,
}

impl AppState {
    pub fn new(
        delivery_service: DeliveryService,
        jwt_service: Arc<JwtService>,
        rate_limiter: Option<Arc<RateLimiter>>,
        websocket: WebSocketConfig,
    ) -> Self {
        Self {
            delivery_service,
            jwt_service,
            rate_limiter,
            websocket,
        }
    }

    pub fn hub(&self) -> &Arc<dyn RealtimeHub> {
        self.delivery_service.hub()
    }
}
