use crate::config::SettingsSource;
use crate::rate_limit::RateLimiter;

#[derive(Clone)]
pub struct AppState {
    pub limiter: RateLimiter,
    pub http: reqwest::Client,
    pub settings: SettingsSource,
}
