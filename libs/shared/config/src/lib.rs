use std::env;
use std::str::FromStr;

use tracing::warn;

/// Engine tuning knobs. Every value has a usable default so the engine can
/// start with no environment at all.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// How long a patient has to answer an offer before the reaper treats
    /// silence as a decline.
    pub offer_response_window_minutes: i64,
    /// Upper bound on re-snapshot-and-retry rounds when a match attempt
    /// loses a race on entry or slot state.
    pub max_match_attempts: u32,
    /// Number of expired offers a waitlist entry may accumulate before it
    /// rests in the expired state instead of re-entering the pool.
    pub max_missed_offers: u32,
    /// Tick interval of the offer-deadline reaper.
    pub reaper_interval_seconds: u64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            offer_response_window_minutes: parse_var("OFFER_RESPONSE_WINDOW_MINUTES", 120),
            max_match_attempts: parse_var("MAX_MATCH_ATTEMPTS", 3),
            max_missed_offers: parse_var("MAX_MISSED_OFFERS", 3),
            reaper_interval_seconds: parse_var("REAPER_INTERVAL_SECONDS", 30),
        }
    }

    pub fn offer_response_window(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.offer_response_window_minutes)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            offer_response_window_minutes: 120,
            max_match_attempts: 3,
            max_missed_offers: 3,
            reaper_interval_seconds: 30,
        }
    }
}

fn parse_var<T: FromStr>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                warn!("{} has unparseable value {:?}, using default", name, raw);
                default
            }
        },
        Err(_) => default,
    }
}
