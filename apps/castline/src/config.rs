use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: String,
    pub port: u16,
    /// STUN/TURN urls handed to the media engine, comma separated in the
    /// environment.
    pub ice_urls: Vec<String>,
    pub token_length: usize,
    pub challenge_length: usize,
    pub ice_gathering_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Config::default();

        let ice_urls = env::var("CASTLINE_ICE_URLS")
            .ok()
            .map(|raw| {
                raw.split(',')
                    .map(|url| url.trim().to_string())
                    .filter(|url| !url.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|urls| !urls.is_empty())
            .unwrap_or(defaults.ice_urls);

        Self {
            bind_address: env::var("CASTLINE_BIND").unwrap_or(defaults.bind_address),
            port: env::var("CASTLINE_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            ice_urls,
            token_length: env::var("CASTLINE_TOKEN_LENGTH")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.token_length),
            challenge_length: env::var("CASTLINE_CHALLENGE_LENGTH")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.challenge_length),
            ice_gathering_timeout: env::var("CASTLINE_ICE_GATHERING_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.ice_gathering_timeout),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 3000,
            ice_urls: vec!["stun:stun.l.google.com:19302".to_string()],
            token_length: 12,
            challenge_length: 6,
            ice_gathering_timeout: Duration::from_secs(10),
        }
    }
}
