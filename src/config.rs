use std::env;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,

    pub betpawa_base_url: String,
    pub sportybet_base_url: String,
    pub bet9ja_base_url: String,

    pub scraping_enabled: bool,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            database_url: env::var("DATABASE_URL").expect("DATABASE_URL must be set"),

            betpawa_base_url: env::var("BETPAWA_BASE_URL")
                .unwrap_or_else(|_| "https://www.betpawa.ng".to_string()),
            sportybet_base_url: env::var("SPORTYBET_BASE_URL")
                .unwrap_or_else(|_| "https://www.sportybet.com".to_string()),
            bet9ja_base_url: env::var("BET9JA_BASE_URL")
                .unwrap_or_else(|_| "https://sports.bet9ja.com".to_string()),

            scraping_enabled: env::var("SCRAPING_ENABLED")
                .map(|v| v == "true")
                .unwrap_or(true),
        }
    }
}
