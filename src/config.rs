/// Process configuration, read once at startup from the environment (with a
/// `.env` file honored when present).
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub cors_origin: String,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        Self {
            database_url: dotenv::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://agora.db?mode=rwc".to_owned()),
            bind_addr: dotenv::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_owned()),
            cors_origin: dotenv::var("CORS_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:5173".to_owned()),
        }
    }
}
