use anyhow::{Context, Result};

const DEFAULT_WORLDID_API_URL: &str = "https://developer.worldcoin.org";

#[derive(Clone, Debug)]
pub struct ServiceConfig {
    pub database_url: String,
    pub redis_url: String,
    pub http_addr: String,
    pub app_env: String,
    pub world_app_id: Option<String>,
    pub worldid_api_url: String,
}

impl ServiceConfig {
    pub fn from_env(default_http_addr: &str) -> Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is required")?;
        let redis_url = std::env::var("REDIS_URL").context("REDIS_URL is required")?;
        let http_addr =
            std::env::var("HTTP_ADDR").unwrap_or_else(|_| default_http_addr.to_string());
        let app_env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        let world_app_id = std::env::var("WORLD_APP_ID").ok().filter(|v| !v.is_empty());
        let worldid_api_url = std::env::var("WORLDID_API_URL")
            .unwrap_or_else(|_| DEFAULT_WORLDID_API_URL.to_string());

        Ok(Self {
            database_url,
            redis_url,
            http_addr,
            app_env,
            world_app_id,
            worldid_api_url,
        })
    }

    pub fn worker_from_env() -> Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is required")?;
        let redis_url = std::env::var("REDIS_URL").context("REDIS_URL is required")?;
        let app_env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        Ok(Self {
            database_url,
            redis_url,
            http_addr: String::new(),
            app_env,
            world_app_id: None,
            worldid_api_url: DEFAULT_WORLDID_API_URL.to_string(),
        })
    }

    pub fn is_production(&self) -> bool {
        self.app_env == "production"
    }
}
