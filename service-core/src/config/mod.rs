use crate::error::AppError;
use config::{Config as Cfg, File};
use serde::Deserialize;

/// Settings shared by every service binary.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    8080
}

impl Config {
    /// Load from `configuration.{toml,yaml,json}` if present, then `APP__*`
    /// variables, then a bare `PORT` as container platforms set it.
    pub fn load() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let mut builder = Cfg::builder()
            .add_source(File::with_name("configuration").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"));

        if let Ok(port) = std::env::var("PORT") {
            builder = builder.set_override("port", port)?;
        }

        Ok(builder.build()?.try_deserialize()?)
    }
}
