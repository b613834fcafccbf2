use core_config::server::ServerConfig;
use core_config::{Environment, FromEnv};
use evpulse_database::mongodb::MongoDbConfig;

/// Application configuration composed from the shared config components
#[derive(Clone, Debug)]
pub struct Config {
    pub mongodb: MongoDbConfig,
    pub server: ServerConfig,
    pub environment: Environment,
}

impl Config {
    pub fn from_env() -> eyre::Result<Self> {
        Ok(Self {
            mongodb: MongoDbConfig::from_env()?,
            server: ServerConfig::from_env()?,
            environment: Environment::from_env(),
        })
    }
}
