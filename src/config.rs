use serde::Deserialize;

fn default_sweep_interval() -> u64 {
    86_400
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server_port: u16,
    pub database_url: String,
    /// Secret the gateway signs its payment confirmations with.
    pub gateway_webhook_secret: String,
    /// Seconds between daily-sweep ticks. Once a day in production; short
    /// values are for local runs.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::Environment::default())
            .build()?;
        config.try_deserialize()
    }
}
