use std::time::Duration;

use serde::Deserialize;

use crate::exporter::DEFAULT_VIEW_NAME;
use crate::stats::DEFAULT_NAMESPACE;

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub listen: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_shutdown_timeout", with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_outputs")]
    pub outputs: Vec<OutputConfig>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct OutputConfig {
    #[serde(default)]
    pub labels: String,
    #[serde(default)]
    pub view_name: String,
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_owned()
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_batch_size() -> usize {
    512
}

fn default_outputs() -> Vec<OutputConfig> {
    vec![OutputConfig {
        labels: String::new(),
        view_name: DEFAULT_VIEW_NAME.to_owned(),
    }]
}

/// Loads the config from the file named by `APP_CONFIG` (`App` by default,
/// optional) and `APP__*` environment variables.
pub fn load() -> Result<Config, config::ConfigError> {
    let path = std::env::var("APP_CONFIG").unwrap_or_else(|_| "App".to_owned());

    let mut parser = config::Config::default();
    parser.merge(config::File::with_name(&path).required(false))?;
    parser.merge(config::Environment::with_prefix("APP").separator("__"))?;
    parser.try_into::<Config>()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml: &str) -> Config {
        let mut parser = config::Config::default();
        parser
            .merge(config::File::from_str(toml, config::FileFormat::Toml))
            .unwrap();
        parser.try_into::<Config>().unwrap()
    }

    #[test]
    fn defaults() {
        let config = parse("");

        assert_eq!(config.listen, "");
        assert_eq!(config.namespace, "logexporter");
        assert_eq!(config.shutdown_timeout, Duration::from_secs(5));
        assert_eq!(config.batch_size, 512);
        assert_eq!(
            config.outputs,
            vec![OutputConfig {
                labels: String::new(),
                view_name: "log_count".to_owned()
            }]
        );
    }

    #[test]
    fn outputs() {
        let config = parse(
            r#"
            listen = "127.0.0.1:9000"
            shutdown_timeout = "250ms"

            [[outputs]]
            labels = "host=hostname,pod=pod_name"
            view_name = "mylogs"

            [[outputs]]
            labels = "level=level"
            "#,
        );

        assert_eq!(config.listen, "127.0.0.1:9000");
        assert_eq!(config.shutdown_timeout, Duration::from_millis(250));
        assert_eq!(config.outputs.len(), 2);
        assert_eq!(config.outputs[0].view_name, "mylogs");
        assert_eq!(config.outputs[1].labels, "level=level");
        assert_eq!(config.outputs[1].view_name, "");
    }
}
