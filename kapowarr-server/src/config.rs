//! Static server configuration, layered from defaults, an optional
//! config file and environment variables. Runtime-mutable settings live
//! in the database instead.

use std::path::PathBuf;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to bind on.
    pub host: String,
    pub port: u16,
    /// Prefix the whole app is served under, e.g. `/kapowarr`.
    pub url_base: String,
    /// Folder holding the database and the catalog cache.
    pub data_folder: PathBuf,
    /// Log file, additionally to stdout. Serves `/system/logs`.
    pub log_file: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5656,
            url_base: String::new(),
            data_folder: PathBuf::from("data"),
            log_file: None,
        }
    }
}

impl ServerConfig {
    /// Load the configuration: defaults, then `kapowarr.toml` (if
    /// present), then `KAPOWARR_*` environment variables.
    pub fn load(config_file: Option<&PathBuf>) -> anyhow::Result<Self> {
        let defaults = ServerConfig::default();
        let mut builder = config::Config::builder()
            .set_default("host", defaults.host.clone())?
            .set_default("port", defaults.port as i64)?
            .set_default("url_base", defaults.url_base.clone())?
            .set_default(
                "data_folder",
                defaults.data_folder.to_string_lossy().to_string(),
            )?;

        if let Some(file) = config_file {
            builder = builder.add_source(
                config::File::from(file.clone()).required(true),
            );
        } else {
            builder = builder.add_source(
                config::File::with_name("kapowarr").required(false),
            );
        }

        let settings = builder
            .add_source(config::Environment::with_prefix("KAPOWARR"))
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    /// The normalised URL base: no trailing slash, a leading one if set.
    pub fn normalized_url_base(&self) -> String {
        let trimmed = self.url_base.trim_matches('/');
        if trimmed.is_empty() {
            String::new()
        } else {
            format!("/{trimmed}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_base_normalisation() {
        let mut config = ServerConfig::default();
        assert_eq!(config.normalized_url_base(), "");
        config.url_base = "kapowarr/".to_string();
        assert_eq!(config.normalized_url_base(), "/kapowarr");
    }
}
