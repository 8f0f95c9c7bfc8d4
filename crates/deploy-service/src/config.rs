//! Configuration management for Deploy Service
//!
//! Loads configuration from environment variables with sensible defaults.

use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// API server host
    pub api_host: String,

    /// API server port
    pub api_port: u16,

    /// Directory deployments are cloned into, one subdirectory per record
    pub deployments_dir: PathBuf,

    /// Shared reverse proxy configuration file
    pub proxy_config_path: PathBuf,

    /// Name of the running reverse proxy container
    pub proxy_container: String,

    /// Base URL the reverse proxy is reachable at
    pub public_base_url: String,

    /// Docker network deployments are attached to
    pub docker_network: String,

    /// Package manager used for install and build
    pub package_manager: String,

    /// Directory the static build output lands in
    pub static_output_dir: String,

    /// git executable
    pub git_bin: String,

    /// docker executable
    pub docker_bin: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_host: "0.0.0.0".to_string(),
            api_port: 3001,
            deployments_dir: PathBuf::from("./deployed-apps"),
            proxy_config_path: PathBuf::from("./nginx/conf.d/reverse-proxy.conf"),
            proxy_container: "nginx-proxy".to_string(),
            public_base_url: "http://localhost:8080".to_string(),
            docker_network: "app-network".to_string(),
            package_manager: "npm".to_string(),
            static_output_dir: "build".to_string(),
            git_bin: "git".to_string(),
            docker_bin: "docker".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if it exists (for local development)
        dotenvy::dotenv().ok();

        let defaults = Config::default();

        let config = Config {
            api_host: env::var("API_HOST").unwrap_or(defaults.api_host),

            api_port: env::var("API_PORT")
                .unwrap_or_else(|_| defaults.api_port.to_string())
                .parse()
                .context("Invalid API_PORT")?,

            deployments_dir: env::var("DEPLOYMENTS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.deployments_dir),

            proxy_config_path: env::var("PROXY_CONFIG_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.proxy_config_path),

            proxy_container: env::var("PROXY_CONTAINER").unwrap_or(defaults.proxy_container),

            public_base_url: env::var("PUBLIC_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.public_base_url),

            docker_network: env::var("DOCKER_NETWORK").unwrap_or(defaults.docker_network),

            package_manager: env::var("PACKAGE_MANAGER").unwrap_or(defaults.package_manager),

            static_output_dir: env::var("STATIC_OUTPUT_DIR")
                .unwrap_or(defaults.static_output_dir),

            git_bin: env::var("GIT_BIN").unwrap_or(defaults.git_bin),

            docker_bin: env::var("DOCKER_BIN").unwrap_or(defaults.docker_bin),
        };

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.api_port == 0 {
            anyhow::bail!("API_PORT must be greater than 0");
        }

        if self.public_base_url.is_empty() {
            anyhow::bail!("PUBLIC_BASE_URL must not be empty");
        }

        for (name, value) in [
            ("PROXY_CONTAINER", &self.proxy_container),
            ("DOCKER_NETWORK", &self.docker_network),
            ("PACKAGE_MANAGER", &self.package_manager),
            ("GIT_BIN", &self.git_bin),
            ("DOCKER_BIN", &self.docker_bin),
        ] {
            if value.trim().is_empty() {
                anyhow::bail!("{} must not be empty", name);
            }
        }

        Ok(())
    }

    /// Get the API server address
    pub fn api_address(&self) -> String {
        format!("{}:{}", self.api_host, self.api_port)
    }

    /// Public URL a target path is served under
    pub fn public_url(&self, target_path: &str) -> String {
        format!("{}/{}/", self.public_base_url, target_path)
    }

    /// Ensure working directories exist
    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.deployments_dir).with_context(|| {
            format!(
                "Failed to create deployments directory: {}",
                self.deployments_dir.display()
            )
        })?;

        Ok(())
    }
}
