//! Reverse proxy synchronization
//!
//! The shared proxy configuration is rendered as a whole from an in-memory
//! table of routes, one per published deployment. All writers go through a
//! single lock held across update, render, write and reload, so two
//! deployments publishing at once cannot drop each other's route.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::invoker::{CommandLine, Invoker};
use crate::templates;

/// A public location mapped to a container's internal address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRoute {
    /// URL path, e.g. `/demo-app_1700000000000/`
    pub location: String,

    /// Upstream the location is proxied to, e.g. `http://app-0123456789ab:80/`
    pub upstream: String,
}

impl ProxyRoute {
    pub fn new(location: impl Into<String>, upstream: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            upstream: upstream.into(),
        }
    }
}

/// Owns the shared reverse proxy configuration file
pub struct ProxySynchronizer {
    config_path: PathBuf,
    reload_command: CommandLine,
    invoker: Arc<dyn Invoker>,
    routes: Mutex<BTreeMap<String, ProxyRoute>>,
}

impl ProxySynchronizer {
    pub fn new(
        config_path: PathBuf,
        reload_command: CommandLine,
        invoker: Arc<dyn Invoker>,
    ) -> Self {
        Self {
            config_path,
            reload_command,
            invoker,
            routes: Mutex::new(BTreeMap::new()),
        }
    }

    /// Reload command for an nginx running in a docker container
    pub fn docker_reload_command(docker_bin: &str, proxy_container: &str) -> CommandLine {
        CommandLine::new(docker_bin)
            .arg("exec")
            .arg(proxy_container)
            .args(["nginx", "-s", "reload"])
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Load the routes of an existing configuration file, or write the empty
    /// skeleton if there is none yet
    pub async fn ensure_initialized(&self) -> Result<()> {
        let mut routes = self.routes.lock().await;

        let exists = tokio::fs::try_exists(&self.config_path)
            .await
            .with_context(|| format!("Failed to check {}", self.config_path.display()))?;
        if !exists {
            self.write_config(&routes).await?;
            info!(
                "Created reverse proxy configuration at {}",
                self.config_path.display()
            );
            return Ok(());
        }

        let contents = tokio::fs::read_to_string(&self.config_path)
            .await
            .with_context(|| format!("Failed to read {}", self.config_path.display()))?;
        for route in templates::parse_proxy_routes(&contents) {
            routes.entry(route.location.clone()).or_insert(route);
        }
        info!(
            "Loaded {} routes from {}",
            routes.len(),
            self.config_path.display()
        );

        Ok(())
    }

    /// Make a route reachable, replacing any route at the same location
    ///
    /// If the configuration cannot be written or the proxy refuses to reload,
    /// the previous route table is restored before the error is returned.
    pub async fn publish(&self, route: ProxyRoute) -> Result<()> {
        let mut routes = self.routes.lock().await;

        info!("Publishing {} -> {}", route.location, route.upstream);
        let location = route.location.clone();
        let previous = routes.insert(location.clone(), route);

        let result = match self.write_config(&routes).await {
            Ok(()) => self.reload().await,
            Err(e) => Err(e),
        };
        if result.is_err() {
            match previous {
                Some(previous) => routes.insert(location.clone(), previous),
                None => routes.remove(&location),
            };
            if let Err(e) = self.write_config(&routes).await {
                warn!("Could not restore reverse proxy configuration: {:#}", e);
            }
            warn!("Withdrew route {} after failed publish", location);
        }

        result
    }

    /// Remove the route at `location`. Returns false if it was not published.
    pub async fn unpublish(&self, location: &str) -> Result<bool> {
        let mut routes = self.routes.lock().await;

        if routes.remove(location).is_none() {
            return Ok(false);
        }

        info!("Unpublishing {}", location);
        self.write_config(&routes).await?;
        self.reload().await?;
        Ok(true)
    }

    /// Currently published routes, ordered by location
    pub async fn routes(&self) -> Vec<ProxyRoute> {
        self.routes.lock().await.values().cloned().collect()
    }

    async fn write_config(&self, routes: &BTreeMap<String, ProxyRoute>) -> Result<()> {
        let contents = templates::proxy_config(routes.values());

        let parent = self
            .config_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;

        // Write next to the target and rename so readers never see a partial file
        let tmp_path = self.config_path.with_extension("conf.tmp");
        tokio::fs::write(&tmp_path, contents)
            .await
            .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
        tokio::fs::rename(&tmp_path, &self.config_path)
            .await
            .with_context(|| format!("Failed to replace {}", self.config_path.display()))?;

        debug!(
            "Wrote reverse proxy configuration with {} routes",
            routes.len()
        );
        Ok(())
    }

    async fn reload(&self) -> Result<()> {
        let working_dir = self
            .config_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        self.invoker
            .run(&self.reload_command, working_dir)
            .await
            .context("Failed to reload reverse proxy")?;

        debug!("Reloaded reverse proxy");
        Ok(())
    }
}
