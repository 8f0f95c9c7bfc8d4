//! Deployment pipeline orchestrator
//!
//! Each deployment runs as its own tokio task through a fixed sequence of
//! stages: clone, detect, patch manifest, install, build, configure,
//! containerize, publish. The first failing stage aborts the pipeline and
//! the record ends up `Failed`; nothing is cleaned up, unless the record was
//! deleted while the container was being started.

use anyhow::{Context, Result};
use chrono::Utc;
use launchpad_common::{DeploymentPatch, DeploymentRecord, DeploymentStatus, Error};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::invoker::{CommandLine, Invoker};
use crate::proxy::{ProxyRoute, ProxySynchronizer};
use crate::registry::Registry;
use crate::templates;

/// Files whose presence marks a server-rendered application
const SSR_INDICATORS: [&str; 4] = [
    "next.config.js",
    "next.config.mjs",
    "next.config.ts",
    "server.js",
];

/// Hex characters of the identifier used in container names
const CONTAINER_ID_LEN: usize = 12;

/// Attempts at finding a free target path before giving up
const MAX_PATH_ATTEMPTS: usize = 64;

/// Starts deployments and tears them down
pub struct Orchestrator {
    config: Arc<Config>,
    registry: Arc<Registry>,
    invoker: Arc<dyn Invoker>,
    proxy: Arc<ProxySynchronizer>,
}

impl Orchestrator {
    pub fn new(
        config: Arc<Config>,
        registry: Arc<Registry>,
        invoker: Arc<dyn Invoker>,
        proxy: Arc<ProxySynchronizer>,
    ) -> Self {
        Self {
            config,
            registry,
            invoker,
            proxy,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn proxy(&self) -> &Arc<ProxySynchronizer> {
        &self.proxy
    }

    /// Create a pending record and run its pipeline in the background
    ///
    /// Returns as soon as the record is stored. Pipeline failures only ever
    /// show up in the record's status and log.
    pub async fn start_deployment(
        &self,
        source_ref: &str,
        app_name: &str,
    ) -> launchpad_common::Result<DeploymentRecord> {
        let (record, _handle) = self.spawn_deployment(source_ref, app_name).await?;
        Ok(record)
    }

    /// Like [`Orchestrator::start_deployment`], also returning a handle that
    /// completes once the record has reached a terminal status
    pub async fn spawn_deployment(
        &self,
        source_ref: &str,
        app_name: &str,
    ) -> launchpad_common::Result<(DeploymentRecord, JoinHandle<()>)> {
        let record = self.create_record(source_ref, app_name).await?;
        info!(
            "Starting deployment {} of {} from {}",
            record.id, record.app_name, record.source_ref
        );

        let pipeline = Pipeline::new(self, &record);
        let registry = self.registry.clone();
        let id = record.id.clone();

        let handle = tokio::spawn(async move {
            // Run the stages in their own task so a panic is caught here too
            let outcome = tokio::spawn(async move { pipeline.run().await }).await;

            let failure = match outcome {
                Ok(Ok(())) => {
                    info!("Deployment {} completed", id);
                    return;
                }
                Ok(Err(e)) => format!("{:#}", e),
                Err(join_error) => format!("pipeline task aborted: {}", join_error),
            };

            error!("Deployment {} failed: {}", id, failure);
            if let Err(e) = registry
                .transition(
                    &id,
                    DeploymentStatus::Failed,
                    format!("Deployment failed: {}", failure),
                )
                .await
            {
                warn!("Could not record failure of deployment {}: {}", id, e);
            }
        });

        Ok((record, handle))
    }

    /// Stop and remove a deployment's container and route, then drop the record
    ///
    /// Container and proxy cleanup is best-effort and never blocks removal.
    pub async fn remove_deployment(&self, id: &str) -> Option<DeploymentRecord> {
        let record = self.registry.get(id).await?;

        release_resources(
            &self.config,
            self.invoker.as_ref(),
            &self.proxy,
            &record.container_name,
            &record.url_path(),
        )
        .await;

        self.registry.delete(id).await
    }

    async fn create_record(
        &self,
        source_ref: &str,
        app_name: &str,
    ) -> launchpad_common::Result<DeploymentRecord> {
        let slug = slugify(app_name);
        if slug.is_empty() {
            return Err(Error::Validation(
                "Application name must contain at least one letter or digit".to_string(),
            ));
        }

        let id = Uuid::new_v4();
        let container_name = container_name(&id);
        let mut millis = Utc::now().timestamp_millis();

        for _ in 0..MAX_PATH_ATTEMPTS {
            let target_path = format!("{}_{}", slug, millis);
            let record = DeploymentRecord::new(
                id.to_string(),
                app_name.to_string(),
                source_ref.to_string(),
                target_path.clone(),
                container_name.clone(),
                self.config.public_url(&target_path),
            );

            match self.registry.create(record).await {
                Ok(record) => return Ok(record),
                Err(Error::Conflict(reason)) => {
                    debug!("Retrying target path allocation: {}", reason);
                    millis += 1;
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::Conflict(format!(
            "no free target path for application {}",
            app_name
        )))
    }
}

/// Stop and remove a container and withdraw its route, logging failures
async fn release_resources(
    config: &Config,
    invoker: &dyn Invoker,
    proxy: &ProxySynchronizer,
    container_name: &str,
    url_path: &str,
) {
    for action in ["stop", "rm"] {
        let command = CommandLine::new(&config.docker_bin)
            .arg(action)
            .arg(container_name);
        if let Err(e) = invoker.run(&command, &config.deployments_dir).await {
            warn!("Error releasing container {}: {}", container_name, e);
        }
    }

    if let Err(e) = proxy.unpublish(url_path).await {
        warn!("Error removing route {}: {:#}", url_path, e);
    }
}

/// Lowercase an application name into a path- and container-safe segment
pub fn slugify(app_name: &str) -> String {
    let mut slug = String::with_capacity(app_name.len());
    for c in app_name.trim().chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_alphanumeric() || c == '_' {
            slug.push(c);
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_matches('-').to_string()
}

/// Image and container name derived from a deployment identifier
pub fn container_name(id: &Uuid) -> String {
    let simple = id.simple().to_string();
    format!("app-{}", &simple[..CONTAINER_ID_LEN])
}

/// Whether the tree at `dir` looks like a server-rendered application
pub async fn detect_ssr(dir: &Path) -> bool {
    for indicator in SSR_INDICATORS {
        if tokio::fs::try_exists(dir.join(indicator))
            .await
            .unwrap_or(false)
        {
            return true;
        }
    }
    false
}

/// Point `package.json`'s `homepage` at `url_path`, keeping every other field
///
/// Returns false if there is no manifest.
pub async fn patch_package_json(dir: &Path, url_path: &str) -> Result<bool> {
    let path = dir.join("package.json");
    if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
        return Ok(false);
    }

    let raw = tokio::fs::read_to_string(&path)
        .await
        .context("Failed to read package.json")?;
    let mut manifest: serde_json::Value =
        serde_json::from_str(&raw).context("Failed to parse package.json")?;

    let fields = manifest
        .as_object_mut()
        .context("package.json is not a JSON object")?;
    fields.insert(
        "homepage".to_string(),
        serde_json::Value::String(url_path.to_string()),
    );

    let mut patched =
        serde_json::to_string_pretty(&manifest).context("Failed to serialize package.json")?;
    patched.push('\n');
    tokio::fs::write(&path, patched)
        .await
        .context("Failed to write package.json")?;

    Ok(true)
}

fn is_record_gone(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|cause| matches!(cause.downcast_ref::<Error>(), Some(Error::NotFound(_))))
}

/// One deployment's run through the stages
struct Pipeline {
    config: Arc<Config>,
    registry: Arc<Registry>,
    invoker: Arc<dyn Invoker>,
    proxy: Arc<ProxySynchronizer>,
    id: String,
    source_ref: String,
    target_path: String,
    url_path: String,
    container_name: String,
    target_dir: PathBuf,
}

impl Pipeline {
    fn new(orchestrator: &Orchestrator, record: &DeploymentRecord) -> Self {
        Self {
            config: orchestrator.config.clone(),
            registry: orchestrator.registry.clone(),
            invoker: orchestrator.invoker.clone(),
            proxy: orchestrator.proxy.clone(),
            id: record.id.clone(),
            source_ref: record.source_ref.clone(),
            target_path: record.target_path.clone(),
            url_path: record.url_path(),
            container_name: record.container_name.clone(),
            target_dir: orchestrator.config.deployments_dir.join(&record.target_path),
        }
    }

    async fn run(&self) -> Result<()> {
        self.clone_source().await?;
        let is_ssr = self.detect_runtime().await?;
        self.patch_manifest().await?;
        self.install_dependencies().await?;
        self.build_application().await?;
        self.configure(is_ssr).await?;

        let result = match self.containerize(is_ssr).await {
            Ok(()) => self.publish(is_ssr).await,
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            if is_record_gone(e) {
                // Removed mid-run; the container may have started after the delete
                warn!(
                    "Deployment {} was removed while deploying, releasing {}",
                    self.id, self.container_name
                );
                release_resources(
                    &self.config,
                    self.invoker.as_ref(),
                    &self.proxy,
                    &self.container_name,
                    &self.url_path,
                )
                .await;
            }
        }
        result
    }

    async fn clone_source(&self) -> Result<()> {
        self.transition(
            DeploymentStatus::Cloning,
            format!("Cloning repository: {}", self.source_ref),
        )
        .await?;

        self.guard("Error cloning repository", self.fetch()).await?;

        self.transition(DeploymentStatus::Building, "Repository cloned successfully")
            .await
    }

    async fn fetch(&self) -> Result<()> {
        if tokio::fs::try_exists(&self.target_dir).await? {
            anyhow::bail!(
                "target directory already exists: {}",
                self.target_dir.display()
            );
        }

        tokio::fs::create_dir_all(&self.config.deployments_dir)
            .await
            .context("Failed to create deployments directory")?;

        // Relative destination: git runs inside the deployments directory
        let command = CommandLine::new(&self.config.git_bin)
            .args(["clone", "--"])
            .arg(&self.source_ref)
            .arg(&self.target_path);
        self.invoker
            .run(&command, &self.config.deployments_dir)
            .await?;

        Ok(())
    }

    async fn detect_runtime(&self) -> Result<bool> {
        let is_ssr = detect_ssr(&self.target_dir).await;

        self.registry
            .update(&self.id, DeploymentPatch::default().with_is_ssr(is_ssr))
            .await?;
        self.log(if is_ssr {
            "Detected server-rendered application"
        } else {
            "Detected static application"
        })
        .await?;

        Ok(is_ssr)
    }

    async fn patch_manifest(&self) -> Result<()> {
        let patched = self
            .guard(
                "Error updating package.json",
                patch_package_json(&self.target_dir, &self.url_path),
            )
            .await?;

        if patched {
            self.log(format!("Set package.json homepage to {}", self.url_path))
                .await
        } else {
            self.log("No package.json found, skipping homepage update")
                .await
        }
    }

    async fn install_dependencies(&self) -> Result<()> {
        self.log("Installing dependencies...").await?;

        let command = CommandLine::new(&self.config.package_manager).arg("install");
        self.guard(
            "Error installing dependencies",
            self.exec(&command, &self.target_dir),
        )
        .await?;

        self.log("Dependencies installed successfully").await
    }

    async fn build_application(&self) -> Result<()> {
        self.log("Building application...").await?;

        let command = CommandLine::new(&self.config.package_manager).args(["run", "build"]);
        self.guard(
            "Error building application",
            self.exec(&command, &self.target_dir),
        )
        .await?;

        self.log("Application built successfully").await
    }

    async fn configure(&self, is_ssr: bool) -> Result<()> {
        self.transition(DeploymentStatus::Configuring, "Configuring deployment...")
            .await?;

        self.guard(
            "Error configuring deployment",
            self.write_configuration(is_ssr),
        )
        .await
    }

    async fn write_configuration(&self, is_ssr: bool) -> Result<()> {
        let dockerfile =
            templates::dockerfile(is_ssr, &self.url_path, &self.config.static_output_dir);
        tokio::fs::write(self.target_dir.join("Dockerfile"), dockerfile)
            .await
            .context("Failed to write Dockerfile")?;
        self.log(format!(
            "Generated Dockerfile for {} application",
            if is_ssr { "SSR" } else { "static" }
        ))
        .await?;

        if !is_ssr {
            tokio::fs::write(
                self.target_dir.join("nginx.conf"),
                templates::static_site_config(),
            )
            .await
            .context("Failed to write nginx.conf")?;
            self.log("Generated Nginx configuration").await?;
        }

        Ok(())
    }

    async fn containerize(&self, is_ssr: bool) -> Result<()> {
        self.transition(DeploymentStatus::Deploying, "Building Docker container...")
            .await?;

        let build = CommandLine::new(&self.config.docker_bin)
            .args(["build", "-t"])
            .arg(&self.container_name)
            .arg(".");
        self.guard("Error with Docker", self.exec(&build, &self.target_dir))
            .await?;
        self.log("Docker image built successfully").await?;

        // Only the container port is given, docker picks a free host port
        let run = CommandLine::new(&self.config.docker_bin)
            .args(["run", "-d", "--name"])
            .arg(&self.container_name)
            .arg("--network")
            .arg(&self.config.docker_network)
            .arg("-p")
            .arg(templates::service_port(is_ssr).to_string())
            .arg(&self.container_name);
        self.guard("Error with Docker", self.exec(&run, &self.target_dir))
            .await?;
        self.log("Docker container started successfully").await
    }

    async fn publish(&self, is_ssr: bool) -> Result<()> {
        self.log("Updating reverse proxy configuration...").await?;

        let route = ProxyRoute::new(
            self.url_path.clone(),
            format!(
                "http://{}:{}/",
                self.container_name,
                templates::service_port(is_ssr)
            ),
        );
        self.guard(
            "Error updating reverse proxy configuration",
            self.proxy.publish(route),
        )
        .await?;
        self.log("Updated reverse proxy configuration").await?;

        self.transition(
            DeploymentStatus::Deployed,
            "Deployment completed successfully",
        )
        .await
    }

    async fn exec(&self, command: &CommandLine, working_dir: &Path) -> Result<()> {
        let output = self.invoker.run(command, working_dir).await?;
        debug!(
            "Deployment {}: `{}` finished ({} bytes of output)",
            self.id,
            command,
            output.stdout.len() + output.stderr.len()
        );
        Ok(())
    }

    /// Await a stage action; on failure, log `failure: cause` and return the
    /// error with `failure` as context
    async fn guard<T, F>(&self, failure: &str, action: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match action.await {
            Ok(value) => Ok(value),
            Err(e) => {
                if let Err(log_err) = self
                    .registry
                    .append_log(&self.id, format!("{}: {:#}", failure, e))
                    .await
                {
                    warn!(
                        "Could not log failure for deployment {}: {}",
                        self.id, log_err
                    );
                }
                Err(e.context(failure.to_string()))
            }
        }
    }

    async fn log(&self, message: impl Into<String>) -> Result<()> {
        self.registry.append_log(&self.id, message).await?;
        Ok(())
    }

    async fn transition(
        &self,
        status: DeploymentStatus,
        message: impl Into<String>,
    ) -> Result<()> {
        self.registry.transition(&self.id, status, message).await?;
        Ok(())
    }
}
