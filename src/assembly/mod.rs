//! Startup assembly of optional backing services.
//!
//! Two declarative lists drive startup, both resolved exactly once before the
//! listener binds:
//!
//! 1. An ordered set of configuration loaders. The secret-store loader, when
//!    enabled, runs first and its bundle takes precedence over file/env
//!    values. Logger and auth-token loaders always run; database and cache
//!    loaders run only when their flag is set.
//! 2. A registry of module strategies. Each strategy carries an explicit name
//!    tag, an activation predicate over the resolved settings, and a
//!    constructor. The registry filters by predicate and maps the survivors
//!    through their constructors in registration order.
//!
//! Adding a new optional service means registering one strategy; no flag
//! checks leak anywhere else in the startup path. A strategy that is enabled
//! but not fully configured fails startup rather than activating partially.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};

use crate::{
    config::Settings,
    services::{CacheHandle, DatabaseHandle, SecretStoreError, VaultClient},
};

#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("module `{module}` is enabled but `{key}` is not configured")]
    MissingConfiguration {
        module: &'static str,
        key: &'static str,
    },
    #[error("module `{module}` failed to activate: {message}")]
    Activation {
        module: &'static str,
        message: String,
    },
    #[error(transparent)]
    SecretStore(#[from] SecretStoreError),
}

impl AssemblyError {
    fn activation(module: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Activation {
            module,
            message: err.to_string(),
        }
    }
}

/// Handle produced by an activated module strategy.
pub enum ServiceHandle {
    /// The logging module owns no connection; the subscriber is already
    /// installed by the time assembly runs.
    Logging,
    Database(DatabaseHandle),
    Cache(CacheHandle),
}

/// One optional service: an explicit name tag, an activation predicate that
/// is a pure function of the resolved settings, and a constructor.
#[async_trait]
pub trait ModuleStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn should_load(&self, settings: &Settings) -> bool;
    async fn create(&self, settings: &Settings) -> Result<ServiceHandle, AssemblyError>;
}

struct LoggingModule;

#[async_trait]
impl ModuleStrategy for LoggingModule {
    fn name(&self) -> &'static str {
        "logging"
    }

    fn should_load(&self, _settings: &Settings) -> bool {
        true
    }

    async fn create(&self, _settings: &Settings) -> Result<ServiceHandle, AssemblyError> {
        Ok(ServiceHandle::Logging)
    }
}

struct DatabaseModule;

#[async_trait]
impl ModuleStrategy for DatabaseModule {
    fn name(&self) -> &'static str {
        "database"
    }

    fn should_load(&self, settings: &Settings) -> bool {
        settings.database.enabled
    }

    async fn create(&self, settings: &Settings) -> Result<ServiceHandle, AssemblyError> {
        let url = settings
            .database
            .url
            .as_deref()
            .ok_or(AssemblyError::MissingConfiguration {
                module: "database",
                key: "database.url",
            })?;
        let handle = DatabaseHandle::connect(url, settings.database.max_connections.get())
            .await
            .map_err(|err| AssemblyError::activation("database", err))?;
        Ok(ServiceHandle::Database(handle))
    }
}

struct CacheModule;

#[async_trait]
impl ModuleStrategy for CacheModule {
    fn name(&self) -> &'static str {
        "cache"
    }

    fn should_load(&self, settings: &Settings) -> bool {
        settings.cache.enabled
    }

    async fn create(&self, settings: &Settings) -> Result<ServiceHandle, AssemblyError> {
        let url = settings
            .cache
            .url
            .as_deref()
            .ok_or(AssemblyError::MissingConfiguration {
                module: "cache",
                key: "cache.url",
            })?;
        let handle = CacheHandle::connect(url)
            .await
            .map_err(|err| AssemblyError::activation("cache", err))?;
        Ok(ServiceHandle::Cache(handle))
    }
}

/// Process-wide, read-only result of assembly.
pub struct AssembledServices {
    pub active_modules: Vec<&'static str>,
    pub database: Option<DatabaseHandle>,
    pub cache: Option<CacheHandle>,
}

/// Ordered strategy registry.
pub struct ModuleRegistry {
    strategies: Vec<Box<dyn ModuleStrategy>>,
}

impl ModuleRegistry {
    /// The built-in registration order: logging unconditionally, then
    /// database and cache behind their flags.
    pub fn builtin() -> Self {
        Self {
            strategies: vec![
                Box::new(LoggingModule),
                Box::new(DatabaseModule),
                Box::new(CacheModule),
            ],
        }
    }

    pub fn register(&mut self, strategy: Box<dyn ModuleStrategy>) {
        self.strategies.push(strategy);
    }

    /// Names of the strategies that would activate, in registration order.
    /// Pure over the settings; used by startup logging and tests.
    pub fn plan(&self, settings: &Settings) -> Vec<&'static str> {
        self.strategies
            .iter()
            .filter(|strategy| strategy.should_load(settings))
            .map(|strategy| strategy.name())
            .collect()
    }

    /// Activate every strategy whose predicate holds, in registration order.
    /// Any failure aborts startup; no partially configured module survives.
    pub async fn assemble(&self, settings: &Settings) -> Result<AssembledServices, AssemblyError> {
        let mut active_modules = Vec::new();
        let mut database = None;
        let mut cache = None;

        for strategy in &self.strategies {
            if !strategy.should_load(settings) {
                continue;
            }
            match strategy.create(settings).await? {
                ServiceHandle::Logging => {}
                ServiceHandle::Database(handle) => database = Some(handle),
                ServiceHandle::Cache(handle) => cache = Some(handle),
            }
            info!(
                target: "keel::assembly",
                module = strategy.name(),
                "module activated",
            );
            active_modules.push(strategy.name());
        }

        Ok(AssembledServices {
            active_modules,
            database,
            cache,
        })
    }
}

/// One configuration slice: a name tag, a predicate over the settings, and
/// the resolution step itself. Mirrors [`ModuleStrategy`] so adding a slice
/// means adding one entry to [`builtin_loaders`].
#[async_trait]
trait ConfigLoader: Send + Sync {
    fn name(&self) -> &'static str;
    fn should_run(&self, settings: &Settings) -> bool;
    async fn run(&self, settings: &mut Settings) -> Result<(), AssemblyError>;
}

struct VaultLoader;

#[async_trait]
impl ConfigLoader for VaultLoader {
    fn name(&self) -> &'static str {
        "vault"
    }

    fn should_run(&self, settings: &Settings) -> bool {
        settings.vault.enabled
    }

    async fn run(&self, settings: &mut Settings) -> Result<(), AssemblyError> {
        let addr = settings
            .vault
            .addr
            .as_deref()
            .ok_or(AssemblyError::MissingConfiguration {
                module: "vault",
                key: "vault.addr",
            })?;
        let token = settings
            .vault
            .token
            .as_deref()
            .ok_or(AssemblyError::MissingConfiguration {
                module: "vault",
                key: "vault.token",
            })?;
        let client = VaultClient::new(addr, token, &settings.vault.mount, &settings.vault.path);
        let bundle = client.fetch().await?;
        apply_secret_bundle(settings, &bundle);
        Ok(())
    }
}

/// The logger slice is already resolved in the settings; the loader only
/// marks the slice as considered in plan order.
struct LoggerLoader;

#[async_trait]
impl ConfigLoader for LoggerLoader {
    fn name(&self) -> &'static str {
        "logger"
    }

    fn should_run(&self, _settings: &Settings) -> bool {
        true
    }

    async fn run(&self, _settings: &mut Settings) -> Result<(), AssemblyError> {
        Ok(())
    }
}

struct JwtLoader;

#[async_trait]
impl ConfigLoader for JwtLoader {
    fn name(&self) -> &'static str {
        "jwt"
    }

    fn should_run(&self, _settings: &Settings) -> bool {
        true
    }

    async fn run(&self, _settings: &mut Settings) -> Result<(), AssemblyError> {
        Ok(())
    }
}

struct DatabaseLoader;

#[async_trait]
impl ConfigLoader for DatabaseLoader {
    fn name(&self) -> &'static str {
        "database"
    }

    fn should_run(&self, settings: &Settings) -> bool {
        settings.database.enabled
    }

    // Fail fast before any connection attempt.
    async fn run(&self, settings: &mut Settings) -> Result<(), AssemblyError> {
        if settings.database.url.is_none() {
            return Err(AssemblyError::MissingConfiguration {
                module: "database",
                key: "database.url",
            });
        }
        Ok(())
    }
}

struct CacheLoader;

#[async_trait]
impl ConfigLoader for CacheLoader {
    fn name(&self) -> &'static str {
        "cache"
    }

    fn should_run(&self, settings: &Settings) -> bool {
        settings.cache.enabled
    }

    async fn run(&self, settings: &mut Settings) -> Result<(), AssemblyError> {
        if settings.cache.url.is_none() {
            return Err(AssemblyError::MissingConfiguration {
                module: "cache",
                key: "cache.url",
            });
        }
        Ok(())
    }
}

/// Registration order of the configuration loaders. The secret-store loader
/// is first so its bundle is in place before any slice that reads it.
fn builtin_loaders() -> Vec<Box<dyn ConfigLoader>> {
    vec![
        Box::new(VaultLoader),
        Box::new(LoggerLoader),
        Box::new(JwtLoader),
        Box::new(DatabaseLoader),
        Box::new(CacheLoader),
    ]
}

/// Ordered names of the configuration loaders that will run for these
/// settings. Pure over the settings; used by startup logging and tests.
pub fn loader_plan(settings: &Settings) -> Vec<&'static str> {
    builtin_loaders()
        .iter()
        .filter(|loader| loader.should_run(settings))
        .map(|loader| loader.name())
        .collect()
}

/// Run the configuration loaders sequentially in registration order,
/// returning the finalized settings. After this point the settings are
/// immutable.
pub async fn run_loaders(mut settings: Settings) -> Result<Settings, AssemblyError> {
    for loader in builtin_loaders() {
        if !loader.should_run(&settings) {
            continue;
        }
        loader.run(&mut settings).await?;
        debug!(
            target: "keel::assembly",
            loader = loader.name(),
            "configuration slice loaded",
        );
    }
    Ok(settings)
}

/// Secret-store values take precedence over file/env configuration for the
/// keys they supply.
fn apply_secret_bundle(settings: &mut Settings, bundle: &HashMap<String, String>) {
    if let Some(url) = bundle.get("database_url") {
        settings.database.url = Some(url.clone());
    }
    if let Some(url) = bundle.get("redis_url") {
        settings.cache.url = Some(url.clone());
    }
    if let Some(secret) = bundle.get("auth_token_secret") {
        settings.auth.token_secret = Some(secret.clone());
    }
}
