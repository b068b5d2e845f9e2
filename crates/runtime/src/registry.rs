use std::{collections::HashMap, sync::Arc};

use {
    thiserror::Error,
    tokio::sync::RwLock,
    tracing::{debug, info, warn},
};

use crate::service::Service;

// ── Types ────────────────────────────────────────────────────────────────────

/// Per-service registration config.
#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    /// Names of services that must initialize/start before this one.
    pub dependencies: Vec<String>,
}

impl ServiceConfig {
    pub fn depends_on<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            dependencies: names.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("service not registered: {0}")]
    NotFound(String),

    #[error("service `{service}` declares unknown dependency `{dependency}`")]
    UnknownDependency { service: String, dependency: String },

    #[error("dependency cycle: {0}")]
    DependencyCycle(String),

    #[error("service `{service}` failed during {phase}: {source}")]
    Hook {
        service: String,
        phase: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

struct Entry {
    service: Arc<dyn Service>,
    dependencies: Vec<String>,
    initialized: bool,
    started: bool,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    /// Registration order, used by `stop_all` to unwind in reverse.
    order: Vec<String>,
}

/// Tracks named services and drives their lifecycle in dependency order.
#[derive(Default)]
pub struct ServiceRegistry {
    inner: RwLock<Inner>,
}

/// Lifecycle phase being planned or executed.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Phase {
    Initialize,
    Start,
}

impl Phase {
    fn label(self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::Start => "start",
        }
    }

    fn is_done(self, entry: &Entry) -> bool {
        match self {
            Self::Initialize => entry.initialized,
            Self::Start => entry.started,
        }
    }
}

// ── Registry ─────────────────────────────────────────────────────────────────

impl ServiceRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a service under `name`. Re-registration overwrites the
    /// previous entry (with a warning) and resets its lifecycle flags.
    pub async fn register(&self, name: &str, service: Arc<dyn Service>, config: ServiceConfig) {
        let mut inner = self.inner.write().await;
        if inner.entries.contains_key(name) {
            warn!(service = name, "re-registering service, overwriting previous entry");
        } else {
            inner.order.push(name.to_string());
        }
        inner.entries.insert(name.to_string(), Entry {
            service,
            dependencies: config.dependencies,
            initialized: false,
            started: false,
        });
        debug!(service = name, "service registered");
    }

    /// Look up a registered service handle.
    pub async fn get_service(&self, name: &str) -> Result<Arc<dyn Service>, RegistryError> {
        let inner = self.inner.read().await;
        inner
            .entries
            .get(name)
            .map(|e| Arc::clone(&e.service))
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    pub async fn is_initialized(&self, name: &str) -> bool {
        self.inner
            .read()
            .await
            .entries
            .get(name)
            .is_some_and(|e| e.initialized)
    }

    pub async fn is_started(&self, name: &str) -> bool {
        self.inner
            .read()
            .await
            .entries
            .get(name)
            .is_some_and(|e| e.started)
    }

    /// Initialize `name` and (recursively) its dependencies, depth-first.
    /// A repeat call is a no-op for anything already initialized.
    pub async fn initialize_service(&self, name: &str) -> Result<(), RegistryError> {
        let plan = self.plan(name, Phase::Initialize).await?;
        self.run_plan(&plan, Phase::Initialize).await
    }

    /// Start `name`, initializing it first if needed. Dependencies start
    /// before the target, in the same depth-first order.
    pub async fn start_service(&self, name: &str) -> Result<(), RegistryError> {
        self.initialize_service(name).await?;
        let plan = self.plan(name, Phase::Start).await?;
        self.run_plan(&plan, Phase::Start).await
    }

    /// Stop `name`, stopping every started dependent (direct or transitive)
    /// first — the reverse direction from `start_service`.
    pub async fn stop_service(&self, name: &str) -> Result<(), RegistryError> {
        let plan = {
            let inner = self.inner.read().await;
            if !inner.entries.contains_key(name) {
                return Err(RegistryError::NotFound(name.to_string()));
            }
            let mut plan = Vec::new();
            collect_dependents(&inner, name, &mut plan);
            plan.push(name.to_string());
            plan
        };

        for svc in &plan {
            let handle = {
                let mut inner = self.inner.write().await;
                let Some(entry) = inner.entries.get_mut(svc) else {
                    continue;
                };
                if !entry.started {
                    continue;
                }
                entry.started = false;
                Arc::clone(&entry.service)
            };
            info!(service = %svc, "stopping service");
            handle.stop().await.map_err(|source| RegistryError::Hook {
                service: svc.clone(),
                phase: "stop",
                source,
            })?;
        }
        Ok(())
    }

    /// Initialize every registered service.
    pub async fn initialize_all(&self) -> Result<(), RegistryError> {
        for name in self.registration_order().await {
            self.initialize_service(&name).await?;
        }
        Ok(())
    }

    /// Start every registered service.
    pub async fn start_all(&self) -> Result<(), RegistryError> {
        for name in self.registration_order().await {
            self.start_service(&name).await?;
        }
        Ok(())
    }

    /// Stop every started service, unwinding in reverse registration order.
    /// Dependent ordering still holds: each stop pulls dependents down first.
    pub async fn stop_all(&self) -> Result<(), RegistryError> {
        let mut order = self.registration_order().await;
        order.reverse();
        for name in order {
            self.stop_service(&name).await?;
        }
        Ok(())
    }

    async fn registration_order(&self) -> Vec<String> {
        self.inner.read().await.order.clone()
    }

    /// Compute the dependency-first execution order for `name`, skipping
    /// services already past the phase. Fails fast on unknown dependencies
    /// and on cycles (depth-first walk with a "currently visiting" marker).
    async fn plan(&self, name: &str, phase: Phase) -> Result<Vec<String>, RegistryError> {
        let inner = self.inner.read().await;
        if !inner.entries.contains_key(name) {
            return Err(RegistryError::NotFound(name.to_string()));
        }

        let mut plan = Vec::new();
        let mut visiting = Vec::new();
        let mut done = Vec::new();
        visit(&inner, name, phase, &mut visiting, &mut done, &mut plan)?;
        Ok(plan)
    }

    async fn run_plan(&self, plan: &[String], phase: Phase) -> Result<(), RegistryError> {
        for name in plan {
            let handle = {
                let inner = self.inner.read().await;
                let Some(entry) = inner.entries.get(name) else {
                    continue;
                };
                if phase.is_done(entry) {
                    continue;
                }
                Arc::clone(&entry.service)
            };

            info!(service = %name, phase = phase.label(), "running lifecycle hook");
            let result = match phase {
                Phase::Initialize => handle.initialize().await,
                Phase::Start => handle.start().await,
            };
            // A hook failure aborts the whole chain; services that already
            // completed the phase stay as they are.
            result.map_err(|source| RegistryError::Hook {
                service: name.clone(),
                phase: phase.label(),
                source,
            })?;

            let mut inner = self.inner.write().await;
            if let Some(entry) = inner.entries.get_mut(name) {
                match phase {
                    Phase::Initialize => entry.initialized = true,
                    Phase::Start => entry.started = true,
                }
            }
        }
        Ok(())
    }
}

/// Depth-first dependency walk. `visiting` doubles as the path for cycle
/// reporting.
fn visit(
    inner: &Inner,
    name: &str,
    phase: Phase,
    visiting: &mut Vec<String>,
    done: &mut Vec<String>,
    plan: &mut Vec<String>,
) -> Result<(), RegistryError> {
    if done.iter().any(|d| d == name) {
        return Ok(());
    }
    if let Some(pos) = visiting.iter().position(|v| v == name) {
        let mut path: Vec<&str> = visiting[pos..].iter().map(String::as_str).collect();
        path.push(name);
        return Err(RegistryError::DependencyCycle(path.join(" -> ")));
    }

    let entry = inner
        .entries
        .get(name)
        .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;

    visiting.push(name.to_string());
    for dep in &entry.dependencies {
        if !inner.entries.contains_key(dep) {
            return Err(RegistryError::UnknownDependency {
                service: name.to_string(),
                dependency: dep.clone(),
            });
        }
        visit(inner, dep, phase, visiting, done, plan)?;
    }
    visiting.pop();
    done.push(name.to_string());

    if !phase.is_done(entry) {
        plan.push(name.to_string());
    }
    Ok(())
}

/// Collect every started dependent of `name`, deepest first, so stop order
/// unwinds the dependency tree from the leaves.
fn collect_dependents(inner: &Inner, name: &str, out: &mut Vec<String>) {
    for (candidate, entry) in &inner.entries {
        if entry.dependencies.iter().any(|d| d == name) && !out.contains(candidate) {
            collect_dependents(inner, candidate, out);
            out.push(candidate.clone());
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
