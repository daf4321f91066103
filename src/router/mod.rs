//! Tool Router: a static table from tool name to the backend that owns it.
//!
//! The router never interprets tool semantics; it forwards the call and hands
//! back whatever payload the backend produced.

use crate::backend::{Backend, BackendError, BackendSession};
use crate::config::AppConfig;
use crate::tools::{ToolDescriptor, ToolInvoker};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Failure of a routed call.
#[derive(Debug, Error)]
pub enum RouterError {
    /// No route for this name. Names the orchestrator advertised always have
    /// one, so this is a deployment bug.
    #[error("no backend serves tool `{0}`")]
    UnknownTool(String),

    #[error("backend `{backend}` unavailable: {source}")]
    Backend {
        backend: String,
        #[source]
        source: BackendError,
    },
}

/// A route table that cannot serve the advertised tool set.
#[derive(Debug, Error)]
pub enum RouteConfigError {
    #[error("advertised tool `{tool}` has no route")]
    Unrouted { tool: String },

    #[error("tool `{tool}` is routed to unknown backend `{backend}`")]
    UnknownBackend { tool: String, backend: String },

    #[error("backend `{backend}` does not host routed tool `{tool}`")]
    NotHosted { tool: String, backend: String },

    #[error("could not probe backend `{backend}`: {source}")]
    Probe {
        backend: String,
        #[source]
        source: BackendError,
    },
}

pub struct ToolRouter {
    routes: HashMap<String, Arc<dyn Backend>>,
}

impl ToolRouter {
    pub fn new(routes: HashMap<String, Arc<dyn Backend>>) -> Self {
        Self { routes }
    }

    /// Build sessions for the configured backends and check that every
    /// advertised tool routes to one of them.
    pub fn from_config(
        config: &AppConfig,
        advertised: &[ToolDescriptor],
        config_path: Option<PathBuf>,
    ) -> Result<Self, RouteConfigError> {
        let backends: BTreeMap<&str, Arc<dyn Backend>> = config
            .backends
            .iter()
            .map(|(name, cfg)| {
                let session: Arc<dyn Backend> =
                    Arc::new(BackendSession::new(name, cfg, config_path.clone()));
                (name.as_str(), session)
            })
            .collect();

        let advertised_names: HashSet<&str> = advertised.iter().map(|d| d.name.as_str()).collect();
        for tool in config.routes.keys() {
            if !advertised_names.contains(tool.as_str()) {
                warn!("Route for unadvertised tool '{}' ignored", tool);
            }
        }

        let mut routes = HashMap::new();
        for d in advertised {
            let backend_name = config
                .routes
                .get(&d.name)
                .ok_or_else(|| RouteConfigError::Unrouted { tool: d.name.clone() })?;
            let backend = backends.get(backend_name.as_str()).ok_or_else(|| {
                RouteConfigError::UnknownBackend {
                    tool: d.name.clone(),
                    backend: backend_name.clone(),
                }
            })?;
            routes.insert(d.name.clone(), Arc::clone(backend));
        }

        debug!("Routed {} tools over {} backends", routes.len(), backends.len());
        Ok(Self::new(routes))
    }

    /// Name of the backend owning `tool`.
    pub fn backend_for(&self, tool: &str) -> Option<&str> {
        self.routes.get(tool).map(|b| b.name())
    }

    /// Each distinct backend once, in name order.
    fn backends(&self) -> Vec<Arc<dyn Backend>> {
        let mut seen = BTreeMap::new();
        for backend in self.routes.values() {
            seen.entry(backend.name().to_string())
                .or_insert_with(|| Arc::clone(backend));
        }
        seen.into_values().collect()
    }

    pub async fn invoke(&self, name: &str, args: &Value) -> Result<Value, RouterError> {
        let Some(backend) = self.routes.get(name) else {
            error!("No route for tool '{}'", name);
            return Err(RouterError::UnknownTool(name.to_string()));
        };

        backend
            .call(name, args)
            .await
            .map_err(|source| RouterError::Backend {
                backend: backend.name().to_string(),
                source,
            })
    }

    /// Start every backend and confirm it hosts the tools routed to it.
    pub async fn verify(&self) -> Result<(), RouteConfigError> {
        for backend in self.backends() {
            let hosted: HashSet<String> = backend
                .list_tools()
                .await
                .map_err(|source| RouteConfigError::Probe {
                    backend: backend.name().to_string(),
                    source,
                })?
                .into_iter()
                .map(|d| d.name)
                .collect();

            for (tool, owner) in &self.routes {
                if owner.name() == backend.name() && !hosted.contains(tool) {
                    return Err(RouteConfigError::NotHosted {
                        tool: tool.clone(),
                        backend: backend.name().to_string(),
                    });
                }
            }
            info!("Backend '{}' hosts {} tools", backend.name(), hosted.len());
        }
        Ok(())
    }

    pub async fn shutdown(&self) {
        for backend in self.backends() {
            backend.shutdown().await;
        }
    }
}

#[async_trait]
impl ToolInvoker for ToolRouter {
    async fn invoke(&self, name: &str, args: &Value) -> Result<Value, RouterError> {
        ToolRouter::invoke(self, name, args).await
    }
}
