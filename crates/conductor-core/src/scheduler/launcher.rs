//! How the scheduler starts a workflow.
//!
//! The scheduler only knows workflow ids. [`WorkflowLauncher`] turns an id
//! into a run; [`WorkflowCatalog`] is the standard implementation over a
//! [`WorkflowEngine`] and a table of loaded definitions.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use dashmap::DashMap;

use conductor_types::workflow::{Workflow, WorkflowDefinition, WorkflowRunSummary};

use crate::workflow::{WorkflowEngine, WorkflowError, validate_definition};

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("unknown workflow: {0}")]
    UnknownWorkflow(String),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),
}

pub trait WorkflowLauncher: Send + Sync {
    fn launch(
        &self,
        workflow_id: &str,
    ) -> impl Future<Output = Result<WorkflowRunSummary, LaunchError>> + Send;
}

/// Object-safe version of [`WorkflowLauncher`] with boxed futures.
pub trait WorkflowLauncherDyn: Send + Sync {
    fn launch_boxed<'a>(
        &'a self,
        workflow_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<WorkflowRunSummary, LaunchError>> + Send + 'a>>;
}

impl<T: WorkflowLauncher> WorkflowLauncherDyn for T {
    fn launch_boxed<'a>(
        &'a self,
        workflow_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<WorkflowRunSummary, LaunchError>> + Send + 'a>> {
        Box::pin(self.launch(workflow_id))
    }
}

pub struct BoxLauncher {
    inner: Box<dyn WorkflowLauncherDyn + Send + Sync>,
}

impl BoxLauncher {
    pub fn new<T: WorkflowLauncher + 'static>(launcher: T) -> Self {
        Self {
            inner: Box::new(launcher),
        }
    }

    pub async fn launch(&self, workflow_id: &str) -> Result<WorkflowRunSummary, LaunchError> {
        self.inner.launch_boxed(workflow_id).await
    }
}

// ---------------------------------------------------------------------------
// WorkflowCatalog
// ---------------------------------------------------------------------------

/// Loaded definitions plus the engine that runs them.
#[derive(Clone)]
pub struct WorkflowCatalog {
    engine: Arc<WorkflowEngine>,
    definitions: Arc<DashMap<String, WorkflowDefinition>>,
}

impl WorkflowCatalog {
    pub fn new(engine: Arc<WorkflowEngine>) -> Self {
        Self {
            engine,
            definitions: Arc::new(DashMap::new()),
        }
    }

    /// Register a definition under its id, replacing any previous one.
    /// Structurally invalid definitions are refused.
    pub fn insert(&self, definition: WorkflowDefinition) -> Result<(), WorkflowError> {
        validate_definition(&definition)?;
        tracing::debug!(workflow_id = %definition.id, name = %definition.name, "workflow registered");
        self.definitions.insert(definition.id.clone(), definition);
        Ok(())
    }

    pub fn remove(&self, workflow_id: &str) -> Option<WorkflowDefinition> {
        self.definitions.remove(workflow_id).map(|(_, def)| def)
    }

    pub fn get(&self, workflow_id: &str) -> Option<WorkflowDefinition> {
        self.definitions.get(workflow_id).map(|def| def.clone())
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.definitions.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    pub fn engine(&self) -> &Arc<WorkflowEngine> {
        &self.engine
    }
}

impl WorkflowLauncher for WorkflowCatalog {
    async fn launch(&self, workflow_id: &str) -> Result<WorkflowRunSummary, LaunchError> {
        let definition = self
            .get(workflow_id)
            .ok_or_else(|| LaunchError::UnknownWorkflow(workflow_id.to_string()))?;
        let finished = self
            .engine
            .execute(Workflow::from_definition(definition))
            .await?;
        Ok(WorkflowRunSummary::from(&finished))
    }
}
