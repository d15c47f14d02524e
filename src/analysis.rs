//! Analysis engine projects attached to resources.
//!
//! An [`AnalysisEngine`] turns resource bytes into an engine-specific project
//! (a disassembler's loaded binary, for example). The project is stored as an
//! [`Analysis`] attribute of the resource the first time it is requested and
//! shared from then on.

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::resource::Resource;

/// An external analysis engine.
pub trait AnalysisEngine: Send + Sync {
    /// The engine's project type.
    type Project: Send + Sync + 'static;

    type Error: std::error::Error + Send + Sync + 'static;

    /// Build a project from a resource's bytes.
    fn load_project(
        &self,
        data: Vec<u8>,
    ) -> impl Future<Output = Result<Self::Project, Self::Error>> + Send;
}

/// Analysis attribute wrapping an engine project.
#[derive(Debug)]
pub struct Analysis<P> {
    project: Arc<P>,
}

impl<P> Analysis<P> {
    pub fn new(project: P) -> Self {
        Self {
            project: Arc::new(project),
        }
    }

    pub fn project(&self) -> &Arc<P> {
        &self.project
    }
}

impl<P> Clone for Analysis<P> {
    fn clone(&self) -> Self {
        Self {
            project: self.project.clone(),
        }
    }
}

/// View of a resource exposing its analysis.
#[derive(Debug, Clone, Copy)]
pub struct AnalysisResource<'a> {
    resource: &'a Resource,
}

impl<'a> AnalysisResource<'a> {
    pub fn new(resource: &'a Resource) -> Self {
        Self { resource }
    }

    pub fn resource(&self) -> &'a Resource {
        self.resource
    }

    /// The resource's analysis, built with `engine` if not yet present.
    ///
    /// Later calls return the same `Arc` without touching the engine. If the
    /// engine fails, nothing is stored and the error is returned as
    /// [`Error::Analysis`].
    pub async fn get_analysis<E: AnalysisEngine>(
        &self,
        engine: &E,
    ) -> Result<Arc<Analysis<E::Project>>> {
        let resource = self.resource;
        resource
            .attributes()
            .get_or_try_init(|| async move {
                debug!("Running analysis engine on resource {}", resource.id());
                let data = resource.get_data().await;
                let size = data.len();

                let project = engine.load_project(data).await.map_err(|e| Error::Analysis {
                    resource: resource.id(),
                    source: Box::new(e),
                })?;

                info!("Analyzed resource {} ({} bytes)", resource.id(), size);
                Ok::<_, Error>(Analysis::new(project))
            })
            .await
    }

    /// The resource's analysis if it has already been computed.
    pub fn cached_analysis<P: Send + Sync + 'static>(&self) -> Option<Arc<Analysis<P>>> {
        self.resource.attributes().get::<Analysis<P>>()
    }
}
