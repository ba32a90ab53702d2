use hearth_process::ResourceId;

/// Failures surfaced to callers of the console hub, tagged with the lifecycle
/// step that failed.
#[derive(Debug, thiserror::Error)]
pub enum ConsoleError {
    #[error("attach to resource {id} failed: {source}")]
    Attach {
        id: ResourceId,
        #[source]
        source: anyhow::Error,
    },

    #[error("launch of resource {id} failed: {source}")]
    Launch {
        id: ResourceId,
        #[source]
        source: anyhow::Error,
    },

    #[error("terminate of resource {id} failed: {source}")]
    Terminate {
        id: ResourceId,
        #[source]
        source: anyhow::Error,
    },

    #[error("persisting state of resource {id} failed: {source}")]
    Persist {
        id: ResourceId,
        #[source]
        source: anyhow::Error,
    },

    #[error("resource {0} is already running")]
    AlreadyRunning(ResourceId),

    #[error("resource {0} has no attached console")]
    NotAttached(ResourceId),

    #[error("console for resource {0} has shut down")]
    Closed(ResourceId),

    #[error("console for resource {0} did not shut down in time")]
    StopTimeout(ResourceId),
}

pub type ConsoleResult<T> = Result<T, ConsoleError>;
