use common::*;

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("failed to read/write region file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to (de)serialise region document: {0}")]
    Serialisation(#[from] ron::Error),

    #[error("region document is missing required key {0:?}")]
    MissingKey(&'static str),

    #[error("region document key {0:?} had the wrong type")]
    WrongType(&'static str),
}

#[derive(Debug, Error)]
#[error("loader step {step} failed: {source}")]
pub struct LoaderStepError {
    pub step: &'static str,
    #[source]
    pub source: DocumentError,
}

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("generator panicked")]
    Panicked,

    #[error("failed to enqueue a structure: queue disconnected")]
    QueueDisconnected,
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("cannot submit work, scheduler is shutting down")]
    ShuttingDown,

    #[error("failed to build worker pool: {0}")]
    PoolBuild(#[from] std::io::Error),
}
