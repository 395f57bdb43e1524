pub use coord::{RegionPoint, SliceBlock, SlicePoint, TilePoint};
pub use document::{DocValue, Document, GzRonDocument};
pub use error::{DocumentError, GeneratorError, LoaderStepError, SchedulerError};
pub use generator::{GeneratedRegion, GenerationHandoff, RegionGenerator};
pub use host::{EntityUpdateHook, Host, TileAccess};
pub use loader::{FsLoaderBackend, LoaderBackend, LoaderStep, MemoryLoaderBackend, RegionPipeline};
pub use region::{
    EntityRecord, LifecycleState, QueuedStructure, Region, RegionUpdateOutcome, SaveState,
    StructureApplyHook, TileTickHook, UpdateContext,
};
pub use region_storage::RegionStorageStep;
pub use scheduler::Scheduler;
pub use slice::{Light, Slice, TileId, WallId};
pub use store::RegionStore;

pub mod coord;
mod document;
mod error;
mod generator;
mod host;
mod loader;
mod metrics;
pub mod region;
mod region_storage;
mod scheduler;
mod slice;
mod store;
