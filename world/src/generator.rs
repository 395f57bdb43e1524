//! The generator contract: a pure function of
//! `(region origin, world seed) -> (slice tiles, queued structures)`, plus
//! the engine-side handoff that claims the generation permit, applies the
//! result to the region's slices, routes structures, and marks the region
//! generated. Concrete generation algorithms (noise, caves, ...) live
//! outside this crate — only the contract is specified here.

use std::sync::Arc;

use common::*;

use crate::coord::{RegionPoint, SliceBlock, SlicePoint, R, S};
use crate::error::GeneratorError;
use crate::metrics;
use crate::region::{QueuedStructure, Region};
use crate::scheduler::Scheduler;
use crate::slice::{TileId, WallId};

/// Output of a single pure generator invocation, before the engine applies
/// it to the region's slice grid and routes structures to their targets.
pub struct GeneratedRegion {
    tiles: Vec<TileId>,
    walls: Vec<WallId>,
    structures: Vec<(RegionPoint, QueuedStructure)>,
}

impl GeneratedRegion {
    pub fn blank() -> Self {
        let len = (R * R * S * S) as usize;
        Self {
            tiles: vec![0; len],
            walls: vec![0; len],
            structures: Vec::new(),
        }
    }

    fn index(slice: SlicePoint, block: SliceBlock) -> usize {
        slice.index() * (S * S) as usize + block.index()
    }

    pub fn set_tile(&mut self, slice: SlicePoint, block: SliceBlock, tile: TileId) {
        self.tiles[Self::index(slice, block)] = tile;
    }

    pub fn set_wall(&mut self, slice: SlicePoint, block: SliceBlock, wall: WallId) {
        self.walls[Self::index(slice, block)] = wall;
    }

    pub fn tile(&self, slice: SlicePoint, block: SliceBlock) -> TileId {
        self.tiles[Self::index(slice, block)]
    }

    pub fn wall(&self, slice: SlicePoint, block: SliceBlock) -> WallId {
        self.walls[Self::index(slice, block)]
    }

    /// Queues a structure; `target` may be the generated region itself or
    /// one of its eight neighbours.
    pub fn add_structure(&mut self, target: RegionPoint, structure: QueuedStructure) {
        self.structures.push((target, structure));
    }
}

/// A terrain-generation algorithm. Implementations must be pure: the same
/// `(origin, seed)` always produces the same [`GeneratedRegion`], so the
/// engine may freely retry or regenerate without observable side effects
/// beyond the one it applies.
pub trait RegionGenerator: Send + Sync {
    fn generate(&self, origin: RegionPoint, seed: u64) -> Result<GeneratedRegion, GeneratorError>;
}

/// Drives the generation handoff for a single registered generator and
/// world seed.
pub struct GenerationHandoff<G> {
    generator: Arc<G>,
    seed: u64,
}

impl<G: RegionGenerator + 'static> GenerationHandoff<G> {
    pub fn new(generator: G, seed: u64) -> Self {
        Self {
            generator: Arc::new(generator),
            seed,
        }
    }

    /// Submits a generation job to `scheduler`. `route_structure` is
    /// invoked once per queued structure whose target isn't `region`
    /// itself — routing a structure to a different region is the store's
    /// job, since only it can look up or create that region.
    pub fn generate_region<F, R>(
        self: &Arc<Self>,
        scheduler: &Scheduler,
        region: Arc<Region>,
        route_structure: R,
        callback: F,
    ) where
        F: FnOnce(Arc<Region>, bool) + Send + 'static,
        R: Fn(RegionPoint, QueuedStructure) + Send + 'static,
    {
        if !region.generation_permit() {
            warn!("generationPermit refused, region wasn't LOADING"; "region" => region.coord());
            callback(region, false);
            return;
        }

        let handoff = Arc::clone(self);
        scheduler.spawn(async move {
            let origin = region.coord();
            let outcome = handoff.generator.generate(origin, handoff.seed);

            let success = match outcome {
                Ok(generated) => {
                    handoff.apply(&region, generated, &route_structure);
                    region.set_generated()
                }
                Err(e) => {
                    error!("generator failed"; "region" => origin, "error" => %e);
                    region.abandon_generation();
                    false
                }
            };

            if success {
                metrics::region_generated();
            }

            callback(region, success);
        });
    }

    fn apply(
        &self,
        region: &Region,
        generated: GeneratedRegion,
        route_structure: &dyn Fn(RegionPoint, QueuedStructure),
    ) {
        for sy in 0..R {
            for sx in 0..R {
                let slice_point = SlicePoint(sx, sy);
                let mut slice = region.slice(slice_point).write();
                for by in 0..S {
                    for bx in 0..S {
                        let block = SliceBlock(bx, by);
                        slice.set_tile(block, generated.tile(slice_point, block));
                        slice.set_wall(block, generated.wall(slice_point, block));
                    }
                }
            }
        }

        let origin = region.coord();
        for (target, structure) in generated.structures {
            if target == origin {
                region.enqueue_structure(structure);
            } else {
                route_structure(target, structure);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::LifecycleState;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex as StdMutex;

    struct ConstantGenerator {
        tile: TileId,
    }

    impl RegionGenerator for ConstantGenerator {
        fn generate(&self, origin: RegionPoint, _seed: u64) -> Result<GeneratedRegion, GeneratorError> {
            let mut out = GeneratedRegion::blank();
            for sy in 0..R {
                for sx in 0..R {
                    for by in 0..S {
                        for bx in 0..S {
                            out.set_tile(SlicePoint(sx, sy), SliceBlock(bx, by), self.tile);
                        }
                    }
                }
            }
            out.add_structure(
                origin.neighbours()[4],
                QueuedStructure {
                    name: "hut".to_owned(),
                    slice_x: 0,
                    slice_y: 0,
                    tile_x: 0,
                    tile_y: 0,
                    offset_x: 0,
                    offset_y: 0,
                },
            );
            Ok(out)
        }
    }

    #[test]
    fn generation_fills_tiles_and_routes_cross_region_structures() {
        let scheduler = Scheduler::new_blocking().unwrap();
        let handoff = Arc::new(GenerationHandoff::new(ConstantGenerator { tile: 7 }, 42));

        let region = Arc::new(Region::new(RegionPoint(0, 0)));
        assert!(region.load_permit());
        region.set_loaded(false, false);

        let routed = Arc::new(StdMutex::new(Vec::new()));
        let routed2 = routed.clone();
        let done = Arc::new(AtomicU32::new(0));
        let done2 = done.clone();

        handoff.generate_region(
            &scheduler,
            region.clone(),
            move |target, structure| routed2.lock().unwrap().push((target, structure)),
            move |r, success| {
                assert!(success);
                assert!(r.is_generated());
                done2.store(1, Ordering::SeqCst);
            },
        );

        assert_eq!(done.load(Ordering::SeqCst), 1);
        assert_eq!(region.lifecycle(), LifecycleState::Prepared);
        assert_eq!(
            region.slice(SlicePoint(0, 0)).read().tile(SliceBlock(0, 0)),
            7
        );
        assert_eq!(routed.lock().unwrap().len(), 1);
    }

    #[test]
    fn generation_permit_denied_on_non_loading_region() {
        let scheduler = Scheduler::new_blocking().unwrap();
        let handoff = Arc::new(GenerationHandoff::new(ConstantGenerator { tile: 1 }, 1));
        let region = Arc::new(Region::new(RegionPoint(1, 1))); // still NEW, never loaded

        let done = Arc::new(AtomicU32::new(0));
        let done2 = done.clone();
        handoff.generate_region(
            &scheduler,
            region.clone(),
            |_, _| {},
            move |_, success| {
                assert!(!success);
                done2.store(1, Ordering::SeqCst);
            },
        );
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }
}
