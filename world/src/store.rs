//! The region store: owns every loaded region keyed by coordinate,
//! propagates anchors to neighbours, and runs the per-tick residency/GC
//! pass. This is where the loader and generator handoffs are wired
//! together behind a single `request` entry point.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use common::parking_lot::{Mutex, RwLock};
use common::*;
use config::WorldConfig;

use crate::coord::RegionPoint;
use crate::generator::GenerationHandoff;
use crate::loader::{LoaderBackend, RegionPipeline};
use crate::metrics;
use crate::region::{
    LifecycleState, QueuedStructure, Region, StructureApplyHook, TileTickHook, UpdateContext,
};
use crate::scheduler::Scheduler;

pub struct RegionStore<B, G> {
    regions: RwLock<HashMap<RegionPoint, Arc<Region>>>,
    pending_structures: Mutex<HashMap<RegionPoint, Vec<QueuedStructure>>>,
    pipeline: Arc<RegionPipeline<B>>,
    generation: Arc<GenerationHandoff<G>>,
    scheduler: Arc<Scheduler>,
    world_age_ticks: AtomicU64,
    unload_grace_ticks: i32,
    save_stagger_seconds: u32,
    tps: u32,
}

impl<B, G> RegionStore<B, G>
where
    B: LoaderBackend + 'static,
    G: crate::generator::RegionGenerator + 'static,
{
    pub fn new(
        pipeline: Arc<RegionPipeline<B>>,
        generation: Arc<GenerationHandoff<G>>,
        scheduler: Arc<Scheduler>,
        tps: u32,
        unload_grace_ticks: i32,
        save_stagger_seconds: u32,
    ) -> Self {
        Self {
            regions: RwLock::new(HashMap::new()),
            pending_structures: Mutex::new(HashMap::new()),
            pipeline,
            generation,
            scheduler,
            world_age_ticks: AtomicU64::new(0),
            unload_grace_ticks,
            save_stagger_seconds,
            tps,
        }
    }

    /// Builds a store from the world's loaded config: `tps`,
    /// `unload_grace_ticks` and `save_stagger_seconds` all come from
    /// [`WorldConfig`] rather than being threaded through by hand.
    pub fn from_config(
        pipeline: Arc<RegionPipeline<B>>,
        generation: Arc<GenerationHandoff<G>>,
        scheduler: Arc<Scheduler>,
        cfg: &WorldConfig,
    ) -> Self {
        Self::new(
            pipeline,
            generation,
            scheduler,
            cfg.tps,
            cfg.unload_grace_ticks(),
            cfg.save_stagger_seconds,
        )
    }

    pub fn world_age_ticks(&self) -> u64 {
        self.world_age_ticks.load(Ordering::Acquire)
    }

    pub fn resident_count(&self) -> usize {
        self.regions.read().len()
    }

    pub fn get(&self, coord: RegionPoint) -> Option<Arc<Region>> {
        self.regions.read().get(&coord).cloned()
    }

    /// A point-in-time snapshot of every resident region, for callers (the
    /// host façade's entity tick) that need to iterate without holding the
    /// map lock across per-region work.
    pub fn resident_snapshot(&self) -> Vec<(RegionPoint, Arc<Region>)> {
        self.regions
            .read()
            .iter()
            .map(|(&c, r)| (c, Arc::clone(r)))
            .collect()
    }

    /// Returns the region at `coord`, creating and kicking off its load if
    /// it isn't resident yet.
    pub fn request(self: &Arc<Self>, coord: RegionPoint) -> Arc<Region> {
        if let Some(region) = self.get(coord) {
            return region;
        }

        let mut regions = self.regions.write();
        if let Some(region) = regions.get(&coord) {
            return Arc::clone(region);
        }

        let region = Arc::new(Region::new(coord));
        if let Some(pending) = self.pending_structures.lock().remove(&coord) {
            for structure in pending {
                region.enqueue_structure(structure);
            }
        }
        region.set_active_neighbours(self.active_neighbour_count(coord, &regions));
        regions.insert(coord, Arc::clone(&region));
        let resident = regions.len();
        drop(regions);
        metrics::regions_resident(resident);

        self.start_load(Arc::clone(&region));
        region
    }

    fn start_load(self: &Arc<Self>, region: Arc<Region>) {
        let store = Arc::clone(self);
        self.pipeline
            .load_region(&self.scheduler, region, move |region, success| {
                if !success {
                    return;
                }
                if region.lifecycle() == LifecycleState::Loading {
                    store.start_generation(region);
                }
            });
    }

    fn start_generation(self: &Arc<Self>, region: Arc<Region>) {
        let route_store = Arc::clone(self);
        self.generation.generate_region(
            &self.scheduler,
            region,
            move |target, structure| route_store.route_structure(target, structure),
            |_region, _success| {},
        );
    }

    /// Routes a generator-queued structure to its target region's queue,
    /// buffering it if that region isn't resident yet — it's drained into
    /// the region's own queue the moment it's created.
    fn route_structure(&self, target: RegionPoint, structure: QueuedStructure) {
        if let Some(region) = self.get(target) {
            region.enqueue_structure(structure);
        } else {
            self.pending_structures
                .lock()
                .entry(target)
                .or_default()
                .push(structure);
        }
    }

    // --- anchoring -------------------------------------------------------

    /// Main-thread only. Anchors `coord`, creating/loading it if needed,
    /// and notifies neighbours if this is the transition from zero to one
    /// anchors.
    pub fn anchor(self: &Arc<Self>, coord: RegionPoint) -> Arc<Region> {
        let region = self.request(coord);
        let (_, became_anchored) = region.anchor_slice();
        if became_anchored {
            self.recompute_neighbour_activity(coord);
        }
        region
    }

    /// Main-thread only.
    pub fn deanchor(&self, coord: RegionPoint) {
        let region = match self.get(coord) {
            Some(region) => region,
            None => {
                warn!("deAnchorSlice called on a region that isn't resident"; "region" => coord);
                return;
            }
        };
        let (_, became_unanchored) = region.deanchor_slice();
        if became_unanchored {
            self.recompute_neighbour_activity(coord);
        }
    }

    /// Recomputes `activeNeighbours` on every one of `coord`'s eight
    /// neighbours that is resident, padding the anchored frontier so a
    /// freshly-anchored region's neighbours aren't evicted out from under
    /// it. `coord` itself just flipped anchored state, so every resident
    /// neighbour's count may be stale.
    fn recompute_neighbour_activity(&self, coord: RegionPoint) {
        let regions = self.regions.read();
        for neighbour_coord in coord.neighbours() {
            if let Some(neighbour) = regions.get(&neighbour_coord) {
                let active = self.active_neighbour_count(neighbour_coord, &regions);
                neighbour.set_active_neighbours(active);
            }
        }
    }

    /// Counts how many of `coord`'s eight neighbours are resident, anchored
    /// and `PREPARED`, given an already-acquired view of the region map
    /// (avoids re-entering the non-reentrant map lock from call sites that
    /// already hold it).
    fn active_neighbour_count(
        &self,
        coord: RegionPoint,
        regions: &HashMap<RegionPoint, Arc<Region>>,
    ) -> u32 {
        coord
            .neighbours()
            .iter()
            .filter(|&&c| {
                regions
                    .get(&c)
                    .map(|r| r.anchored_slices() > 0 && r.lifecycle() == LifecycleState::Prepared)
                    .unwrap_or(false)
            })
            .count() as u32
    }

    // --- per-tick residency & eviction -------------------------------------

    /// Advances world age by one tick, runs every resident region's
    /// [`Region::update`], triggers staggered saves, and evicts every
    /// region that became eligible this tick. Main-thread only.
    pub fn tick(self: &Arc<Self>, tile_tick: &dyn TileTickHook) {
        self.tick_with_structures(tile_tick, &())
    }

    /// As [`RegionStore::tick`], but also drives structure implantation
    /// through `structure_apply` instead of silently discarding queued
    /// structures.
    pub fn tick_with_structures(
        self: &Arc<Self>,
        tile_tick: &dyn TileTickHook,
        structure_apply: &dyn StructureApplyHook,
    ) {
        let world_age_ticks = self.world_age_ticks.fetch_add(1, Ordering::AcqRel) + 1;

        let snapshot: Vec<Arc<Region>> = self.regions.read().values().cloned().collect();

        let ctx = UpdateContext {
            world_age_ticks,
            tps: self.tps,
            save_stagger_seconds: self.save_stagger_seconds,
            unload_grace_ticks: self.unload_grace_ticks,
            tile_tick,
            structure_apply,
        };

        let mut to_evict = Vec::new();
        for region in snapshot {
            let outcome = region.update(&ctx);
            if outcome.save_requested {
                self.request_save(Arc::clone(&region));
            }
            if outcome.eviction_eligible {
                to_evict.push(region);
            }
        }

        for region in to_evict {
            self.evict(region);
        }
    }

    fn request_save(self: &Arc<Self>, region: Arc<Region>) {
        let world_age_ticks = self.world_age_ticks();
        self.pipeline
            .save_region(&self.scheduler, region, world_age_ticks, |_, _| {});
    }

    /// Removes an eviction-eligible region from the map, saving it first if
    /// it was never written to the backend (e.g. anchored then deanchored
    /// within the same tick, before its staggered save window ever came
    /// round). Eligibility requires `saveState == Idle` already, so the
    /// save permit always succeeds here; `evict` blocks on it synchronously
    /// since eviction itself runs in-line on the tick thread.
    fn evict(&self, region: Arc<Region>) {
        if !region.eviction_eligible() {
            return;
        }

        if region.get_save_permit() {
            let _ = region.finish_saving();
        }
        let world_age_ticks = self.world_age_ticks();
        self.pipeline
            .save_region(&self.scheduler, Arc::clone(&region), world_age_ticks, |_, _| {});
        region.wait_until_saved();

        // re-check under the lock: the save may have taken time on a real
        // scheduler, during which the region could have been re-anchored.
        if !region.eviction_eligible() {
            return;
        }

        let mut regions = self.regions.write();
        regions.remove(&region.coord());
        let resident = regions.len();
        drop(regions);

        metrics::region_evicted();
        metrics::regions_resident(resident);
    }

    /// Synchronous shutdown path: stop accepting new loads and block until
    /// every resident, dirty region has been saved in-line.
    pub fn save_all_blocking(&self) {
        let world_age_ticks = self.world_age_ticks();
        let regions: Vec<Arc<Region>> = self.regions.read().values().cloned().collect();
        for region in regions {
            if region.get_save_permit() {
                // undo the permit we just took; save_region will re-acquire
                // it itself and this avoids a double-accounted permit
                let _ = region.finish_saving();
            }
            self.pipeline
                .save_region(&self.scheduler, Arc::clone(&region), world_age_ticks, |_, _| {});
            region.wait_until_saved();
        }
    }

    pub fn shutdown(&self) {
        self.pipeline.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GeneratorError;
    use crate::generator::{GeneratedRegion, RegionGenerator};
    use crate::loader::MemoryLoaderBackend;

    struct FlatGenerator;

    impl RegionGenerator for FlatGenerator {
        fn generate(&self, _origin: RegionPoint, _seed: u64) -> Result<GeneratedRegion, GeneratorError> {
            let mut out = GeneratedRegion::blank();
            for sy in 0..crate::coord::R {
                for sx in 0..crate::coord::R {
                    for by in 0..crate::coord::S {
                        for bx in 0..crate::coord::S {
                            out.set_tile(
                                crate::coord::SlicePoint(sx, sy),
                                crate::coord::SliceBlock(bx, by),
                                9,
                            );
                        }
                    }
                }
            }
            Ok(out)
        }
    }

    fn test_store() -> Arc<RegionStore<MemoryLoaderBackend, FlatGenerator>> {
        let pipeline = Arc::new(RegionPipeline::new(MemoryLoaderBackend::new()));
        let generation = Arc::new(GenerationHandoff::new(FlatGenerator, 1));
        let scheduler = Arc::new(Scheduler::new_blocking().unwrap());
        Arc::new(RegionStore::new(pipeline, generation, scheduler, 60, 600, 64))
    }

    #[test]
    fn cold_load_reaches_prepared_and_generated() {
        let store = test_store();
        let region = store.anchor(RegionPoint(0, 0));
        assert_eq!(region.lifecycle(), LifecycleState::Prepared);
        assert!(region.is_generated());
        assert_eq!(
            region
                .slice(crate::coord::SlicePoint(0, 0))
                .read()
                .tile(crate::coord::SliceBlock(0, 0)),
            9
        );
    }

    #[test]
    fn eviction_waits_out_the_unload_grace_period() {
        let store = test_store();
        store.anchor(RegionPoint(3, 3));
        store.deanchor(RegionPoint(3, 3));

        for _ in 0..600 {
            store.tick(&());
            assert!(store.get(RegionPoint(3, 3)).is_some());
        }

        store.tick(&());
        assert!(store.get(RegionPoint(3, 3)).is_none());
    }

    #[test]
    fn anchored_region_is_never_evicted() {
        let store = test_store();
        store.anchor(RegionPoint(1, 1));
        for _ in 0..1000 {
            store.tick(&());
        }
        assert!(store.get(RegionPoint(1, 1)).is_some());
    }

    #[test]
    fn active_neighbours_blocks_eviction_even_when_unanchored() {
        let store = test_store();
        // anchoring (0,0) pads all eight neighbours, including (1,0)
        store.anchor(RegionPoint(0, 0));
        store.anchor(RegionPoint(1, 0));
        store.deanchor(RegionPoint(1, 0));

        assert!(store.get(RegionPoint(1, 0)).unwrap().active_neighbours() > 0);

        for _ in 0..1000 {
            store.tick(&());
        }
        assert!(
            store.get(RegionPoint(1, 0)).is_some(),
            "a region padded by an anchored neighbour must not be evicted"
        );
    }

    #[test]
    fn store_builds_from_world_config() {
        let cfg = WorldConfig {
            tps: 60,
            unload_grace_ticks: Some(5),
            save_stagger_seconds: 64,
            core_threads: 2,
            max_threads: Some(2),
            keep_alive_seconds: 30,
            shutdown_drain_seconds: 10,
            world_root: std::env::temp_dir(),
        };

        let pipeline = Arc::new(RegionPipeline::new(MemoryLoaderBackend::new()));
        let generation = Arc::new(GenerationHandoff::new(FlatGenerator, 1));
        let scheduler = Arc::new(Scheduler::new_blocking().unwrap());
        let store = Arc::new(RegionStore::from_config(pipeline, generation, scheduler, &cfg));

        store.anchor(RegionPoint(0, 0));
        store.deanchor(RegionPoint(0, 0));
        for _ in 0..5 {
            store.tick(&());
            assert!(store.get(RegionPoint(0, 0)).is_some());
        }
        store.tick(&());
        assert!(store.get(RegionPoint(0, 0)).is_none());
    }

    #[test]
    fn cross_region_structure_is_buffered_until_target_is_created() {
        let store = test_store();
        store.route_structure(
            RegionPoint(5, 5),
            QueuedStructure {
                name: "tower".to_owned(),
                slice_x: 0,
                slice_y: 0,
                tile_x: 0,
                tile_y: 0,
                offset_x: 0,
                offset_y: 0,
            },
        );

        let region = store.request(RegionPoint(5, 5));
        assert!(region.has_queued_structures());
    }
}
