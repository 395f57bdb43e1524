//! The host world façade: the only surface game code touches. Routes
//! tile/wall/light/tile-entity accessors and deferred entity additions
//! through the region store, and drives the per-tick sequence.

use std::sync::Arc;

use common::parking_lot::Mutex;
use common::*;

use crate::coord::{RegionPoint, TilePoint};
use crate::document::DocValue;
use crate::generator::RegionGenerator;
use crate::loader::LoaderBackend;
use crate::region::{EntityRecord, LifecycleState, Region, StructureApplyHook, TileTickHook};
use crate::slice::{Light, TileId, WallId};
use crate::store::RegionStore;

/// Outcome of an accessor against a position whose region isn't resident or
/// isn't `PREPARED` yet: an explicit variant the caller must match on,
/// rather than a silently-absorbing dummy slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileAccess<T> {
    Tile(T),
    Barrier,
}

impl<T> TileAccess<T> {
    pub fn is_barrier(&self) -> bool {
        matches!(self, TileAccess::Barrier)
    }

    pub fn into_tile(self) -> Option<T> {
        match self {
            TileAccess::Tile(t) => Some(t),
            TileAccess::Barrier => None,
        }
    }
}

/// Entity update behaviour lives outside this crate; this is the seam a
/// host game plugs its own entity simulation into.
pub trait EntityUpdateHook: Send + Sync {
    fn update(&self, region: RegionPoint, entity: &EntityRecord);
}

impl EntityUpdateHook for () {
    fn update(&self, _region: RegionPoint, _entity: &EntityRecord) {}
}

struct PendingEntity {
    region: RegionPoint,
    entity: EntityRecord,
}

/// The game-facing handle to a single dimension's worth of world state.
pub struct Host<B, G> {
    store: Arc<RegionStore<B, G>>,
    pending_entities: Mutex<Vec<PendingEntity>>,
}

impl<B, G> Host<B, G>
where
    B: LoaderBackend + 'static,
    G: RegionGenerator + 'static,
{
    pub fn new(store: Arc<RegionStore<B, G>>) -> Self {
        Self {
            store,
            pending_entities: Mutex::new(Vec::new()),
        }
    }

    pub fn store(&self) -> &Arc<RegionStore<B, G>> {
        &self.store
    }

    /// `pos` must be tile-aligned; all [`TilePoint`]s are integral by
    /// construction, so alignment only matters for callers who round a
    /// fractional game-space position before calling in, and that rounding
    /// happens outside this crate.
    pub fn get_tile_at(&self, pos: TilePoint) -> TileAccess<TileId> {
        let region = pos.region();
        match self.store.get(region) {
            Some(r) if r.lifecycle() == LifecycleState::Prepared => {
                TileAccess::Tile(r.slice(pos.slice()).read().tile(pos.block()))
            }
            _ => TileAccess::Barrier,
        }
    }

    pub fn get_wall_at(&self, pos: TilePoint) -> TileAccess<WallId> {
        let region = pos.region();
        match self.store.get(region) {
            Some(r) if r.lifecycle() == LifecycleState::Prepared => {
                TileAccess::Tile(r.slice(pos.slice()).read().wall(pos.block()))
            }
            _ => TileAccess::Barrier,
        }
    }

    pub fn get_light_at(&self, pos: TilePoint) -> TileAccess<Light> {
        let region = pos.region();
        match self.store.get(region) {
            Some(r) if r.lifecycle() == LifecycleState::Prepared => {
                TileAccess::Tile(r.slice(pos.slice()).read().light(pos.block()))
            }
            _ => TileAccess::Barrier,
        }
    }

    pub fn get_tile_entity_at(&self, pos: TilePoint) -> TileAccess<DocValue> {
        let region = pos.region();
        match self.store.get(region) {
            Some(r) if r.lifecycle() == LifecycleState::Prepared => r
                .slice(pos.slice())
                .read()
                .tile_entity(pos.block())
                .cloned()
                .map(TileAccess::Tile)
                .unwrap_or(TileAccess::Barrier),
            _ => TileAccess::Barrier,
        }
    }

    /// Returns the resident, `PREPARED` region owning `pos`, logging (and in
    /// debug builds asserting) if the caller reached here too early.
    fn ready_region_for(&self, pos: TilePoint, op: &'static str) -> Option<Arc<Region>> {
        let region = pos.region();
        match self.store.get(region) {
            Some(r) if r.lifecycle() == LifecycleState::Prepared => Some(r),
            _ => {
                debug_assert!(false, "{} on a region that isn't PREPARED", op);
                warn!("tile write ignored, region not ready"; "op" => op, "region" => region);
                None
            }
        }
    }

    /// Must be called from the tick thread. Returns `false` without
    /// writing if the target region isn't `PREPARED`.
    pub fn set_tile_at(&self, pos: TilePoint, tile: TileId) -> bool {
        match self.ready_region_for(pos, "setTileAt") {
            Some(r) => {
                r.slice(pos.slice()).write().set_tile(pos.block(), tile);
                true
            }
            None => false,
        }
    }

    pub fn set_wall_at(&self, pos: TilePoint, wall: WallId) -> bool {
        match self.ready_region_for(pos, "setWallAt") {
            Some(r) => {
                r.slice(pos.slice()).write().set_wall(pos.block(), wall);
                true
            }
            None => false,
        }
    }

    pub fn set_light_at(&self, pos: TilePoint, light: Light) -> bool {
        match self.ready_region_for(pos, "setLightAt") {
            Some(r) => {
                r.slice(pos.slice()).write().set_light(pos.block(), light);
                true
            }
            None => false,
        }
    }

    pub fn set_tile_entity_at(&self, pos: TilePoint, entity: DocValue) -> bool {
        match self.ready_region_for(pos, "setTileEntityAt") {
            Some(r) => {
                r.slice(pos.slice())
                    .write()
                    .set_tile_entity(pos.block(), entity);
                true
            }
            None => false,
        }
    }

    pub fn remove_tile_entity_at(&self, pos: TilePoint) -> Option<DocValue> {
        let region = pos.region();
        let r = self.store.get(region)?;
        if r.lifecycle() != LifecycleState::Prepared {
            return None;
        }
        r.slice(pos.slice()).write().remove_tile_entity(pos.block())
    }

    /// Buffers an entity addition; it's applied at the start of the next
    /// [`Host::tick`] call, never mid-iteration.
    pub fn add_entity(&self, region: RegionPoint, entity: EntityRecord) {
        self.pending_entities
            .lock()
            .push(PendingEntity { region, entity });
    }

    /// Runs one tick: drain pending entity additions, update resident
    /// entities, call [`crate::region::Region::update`] on every resident
    /// region, apply whatever structures drained out, then evict whatever
    /// became eligible.
    pub fn tick(
        &self,
        tile_tick: &dyn TileTickHook,
        entity_tick: &dyn EntityUpdateHook,
        structure_apply: &dyn StructureApplyHook,
    ) {
        let pending = std::mem::take(&mut *self.pending_entities.lock());
        for PendingEntity { region: coord, entity } in pending {
            let region = self.store.request(coord);
            region.add_entity(entity);
        }

        for (coord, region) in self.store.resident_snapshot() {
            for entity in region.entities() {
                entity_tick.update(coord, &entity);
            }
        }

        self.store.tick_with_structures(tile_tick, structure_apply);
    }
}
