//! The per-region finite state machine: lifecycle, save-state, anchoring,
//! the unload countdown and the structure queue. A [`Region`] is the unit of
//! storage, generation and eviction; everything else in this crate is a
//! client of the state this module defines.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, AtomicU8, Ordering};

use common::parking_lot::{Condvar, Mutex};
use common::*;
use crossbeam_channel::{Receiver, Sender};
use strum::Display;

use crate::coord::{RegionPoint, SliceBlock, SlicePoint, R};
use crate::document::DocValue;
use crate::slice::Slice;

/// A generator-produced structure awaiting placement, possibly in a
/// neighbouring region to the one that generated it.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedStructure {
    pub name: String,
    pub slice_x: i32,
    pub slice_y: i32,
    pub tile_x: i32,
    pub tile_y: i32,
    pub offset_x: i32,
    pub offset_y: i32,
}

/// An opaque entity blob bound to a region. Behaviour is out of scope here;
/// the region only needs to carry it through a save/load cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRecord {
    pub kind: String,
    pub payload: DocValue,
}

/// The region lifecycle. Transitions are CAS'd on the underlying atomic;
/// `NEW -> LOADING -> {PREPARED | GENERATING -> PREPARED}`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Display)]
#[repr(u8)]
pub enum LifecycleState {
    New = 0,
    Loading = 1,
    Generating = 2,
    Prepared = 3,
}

impl LifecycleState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => LifecycleState::New,
            1 => LifecycleState::Loading,
            2 => LifecycleState::Generating,
            3 => LifecycleState::Prepared,
            _ => unreachable!("invalid lifecycle byte {}", v),
        }
    }
}

/// The save state. Kept separate from [`LifecycleState`] because a save may
/// overlap generation or a tick read.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Display)]
pub enum SaveState {
    Idle,
    Saving,
    Waiting,
    IdleWaiter,
}

/// Outcome of a single [`Region::update`] call, telling the region store
/// what to do on its behalf (it owns the loader/generator handles and the
/// membership map, neither of which the region may touch itself).
#[derive(Debug, Default, Clone, Copy)]
pub struct RegionUpdateOutcome {
    pub save_requested: bool,
    pub eviction_eligible: bool,
}

/// Everything a region needs to run its per-tick update that isn't owned by
/// the region itself: the tick thread's view of world time and hooks for
/// the host game's own tile-update and structure-placement behaviour.
pub struct UpdateContext<'a> {
    pub world_age_ticks: u64,
    pub tps: u32,
    pub save_stagger_seconds: u32,
    pub unload_grace_ticks: i32,
    pub tile_tick: &'a dyn TileTickHook,
    pub structure_apply: &'a dyn StructureApplyHook,
}

/// External collaborator for the random tile update a `PREPARED`, anchored
/// region runs once per tick; concrete tile-entity behaviour lives outside
/// this crate.
pub trait TileTickHook: Send + Sync {
    fn tick_tile(&self, region: RegionPoint, slice: SlicePoint, tile: SliceBlock);
}

/// No-op hook for tests and hosts that don't need random tile updates.
impl TileTickHook for () {
    fn tick_tile(&self, _region: RegionPoint, _slice: SlicePoint, _tile: SliceBlock) {}
}

/// External collaborator that actually places a drained [`QueuedStructure`]
/// into the world (tiles, walls, tile-entities); the concrete placement
/// algorithm is out of scope here, only the handoff.
pub trait StructureApplyHook: Send + Sync {
    fn apply_structure(&self, region: RegionPoint, structure: &QueuedStructure);
}

/// No-op hook for tests and hosts that don't place structures.
impl StructureApplyHook for () {
    fn apply_structure(&self, _region: RegionPoint, _structure: &QueuedStructure) {}
}

pub struct Region {
    coord: RegionPoint,
    slices: Vec<common::parking_lot::RwLock<Slice>>,

    lifecycle: AtomicU8,
    generated: AtomicBool,

    save_state: Mutex<SaveState>,
    save_cond: Condvar,

    anchored_slices: AtomicU32,
    active_neighbours: AtomicU32,
    ticks_to_unload: AtomicI32,
    last_saved: AtomicU64,

    structures_tx: Sender<QueuedStructure>,
    structures_rx: Receiver<QueuedStructure>,

    entities: Mutex<Vec<EntityRecord>>,

    active: AtomicBool,
}

impl Region {
    pub fn new(coord: RegionPoint) -> Self {
        let slice_count = (R * R) as usize;
        let mut slices = Vec::with_capacity(slice_count);
        slices.resize_with(slice_count, || common::parking_lot::RwLock::new(Slice::default()));

        let (structures_tx, structures_rx) = crossbeam_channel::unbounded();

        Self {
            coord,
            slices,
            lifecycle: AtomicU8::new(LifecycleState::New as u8),
            generated: AtomicBool::new(false),
            save_state: Mutex::new(SaveState::Idle),
            save_cond: Condvar::new(),
            anchored_slices: AtomicU32::new(0),
            active_neighbours: AtomicU32::new(0),
            ticks_to_unload: AtomicI32::new(-1),
            last_saved: AtomicU64::new(0),
            structures_tx,
            structures_rx,
            entities: Mutex::new(Vec::new()),
            active: AtomicBool::new(false),
        }
    }

    pub fn coord(&self) -> RegionPoint {
        self.coord
    }

    pub fn lifecycle(&self) -> LifecycleState {
        LifecycleState::from_u8(self.lifecycle.load(Ordering::Acquire))
    }

    pub fn is_generated(&self) -> bool {
        self.generated.load(Ordering::Acquire)
    }

    pub fn save_state(&self) -> SaveState {
        *self.save_state.lock()
    }

    pub fn last_saved(&self) -> u64 {
        self.last_saved.load(Ordering::Acquire)
    }

    pub fn anchored_slices(&self) -> u32 {
        self.anchored_slices.load(Ordering::Acquire)
    }

    pub fn active_neighbours(&self) -> u32 {
        self.active_neighbours.load(Ordering::Acquire)
    }

    pub fn ticks_to_unload(&self) -> i32 {
        self.ticks_to_unload.load(Ordering::Acquire)
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    // --- lifecycle ---------------------------------------------------------

    /// CAS `NEW -> LOADING`. Only the loader calls this.
    #[must_use]
    pub fn load_permit(&self) -> bool {
        self.lifecycle
            .compare_exchange(
                LifecycleState::New as u8,
                LifecycleState::Loading as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// CAS `LOADING -> GENERATING`. Only the generator calls this.
    #[must_use]
    pub fn generation_permit(&self) -> bool {
        self.lifecycle
            .compare_exchange(
                LifecycleState::Loading as u8,
                LifecycleState::Generating as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Called by the loader once its registered steps have run.
    ///
    /// If the on-disk document was generated and carries no queued
    /// structures, this is the shortcut straight to `PREPARED`; otherwise
    /// the region stays `LOADING` so the generator can claim it (to either
    /// generate from scratch, or just process the pending structure queue).
    pub fn set_loaded(&self, was_generated: bool, has_queued_structures: bool) {
        if was_generated {
            self.generated.store(true, Ordering::Release);
            if !has_queued_structures {
                let transitioned = self
                    .lifecycle
                    .compare_exchange(
                        LifecycleState::Loading as u8,
                        LifecycleState::Prepared as u8,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok();
                if !transitioned {
                    warn!("setLoaded shortcut found region not LOADING"; "region" => self.coord);
                }
            }
        }
    }

    /// Called by the generator after it has filled in tiles and queued
    /// structures; rejects (logs, no state change) a double-generate.
    pub fn set_generated(&self) -> bool {
        let transitioned = self
            .lifecycle
            .compare_exchange(
                LifecycleState::Generating as u8,
                LifecycleState::Prepared as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();

        if transitioned {
            self.generated.store(true, Ordering::Release);
        } else {
            warn!("double setGenerated rejected"; "region" => self.coord);
        }

        transitioned
    }

    /// Rolls a failed load back to `NEW` so a later residency request can
    /// retry it, instead of stranding the region in `LOADING` forever.
    pub fn abandon_load(&self) -> bool {
        self.lifecycle
            .compare_exchange(
                LifecycleState::Loading as u8,
                LifecycleState::New as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Symmetric escape hatch for a failed generation: falls back to
    /// `LOADING` so a later generation permit can retry instead of
    /// stranding the region.
    pub fn abandon_generation(&self) -> bool {
        self.lifecycle
            .compare_exchange(
                LifecycleState::Generating as u8,
                LifecycleState::Loading as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    // --- save state machine --------------------------------------------------

    /// Acquire the save slot. Returns `false` if a save is already in
    /// flight (or already coalesced) and the caller must back off; the
    /// in-flight saver will observe this caller's prior writes because
    /// acquiring the lock here happens-after them.
    #[must_use]
    pub fn get_save_permit(&self) -> bool {
        let mut state = self.save_state.lock();
        match *state {
            SaveState::Idle | SaveState::IdleWaiter => {
                *state = SaveState::Saving;
                true
            }
            SaveState::Saving => {
                *state = SaveState::Waiting;
                false
            }
            SaveState::Waiting => false,
        }
    }

    /// Called by the saver once it has written the document to disk.
    /// Returns whether a concurrent save was requested while this one was
    /// in flight, in which case the caller should loop and save again.
    #[must_use]
    pub fn finish_saving(&self) -> bool {
        let mut state = self.save_state.lock();
        let catch_up_required = match *state {
            SaveState::Saving => {
                *state = SaveState::Idle;
                false
            }
            SaveState::Waiting => {
                *state = SaveState::IdleWaiter;
                true
            }
            other => {
                error!("finishSaving called from unexpected save state"; "state" => %other);
                false
            }
        };
        self.save_cond.notify_all();
        catch_up_required
    }

    /// Records the world-age at which a save actually completed; called by
    /// the saver right after [`Region::finish_saving`] with the tick count
    /// that was current when the document was built.
    pub fn record_saved_at(&self, world_age_ticks: u64) {
        self.last_saved.store(world_age_ticks, Ordering::Release);
    }

    /// Blocks the calling thread until `save_state == IDLE`.
    pub fn wait_until_saved(&self) {
        let mut state = self.save_state.lock();
        while !matches!(*state, SaveState::Idle) {
            self.save_cond.wait(&mut state);
        }
    }

    // --- anchoring & residency -----------------------------------------------

    /// Returns the new anchor count, and whether this call just transitioned
    /// the region from unanchored to anchored (in which case neighbours'
    /// `activeNeighbours` must be recomputed by the caller).
    pub fn anchor_slice(&self) -> (u32, bool) {
        let prev = self.anchored_slices.fetch_add(1, Ordering::AcqRel);
        if prev == 0 {
            self.ticks_to_unload.store(-1, Ordering::Release);
        }
        (prev + 1, prev == 0)
    }

    /// Returns the new anchor count, and whether this call just transitioned
    /// the region to fully unanchored.
    pub fn deanchor_slice(&self) -> (u32, bool) {
        let prev = self.anchored_slices.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "anchored_slices underflowed");
        (prev.saturating_sub(1), prev == 1)
    }

    pub fn set_active_neighbours(&self, count: u32) {
        self.active_neighbours.store(count, Ordering::Release);
    }

    /// The full eviction precondition: unanchored, no anchored neighbour,
    /// the unload grace countdown exhausted, prepared, and not mid-save.
    pub fn eviction_eligible(&self) -> bool {
        self.anchored_slices() == 0
            && self.active_neighbours() == 0
            && self.ticks_to_unload() == 0
            && self.lifecycle() == LifecycleState::Prepared
            && matches!(self.save_state(), SaveState::Idle)
    }

    // --- structure queue --------------------------------------------------

    pub fn enqueue_structure(&self, structure: QueuedStructure) {
        // unbounded channel, send only fails if every receiver was dropped,
        // which can't happen while the owning region is alive
        let _ = self.structures_tx.send(structure);
    }

    fn drain_structures(&self) -> Vec<QueuedStructure> {
        self.structures_rx.try_iter().collect()
    }

    pub fn has_queued_structures(&self) -> bool {
        !self.structures_rx.is_empty()
    }

    /// Non-destructively snapshots the currently queued structures, for the
    /// saver: drains and immediately re-enqueues them, so a structure that
    /// hasn't been implanted yet still survives a save taken mid-queue.
    pub fn queued_structures_snapshot(&self) -> Vec<QueuedStructure> {
        let drained = self.drain_structures();
        for structure in &drained {
            self.enqueue_structure(structure.clone());
        }
        drained
    }

    // --- entities -----------------------------------------------------------

    pub fn add_entity(&self, entity: EntityRecord) {
        self.entities.lock().push(entity);
    }

    pub fn entities(&self) -> Vec<EntityRecord> {
        self.entities.lock().clone()
    }

    pub fn set_entities(&self, entities: Vec<EntityRecord>) {
        *self.entities.lock() = entities;
    }

    // --- slices -----------------------------------------------------------

    pub fn slice(&self, pos: SlicePoint) -> &common::parking_lot::RwLock<Slice> {
        &self.slices[pos.index()]
    }

    pub fn slices(&self) -> &[common::parking_lot::RwLock<Slice>] {
        &self.slices
    }

    // --- per-tick update ------------------------------------------------------

    /// Runs this region's share of the per-tick residency policy. Everything
    /// here, including structure implantation, is gated on `PREPARED` — a
    /// region that hasn't finished loading or generating has no slices worth
    /// touching yet.
    pub fn update(&self, ctx: &UpdateContext) -> RegionUpdateOutcome {
        if self.lifecycle() != LifecycleState::Prepared {
            return RegionUpdateOutcome::default();
        }

        let anchored = self.anchored_slices();
        if anchored > 0 {
            self.ticks_to_unload.store(-1, Ordering::Release);
            self.tick_tile(ctx.tile_tick);
            self.implant_structures(ctx.structure_apply);

            let stagger = ctx.save_stagger_seconds.max(1);
            let bucket = self.coord.save_stagger_bucket();
            let elapsed_seconds = ctx.world_age_ticks / u64::from(ctx.tps.max(1));
            let save_requested = elapsed_seconds % u64::from(stagger) == u64::from(bucket);

            RegionUpdateOutcome {
                save_requested,
                eviction_eligible: false,
            }
        } else {
            let cur = self.ticks_to_unload();
            if cur > 0 {
                self.ticks_to_unload.fetch_sub(1, Ordering::AcqRel);
            } else if cur == -1 {
                self.ticks_to_unload
                    .store(ctx.unload_grace_ticks, Ordering::Release);
            }
            // cur == 0 falls through: eligible this tick

            RegionUpdateOutcome {
                save_requested: false,
                eviction_eligible: self.eviction_eligible(),
            }
        }
    }

    fn tick_tile(&self, hook: &dyn TileTickHook) {
        let mut rng = common::random::get();
        let slice = SlicePoint(rng.gen_range(0, R), rng.gen_range(0, R));
        let tile = SliceBlock(
            rng.gen_range(0, crate::coord::S),
            rng.gen_range(0, crate::coord::S),
        );
        drop(rng);
        hook.tick_tile(self.coord, slice, tile);
    }

    fn implant_structures(&self, hook: &dyn StructureApplyHook) {
        for structure in self.drain_structures() {
            trace!("implanting structure"; "region" => self.coord, "name" => &structure.name);
            hook.apply_structure(self.coord, &structure);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region() -> Region {
        Region::new(RegionPoint(0, 0))
    }

    #[test]
    fn lifecycle_happy_path_with_generation() {
        let r = region();
        assert_eq!(r.lifecycle(), LifecycleState::New);

        assert!(r.load_permit());
        assert!(!r.load_permit(), "second load permit must fail");
        assert_eq!(r.lifecycle(), LifecycleState::Loading);

        r.set_loaded(false, false);
        assert_eq!(r.lifecycle(), LifecycleState::Loading);

        assert!(r.generation_permit());
        assert!(!r.generation_permit(), "second generation permit must fail");
        assert_eq!(r.lifecycle(), LifecycleState::Generating);

        assert!(r.set_generated());
        assert!(!r.set_generated(), "double setGenerated must be rejected");
        assert_eq!(r.lifecycle(), LifecycleState::Prepared);
        assert!(r.is_generated());
    }

    #[test]
    fn loaded_generated_region_with_no_structures_shortcuts_to_prepared() {
        let r = region();
        assert!(r.load_permit());
        r.set_loaded(true, false);
        assert_eq!(r.lifecycle(), LifecycleState::Prepared);
        assert!(r.is_generated());
    }

    #[test]
    fn loaded_generated_region_with_structures_waits_for_generator() {
        let r = region();
        assert!(r.load_permit());
        r.set_loaded(true, true);
        assert_eq!(r.lifecycle(), LifecycleState::Loading);
        assert!(r.is_generated());

        assert!(r.generation_permit());
        assert!(r.set_generated());
        assert_eq!(r.lifecycle(), LifecycleState::Prepared);
    }

    #[test]
    fn save_state_machine_coalesces_concurrent_requests() {
        let r = region();
        assert!(r.get_save_permit());
        assert_eq!(r.save_state(), SaveState::Saving);

        // concurrent callers are coalesced
        assert!(!r.get_save_permit());
        assert!(!r.get_save_permit());
        assert_eq!(r.save_state(), SaveState::Waiting);

        // first save finishes, sees a catch-up was requested
        assert!(r.finish_saving());
        assert_eq!(r.save_state(), SaveState::IdleWaiter);

        // catch-up save is granted
        assert!(r.get_save_permit());
        assert_eq!(r.save_state(), SaveState::Saving);
        assert!(!r.finish_saving());
        assert_eq!(r.save_state(), SaveState::Idle);
    }

    #[test]
    fn anchor_count_never_goes_negative_and_reports_edges() {
        let r = region();
        let (count, became_anchored) = r.anchor_slice();
        assert_eq!(count, 1);
        assert!(became_anchored);
        assert_eq!(r.ticks_to_unload(), -1);

        let (count, became_anchored) = r.anchor_slice();
        assert_eq!(count, 2);
        assert!(!became_anchored);

        let (count, became_unanchored) = r.deanchor_slice();
        assert_eq!(count, 1);
        assert!(!became_unanchored);

        let (count, became_unanchored) = r.deanchor_slice();
        assert_eq!(count, 0);
        assert!(became_unanchored);
    }

    #[test]
    fn unload_grace_counts_down_then_becomes_eligible() {
        let r = region();
        assert!(r.load_permit());
        r.set_loaded(true, false);
        assert_eq!(r.lifecycle(), LifecycleState::Prepared);

        let ctx = UpdateContext {
            world_age_ticks: 0,
            tps: 60,
            save_stagger_seconds: 64,
            unload_grace_ticks: 3,
            tile_tick: &(),
            structure_apply: &(),
        };

        // never anchored, so ticks_to_unload starts at -1 and this first
        // update arms the countdown
        let outcome = r.update(&ctx);
        assert!(!outcome.eviction_eligible);
        assert_eq!(r.ticks_to_unload(), 3);

        r.update(&ctx);
        assert_eq!(r.ticks_to_unload(), 2);
        r.update(&ctx);
        assert_eq!(r.ticks_to_unload(), 1);
        let outcome = r.update(&ctx);
        assert_eq!(r.ticks_to_unload(), 0);
        assert!(outcome.eviction_eligible);
    }

    #[test]
    fn anchored_region_blocks_eviction_regardless_of_countdown() {
        let r = region();
        assert!(r.load_permit());
        r.set_loaded(true, false);
        r.anchor_slice();

        let ctx = UpdateContext {
            world_age_ticks: 0,
            tps: 60,
            save_stagger_seconds: 64,
            unload_grace_ticks: 3,
            tile_tick: &(),
            structure_apply: &(),
        };
        let outcome = r.update(&ctx);
        assert!(!outcome.eviction_eligible);
        assert_eq!(r.ticks_to_unload(), -1);
    }

    #[test]
    fn structures_enqueue_and_drain_once() {
        let r = region();
        r.enqueue_structure(QueuedStructure {
            name: "hut".to_owned(),
            slice_x: 1,
            slice_y: 2,
            tile_x: 3,
            tile_y: 4,
            offset_x: 0,
            offset_y: 0,
        });
        assert!(r.has_queued_structures());
        assert_eq!(r.drain_structures().len(), 1);
        assert!(!r.has_queued_structures());
    }

    struct RecordingApplyHook(std::sync::Mutex<Vec<(RegionPoint, String)>>);

    impl StructureApplyHook for RecordingApplyHook {
        fn apply_structure(&self, region: RegionPoint, structure: &QueuedStructure) {
            self.0.lock().unwrap().push((region, structure.name.clone()));
        }
    }

    #[test]
    fn anchored_tick_drains_and_applies_queued_structures() {
        let r = region();
        assert!(r.load_permit());
        r.set_loaded(true, false);
        r.anchor_slice();
        r.enqueue_structure(QueuedStructure {
            name: "hut".to_owned(),
            slice_x: 0,
            slice_y: 0,
            tile_x: 0,
            tile_y: 0,
            offset_x: 0,
            offset_y: 0,
        });

        let hook = RecordingApplyHook(std::sync::Mutex::new(Vec::new()));
        let ctx = UpdateContext {
            world_age_ticks: 0,
            tps: 60,
            save_stagger_seconds: 64,
            unload_grace_ticks: 3,
            tile_tick: &(),
            structure_apply: &hook,
        };

        r.update(&ctx);

        assert!(!r.has_queued_structures(), "structure must be drained");
        let applied = hook.0.lock().unwrap();
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0], (r.coord(), "hut".to_owned()));
    }
}
