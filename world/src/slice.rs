//! A slice is a dense `S`x`S` grid of tiles, walls and light levels, plus a
//! sparse map of tile-entity blobs for the handful of tiles that carry one.

use std::collections::HashMap;

use grid::grid_declare;

use crate::coord::{SliceBlock, S};
use crate::document::DocValue;

pub type TileId = u16;
pub type WallId = u16;
pub type Light = u8;

grid_declare!(pub struct TileGrid<TileGridImpl, TileId>, S as usize, S as usize, 1);
grid_declare!(pub struct WallGrid<WallGridImpl, WallId>, S as usize, S as usize, 1);
grid_declare!(pub struct LightGrid<LightGridImpl, Light>, S as usize, S as usize, 1);

pub struct Slice {
    tiles: TileGrid,
    walls: WallGrid,
    light: LightGrid,
    tile_entities: HashMap<SliceBlock, DocValue>,
}

impl Default for Slice {
    fn default() -> Self {
        Self {
            tiles: TileGrid::default(),
            walls: WallGrid::default(),
            light: LightGrid::default(),
            tile_entities: HashMap::new(),
        }
    }
}

impl Slice {
    pub fn tile(&self, pos: SliceBlock) -> TileId {
        self.tiles[pos.index()]
    }

    pub fn set_tile(&mut self, pos: SliceBlock, tile: TileId) {
        self.tiles[pos.index()] = tile;
    }

    pub fn wall(&self, pos: SliceBlock) -> WallId {
        self.walls[pos.index()]
    }

    pub fn set_wall(&mut self, pos: SliceBlock, wall: WallId) {
        self.walls[pos.index()] = wall;
    }

    pub fn light(&self, pos: SliceBlock) -> Light {
        self.light[pos.index()]
    }

    pub fn set_light(&mut self, pos: SliceBlock, light: Light) {
        self.light[pos.index()] = light;
    }

    pub fn tile_entity(&self, pos: SliceBlock) -> Option<&DocValue> {
        self.tile_entities.get(&pos)
    }

    pub fn set_tile_entity(&mut self, pos: SliceBlock, entity: DocValue) {
        self.tile_entities.insert(pos, entity);
    }

    pub fn remove_tile_entity(&mut self, pos: SliceBlock) -> Option<DocValue> {
        self.tile_entities.remove(&pos)
    }

    pub fn tile_entities(&self) -> impl Iterator<Item = (SliceBlock, &DocValue)> {
        self.tile_entities.iter().map(|(&k, v)| (k, v))
    }

    pub fn fill_tiles(&mut self, tile: TileId) {
        for i in 0..TileGrid::FULL_SIZE {
            self.tiles[i] = tile;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiles_default_to_zero() {
        let slice = Slice::default();
        assert_eq!(slice.tile(SliceBlock(0, 0)), 0);
        assert_eq!(slice.tile(SliceBlock(S - 1, S - 1)), 0);
    }

    #[test]
    fn set_and_get_tile() {
        let mut slice = Slice::default();
        slice.set_tile(SliceBlock(4, 9), 42);
        assert_eq!(slice.tile(SliceBlock(4, 9)), 42);
        assert_eq!(slice.tile(SliceBlock(4, 8)), 0);
    }

    #[test]
    fn fill_tiles_sets_every_cell() {
        let mut slice = Slice::default();
        slice.fill_tiles(7);
        for y in 0..S {
            for x in 0..S {
                assert_eq!(slice.tile(SliceBlock(x, y)), 7);
            }
        }
    }

    #[test]
    fn tile_entities_are_sparse() {
        let mut slice = Slice::default();
        assert!(slice.tile_entity(SliceBlock(1, 1)).is_none());

        slice.set_tile_entity(SliceBlock(1, 1), DocValue::Bool(true));
        assert_eq!(slice.tile_entity(SliceBlock(1, 1)), Some(&DocValue::Bool(true)));
        assert!(slice.tile_entity(SliceBlock(2, 2)).is_none());

        assert_eq!(
            slice.remove_tile_entity(SliceBlock(1, 1)),
            Some(DocValue::Bool(true))
        );
        assert!(slice.tile_entity(SliceBlock(1, 1)).is_none());
    }
}
