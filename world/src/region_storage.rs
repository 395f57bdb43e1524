//! The concrete [`LoaderStep`] that gives a region's on-disk document real
//! content: slice tiles/walls/light, sparse tile-entities, entities, and
//! any structure still sitting in the queue when the save was taken. The
//! `generated` flag alone (handled directly by [`crate::loader`]) says
//! nothing about what's actually in a region.

use std::collections::BTreeMap;

use crate::coord::{SliceBlock, SlicePoint, R, S};
use crate::document::{DocValue, Document};
use crate::error::LoaderStepError;
use crate::loader::LoaderStep;
use crate::region::{EntityRecord, QueuedStructure, Region};
use crate::slice::Slice;

pub struct RegionStorageStep;

impl LoaderStep for RegionStorageStep {
    fn name(&self) -> &'static str {
        "region_storage"
    }

    fn load(&self, region: &Region, doc: &dyn Document, _was_generated: bool) -> Result<(), LoaderStepError> {
        if let Some(DocValue::List(slices)) = doc.get("slices") {
            for entry in slices {
                let _ = load_slice(region, entry);
            }
        }

        if let Some(DocValue::List(tile_entities)) = doc.get("tileEntities") {
            for entry in tile_entities {
                let _ = load_tile_entity(region, entry);
            }
        }

        if let Some(DocValue::List(entities)) = doc.get("entities") {
            let records = entities.iter().filter_map(entity_from_value).collect();
            region.set_entities(records);
        }

        if let Some(DocValue::List(structures)) = doc.get("structures") {
            for entry in structures {
                if let Some(structure) = structure_from_value(entry) {
                    region.enqueue_structure(structure);
                }
            }
        }

        Ok(())
    }

    fn save(&self, region: &Region, doc: &mut dyn Document, _being_generated: bool) -> Result<(), LoaderStepError> {
        let mut slices = Vec::new();
        let mut tile_entities = Vec::new();
        for sy in 0..R {
            for sx in 0..R {
                let slice = region.slice(SlicePoint(sx, sy)).read();
                if !slice_is_default(&slice) {
                    slices.push(encode_slice(sx, sy, &slice));
                }
                for (block, value) in slice.tile_entities() {
                    tile_entities.push(encode_tile_entity(sx, sy, block, value));
                }
            }
        }
        doc.insert_owned("slices".to_owned(), DocValue::List(slices));
        doc.insert_owned("tileEntities".to_owned(), DocValue::List(tile_entities));

        let entities = region
            .entities()
            .into_iter()
            .map(entity_to_value)
            .collect();
        doc.insert_owned("entities".to_owned(), DocValue::List(entities));

        let structures = region
            .queued_structures_snapshot()
            .into_iter()
            .map(structure_to_value)
            .collect();
        doc.insert_owned("structures".to_owned(), DocValue::List(structures));

        Ok(())
    }
}

fn get_i64(map: &BTreeMap<String, DocValue>, key: &str) -> Option<i64> {
    match map.get(key) {
        Some(DocValue::I64(v)) => Some(*v),
        _ => None,
    }
}

fn load_slice(region: &Region, entry: &DocValue) -> Option<()> {
    let map = entry.as_map()?;
    let sx = get_i64(map, "sx")?;
    let sy = get_i64(map, "sy")?;
    let mut slice = region.slice(SlicePoint(sx as i32, sy as i32)).write();

    if let Some(DocValue::Bytes(tiles)) = map.get("tiles") {
        decode_u16_grid(tiles, |block, v| slice.set_tile(block, v));
    }
    if let Some(DocValue::Bytes(walls)) = map.get("walls") {
        decode_u16_grid(walls, |block, v| slice.set_wall(block, v));
    }
    if let Some(DocValue::Bytes(light)) = map.get("light") {
        decode_u8_grid(light, |block, v| slice.set_light(block, v));
    }
    Some(())
}

fn load_tile_entity(region: &Region, entry: &DocValue) -> Option<()> {
    let map = entry.as_map()?;
    let sx = get_i64(map, "sx")?;
    let sy = get_i64(map, "sy")?;
    let bx = get_i64(map, "bx")?;
    let by = get_i64(map, "by")?;
    let value = map.get("value")?.clone();
    region
        .slice(SlicePoint(sx as i32, sy as i32))
        .write()
        .set_tile_entity(SliceBlock(bx as i32, by as i32), value);
    Some(())
}

fn entity_from_value(entry: &DocValue) -> Option<EntityRecord> {
    let map = entry.as_map()?;
    let kind = map.get("kind").and_then(DocValue::as_str)?.to_owned();
    let payload = map.get("payload")?.clone();
    Some(EntityRecord { kind, payload })
}

fn entity_to_value(entity: EntityRecord) -> DocValue {
    let mut map = BTreeMap::new();
    map.insert("kind".to_owned(), DocValue::Str(entity.kind));
    map.insert("payload".to_owned(), entity.payload);
    DocValue::Map(map)
}

fn structure_from_value(entry: &DocValue) -> Option<QueuedStructure> {
    let map = entry.as_map()?;
    Some(QueuedStructure {
        name: map.get("name").and_then(DocValue::as_str)?.to_owned(),
        slice_x: get_i64(map, "sliceX")? as i32,
        slice_y: get_i64(map, "sliceY")? as i32,
        tile_x: get_i64(map, "tileX")? as i32,
        tile_y: get_i64(map, "tileY")? as i32,
        offset_x: get_i64(map, "offsetX")? as i32,
        offset_y: get_i64(map, "offsetY")? as i32,
    })
}

fn structure_to_value(structure: QueuedStructure) -> DocValue {
    let mut map = BTreeMap::new();
    map.insert("name".to_owned(), DocValue::Str(structure.name));
    map.insert("sliceX".to_owned(), DocValue::I64(structure.slice_x as i64));
    map.insert("sliceY".to_owned(), DocValue::I64(structure.slice_y as i64));
    map.insert("tileX".to_owned(), DocValue::I64(structure.tile_x as i64));
    map.insert("tileY".to_owned(), DocValue::I64(structure.tile_y as i64));
    map.insert("offsetX".to_owned(), DocValue::I64(structure.offset_x as i64));
    map.insert("offsetY".to_owned(), DocValue::I64(structure.offset_y as i64));
    DocValue::Map(map)
}

fn slice_is_default(slice: &Slice) -> bool {
    if slice.tile_entities().next().is_some() {
        return false;
    }
    for y in 0..S {
        for x in 0..S {
            let block = SliceBlock(x, y);
            if slice.tile(block) != 0 || slice.wall(block) != 0 || slice.light(block) != 0 {
                return false;
            }
        }
    }
    true
}

fn encode_slice(sx: i32, sy: i32, slice: &Slice) -> DocValue {
    let mut map = BTreeMap::new();
    map.insert("sx".to_owned(), DocValue::I64(sx as i64));
    map.insert("sy".to_owned(), DocValue::I64(sy as i64));
    map.insert("tiles".to_owned(), DocValue::Bytes(encode_u16_grid(slice, Slice::tile)));
    map.insert("walls".to_owned(), DocValue::Bytes(encode_u16_grid(slice, Slice::wall)));
    map.insert("light".to_owned(), DocValue::Bytes(encode_u8_grid(slice, Slice::light)));
    DocValue::Map(map)
}

fn encode_tile_entity(sx: i32, sy: i32, block: SliceBlock, value: &DocValue) -> DocValue {
    let mut map = BTreeMap::new();
    map.insert("sx".to_owned(), DocValue::I64(sx as i64));
    map.insert("sy".to_owned(), DocValue::I64(sy as i64));
    map.insert("bx".to_owned(), DocValue::I64(block.0 as i64));
    map.insert("by".to_owned(), DocValue::I64(block.1 as i64));
    map.insert("value".to_owned(), value.clone());
    DocValue::Map(map)
}

fn encode_u16_grid(slice: &Slice, get: impl Fn(&Slice, SliceBlock) -> u16) -> Vec<u8> {
    let mut bytes = Vec::with_capacity((S * S * 2) as usize);
    for y in 0..S {
        for x in 0..S {
            bytes.extend_from_slice(&get(slice, SliceBlock(x, y)).to_le_bytes());
        }
    }
    bytes
}

fn encode_u8_grid(slice: &Slice, get: impl Fn(&Slice, SliceBlock) -> u8) -> Vec<u8> {
    let mut bytes = Vec::with_capacity((S * S) as usize);
    for y in 0..S {
        for x in 0..S {
            bytes.push(get(slice, SliceBlock(x, y)));
        }
    }
    bytes
}

fn decode_u16_grid(bytes: &[u8], mut set: impl FnMut(SliceBlock, u16)) {
    let mut chunks = bytes.chunks_exact(2);
    for y in 0..S {
        for x in 0..S {
            match chunks.next() {
                Some(chunk) => set(SliceBlock(x, y), u16::from_le_bytes([chunk[0], chunk[1]])),
                None => return,
            }
        }
    }
}

fn decode_u8_grid(bytes: &[u8], mut set: impl FnMut(SliceBlock, u8)) {
    let mut iter = bytes.iter();
    for y in 0..S {
        for x in 0..S {
            match iter.next() {
                Some(&b) => set(SliceBlock(x, y), b),
                None => return,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::RegionPoint;
    use crate::document::GzRonDocument;

    #[test]
    fn slice_tiles_walls_and_light_round_trip() {
        let region = Region::new(RegionPoint(0, 0));
        region
            .slice(SlicePoint(2, 3))
            .write()
            .set_tile(SliceBlock(4, 5), 7);
        region
            .slice(SlicePoint(2, 3))
            .write()
            .set_wall(SliceBlock(4, 5), 9);
        region
            .slice(SlicePoint(2, 3))
            .write()
            .set_light(SliceBlock(4, 5), 3);

        let step = RegionStorageStep;
        let mut doc = GzRonDocument::new();
        step.save(&region, &mut doc, false).unwrap();

        let fresh = Region::new(RegionPoint(0, 0));
        step.load(&fresh, &doc, true).unwrap();

        assert_eq!(fresh.slice(SlicePoint(2, 3)).read().tile(SliceBlock(4, 5)), 7);
        assert_eq!(fresh.slice(SlicePoint(2, 3)).read().wall(SliceBlock(4, 5)), 9);
        assert_eq!(fresh.slice(SlicePoint(2, 3)).read().light(SliceBlock(4, 5)), 3);
        assert_eq!(fresh.slice(SlicePoint(0, 0)).read().tile(SliceBlock(0, 0)), 0);
    }

    #[test]
    fn default_slices_are_not_written() {
        let region = Region::new(RegionPoint(0, 0));
        let step = RegionStorageStep;
        let mut doc = GzRonDocument::new();
        step.save(&region, &mut doc, false).unwrap();

        match doc.get("slices") {
            Some(DocValue::List(slices)) => assert!(slices.is_empty()),
            other => panic!("expected an empty slices list, got {:?}", other),
        }
    }

    #[test]
    fn tile_entities_round_trip() {
        let region = Region::new(RegionPoint(0, 0));
        region
            .slice(SlicePoint(1, 1))
            .write()
            .set_tile_entity(SliceBlock(6, 6), DocValue::Str("furnace".to_owned()));

        let step = RegionStorageStep;
        let mut doc = GzRonDocument::new();
        step.save(&region, &mut doc, false).unwrap();

        let fresh = Region::new(RegionPoint(0, 0));
        step.load(&fresh, &doc, true).unwrap();

        assert_eq!(
            fresh.slice(SlicePoint(1, 1)).read().tile_entity(SliceBlock(6, 6)),
            Some(&DocValue::Str("furnace".to_owned()))
        );
    }

    #[test]
    fn entities_round_trip() {
        let region = Region::new(RegionPoint(0, 0));
        region.add_entity(EntityRecord {
            kind: "goblin".to_owned(),
            payload: DocValue::I64(42),
        });

        let step = RegionStorageStep;
        let mut doc = GzRonDocument::new();
        step.save(&region, &mut doc, false).unwrap();

        let fresh = Region::new(RegionPoint(0, 0));
        step.load(&fresh, &doc, true).unwrap();

        let entities = fresh.entities();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].kind, "goblin");
        assert_eq!(entities[0].payload, DocValue::I64(42));
    }

    #[test]
    fn queued_structures_survive_a_save_without_being_lost() {
        let region = Region::new(RegionPoint(0, 0));
        region.enqueue_structure(QueuedStructure {
            name: "tower".to_owned(),
            slice_x: 1,
            slice_y: 2,
            tile_x: 3,
            tile_y: 4,
            offset_x: 5,
            offset_y: 6,
        });

        let step = RegionStorageStep;
        let mut doc = GzRonDocument::new();
        step.save(&region, &mut doc, false).unwrap();

        // the save must not drain the live queue
        assert!(region.has_queued_structures());

        let fresh = Region::new(RegionPoint(0, 0));
        step.load(&fresh, &doc, true).unwrap();
        assert!(fresh.has_queued_structures());
    }
}
