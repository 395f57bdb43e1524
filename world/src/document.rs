//! The opaque "tagged binary document" region files are read from and
//! written to. The tag grammar itself is deliberately uninteresting — a flat
//! string-keyed map of a handful of scalar/collection variants — since
//! nothing above this boundary interprets a document's contents beyond a
//! fixed set of top-level keys (`generated`, `slices`, `tileEntities`,
//! `entities`, `structures`). Only the on-disk encoding (gzip-compressed RON)
//! and the safe-write discipline are fixed.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read as IoRead, Write as IoWrite};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

use crate::error::DocumentError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DocValue {
    Bool(bool),
    I64(i64),
    U64(u64),
    F64(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<DocValue>),
    Map(BTreeMap<String, DocValue>),
}

impl DocValue {
    pub fn as_map(&self) -> Option<&BTreeMap<String, DocValue>> {
        match self {
            DocValue::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            DocValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[DocValue]> {
        match self {
            DocValue::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            DocValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

/// A flat, string-keyed bag of [`DocValue`]s. Loader/saver steps only ever
/// see this trait, never the concrete codec, so the on-disk format can
/// change without touching step code.
pub trait Document {
    fn get(&self, key: &str) -> Option<&DocValue>;

    /// Object-safe insert; [`Document::insert`] is the ergonomic wrapper
    /// callers with a concrete, `Sized` document use instead.
    fn insert_owned(&mut self, key: String, value: DocValue) -> Option<DocValue>;

    fn remove(&mut self, key: &str) -> Option<DocValue>;
    fn keys(&self) -> Box<dyn Iterator<Item = &str> + '_>;

    fn require(&self, key: &'static str) -> Result<&DocValue, DocumentError> {
        self.get(key).ok_or(DocumentError::MissingKey(key))
    }

    fn insert(&mut self, key: impl Into<String>, value: DocValue) -> Option<DocValue>
    where
        Self: Sized,
    {
        self.insert_owned(key.into(), value)
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct GzRonDocument {
    fields: BTreeMap<String, DocValue>,
}

impl Document for GzRonDocument {
    fn get(&self, key: &str) -> Option<&DocValue> {
        self.fields.get(key)
    }

    fn insert_owned(&mut self, key: String, value: DocValue) -> Option<DocValue> {
        self.fields.insert(key, value)
    }

    fn remove(&mut self, key: &str) -> Option<DocValue> {
        self.fields.remove(key)
    }

    fn keys(&self) -> Box<dyn Iterator<Item = &str> + '_> {
        Box::new(self.fields.keys().map(String::as_str))
    }
}

impl GzRonDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self, DocumentError> {
        let file = File::open(path)?;
        let mut decoder = GzDecoder::new(file);
        let mut text = String::new();
        decoder.read_to_string(&mut text)?;
        let fields = ron::from_str(&text)?;
        Ok(Self { fields })
    }

    /// Serialises and gzips into a temp file beside `path`, then renames it
    /// into place. A crash or power loss mid-write leaves the previous
    /// version of `path` untouched.
    pub fn save(&self, path: &Path) -> Result<(), DocumentError> {
        let text = ron::to_string(&self.fields)?;

        let dir = path.parent().expect("region path should have a parent dir");
        std::fs::create_dir_all(dir)?;

        let tmp_path = tmp_path_for(path);
        {
            let file = File::create(&tmp_path)?;
            let mut encoder = GzEncoder::new(file, Compression::default());
            encoder.write_all(text.as_bytes())?;
            let file = encoder.finish()?;
            file.sync_all()?;
        }

        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .expect("region path should have a filename")
        .to_owned();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_through_disk() {
        let dir = tempdir();
        let path = dir.join("r_0_0.region");

        let mut doc = GzRonDocument::new();
        doc.insert("generated", DocValue::Bool(true));
        doc.insert("slices", DocValue::Bytes(vec![1, 2, 3, 4]));
        doc.save(&path).expect("save should succeed");

        let loaded = GzRonDocument::load(&path).expect("load should succeed");
        assert_eq!(loaded.get("generated"), Some(&DocValue::Bool(true)));
        assert_eq!(
            loaded.get("slices").and_then(DocValue::as_bytes),
            Some(&[1u8, 2, 3, 4][..])
        );

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn missing_key_is_an_error() {
        let doc = GzRonDocument::new();
        assert!(matches!(
            doc.require("generated"),
            Err(DocumentError::MissingKey("generated"))
        ));
    }

    #[test]
    fn save_leaves_no_tmp_file_behind() {
        let dir = tempdir();
        let path = dir.join("r_1_1.region");

        GzRonDocument::new().save(&path).unwrap();
        assert!(path.exists());
        assert!(!tmp_path_for(&path).exists());

        std::fs::remove_dir_all(dir).ok();
    }

    fn tempdir() -> PathBuf {
        use std::sync::atomic::{AtomicU32, Ordering};
        static COUNTER: AtomicU32 = AtomicU32::new(0);

        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut dir = std::env::temp_dir();
        dir.push(format!("world-doc-test-{}-{}", std::process::id(), n));
        dir
    }
}
