//! Persistent cache of generated combiner programs.
//!
//! The file stores WGSL rather than backend binaries: wgpu has no portable
//! program-binary surface, and reusing the WGSL still skips decode,
//! simplification and codegen on warm starts. The whole file is keyed by a
//! fingerprint of the enabled combiner features; any change invalidates it
//! wholesale. Load failures of any kind degrade to a cold cache.

use std::fs;
use std::io;
use std::path::PathBuf;

use hashbrown::HashMap;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::CombinerFeatures;

use super::key::CombinerKey;
use super::shader_gen::GeneratedCombiner;

pub const COMBINER_CACHE_MAGIC: &[u8; 8] = b"RLTYCOMB";
pub const COMBINER_CACHE_VERSION: u16 = 1;

#[derive(Debug, Error)]
pub enum DiskCacheError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid combiner cache magic")]
    InvalidMagic,

    #[error("unsupported combiner cache version {0}")]
    UnsupportedVersion(u16),

    #[error("combiner cache fingerprint mismatch")]
    FingerprintMismatch,

    #[error("corrupt combiner cache: {0}")]
    Corrupt(&'static str),

    #[error("lz4 decompression failed: {0}")]
    Lz4Decompress(#[from] lz4_flex::block::DecompressError),

    #[error("utf-8 decoding failed: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// One persisted program.
#[derive(Clone, Debug)]
pub struct DiskEntry {
    pub vertex_wgsl: String,
    pub fragment_wgsl: String,
    pub uses_texel0: bool,
    pub uses_texel1: bool,
}

/// Fingerprint of everything that changes generated output: format version
/// plus the enabled feature flags.
pub fn options_fingerprint(features: CombinerFeatures) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&COMBINER_CACHE_VERSION.to_le_bytes());
    hasher.update(&features.bits().to_le_bytes());
    *hasher.finalize().as_bytes()
}

pub struct CombinerDiskCache {
    path: PathBuf,
    fingerprint: [u8; 32],
    entries: HashMap<(u64, u32), DiskEntry>,
    dirty: bool,
}

impl CombinerDiskCache {
    /// Opens the cache at `path`, discarding it when missing, corrupt, or
    /// written with a different fingerprint.
    pub fn open(path: PathBuf, features: CombinerFeatures) -> Self {
        let fingerprint = options_fingerprint(features);
        let entries = match fs::read(&path) {
            Ok(bytes) => match parse(&bytes, &fingerprint) {
                Ok(entries) => {
                    debug!(count = entries.len(), path = %path.display(), "loaded combiner disk cache");
                    entries
                }
                Err(err) => {
                    warn!(%err, path = %path.display(), "discarding combiner disk cache");
                    HashMap::new()
                }
            },
            Err(err) if err.kind() == io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => {
                warn!(%err, path = %path.display(), "combiner disk cache unreadable");
                HashMap::new()
            }
        };
        Self {
            path,
            fingerprint,
            entries,
            dirty: false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &CombinerKey) -> Option<DiskEntry> {
        self.entries.get(&(key.mux(), key.mode_bits())).cloned()
    }

    pub fn insert(&mut self, key: &CombinerKey, generated: &GeneratedCombiner) {
        self.entries.insert(
            (key.mux(), key.mode_bits()),
            DiskEntry {
                vertex_wgsl: generated.vertex_wgsl.clone(),
                fragment_wgsl: generated.fragment_wgsl.clone(),
                uses_texel0: generated.uses_texel0,
                uses_texel1: generated.uses_texel1,
            },
        );
        self.dirty = true;
    }

    /// Writes the cache back out when anything was inserted since open/save.
    pub fn save(&mut self) -> Result<(), DiskCacheError> {
        if !self.dirty {
            return Ok(());
        }

        let mut out = Vec::new();
        out.extend_from_slice(COMBINER_CACHE_MAGIC);
        out.extend_from_slice(&COMBINER_CACHE_VERSION.to_le_bytes());
        out.extend_from_slice(&self.fingerprint);
        out.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());

        // Deterministic file contents regardless of hash iteration order.
        let mut keys: Vec<_> = self.entries.keys().copied().collect();
        keys.sort_unstable();
        for key in keys {
            let entry = &self.entries[&key];
            out.extend_from_slice(&key.0.to_le_bytes());
            out.extend_from_slice(&key.1.to_le_bytes());
            let flags = entry.uses_texel0 as u8 | ((entry.uses_texel1 as u8) << 1);
            out.push(flags);
            for wgsl in [&entry.vertex_wgsl, &entry.fragment_wgsl] {
                let compressed = lz4_flex::compress_prepend_size(wgsl.as_bytes());
                out.extend_from_slice(&(compressed.len() as u32).to_le_bytes());
                out.extend_from_slice(&compressed);
            }
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, &out)?;
        self.dirty = false;
        Ok(())
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], DiskCacheError> {
        let end = self
            .pos
            .checked_add(len)
            .ok_or(DiskCacheError::Corrupt("length overflow"))?;
        let slice = self
            .bytes
            .get(self.pos..end)
            .ok_or(DiskCacheError::Corrupt("truncated"))?;
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, DiskCacheError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, DiskCacheError> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> Result<u32, DiskCacheError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64, DiskCacheError> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }
}

fn parse(
    bytes: &[u8],
    fingerprint: &[u8; 32],
) -> Result<HashMap<(u64, u32), DiskEntry>, DiskCacheError> {
    let mut r = Reader { bytes, pos: 0 };

    if r.take(8)? != &COMBINER_CACHE_MAGIC[..] {
        return Err(DiskCacheError::InvalidMagic);
    }
    let version = r.u16()?;
    if version != COMBINER_CACHE_VERSION {
        return Err(DiskCacheError::UnsupportedVersion(version));
    }
    if r.take(32)? != &fingerprint[..] {
        return Err(DiskCacheError::FingerprintMismatch);
    }

    let count = r.u32()? as usize;
    let mut entries = HashMap::with_capacity(count);
    for _ in 0..count {
        let mux = r.u64()?;
        let mode_bits = r.u32()?;
        let flags = r.u8()?;
        let mut shaders = Vec::with_capacity(2);
        for _ in 0..2 {
            let compressed_len = r.u32()? as usize;
            let compressed = r.take(compressed_len)?;
            let raw = lz4_flex::decompress_size_prepended(compressed)?;
            shaders.push(String::from_utf8(raw)?);
        }
        let fragment_wgsl = shaders.pop().expect("two shaders pushed");
        let vertex_wgsl = shaders.pop().expect("two shaders pushed");
        entries.insert(
            (mux, mode_bits),
            DiskEntry {
                vertex_wgsl,
                fragment_wgsl,
                uses_texel0: flags & 1 != 0,
                uses_texel1: flags & 2 != 0,
            },
        );
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combine::key::{CycleMode, FilterMode, PrimitiveKind};

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "reality-rdp-disk-cache-{}-{}.bin",
            std::process::id(),
            name
        ))
    }

    fn sample_generated() -> GeneratedCombiner {
        GeneratedCombiner {
            vertex_wgsl: "@vertex fn vs_main() {}".to_string(),
            fragment_wgsl: "@fragment fn fs_main() {}".to_string(),
            uses_texel0: true,
            uses_texel1: false,
        }
    }

    fn sample_key() -> CombinerKey {
        CombinerKey::new(
            0x1234_5678_9abc_def0,
            CycleMode::Two,
            FilterMode::Bilinear,
            PrimitiveKind::Triangle,
        )
    }

    #[test]
    fn round_trip() {
        let path = temp_path("round-trip");
        let _ = fs::remove_file(&path);

        let mut cache = CombinerDiskCache::open(path.clone(), CombinerFeatures::default());
        assert!(cache.is_empty());
        cache.insert(&sample_key(), &sample_generated());
        cache.save().unwrap();

        let reloaded = CombinerDiskCache::open(path.clone(), CombinerFeatures::default());
        assert_eq!(reloaded.len(), 1);
        let entry = reloaded.get(&sample_key()).unwrap();
        assert_eq!(entry.vertex_wgsl, "@vertex fn vs_main() {}");
        assert!(entry.uses_texel0);
        assert!(!entry.uses_texel1);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn changed_features_invalidate_wholesale() {
        let path = temp_path("fingerprint");
        let _ = fs::remove_file(&path);

        let mut cache = CombinerDiskCache::open(path.clone(), CombinerFeatures::default());
        cache.insert(&sample_key(), &sample_generated());
        cache.save().unwrap();

        let reloaded = CombinerDiskCache::open(path.clone(), CombinerFeatures::empty());
        assert!(reloaded.is_empty());

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn corrupt_file_starts_cold() {
        let path = temp_path("corrupt");
        fs::write(&path, b"not a cache file at all").unwrap();
        let cache = CombinerDiskCache::open(path.clone(), CombinerFeatures::default());
        assert!(cache.is_empty());
        let _ = fs::remove_file(&path);
    }
}
