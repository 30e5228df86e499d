//! Result Cache
//!
//! Persists derived integer sequences (pointer values, chunk addresses, ...)
//! next to a dump so later sessions can skip the scan. Each entry is a flat
//! file of native-endian words with no header; the element count is the file
//! size divided by the word size.

use byteorder::{NativeEndian, ReadBytesExt, WriteBytesExt};
use std::fs::{self, File};
use std::io::{BufWriter, Cursor, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{HeapError, Result};
use crate::walker::HeapWalker;
use crate::word::WordSize;

/// What a cache entry holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKind {
    /// Unique heap pointer values found in stack and heap
    PointerValues,
    /// Heap addresses holding a pointer
    HeapAddrs,
    /// Heap pointer values found on the stack
    StackValues,
    AlignedValues,
    UnalignedValues,
    /// User allocation addresses of one heap
    ChunkAddrs,
    /// User allocation sizes of one heap
    ChunkSizes,
}

impl CacheKind {
    pub fn tag(self) -> &'static str {
        match self {
            CacheKind::PointerValues => "heap+stack.pointers.values",
            CacheKind::HeapAddrs => "heap.pointers.offsets",
            CacheKind::StackValues => "stack.pointers.values",
            CacheKind::AlignedValues => "pointers.aligned",
            CacheKind::UnalignedValues => "pointers.not_aligned",
            CacheKind::ChunkAddrs => "malloc_chunks.addrs",
            CacheKind::ChunkSizes => "malloc_chunks.sizes",
        }
    }
}

/// Identifies one cache file within a dump's cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub kind: CacheKind,
    /// Start address of the region the entry was derived from
    pub region: Option<u64>,
}

impl CacheKey {
    pub fn new(kind: CacheKind) -> Self {
        Self { kind, region: None }
    }

    pub fn for_region(kind: CacheKind, start: u64) -> Self {
        Self {
            kind,
            region: Some(start),
        }
    }
}

/// Disk-backed cache of derived integer sequences for one dump
#[derive(Debug, Clone)]
pub struct ResultCache {
    dir: PathBuf,
    dump: String,
    word_size: WordSize,
}

impl ResultCache {
    pub fn new(dir: impl Into<PathBuf>, dump: impl Into<String>, word_size: WordSize) -> Self {
        Self {
            dir: dir.into(),
            dump: dump.into(),
            word_size,
        }
    }

    /// Cache keyed by the dump's file name
    pub fn for_dump(dir: impl Into<PathBuf>, dump_path: &Path, word_size: WordSize) -> Self {
        let dump = dump_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| dump_path.to_string_lossy().into_owned());
        Self::new(dir, dump, word_size)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn word_size(&self) -> WordSize {
        self.word_size
    }

    /// File holding the entry for `key`
    pub fn path_for(&self, key: CacheKey) -> PathBuf {
        let name = match key.region {
            Some(start) => format!("{}.{}.{:x}", self.dump, key.kind.tag(), start),
            None => format!("{}.{}", self.dump, key.kind.tag()),
        };
        self.dir.join(name)
    }

    pub fn contains(&self, key: CacheKey) -> bool {
        self.path_for(key).is_file()
    }

    /// Read an entry; `Ok(None)` is a cache miss
    pub fn read(&self, key: CacheKey) -> Result<Option<Vec<u64>>> {
        let path = self.path_for(key);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("cache miss: {}", path.display());
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let width = self.word_size.bytes();
        if data.len() % width != 0 {
            return Err(HeapError::CorruptCache {
                path,
                len: data.len() as u64,
                word_size: width,
            });
        }

        let count = data.len() / width;
        let mut reader = Cursor::new(data);
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            values.push(reader.read_uint::<NativeEndian>(width)?);
        }
        debug!("cache hit: {} ({} values)", path.display(), values.len());
        Ok(Some(values))
    }

    /// Write an entry, replacing any previous one
    pub fn write(&self, key: CacheKey, values: &[u64]) -> Result<()> {
        let width = self.word_size.bytes();
        if let Some(&value) = values.iter().find(|&&v| !self.word_size.fits(v)) {
            return Err(HeapError::ValueOutOfRange {
                value,
                word_size: width,
            });
        }

        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(key);
        let mut writer = BufWriter::new(File::create(&path)?);
        for &value in values {
            writer.write_uint::<NativeEndian>(value, width)?;
        }
        writer.flush()?;
        debug!("cache write: {} ({} values)", path.display(), values.len());
        Ok(())
    }

    /// Delete an entry; returns false if it did not exist
    pub fn remove(&self, key: CacheKey) -> Result<bool> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// User allocation addresses and sizes of one heap, from cache when present.
///
/// Malformed heaps are reported as errors and never cached. Cached lists of
/// unequal length are rebuilt.
pub fn cached_allocations(
    cache: &ResultCache,
    walker: &HeapWalker<'_>,
) -> Result<(Vec<u64>, Vec<u64>)> {
    let start = walker.mapping().start;
    let addrs_key = CacheKey::for_region(CacheKind::ChunkAddrs, start);
    let sizes_key = CacheKey::for_region(CacheKind::ChunkSizes, start);

    match (cache.read(addrs_key)?, cache.read(sizes_key)?) {
        (Some(addrs), Some(sizes)) if addrs.len() == sizes.len() => {
            info!(
                heap = format_args!("{:#x}", start),
                chunks = addrs.len(),
                "loaded allocations from cache"
            );
            return Ok((addrs, sizes));
        }
        (Some(addrs), Some(sizes)) => warn!(
            heap = format_args!("{:#x}", start),
            addrs = addrs.len(),
            sizes = sizes.len(),
            "cached allocation lists disagree in length, rebuilding"
        ),
        _ => {}
    }

    info!(heap = format_args!("{:#x}", start), "walking heap for allocations");
    let allocations = walker.get_user_allocations()?;
    let (addrs, sizes): (Vec<u64>, Vec<u64>) =
        allocations.iter().map(|c| (c.address, c.size)).unzip();
    cache.write(addrs_key, &addrs)?;
    cache.write(sizes_key, &sizes)?;
    info!(heap = format_args!("{:#x}", start), chunks = addrs.len(), "cached allocations");
    Ok((addrs, sizes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::tests::{build_heap, heap_mapping};
    use crate::allocator::LibcModel;
    use tempfile::tempdir;

    #[test]
    fn test_read_unwritten_key_is_miss() {
        let dir = tempdir().unwrap();
        let cache = ResultCache::new(dir.path(), "core.1234", WordSize::Eight);
        assert_eq!(cache.read(CacheKey::new(CacheKind::PointerValues)).unwrap(), None);
        assert!(!cache.contains(CacheKey::new(CacheKind::PointerValues)));
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempdir().unwrap();
        let cache = ResultCache::new(dir.path(), "core.1234", WordSize::Eight);
        let key = CacheKey::new(CacheKind::HeapAddrs);
        let values = vec![0, 1, 0x7fff_ffff_f000, u64::MAX];

        cache.write(key, &values).unwrap();
        assert_eq!(cache.read(key).unwrap(), Some(values));

        let len = fs::metadata(cache.path_for(key)).unwrap().len();
        assert_eq!(len, 32);
    }

    #[test]
    fn test_write_overwrites() {
        let dir = tempdir().unwrap();
        let cache = ResultCache::new(dir.path(), "core", WordSize::Four);
        let key = CacheKey::new(CacheKind::StackValues);
        cache.write(key, &[1, 2, 3, 4]).unwrap();
        cache.write(key, &[9]).unwrap();
        assert_eq!(cache.read(key).unwrap(), Some(vec![9]));
    }

    #[test]
    fn test_empty_sequence_is_hit() {
        let dir = tempdir().unwrap();
        let cache = ResultCache::new(dir.path(), "core", WordSize::Eight);
        let key = CacheKey::new(CacheKind::AlignedValues);
        cache.write(key, &[]).unwrap();
        assert_eq!(cache.read(key).unwrap(), Some(Vec::new()));
    }

    #[test]
    fn test_four_byte_words_reject_large_values() {
        let dir = tempdir().unwrap();
        let cache = ResultCache::new(dir.path(), "core", WordSize::Four);
        let key = CacheKey::new(CacheKind::PointerValues);
        let err = cache.write(key, &[0x1_0000_0000]).unwrap_err();
        assert!(matches!(err, HeapError::ValueOutOfRange { word_size: 4, .. }));
        assert!(!cache.contains(key));
    }

    #[test]
    fn test_region_keys_do_not_collide() {
        let dir = tempdir().unwrap();
        let cache = ResultCache::new(dir.path(), "core", WordSize::Eight);
        let a = CacheKey::for_region(CacheKind::ChunkAddrs, 0x55d0_0000_0000);
        let b = CacheKey::for_region(CacheKind::ChunkAddrs, 0x7f00_0000_0000);
        assert_ne!(cache.path_for(a), cache.path_for(b));

        cache.write(a, &[1]).unwrap();
        cache.write(b, &[2]).unwrap();
        assert_eq!(cache.read(a).unwrap(), Some(vec![1]));
        assert_eq!(cache.read(b).unwrap(), Some(vec![2]));
        assert!(cache.path_for(a).ends_with("core.malloc_chunks.addrs.55d000000000"));
    }

    #[test]
    fn test_corrupt_entry() {
        let dir = tempdir().unwrap();
        let cache = ResultCache::new(dir.path(), "core", WordSize::Eight);
        let key = CacheKey::new(CacheKind::PointerValues);
        fs::write(cache.path_for(key), [0u8; 12]).unwrap();
        assert!(matches!(
            cache.read(key),
            Err(HeapError::CorruptCache { len: 12, word_size: 8, .. })
        ));
    }

    #[test]
    fn test_remove() {
        let dir = tempdir().unwrap();
        let cache = ResultCache::new(dir.path(), "core", WordSize::Eight);
        let key = CacheKey::new(CacheKind::PointerValues);
        cache.write(key, &[1]).unwrap();
        assert!(cache.remove(key).unwrap());
        assert!(!cache.remove(key).unwrap());
        assert_eq!(cache.read(key).unwrap(), None);
    }

    #[test]
    fn test_for_dump_uses_file_name() {
        let cache = ResultCache::for_dump("/tmp/cache", Path::new("/dumps/firefox.core"), WordSize::Eight);
        assert_eq!(
            cache.path_for(CacheKey::new(CacheKind::StackValues)),
            PathBuf::from("/tmp/cache/firefox.core.stack.pointers.values")
        );
    }

    #[test]
    fn test_cached_allocations_round_trip() {
        let dir = tempdir().unwrap();
        let cache = ResultCache::new(dir.path(), "core", WordSize::Eight);
        let mapping = heap_mapping(0x1000, build_heap(&[(32, false), (48, true), (32, false)]), None);
        let model = LibcModel::new(WordSize::Eight);
        let walker = HeapWalker::new(&mapping, &model);

        let computed = cached_allocations(&cache, &walker).unwrap();
        assert_eq!(computed, (vec![0x1010, 0x1060], vec![16, 16]));
        assert!(cache.contains(CacheKey::for_region(CacheKind::ChunkAddrs, 0x1000)));

        // A fresh walker over garbage still gets the cached answer
        let garbage = heap_mapping(0x1000, vec![0xFF; 64], None);
        let walker = HeapWalker::new(&garbage, &model);
        assert_eq!(cached_allocations(&cache, &walker).unwrap(), computed);
    }

    #[test]
    fn test_cached_allocations_does_not_cache_malformed_heap() {
        let dir = tempdir().unwrap();
        let cache = ResultCache::new(dir.path(), "core", WordSize::Eight);
        let garbage = heap_mapping(0x1000, vec![0xFF; 64], None);
        let model = LibcModel::new(WordSize::Eight);
        let walker = HeapWalker::new(&garbage, &model);

        assert!(matches!(
            cached_allocations(&cache, &walker),
            Err(HeapError::MalformedHeap(_))
        ));
        assert!(!cache.contains(CacheKey::for_region(CacheKind::ChunkAddrs, 0x1000)));
    }

    #[test]
    fn test_cached_allocations_rebuilds_on_length_mismatch() {
        let dir = tempdir().unwrap();
        let cache = ResultCache::new(dir.path(), "core", WordSize::Eight);
        let mapping = heap_mapping(0x1000, build_heap(&[(32, false), (48, true), (32, false)]), None);
        let model = LibcModel::new(WordSize::Eight);
        let walker = HeapWalker::new(&mapping, &model);

        let sizes_key = CacheKey::for_region(CacheKind::ChunkSizes, 0x1000);
        cache.write(CacheKey::for_region(CacheKind::ChunkAddrs, 0x1000), &[0x1010, 0x1060]).unwrap();
        cache.write(sizes_key, &[16]).unwrap();

        let lists = cached_allocations(&cache, &walker).unwrap();
        assert_eq!(lists, (vec![0x1010, 0x1060], vec![16, 16]));
        assert_eq!(cache.read(sizes_key).unwrap(), Some(vec![16, 16]));
    }
}
