//! Dump File Loading
//!
//! Opens a raw memory dump together with its maps file. The dump is
//! memory-mapped once and every mapping reads through a view of it.

use anyhow::{bail, Context, Result};
use heapscope::bytes::Backing;
use heapscope::{Mapping, MappingSource, SharedBytes};
use memmap2::Mmap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One line of a maps file
#[derive(Debug, Clone, PartialEq, Eq)]
struct MapsEntry {
    start: u64,
    end: u64,
    perms: String,
    path: Option<String>,
    /// Offset of the mapping bytes in the dump, if the maps file says so
    file_offset: Option<u64>,
}

/// Memory dump file with its mappings
pub struct DumpFile {
    mappings: Vec<Mapping>,
    /// Path to the dump file
    pub path: PathBuf,
}

impl DumpFile {
    /// Open a dump, reading regions from `<dump>.maps` unless `maps` is given
    pub fn open(path: &Path, maps: Option<&Path>) -> Result<Self> {
        let maps_path = maps
            .map(Path::to_path_buf)
            .unwrap_or_else(|| path.with_extension("maps"));
        if !maps_path.exists() {
            bail!("Maps file not found: {:?} (use --maps)", maps_path);
        }

        let file =
            File::open(path).with_context(|| format!("Failed to open dump file: {:?}", path))?;
        let mmap = unsafe { Mmap::map(&file) }
            .with_context(|| format!("Failed to mmap dump file: {:?}", path))?;
        let dump_len = mmap.len() as u64;

        let reader = BufReader::new(
            File::open(&maps_path)
                .with_context(|| format!("Failed to open maps file: {:?}", maps_path))?,
        );
        let entries = parse_maps(reader)?;

        let backing: Backing = Arc::new(mmap);
        let mappings = layout_mappings(&backing, &entries, dump_len);

        info!(
            "Opened dump file: {:?} ({} MB) with {} regions",
            path,
            dump_len / 1_000_000,
            mappings.len()
        );

        Ok(DumpFile {
            mappings,
            path: path.to_path_buf(),
        })
    }
}

impl MappingSource for DumpFile {
    fn mappings(&self) -> &[Mapping] {
        &self.mappings
    }
}

/// Place each region in the dump.
///
/// Regions with an explicit file offset read from there; the others are
/// assumed to be stored back to back in maps order.
fn layout_mappings(backing: &Backing, entries: &[MapsEntry], dump_len: u64) -> Vec<Mapping> {
    let mut mappings = Vec::with_capacity(entries.len());
    let mut next_offset = 0u64;

    for entry in entries {
        let size = entry.end.saturating_sub(entry.start);
        let offset = entry.file_offset.unwrap_or(next_offset);
        let end = match offset.checked_add(size) {
            Some(end) if end <= dump_len => end,
            _ => {
                warn!(
                    "Region {:#x}-{:#x} extends past end of dump, skipping",
                    entry.start, entry.end
                );
                next_offset = offset.saturating_add(size);
                continue;
            }
        };
        next_offset = end;

        let bytes = SharedBytes::window(Arc::clone(backing), offset as usize, end as usize);
        let mapping = Mapping::new(
            entry.start,
            entry.end,
            &entry.perms,
            entry.path.as_deref(),
            bytes,
        );
        debug!("mapping {} at file offset {:#x}", mapping, offset);
        mappings.push(mapping);
    }

    mappings
}

/// Parse a maps file (supports both /proc/pid/maps and custom dump format)
fn parse_maps<R: BufRead>(reader: R) -> Result<Vec<MapsEntry>> {
    let mut entries = Vec::new();

    for line in reader.lines() {
        let line = line?;
        let line = line.trim();

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let parts: Vec<&str> = line.split_whitespace().collect();

        if parts[0].starts_with("0x") {
            // Custom dump format: 0xSTART 0xEND SIZE FILE_OFFSET [PERMS] [PATH]
            if parts.len() < 4 {
                continue;
            }

            let start = parse_hex(parts[0])?;
            let end = parse_hex(parts[1])?;
            let file_offset = parse_hex(parts[3])?;

            check_range(start, end)?;
            entries.push(MapsEntry {
                start,
                end,
                perms: parts.get(4).unwrap_or(&"rw-p").to_string(),
                path: parts.get(5).map(|s| s.to_string()),
                file_offset: Some(file_offset),
            });
        } else {
            // Linux /proc/pid/maps format
            let Some((start, end)) = parts[0].split_once('-') else {
                continue;
            };
            let (start, end) = (parse_hex(start)?, parse_hex(end)?);
            check_range(start, end)?;

            entries.push(MapsEntry {
                start,
                end,
                perms: parts.get(1).unwrap_or(&"").to_string(),
                path: parts.get(5).map(|s| s.to_string()),
                file_offset: None,
            });
        }
    }

    Ok(entries)
}

fn check_range(start: u64, end: u64) -> Result<()> {
    if end < start {
        bail!("Region end {:#x} is below its start {:#x}", end, start);
    }
    Ok(())
}

fn parse_hex(s: &str) -> Result<u64> {
    u64::from_str_radix(s.trim_start_matches("0x"), 16)
        .with_context(|| format!("Invalid hex address in maps file: {}", s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_parse_proc_maps() {
        let maps = "\
55d4c0a00000-55d4c0a21000 rw-p 00000000 00:00 0          [heap]
7ffd5e1f0000-7ffd5e211000 rw-p 00000000 00:00 0          [stack]
7ffd5e3fa000-7ffd5e3fc000 r-xp 00000000 00:00 0          [vdso]
";
        let entries = parse_maps(Cursor::new(maps)).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].start, 0x55d4c0a00000);
        assert_eq!(entries[0].end, 0x55d4c0a21000);
        assert_eq!(entries[0].path.as_deref(), Some("[heap]"));
        assert_eq!(entries[2].perms, "r-xp");
        assert_eq!(entries[1].file_offset, None);
    }

    #[test]
    fn test_parse_custom_format() {
        let maps = "# start end size offset\n0x1000 0x2000 0x1000 0x40 rw-p [heap]\n";
        let entries = parse_maps(Cursor::new(maps)).unwrap();
        assert_eq!(
            entries,
            vec![MapsEntry {
                start: 0x1000,
                end: 0x2000,
                perms: "rw-p".to_string(),
                path: Some("[heap]".to_string()),
                file_offset: Some(0x40),
            }]
        );
    }

    #[test]
    fn test_parse_rejects_bad_hex() {
        assert!(parse_maps(Cursor::new("zzzz-1000 rw-p 0 0 0\n")).is_err());
    }

    #[test]
    fn test_parse_rejects_inverted_range() {
        assert!(parse_maps(Cursor::new("2000-1000 rw-p 0 0 0\n")).is_err());
        assert!(parse_maps(Cursor::new("0x2000 0x1000 0x0 0x0 rw-p\n")).is_err());
    }

    #[test]
    fn test_layout_skips_overflowing_offset() {
        let backing: Backing = Arc::new(vec![0u8; 0x100]);
        let entries = parse_maps(Cursor::new(
            "0x1000 0x2000 0x1000 0xfffffffffffff800 rw-p [heap]\n0x8000 0x8010 0x10 0x20 rw-p [stack]\n",
        ))
        .unwrap();
        let mappings = layout_mappings(&backing, &entries, 0x100);
        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings[0].start, 0x8000);
        assert_eq!(mappings[0].bytes().offsets(), (0x20, 0x30));
    }

    #[test]
    fn test_layout_back_to_back() {
        let backing: Backing = Arc::new((0u8..48).collect::<Vec<u8>>());
        let entries = vec![
            MapsEntry {
                start: 0x1000,
                end: 0x1010,
                perms: "rw-p".to_string(),
                path: Some("[heap]".to_string()),
                file_offset: None,
            },
            MapsEntry {
                start: 0x8000,
                end: 0x8020,
                perms: "rw-p".to_string(),
                path: Some("[stack]".to_string()),
                file_offset: None,
            },
            MapsEntry {
                start: 0x9000,
                end: 0xa000,
                perms: "r--p".to_string(),
                path: None,
                file_offset: None,
            },
        ];
        let mappings = layout_mappings(&backing, &entries, 48);
        assert_eq!(mappings.len(), 2);
        assert_eq!(mappings[0].bytes().get(0), Some(0));
        assert_eq!(mappings[1].bytes().get(0), Some(16));
        assert_eq!(mappings[1].bytes().len(), 32);
        assert!(mappings[0].bytes().shares_backing(mappings[1].bytes()));
    }

    #[test]
    fn test_open_dump_with_maps() {
        let dir = tempfile::tempdir().unwrap();
        let dump_path = dir.path().join("proc.dump");
        std::fs::write(&dump_path, vec![0xAB; 0x30]).unwrap();
        std::fs::write(
            dir.path().join("proc.maps"),
            "1000-1010 rw-p 00000000 00:00 0 [heap]\n7000-7020 rw-p 00000000 00:00 0 [stack]\n",
        )
        .unwrap();

        let dump = DumpFile::open(&dump_path, None).unwrap();
        assert_eq!(dump.mappings().len(), 2);
        assert_eq!(dump.heap().unwrap().start, 0x1000);
        assert_eq!(dump.stack().unwrap().bytes().to_vec(), vec![0xAB; 0x20]);
    }

    #[test]
    fn test_open_without_maps_fails() {
        let dir = tempfile::tempdir().unwrap();
        let dump_path = dir.path().join("proc.dump");
        std::fs::write(&dump_path, [0u8; 16]).unwrap();
        assert!(DumpFile::open(&dump_path, None).is_err());
    }
}
