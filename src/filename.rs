//! Turning untrusted client filenames into safe, unique paths inside the save directory.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::TempPath;

use crate::utils::compact_timestamp;

/// longest name (in bytes) we are willing to write
pub const MAX_NAME_LEN: usize = 200;

/// how many `name (N).ext` variants are tried before the timestamp fallback
pub const MAX_COLLISION_PROBES: u32 = 9999;

/// make a client-supplied filename safe to use as a single path component
pub fn sanitize_filename(raw: &str) -> String {
    // only the final segment survives, on either separator style
    let trimmed = raw.trim_end_matches(['/', '\\']);
    let base = trimmed.rsplit(['/', '\\']).next().unwrap_or_default();

    let replaced: String = base
        .chars()
        .filter(|c| *c != '\0')
        .map(|c| if is_forbidden(c) { '_' } else { c })
        .collect();

    let name = replaced.trim_matches(['.', ' ']);
    if name.is_empty() {
        return format!("upload_{}", compact_timestamp());
    }

    truncate_name(name)
}

/// same as [`sanitize_filename`] for names that arrive as raw bytes
pub fn sanitize_filename_bytes(raw: &[u8]) -> String {
    let mut decoded = String::with_capacity(raw.len());
    for chunk in raw.utf8_chunks() {
        decoded.push_str(chunk.valid());
        if !chunk.invalid().is_empty() {
            decoded.push('_');
        }
    }
    sanitize_filename(&decoded)
}

fn is_forbidden(c: char) -> bool {
    matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*') || c < '\u{20}'
}

// cut the base name, never the extension
fn truncate_name(name: &str) -> String {
    if name.len() <= MAX_NAME_LEN {
        return name.to_string();
    }

    let (base, ext) = split_extension(name);
    if ext.len() >= MAX_NAME_LEN {
        let cut = floor_char_boundary(name, MAX_NAME_LEN);
        return name[..cut].trim_end_matches(['.', ' ']).to_string();
    }

    let cut = floor_char_boundary(base, MAX_NAME_LEN - ext.len());
    format!("{}{}", &base[..cut], ext)
}

fn floor_char_boundary(s: &str, max: usize) -> usize {
    if max >= s.len() {
        return s.len();
    }
    (0..=max).rev().find(|i| s.is_char_boundary(*i)).unwrap_or(0)
}

/// split `photo.tar.gz` into (`photo.tar`, `.gz`); the extension keeps its dot
pub fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) => name.split_at(idx),
        None => (name, ""),
    }
}

/// lower-cased extension including the dot, empty when there is none
pub fn extension_lowercase(name: &str) -> String {
    split_extension(name).1.to_ascii_lowercase()
}

/// names to try for `name` in order: as-is, numbered variants, then a timestamped one
pub fn candidate_names(name: &str) -> impl Iterator<Item = String> + '_ {
    let (base, ext) = split_extension(name);
    std::iter::once(name.to_string())
        .chain((1..=MAX_COLLISION_PROBES).map(move |i| format!("{} ({}){}", base, i, ext)))
        .chain(std::iter::once_with(move || {
            format!("{}_{}{}", base, compact_timestamp(), ext)
        }))
}

/// first candidate path that does not exist right now.
///
/// This is a point-in-time answer; writers should prefer [`write_unique`] or
/// [`persist_unique`], which claim the name atomically.
pub fn resolve_unique_path(dir: &Path, name: &str) -> PathBuf {
    let mut last = None;
    for candidate in candidate_names(name) {
        let path = dir.join(candidate);
        if matches!(path.try_exists(), Ok(false)) {
            return path;
        }
        last = Some(path);
    }
    // every numbered name was taken; the timestamped name is the best we have
    last.unwrap_or_else(|| dir.join(name))
}

// walks the candidates, claiming each with an exclusive create
fn claim_unique<F>(dir: &Path, name: &str, mut claim: F) -> io::Result<PathBuf>
where
    F: FnMut(&Path) -> io::Result<()>,
{
    for candidate in candidate_names(name) {
        let path = dir.join(candidate);
        match claim(&path) {
            Ok(()) => return Ok(path),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                tracing::trace!("Name taken, trying next: {:?}", path);
            }
            Err(e) => return Err(e),
        }
    }

    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free name left for {}", name),
    ))
}

/// write `data` under a fresh unique name in `dir`, never replacing an existing file
pub fn write_unique(dir: &Path, name: &str, data: &[u8]) -> io::Result<PathBuf> {
    claim_unique(dir, name, |path| {
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        if let Err(e) = file.write_all(data).and_then(|_| file.sync_all()) {
            drop(file);
            let _ = std::fs::remove_file(path);
            return Err(e);
        }
        Ok(())
    })
}

/// move a spooled temporary file to a fresh unique name in `dir`
pub fn persist_unique(dir: &Path, name: &str, temp: TempPath) -> io::Result<PathBuf> {
    let mut temp = Some(temp);
    claim_unique(dir, name, |path| {
        let Some(current) = temp.take() else {
            return Err(io::Error::other("temporary file already consumed"));
        };
        match current.persist_noclobber(path) {
            Ok(()) => Ok(()),
            Err(e) => {
                temp = Some(e.path);
                Err(e.error)
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_directories() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("/etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\Users\\me\\photo.jpg"), "photo.jpg");
        assert_eq!(sanitize_filename("dir/sub/"), "sub");
    }

    #[test]
    fn replaces_reserved_characters() {
        assert_eq!(sanitize_filename("a<b>c:d\"e|f?g*h.txt"), "a_b_c_d_e_f_g_h.txt");
        assert_eq!(sanitize_filename("tab\there.txt"), "tab_here.txt");
        assert_eq!(sanitize_filename("nul\0byte.txt"), "nulbyte.txt");
    }

    #[test]
    fn trims_dots_and_spaces() {
        assert_eq!(sanitize_filename("  .hidden. "), "hidden");
        assert_eq!(sanitize_filename("report.pdf..."), "report.pdf");
    }

    #[test]
    fn empty_names_get_generated() {
        for raw in ["", "..", "/", " . "] {
            let name = sanitize_filename(raw);
            assert!(name.starts_with("upload_"), "{raw:?} -> {name}");
            assert_eq!(name.len(), "upload_20240101_120000".len());
        }
    }

    #[test]
    fn invalid_utf8_becomes_underscore() {
        assert_eq!(sanitize_filename_bytes(b"caf\xff.txt"), "caf_.txt");
    }

    #[test]
    fn long_names_keep_extension() {
        let raw = format!("{}.jpeg", "a".repeat(300));
        let name = sanitize_filename(&raw);
        assert_eq!(name.len(), MAX_NAME_LEN);
        assert!(name.ends_with(".jpeg"));
    }

    #[test]
    fn long_multibyte_names_cut_on_char_boundary() {
        let raw = format!("{}.png", "写".repeat(100));
        let name = sanitize_filename(&raw);
        assert!(name.len() <= MAX_NAME_LEN);
        assert!(name.ends_with(".png"));
        assert!(name.starts_with('写'));
    }

    #[test]
    fn sanitize_is_idempotent() {
        let inputs = [
            "../../etc/passwd",
            "  ..weird..name.. ",
            "a<b>c.txt",
            "",
            "x/y\\z",
            "\u{1}\u{2}",
            "photo .jpg",
        ];
        let long = format!("{}.{}", "b".repeat(150), "c".repeat(260));
        for raw in inputs.iter().copied().chain(std::iter::once(long.as_str())) {
            let once = sanitize_filename(raw);
            if once.starts_with("upload_") {
                continue;
            }
            assert_eq!(sanitize_filename(&once), once, "input {raw:?}");
        }
    }

    #[test]
    fn resolve_returns_name_when_free() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(resolve_unique_path(dir.path(), "a.txt"), dir.path().join("a.txt"));
    }

    #[test]
    fn resolve_numbers_collisions() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"1").unwrap();
        assert_eq!(
            resolve_unique_path(dir.path(), "a.txt"),
            dir.path().join("a (1).txt")
        );

        std::fs::write(dir.path().join("a (1).txt"), b"2").unwrap();
        std::fs::write(dir.path().join("a (2).txt"), b"3").unwrap();
        assert_eq!(
            resolve_unique_path(dir.path(), "a.txt"),
            dir.path().join("a (3).txt")
        );
    }

    #[test]
    fn candidates_end_with_timestamp_fallback() {
        let all: Vec<String> = candidate_names("a.txt").collect();
        assert_eq!(all.len(), MAX_COLLISION_PROBES as usize + 2);
        assert_eq!(all[1], "a (1).txt");
        assert_eq!(all[9999], "a (9999).txt");
        assert!(all[10000].starts_with("a_") && all[10000].ends_with(".txt"));
    }

    #[test]
    fn write_unique_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let first = write_unique(dir.path(), "n.bin", b"first").unwrap();
        let second = write_unique(dir.path(), "n.bin", b"second").unwrap();

        assert_eq!(first, dir.path().join("n.bin"));
        assert_eq!(second, dir.path().join("n (1).bin"));
        assert_eq!(std::fs::read(first).unwrap(), b"first");
        assert_eq!(std::fs::read(second).unwrap(), b"second");
    }

    #[test]
    fn persist_unique_moves_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("big.iso"), b"old").unwrap();

        let mut temp = tempfile::NamedTempFile::new_in(dir.path()).unwrap();
        temp.write_all(b"new").unwrap();
        let spooled = temp.into_temp_path();
        let spooled_at = spooled.to_path_buf();

        let dest = persist_unique(dir.path(), "big.iso", spooled).unwrap();
        assert_eq!(dest, dir.path().join("big (1).iso"));
        assert_eq!(std::fs::read(&dest).unwrap(), b"new");
        assert_eq!(std::fs::read(dir.path().join("big.iso")).unwrap(), b"old");
        assert!(!spooled_at.exists());
    }
}
