//! Filename sanitizer and path uniquification (spec §3 invariant, §8 properties
//! 5 and 6), grounded on `original_source/app/core/job/job.py::sanitize_folder`
//! and `original_source/app/core/rippers/other/linux.py::_unique_path`.

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

fn unsafe_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"[<>:"/\\|?*\x00-\x1F]+"#).expect("static regex"))
}

fn whitespace_run() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("static regex"))
}

/// Removes characters that are unsafe in a filename on any of the major
/// filesystems and collapses runs of whitespace, matching `sanitize_folder`.
/// Idempotent: `sanitize(sanitize(s)) == sanitize(s)`.
pub fn sanitize(name: &str) -> String {
    let stripped = unsafe_chars().replace_all(name, "");
    let collapsed = whitespace_run().replace_all(&stripped, " ");
    collapsed.trim().to_string()
}

/// Splits a filename into (stem, full suffix chain), e.g. `Disc.iso.zst` ->
/// (`Disc`, `.iso.zst`). Uniquification inserts `(n)` before the suffix
/// chain, never between individual suffixes.
fn split_suffix_chain(file_name: &str) -> (&str, &str) {
    match file_name.find('.') {
        Some(idx) if idx > 0 => file_name.split_at(idx),
        _ => (file_name, ""),
    }
}

/// Returns `path` unchanged if it does not exist; otherwise returns the first
/// `<stem> (n)<suffix chain>` that does not exist, starting at `n = 1`.
pub fn unique(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }

    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    let file_name = path.file_name().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
    let (stem, suffix_chain) = split_suffix_chain(&file_name);

    let mut n = 1u32;
    loop {
        let candidate = parent.join(format!("{stem} ({n}){suffix_chain}"));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn sanitize_strips_reserved_characters() {
        assert_eq!(sanitize(r#"My:Movie/Title?*"#), "MyMovieTitle");
    }

    #[test]
    fn sanitize_collapses_whitespace() {
        assert_eq!(sanitize("My    Movie   Title"), "My Movie Title");
    }

    #[test]
    fn sanitize_is_idempotent() {
        let once = sanitize(r#"We*ird: Name\\"#);
        assert_eq!(sanitize(&once), once);
    }

    #[test]
    fn unique_is_a_fixed_point_when_path_does_not_exist() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Disc.iso.zst");
        assert_eq!(unique(&path), path);
    }

    #[test]
    fn unique_inserts_n_before_full_suffix_chain() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Disc.iso.zst");
        std::fs::write(&path, b"x").unwrap();
        let next = unique(&path);
        assert_eq!(next, dir.path().join("Disc (1).iso.zst"));
    }

    #[test]
    fn unique_increments_past_existing_collisions() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("Disc.iso.zst"), b"x").unwrap();
        std::fs::write(dir.path().join("Disc (1).iso.zst"), b"x").unwrap();
        let next = unique(&dir.path().join("Disc.iso.zst"));
        assert_eq!(next, dir.path().join("Disc (2).iso.zst"));
    }
}
