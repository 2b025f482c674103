//! Extraction of coverage profiles from workflow artifact archives.
//!
//! CI uploads artifacts as zip archives. Entries are matched against the
//! conventional coverage file names (`*.out`, `*.cov`, `*coverage*.txt`);
//! entries that fail to parse are skipped with a log line, and an archive
//! with no parseable entries at all is an error.

use std::io::{Cursor, Read};

use tracing::warn;
use zip::ZipArchive;

use super::CoverageError;
use super::profile::{Profile, parse_profiles};

/// Returns true if an archive entry name looks like a coverage profile.
/// The name is expected in lower case.
fn is_coverage_entry(name: &str) -> bool {
    name.ends_with(".out")
        || name.ends_with(".cov")
        || (name.ends_with(".txt") && name.contains("coverage"))
}

/// Parses every coverage entry in a zip archive and concatenates the
/// results.
///
/// Fails with [`CoverageError::EmptyProfile`] on zero bytes, a zip error if
/// the container itself is unreadable, and [`CoverageError::NoProfiles`]
/// when no entry produced any profiles.
pub fn parse_profiles_from_zip(data: &[u8]) -> Result<Vec<Profile>, CoverageError> {
    if data.is_empty() {
        return Err(CoverageError::EmptyProfile);
    }

    let mut archive = ZipArchive::new(Cursor::new(data))?;
    let mut profiles: Vec<Profile> = Vec::new();

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        if entry.is_dir() {
            continue;
        }

        let name = entry.name().to_string();
        if !is_coverage_entry(&name.to_ascii_lowercase()) {
            continue;
        }

        let mut contents = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut contents)?;
        if contents.is_empty() {
            continue;
        }

        match parse_profiles(&contents) {
            Ok(parsed) => profiles.extend(parsed),
            Err(error) => {
                warn!(entry = %name, %error, "skipping unparseable coverage entry");
            }
        }
    }

    if profiles.is_empty() {
        return Err(CoverageError::NoProfiles);
    }

    Ok(profiles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::zip_bytes;

    #[test]
    fn entry_name_matching() {
        assert!(is_coverage_entry("coverage.out"));
        assert!(is_coverage_entry("unit.cov"));
        assert!(is_coverage_entry("coverage.txt"));
        assert!(is_coverage_entry("integration-coverage.txt"));
        assert!(!is_coverage_entry("report.html"));
        assert!(!is_coverage_entry("results.txt"));
        assert!(!is_coverage_entry("coverage.json"));
    }

    #[test]
    fn extracts_profiles_from_matching_entries() {
        let data = zip_bytes(&[
            ("coverage.out", "mode: set\nexample.com/pkg/a.go:1.1,3.2 1 1\n"),
            ("notes.md", "not coverage"),
            ("unit.cov", "mode: set\nexample.com/pkg/b.go:1.1,3.2 1 0\n"),
        ]);

        let profiles = parse_profiles_from_zip(&data).unwrap();

        assert_eq!(profiles.len(), 2);
        assert_eq!(profiles[0].file_name, "example.com/pkg/a.go");
        assert_eq!(profiles[1].file_name, "example.com/pkg/b.go");
    }

    #[test]
    fn skips_unparseable_entries() {
        let data = zip_bytes(&[
            ("broken.out", "this is not a profile"),
            ("coverage.out", "mode: set\nexample.com/pkg/a.go:1.1,3.2 1 1\n"),
        ]);

        let profiles = parse_profiles_from_zip(&data).unwrap();
        assert_eq!(profiles.len(), 1);
    }

    #[test]
    fn skips_empty_entries() {
        let data = zip_bytes(&[
            ("empty.out", ""),
            ("coverage.out", "mode: set\nexample.com/pkg/a.go:1.1,3.2 1 1\n"),
        ]);

        let profiles = parse_profiles_from_zip(&data).unwrap();
        assert_eq!(profiles.len(), 1);
    }

    #[test]
    fn archive_with_no_parseable_entries_fails() {
        let data = zip_bytes(&[("notes.md", "hi"), ("broken.out", "nope")]);

        assert!(matches!(
            parse_profiles_from_zip(&data),
            Err(CoverageError::NoProfiles)
        ));
    }

    #[test]
    fn empty_input_fails() {
        assert!(matches!(
            parse_profiles_from_zip(b""),
            Err(CoverageError::EmptyProfile)
        ));
    }

    #[test]
    fn garbage_input_is_an_archive_error() {
        assert!(matches!(
            parse_profiles_from_zip(b"definitely not a zip"),
            Err(CoverageError::Archive(_))
        ));
    }
}
