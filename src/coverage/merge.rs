//! Block-level merging of coverage profiles.
//!
//! Profiles from multiple CI jobs are combined into one profile per file.
//! Blocks sharing the same identity (position plus statement count) have
//! their execution counts combined according to the mode; blocks with
//! distinct identities coexist.

use std::collections::{BTreeMap, HashMap};

use super::CoverageError;
use super::profile::{Block, BlockKey, Mode, Profile};

/// Combines two execution counts under the given mode.
///
/// `set` mode stores presence, so any execution wins; counting modes
/// accumulate. Unrecognised modes accumulate as well.
pub fn combine(mode: &Mode, a: u64, b: u64) -> u64 {
    match mode {
        Mode::Set => a.max(b),
        Mode::Count | Mode::Atomic | Mode::Other(_) => a.saturating_add(b),
    }
}

/// Merges a sequence of profiles into one profile per file.
///
/// All inputs must share the same mode; a mismatch fails with
/// [`CoverageError::ModeMismatch`] and an empty input with
/// [`CoverageError::NoProfiles`]. The result is sorted by file name, and
/// each profile's blocks by `(start_line, start_col)`.
pub fn merge_profiles(profiles: &[Profile]) -> Result<Vec<Profile>, CoverageError> {
    let first = profiles.first().ok_or(CoverageError::NoProfiles)?;
    let mode = &first.mode;

    for (index, p) in profiles.iter().enumerate() {
        if p.mode != *mode {
            return Err(CoverageError::ModeMismatch {
                index,
                expected: mode.clone(),
                found: p.mode.clone(),
            });
        }
    }

    // BTreeMap keeps the output ordered by file name.
    let mut files: BTreeMap<&str, HashMap<BlockKey, Block>> = BTreeMap::new();

    for p in profiles {
        let blocks = files.entry(p.file_name.as_str()).or_default();
        for b in &p.blocks {
            blocks
                .entry(b.key())
                .and_modify(|existing| existing.count = combine(mode, existing.count, b.count))
                .or_insert(*b);
        }
    }

    Ok(files
        .into_iter()
        .map(|(file_name, blocks)| {
            let mut blocks: Vec<Block> = blocks.into_values().collect();
            blocks.sort_by_key(Block::key);
            Profile {
                file_name: file_name.to_string(),
                mode: mode.clone(),
                blocks,
            }
        })
        .collect())
}
