//! Unified diff rendering.
//!
//! Produces a line-based unified diff between the two sides of one entry.
//! Diffs are computed on demand from the snapshot roots and never cached;
//! a repeated request re-reads the files. A side on which the entry is
//! absent diffs as empty content, so created and deleted files render as
//! all-added or all-removed hunks.

use std::fs::File;
use std::io::Read;

use similar::TextDiff;

use crate::attrs::PathAttributes;
use crate::error::{Error, Result};
use crate::session::{FileEntry, Location, Roots};

/// Window scanned for NUL bytes when deciding whether content is binary
const BINARY_PROBE_SIZE: usize = 8192;

/// Default size ceiling per side (8MB)
const DEFAULT_MAX_SIZE: u64 = 8 * 1024 * 1024;

/// Options for rendering a diff
#[derive(Debug, Clone)]
pub struct DiffOptions {
    context: usize,
    max_size: u64,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            context: 3,
            max_size: DEFAULT_MAX_SIZE,
        }
    }
}

impl DiffOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines of context around each hunk
    pub fn with_context(mut self, context: usize) -> Self {
        self.context = context;
        self
    }

    /// Per-side size ceiling in bytes; larger files are refused
    pub fn with_max_size(mut self, max_size: u64) -> Self {
        self.max_size = max_size;
        self
    }
}

/// Result of a diff request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffOutcome {
    /// Unified diff lines; empty when both sides are equal
    Text(Vec<String>),
    /// At least one side looks binary, no line diff was produced
    Binary,
}

/// Render the unified diff for one entry.
///
/// Only regular files (or absent sides) are diffable; directories,
/// symlinks and special files are refused with [`Error::NotDiffable`], as
/// are files above the configured size ceiling.
pub fn diff(entry: &FileEntry, roots: &Roots, options: &DiffOptions) -> Result<DiffOutcome> {
    let pre = read_side(entry, entry.pre_attrs(), Location::Pre, roots, options)?;
    let post = read_side(entry, entry.post_attrs(), Location::Post, roots, options)?;

    if looks_binary(&pre) || looks_binary(&post) {
        return Ok(DiffOutcome::Binary);
    }

    let old = String::from_utf8_lossy(&pre);
    let new = String::from_utf8_lossy(&post);

    let old_header = header(entry, entry.pre_attrs(), Location::Pre);
    let new_header = header(entry, entry.post_attrs(), Location::Post);

    let text = TextDiff::from_lines(old.as_ref(), new.as_ref())
        .unified_diff()
        .context_radius(options.context)
        .header(&old_header, &new_header)
        .to_string();

    Ok(DiffOutcome::Text(
        text.lines().map(str::to_string).collect(),
    ))
}

fn header(entry: &FileEntry, attrs: Option<&PathAttributes>, loc: Location) -> String {
    match attrs {
        Some(_) => format!(
            "{}{}",
            match loc {
                Location::Pre => "a",
                _ => "b",
            },
            entry.path()
        ),
        None => "/dev/null".to_string(),
    }
}

/// Read one side's content; an absent side is empty.
fn read_side(
    entry: &FileEntry,
    attrs: Option<&PathAttributes>,
    loc: Location,
    roots: &Roots,
    options: &DiffOptions,
) -> Result<Vec<u8>> {
    let attrs = match attrs {
        Some(a) => a,
        None => return Ok(Vec::new()),
    };

    if !attrs.is_file() {
        return Err(Error::NotDiffable {
            path: entry.path().to_string(),
            reason: format!("not a regular file ({:?})", attrs.kind),
        });
    }

    if attrs.size > options.max_size {
        return Err(Error::NotDiffable {
            path: entry.path().to_string(),
            reason: format!(
                "file too large ({} bytes, limit {})",
                attrs.size, options.max_size
            ),
        });
    }

    let path = entry.absolute_path(loc, roots);
    let mut content = Vec::with_capacity(attrs.size as usize);
    File::open(&path)
        .and_then(|mut file| file.read_to_end(&mut content))
        .map_err(|e| Error::NotDiffable {
            path: entry.path().to_string(),
            reason: format!("cannot read content: {}", e),
        })?;
    Ok(content)
}

fn looks_binary(content: &[u8]) -> bool {
    content[..content.len().min(BINARY_PROBE_SIZE)].contains(&0)
}
