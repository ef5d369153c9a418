//! Encoded outputs and the handles through which callers retrieve them.
//!
//! Every stored output is reachable through an [`OutputHandle`]. A handle stays
//! valid until it is revoked, which happens whenever its output is superseded by
//! a re-run or the batch is torn down.

use std::collections::{HashMap, HashSet};

use bytes::Bytes;

/// Prefix of every generated file name.
pub const OUTPUT_PREFIX: &str = "unwatermarked_";

/// Opaque reference to a stored output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputHandle(u64);

/// One stored output.
#[derive(Debug, Clone)]
pub struct StoredOutput {
    /// Encoded bytes.
    pub bytes: Bytes,
    /// File extension without the dot.
    pub extension: &'static str,
}

/// Issues, resolves and revokes output handles.
#[derive(Debug, Default)]
pub struct ResultStore {
    next: u64,
    outputs: HashMap<OutputHandle, StoredOutput>,
}

impl ResultStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an output and issue a fresh handle for it.
    pub fn insert(&mut self, bytes: impl Into<Bytes>, extension: &'static str) -> OutputHandle {
        self.next += 1;
        let handle = OutputHandle(self.next);
        self.outputs.insert(
            handle,
            StoredOutput {
                bytes: bytes.into(),
                extension,
            },
        );
        handle
    }

    /// Store `bytes` as the replacement for `previous`, revoking it first.
    pub fn replace(
        &mut self,
        previous: Option<OutputHandle>,
        bytes: impl Into<Bytes>,
        extension: &'static str,
    ) -> OutputHandle {
        if let Some(old) = previous {
            self.revoke(old);
        }
        self.insert(bytes, extension)
    }

    /// Release a handle. Returns `false` if it was already released.
    pub fn revoke(&mut self, handle: OutputHandle) -> bool {
        self.outputs.remove(&handle).is_some()
    }

    /// Resolve a handle, `None` once it has been revoked.
    #[must_use]
    pub fn get(&self, handle: OutputHandle) -> Option<&StoredOutput> {
        self.outputs.get(&handle)
    }

    /// Number of handles not yet revoked.
    #[must_use]
    pub fn live_handles(&self) -> usize {
        self.outputs.len()
    }

    /// Revoke every handle.
    pub fn clear(&mut self) {
        if !self.outputs.is_empty() {
            tracing::debug!(count = self.outputs.len(), "revoking all outputs");
        }
        self.outputs.clear();
    }
}

/// Replace every character outside `[A-Za-z0-9._-]` with `_`.
#[must_use]
pub fn sanitize_basename(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Suggested download name: `unwatermarked_<sanitized basename>.<ext>`.
#[must_use]
pub fn output_filename(source_name: &str, extension: &str) -> String {
    let base = source_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(source_name);
    let stem = match base.rfind('.') {
        Some(idx) if idx > 0 => &base[..idx],
        _ => base,
    };
    let stem = sanitize_basename(stem);
    let stem = if stem.is_empty() { "image".to_string() } else { stem };
    format!("{OUTPUT_PREFIX}{stem}.{extension}")
}

/// Name of an aggregate archive created at `millis` since the Unix epoch.
#[must_use]
pub fn archive_name(millis: i64) -> String {
    format!("{OUTPUT_PREFIX}{millis}.zip")
}

/// One file of an aggregate archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// File name inside the archive.
    pub filename: String,
    /// File contents.
    pub bytes: Bytes,
}

/// All completed outputs of a batch, ready to be packaged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Archive {
    /// Suggested archive file name.
    pub name: String,
    /// Entries in item order, with unique file names.
    pub entries: Vec<ArchiveEntry>,
}

impl Archive {
    /// Build an archive, de-duplicating clashing file names with a `_<n>` suffix.
    #[must_use]
    pub fn new(name: String, files: impl IntoIterator<Item = (String, Bytes)>) -> Self {
        let mut seen = HashSet::new();
        let entries = files
            .into_iter()
            .map(|(filename, bytes)| {
                let mut unique = filename.clone();
                let mut n = 1;
                while !seen.insert(unique.clone()) {
                    unique = match filename.rfind('.') {
                        Some(idx) => format!("{}_{n}{}", &filename[..idx], &filename[idx..]),
                        None => format!("{filename}_{n}"),
                    };
                    n += 1;
                }
                ArchiveEntry {
                    filename: unique,
                    bytes,
                }
            })
            .collect();
        Self { name, entries }
    }

    /// Package the entries as a ZIP file.
    ///
    /// # Errors
    ///
    /// Returns an error if the ZIP writer fails.
    #[cfg(feature = "cli")]
    pub fn to_zip(&self) -> zip::result::ZipResult<Vec<u8>> {
        use std::io::Write;

        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        // Image payloads are already compressed.
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);
        for entry in &self.entries {
            writer.start_file(entry.filename.as_str(), options)?;
            writer.write_all(&entry.bytes)?;
        }
        Ok(writer.finish()?.into_inner())
    }
}
