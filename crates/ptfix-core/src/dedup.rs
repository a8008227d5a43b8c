use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use rayon::prelude::*;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::media::MediaFile;
use crate::ThrottledProgress;

/// Stream a file through SHA-256 and return the hex digest.
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Hash every file whose size is shared with at least one other file.
/// A file with a unique size cannot have a byte-identical twin.
pub fn hash_candidates(media: &mut [MediaFile], progress: &ThrottledProgress) {
    let mut size_counts: HashMap<u64, usize> = HashMap::new();
    for m in media.iter() {
        *size_counts.entry(m.size).or_default() += 1;
    }

    let total = media
        .iter()
        .filter(|m| size_counts[&m.size] > 1)
        .count() as u64;
    if total == 0 {
        return;
    }

    let counter = AtomicU64::new(0);
    media
        .par_iter_mut()
        .filter(|m| size_counts[&m.size] > 1)
        .for_each(|m| {
            match sha256_file(&m.path) {
                Ok(hash) => m.hash = Some(hash),
                Err(e) => warn!("could not hash {}: {e}", m.path.display()),
            }
            let current = counter.fetch_add(1, Ordering::Relaxed);
            progress.report("hash", current, total, "Hashing duplicate candidates");
        });
}

/// Tracks the first file seen for each `(size, hash)` key.
///
/// Callers feed files in walk order; the first one observed for a key is
/// authoritative, so the lowest walk position always wins.
#[derive(Debug, Default)]
pub struct Deduplicator {
    kept: HashMap<(u64, String), String>,
    report: Vec<String>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `m`. Returns the name of the earlier file it duplicates, if any.
    /// Files without a hash are unique by construction and are not tracked.
    pub fn check(&mut self, m: &MediaFile) -> Option<String> {
        let hash = m.hash.as_ref()?;
        let key = (m.size, hash.clone());
        if let Some(kept) = self.kept.get(&key) {
            self.report
                .push(format!("{} -> duplicate of {}", m.relative, kept));
            return Some(kept.clone());
        }
        self.kept.insert(key, m.relative.clone());
        None
    }

    pub fn removed(&self) -> usize {
        self.report.len()
    }

    /// Report body, or None when nothing was removed.
    pub fn report(&self) -> Option<String> {
        if self.report.is_empty() {
            return None;
        }
        let mut text = format!("Duplicates removed: {}\n\n", self.report.len());
        for line in &self.report {
            text.push_str(line);
            text.push('\n');
        }
        Some(text)
    }
}
