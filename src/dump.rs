//! Optional request/response dump facility: writes `<timestamp>-<seq>.req.json`
//! and `.resp.json` files under a configured directory.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;

pub struct DumpWriter {
    dir: PathBuf,
    seq: AtomicU64,
}

impl DumpWriter {
    pub fn new(dir: String, purge_on_start: bool) -> Self {
        let dir = PathBuf::from(dir);
        if purge_on_start {
            if let Err(e) = purge(&dir) {
                tracing::warn!(error = %e, "failed to purge dump directory on start");
            }
        }
        if let Err(e) = std::fs::create_dir_all(&dir) {
            tracing::warn!(error = %e, "failed to create dump directory");
        }
        Self {
            dir,
            seq: AtomicU64::new(0),
        }
    }

    /// Returns the sequence number used, so the caller can write the
    /// matching `.resp.json` file once the response is known.
    pub fn write_request(&self, body: &Value) -> u64 {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        self.write(seq, "req", body);
        seq
    }

    pub fn write_response(&self, seq: u64, body: &Value) {
        self.write(seq, "resp", body);
    }

    fn write(&self, seq: u64, suffix: &str, body: &Value) {
        let timestamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%.3f");
        let path = self.dir.join(format!("{timestamp}-{seq}.{suffix}.json"));
        match serde_json::to_vec_pretty(body) {
            Ok(bytes) => {
                if let Err(e) = std::fs::write(&path, bytes) {
                    tracing::warn!(error = %e, path = %path.display(), "failed to write dump file");
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to serialize dump body"),
        }
    }
}

fn purge(dir: &Path) -> std::io::Result<()> {
    if !dir.exists() {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.path().is_file() {
            std::fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}
