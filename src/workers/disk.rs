//! Disk worker: randomized positioned writes forced to durable storage, each
//! immediately read back and verified byte-for-byte.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

use crate::config::DiskConfig;
use crate::workers::{FailureKind, WorkerContext};

/// Chunk size used while pre-filling the backing file, bounding memory use
/// during creation.
const FILL_CHUNK: usize = 1024 * 1024;

/// Worker entry point. Each worker instance owns a distinct backing file;
/// concurrent workers must never share one, or cross-worker interference
/// would read as corruption.
pub fn run(ctx: &WorkerContext, cfg: &DiskConfig, path: &Path) {
    info!(worker = ctx.id, path = %path.display(), "disk worker starting");
    if let Err(e) = stress_loop(ctx, cfg, path) {
        ctx.emit(
            FailureKind::IoFailure,
            format!("backing file {}: {e}", path.display()),
        );
    }
    // clean stop removes the temp file; the coordinator sweeps leftovers
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(worker = ctx.id, path = %path.display(), error = %e, "temp file cleanup failed");
        }
    }
    debug!(worker = ctx.id, "disk worker exiting");
}

fn stress_loop(ctx: &WorkerContext, cfg: &DiskConfig, path: &Path) -> io::Result<()> {
    let mut file = create_backing_file(path, cfg.file_size_bytes)?;
    let mut rng = StdRng::seed_from_u64(u64::from(ctx.id));
    let mut block = vec![0u8; cfg.block_size_bytes];
    let mut readback = vec![0u8; cfg.block_size_bytes];
    let slots = cfg.file_size_bytes / cfg.block_size_bytes;

    while !ctx.stop.is_set() {
        let offset = (rng.gen_range(0..slots) * cfg.block_size_bytes) as u64;
        rng.fill(&mut block[..]);

        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&block)?;
        file.flush()?;
        // push past the page cache to the device; the whole point of the
        // test is lost if the read below is served from cache
        file.sync_data()?;

        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut readback)?;
        if let Some(detail) = first_mismatch(offset, &block, &readback) {
            warn!(worker = ctx.id, offset, "disk read-back mismatch");
            ctx.emit(FailureKind::IntegrityMismatch, detail);
        }
        ctx.count_ops(1);
    }
    Ok(())
}

/// Create the backing file at its configured size, filled deterministically
/// (zeroes) in bounded chunks.
pub(crate) fn create_backing_file(path: &Path, size: usize) -> io::Result<File> {
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    let chunk = vec![0u8; FILL_CHUNK];
    let mut remaining = size;
    while remaining > 0 {
        let n = remaining.min(FILL_CHUNK);
        file.write_all(&chunk[..n])?;
        remaining -= n;
    }
    file.sync_all()?;
    Ok(file)
}

/// Compare a written block against its read-back, describing the first
/// diverging byte if any.
pub(crate) fn first_mismatch(offset: u64, written: &[u8], read: &[u8]) -> Option<String> {
    written
        .iter()
        .zip(read)
        .position(|(w, r)| w != r)
        .map(|i| {
            format!(
                "read-back mismatch at offset {} (byte {i}: wrote {:#04x}, read {:#04x})",
                offset, written[i], read[i]
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DiskConfig;
    use crate::stop::StopSignal;
    use crate::workers::{FailureEvent, WorkerKind};
    use std::sync::atomic::AtomicU64;
    use std::sync::{mpsc, Arc};

    fn test_ctx(stop: StopSignal) -> (WorkerContext, mpsc::Receiver<FailureEvent>) {
        let (tx, rx) = mpsc::channel();
        let ctx = WorkerContext::new(WorkerKind::Disk, 0, stop, tx, Arc::new(AtomicU64::new(0)));
        (ctx, rx)
    }

    #[test]
    fn test_backing_file_created_at_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backing.bin");
        let file = create_backing_file(&path, 256 * 1024).unwrap();
        assert_eq!(file.metadata().unwrap().len(), 256 * 1024);
    }

    #[test]
    fn test_first_mismatch_reports_offset_and_byte() {
        let written = vec![0xAA; 64];
        let mut read = written.clone();
        assert!(first_mismatch(4096, &written, &read).is_none());
        read[10] = 0xAB;
        let detail = first_mismatch(4096, &written, &read).unwrap();
        assert!(detail.contains("4096"));
        assert!(detail.contains("byte 10"));
    }

    #[test]
    fn test_run_verifies_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stress.bin");
        let cfg = DiskConfig {
            enabled: true,
            workers: 1,
            block_size_bytes: 4096,
            file_size_bytes: 64 * 1024,
            dir: dir.path().to_path_buf(),
        };
        let stop = StopSignal::new();
        let (ctx, rx) = test_ctx(stop.clone());

        let p = path.clone();
        let worker = std::thread::spawn(move || run(&ctx, &cfg, &p));
        std::thread::sleep(std::time::Duration::from_millis(200));
        stop.trigger();
        worker.join().unwrap();

        // healthy storage: no events, and the temp file is gone
        assert!(rx.try_recv().is_err());
        assert!(!path.exists());
    }
}
