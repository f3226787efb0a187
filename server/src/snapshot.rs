//! Canvas persistence: periodic PNG snapshots and startup restore
//!
//! Every snapshot tiles the whole grid into one `cols·128 × rows·128`
//! image named by the wall-clock second it was taken. Restore picks the
//! lexically last artifact in the data directory, checks its dimensions
//! against the configured grid and overwrites every cell with timestamp
//! 0. Persistence is best effort: any failure is logged and skipped, and
//! the server keeps serving from memory.

use crate::board::{PanelStore, StoreError};
use image::RgbImage;
use log::{error, info};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("image encode/decode failed: {0}")]
    Image(#[from] image::ImageError),
    #[error("snapshot is {actual_w}x{actual_h}, expected {expected_w}x{expected_h}")]
    DimensionMismatch {
        expected_w: usize,
        expected_h: usize,
        actual_w: usize,
        actual_h: usize,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Periodic snapshot task. Runs until the process exits; failures are
/// logged and the timer keeps going.
pub async fn run(store: Arc<PanelStore>, dir: PathBuf, interval: Duration) {
    let mut timer = tokio::time::interval(interval);
    // The first tick fires immediately; the grid was just restored, so
    // skip it.
    timer.tick().await;

    loop {
        timer.tick().await;
        match snapshot(&store, &dir).await {
            Ok(path) => info!("snapshot saved: {}", path.display()),
            Err(e) => error!("snapshot failed: {}", e),
        }
    }
}

/// Writes the current grid as `<unix-seconds>.png` under `dir`.
pub async fn snapshot(store: &PanelStore, dir: &Path) -> Result<PathBuf, SnapshotError> {
    let (width, height) = store.dimensions();
    let raster = store.snapshot_raster().await;
    let img = RgbImage::from_raw(width as u32, height as u32, raster)
        .expect("raster length matches store dimensions");

    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_secs();
    let path = dir.join(format!("{}.png", ts));
    img.save(&path)?;
    Ok(path)
}

/// Restores the most recent snapshot, if any. Returns the restored path,
/// or `None` when the directory holds no snapshots. A dimension mismatch
/// is an error: the caller logs it and continues with the empty grid.
pub async fn restore_latest(
    store: &PanelStore,
    dir: &Path,
) -> Result<Option<PathBuf>, SnapshotError> {
    let mut snapshots: Vec<PathBuf> = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "png") {
            snapshots.push(path);
        }
    }
    snapshots.sort();
    let Some(latest) = snapshots.pop() else {
        return Ok(None);
    };

    let img = image::open(&latest)?.into_rgb8();
    let (width, height) = store.dimensions();
    if img.width() as usize != width || img.height() as usize != height {
        return Err(SnapshotError::DimensionMismatch {
            expected_w: width,
            expected_h: height,
            actual_w: img.width() as usize,
            actual_h: img.height() as usize,
        });
    }

    store.restore_raster(img.as_raw()).await?;
    Ok(Some(latest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{Color, PANEL_SIZE};

    /// Fresh per-test directory under the system temp dir.
    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "panelboard-snapshot-{}-{}",
            name,
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn test_store() -> PanelStore {
        PanelStore::new(4, 2, 2).unwrap()
    }

    #[tokio::test]
    async fn test_snapshot_then_restore_reproduces_colors() {
        let dir = scratch_dir("roundtrip");
        let store = test_store();
        store
            .write_cell(3, 100, 50, Color::new(10, 20, 30), 777)
            .await;

        let path = snapshot(&store, &dir).await.unwrap();
        assert!(path.exists());

        let fresh = test_store();
        let restored = restore_latest(&fresh, &dir).await.unwrap();
        assert_eq!(restored, Some(path));

        let raw = fresh.read_panel(3).await.unwrap();
        let idx = (50 * PANEL_SIZE + 100) * 3;
        assert_eq!(&raw[idx..idx + 3], &[10, 20, 30]);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_restore_empty_directory_is_none() {
        let dir = scratch_dir("empty");
        let store = test_store();
        assert_eq!(restore_latest(&store, &dir).await.unwrap(), None);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_restore_picks_lexically_last() {
        let dir = scratch_dir("latest");
        let (width, height) = test_store().dimensions();

        // Two hand-written snapshots with distinct fill colors.
        for (name, value) in [("1000.png", 11u8), ("2000.png", 22u8)] {
            let raster = vec![value; width * height * 3];
            RgbImage::from_raw(width as u32, height as u32, raster)
                .unwrap()
                .save(dir.join(name))
                .unwrap();
        }

        let store = test_store();
        let restored = restore_latest(&store, &dir).await.unwrap().unwrap();
        assert_eq!(restored.file_name().unwrap(), "2000.png");

        let raw = store.read_panel(0).await.unwrap();
        assert_eq!(&raw[0..3], &[22, 22, 22]);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_restore_rejects_dimension_mismatch() {
        let dir = scratch_dir("mismatch");
        RgbImage::from_raw(8, 8, vec![0u8; 8 * 8 * 3])
            .unwrap()
            .save(dir.join("9999.png"))
            .unwrap();

        let store = test_store();
        match restore_latest(&store, &dir).await {
            Err(SnapshotError::DimensionMismatch {
                expected_w,
                actual_w,
                ..
            }) => {
                assert_eq!(expected_w, 2 * PANEL_SIZE);
                assert_eq!(actual_w, 8);
            }
            other => panic!("expected dimension mismatch, got {:?}", other),
        }

        // The grid is untouched.
        let raw = store.read_panel(0).await.unwrap();
        assert!(raw.iter().all(|&b| b == 0));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_restore_missing_directory_is_an_error() {
        let store = test_store();
        let missing = std::env::temp_dir().join("panelboard-snapshot-does-not-exist");
        assert!(restore_latest(&store, &missing).await.is_err());
    }
}
