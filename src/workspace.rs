//! Временные файлы задачи
//!
//! У каждой задачи своя временная директория с префиксом `dubsync_job_`.
//! Директория удаляется при освобождении workspace как при успехе, так и при
//! ошибке. Фоновая очистка удаляет директории, оставшиеся после аварийного
//! завершения процесса.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info, warn};
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::error::Result;

pub const JOB_PREFIX: &str = "dubsync_job_";

/// Временная директория одной задачи
#[derive(Debug)]
pub struct JobWorkspace {
    /// `None` после `keep`
    dir: Option<TempDir>,
    path: PathBuf,
    cleanup: bool,
}

impl JobWorkspace {
    /// Создать директорию задачи в `root`
    pub fn create(root: &Path, cleanup: bool) -> Result<Self> {
        fs::create_dir_all(root)?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("{}{}_", JOB_PREFIX, uuid::Uuid::new_v4().simple()))
            .tempdir_in(root)?;
        let path = dir.path().to_path_buf();
        debug!("Создана временная директория задачи: {}", path.display());

        Ok(Self {
            dir: Some(dir),
            path,
            cleanup,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for JobWorkspace {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            if self.cleanup {
                let path = dir.path().to_path_buf();
                if let Err(e) = dir.close() {
                    warn!("Не удалось удалить временную директорию {}: {}", path.display(), e);
                }
            } else {
                let kept = dir.keep();
                info!("Временные файлы задачи сохранены: {}", kept.display());
            }
        }
    }
}

/// Удаляет директории задач в `root` старше `max_age`. Возвращает число удаленных.
pub fn sweep_orphaned(root: &Path, max_age: Duration) -> Result<usize> {
    if !root.exists() {
        return Ok(0);
    }

    let mut removed = 0;
    for entry in WalkDir::new(root).min_depth(1).max_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!("Пропуск при очистке: {}", e);
                continue;
            }
        };
        if !entry.file_name().to_string_lossy().starts_with(JOB_PREFIX) {
            continue;
        }

        let age = entry
            .metadata()
            .ok()
            .and_then(|m| m.modified().ok())
            .and_then(|modified| modified.elapsed().ok())
            .unwrap_or_default();
        if age < max_age {
            continue;
        }

        let path = entry.path();
        let result = if entry.file_type().is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        };
        match result {
            Ok(()) => {
                debug!("Удален осиротевший файл задачи: {}", path.display());
                removed += 1;
            }
            Err(e) => warn!("Не удалось удалить {}: {}", path.display(), e),
        }
    }

    if removed > 0 {
        info!("Очистка временных файлов: удалено {}", removed);
    }
    Ok(removed)
}

/// Периодическая очистка до отмены токена
pub fn spawn_orphan_sweeper(
    root: PathBuf,
    max_age: Duration,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let root = root.clone();
                    match tokio::task::spawn_blocking(move || sweep_orphaned(&root, max_age)).await {
                        Ok(Ok(_)) => {}
                        Ok(Err(e)) => warn!("Ошибка очистки временных файлов: {}", e),
                        Err(e) => warn!("Задача очистки завершилась аварийно: {}", e),
                    }
                }
            }
        }
    })
}
