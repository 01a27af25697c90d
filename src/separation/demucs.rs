//! Разделение моделью Demucs (внешний процесс).
//!
//! Дорожка записывается в WAV во временную директорию задачи, Demucs
//! запускается в режиме двух стемов (`vocals` / `no_vocals`), результат
//! читается обратно. При отмене задачи процесс завершается принудительно.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use super::{SeparationContext, SeparationEngine, StemPair};
use crate::audio::AudioTrack;
use crate::audio::format::{decode_wav_file, encode_wav};
use crate::error::{DubSyncError, Result};

const INPUT_STEM: &str = "demucs_input";

/// Способ запуска Demucs
#[derive(Debug, Clone, PartialEq)]
enum Launcher {
    /// Исполняемый файл `demucs`
    Binary(PathBuf),
    /// `python3 -m demucs`
    PythonModule(PathBuf),
}

/// Движок разделения на основе Demucs
#[derive(Debug, Clone)]
pub struct DemucsEngine {
    /// Имя модели Demucs
    pub model: String,
    /// Устройство: `cpu` или `cuda`
    pub device: String,
}

impl Default for DemucsEngine {
    fn default() -> Self {
        Self {
            model: "htdemucs".to_string(),
            device: "cpu".to_string(),
        }
    }
}

impl DemucsEngine {
    pub fn new(model: impl Into<String>, device: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            device: device.into(),
        }
    }

    fn locate() -> Option<Launcher> {
        if let Ok(path) = which::which("demucs") {
            return Some(Launcher::Binary(path));
        }
        which::which("python3").ok().map(Launcher::PythonModule)
    }

    fn command(launcher: &Launcher) -> Command {
        match launcher {
            Launcher::Binary(path) => Command::new(path),
            Launcher::PythonModule(python) => {
                let mut cmd = Command::new(python);
                cmd.args(["-m", "demucs"]);
                cmd
            }
        }
    }

    /// Путь к стему в структуре вывода Demucs: `<out>/<model>/<input>/<stem>.wav`
    fn stem_path(&self, output_dir: &Path, stem: &str) -> PathBuf {
        output_dir
            .join(&self.model)
            .join(INPUT_STEM)
            .join(format!("{}.wav", stem))
    }
}

#[async_trait]
impl SeparationEngine for DemucsEngine {
    fn name(&self) -> &str {
        "demucs"
    }

    async fn is_available(&self) -> bool {
        let Some(launcher) = Self::locate() else {
            return false;
        };
        let mut cmd = Self::command(&launcher);
        cmd.arg("--help").stdout(Stdio::null()).stderr(Stdio::null());
        match cmd.status().await {
            Ok(status) => status.success(),
            Err(e) => {
                debug!("Demucs недоступен: {}", e);
                false
            }
        }
    }

    async fn separate(&self, track: &AudioTrack, context: &SeparationContext) -> Result<StemPair> {
        let launcher = Self::locate()
            .ok_or_else(|| DubSyncError::AudioProcessing("demucs is not installed".to_string()))?;

        let input_path = context.workdir.join(format!("{}.wav", INPUT_STEM));
        let output_dir = context.workdir.join("demucs");
        encode_wav(track, &input_path)?;

        info!("Запуск Demucs (модель {}, устройство {})", self.model, self.device);
        let mut cmd = Self::command(&launcher);
        cmd.arg("--two-stems=vocals")
            .arg("--out")
            .arg(&output_dir)
            .arg("--device")
            .arg(&self.device)
            .arg("-n")
            .arg(&self.model)
            .arg(&input_path)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn()?;
        let stderr = child.stderr.take();

        let log_output = async move {
            if let Some(stderr) = stderr {
                let mut reader = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    if let Some(progress) = parse_progress(&line) {
                        debug!("Demucs: {:.0}%", progress * 100.0);
                    }
                }
            }
        };

        let status = tokio::select! {
            _ = context.cancel.cancelled() => {
                warn!("Разделение отменено, завершаем Demucs");
                let _ = child.kill().await;
                return Err(DubSyncError::Cancelled);
            }
            (status, _) = async { tokio::join!(child.wait(), log_output) } => status?,
        };

        if !status.success() {
            return Err(DubSyncError::AudioProcessing(format!(
                "demucs exited with {}",
                status
            )));
        }

        let vocals = decode_wav_file(self.stem_path(&output_dir, "vocals"))?;
        let background = decode_wav_file(self.stem_path(&output_dir, "no_vocals"))?;
        info!("Demucs завершил разделение: {:.2}с", vocals.duration());

        Ok(StemPair { vocals, background })
    }
}

/// Процент из строки прогресса Demucs (`" 45%|████ ..."`)
fn parse_progress(line: &str) -> Option<f32> {
    let (head, _) = line.split_once('%')?;
    head.split_whitespace()
        .last()?
        .parse::<f32>()
        .ok()
        .map(|percent| (percent / 100.0).clamp(0.0, 1.0))
}
