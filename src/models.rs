//! Where Docling keeps its model weights.
//!
//! Resolution order: `PDF_EXTRACTOR_MODELS_DIR` (pre-downloaded, offline),
//! `paths.models_dir`, then `<user data dir>/PDFExtractor/models`. If the chosen
//! directory is not writable we fall back to the system temp dir, unless it came
//! from the environment override, which is only ever read.

use crate::{config::Config, util::expand_tilde};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const MODELS_DIR_ENV: &str = "PDF_EXTRACTOR_MODELS_DIR";
const APP_DIR: &str = "PDFExtractor";

#[derive(Debug, Clone)]
pub struct ModelCache {
    dir: PathBuf,
    offline: bool,
}

impl ModelCache {
    pub fn resolve(cfg: &Config) -> Result<Self> {
        let override_dir = std::env::var(MODELS_DIR_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty());
        Self::resolve_with(cfg, override_dir.as_deref())
    }

    pub fn resolve_with(cfg: &Config, override_dir: Option<&str>) -> Result<Self> {
        if let Some(raw) = override_dir {
            let dir = expand_tilde(raw);
            if !dir.is_dir() {
                anyhow::bail!("{MODELS_DIR_ENV} is not a directory: {}", dir.display());
            }
            info!("using pre-downloaded models from {}", dir.display());
            return Ok(Self { dir, offline: true });
        }

        let dir = if cfg.paths.models_dir.is_empty() {
            default_models_dir()
        } else {
            expand_tilde(&cfg.paths.models_dir)
        };
        let dir = match prepare_writable(&dir) {
            Ok(()) => dir,
            Err(err) => {
                let fallback = std::env::temp_dir().join(APP_DIR).join("models");
                warn!(
                    "model dir {} not writable ({err:#}); using fallback {}",
                    dir.display(),
                    fallback.display()
                );
                prepare_writable(&fallback)?;
                fallback
            }
        };
        Ok(Self {
            dir,
            offline: cfg.engine.offline_only,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn offline(&self) -> bool {
        self.offline
    }

    /// Environment handed to the python worker so every model lands under `dir`.
    pub fn env_vars(&self) -> Vec<(String, String)> {
        let hf_home = self.dir.join("huggingface");
        let mut env = vec![
            ("HF_HOME".to_string(), path_str(&hf_home)),
            ("HF_HUB_CACHE".to_string(), path_str(&hf_home.join("hub"))),
            ("HUGGINGFACE_HUB_CACHE".to_string(), path_str(&hf_home.join("hub"))),
            ("TRANSFORMERS_CACHE".to_string(), path_str(&self.dir.join("transformers"))),
        ];
        if self.offline {
            env.push(("HF_HUB_OFFLINE".to_string(), "1".to_string()));
            env.push(("DOCLING_ARTIFACTS_PATH".to_string(), path_str(&self.dir)));
        }
        if cfg!(windows) {
            // Creating symlinks needs elevated privileges on Windows.
            env.push(("HF_HUB_DISABLE_SYMLINKS_WARNING".to_string(), "1".to_string()));
            env.push(("HF_HUB_LOCAL_DIR_USE_SYMLINKS".to_string(), "False".to_string()));
        }
        env
    }
}

pub fn default_models_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR)
        .join("models")
}

fn prepare_writable(dir: &Path) -> Result<()> {
    for sub in ["huggingface/hub", "transformers"] {
        let p = dir.join(sub);
        std::fs::create_dir_all(&p).with_context(|| format!("create {}", p.display()))?;
    }
    let probe = dir.join("huggingface").join(".write_test");
    std::fs::write(&probe, b"").with_context(|| format!("write {}", probe.display()))?;
    std::fs::remove_file(&probe).ok();
    Ok(())
}

fn path_str(p: &Path) -> String {
    p.display().to_string()
}
