use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub global: Global,
    #[serde(default)]
    pub paths: Paths,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub engine: Engine,
    #[serde(default)]
    pub export: Export,
    #[serde(default)]
    pub postprocess: Postprocess,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub debug: Debug,
    #[serde(default)]
    pub security: Security,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        let cfg: Config = toml::from_str(&raw).with_context(|| "parsing TOML")?;
        Ok(cfg)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Global {
    pub print_summary: bool,
    /// Descend into subfolders when a directory is given as input.
    pub recursive: bool,
}
impl Default for Global {
    fn default() -> Self {
        Self {
            print_summary: true,
            recursive: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Paths {
    pub out_dir: String,
    /// Empty means the per-user data directory.
    pub models_dir: String,
    pub scripts_dir: String,
}
impl Default for Paths {
    fn default() -> Self {
        Self {
            out_dir: "~/Documents/PDF_Extractor_Output".into(),
            models_dir: "".into(),
            scripts_dir: "scripts".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    pub max_input_file_bytes: u64,
}
impl Default for Limits {
    fn default() -> Self {
        Self {
            max_input_file_bytes: 2 * 1024 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Engine {
    pub python_exe: String,
    pub load_timeout_seconds: u64,
    pub convert_timeout_seconds: u64,
    pub doctor_timeout_seconds: u64,
    pub offline_only: bool,
    pub env: BTreeMap<String, String>,
}
impl Default for Engine {
    fn default() -> Self {
        Self {
            python_exe: "auto".into(),
            load_timeout_seconds: 1800,
            convert_timeout_seconds: 600,
            doctor_timeout_seconds: 60,
            offline_only: false,
            env: Default::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Export {
    pub formats: Vec<String>,
    pub json_indent: usize,
    pub tabular_csv: bool,
    pub tabular_xlsx: bool,
    pub html_max_width_px: u32,
}
impl Default for Export {
    fn default() -> Self {
        Self {
            formats: vec![
                "json".into(),
                "markdown".into(),
                "csv".into(),
                "html".into(),
            ],
            json_indent: 4,
            tabular_csv: true,
            tabular_xlsx: true,
            html_max_width_px: 800,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Postprocess {
    pub normalize_unicode: bool,
    pub normalize_newlines: bool,
    pub trim_trailing_whitespace: bool,
    pub collapse_blank_lines: bool,
    pub control_chars_to_sanitize: Vec<u8>,
}
impl Default for Postprocess {
    fn default() -> Self {
        Self {
            normalize_unicode: true,
            normalize_newlines: true,
            trim_trailing_whitespace: true,
            collapse_blank_lines: true,
            // C0 controls except \t \n \r, plus DEL.
            control_chars_to_sanitize: (0u8..=8)
                .chain([11, 12])
                .chain(14..=31)
                .chain([127])
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Logging {
    pub level: String,
    pub json: bool,
    pub write_to_file: bool,
    pub file_path: String,
}
impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            write_to_file: false,
            file_path: "".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Debug {
    pub keep_python_stderr: bool,
    pub dump_effective_config: bool,
}
impl Default for Debug {
    fn default() -> Self {
        Self {
            keep_python_stderr: true,
            dump_effective_config: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Security {
    pub reject_url_inputs: bool,
    pub pin_scripts_dir: bool,
}
impl Default for Security {
    fn default() -> Self {
        Self {
            reject_url_inputs: true,
            pin_scripts_dir: false,
        }
    }
}
