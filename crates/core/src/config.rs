//! Engine configuration loaded from environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::CoreError;
use crate::types::MediaKind;

/// Model search paths used when `FORGE_MODEL_PATHS` adds nothing.
const DEFAULT_MODEL_DIRS: &[&str] = &["~/ComfyUI/models", "~/.comfyui/models", "./models"];

/// Upper bound on a job's wall-clock time, per media kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutCeilings {
    pub image: Duration,
    pub video: Duration,
    pub voice: Duration,
    pub music: Duration,
}

impl Default for TimeoutCeilings {
    fn default() -> Self {
        Self {
            image: Duration::from_secs(180),
            video: Duration::from_secs(600),
            voice: Duration::from_secs(300),
            music: Duration::from_secs(600),
        }
    }
}

impl TimeoutCeilings {
    pub fn for_kind(&self, kind: MediaKind) -> Duration {
        match kind {
            MediaKind::Image => self.image,
            MediaKind::Video => self.video,
            MediaKind::Voice => self.voice,
            MediaKind::Music => self.music,
        }
    }
}

/// How the direct voice path launches its synthesis program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectConfig {
    pub program: String,
    pub script: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Base URL of the external graph-execution service.
    pub comfyui_url: String,
    /// Model roots, in scan order.
    pub model_paths: Vec<PathBuf>,
    pub output_dir: PathBuf,
    pub history_file: PathBuf,
    pub presets_file: PathBuf,
    pub history_limit: usize,
    pub memory_sample_interval: Duration,
    pub registry_refresh_interval: Duration,
    pub probe_timeout: Duration,
    pub submit_timeout: Duration,
    pub poll_interval: Duration,
    pub fetch_timeout: Duration,
    pub timeouts: TimeoutCeilings,
    pub direct: DirectConfig,
}

impl EngineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                       | Default                        |
    /// |-------------------------------|--------------------------------|
    /// | `COMFYUI_URL`                 | `http://127.0.0.1:8188`        |
    /// | `FORGE_MODEL_PATHS`           | (prepended to built-in roots)  |
    /// | `FORGE_OUTPUT_DIR`            | `./outputs`                    |
    /// | `FORGE_HISTORY_FILE`          | `<output>/history.json`        |
    /// | `FORGE_PRESETS_FILE`          | `<output>/presets.json`        |
    /// | `FORGE_HISTORY_LIMIT`         | `20`                           |
    /// | `FORGE_MEMORY_SAMPLE_SECS`    | `10`                           |
    /// | `FORGE_REGISTRY_REFRESH_SECS` | `60`                           |
    /// | `FORGE_PROBE_TIMEOUT_SECS`    | `5`                            |
    /// | `FORGE_SUBMIT_TIMEOUT_SECS`   | `30`                           |
    /// | `FORGE_POLL_INTERVAL_MS`      | `1000`                         |
    /// | `FORGE_FETCH_TIMEOUT_SECS`    | `60`                           |
    /// | `FORGE_TIMEOUT_IMAGE_SECS`    | `180`                          |
    /// | `FORGE_TIMEOUT_VIDEO_SECS`    | `600`                          |
    /// | `FORGE_TIMEOUT_VOICE_SECS`    | `300`                          |
    /// | `FORGE_TIMEOUT_MUSIC_SECS`    | `600`                          |
    /// | `FORGE_DIRECT_PROGRAM`        | `python3`                      |
    /// | `FORGE_DIRECT_SCRIPT`         | `scripts/chatterbox_tts.py`    |
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, CoreError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let home = lookup("HOME").map(PathBuf::from);

        let comfyui_url = get("COMFYUI_URL")
            .unwrap_or_else(|| "http://127.0.0.1:8188".into())
            .trim_end_matches('/')
            .to_string();

        let mut model_paths: Vec<PathBuf> = get("FORGE_MODEL_PATHS")
            .map(|raw| {
                raw.split(':')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| expand_home(s, home.as_deref()))
                    .collect()
            })
            .unwrap_or_default();
        for dir in DEFAULT_MODEL_DIRS {
            let dir = expand_home(dir, home.as_deref());
            if !model_paths.contains(&dir) {
                model_paths.push(dir);
            }
        }

        let output_dir = get("FORGE_OUTPUT_DIR")
            .map(|s| expand_home(&s, home.as_deref()))
            .unwrap_or_else(|| PathBuf::from("./outputs"));
        let history_file = get("FORGE_HISTORY_FILE")
            .map(|s| expand_home(&s, home.as_deref()))
            .unwrap_or_else(|| output_dir.join("history.json"));
        let presets_file = get("FORGE_PRESETS_FILE")
            .map(|s| expand_home(&s, home.as_deref()))
            .unwrap_or_else(|| output_dir.join("presets.json"));

        let history_limit = parse_or(&get, "FORGE_HISTORY_LIMIT", 20usize)?;
        if history_limit == 0 {
            return Err(CoreError::Validation(
                "FORGE_HISTORY_LIMIT must be at least 1".to_string(),
            ));
        }

        let defaults = TimeoutCeilings::default();
        let timeouts = TimeoutCeilings {
            image: secs(&get, "FORGE_TIMEOUT_IMAGE_SECS", defaults.image.as_secs())?,
            video: secs(&get, "FORGE_TIMEOUT_VIDEO_SECS", defaults.video.as_secs())?,
            voice: secs(&get, "FORGE_TIMEOUT_VOICE_SECS", defaults.voice.as_secs())?,
            music: secs(&get, "FORGE_TIMEOUT_MUSIC_SECS", defaults.music.as_secs())?,
        };

        Ok(Self {
            comfyui_url,
            model_paths,
            output_dir,
            history_file,
            presets_file,
            history_limit,
            memory_sample_interval: secs(&get, "FORGE_MEMORY_SAMPLE_SECS", 10)?,
            registry_refresh_interval: secs(&get, "FORGE_REGISTRY_REFRESH_SECS", 60)?,
            probe_timeout: secs(&get, "FORGE_PROBE_TIMEOUT_SECS", 5)?,
            submit_timeout: secs(&get, "FORGE_SUBMIT_TIMEOUT_SECS", 30)?,
            poll_interval: Duration::from_millis(parse_or(&get, "FORGE_POLL_INTERVAL_MS", 1000u64)?),
            fetch_timeout: secs(&get, "FORGE_FETCH_TIMEOUT_SECS", 60)?,
            timeouts,
            direct: DirectConfig {
                program: get("FORGE_DIRECT_PROGRAM").unwrap_or_else(|| "python3".into()),
                script: get("FORGE_DIRECT_SCRIPT")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("scripts/chatterbox_tts.py")),
            },
        })
    }
}

// ---- private helpers ----

fn parse_or<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, CoreError> {
    match get(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| {
            CoreError::Validation(format!("{key} must be a non-negative integer, got {raw:?}"))
        }),
    }
}

fn secs(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: u64,
) -> Result<Duration, CoreError> {
    let value = parse_or(get, key, default)?;
    if value == 0 {
        return Err(CoreError::Validation(format!("{key} must be greater than zero")));
    }
    Ok(Duration::from_secs(value))
}

fn expand_home(raw: &str, home: Option<&Path>) -> PathBuf {
    match (raw.strip_prefix("~/"), home) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(raw),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;

    use super::*;

    fn load(pairs: &[(&str, &str)]) -> Result<EngineConfig, CoreError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EngineConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = load(&[("HOME", "/home/ada")]).unwrap();
        assert_eq!(config.comfyui_url, "http://127.0.0.1:8188");
        assert_eq!(
            config.model_paths,
            vec![
                PathBuf::from("/home/ada/ComfyUI/models"),
                PathBuf::from("/home/ada/.comfyui/models"),
                PathBuf::from("./models"),
            ]
        );
        assert_eq!(config.history_file, PathBuf::from("./outputs/history.json"));
        assert_eq!(config.history_limit, 20);
        assert_eq!(config.timeouts.for_kind(MediaKind::Video), Duration::from_secs(600));
        assert_eq!(config.poll_interval, Duration::from_millis(1000));
        assert_eq!(config.direct.program, "python3");
    }

    #[test]
    fn extra_model_paths_are_prepended_once() {
        let config = load(&[
            ("HOME", "/h"),
            ("FORGE_MODEL_PATHS", "/data/models: ~/ComfyUI/models"),
        ])
        .unwrap();
        assert_eq!(config.model_paths[0], PathBuf::from("/data/models"));
        assert_eq!(config.model_paths[1], PathBuf::from("/h/ComfyUI/models"));
        assert_eq!(config.model_paths.len(), 4);
    }

    #[test]
    fn output_dir_drives_store_paths() {
        let config = load(&[("FORGE_OUTPUT_DIR", "/srv/out"), ("COMFYUI_URL", "http://gpu:8188/")])
            .unwrap();
        assert_eq!(config.presets_file, PathBuf::from("/srv/out/presets.json"));
        assert_eq!(config.comfyui_url, "http://gpu:8188");
    }

    #[test]
    fn malformed_values_are_rejected() {
        assert_matches!(
            load(&[("FORGE_TIMEOUT_IMAGE_SECS", "soon")]),
            Err(CoreError::Validation(msg)) if msg.contains("FORGE_TIMEOUT_IMAGE_SECS")
        );
        assert_matches!(
            load(&[("FORGE_PROBE_TIMEOUT_SECS", "0")]),
            Err(CoreError::Validation(_))
        );
        assert_matches!(load(&[("FORGE_HISTORY_LIMIT", "0")]), Err(CoreError::Validation(_)));
    }
}
