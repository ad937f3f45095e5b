//! Filesystem discovery of model weights.

use std::collections::HashSet;
use std::fs;
use std::path::{Component, Path, PathBuf};

use super::adapter::AdapterKind;
use super::family::{classify, Family};
use super::ModelEntry;

/// Weight file extensions worth classifying.
pub const MODEL_EXTENSIONS: &[&str] = &["safetensors", "ckpt", "pth", "bin"];

/// Name fragments of auxiliary weights that are never standalone models.
const COMPONENT_MARKERS: &[&str] = &[
    "clip_",
    "_clip",
    "embedding",
    "controlnet",
    "ipadapter",
    "ip-adapter",
];

/// Directory names the execution backend uses as model categories. The
/// backend name of a file is its path below the deepest such directory.
const CATEGORY_DIRS: &[&str] = &[
    "checkpoints",
    "diffusion_models",
    "unet",
    "upscale_models",
    "tts",
    "audio",
    "audio_checkpoints",
];

/// Deepest directory level the walk descends to below a search root.
const MAX_SCAN_DEPTH: usize = 6;

/// Walk `search_paths` and return one entry per canonical model file.
///
/// Missing roots, unreadable directories and broken symlinks are skipped.
/// Component weights and unclassifiable files are excluded. The result is
/// sorted by name.
pub fn scan(search_paths: &[PathBuf]) -> Vec<ModelEntry> {
    let mut seen_files = HashSet::new();
    let mut seen_dirs = HashSet::new();
    let mut entries = Vec::new();

    for root in search_paths {
        let Ok(canonical_root) = fs::canonicalize(root) else {
            tracing::debug!(path = %root.display(), "Model search path not found, skipping");
            continue;
        };
        walk(
            &canonical_root,
            0,
            &mut seen_dirs,
            &mut seen_files,
            &mut entries,
        );
    }

    entries.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.path.cmp(&b.path)));
    entries
}

/// True for weights that only make sense as part of another model.
pub fn is_component_file(file_name: &str) -> bool {
    let lower = file_name.to_lowercase();
    let stem = lower.rsplit_once('.').map(|(s, _)| s).unwrap_or(&lower);
    stem.ends_with("-vae")
        || stem.ends_with("_vae")
        || COMPONENT_MARKERS.iter().any(|m| stem.contains(m))
}

/// Path of `path` below its deepest category directory, `/`-separated.
pub fn backend_name(path: &Path) -> String {
    let components: Vec<&str> = path
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => s.to_str(),
            _ => None,
        })
        .collect();

    let start = components
        .iter()
        .rposition(|c| CATEGORY_DIRS.contains(c))
        .map(|i| i + 1)
        .unwrap_or(components.len().saturating_sub(1));

    components[start..].join("/")
}

// ---- private helpers ----

/// Adapter weights are catalogued separately; see [`super::adapter`].
fn is_adapter_dir(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| AdapterKind::ALL.iter().any(|k| k.dir_name() == n))
}

fn walk(
    dir: &Path,
    depth: usize,
    seen_dirs: &mut HashSet<PathBuf>,
    seen_files: &mut HashSet<PathBuf>,
    entries: &mut Vec<ModelEntry>,
) {
    if depth > MAX_SCAN_DEPTH || !seen_dirs.insert(dir.to_path_buf()) {
        return;
    }
    let read_dir = match fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(e) => {
            tracing::debug!(path = %dir.display(), error = %e, "Unreadable directory, skipping");
            return;
        }
    };

    for item in read_dir.flatten() {
        let path = item.path();
        // Resolves symlinks; fails for dangling ones.
        let Ok(canonical) = fs::canonicalize(&path) else {
            tracing::debug!(path = %path.display(), "Broken symlink, skipping");
            continue;
        };
        let Ok(metadata) = fs::metadata(&canonical) else {
            continue;
        };

        if metadata.is_dir() {
            if is_adapter_dir(&path) {
                continue;
            }
            walk(&canonical, depth + 1, seen_dirs, seen_files, entries);
            continue;
        }
        if let Some(entry) = inspect_file(&path, canonical, metadata.len(), seen_files) {
            entries.push(entry);
        }
    }
}

fn inspect_file(
    listed: &Path,
    canonical: PathBuf,
    size_bytes: u64,
    seen_files: &mut HashSet<PathBuf>,
) -> Option<ModelEntry> {
    let ext = canonical.extension()?.to_str()?.to_lowercase();
    if !MODEL_EXTENSIONS.contains(&ext.as_str()) {
        return None;
    }
    let file_name = listed.file_name()?.to_str()?;
    if is_component_file(file_name) {
        return None;
    }
    let family = classify(file_name);
    if family == Family::Unknown {
        tracing::debug!(file = file_name, "Unclassified model file, skipping");
        return None;
    }
    if !seen_files.insert(canonical.clone()) {
        return None;
    }
    let name = backend_name(&canonical);
    ModelEntry::from_file(canonical, name, family, size_bytes)
}
