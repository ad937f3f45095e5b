//! Auxiliary weights that attach to a base image model: LoRA adapters and
//! ControlNet models.
//!
//! Adapters live in a fixed subdirectory of each model search path
//! (`loras/`, `controlnet/`) and are never standalone models. Their base
//! architecture is guessed from the file name so the compiler can refuse
//! an adapter trained for a different model family.

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::family::Family;

/// Deepest directory level walked below an adapter directory.
const MAX_ADAPTER_DEPTH: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterKind {
    Lora,
    ControlNet,
}

impl AdapterKind {
    pub const ALL: [AdapterKind; 2] = [AdapterKind::Lora, AdapterKind::ControlNet];

    /// Subdirectory of a search path holding this kind.
    pub fn dir_name(self) -> &'static str {
        match self {
            AdapterKind::Lora => "loras",
            AdapterKind::ControlNet => "controlnet",
        }
    }

    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            AdapterKind::Lora => &["safetensors", "ckpt", "pt"],
            AdapterKind::ControlNet => &["safetensors", "pth", "bin"],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AdapterKind::Lora => "lora",
            AdapterKind::ControlNet => "controlnet",
        }
    }
}

impl fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Base model architecture an adapter was trained against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaseArch {
    Sdxl,
    Sd15,
    Flux,
    Ltx,
    Wan,
    Unknown,
}

impl BaseArch {
    /// Guess from a file name. First match wins.
    pub fn detect(file_name: &str) -> Self {
        let name = file_name.to_lowercase();
        if name.contains("sdxl") || name.contains("xl") {
            BaseArch::Sdxl
        } else if name.contains("sd15") || name.contains("sd1.5") || name.contains("sd-1") {
            BaseArch::Sd15
        } else if name.contains("flux") {
            BaseArch::Flux
        } else if name.contains("ltx") {
            BaseArch::Ltx
        } else if name.contains("wan") {
            BaseArch::Wan
        } else {
            BaseArch::Unknown
        }
    }

    /// The architecture checkpoints of `family` use, if adapters apply.
    pub fn for_family(family: Family) -> Option<Self> {
        match family {
            Family::Lightning | Family::Turbo | Family::Sdxl => Some(BaseArch::Sdxl),
            Family::Standard => Some(BaseArch::Sd15),
            Family::Flux => Some(BaseArch::Flux),
            Family::Ltxv => Some(BaseArch::Ltx),
            Family::Wan => Some(BaseArch::Wan),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BaseArch::Sdxl => "sdxl",
            BaseArch::Sd15 => "sd15",
            BaseArch::Flux => "flux",
            BaseArch::Ltx => "ltx",
            BaseArch::Wan => "wan",
            BaseArch::Unknown => "unknown",
        }
    }
}

impl fmt::Display for BaseArch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One discovered adapter file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterEntry {
    pub kind: AdapterKind,
    /// File stem.
    pub name: String,
    pub path: PathBuf,
    /// Path below the adapter directory, `/`-separated.
    pub backend_name: String,
    pub size_bytes: u64,
    pub base: BaseArch,
}

impl AdapterEntry {
    /// Whether this adapter can attach to a checkpoint of `family`. An
    /// undetectable base is allowed through.
    pub fn is_compatible(&self, family: Family) -> bool {
        match (self.base, BaseArch::for_family(family)) {
            (_, None) => false,
            (BaseArch::Unknown, Some(_)) => true,
            (base, Some(target)) => base == target,
        }
    }
}

/// Every adapter found by the last scan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdapterCatalog {
    pub loras: Vec<AdapterEntry>,
    pub controlnets: Vec<AdapterEntry>,
}

impl AdapterCatalog {
    pub fn scan(search_paths: &[PathBuf]) -> Self {
        Self {
            loras: scan_adapters(search_paths, AdapterKind::Lora),
            controlnets: scan_adapters(search_paths, AdapterKind::ControlNet),
        }
    }

    pub fn of_kind(&self, kind: AdapterKind) -> &[AdapterEntry] {
        match kind {
            AdapterKind::Lora => &self.loras,
            AdapterKind::ControlNet => &self.controlnets,
        }
    }

    /// Resolve by name or backend name.
    pub fn find(&self, kind: AdapterKind, reference: &str) -> Option<&AdapterEntry> {
        let entries = self.of_kind(kind);
        entries
            .iter()
            .find(|e| e.name == reference)
            .or_else(|| entries.iter().find(|e| e.backend_name == reference))
    }

    /// Adapters of `kind` usable with `family`.
    pub fn compatible(&self, kind: AdapterKind, family: Family) -> impl Iterator<Item = &AdapterEntry> {
        self.of_kind(kind)
            .iter()
            .filter(move |e| e.is_compatible(family))
    }
}

/// Walk the `kind` subdirectory of every search path.
///
/// Files are deduplicated by file name; the first search path wins.
/// Broken symlinks are skipped. Sorted by lowercased name.
pub fn scan_adapters(search_paths: &[PathBuf], kind: AdapterKind) -> Vec<AdapterEntry> {
    let mut seen = HashSet::new();
    let mut entries = Vec::new();
    for root in search_paths {
        let dir = root.join(kind.dir_name());
        if dir.is_dir() {
            walk(&dir, &dir, 0, kind, &mut seen, &mut entries);
        }
    }
    entries.sort_by_key(|e| e.name.to_lowercase());
    entries
}

fn walk(
    base: &Path,
    dir: &Path,
    depth: usize,
    kind: AdapterKind,
    seen: &mut HashSet<String>,
    entries: &mut Vec<AdapterEntry>,
) {
    if depth > MAX_ADAPTER_DEPTH {
        return;
    }
    let Ok(read_dir) = fs::read_dir(dir) else {
        return;
    };
    for item in read_dir.flatten() {
        let path = item.path();
        let Ok(metadata) = fs::metadata(&path) else {
            tracing::debug!(path = %path.display(), "Broken adapter symlink, skipping");
            continue;
        };
        if metadata.is_dir() {
            walk(base, &path, depth + 1, kind, seen, entries);
            continue;
        }

        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        if !kind.extensions().contains(&ext.to_lowercase().as_str()) {
            continue;
        }
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !seen.insert(file_name.to_string()) {
            continue;
        }
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(file_name)
            .to_string();
        let backend_name = path
            .strip_prefix(base)
            .map(|rel| {
                rel.components()
                    .filter_map(|c| c.as_os_str().to_str())
                    .collect::<Vec<_>>()
                    .join("/")
            })
            .unwrap_or_else(|_| file_name.to_string());

        entries.push(AdapterEntry {
            kind,
            base: BaseArch::detect(&name),
            name,
            path,
            backend_name,
            size_bytes: metadata.len(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"w").unwrap();
    }

    #[test]
    fn detects_base_from_name() {
        assert_eq!(BaseArch::detect("add-detail-xl"), BaseArch::Sdxl);
        assert_eq!(BaseArch::detect("epi_noiseoffset_sd15"), BaseArch::Sd15);
        assert_eq!(BaseArch::detect("flux_realism_lora"), BaseArch::Flux);
        assert_eq!(BaseArch::detect("ltxv_camera_dolly"), BaseArch::Ltx);
        assert_eq!(BaseArch::detect("wan_motion"), BaseArch::Wan);
        assert_eq!(BaseArch::detect("pixel_art"), BaseArch::Unknown);
    }

    #[test]
    fn compatibility_follows_family_architecture() {
        let entry = |base| AdapterEntry {
            kind: AdapterKind::Lora,
            name: "x".into(),
            path: PathBuf::from("/x"),
            backend_name: "x.safetensors".into(),
            size_bytes: 1,
            base,
        };
        assert!(entry(BaseArch::Sdxl).is_compatible(Family::Lightning));
        assert!(!entry(BaseArch::Sdxl).is_compatible(Family::Standard));
        assert!(entry(BaseArch::Unknown).is_compatible(Family::Flux));
        assert!(!entry(BaseArch::Unknown).is_compatible(Family::MusicGen));
    }

    #[test]
    fn scans_adapter_dirs_with_subfolders() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "loras/style/Pixel_Art_XL.safetensors");
        touch(dir.path(), "loras/detail_sd15.pt");
        touch(dir.path(), "loras/readme.txt");
        touch(dir.path(), "controlnet/controlnet-canny-sdxl-1.0.safetensors");

        let catalog = AdapterCatalog::scan(&[dir.path().to_path_buf()]);
        let names: Vec<_> = catalog.loras.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["detail_sd15", "Pixel_Art_XL"]);
        assert_eq!(catalog.loras[1].backend_name, "style/Pixel_Art_XL.safetensors");
        assert_eq!(catalog.loras[1].base, BaseArch::Sdxl);
        assert_eq!(catalog.controlnets.len(), 1);
        assert_eq!(catalog.controlnets[0].kind, AdapterKind::ControlNet);
    }

    #[test]
    fn first_search_path_wins_on_duplicate_names() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        touch(a.path(), "loras/glow.safetensors");
        touch(b.path(), "loras/glow.safetensors");

        let loras = scan_adapters(
            &[a.path().to_path_buf(), b.path().to_path_buf()],
            AdapterKind::Lora,
        );
        assert_eq!(loras.len(), 1);
        assert!(loras[0].path.starts_with(a.path()));
    }

    #[test]
    fn find_and_filter_by_family() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "loras/glow_xl.safetensors");
        touch(dir.path(), "loras/ink_sd15.safetensors");
        let catalog = AdapterCatalog::scan(&[dir.path().to_path_buf()]);

        assert!(catalog.find(AdapterKind::Lora, "glow_xl").is_some());
        assert!(catalog.find(AdapterKind::Lora, "ink_sd15.safetensors").is_some());
        assert!(catalog.find(AdapterKind::ControlNet, "glow_xl").is_none());
        let sdxl: Vec<_> = catalog
            .compatible(AdapterKind::Lora, Family::Sdxl)
            .map(|e| e.name.as_str())
            .collect();
        assert_eq!(sdxl, vec!["glow_xl"]);
    }
}
