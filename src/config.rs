// The configuration document (spec.md §3, §6): which files form the
// module, which functions are pinned as sidecars, the interface-prefix
// list, the seed interface names, and the two global-variable visibility
// overrides. Loading also derives the file-set partitions (`mod_hdrs`,
// `mod_srcs`, `sdcr_srcs`, `all_files`, `fullname`) that C2/C3 need but
// that aren't themselves part of the document.

use crate::error::{EngineError, EngineResult};
use crate::model::Signature;
use fxhash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FunctionConfig {
    #[serde(default)]
    pub interface: FxHashSet<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GlobalVarConfig {
    #[serde(default)]
    pub force_private: FxHashSet<String>,
    #[serde(default)]
    pub extra_public: FxHashSet<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawConfiguration {
    mod_files: FxHashSet<PathBuf>,
    #[serde(default)]
    sidecar: Option<FxHashSet<Signature>>,
    #[serde(default)]
    interface_prefix: Vec<String>,
    #[serde(default)]
    function: FunctionConfig,
    #[serde(default)]
    global_var: GlobalVarConfig,
}

/// Frozen, validated configuration plus the file-set partitions derived
/// from it. Built once by [`Configuration::load`] and never mutated.
#[derive(Debug, Clone)]
pub struct Configuration {
    pub mod_files: FxHashSet<PathBuf>,
    pub mod_hdrs: FxHashSet<PathBuf>,
    pub mod_srcs: FxHashSet<PathBuf>,
    pub sidecar: FxHashSet<Signature>,
    pub sdcr_srcs: FxHashSet<PathBuf>,
    pub all_files: FxHashSet<PathBuf>,
    /// basename -> full relative path, for reconciling `readelf`'s
    /// frequently-truncated `FILE` entries (Disagreement 1).
    pub fullname: FxHashMap<String, PathBuf>,
    pub interface_prefix: Vec<String>,
    pub function: FunctionConfig,
    pub global_var: GlobalVarConfig,
}

impl Configuration {
    pub fn load(path: &Path) -> EngineResult<Configuration> {
        let text = std::fs::read_to_string(path).map_err(EngineError::Io)?;
        let raw: RawConfiguration = serde_yaml::from_str(&text)
            .map_err(|e| EngineError::Config(format!("{}: {}", path.display(), e)))?;

        if raw.mod_files.is_empty() {
            return Err(EngineError::Config(
                "`mod_files` must name at least one file".to_string(),
            ));
        }

        let mod_hdrs: FxHashSet<PathBuf> = raw
            .mod_files
            .iter()
            .filter(|f| has_extension(f, "h"))
            .cloned()
            .collect();
        let mod_srcs: FxHashSet<PathBuf> = raw
            .mod_files
            .iter()
            .filter(|f| !has_extension(f, "h"))
            .cloned()
            .collect();

        let sidecar = raw.sidecar.unwrap_or_default();
        let sdcr_srcs: FxHashSet<PathBuf> = sidecar
            .iter()
            .filter_map(|s| s.file.path().map(|p| p.to_path_buf()))
            .collect();

        let all_files: FxHashSet<PathBuf> = mod_hdrs
            .iter()
            .chain(mod_srcs.iter())
            .chain(sdcr_srcs.iter())
            .cloned()
            .collect();

        let fullname: FxHashMap<String, PathBuf> = all_files
            .iter()
            .filter_map(|f| {
                f.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| (n.to_string(), f.clone()))
            })
            .collect();

        Ok(Configuration {
            mod_files: raw.mod_files,
            mod_hdrs,
            mod_srcs,
            sidecar,
            sdcr_srcs,
            all_files,
            fullname,
            interface_prefix: raw.interface_prefix,
            function: raw.function,
            global_var: raw.global_var,
        })
    }
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(ext)
}
