// C1: the metadata loader. Reads the configuration document plus every
// `*.boundary` artifact discovered under the working directory and builds
// the frozen, in-memory corpus that every later phase reads from.

use crate::config::Configuration;
use crate::error::{EngineError, EngineResult};
use crate::model::{DeclStr, Edge, FunctionRecord, MetadataRecord, Signature, StructMeta, VarRecord};
use fxhash::{FxHashMap, FxHashSet};
use rayon::prelude::*;
use std::path::Path;

/// Number of discovered `*.boundary` files above which metadata is loaded
/// in parallel. Below it, the thread-pool setup outweighs the benefit.
const PARALLEL_THRESHOLD: usize = 32;

#[derive(Debug, Default)]
pub struct Corpus {
    /// The universe of signatures seen anywhere.
    pub fn_set: FxHashSet<Signature>,
    /// Every function record, keyed by signature. The link resolver (C2)
    /// needs the full `public`/`weak`/`file` picture, not just membership.
    pub records: FxHashMap<Signature, FunctionRecord>,
    /// Signatures defined in a `mod_files` translation unit.
    pub mod_fns: FxHashSet<Signature>,
    /// Signatures defined in a sidecar source file.
    pub sdcr_fns: FxHashSet<Signature>,
    /// Signatures marked `init`.
    pub init_set: FxHashSet<Signature>,
    /// Seed interface set: configured names restricted to `mod_files`,
    /// plus every `mod_files` definition whose name starts with a
    /// configured interface prefix. Sidecar sources never contribute.
    pub interface_set: FxHashSet<Signature>,
    /// Function records located in module headers.
    pub hdr_fns: Vec<FunctionRecord>,
    /// Variable records located in module headers.
    pub hdr_vars: Vec<VarRecord>,
    /// Export/jump decl strings, keyed by signature.
    pub decls: FxHashMap<Signature, DeclStr>,
    /// Raw callback references (file may still be unresolved).
    pub callback: Vec<Signature>,
    /// Raw call-graph edges (target file may still be unresolved).
    pub edges: Vec<Edge>,
    /// Struct descriptors, keyed by struct name, merged across every
    /// translation unit that mentions the struct.
    pub structs: FxHashMap<String, StructMeta>,
}

impl Corpus {
    pub fn build(config: &Configuration, working_dir: &Path) -> EngineResult<Corpus> {
        let files = discover_metadata_files(working_dir)?;
        let records = load_records(&files)?;

        let mut corpus = Corpus::default();
        for (path, record) in files.iter().zip(records.into_iter()) {
            corpus.absorb(config, path, record)?;
        }
        Ok(corpus)
    }

    fn absorb(&mut self, config: &Configuration, path: &Path, record: MetadataRecord) -> EngineResult<()> {
        for fn_record in record.functions {
            let sig = fn_record.signature();
            self.fn_set.insert(sig.clone());
            self.records.insert(sig.clone(), fn_record.clone());

            let in_mod = config.mod_files.contains(&fn_record.file);
            let in_sdcr = config.sdcr_srcs.contains(&fn_record.file);

            if in_mod {
                self.mod_fns.insert(sig.clone());
                if let Some(decl_str) = &fn_record.decl_str {
                    self.decls.insert(sig.clone(), decl_str.clone());
                }
            }
            if in_sdcr {
                self.sdcr_fns.insert(sig.clone());
                if let Some(decl_str) = &fn_record.decl_str {
                    self.decls.insert(sig.clone(), decl_str.clone());
                }
            }
            if config.mod_hdrs.contains(&fn_record.file) {
                self.hdr_fns.push(fn_record.clone());
            }
            if fn_record.init {
                self.init_set.insert(sig.clone());
            }

            if in_mod {
                let name_configured = config.function.interface.contains(fn_record.name.as_ref());
                let prefixed = config
                    .interface_prefix
                    .iter()
                    .any(|prefix| fn_record.name.starts_with(prefix.as_str()));
                if name_configured || prefixed {
                    self.interface_set.insert(sig.clone());
                }
            }
        }

        for var_record in record.var {
            if config.mod_hdrs.contains(&var_record.file) {
                self.hdr_vars.push(var_record);
            }
        }

        self.callback.extend(record.callback);
        self.edges.extend(record.edge);

        for (name, meta) in record.structs {
            let entry = self.structs.entry(name).or_default();
            entry.all_fields.extend(meta.all_fields);
            for (field, users) in meta.public_fields {
                entry.public_fields.entry(field).or_default().extend(users);
            }
        }

        let _ = path; // retained for future per-file diagnostics
        Ok(())
    }
}

fn discover_metadata_files(working_dir: &Path) -> EngineResult<Vec<std::path::PathBuf>> {
    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(working_dir) {
        let entry = entry.map_err(|e| EngineError::Metadata {
            file: working_dir.to_path_buf(),
            reason: e.to_string(),
        })?;
        if entry.file_type().is_file()
            && entry.path().extension().and_then(|e| e.to_str()) == Some("boundary")
        {
            files.push(entry.path().to_path_buf());
        }
    }
    files.sort();
    Ok(files)
}

fn load_records(files: &[std::path::PathBuf]) -> EngineResult<Vec<MetadataRecord>> {
    let load_one = |path: &std::path::PathBuf| -> EngineResult<MetadataRecord> {
        let text = std::fs::read_to_string(path).map_err(EngineError::Io)?;
        serde_json::from_str(&text).map_err(|e| EngineError::Metadata {
            file: path.clone(),
            reason: e.to_string(),
        })
    };

    if files.len() >= PARALLEL_THRESHOLD {
        files.par_iter().map(load_one).collect()
    } else {
        files.iter().map(load_one).collect()
    }
}
