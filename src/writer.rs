// C6: the artifact writer. Emits the six files downstream build steps
// consume, in the exact shapes `analyze.py`'s closing block produces them
// (spec.md §4.6, §6).

use crate::config::{Configuration, GlobalVarConfig};
use crate::corpus::Corpus;
use crate::elf::ElfInfo;
use crate::error::{EngineError, EngineResult};
use crate::model::{FunctionRecord, Signature, VarRecord};
use crate::resolver::Linkage;
use crate::solver::{Classification, StructDoc};
use fxhash::{FxHashMap, FxHashSet};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

const TAINTED_FMT: &str = "TAINTED_FUNCTION({},{})\n";
const CALLBACK_FMT: &str = "EXPORT_CALLBACK({fn}, {ret}, {params})\n";
const EXPORT_FMT: &str = "EXPORT_PLUGSCHED({fn}, {ret}, {params})\n";

pub fn write_artifacts(
    config: &Configuration,
    corpus: &Corpus,
    linkage: &Linkage,
    elf: &ElfInfo,
    classification: &Classification,
    struct_docs: &FxHashMap<String, StructDoc>,
    tmp_dir: &Path,
    mod_path: &Path,
) -> EngineResult<()> {
    write_header_symbol(corpus, tmp_dir)?;
    write_boundary_doc(struct_docs, tmp_dir)?;
    write_boundary_extract(config, classification, tmp_dir)?;
    write_tainted_functions(classification, elf, mod_path)?;
    write_undefined_functions(classification, elf, tmp_dir)?;
    write_export_jump(classification, corpus, linkage, mod_path)?;
    Ok(())
}

#[derive(Serialize)]
struct HeaderSymbols<'a> {
    #[serde(rename = "fn")]
    functions: &'a [FunctionRecord],
    var: &'a [VarRecord],
}

fn write_header_symbol(corpus: &Corpus, tmp_dir: &Path) -> EngineResult<()> {
    let payload = HeaderSymbols {
        functions: &corpus.hdr_fns,
        var: &corpus.hdr_vars,
    };
    let text = serde_json::to_string_pretty(&payload)
        .map_err(|e| EngineError::Config(format!("header_symbol.json: {}", e)))?;
    fs::write(tmp_dir.join("header_symbol.json"), text)?;
    Ok(())
}

#[derive(Serialize)]
struct StructDocOut {
    all_fields: BTreeSet<String>,
    public_fields: BTreeSet<String>,
    public_users: BTreeSet<Signature>,
}

fn write_boundary_doc(
    struct_docs: &FxHashMap<String, StructDoc>,
    tmp_dir: &Path,
) -> EngineResult<()> {
    let out: FxHashMap<String, StructDocOut> = struct_docs
        .iter()
        .map(|(name, doc)| {
            (
                name.clone(),
                StructDocOut {
                    all_fields: doc.all_fields.iter().cloned().collect(),
                    public_fields: doc.public_fields.iter().cloned().collect(),
                    public_users: doc.public_users.iter().cloned().collect(),
                },
            )
        })
        .collect();
    let text = serde_yaml::to_string(&out)
        .map_err(|e| EngineError::Config(format!("boundary_doc.yaml: {}", e)))?;
    fs::write(tmp_dir.join("boundary_doc.yaml"), text)?;
    Ok(())
}

#[derive(Serialize)]
struct FunctionOutput {
    interface: BTreeSet<Signature>,
    callback: BTreeSet<Signature>,
    sched_outsider: BTreeSet<Signature>,
    init: BTreeSet<Signature>,
    insider: BTreeSet<Signature>,
    outsider_opt: BTreeSet<Signature>,
    export: BTreeSet<Signature>,
    sdcr_out: BTreeSet<Signature>,
}

#[derive(Serialize)]
struct BoundaryExtract<'a> {
    mod_files: BTreeSet<&'a PathBuf>,
    sidecar: BTreeSet<&'a Signature>,
    interface_prefix: &'a [String],
    function: FunctionOutput,
    global_var: &'a GlobalVarConfig,
}

fn write_boundary_extract(
    config: &Configuration,
    classification: &Classification,
    tmp_dir: &Path,
) -> EngineResult<()> {
    let extract = BoundaryExtract {
        mod_files: config.mod_files.iter().collect(),
        sidecar: config.sidecar.iter().collect(),
        interface_prefix: &config.interface_prefix,
        function: FunctionOutput {
            interface: classification.interface.iter().cloned().collect(),
            callback: classification.callback.iter().cloned().collect(),
            sched_outsider: classification.sched_outsider.iter().cloned().collect(),
            init: classification.init.iter().cloned().collect(),
            insider: classification.insider.iter().cloned().collect(),
            outsider_opt: classification.optimized_out.iter().cloned().collect(),
            export: classification.export.iter().cloned().collect(),
            sdcr_out: classification.sdcr_out.iter().cloned().collect(),
        },
        global_var: &config.global_var,
    };
    let text = serde_yaml::to_string(&extract)
        .map_err(|e| EngineError::Config(format!("boundary_extract.yaml: {}", e)))?;
    fs::write(tmp_dir.join("boundary_extract.yaml"), text)?;
    Ok(())
}

fn write_tainted_functions(
    classification: &Classification,
    elf: &ElfInfo,
    mod_path: &Path,
) -> EngineResult<()> {
    let sorted: BTreeSet<&Signature> = classification.tainted.iter().collect();
    let mut out = String::new();
    for sig in sorted {
        // Consistent with kpatch: a global symbol's sympos defaults to 1.
        let pos = elf.local_sympos.get(sig).copied().unwrap_or(1).max(1);
        out.push_str(&TAINTED_FMT.replacen("{}", &sig.name, 1).replacen("{}", &pos.to_string(), 1));
    }
    fs::write(mod_path.join("tainted_functions.h"), out)?;
    Ok(())
}

fn write_undefined_functions(
    classification: &Classification,
    elf: &ElfInfo,
    tmp_dir: &Path,
) -> EngineResult<()> {
    let sorted: BTreeSet<&Signature> = classification.undefined.iter().collect();
    let entries: Vec<String> = sorted
        .into_iter()
        .map(|sig| {
            let pos = elf.local_sympos.get(sig).copied().unwrap_or(0);
            format!("\"{}\", {}", sig.name, pos)
        })
        .collect();
    let body = format!("{{{}}}", entries.join("},\n{"));
    let dir = tmp_dir.join("symbol_resolve");
    fs::create_dir_all(&dir)?;
    fs::write(dir.join("undefined_functions.h"), body)?;
    Ok(())
}

fn write_export_jump(
    classification: &Classification,
    corpus: &Corpus,
    linkage: &Linkage,
    mod_path: &Path,
) -> EngineResult<()> {
    let mut decl_strs = func_decl_strings(&classification.callback, CALLBACK_FMT, corpus, linkage)?;
    decl_strs.extend(func_decl_strings(
        &classification.interface,
        EXPORT_FMT,
        corpus,
        linkage,
    )?);
    decl_strs.extend(func_decl_strings(
        &classification.sidecar,
        EXPORT_FMT,
        corpus,
        linkage,
    )?);

    let body: String = decl_strs.into_iter().collect();
    fs::write(mod_path.join("export_jump.h"), body)?;
    Ok(())
}

/// Generate declaration strings for a set of signatures. If two
/// definitions sharing a name both resolve to this template and neither
/// is the symbol the linker actually picks, that's an unresolvable
/// collision: the export-jump shim has no way to pick a winner.
fn func_decl_strings(
    signatures: &FxHashSet<Signature>,
    template: &str,
    corpus: &Corpus,
    linkage: &Linkage,
) -> EngineResult<BTreeSet<String>> {
    let mut decl_strs = BTreeSet::new();
    let mut local_syms: FxHashSet<Box<str>> = FxHashSet::default();

    for sig in signatures {
        let decl = corpus.decls.get(sig).ok_or_else(|| EngineError::Metadata {
            file: sig.file.path().map(|p| p.to_path_buf()).unwrap_or_default(),
            reason: format!("missing declaration string for {}", sig),
        })?;
        let s = template
            .replace("{fn}", &decl.fn_name)
            .replace("{ret}", &decl.ret)
            .replace("{params}", &decl.params);

        let is_link_winner = sig.file.path().map_or(false, |file| {
            linkage
                .global_fn_dict
                .get(sig.name.as_ref())
                .map_or(false, |winner| winner == file)
        });
        if !is_link_winner && !local_syms.insert(sig.name.clone()) {
            return Err(EngineError::ExportJumpCollision(sig.name.to_string()));
        }
        decl_strs.insert(s);
    }
    Ok(decl_strs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DeclStr;

    fn sig(name: &str, file: &str) -> Signature {
        Signature::resolved(name, PathBuf::from(file))
    }

    fn decl(name: &str) -> DeclStr {
        DeclStr {
            fn_name: name.to_string(),
            ret: "void".to_string(),
            params: "void".to_string(),
        }
    }

    #[test]
    fn decl_strings_are_sorted_and_deduplicated() {
        let mut corpus = Corpus::default();
        corpus.decls.insert(sig("b_fn", "a.c"), decl("b_fn"));
        corpus.decls.insert(sig("a_fn", "a.c"), decl("a_fn"));
        let linkage = Linkage::default();
        let sigs: FxHashSet<Signature> = [sig("b_fn", "a.c"), sig("a_fn", "a.c")]
            .into_iter()
            .collect();

        let strs = func_decl_strings(&sigs, EXPORT_FMT, &corpus, &linkage).unwrap();
        let ordered: Vec<&String> = strs.iter().collect();
        assert_eq!(ordered.len(), 2);
        assert!(ordered[0] < ordered[1]);
    }

    #[test]
    fn duplicate_local_symbol_is_a_collision() {
        let mut corpus = Corpus::default();
        corpus.decls.insert(sig("f", "a.c"), decl("f"));
        corpus.decls.insert(sig("f", "b.c"), decl("f"));
        let linkage = Linkage::default(); // neither file is the link winner
        let sigs: FxHashSet<Signature> = [sig("f", "a.c"), sig("f", "b.c")].into_iter().collect();

        let err = func_decl_strings(&sigs, EXPORT_FMT, &corpus, &linkage).unwrap_err();
        assert!(matches!(err, EngineError::ExportJumpCollision(name) if name == "f"));
    }

    #[test]
    fn link_winner_is_exempt_from_the_collision_check() {
        let mut corpus = Corpus::default();
        corpus.decls.insert(sig("f", "a.c"), decl("f"));
        corpus.decls.insert(sig("f", "b.c"), decl("f"));
        let mut linkage = Linkage::default();
        linkage
            .global_fn_dict
            .insert("f".into(), PathBuf::from("a.c"));
        let sigs: FxHashSet<Signature> = [sig("f", "a.c"), sig("f", "b.c")].into_iter().collect();

        // b.c is still a non-winner local definition, but a.c being the
        // winner means only one non-winner remains, so no collision.
        let strs = func_decl_strings(&sigs, EXPORT_FMT, &corpus, &linkage).unwrap();
        assert_eq!(strs.len(), 1);
    }
}
