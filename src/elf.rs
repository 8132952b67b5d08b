// C3: the ELF reconciler. Streams the textual output of the kernel's ELF
// dump utility (`readelf -s --wide`) and reconciles it against the
// compiler-plugin's view of the world (spec.md §4.3).

use crate::config::Configuration;
use crate::corpus::Corpus;
use fxhash::{FxHashMap, FxHashSet};
use std::io::BufRead;
use std::path::PathBuf;

use crate::model::Signature;

#[derive(Debug, Default)]
pub struct ElfInfo {
    /// Signatures present in the final linked image.
    pub in_vmlinux: FxHashSet<Signature>,
    /// Stems of compiler-mangled variants (`.isra`, `.constprop`, ...),
    /// excluding `.cold` partitions, which only their parent can call.
    pub mangled: FxHashSet<Signature>,
    /// 1-based ordinal of a local symbol name among local definitions of
    /// that name in the linked image.
    pub local_sympos: FxHashMap<Signature, u32>,
    /// Symbols carrying `EXPORT_SYMBOL`/`EXPORT_SYMBOL_GPL` (`__ksymtab_*`).
    pub export_func: FxHashSet<Signature>,
}

/// Reconcile a `readelf -s --wide` symbol dump against `corpus`/`config`.
pub fn reconcile<R: BufRead>(reader: R, config: &Configuration, corpus: &Corpus) -> ElfInfo {
    let mut info = ElfInfo::default();
    let mut fn_pos: FxHashMap<Box<str>, u32> = FxHashMap::default();
    let mut current_file = String::new();

    let find_in_any = |name: &str, files: &FxHashSet<PathBuf>| -> Option<PathBuf> {
        files
            .iter()
            .find(|file| corpus.fn_set.contains(&Signature::resolved(name, (*file).clone())))
            .cloned()
    };

    for line in reader.lines().skip(3) {
        let line = match line {
            Ok(l) => l,
            Err(_) => continue,
        };
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 8 {
            continue;
        }
        let symtype = fields[3];
        let scope = fields[4];
        let key = fields[7];

        match symtype {
            "FILE" => {
                // Disagreement 1: `readelf` frequently reports just the
                // basename; rewrite it to the full relative path when we
                // recognize it.
                current_file = config
                    .fullname
                    .get(key)
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| key.to_string());
                continue;
            }
            "NOTYPE" => {
                if let Some(name) = key.strip_prefix("__ksymtab_") {
                    let file = PathBuf::from(&current_file);
                    if config.mod_files.contains(&file) {
                        if let Some(winner) = find_in_any(name, &config.mod_files) {
                            info.export_func.insert(Signature::resolved(name, winner));
                        }
                    }
                }
                continue;
            }
            "FUNC" => {}
            _ => continue,
        }

        // Disagreement 4: compiler-mangled variants (`name.isra.0`, etc).
        if let Some(dot) = key.find('.') {
            if !key[dot..].starts_with(".cold") {
                let stem = &key[..dot];
                info.mangled
                    .insert(Signature::resolved(stem, PathBuf::from(&current_file)));
            }
            continue;
        }

        let resolved_file = if scope == "LOCAL" {
            let file = PathBuf::from(&current_file);
            let counter = fn_pos.entry(key.into()).or_insert(0);
            *counter += 1;
            let pos = *counter;

            if !config.all_files.contains(&file) {
                continue;
            }

            let sig = Signature::resolved(key, file.clone());
            let resolved = if corpus.fn_set.contains(&sig) {
                Some(file)
            } else {
                // Disagreement 2: a local symbol that isn't where the
                // plugin's view expects; try module headers.
                find_in_any(key, &config.mod_hdrs)
            };

            match resolved {
                Some(file) => {
                    let sig = Signature::resolved(key, file.clone());
                    // First-wins-with-warning (spec.md §9 open question i):
                    // never overwrite a sympos already recorded for this
                    // signature.
                    info.local_sympos.entry(sig).or_insert_with(|| {
                        tracing::debug!("sympos {} = {}", key, pos);
                        pos
                    });
                    Some(file)
                }
                None => None,
            }
        } else {
            // Disagreement 3: a global symbol whose reported file doesn't
            // match any known file exactly; look it up across all_files.
            find_in_any(key, &config.all_files)
        };

        if let Some(file) = resolved_file {
            info.in_vmlinux.insert(Signature::resolved(key, file));
        }
    }

    info
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FunctionRecord;
    use std::io::Cursor;
    use std::path::PathBuf;

    fn test_config(mod_files: &[&str]) -> Configuration {
        let mod_files_set: FxHashSet<PathBuf> = mod_files.iter().map(PathBuf::from).collect();
        Configuration {
            mod_hdrs: mod_files_set
                .iter()
                .filter(|f| f.extension().and_then(|e| e.to_str()) == Some("h"))
                .cloned()
                .collect(),
            mod_srcs: mod_files_set
                .iter()
                .filter(|f| f.extension().and_then(|e| e.to_str()) != Some("h"))
                .cloned()
                .collect(),
            all_files: mod_files_set.clone(),
            fullname: mod_files_set
                .iter()
                .filter_map(|f| {
                    f.file_name()
                        .and_then(|n| n.to_str())
                        .map(|n| (n.to_string(), f.clone()))
                })
                .collect(),
            sidecar: FxHashSet::default(),
            sdcr_srcs: FxHashSet::default(),
            interface_prefix: vec![],
            function: Default::default(),
            global_var: Default::default(),
            mod_files: mod_files_set,
        }
    }

    fn def(name: &str, file: &str) -> FunctionRecord {
        FunctionRecord {
            name: name.into(),
            file: PathBuf::from(file),
            l_brace_loc: (0, 0),
            r_brace_loc: (0, 0),
            name_loc: (0, 0),
            external: false,
            public: true,
            is_static: false,
            inline: false,
            weak: false,
            init: false,
            decl_str: None,
        }
    }

    #[test]
    fn mangled_suffix_is_recorded_except_cold() {
        let config = test_config(&["kernel/sched/core.c"]);
        let mut corpus = Corpus::default();
        corpus
            .fn_set
            .insert(Signature::resolved("schedule", PathBuf::from("core.c")));

        let text = "\n\n\n\
            0: 0 0 FILE LOCAL DEFAULT ABS core.c\n\
            1: 100 10 FUNC LOCAL DEFAULT 1 schedule.isra.0\n\
            2: 200 10 FUNC LOCAL DEFAULT 1 schedule.cold\n";
        let info = reconcile(Cursor::new(text), &config, &corpus);
        assert!(info
            .mangled
            .contains(&Signature::resolved("schedule", PathBuf::from("core.c"))));
        assert!(!info.mangled.iter().any(|s| s.name.as_ref() == "schedule.cold"));
    }

    #[test]
    fn local_sympos_is_first_wins() {
        let config = test_config(&["kernel/sched/core.c"]);
        let mut corpus = Corpus::default();
        let sig = Signature::resolved("select_task_rq", PathBuf::from("kernel/sched/core.c"));
        corpus.fn_set.insert(sig.clone());
        corpus
            .records
            .insert(sig, def("select_task_rq", "kernel/sched/core.c"));

        let text = "\n\n\n\
            0: 0 0 FILE LOCAL DEFAULT ABS core.c\n\
            1: 100 10 FUNC LOCAL DEFAULT 1 select_task_rq\n\
            2: 200 10 FUNC LOCAL DEFAULT 1 select_task_rq\n";
        let info = reconcile(Cursor::new(text), &config, &corpus);
        let key = Signature::resolved("select_task_rq", PathBuf::from("kernel/sched/core.c"));
        assert_eq!(info.local_sympos.get(&key), Some(&1));
    }

    #[test]
    fn ksymtab_entry_becomes_export_func() {
        let config = test_config(&["kernel/sched/core.c"]);
        let mut corpus = Corpus::default();
        corpus
            .fn_set
            .insert(Signature::resolved("wake_up_process", PathBuf::from("kernel/sched/core.c")));

        let text = "\n\n\n\
            0: 0 0 FILE LOCAL DEFAULT ABS core.c\n\
            1: 100 10 NOTYPE GLOBAL DEFAULT 1 __ksymtab_wake_up_process\n";
        let info = reconcile(Cursor::new(text), &config, &corpus);
        assert!(info.export_func.contains(&Signature::resolved(
            "wake_up_process",
            PathBuf::from("kernel/sched/core.c")
        )));
    }
}
