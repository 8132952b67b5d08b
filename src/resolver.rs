// C2: the link resolver. Replaces every `'?'`-file signature with the
// unique signature actually linked, following strong-over-weak and
// arch-weak-over-normal-weak precedence (spec.md §4.2).

use crate::corpus::Corpus;
use crate::model::{Edge, FileRef, Signature};
use fxhash::{FxHashMap, FxHashSet};
use std::path::PathBuf;
use tracing::warn;

/// Lower numeric priority wins at link time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Priority {
    Strong = 1,
    WeakArch = 2,
    WeakNorm = 3,
}

/// Outcome of C2: the corpus with every resolvable `'?'` eliminated.
#[derive(Debug, Default)]
pub struct Linkage {
    /// name -> the file of the candidate that wins at link time.
    pub global_fn_dict: FxHashMap<Box<str>, PathBuf>,
    /// Weak definitions shadowed by a higher-priority definition.
    pub fake_global: FxHashSet<Signature>,
    /// Edges with every `'?'` target rewritten to its resolved file;
    /// edges whose target can never be resolved are dropped.
    pub edges: Vec<Edge>,
    /// Callback references rewritten the same way, restricted to
    /// `mod_files` (callers outside the module are not callbacks).
    pub callback: FxHashSet<Signature>,
}

/// Resolve every public definition's linkage priority and determine, for
/// each name, which file wins at link time.
pub fn resolve(corpus: &Corpus, mod_files: &FxHashSet<PathBuf>) -> Linkage {
    let mut candidates: FxHashMap<Box<str>, Vec<(Priority, PathBuf)>> = FxHashMap::default();

    for record in corpus.records.values() {
        if !record.public {
            continue;
        }
        let is_c_file = record.file.extension().and_then(|e| e.to_str()) == Some("c");
        if !(record.weak || is_c_file) {
            continue;
        }
        let priority = if record.weak && starts_with_arch(&record.file) {
            Priority::WeakArch
        } else if record.weak {
            Priority::WeakNorm
        } else if is_c_file {
            Priority::Strong
        } else {
            continue;
        };
        candidates
            .entry(record.name.clone())
            .or_default()
            .push((priority, record.file.clone()));
    }

    let mut global_fn_dict = FxHashMap::default();
    let mut fake_global = FxHashSet::default();

    for (name, mut cands) in candidates {
        cands.sort();
        let (winning_priority, winning_file) = cands[0].clone();
        if cands.len() > 1 && cands[1].0 == winning_priority && name.as_ref() != "main" {
            warn!(
                "ambiguous link precedence for `{}`: linker may pick either `{}` or `{}`; \
                 resolver picked the lexicographically first",
                name,
                winning_file.display(),
                cands[1].1.display(),
            );
        }
        for (prio, file) in &cands[1..] {
            if *prio == Priority::WeakArch || *prio == Priority::WeakNorm {
                fake_global.insert(Signature::resolved(name.clone(), file.clone()));
            }
        }
        global_fn_dict.insert(name, winning_file);
    }

    let lookup = |sig: Signature| -> Option<Signature> {
        match &sig.file {
            FileRef::Resolved(_) => Some(sig),
            FileRef::Unresolved => global_fn_dict
                .get(&sig.name)
                .map(|file| Signature::resolved(sig.name.clone(), file.clone())),
        }
    };

    let edges = corpus
        .edges
        .iter()
        .filter_map(|edge| {
            lookup(edge.to.clone()).map(|to| Edge {
                from: edge.from.clone(),
                to,
            })
        })
        .collect();

    let callback = corpus
        .callback
        .iter()
        .filter_map(|cb| lookup(cb.clone()))
        .filter(|sig| sig.file.path().map_or(false, |p| mod_files.contains(p)))
        .collect();

    Linkage {
        global_fn_dict,
        fake_global,
        edges,
        callback,
    }
}

fn starts_with_arch(file: &std::path::Path) -> bool {
    file.components()
        .next()
        .and_then(|c| c.as_os_str().to_str())
        .map_or(false, |s| s == "arch")
}
