// C4: the boundary solver. The intellectual core of the engine — set
// algebra plus a least-fixed-point "inflection" operator over the call
// graph (spec.md §4.4).

use crate::config::Configuration;
use crate::corpus::Corpus;
use crate::elf::ElfInfo;
use crate::error::{EngineError, EngineResult};
use crate::model::{Edge, Signature};
use crate::resolver::Linkage;
use fxhash::{FxHashMap, FxHashSet};

/// Every named, disjoint-or-overlapping set the solver produces. Each
/// member of spec.md's "FunctionClass" gets its own typed field so the
/// invariants of spec.md §8 are plain field comparisons, not stringly
/// keyed lookups.
#[derive(Debug, Default)]
pub struct Classification {
    pub interface: FxHashSet<Signature>,
    pub callback: FxHashSet<Signature>,
    pub callback_optimized: FxHashSet<Signature>,
    pub border: FxHashSet<Signature>,
    pub init: FxHashSet<Signature>,
    pub sidecar: FxHashSet<Signature>,
    pub sdcr_left: FxHashSet<Signature>,
    pub sdcr_out: FxHashSet<Signature>,
    pub insider: FxHashSet<Signature>,
    pub sched_outsider: FxHashSet<Signature>,
    pub optimized_out: FxHashSet<Signature>,
    pub public_user: FxHashSet<Signature>,
    pub tainted: FxHashSet<Signature>,
    pub undefined: FxHashSet<Signature>,
    pub export: FxHashSet<Signature>,
    pub fake_global: FxHashSet<Signature>,
    pub in_vmlinux: FxHashSet<Signature>,
    pub mangled: FxHashSet<Signature>,
}

/// Per-struct classification of field visibility (spec.md §4.4 "Struct
/// field analysis").
#[derive(Debug, Default, Clone)]
pub struct StructDoc {
    pub all_fields: FxHashSet<String>,
    pub public_fields: FxHashSet<String>,
    pub public_users: FxHashSet<Signature>,
}

pub fn solve(
    config: &Configuration,
    corpus: &Corpus,
    linkage: &Linkage,
    elf: &ElfInfo,
) -> EngineResult<(Classification, FxHashMap<String, StructDoc>)> {
    let mut c = Classification::default();

    c.in_vmlinux = elf.in_vmlinux.clone();
    c.mangled = elf.mangled.clone();
    c.export = elf.export_func.clone();
    c.fake_global = linkage.fake_global.clone();
    c.init = corpus.init_set.clone();
    c.interface = corpus.interface_set.clone();

    // Callbacks vs interfaces.
    c.callback = linkage
        .callback
        .difference(&c.interface)
        .cloned()
        .collect();
    c.callback_optimized = c
        .callback
        .difference(&c.in_vmlinux)
        .cloned()
        .collect();
    c.callback = c
        .callback
        .difference(&c.callback_optimized)
        .cloned()
        .collect();

    // Border: the bidirectional cut points.
    c.border = c.interface.union(&c.callback).cloned().collect();

    // Sidecar precondition: every sidecar symbol must actually be linked.
    if !config.sidecar.is_subset(&c.in_vmlinux) {
        let missing: Vec<_> = config.sidecar.difference(&c.in_vmlinux).cloned().collect();
        return Err(EngineError::SidecarInvariant(format!(
            "sidecar functions must not be optimized away by the compiler; missing from vmlinux: {:?}",
            missing
        )));
    }
    c.sidecar = config.sidecar.clone();

    // Cut precondition: sidecar and border are disjoint.
    if !c.sidecar.is_disjoint(&c.border) {
        let overlap: Vec<_> = c.sidecar.intersection(&c.border).cloned().collect();
        return Err(EngineError::SidecarInvariant(format!(
            "sidecar functions overlap the module border: {:?}",
            overlap
        )));
    }

    // Sidecar keep-set: bounded DFS restricted to each sidecar's own
    // source file, following successors that were optimized away.
    c.sdcr_left = sidecar_keep_set(&c.sidecar, &c.in_vmlinux, &linkage.edges);
    c.sdcr_out = corpus
        .sdcr_fns
        .difference(&c.sdcr_left)
        .cloned()
        .collect();

    // Inflection: least-fixed-point outsider promotion.
    let inflect_cut: FxHashSet<Signature> = c
        .border
        .union(&c.init)
        .cloned()
        .chain(c.sidecar.iter().cloned())
        .collect();

    let initial_insider: FxHashSet<Signature> = corpus
        .mod_fns
        .difference(&c.border)
        .filter(|s| !c.export.contains(*s))
        .cloned()
        .collect();

    let mut insider = inflect(initial_insider, &linkage.edges, &inflect_cut);
    insider = insider
        .difference(&c.init)
        .filter(|s| !c.fake_global.contains(*s))
        .cloned()
        .collect();
    c.insider = insider;

    // Remaining classes.
    c.sched_outsider = corpus
        .mod_fns
        .difference(&c.insider)
        .filter(|s| !c.border.contains(*s))
        .cloned()
        .chain(c.callback_optimized.iter().cloned())
        .chain(
            c.fake_global
                .intersection(&corpus.mod_fns)
                .cloned(),
        )
        .collect();

    c.optimized_out = c
        .sched_outsider
        .difference(&c.in_vmlinux)
        .filter(|s| !c.init.contains(*s))
        .cloned()
        .collect();

    c.public_user = corpus
        .fn_set
        .difference(&c.insider)
        .filter(|s| !c.border.contains(*s))
        .cloned()
        .collect();

    c.tainted = c
        .border
        .union(&c.insider)
        .cloned()
        .chain(c.sidecar.iter().cloned())
        .collect::<FxHashSet<_>>()
        .intersection(&c.in_vmlinux)
        .cloned()
        .collect();

    c.undefined = c
        .sched_outsider
        .difference(&c.optimized_out)
        .cloned()
        .chain(c.border.iter().cloned())
        .chain(c.sidecar.iter().cloned())
        .collect();

    let struct_docs = analyze_structs(corpus, &c);
    validate_privacy(config, &struct_docs)?;

    Ok((c, struct_docs))
}

/// Least-fixed-point demotion: a function that remains inside the module
/// must be callable only from the inflect-cut or from other insiders. Any
/// other caller forces the callee out, in batches, until a pass produces
/// no further demotions.
fn inflect(
    initial: FxHashSet<Signature>,
    edges: &[Edge],
    inflect_cut: &FxHashSet<Signature>,
) -> FxHashSet<Signature> {
    let mut insiders = initial;
    loop {
        let mut demoted: FxHashSet<Signature> = FxHashSet::default();
        for edge in edges {
            if insiders.contains(&edge.to) && !insiders.contains(&edge.from) && !inflect_cut.contains(&edge.from) {
                demoted.insert(edge.to.clone());
            }
        }
        if demoted.is_empty() {
            break;
        }
        for sig in &demoted {
            insiders.remove(sig);
        }
    }
    insiders
}

/// DFS over the call graph, restricted to a sidecar's own source file,
/// following a successor only when it was optimized away (hence must be
/// kept alive by retaining its caller).
fn sidecar_keep_set(
    sidecar: &FxHashSet<Signature>,
    in_vmlinux: &FxHashSet<Signature>,
    edges: &[Edge],
) -> FxHashSet<Signature> {
    let mut by_source: FxHashMap<&Signature, Vec<&Edge>> = FxHashMap::default();
    for edge in edges {
        by_source.entry(&edge.from).or_default().push(edge);
    }

    let mut leftover = FxHashSet::default();
    for start in sidecar {
        dfs(start, in_vmlinux, &by_source, &mut leftover);
    }
    leftover
}

fn dfs<'a>(
    start: &'a Signature,
    in_vmlinux: &FxHashSet<Signature>,
    by_source: &FxHashMap<&'a Signature, Vec<&'a Edge>>,
    leftover: &mut FxHashSet<Signature>,
) {
    if leftover.contains(start) {
        return;
    }
    leftover.insert(start.clone());

    if let Some(out_edges) = by_source.get(start) {
        for edge in out_edges {
            if edge.to.file == start.file && !in_vmlinux.contains(&edge.to) {
                dfs(&edge.to, in_vmlinux, by_source, leftover);
            }
        }
    }
}

fn analyze_structs(corpus: &Corpus, c: &Classification) -> FxHashMap<String, StructDoc> {
    let mut docs: FxHashMap<String, StructDoc> = FxHashMap::default();
    for (name, meta) in &corpus.structs {
        let doc = docs.entry(name.clone()).or_default();
        doc.all_fields.extend(meta.all_fields.iter().cloned());
        for (field, users) in &meta.public_fields {
            let public_users: Vec<&Signature> =
                users.iter().filter(|u| c.public_user.contains(*u)).collect();
            if !public_users.is_empty() {
                doc.public_fields.insert(field.clone());
                doc.public_users.extend(public_users.into_iter().cloned());
            }
        }
    }
    docs
}

fn validate_privacy(
    config: &Configuration,
    docs: &FxHashMap<String, StructDoc>,
) -> EngineResult<()> {
    // `global_var.force_private` doubles as the set of struct names that
    // must remain purely private (e.g. `sched_class`); there is no
    // separate "private struct" config key in spec.md, so a struct name
    // that also appears in `force_private` is treated as the assertion
    // target, matching how the upstream tool special-cases `sched_class`.
    for name in &config.global_var.force_private {
        if let Some(doc) = docs.get(name) {
            if !doc.public_users.is_empty() {
                return Err(EngineError::PrivacyViolation {
                    struct_name: name.clone(),
                    users: doc.public_users.iter().cloned().collect(),
                });
            }
        }
    }
    Ok(())
}
