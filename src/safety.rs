// C5: the safety checker. A mangled border/sidecar symbol may still be
// reachable through its un-mangled stem if every caller along the chain
// is itself in-vmlinux; that reachability would let an outsider redirect
// into the module without going through the declared border. Fatal if so
// (spec.md §4.5).

use crate::model::{Edge, Signature};
use crate::solver::Classification;
use fxhash::FxHashSet;

/// Check every mangled border/sidecar symbol for an unsafe redirect path.
/// Returns the first offending symbol, if any.
pub fn find_unsafe_mangled_redirect(c: &Classification, edges: &[Edge]) -> Option<Signature> {
    let mut by_target: std::collections::HashMap<&Signature, Vec<&Edge>> =
        std::collections::HashMap::new();
    for edge in edges {
        by_target.entry(&edge.to).or_default().push(edge);
    }

    let guarded: FxHashSet<&Signature> = c.sidecar.union(&c.border).collect();
    let mangled: FxHashSet<&Signature> = c.mangled.iter().collect();
    for sym in guarded.intersection(&mangled) {
        let mut visiting = FxHashSet::default();
        if is_redirect_unsafe(*sym, c, &by_target, &mut visiting) {
            return Some((**sym).clone());
        }
    }
    None
}

fn is_redirect_unsafe<'a>(
    target: &'a Signature,
    c: &'a Classification,
    by_target: &std::collections::HashMap<&'a Signature, Vec<&'a Edge>>,
    visiting: &mut FxHashSet<&'a Signature>,
) -> bool {
    if !visiting.insert(target) {
        return false;
    }

    let incoming = match by_target.get(target) {
        Some(edges) => edges,
        None => return false,
    };

    for edge in incoming {
        // Cross-file calls can never redirect: the kernel is built
        // without LTO, so a caller in a different translation unit always
        // goes through the real symbol.
        if edge.from.file != target.file {
            continue;
        }
        if c.sched_outsider.contains(&edge.from) {
            return true;
        }
        if (c.mangled.contains(&edge.from) || !c.in_vmlinux.contains(&edge.from))
            && is_redirect_unsafe(&edge.from, c, by_target, visiting)
        {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn sig(name: &str, file: &str) -> Signature {
        Signature::resolved(name, PathBuf::from(file))
    }

    #[test]
    fn cross_file_caller_is_always_safe() {
        let mut c = Classification::default();
        c.border.insert(sig("f", "a.c"));
        c.mangled.insert(sig("f", "a.c"));
        let edges = vec![Edge {
            from: sig("g", "b.c"),
            to: sig("f", "a.c"),
        }];
        assert_eq!(find_unsafe_mangled_redirect(&c, &edges), None);
    }

    #[test]
    fn outsider_caller_in_same_file_is_unsafe() {
        let mut c = Classification::default();
        c.border.insert(sig("f", "a.c"));
        c.mangled.insert(sig("f", "a.c"));
        c.sched_outsider.insert(sig("g", "a.c"));
        let edges = vec![Edge {
            from: sig("g", "a.c"),
            to: sig("f", "a.c"),
        }];
        assert_eq!(
            find_unsafe_mangled_redirect(&c, &edges),
            Some(sig("f", "a.c"))
        );
    }

    #[test]
    fn insider_caller_present_in_vmlinux_is_safe() {
        let mut c = Classification::default();
        c.border.insert(sig("f", "a.c"));
        c.mangled.insert(sig("f", "a.c"));
        c.in_vmlinux.insert(sig("g", "a.c"));
        let edges = vec![Edge {
            from: sig("g", "a.c"),
            to: sig("f", "a.c"),
        }];
        assert_eq!(find_unsafe_mangled_redirect(&c, &edges), None);
    }

    #[test]
    fn recursive_optimized_caller_chain_is_unsafe() {
        let mut c = Classification::default();
        c.border.insert(sig("f", "a.c"));
        c.mangled.insert(sig("f", "a.c"));
        c.mangled.insert(sig("g", "a.c"));
        c.sched_outsider.insert(sig("h", "a.c"));
        let edges = vec![
            Edge {
                from: sig("g", "a.c"),
                to: sig("f", "a.c"),
            },
            Edge {
                from: sig("h", "a.c"),
                to: sig("g", "a.c"),
            },
        ];
        assert_eq!(
            find_unsafe_mangled_redirect(&c, &edges),
            Some(sig("f", "a.c"))
        );
    }
}
