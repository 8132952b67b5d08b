// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Classifies a scheduler module's functions into the border/insider/outsider
//! taxonomy a live-patch generator needs, by reconciling compiler-plugin
//! metadata against the linked kernel's symbol table.
//!
//! Pipeline: [`config`] loads the module definition, [`corpus`] ingests the
//! per-file metadata tree (C1), [`resolver`] settles link-time ambiguity
//! (C2), [`elf`] reconciles against the linked image (C3), [`solver`] runs
//! the boundary set algebra (C4), [`safety`] rejects unsafe mangled
//! redirects (C5), and [`writer`] emits the build artifacts (C6).

pub mod config;
pub mod corpus;
pub mod elf;
pub mod error;
pub mod model;
pub mod resolver;
pub mod safety;
pub mod solver;
pub mod writer;

use anyhow::{bail, Context, Result};
use std::io::BufReader;
use std::path::Path;
use std::process::{Command, Stdio};

use config::Configuration;
use corpus::Corpus;
use error::EngineError;

/// Run the full classification pipeline: load configuration and metadata
/// from `tmp_dir`, reconcile against `vmlinux`'s symbol table, solve the
/// boundary, and write the resulting artifacts under `tmp_dir`/`mod_dir`.
pub fn run_engine(vmlinux: &Path, tmp_dir: &Path, mod_dir: &Path) -> Result<()> {
    let symtab = dump_symbol_table(vmlinux)
        .with_context(|| format!("reading symbol table of {}", vmlinux.display()))?;
    run_engine_with_symtab(&symtab, tmp_dir, mod_dir)
}

/// Same as [`run_engine`], but takes an already-dumped `readelf -s --wide`
/// symbol table instead of shelling out. Split out so tests can supply a
/// synthetic symbol table without needing `readelf` or a real ELF on disk.
pub fn run_engine_with_symtab(symtab: &str, tmp_dir: &Path, mod_dir: &Path) -> Result<()> {
    let config_path = tmp_dir.join("boundary.yaml");
    let config = Configuration::load(&config_path)
        .with_context(|| format!("loading configuration from {}", config_path.display()))?;
    tracing::info!(
        mod_files = config.mod_files.len(),
        sidecar = config.sidecar.len(),
        "configuration loaded"
    );

    let corpus = Corpus::build(&config, tmp_dir)
        .with_context(|| format!("loading metadata tree under {}", tmp_dir.display()))?;
    tracing::info!(
        functions = corpus.fn_set.len(),
        mod_fns = corpus.mod_fns.len(),
        "metadata ingested"
    );

    let linkage = resolver::resolve(&corpus, &config.mod_files);

    let elf_info = elf::reconcile(BufReader::new(symtab.as_bytes()), &config, &corpus);
    tracing::info!(
        in_vmlinux = elf_info.in_vmlinux.len(),
        mangled = elf_info.mangled.len(),
        "ELF reconciliation complete"
    );

    let (classification, struct_docs) = solver::solve(&config, &corpus, &linkage, &elf_info)?;
    tracing::info!(
        insider = classification.insider.len(),
        sched_outsider = classification.sched_outsider.len(),
        border = classification.border.len(),
        "boundary solved"
    );

    if let Some(unsafe_sym) = safety::find_unsafe_mangled_redirect(&classification, &linkage.edges)
    {
        bail!(EngineError::MangledRedirect(unsafe_sym));
    }

    std::fs::create_dir_all(mod_dir)
        .with_context(|| format!("creating module output directory {}", mod_dir.display()))?;
    writer::write_artifacts(
        &config,
        &corpus,
        &linkage,
        &elf_info,
        &classification,
        &struct_docs,
        tmp_dir,
        mod_dir,
    )
    .context("writing boundary artifacts")?;

    Ok(())
}

/// Invoke the system's ELF dump utility and capture its wide-format symbol
/// table. The engine parses `readelf`'s text output rather than the binary
/// ELF itself (spec.md §6: "the symbol table as produced by the standard
/// ELF dump utility").
pub fn dump_symbol_table(vmlinux: &Path) -> Result<String> {
    let output = Command::new("readelf")
        .arg("-s")
        .arg("--wide")
        .arg(vmlinux)
        .stderr(Stdio::inherit())
        .output()
        .context("spawning `readelf`; is binutils installed?")?;
    if !output.status.success() {
        bail!("readelf exited with {}", output.status);
    }
    String::from_utf8(output.stdout).context("readelf produced non-UTF-8 output")
}
