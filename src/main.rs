// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use anyhow::{bail, Result};
use std::env;
use std::path::PathBuf;

#[rustfmt::skip]
const USAGE_MSG: &str =
r##"usage: sched-boundary <vmlinux> <tmp-dir> <mod-dir>

Classify a scheduler module's functions into the border/insider/outsider
taxonomy plugsched needs to generate its livepatch shim, and emit the
module's build artifacts.

arguments:
  <vmlinux>   path to the linked kernel ELF
  <tmp-dir>   working directory; must already contain boundary.yaml and the
              *.boundary metadata tree
  <mod-dir>   output directory for the generated module sources
"##;

fn main_inner() -> Result<()> {
    // Three required positionals, no flags: pulling in an argument-parsing
    // crate for this isn't worth it, same reasoning as a CLI with a
    // handful of flags.
    let mut args = env::args().skip(1);
    let vmlinux = args.next();
    let tmp_dir = args.next();
    let mod_dir = args.next();
    if args.next().is_some() || mod_dir.is_none() {
        println!("{}", USAGE_MSG);
        bail!("expected exactly 3 positional arguments");
    }
    let vmlinux = PathBuf::from(vmlinux.unwrap());
    let tmp_dir = PathBuf::from(tmp_dir.unwrap());
    let mod_dir = PathBuf::from(mod_dir.unwrap());

    sched_boundary::run_engine(&vmlinux, &tmp_dir, &mod_dir)
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(err) = main_inner() {
        eprintln!("sched-boundary: {:#}", err);
        std::process::exit(1);
    }
}
