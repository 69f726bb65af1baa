//! Resolve a board's packages and write the dependency records as JSON.
//!
//! ```text
//! cargo run --example extract_deps -- <board root> <output.json> [config.toml] [atom]...
//! ```
//!
//! Logging is controlled by `RUST_LOG`, e.g. `RUST_LOG=portage_depgraph=debug`.

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use portage_depgraph::{depdata, Atom, Resolver, ResolverConfig};
use tracing_subscriber::EnvFilter;

const DEFAULT_START: &str = "virtual/target-os";

fn run(args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let [root, output, rest @ ..] = args else {
        return Err("usage: extract_deps <board root> <output.json> [config.toml] [atom]...".into());
    };

    let (config, atoms) = match rest.split_first() {
        Some((first, atoms)) if first.ends_with(".toml") => {
            (ResolverConfig::load(&PathBuf::from(first))?, atoms)
        }
        _ => (ResolverConfig::default(), rest),
    };
    let atoms = if atoms.is_empty() {
        vec![Atom::any_version(DEFAULT_START)]
    } else {
        atoms
            .iter()
            .map(|s| s.parse())
            .collect::<Result<Vec<Atom>, _>>()?
    };

    let resolver = Resolver::from_root(&PathBuf::from(root), config)?;
    let infos = resolver.resolve(&atoms)?;

    println!("=== Resolved {} packages ===", infos.len());
    for (label, info) in &infos {
        println!("{label}  {}-{}", info.name, info.version);
    }

    depdata::save(&PathBuf::from(output), &infos)?;
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("portage_depgraph=info".parse().expect("valid directive")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("ERROR: {e}");
            ExitCode::FAILURE
        }
    }
}
