//! Schema Diff CLI
//!
//! Compares two JSON Schema files, reports classified changes, and checks
//! them against a compatibility mode and declared bump.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use schema_lifecycle::{
    BumpType, ChangeAnalyzer, CompatibilityMode, CompatibilityValidator, LifecycleConfig,
    Version, VersionRegistry,
};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "schema-diff")]
#[command(about = "Classify schema changes and check compatibility")]
struct Cli {
    /// Config file (defaults to lifecycle.toml lookup)
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare two schema files
    Diff {
        old: PathBuf,
        new: PathBuf,
        /// Compatibility mode to enforce
        #[arg(short, long, default_value = "BACKWARD")]
        mode: CompatibilityMode,
        /// Bump the change would be published with
        #[arg(short, long)]
        declared: Option<BumpType>,
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Verify checksums of every version in a registry directory
    Verify {
        /// Registry directory (overrides config)
        #[arg(short, long)]
        registry: Option<PathBuf>,
    },

    /// Check whether a version satisfies a range expression
    Satisfies { version: String, range: String },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(2);
        }
    }
}

/// Returns whether the check passed
fn run(cli: Cli) -> anyhow::Result<bool> {
    let config = LifecycleConfig::load_from(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Commands::Diff {
            old,
            new,
            mode,
            declared,
            json,
        } => {
            let old_schema = read_schema(&old)?;
            let new_schema = read_schema(&new)?;

            let analyzer = ChangeAnalyzer::with_pattern_sampling(config.analysis.clone());
            let result = analyzer.analyze(&old_schema, &new_schema);
            let violations = CompatibilityValidator::new().validate(&result.changes, mode);
            let bump_ok = declared.map_or(true, |d| result.suggested_bump <= d);

            if json {
                let report = serde_json::json!({
                    "changes": result.changes,
                    "suggested_bump": result.suggested_bump,
                    "declared_bump": declared,
                    "mode": mode,
                    "violations": violations,
                });
                println!("{}", serde_json::to_string_pretty(&report)?);
                return Ok(bump_ok && violations.is_empty());
            }

            println!("🔍 {} -> {}", old.display(), new.display());
            println!();
            if result.changes.is_empty() {
                println!("✅ No changes");
            }
            for change in &result.changes {
                let marker = if change.is_breaking() { "❌" } else { "•" };
                println!("{} {}", marker, change);
                if let Some(rec) = &change.recommendation {
                    println!("   └─ {}", rec);
                }
            }

            println!();
            println!("Suggested bump: {}", result.suggested_bump);
            if let Some(d) = declared {
                if bump_ok {
                    println!("✅ Declared bump {} is sufficient", d);
                } else {
                    println!("❌ Declared bump {} is insufficient, {} required", d, result.suggested_bump);
                }
            }

            if violations.is_empty() {
                println!("✅ Compatible under {}", mode);
            } else {
                println!("❌ {} violation(s) under {}:", violations.len(), mode);
                for v in &violations {
                    println!("   └─ [{}] {}", v.direction, v.message);
                }
            }
            Ok(bump_ok && violations.is_empty())
        }

        Commands::Verify { registry } => {
            let Some(path) = registry.or_else(|| config.registry_path()) else {
                bail!("no registry path given and none configured");
            };
            let registry = VersionRegistry::open(&path)
                .with_context(|| format!("opening registry at {}", path.display()))?;

            let mut all_valid = true;
            for name in registry.schema_names() {
                for v in registry.versions(&name) {
                    if registry.verify(&name, &v.version)? {
                        println!("  ✅ {} - valid", v.key());
                    } else {
                        println!("  ❌ {} - INVALID", v.key());
                        all_valid = false;
                    }
                }
            }
            Ok(all_valid)
        }

        Commands::Satisfies { version, range } => {
            let v = Version::parse(&version)?;
            let hit = v.satisfies(&range)?;
            println!("{} {} {}", v, if hit { "satisfies" } else { "does not satisfy" }, range);
            Ok(hit)
        }
    }
}

fn read_schema(path: &Path) -> anyhow::Result<serde_json::Value> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))
}
