//! CLI subcommands: init, validate, apply, status, id.

use crate::core::context::ContextStack;
use crate::core::engine::{Engine, ProvisionReport, RunFailure};
use crate::core::id::{ContentTypeId, IdSegment};
use crate::core::types::{Manifest, ObjectKind, ProvisionEvent};
use crate::core::{eventlog, parser};
use crate::transport::file::{load_snapshot, FileStore};
use crate::transport::CancelSignal;
use clap::Subcommand;
use std::path::{Path, PathBuf};

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a starter manifest
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Validate a manifest without touching any store
    Validate {
        /// Path to the manifest
        #[arg(short, long, default_value = "ctforge.yaml")]
        file: PathBuf,
    },

    /// Create every declared object that does not exist yet
    Apply {
        /// Path to the manifest
        #[arg(short, long, default_value = "ctforge.yaml")]
        file: PathBuf,

        /// Store snapshot to provision into
        #[arg(short, long, default_value = "state/store.yaml")]
        store: PathBuf,

        /// Directory for the provisioning event log
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,
    },

    /// Show the objects in a store and the last recorded run
    Status {
        /// Store snapshot to inspect
        #[arg(short, long, default_value = "state/store.yaml")]
        store: PathBuf,

        /// Directory holding the provisioning event log
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,
    },

    /// Parse a content type id and print its canonical form
    Id {
        /// Id to parse (absolute `0x...` or relative)
        id: String,

        /// Relative id to append before printing
        #[arg(long)]
        append: Option<String>,
    },
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<(), String> {
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate { file } => cmd_validate(&file),
        Commands::Apply {
            file,
            store,
            state_dir,
        } => cmd_apply(&file, &store, &state_dir),
        Commands::Status { store, state_dir } => cmd_status(&store, &state_dir),
        Commands::Id { id, append } => cmd_id(&id, append.as_deref()),
    }
}

fn cmd_init(path: &Path) -> Result<(), String> {
    let manifest_path = path.join("ctforge.yaml");
    if manifest_path.exists() {
        return Err(format!("{} already exists", manifest_path.display()));
    }

    let state_dir = path.join("state");
    std::fs::create_dir_all(&state_dir).map_err(|e| format!("cannot create state dir: {}", e))?;

    let template = r#"version: "1.0"
name: my-content-types
description: "Managed by ctforge"

defaults:
  content_type_group: Custom Content Types
  field_group: Custom Columns

policy:
  failure: stop_on_first
  conflict: fail
  event_log: true

nodes:
  - type: content_type
    id: "0x0100A33D9AD9805788419BDAAC2CCB37509F"
    name: Example
"#;
    std::fs::write(&manifest_path, template)
        .map_err(|e| format!("cannot write {}: {}", manifest_path.display(), e))?;

    println!("Initialized ctforge project at {}", path.display());
    println!("  Created: {}", manifest_path.display());
    println!("  Created: {}/", state_dir.display());
    Ok(())
}

fn cmd_validate(file: &Path) -> Result<(), String> {
    let manifest = parse_and_validate(file)?;
    println!(
        "OK: {} ({} top-level nodes, {} total)",
        manifest.name,
        manifest.nodes.len(),
        count_nodes(&manifest)
    );
    Ok(())
}

/// Parse and validate a manifest file, printing every validation error.
fn parse_and_validate(file: &Path) -> Result<Manifest, String> {
    let manifest = parser::parse_manifest_file(file)?;
    let errors = parser::validate_manifest(&manifest);
    if errors.is_empty() {
        return Ok(manifest);
    }
    for e in &errors {
        eprintln!("  ERROR: {}", e);
    }
    Err(format!("{} validation error(s)", errors.len()))
}

fn count_nodes(manifest: &Manifest) -> usize {
    fn walk(nodes: &[crate::core::types::NodeDecl]) -> usize {
        nodes.iter().map(|n| 1 + walk(&n.children)).sum()
    }
    walk(&manifest.nodes)
}

fn cmd_apply(file: &Path, store_path: &Path, state_dir: &Path) -> Result<(), String> {
    let manifest = parse_and_validate(file)?;
    let (tree, roots) = parser::lower_manifest(&manifest)?;
    let store = FileStore::open(store_path)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("cannot start runtime: {}", e))?;

    let outcome = runtime.block_on(async {
        let (handle, signal) = CancelSignal::pair();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted, cancelling run");
                handle.cancel();
            }
        });

        let engine = Engine::new(&store)
            .with_policy(manifest.policy.clone())
            .with_cancel(signal)
            .with_event_log(state_dir);
        let mut stack = ContextStack::new();
        let mark = stack.push_defaults(&manifest.defaults);
        let outcome = engine.provision_all(&tree, &roots, &mut stack).await;
        stack.release_all(mark);

        // objects created before a failure are real; persist them either way
        store.save().await?;
        Ok::<_, String>(outcome)
    })?;

    match outcome {
        Ok(report) => {
            print_report(&report);
            if report.is_success() {
                println!(
                    "Apply complete: {} created, {} unchanged.",
                    report.created_count(),
                    report.found_count()
                );
                Ok(())
            } else {
                Err(format!("{} node(s) failed", report.failures.len()))
            }
        }
        Err(RunFailure { error, report }) => {
            print_report(&report);
            Err(format!("apply aborted: {}", error))
        }
    }
}

fn print_report(report: &ProvisionReport) {
    for result in &report.results {
        let symbol = if result.created { "+" } else { " " };
        match result.object.parent {
            Some(ref parent) => println!(
                "  {} {} {} (in {})",
                symbol, result.object.kind, result.object.key, parent
            ),
            None => println!("  {} {} {}", symbol, result.object.kind, result.object.key),
        }
    }
    for failure in &report.failures {
        println!("  ! {}", failure);
    }
    println!();
}

fn cmd_status(store_path: &Path, state_dir: &Path) -> Result<(), String> {
    let Some(snapshot) = load_snapshot(store_path)? else {
        println!("No store at {}.", store_path.display());
        return Ok(());
    };

    println!("Store: {} ({} objects)", store_path.display(), snapshot.objects.len());
    for kind in [ObjectKind::Field, ObjectKind::ContentType] {
        for obj in snapshot.objects.iter().filter(|o| o.kind == kind) {
            let name = obj.property_str(kind.name_property()).unwrap_or("-");
            println!("  {} {} [{}]", kind, obj.key, name);
            if kind != ObjectKind::ContentType {
                continue;
            }
            for link in snapshot.objects.iter().filter(|o| {
                o.kind == ObjectKind::FieldLink
                    && o.parent
                        .as_deref()
                        .is_some_and(|p| p.eq_ignore_ascii_case(&obj.key))
            }) {
                let name = link.property_str("name").unwrap_or("-");
                println!("    field_link {} [{}]", link.key, name);
            }
        }
    }

    let events = eventlog::read_events(state_dir)?;
    let last_run = events.iter().rev().find_map(|e| match e.event {
        ProvisionEvent::RunCompleted {
            ref run_id,
            created,
            found,
            failed,
            total_seconds,
        } => Some((e.ts.as_str(), run_id, created, found, failed, total_seconds)),
        _ => None,
    });
    if let Some((ts, run_id, created, found, failed, secs)) = last_run {
        println!();
        println!(
            "Last run: {} at {}: {} created, {} found, {} failed ({:.2}s)",
            run_id, ts, created, found, failed, secs
        );
    }
    Ok(())
}

fn cmd_id(id: &str, append: Option<&str>) -> Result<(), String> {
    let mut parsed = ContentTypeId::parse(id).map_err(|e| e.to_string())?;
    if let Some(child) = append {
        let child = ContentTypeId::parse(child).map_err(|e| e.to_string())?;
        if child.is_absolute() {
            return Err(format!("cannot append absolute id {}", child));
        }
        parsed = parsed.append(&child).map_err(|e| e.to_string())?;
    }
    println!("{}", parsed);
    println!(
        "  {} id, {} segment(s)",
        if parsed.is_absolute() { "absolute" } else { "relative" },
        parsed.segments().len()
    );
    for seg in parsed.segments() {
        match seg {
            IdSegment::Short(b) => println!("    {:02X}", b),
            IdSegment::Guid(g) => println!("    00 {:032X}", g),
        }
    }
    if let Some(parent) = parsed.parent() {
        println!("  parent: {}", parent);
    }
    Ok(())
}
