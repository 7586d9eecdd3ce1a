//! Command-line interface definitions and the offline validate command.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use flowplane_core::dsl::{canonicalize, validate};
use flowplane_types::dsl::DslDocument;

#[derive(Debug, Parser)]
#[command(name = "fpl", version, about = "Flowplane workflow run orchestration engine")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start the REST API, worker pool, and sweeper.
    Serve {
        /// Export spans through the OpenTelemetry stdout exporter.
        #[arg(long)]
        otel: bool,
    },
    /// Structurally validate a workflow document without saving it.
    Validate {
        /// Path to a JSON workflow document (v2 or v3).
        file: PathBuf,
        /// Emit the violation report as JSON.
        #[arg(long)]
        json: bool,
    },
}

/// Validate a workflow document file. Returns whether it is publishable.
pub async fn validate_file(path: &Path, json: bool) -> anyhow::Result<bool> {
    let raw = tokio::fs::read_to_string(path).await?;
    let doc: DslDocument = serde_json::from_str(&raw)?;
    let dsl = canonicalize(doc);
    let violations = validate(&dsl);

    if json {
        let report = serde_json::json!({
            "valid": violations.is_empty(),
            "violations": violations,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if violations.is_empty() {
        println!("ok: {} nodes, {} edges", dsl.nodes.len(), dsl.edges.len());
    } else {
        for v in &violations {
            match &v.node_id {
                Some(node_id) => println!("{}: {} (node '{node_id}')", v.code.as_str(), v.message),
                None => match &v.edge_id {
                    Some(edge_id) => {
                        println!("{}: {} (edge '{edge_id}')", v.code.as_str(), v.message)
                    }
                    None => println!("{}: {}", v.code.as_str(), v.message),
                },
            }
        }
    }

    Ok(violations.is_empty())
}
