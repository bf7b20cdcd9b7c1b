//! Flowcast CLI - Command-line interface for the Flowcast process prediction engine
//!
//! Usage:
//!   flowcast <matrix.csv>                         # Validate and summarize a matrix table
//!   flowcast <matrix.csv> --graph <payload.json>  # Run one prediction pass
//!   flowcast <matrix.csv> --graph <g.json> --metrics  # Conformance report instead
//!   flowcast <matrix.csv> --variants -o json      # Output results as JSON

use clap::Parser;
use flowcast_core::engine::prediction::PredictionEngine;
use flowcast_core::metrics;
use flowcast_core::{load_matrix, FlowGraph};
use std::process;

#[derive(Parser)]
#[command(name = "flowcast")]
#[command(version)]
#[command(about = "Flowcast - process model prediction and conformance CLI")]
#[command(
    long_about = "Load a prefix matrix mined from an event log, run prediction passes over graph payloads and score models against the log"
)]
struct Cli {
    /// Input matrix table (delimited text)
    #[arg(value_name = "MATRIX")]
    matrix: String,

    /// Graph payload JSON to predict over (optional - just validate the
    /// matrix if not provided)
    #[arg(short, long, value_name = "FILE")]
    graph: Option<String>,

    /// Compute the conformance report of the graph instead of predicting
    #[arg(short, long)]
    metrics: bool,

    /// List the matrix's historical variants instead of executing
    #[arg(long)]
    variants: bool,

    /// Report variant coverage of the graph
    #[arg(long)]
    coverage: bool,

    /// Output format: summary, json, or debug
    #[arg(short, long, default_value = "summary", value_name = "FORMAT")]
    output: String,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .init();
    }

    let source = match std::fs::read_to_string(&cli.matrix) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error reading matrix '{}': {}", cli.matrix, e);
            process::exit(1);
        }
    };
    let matrix = match load_matrix(&source) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("Matrix error: {}", e);
            process::exit(1);
        }
    };

    if cli.variants {
        let variants = matrix.get_variants();
        match cli.output.as_str() {
            "json" => print_json(&variants),
            "debug" => println!("{:#?}", variants),
            _ => {
                println!("Variants ({}):", variants.len());
                for v in &variants {
                    println!("  [{}] support {}", v.variant.join(" -> "), v.support);
                }
            }
        }
        return;
    }

    let mut graph = FlowGraph::new();
    if let Some(path) = &cli.graph {
        let payload = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("Error reading graph '{}': {}", path, e);
                process::exit(1);
            }
        };
        if let Err(e) = graph.load_json(&payload) {
            eprintln!("Graph payload error: {}", e);
            process::exit(1);
        }
    }

    if cli.coverage {
        let (list, ratio) = matrix.get_variant_coverage(&graph.label_edges());
        match cli.output.as_str() {
            "json" => print_json(&serde_json::json!({ "variants": list, "ratio": ratio })),
            "debug" => println!("ratio {ratio}\n{:#?}", list),
            _ => {
                println!("Variant coverage: {:.4}", ratio);
                for v in &list {
                    let mark = if v.covered { "✓" } else { "✗" };
                    println!("  {} [{}] support {}", mark, v.variant.join(" -> "), v.support);
                }
            }
        }
        return;
    }

    if cli.metrics {
        let report = metrics::compute(&graph, &matrix);
        match cli.output.as_str() {
            "json" => print_json(&report),
            "debug" => println!("{:#?}", report),
            _ => {
                println!("Conformance report:");
                println!("  fitness            = {:.6}", report.fitness);
                println!("  simplicity         = {:.6}", report.simplicity);
                println!("  precision          = {:.6}", report.precision);
                println!("  generalization     = {:.6}", report.generalization);
                println!("  variant coverage   = {:.6}", report.variant_coverage);
                println!("  event log coverage = {:.6}", report.event_log_coverage);
            }
        }
        return;
    }

    if cli.graph.is_some() {
        match PredictionEngine::new(&matrix).predict(&mut graph) {
            Ok(result) => match cli.output.as_str() {
                "json" => print_json(&result),
                "debug" => println!("{:#?}", result),
                _ => {
                    println!("✓ Prediction pass complete\n");
                    println!("Preview nodes ({}):", result.return_nodes.len());
                    for (key, entry) in &result.return_nodes {
                        println!(
                            "  {} <- {}: '{}' p={:.4} support={}",
                            key, entry.edge_start, entry.node.actual_key,
                            entry.probability, entry.support
                        );
                    }
                    println!(
                        "\nNet: {} places, {} transitions, {} arcs",
                        result.net.places.len(),
                        result.net.transitions.len(),
                        result.net.arcs.len()
                    );
                }
            },
            Err(e) => {
                eprintln!("Prediction error: {}", e);
                process::exit(1);
            }
        }
    } else {
        println!("✓ Matrix validated successfully");
        println!("  prefixes    = {}", matrix.prefix_count());
        println!("  activities  = {}", matrix.probability_columns().len());
        println!("  max support = {}", matrix.max_support());
        println!("\nRun with --graph <payload.json> to predict, --metrics for a report");
    }
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Error serializing to JSON: {}", e);
            process::exit(1);
        }
    }
}
