// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Tessera - component source pipeline CLI.
//!
//! Drives the compile stages from the command line:
//!
//! ```bash
//! # Compile a component source and print the compiled output
//! tessera compile card.jsx
//!
//! # Inspect dialect, dependencies, and content hashes
//! tessera inspect card.jsx --json
//!
//! # Compile and structurally load through the reference host
//! tessera check card.jsx
//! ```

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use owo_colors::OwoColorize;
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use tessera_host::ProbingHost;
use tessera_pipeline::{
    ComponentRecord, Origin, Pipeline, PipelineConfig, PipelineError, RedirectionTable,
    RequestOptions, compile_source,
};
use tracing_subscriber::EnvFilter;
use url::Url;

#[derive(Parser)]
#[command(name = "tessera", version, about = "Component source pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile a component source file and print the compiled output
    Compile(SourceArgs),
    /// Report dialect, dependencies, and content hashes for a source
    Inspect(InspectArgs),
    /// Compile and structurally load through the reference host
    Check(SourceArgs),
}

#[derive(Args)]
struct SourceArgs {
    /// Component source file
    file: PathBuf,

    /// Base locator of the package-delivery network
    #[arg(long)]
    registry: Option<Url>,

    /// Singleton dependency (repeatable); defaults to react, react-dom
    #[arg(long = "singleton")]
    singletons: Vec<String>,

    /// Abort on malformed import declarations instead of leaving them
    /// as written
    #[arg(long)]
    strict: bool,

    /// Factory call markup compiles into
    #[arg(long, default_value = "h")]
    factory: String,
}

#[derive(Args)]
struct InspectArgs {
    #[command(flatten)]
    source: SourceArgs,

    /// Emit the report as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct InspectReport {
    dialect: String,
    original_hash: String,
    compiled_hash: String,
    dependencies: Vec<String>,
    compiled_bytes: usize,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report_error(&err);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Compile(args) => {
            let (source, config) = load_input(&args)?;
            let unit = compile_source(&source, &config)?;
            print!("{}", unit.source);
            Ok(())
        }
        Command::Inspect(args) => {
            let (source, config) = load_input(&args.source)?;
            let unit = compile_source(&source, &config)?;
            let report = InspectReport {
                dialect: format!("{:?}", unit.dialect),
                original_hash: tessera_pipeline::ContentHash::of(&source).to_string(),
                compiled_hash: unit.hash.to_string(),
                dependencies: unit.dependencies,
                compiled_bytes: unit.source.len(),
            };
            if args.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}: {}", "dialect".bold(), report.dialect);
                println!("{}: {}", "original hash".bold(), report.original_hash);
                println!("{}: {}", "compiled hash".bold(), report.compiled_hash);
                println!("{}: {}", "compiled bytes".bold(), report.compiled_bytes);
                println!("{}:", "dependencies".bold());
                for dep in &report.dependencies {
                    println!("  {dep}");
                }
            }
            Ok(())
        }
        Command::Check(args) => {
            let (source, config) = load_input(&args)?;
            // Bind every singleton to a host key so the structural
            // host accepts them, the way a canvas host would.
            let redirections: RedirectionTable = config
                .singleton_dependencies
                .iter()
                .map(|dep| (dep.clone(), format!("host:{dep}")))
                .collect();

            let pipeline = Pipeline::new(config, ProbingHost::structural(), redirections);
            let mut record = ComponentRecord::new(Origin::Generated { prompt: None }, source);
            let executable = pipeline
                .request_executable(&mut record, RequestOptions::default())
                .await?;

            println!(
                "{} default export {} ({} dependencies, {:?})",
                "ok:".green().bold(),
                executable.constructor.default_export.bold(),
                record.metrics.dependency_count,
                record.metrics.compile_time.unwrap_or_default(),
            );
            Ok(())
        }
    }
}

fn load_input(args: &SourceArgs) -> anyhow::Result<(String, PipelineConfig)> {
    let source = std::fs::read_to_string(&args.file)
        .with_context(|| format!("reading {}", args.file.display()))?;

    let singletons = if args.singletons.is_empty() {
        vec!["react".to_string(), "react-dom".to_string()]
    } else {
        args.singletons.clone()
    };
    let mut config = PipelineConfig::new(singletons);
    if let Some(registry) = &args.registry {
        config.package_registry_base = registry.clone();
    }
    config.strict_import_resolution = args.strict;
    config.markup_factory = args.factory.clone();

    Ok((source, config))
}

fn report_error(err: &anyhow::Error) {
    match err.downcast_ref::<PipelineError>() {
        Some(pipeline_err) => {
            eprintln!("{} {}", "error:".red().bold(), pipeline_err);
            if let PipelineError::Transpile { offset, .. } = pipeline_err {
                eprintln!("  {} byte offset {}", "at".dimmed(), offset);
            }
        }
        None => eprintln!("{} {:#}", "error:".red().bold(), err),
    }
}
