use std::{path::PathBuf, process::ExitCode, sync::Arc};

use anyhow::{Context as _, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use gcpdiag_engine::{
    ApiOutput, Context, DiagnosticEngine, EngineConfig, Output, RunOutcome, RunRequest, RunbookError, TerminalOutput, load_batch_spec,
};
use gcpdiag_util::{InterfaceKind, RunbookConfig, RunbookConfigOverrides};
use serde_json::{Value, json};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt::writer::BoxMakeWriter};

use crate::snapshot::ResourceSnapshot;

mod runbooks;
mod snapshot;

/// At least one evaluation failed or was uncertain.
const EXIT_FINDINGS: u8 = 2;
/// The engine could not run a runbook.
const EXIT_ERROR: u8 = 1;

/// Run diagnostic runbooks against a cloud project.
#[derive(Parser, Debug)]
#[command(name = "gcpdiag", version, about)]
struct Cli {
    /// Log more (-v info, -vv debug). RUST_LOG takes precedence.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one runbook, or a batch of runbooks from a spec file
    Runbook(RunbookArgs),
    /// List registered runbooks
    List {
        /// Only list runbooks of this product, e.g. gce
        #[arg(long)]
        product: Option<String>,
    },
}

#[derive(Args, Debug)]
struct RunbookArgs {
    /// Runbook id, e.g. gce/vm-running-state
    #[arg(required_unless_present = "batch_spec", conflicts_with = "batch_spec")]
    id: Option<String>,

    /// Runbook parameter; repeatable
    #[arg(short = 'p', long = "parameter", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    parameters: Vec<(String, String)>,

    /// Project to diagnose; also fills the project_id parameter
    #[arg(long)]
    project: Option<String>,

    /// Region or zone to restrict the diagnosis to; repeatable
    #[arg(long = "location", value_name = "LOCATION")]
    locations: Vec<String>,

    /// Label selector resources must carry; repeatable
    #[arg(long = "label", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    labels: Vec<(String, String)>,

    /// Never prompt; every remediation is marked as skipped
    #[arg(long)]
    auto: bool,

    /// Directory receiving the JSON report of runs with findings
    #[arg(long, value_name = "DIR")]
    report_dir: Option<PathBuf>,

    #[arg(long, value_enum)]
    interface: Option<InterfaceArg>,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// JSON resource snapshot answering resource queries
    #[arg(long, value_name = "FILE")]
    snapshot: Option<PathBuf>,

    /// YAML list of {runbook, parameters} entries run concurrently, never prompting
    #[arg(long, value_name = "FILE")]
    batch_spec: Option<PathBuf>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum InterfaceArg {
    /// Colored terminal output with prompts
    Cli,
    /// JSON events on stdout
    Api,
}

impl From<InterfaceArg> for InterfaceKind {
    fn from(interface: InterfaceArg) -> Self {
        match interface {
            InterfaceArg::Cli => InterfaceKind::Cli,
            InterfaceArg::Api => InterfaceKind::Api,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let result = match cli.command {
        Command::List { product } => list(product.as_deref(), cli.verbose),
        Command::Runbook(args) => run_runbook(args, cli.verbose),
    };
    match result {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::from(EXIT_ERROR)
        }
    }
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim().to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}

fn init_tracing(writer: BoxMakeWriter, verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_target(false)
        .try_init();
}

fn list(product: Option<&str>, verbose: u8) -> Result<ExitCode> {
    init_tracing(BoxMakeWriter::new(std::io::stderr), verbose);
    let registry = runbooks::registry(Arc::new(ResourceSnapshot::default()))?;
    let trees = match product {
        Some(product) => registry.list_product(product),
        None => registry.list(),
    };
    let width = trees.keys().map(String::len).max().unwrap_or(0);
    for (id, summary) in &trees {
        let keywords = registry.get(id)?.keywords();
        if keywords.is_empty() {
            println!("{id:<width$}  {summary}");
        } else {
            println!("{id:<width$}  {summary} [{}]", keywords.join(", "));
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn run_runbook(args: RunbookArgs, verbose: u8) -> Result<ExitCode> {
    let config = RunbookConfig::load()
        .context("failed to load runbook config")?
        .apply_overrides(RunbookConfigOverrides {
            auto: args.auto.then_some(true),
            report_dir: args.report_dir.clone(),
            interface: args.interface.map(InterfaceKind::from),
            color: args.no_color.then_some(false),
        });

    let api_output = (config.interface == InterfaceKind::Api).then(|| Arc::new(ApiOutput::new()));
    let output: Arc<dyn Output> = match &api_output {
        Some(api) => api.clone(),
        None => Arc::new(TerminalOutput::stdio(config.color, config.wrap_width)),
    };
    init_tracing(output.log_writer(), verbose);

    let snapshot = match &args.snapshot {
        Some(path) => ResourceSnapshot::load(path)?,
        None => ResourceSnapshot::default(),
    };
    let registry = runbooks::registry(Arc::new(snapshot))?;
    let engine = DiagnosticEngine::new(Arc::new(registry), output, EngineConfig::from(&config)).with_messages(runbooks::messages()?);

    let context = Context::new(args.project.clone().unwrap_or_default())
        .with_locations(args.locations.iter().cloned())
        .with_labels(args.labels.iter().cloned().collect());

    let outcomes = match (&args.batch_spec, &args.id) {
        (Some(path), _) => {
            let requests = load_batch_spec(path)?
                .into_iter()
                .map(|run| run.into_request(&context))
                .collect();
            engine.run_batch(requests)
        }
        (None, Some(id)) => {
            let parameters = args
                .parameters
                .iter()
                .map(|(key, value)| (key.clone(), Value::String(value.clone())))
                .collect();
            vec![engine.run(RunRequest::new(id).with_context(context).with_parameters(parameters))]
        }
        (None, None) => anyhow::bail!("a runbook id or --batch-spec is required"),
    };

    if let Some(api) = &api_output {
        print_api_document(api, &outcomes)?;
    } else {
        for outcome in outcomes.iter().flatten() {
            if let Some(path) = &outcome.report_path {
                println!("Report written to {}", path.display());
            }
        }
    }

    let mut code = ExitCode::SUCCESS;
    for outcome in &outcomes {
        match outcome {
            Err(error) => {
                error!(error = %error, "runbook did not run");
                if api_output.is_none() {
                    eprintln!("error: {error}");
                }
                return Ok(ExitCode::from(EXIT_ERROR));
            }
            Ok(outcome) if outcome.any_failed() => code = ExitCode::from(EXIT_FINDINGS),
            Ok(_) => {}
        }
    }
    info!(runs = outcomes.len(), "all runs finished");
    Ok(code)
}

fn print_api_document(api: &ApiOutput, outcomes: &[Result<RunOutcome, RunbookError>]) -> Result<()> {
    let runs: Vec<Value> = outcomes
        .iter()
        .map(|outcome| match outcome {
            Ok(outcome) => json!({
                "report": outcome.report.to_document(),
                "report_path": outcome.report_path,
            }),
            Err(error) => json!({ "error": error.to_string() }),
        })
        .collect();
    let document = json!({
        "runs": runs,
        "events": api.events(),
        "logs": api.logs(),
    });
    println!("{}", serde_json::to_string_pretty(&document)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_values_split_on_the_first_equals_sign() {
        assert_eq!(parse_key_value("filter=a=b"), Ok(("filter".into(), "a=b".into())));
        assert_eq!(parse_key_value(" zone =us-central1-a"), Ok(("zone".into(), "us-central1-a".into())));
        assert!(parse_key_value("zone").is_err());
        assert!(parse_key_value("=value").is_err());
    }

    #[test]
    fn runbook_flags_parse() {
        let cli = Cli::try_parse_from([
            "gcpdiag",
            "-vv",
            "runbook",
            "gce/vm-running-state",
            "-p",
            "instance_name=web-1",
            "--project",
            "demo",
            "--label",
            "env=prod",
            "--auto",
            "--interface",
            "api",
        ])
        .expect("parse");
        assert_eq!(cli.verbose, 2);
        let Command::Runbook(args) = cli.command else {
            panic!("expected the runbook subcommand");
        };
        assert_eq!(args.id.as_deref(), Some("gce/vm-running-state"));
        assert_eq!(args.parameters, vec![("instance_name".to_string(), "web-1".to_string())]);
        assert_eq!(args.labels, vec![("env".to_string(), "prod".to_string())]);
        assert!(args.auto);
        assert_eq!(args.interface, Some(InterfaceArg::Api));
    }

    #[test]
    fn runbook_requires_an_id_or_a_batch_spec() {
        assert!(Cli::try_parse_from(["gcpdiag", "runbook"]).is_err());
        assert!(Cli::try_parse_from(["gcpdiag", "runbook", "--batch-spec", "runs.yaml"]).is_ok());
        assert!(Cli::try_parse_from(["gcpdiag", "runbook", "gce/x", "--batch-spec", "runs.yaml"]).is_err());
    }
}
