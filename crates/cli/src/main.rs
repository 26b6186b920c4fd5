//! Command-line front end: JSON request in, JSON result out.

use std::fs;
use std::io::{self, Read};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use engine::{Controller, EngineConfig, ErrorBody, SimulationRequest, Status};
use resin::{ResinKind, ResinSpec};

#[derive(Parser, Debug)]
#[command(
    name = "ix-design",
    about = "Ion-exchange vessel simulation: softening and dealkalization cycles via PHREEQC",
    version
)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one service/regeneration cycle from a request document
    Simulate {
        /// JSON request file; '-' reads from stdin
        #[arg(long, value_name = "FILE")]
        input: Option<String>,

        /// Inline JSON request (overrides --input)
        #[arg(long, value_name = "JSON")]
        request_json: Option<String>,

        /// Pretty-print the full result document
        #[arg(long)]
        json: bool,

        /// Override the PHREEQC wall-clock limit (seconds)
        #[arg(long, value_name = "SECONDS")]
        timeout_s: Option<u64>,
    },
    /// List the built-in resin library
    Resins,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    match args.command {
        Command::Simulate {
            input,
            request_json,
            json,
            timeout_s,
        } => simulate(input, request_json, json, timeout_s),
        Command::Resins => {
            let library: Vec<ResinSpec> = [ResinKind::Sac, ResinKind::WacNa, ResinKind::WacH]
                .into_iter()
                .map(ResinSpec::library)
                .collect();
            println!("{}", serde_json::to_string_pretty(&library)?);
            Ok(())
        }
    }
}

fn read_request(
    input: Option<&String>,
    request_json: Option<&String>,
) -> anyhow::Result<SimulationRequest> {
    let text = match (request_json, input) {
        (Some(inline), _) => inline.clone(),
        (None, Some(path)) if path == "-" => {
            let mut s = String::new();
            io::stdin()
                .read_to_string(&mut s)
                .context("reading request from stdin")?;
            s
        }
        (None, Some(path)) => {
            fs::read_to_string(path).with_context(|| format!("reading request file '{}'", path))?
        }
        (None, None) => {
            return Err(anyhow!("provide a request with --input FILE or --request-json JSON"))
        }
    };
    serde_json::from_str(&text).map_err(|e| {
        let body = ErrorBody {
            status: Status::Error,
            error: "InvalidRequest".into(),
            details: e.to_string(),
            hint: Some("see example_structure for a complete request".into()),
            example_structure: serde_json::to_value(SimulationRequest::example()).ok(),
        };
        anyhow!(serde_json::to_string_pretty(&body).unwrap_or_else(|_| e.to_string()))
    })
}

fn simulate(
    input: Option<String>,
    request_json: Option<String>,
    json: bool,
    timeout_s: Option<u64>,
) -> anyhow::Result<()> {
    let request = read_request(input.as_ref(), request_json.as_ref())?;

    let mut config = EngineConfig::from_env();
    if let Some(seconds) = timeout_s {
        config.timeout = Duration::from_secs(seconds);
    }
    let controller = Controller::new(config);

    match controller.simulate_cycle(&request) {
        Ok(result) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_summary(&result);
            }
            Ok(())
        }
        Err(e) => {
            let body = ErrorBody::from_engine_error(&e);
            Err(anyhow!(serde_json::to_string_pretty(&body)?))
        }
    }
}

fn print_summary(result: &engine::SimulationResult) {
    let p = &result.performance;
    println!(
        "status: {}",
        serde_json::to_string(&result.status).unwrap_or_default()
    );
    if p.breakthrough_reached {
        println!(
            "breakthrough: {:.1} BV ({:.1} h at design flow)",
            p.service_bv_to_target, p.service_hours
        );
    } else {
        println!(
            "no breakthrough within the simulated horizon ({:.1} BV)",
            p.service_bv_to_target
        );
    }
    println!(
        "effluent at endpoint: hardness {:.2} mg/L CaCO3, alkalinity {:.1} mg/L CaCO3, pH {:.2}",
        p.effluent_hardness_mg_l_caco3, p.effluent_alkalinity_mg_l_caco3, p.effluent_ph
    );
    println!(
        "regeneration: {:.2} BV, recovery {:.2}, ready: {}",
        result.regeneration_results.actual_regenerant_bv,
        result.regeneration_results.final_resin_recovery,
        result.regeneration_results.ready_for_service
    );
    println!(
        "mass balance closure: {:.1}%",
        result.mass_balance.closure_percent
    );
    for warning in &result.warnings {
        println!("warning: {}", warning);
    }
}
