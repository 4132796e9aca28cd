//! Reliquary CLI - Command-line interface for the Reliquary job orchestrator

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tabled::{Table, Tabled};

const DEFAULT_RPC_URL: &str = "http://127.0.0.1:9527";

#[derive(Parser)]
#[command(name = "reliquary")]
#[command(about = "Reliquary job orchestrator CLI", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// RPC server URL
    #[arg(long, env = "RELIQUARY_RPC_URL", default_value = DEFAULT_RPC_URL)]
    rpc_url: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a job
    Submit(SubmitArgs),

    /// Ask a running job to stop
    Stop {
        /// Job ID
        job_id: String,
    },

    /// Show a job's state and counters
    Get {
        /// Job ID
        job_id: String,
    },

    /// Show engine status
    Status,

    /// List registered plugins
    Plugins,
}

#[derive(Args)]
struct SubmitArgs {
    /// Plugin identifier (see `reliquary plugins`)
    plugin: String,

    /// Object class (AIP, REPRESENTATION, FILE, JOB)
    #[arg(short, long)]
    class: Option<String>,

    /// Explicit object ids, comma separated
    #[arg(long, value_delimiter = ',', conflicts_with_all = ["filter", "all"])]
    ids: Vec<String>,

    /// Filter condition FIELD=VALUE (repeatable)
    #[arg(long, value_parser = parse_key_value, conflicts_with = "all")]
    filter: Vec<(String, String)>,

    /// Every object of the class
    #[arg(long)]
    all: bool,

    /// Plugin parameter KEY=VALUE (repeatable)
    #[arg(short, long = "param", value_parser = parse_key_value)]
    params: Vec<(String, String)>,

    /// Job name
    #[arg(short, long)]
    name: Option<String>,

    #[arg(short, long, env = "USER")]
    username: Option<String>,

    /// Wait for the job to finish (bounded by the daemon's sync timeout)
    #[arg(short, long)]
    wait: bool,
}

#[derive(Serialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    method: String,
    params: Value,
    id: u64,
}

#[derive(Deserialize)]
struct JsonRpcResponse {
    #[allow(dead_code)]
    jsonrpc: String,
    #[allow(dead_code)]
    id: u64,
    result: Option<Value>,
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

#[derive(Deserialize, Tabled)]
struct SubmitResult {
    job_id: String,
    outcome: String,
    #[tabled(display_with = "display_state")]
    state: Option<String>,
}

#[derive(Deserialize, Tabled)]
struct PluginRow {
    id: String,
    name: String,
    version: String,
    plugin_type: String,
    #[tabled(display_with = "display_list")]
    parameters: Vec<String>,
}

fn display_state(state: &Option<String>) -> String {
    state.clone().unwrap_or_else(|| "-".to_string())
}

fn display_list(items: &[String]) -> String {
    items.join(", ")
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got `{}`", s)),
    }
}

/// Object selector JSON for the submit arguments
fn selector(args: &SubmitArgs) -> Result<Value> {
    let class = || {
        args.class
            .as_deref()
            .map(str::to_uppercase)
            .context("--class is required when selecting objects")
    };

    if !args.ids.is_empty() {
        Ok(json!({ "kind": "list", "class": class()?, "ids": args.ids }))
    } else if !args.filter.is_empty() {
        let parameters: Vec<Value> = args
            .filter
            .iter()
            .map(|(field, value)| json!({ "field": field, "value": value }))
            .collect();
        Ok(json!({ "kind": "filter", "class": class()?, "filter": { "parameters": parameters } }))
    } else if args.all {
        Ok(json!({ "kind": "all", "class": class()? }))
    } else {
        Ok(json!({ "kind": "none" }))
    }
}

fn submit_params(args: &SubmitArgs) -> Result<Value> {
    let parameters: Map<String, Value> = args
        .params
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();

    Ok(json!({
        "plugin": args.plugin,
        "source_objects": selector(args)?,
        "name": args.name,
        "parameters": parameters,
        "username": args.username,
        "synchronous": args.wait,
    }))
}

async fn call_rpc(url: &str, method: &str, params: Value) -> Result<Value> {
    let request = JsonRpcRequest {
        jsonrpc: "2.0".to_string(),
        method: method.to_string(),
        params,
        id: 1,
    };

    let client = reqwest::Client::new();
    let response: JsonRpcResponse = client
        .post(url)
        .json(&request)
        .send()
        .await
        .context("Failed to connect to daemon")?
        .json()
        .await
        .context("Failed to parse response")?;

    if let Some(error) = response.error {
        anyhow::bail!("RPC error ({}): {}", error.code, error.message);
    }

    response
        .result
        .ok_or_else(|| anyhow::anyhow!("No result in response"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Submit(args) => {
            let params = submit_params(&args)?;
            let result = call_rpc(&cli.rpc_url, "jobs.submit.v1", params).await?;
            let submit_result: SubmitResult = serde_json::from_value(result)?;

            let headline = match submit_result.outcome.as_str() {
                "timed_out" => "⧗ Job still running after the sync timeout".yellow().bold(),
                _ => "✓ Job submitted".green().bold(),
            };
            println!("{}", headline);
            println!();
            println!("{}", Table::new(vec![submit_result]));
        }

        Commands::Stop { job_id } => {
            let result = call_rpc(&cli.rpc_url, "jobs.stop.v1", json!({ "job_id": job_id })).await?;

            if result["stopping"].as_bool().unwrap_or(false) {
                println!("{}", format!("✓ Job {} stopping", job_id).green().bold());
            } else {
                println!("{}", format!("○ Job {} is not running", job_id).yellow());
            }
        }

        Commands::Get { job_id } => {
            let job = call_rpc(&cli.rpc_url, "jobs.get.v1", json!({ "job_id": job_id })).await?;
            let stats = &job["stats"];

            println!("{}", format!("Job {}", job_id).cyan().bold());
            println!();
            println!("  {} {}", "State:".bold(), job["state"]);
            if let Some(details) = job["details"].as_str() {
                println!("  {} {}", "Details:".bold(), details);
            }
            println!(
                "  {} {}/{}",
                "Blocks:".bold(),
                job["blocks_finished"],
                job["blocks_dispatched"]
            );
            println!("  {} {}", "Objects:".bold(), stats["source_objects_count"]);
            println!(
                "  {} {}",
                "Succeeded:".bold(),
                stats["source_objects_processed_with_success"].to_string().green()
            );
            println!(
                "  {} {}",
                "Failed:".bold(),
                stats["source_objects_processed_with_failure"].to_string().red()
            );
            println!("  {} {}%", "Complete:".bold(), stats["completion_percentage"]);
        }

        Commands::Status => {
            println!("{}", "Engine Status".cyan().bold());
            println!();

            match call_rpc(&cli.rpc_url, "admin.stats.v1", json!({})).await {
                Ok(stats) => {
                    let engine = &stats["engine"];
                    println!("  {} {}", "RPC URL:".bold(), cli.rpc_url);
                    let status = if engine["shutting_down"].as_bool().unwrap_or(false) {
                        "SHUTTING DOWN".yellow()
                    } else {
                        "ONLINE".green()
                    };
                    println!("  {} {}", "Status:".bold(), status);
                    println!();
                    println!("  {} {}", "Running:".bold(), engine["pools"]["running"]);
                    println!("  {} {}", "Stopping:".bold(), engine["pools"]["stopping"]);
                    println!("  {} {}", "In error:".bold(), engine["pools"]["in_error"]);
                    println!(
                        "  {} {}/{}",
                        "Job slots free:".bold(),
                        engine["available_job_slots"],
                        engine["max_parallel_jobs"]
                    );
                    println!(
                        "  {} {}/{}",
                        "Worker slots free:".bold(),
                        engine["available_worker_slots"],
                        engine["worker_pool_size"]
                    );
                    println!();
                    if let Some(by_state) = stats["jobs_by_state"].as_object() {
                        for (state, count) in by_state {
                            println!("  {:<20} {}", format!("{}:", state).bold(), count);
                        }
                    }
                    println!();
                    println!("  {} {} seconds", "Uptime:".bold(), stats["uptime_seconds"]);
                }
                Err(e) => {
                    println!("  {} {}", "Status:".bold(), "ERROR".red());
                    println!("  {} {}", "Error:".bold(), e);
                }
            }
        }

        Commands::Plugins => {
            let result = call_rpc(&cli.rpc_url, "plugins.list.v1", json!({})).await?;
            let plugins: Vec<PluginRow> = serde_json::from_value(result)?;

            if plugins.is_empty() {
                println!("{}", "No plugins registered".yellow());
            } else {
                println!("{}", Table::new(plugins));
            }
        }
    }

    Ok(())
}
