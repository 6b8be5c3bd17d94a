//! Mender CLI
//!
//! Autonomous incident-response agent for container clusters: detects
//! anomalies, runs root cause analysis, and executes or queues remediation.

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use mender::agent::{Agent, IncidentReport};
use mender::audit::LogAuditSink;
use mender::cluster::GatewayClient;
use mender::config::MenderConfig;
use mender::decision::{DecisionTree, DecisionType, RemediationExecutor};
use mender::detectors::{Detector, EarlyWarningDetector};
use mender::rca::llm::LlmClient;
use mender::rca::RcaAnalyzer;
use mender::telemetry::{PromClient, TelemetrySource};

/// Autonomous incident-response agent - detects, diagnoses, and remediates
#[derive(Parser)]
#[command(name = "mender")]
#[command(about = "Autonomous incident-response agent - detects, diagnoses, and remediates")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Restrict detection to one namespace
    #[arg(long, global = true)]
    namespace: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the continuous monitoring loop
    Run {
        /// Seconds between detection cycles
        #[arg(long, default_value_t = 30)]
        interval: u64,
    },
    /// Run a single detection cycle and report what would be done
    Detect,
    /// Check connectivity to the telemetry and gateway services
    Status,
}

fn build_agent(config: &MenderConfig) -> Agent {
    let telemetry = Arc::new(PromClient::new(config.telemetry.clone()));
    let gateway = Arc::new(GatewayClient::new(config.gateway.clone()));

    let llm_client = LlmClient::new(config.llm.clone());
    let llm = llm_client.has_keys().then_some(llm_client);
    if llm.is_none() {
        info!("No LLM API keys configured; analysis uses rules and fallbacks only");
    }

    let detectors: Vec<Arc<dyn Detector>> = vec![Arc::new(EarlyWarningDetector::new(
        telemetry,
        config.detection.clone(),
    ))];

    Agent::new(
        detectors,
        RcaAnalyzer::new(&config.rca, llm),
        DecisionTree::new(config.decision.clone()),
        RemediationExecutor::new(Some(gateway)),
        Arc::new(LogAuditSink),
    )
}

fn print_report(report: &IncidentReport) {
    let header = format!(
        "{} [{}] {} in {}",
        report.incident.id,
        report.incident.incident_type,
        report.incident.source,
        report.incident.namespace
    );
    match report.decision.decision_type {
        DecisionType::Reject => println!("{} {}", "rejected".dimmed(), header.dimmed()),
        DecisionType::AutoFix => println!("{} {}", "auto-fixed".green().bold(), header),
        DecisionType::Approval => println!("{} {}", "needs approval".yellow().bold(), header),
        DecisionType::Escalate => println!("{} {}", "escalated".red().bold(), header),
    }
    println!(
        "  cause: {} (confidence {:.2})",
        report.rca.root_cause, report.rca.confidence
    );
    if let Some(action) = &report.decision.action {
        println!("  action: {action}");
    }
    println!("  reasoning: {}", report.decision.reasoning);
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "mender=debug" } else { "mender=info" };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = MenderConfig::from_env();
    let agent = build_agent(&config);
    let namespace = cli.namespace.as_deref();

    match cli.command {
        Commands::Run { interval } => {
            agent.run_forever(namespace, Duration::from_secs(interval)).await;
        }
        Commands::Detect => {
            let candidates = agent.run_detection_cycle(namespace).await;
            if candidates.is_empty() {
                println!("{}", "No incidents detected".green());
                return Ok(());
            }
            for candidate in candidates {
                let report = agent.process_incident(candidate).await;
                print_report(&report);
            }
        }
        Commands::Status => {
            print_status(&config).await;
        }
    }

    Ok(())
}

async fn print_status(config: &MenderConfig) {
    println!("telemetry: {}", config.telemetry.base_url);
    let telemetry = PromClient::new(config.telemetry.clone());
    match telemetry.query_instant("up").await {
        Ok(samples) => println!(
            "  {} ({} series)",
            "reachable".green(),
            samples.len()
        ),
        Err(err) => println!("  {}: {err:#}", "unreachable".red()),
    }

    println!("gateway: {}", config.gateway.base_url);
    let llm_line = if config.llm.api_keys.is_empty() {
        "no API keys (rules and fallbacks only)".yellow().to_string()
    } else {
        format!("{} key(s) configured", config.llm.api_keys.len())
    };
    println!("llm: {llm_line}");
}
