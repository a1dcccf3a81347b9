//! agent-runtime - task planning entry point
//!
//! Analyzes the task given on the command line and prints its complexity
//! estimate, iteration limit and execution batches as JSON.

use std::sync::Arc;

use agent_runtime::agents::{LlmComplexityRefiner, CLASSIFIER_BREAKER};
use agent_runtime::config::Config;
use agent_runtime::llm::OpenRouterClient;
use agent_runtime::resilience::BreakerRegistry;
use agent_runtime::task::{calculate_iteration_limit, get_execution_order, ComplexityAnalyzer};
use serde_json::json;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agent_runtime=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let description = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if description.trim().is_empty() {
        anyhow::bail!("usage: agent-runtime <task description>");
    }

    // Load configuration
    let config = Config::from_env()?;
    let registry = BreakerRegistry::with_defaults(config.breaker.clone());

    let analyzer = match &config.classifier.api_key {
        Some(api_key) => {
            info!("Semantic classifier enabled: model={}", config.classifier.model);
            let llm = OpenRouterClient::with_timeout(api_key.clone(), config.classifier.timeout)?;
            let refiner = LlmComplexityRefiner::new(
                Arc::new(llm),
                config.classifier.model.clone(),
                registry.get(CLASSIFIER_BREAKER).await,
                config.retry.clone(),
            )
            .with_attempt_timeout(config.classifier.timeout);
            // covers every attempt and backoff, so hangs reach the breaker
            let deadline = refiner.deadline();
            ComplexityAnalyzer::with_refiner(Arc::new(refiner), deadline)
        }
        None => {
            info!("OPENROUTER_API_KEY not set, using heuristic complexity analysis");
            ComplexityAnalyzer::heuristic()
        }
    };

    let analysis = analyzer.analyze_task(&description).await;
    let iteration_limit = calculate_iteration_limit(&analysis);
    let order = get_execution_order(&analysis.subtasks);

    let report = json!({
        "task": description,
        "analysis": analysis,
        "iterationLimit": iteration_limit,
        "batches": order.ids(),
        "cycleDetected": order.cycle_detected,
        "breakers": registry.statuses().await,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
