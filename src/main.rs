use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use courier_dispatch::dispatch::{geo, GeoPoint};
use courier_dispatch::{
    config, init_telemetry, shutdown_telemetry, Agent, AgentId, AssignmentEngine, DeliveryStatus,
    DispatchConfig, DispatchError, InMemoryStore, LoggingNotifier, OperationTimer, OrderId,
    OrderRequest, ShutdownCoordinator,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "courier-dispatch")]
#[command(about = "Assign delivery orders to nearby drivers")]
#[command(long_about = "Courier dispatch matches orders to eligible drivers by distance, \
                       capacity and decline history, and guarantees a broadcast order is \
                       claimed by exactly one driver.")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load agents and orders from a JSON fixture and dispatch them
    Run {
        /// Fixture file with `agents`, `orders` and optional `actions`
        fixture: PathBuf,
    },
    /// Great-circle distance in km between two coordinates
    Distance {
        lat1: f64,
        lng1: f64,
        lat2: f64,
        lng2: f64,
    },
    /// Print the effective configuration
    Config {
        /// Write the configuration as TOML instead of printing it
        #[arg(long)]
        save: Option<PathBuf>,
    },
}

#[derive(Debug, Deserialize)]
struct Fixture {
    #[serde(default)]
    agents: Vec<AgentFixture>,
    #[serde(default)]
    orders: Vec<OrderRequest>,
    #[serde(default)]
    actions: Vec<FixtureAction>,
}

#[derive(Debug, Deserialize)]
struct AgentFixture {
    id: String,
    lat: Option<f64>,
    lng: Option<f64>,
    /// How old the location fix is
    #[serde(default)]
    location_age_minutes: i64,
    capacity_kg: Option<f64>,
    #[serde(default = "default_true")]
    available: bool,
    #[serde(default = "default_true")]
    on_duty: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum FixtureAction {
    Claim { order_id: String, agent_id: String },
    Decline { order_id: String, agent_id: String },
    Advance {
        order_id: String,
        agent_id: String,
        status: DeliveryStatus,
    },
    ListEligible { agent_id: String },
    Rescan,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Distance {
            lat1,
            lng1,
            lat2,
            lng2,
        } => {
            let km = geo::distance(Some(lat1), Some(lng1), Some(lat2), Some(lng2))?;
            println!("{km:.3}");
            Ok(())
        }
        Commands::Config { save } => {
            let config = config()?;
            match save {
                Some(path) => {
                    config.save_to_file(&path)?;
                    println!("Configuration written to {}", path.display());
                }
                None => print!("{}", toml::to_string_pretty(config)?),
            }
            Ok(())
        }
        Commands::Run { fixture } => {
            let config = config()?;
            init_telemetry(&config.observability)?;
            let result = run_fixture(config, &fixture).await;
            shutdown_telemetry();
            result
        }
    }
}

async fn run_fixture(config: &DispatchConfig, path: &Path) -> Result<()> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read fixture {}", path.display()))?;
    let fixture: Fixture = serde_json::from_str(&raw).context("Invalid fixture JSON")?;

    let timer = OperationTimer::new("run_fixture");
    let engine = AssignmentEngine::new(
        config,
        Arc::new(InMemoryStore::new()),
        Arc::new(LoggingNotifier),
    );

    let now = Utc::now();
    for agent in fixture.agents {
        let mut profile = Agent::new(
            agent.id.as_str(),
            agent.capacity_kg.unwrap_or(config.dispatch.default_capacity_kg),
        );
        profile.available = agent.available;
        profile.on_duty = agent.on_duty;
        if let Some(point) = GeoPoint::from_parts(agent.lat, agent.lng)
            .with_context(|| format!("Invalid location for agent {}", agent.id))?
        {
            let fixed_at = Duration::try_minutes(agent.location_age_minutes)
                .and_then(|age| now.checked_sub_signed(age))
                .with_context(|| {
                    format!("location_age_minutes out of range for agent {}", agent.id)
                })?;
            profile = profile.with_location(point, fixed_at);
        }
        engine.register_agent(profile);
    }

    // Ctrl-C stops the replay early; queued notifications are still drained
    tokio::select! {
        replayed = replay(&engine, fixture.orders, fixture.actions) => replayed?,
        signal = ShutdownCoordinator::wait_for_signal() => {
            signal?;
            tracing::warn!("Fixture replay interrupted");
        }
    }

    timer.finish();
    ShutdownCoordinator::new(&engine, config.timeouts.shutdown_drain())
        .with_stats_logging(config.observability.metrics_enabled)
        .drain()
        .await?;
    println!("{}", serde_json::to_string(&engine.metrics().get_stats())?);
    Ok(())
}

async fn replay(
    engine: &AssignmentEngine,
    orders: Vec<OrderRequest>,
    actions: Vec<FixtureAction>,
) -> Result<()> {
    for request in orders {
        let requested_id = request.id.clone();
        let line = match engine.submit_order(request).await {
            Ok(outcome) => serde_json::to_value(&outcome)?,
            Err(e) => error_json(requested_id.as_deref(), &e)?,
        };
        println!("{line}");
    }

    for action in actions {
        let line = run_action(engine, action).await?;
        println!("{line}");
    }
    Ok(())
}

async fn run_action(engine: &AssignmentEngine, action: FixtureAction) -> Result<Value> {
    let line = match action {
        FixtureAction::Claim { order_id, agent_id } => {
            let order_id = OrderId::from(order_id);
            match engine.claim(&order_id, &AgentId::from(agent_id)).await {
                Ok(outcome) => serde_json::to_value(&outcome)?,
                Err(e) => error_json(Some(order_id.as_str()), &e)?,
            }
        }
        FixtureAction::Decline { order_id, agent_id } => {
            let order_id = OrderId::from(order_id);
            match engine.decline(&order_id, &AgentId::from(agent_id)).await {
                Ok(record) => json!({ "declined": record }),
                Err(e) => error_json(Some(order_id.as_str()), &e)?,
            }
        }
        FixtureAction::Advance {
            order_id,
            agent_id,
            status,
        } => {
            let order_id = OrderId::from(order_id);
            match engine
                .advance(&order_id, &AgentId::from(agent_id), status)
                .await
            {
                Ok(delivery) => json!({ "delivery": delivery }),
                Err(e) => error_json(Some(order_id.as_str()), &e)?,
            }
        }
        FixtureAction::ListEligible { agent_id } => {
            match engine.list_eligible_orders(&AgentId::from(agent_id.as_str())).await {
                Ok(orders) => json!({ "agent_id": agent_id, "eligible": orders }),
                Err(e) => json!({ "agent_id": agent_id, "error": e.to_string() }),
            }
        }
        FixtureAction::Rescan => {
            let mut results = Vec::new();
            for (order_id, outcome) in engine.rescan_pending().await? {
                results.push(match outcome {
                    Ok(outcome) => serde_json::to_value(&outcome)?,
                    Err(e) => error_json(Some(order_id.as_str()), &e)?,
                });
            }
            json!({ "rescan": results })
        }
    };
    Ok(line)
}

fn error_json(order_id: Option<&str>, error: &DispatchError) -> Result<Value> {
    let mut line = json!({
        "order_id": order_id,
        "error": error.to_string(),
    });
    if let DispatchError::NoEligibleAgent { exclusions, .. } = error {
        line["exclusions"] = serde_json::to_value(exclusions)?;
    }
    Ok(line)
}
