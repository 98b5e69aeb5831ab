//! UMAA assembly engine demo entrypoint.
//!
//! Wires a writer and a reader graph for a mission command over the
//! in-process loopback transport, publishes a command whose route objective
//! carries a waypoint list, and prints the reassembled view. Exercises the
//! full fan-out/assembly path: specialization first on its own topic, one
//! write per list element, base last, then dispose propagation.

mod types;

use anyhow::{Context, Result, bail};
use clap::Parser;
use core_classify::topic_from_type;
use core_combined::CollectionKind;
use core_config::{DispatchPriority, EngineConfig};
use core_graph::{GraphFactory, GraphOptions};
use core_guid::{AttributePath, Guid};
use core_message::Value;
use core_pool::{EventPool, Priority};
use core_transport::QosProfile;
use core_transport::mem::MemTransport;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};
use std::time::Duration;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "umaa-engine", version, about = "UMAA multi-topic assembly demo")]
struct Args {
    /// Optional configuration file path (overrides discovery of `engine.toml`).
    #[arg(long = "config")]
    config: Option<PathBuf>,
    /// Number of waypoints to publish on the route objective.
    #[arg(long = "waypoints", default_value_t = 3)]
    waypoints: usize,
    /// Commanded speed carried by the route specialization.
    #[arg(long = "speed", default_value_t = 3.5)]
    speed: f64,
}

fn configure_logging() -> Option<WorkerGuard> {
    let log_dir = Path::new(".");
    let file_appender = tracing_appender::rolling::never(log_dir, "umaa-engine.log");
    let (nb_writer, guard) = tracing_appender::non_blocking(file_appender);
    match tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(nb_writer)
        .try_init()
    {
        Ok(()) => Some(guard),
        // Global subscriber already installed; drop the guard so the
        // writer thread shuts down.
        Err(_) => None,
    }
}

fn install_panic_hook() {
    static HOOK: Once = Once::new();
    HOOK.call_once(|| {
        let default_panic = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            tracing::error!(target: "runtime.panic", ?info, "panic");
            default_panic(info);
        }));
    });
}

fn dispatch_priority(p: DispatchPriority) -> Priority {
    match p {
        DispatchPriority::High => Priority::High,
        DispatchPriority::Medium => Priority::Medium,
        DispatchPriority::Low => Priority::Low,
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let _log_guard = configure_logging();
    install_panic_hook();

    let config = EngineConfig::load(args.config.as_deref())?;
    let pool = Arc::new(EventPool::with_resolution(
        config.pool.workers,
        config.pool.scheduler_resolution(),
    ));

    let bus = Arc::new(MemTransport::new());
    bus.set_profile_depth(QosProfile::Command, config.qos.command.depth);
    bus.set_profile_depth(QosProfile::Config, config.qos.config.depth);
    bus.set_profile_depth(QosProfile::Report, config.qos.report.depth);
    bus.register_keys(&topic_from_type(types::COMMAND_TYPE), &["sessionID"]);

    let registry = Arc::new(types::registry());
    let factory = GraphFactory::new(
        bus.clone(),
        registry.clone(),
        pool.clone(),
        GraphOptions {
            max_in_flight: config.assembly.max_in_flight,
            dispatch_priority: dispatch_priority(config.assembly.dispatch_priority),
        },
    );

    let reader = factory
        .reader_graph(types::COMMAND_TYPE, QosProfile::Command)
        .context("building reader graph")?;
    let writer = factory
        .writer_graph(types::COMMAND_TYPE, QosProfile::Command)
        .context("building writer graph")?;

    // Fill a command: route objective specialization plus its waypoint list.
    let objective = AttributePath::parse("objective");
    let mut builder = writer.new_builder();
    builder.base_mut().set("sessionID", Value::Guid(Guid::generate()));
    builder.base_mut().set("label", Value::Text("demo-survey".into()));

    let mut route = registry
        .instantiate(types::ROUTE_TYPE)
        .expect("route type registered");
    route.set("speed", Value::Float(args.speed));
    builder.use_specialization_at(&objective, route);

    let list = builder
        .ensure_collection(&objective, "waypoints", CollectionKind::List)?
        .as_list_mut()
        .expect("just created as a list");
    for i in 0..args.waypoints {
        list.push(types::waypoint(&registry, 42.0 + i as f64, -70.0 - i as f64));
    }

    writer.publish(&mut builder).context("publishing command")?;
    info!(target: "demo", waypoints = args.waypoints, "command published");

    let Some(combined) = reader.wait_next(Duration::from_secs(2)) else {
        bail!("combined sample did not assemble within 2s");
    };

    let view = combined.view();
    let speed = view
        .resolve(&AttributePath::parse("objective.speed"))
        .and_then(|v| v.as_f64())
        .context("objective.speed missing from the assembled view")?;
    let waypoints = view
        .resolve(&AttributePath::parse("objective.waypoints"))
        .and_then(|v| v.as_collection().map(|c| c.to_vec()))
        .context("objective.waypoints missing from the assembled view")?;

    println!("assembled command '{}':", types::COMMAND_TYPE);
    println!("  objective speed: {speed}");
    println!("  waypoints ({}):", waypoints.len());
    for wp in &waypoints {
        let payload = wp.struct_field("element").expect("element payload");
        println!(
            "    lat {:>7.2}  lon {:>8.2}  id {}",
            payload.get("latitude").and_then(Value::as_f64).unwrap_or_default(),
            payload.get("longitude").and_then(Value::as_f64).unwrap_or_default(),
            wp.guid("elementID").unwrap_or(Guid::NIL),
        );
    }

    // Retire the command instance and show the dispose reaching the reader.
    writer.dispose(builder.base()).context("disposing command")?;
    let disposed = reader.node().metrics().snapshot().disposed;
    println!("dispose observed by reader graph: {}", disposed > 0);
    info!(target: "demo", disposed, "instance retired");

    pool.shutdown(true);
    Ok(())
}
