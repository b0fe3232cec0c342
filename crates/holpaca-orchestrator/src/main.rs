use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, Level};

use holpaca_orchestrator::controller::{
    spawn_controller, ControllerHandle, Motivation, PerformanceMaximization,
};
use holpaca_orchestrator::proxy::{ProxyDirectory, ProxyManager};
use holpaca_orchestrator::service;

/// Cache-sizing control-plane orchestrator.
#[derive(Parser)]
#[command(name = "orchestrator", version)]
struct Cli {
    /// Address the control service binds to.
    address: String,

    /// Pairs of `<control-algorithm> <arg0:arg1:...:argn>`. Recognized
    /// algorithms: `ThroughputMaximization
    /// <periodicity_ms>:<delta>[:<fakeEnforce>[:<printLatenciesOnEntries>]]`
    /// and `Motivation <periodicity_ms>`.
    #[arg(trailing_var_arg = true)]
    algorithms: Vec<String>,
}

enum AlgorithmSpec {
    Motivation {
        periodicity: Duration,
    },
    ThroughputMaximization {
        periodicity: Duration,
        delta: f64,
        fake_enforce: bool,
        print_latencies_on: u64,
    },
}

fn parse_algorithms(args: &[String]) -> Result<Vec<AlgorithmSpec>, String> {
    let mut specs = Vec::new();
    let mut it = args.iter();
    while let Some(name) = it.next() {
        let argv = it
            .next()
            .ok_or_else(|| {
                format!("{name}: control algorithm requires <arg0:arg1:...:argn>")
            })?
            .split(':')
            .collect::<Vec<_>>();

        match name.as_str() {
            "ThroughputMaximization" => {
                if argv.len() < 2 {
                    return Err(
                        "ThroughputMaximization requires <periodicity (ms)>:<max delta ([0,1])> \
                         [:<fake enforce?>[:<print latencies on #entries>]]"
                            .to_string(),
                    );
                }
                let periodicity = argv[0]
                    .parse::<u64>()
                    .map_err(|e| format!("bad periodicity '{}': {e}", argv[0]))?;
                let delta = argv[1]
                    .parse::<f64>()
                    .map_err(|e| format!("bad delta '{}': {e}", argv[1]))?;
                if !(0.0..=1.0).contains(&delta) {
                    return Err(format!("delta must be in [0,1], got {delta}"));
                }
                let fake_enforce = argv.get(2).is_some_and(|v| *v == "true");
                let print_latencies_on = match argv.get(3) {
                    Some(v) => v
                        .parse::<u64>()
                        .map_err(|e| format!("bad latency entry count '{v}': {e}"))?,
                    None => 0,
                };
                specs.push(AlgorithmSpec::ThroughputMaximization {
                    periodicity: Duration::from_millis(periodicity),
                    delta,
                    fake_enforce,
                    print_latencies_on,
                });
            }
            "Motivation" => {
                let periodicity = argv[0]
                    .parse::<u64>()
                    .map_err(|e| format!("bad periodicity '{}': {e}", argv[0]))?;
                specs.push(AlgorithmSpec::Motivation {
                    periodicity: Duration::from_millis(periodicity),
                });
            }
            other => return Err(format!("unknown control algorithm: {other}")),
        }
    }
    Ok(specs)
}

fn init_tracing() {
    let env_filter =
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info,hyper=warn".to_string());
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_env_filter(env_filter)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };
    let specs = match parse_algorithms(&cli.algorithms) {
        Ok(specs) => specs,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let listener = match tokio::net::TcpListener::bind(&cli.address).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("failed to bind {}: {e}", cli.address);
            return ExitCode::FAILURE;
        }
    };

    let directory = ProxyDirectory::new();
    let proxies: Arc<dyn ProxyManager> = Arc::new(directory.clone());

    // At most one controller runs; installing a new one tears down the
    // previous loop first.
    let mut active: Option<ControllerHandle> = None;
    for spec in specs {
        if let Some(previous) = active.take() {
            previous.shutdown().await;
        }
        let handle = match spec {
            AlgorithmSpec::Motivation { periodicity } => {
                info!(?periodicity, "installing Motivation");
                spawn_controller(Motivation, proxies.clone(), periodicity)
            }
            AlgorithmSpec::ThroughputMaximization {
                periodicity,
                delta,
                fake_enforce,
                print_latencies_on,
            } => {
                info!(?periodicity, delta, fake_enforce, "installing PerformanceMaximization");
                spawn_controller(
                    PerformanceMaximization::new(delta, fake_enforce, print_latencies_on),
                    proxies.clone(),
                    periodicity,
                )
            }
        };
        active = Some(handle);
    }
    // The final controller keeps running for the server's lifetime.
    let _controller = active;

    info!(addr = %cli.address, "orchestrator listening");
    if let Err(e) = axum::serve(listener, service::router(directory)).await {
        eprintln!("server error: {e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
