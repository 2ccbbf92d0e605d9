use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use lawnsync_worker::{
    ChannelClients, DiskCacheStorage, EngineConfig, EventOutcome, FetchDisposition, HttpNetwork,
    LogNotifier, Network, OfflineNetwork, Request, RequestMode, Worker, WorkerEvent, classify,
};

fn print_usage() {
    eprintln!("Usage: lawnsync-worker [OPTIONS] [path|url]...");
    eprintln!();
    eprintln!("Installs the worker, then fetches each path through it.");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --config <FILE>     Engine configuration (TOML)");
    eprintln!("  --cache-dir <DIR>   Cache storage root (default: user cache dir)");
    eprintln!("  --offline           Fail every network request");
    eprintln!("  -h, --help          Show this help");
    eprintln!();
    eprintln!("Set RUST_LOG=debug for per-request logging.");
}

struct Args {
    config: Option<PathBuf>,
    cache_dir: Option<PathBuf>,
    offline: bool,
    targets: Vec<String>,
}

fn parse_args() -> Args {
    let mut parsed = Args {
        config: None,
        cache_dir: None,
        offline: false,
        targets: Vec::new(),
    };

    let args: Vec<String> = env::args().skip(1).collect();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_usage();
                std::process::exit(0);
            }
            "--offline" => parsed.offline = true,
            flag @ ("--config" | "--cache-dir") => {
                i += 1;
                let Some(value) = args.get(i) else {
                    eprintln!("Error: {flag} requires a value");
                    std::process::exit(1);
                };
                if flag == "--config" {
                    parsed.config = Some(PathBuf::from(value));
                } else {
                    parsed.cache_dir = Some(PathBuf::from(value));
                }
            }
            other if other.starts_with('-') => {
                eprintln!("Error: unknown option {other}");
                print_usage();
                std::process::exit(1);
            }
            target => parsed.targets.push(target.to_string()),
        }
        i += 1;
    }
    parsed
}

async fn run<N: Network + 'static>(
    network: N,
    config: EngineConfig,
    cache_dir: PathBuf,
    targets: &[String],
) -> lawnsync_worker::Result<()> {
    let clients = Arc::new(ChannelClients::new());
    let mut page = clients.connect(config.root_url()?);
    let worker = Worker::new(
        config,
        network,
        DiskCacheStorage::new(cache_dir),
        Arc::clone(&clients),
        LogNotifier,
    )?;

    let outcome = worker
        .dispatch(WorkerEvent::Install {
            replacing_active: false,
        })
        .await?;
    if let EventOutcome::Installed(report) = outcome {
        println!(
            "Installed: {} pre-cached, {} failed",
            report.precache.cached,
            report.precache.failed.len()
        );
        for failure in &report.precache.failed {
            println!("  {} ({})", failure.path, failure.reason);
        }

        if report.activate_now
            && let EventOutcome::Activated(activation) = worker.dispatch(WorkerEvent::Activate).await?
        {
            println!(
                "Activated: {} old store(s) evicted, {} page(s) claimed",
                activation.evicted.len(),
                activation.claimed
            );
        }
    }

    for target in targets {
        let url = worker.config().resolve(target)?;
        let mut request = Request::get(url);
        if request.url.path().ends_with('/') || request.url.path().ends_with(".html") {
            request = request.with_mode(RequestMode::Navigate);
        }
        let class = classify(&request, worker.config());
        match worker.handle_fetch(request.clone()) {
            FetchDisposition::Passthrough => println!("---  passthrough  {}", request.url),
            FetchDisposition::RespondWith(response) => {
                let response = response.await;
                let class = class.map_or_else(String::new, |c| c.to_string());
                println!(
                    "{:>3}  {class:<8}  {:>8} B  {}",
                    response.status,
                    response.body.len(),
                    request.url
                );
            }
        }
    }

    worker.settle().await;
    for message in page.drain() {
        log::debug!("Page received {}", message.kind());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> lawnsync_worker::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = parse_args();
    let config = match &args.config {
        Some(path) => EngineConfig::load(path),
        None => Ok(EngineConfig::default()),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };
    let cache_dir = args.cache_dir.unwrap_or_else(DiskCacheStorage::default_root);

    if args.offline {
        run(OfflineNetwork, config, cache_dir, &args.targets).await
    } else {
        run(HttpNetwork::new()?, config, cache_dir, &args.targets).await
    }
}
