use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use tilewall_service::{DisplayService, LocalGroup, ProcessGroup, ServiceConfig};

fn init_logging(verbose: bool) {
    use simplelog::*;

    let log_level = if verbose { LevelFilter::Debug } else { LevelFilter::Info };
    if let Err(e) = TermLogger::init(
        log_level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    ) {
        eprintln!("logger unavailable: {}", e);
    }
}

fn usage() {
    println!("usage: tilewall-service [--config <path>] [--ranks <n>] [-v|--verbose]");
    println!();
    println!("  --config <path>  wall configuration (default: ~/.config/tilewall/config.toml)");
    println!("  --ranks <n>      ranks to run in this process (default: one per display,");
    println!("                   plus one for the head node)");
    println!("  -v, --verbose    debug logging");
}

/// Run one rank until its service stops.
fn run_rank(config: Arc<ServiceConfig>, group: LocalGroup) -> Result<(), tilewall_service::ServiceError> {
    let service = DisplayService::start(&config, Arc::new(group))?;
    if service.is_head_node() {
        return service.run_head_node();
    }

    let mut frames = 0u64;
    let mut window = Instant::now();
    while let Some(frame) = service.wait_for_next_frame()? {
        frames += 1;
        let elapsed = window.elapsed().as_secs_f64();
        if elapsed >= 1.0 {
            log::info!(
                "rank {}: frame {} ({}x{}), {:.1} fps",
                service.rank(),
                frame.frame_id,
                frame.size.x,
                frame.size.y,
                frames as f64 / elapsed
            );
            frames = 0;
            window = Instant::now();
        }
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        usage();
        return Ok(());
    }
    let verbose = args.iter().any(|a| a == "--verbose" || a == "-v");
    init_logging(verbose);

    let config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(PathBuf::from);
    let config = Arc::new(ServiceConfig::load(config_path.as_deref())?);

    let ranks = match args.iter().position(|a| a == "--ranks") {
        Some(i) => args
            .get(i + 1)
            .and_then(|n| n.parse::<usize>().ok())
            .ok_or("--ranks needs a number")?,
        None => config.rank_count(),
    };

    log::info!(
        "starting {} ranks for a {}x{} wall",
        ranks,
        config.layout().num_displays().x,
        config.layout().num_displays().y
    );

    let handles = LocalGroup::create(ranks)
        .into_iter()
        .map(|group| {
            let config = Arc::clone(&config);
            let rank = group.rank();
            thread::Builder::new()
                .name(format!("rank-{}", rank))
                .spawn(move || run_rank(config, group))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut failed = false;
    for (rank, handle) in handles.into_iter().enumerate() {
        match handle.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                log::error!("rank {} failed: {}", rank, e);
                failed = true;
            }
            Err(_) => {
                log::error!("rank {} panicked", rank);
                failed = true;
            }
        }
    }
    if failed {
        return Err("one or more ranks failed".into());
    }
    Ok(())
}
