use std::error::Error;
use std::process::ExitCode;

use tilewall_client::query_info;
use tilewall_types::ServiceInfo;

fn init_logging(verbose: bool) {
    use simplelog::*;

    let log_level = if verbose { LevelFilter::Debug } else { LevelFilter::Warn };
    if let Err(e) = TermLogger::init(
        log_level,
        Config::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    ) {
        eprintln!("logger unavailable: {}", e);
    }
}

fn usage() {
    println!("usage: wall-info <host> <port> [--json] [-v|--verbose]");
    println!();
    println!("  --json         print the wall description as JSON");
    println!("  -v, --verbose  debug logging");
}

fn print_info(info: &ServiceInfo) {
    println!("magic:          {:#018x}", info.magic);
    println!(
        "wall:           {}x{} pixels, {}x{} displays{}",
        info.total_pixels_in_wall.x,
        info.total_pixels_in_wall.y,
        info.num_displays.x,
        info.num_displays.y,
        if info.stereo { ", stereo" } else { "" }
    );
    if info.has_control_window {
        println!(
            "control window: {}x{}",
            info.control_window_size.x, info.control_window_size.y
        );
    }
    println!("nodes:          {}", info.nodes.len());
    for (i, node) in info.nodes.iter().enumerate() {
        println!("  [{}] {}:{} {}", i, node.host_name, node.port, node.region);
    }
}

fn run(args: &[String]) -> Result<(), Box<dyn Error>> {
    let positional: Vec<&String> = args.iter().skip(1).filter(|a| !a.starts_with('-')).collect();
    let (host, port) = match positional.as_slice() {
        [host, port] => (host.as_str(), port.parse::<u16>()?),
        _ => {
            usage();
            return Err("expected <host> <port>".into());
        }
    };

    let info = query_info(host, port)?;
    if args.iter().any(|a| a == "--json") {
        println!("{}", serde_json::to_string_pretty(&info)?);
    } else {
        print_info(&info);
    }
    Ok(())
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        usage();
        return ExitCode::SUCCESS;
    }
    init_logging(args.iter().any(|a| a == "--verbose" || a == "-v"));

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("wall-info: {}", e);
            ExitCode::FAILURE
        }
    }
}
