//! `ktcache` entry point

use tracing_subscriber::EnvFilter;

fn init_tracing(verbosity: u8) {
    let default = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = if verbosity > 0 {
        EnvFilter::new(default)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let matches = kt_cache_cli::command().get_matches();
    init_tracing(kt_cache_cli::verbosity(&matches));

    let mut stdout = std::io::stdout().lock();
    if let Err(e) = kt_cache_cli::run_matches(&matches, &mut stdout) {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
