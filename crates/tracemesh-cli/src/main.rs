pub mod blob;
pub mod cli;
pub mod cmd;
pub mod config;
pub mod error;
pub mod store;
pub mod transport;

pub use cli::{Cli, Command};

use clap::Parser;

fn main() {
    #[cfg(unix)]
    install_sigpipe_default();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = dispatch(&cli) {
        eprintln!("{}", e.message());
        std::process::exit(e.exit_code());
    }
}

/// Initializes the stderr log subscriber. `RUST_LOG` wins; otherwise the
/// default level is `info`, or `debug` with `--verbose`.
fn init_tracing(verbose: bool) {
    let default = if verbose {
        "tracemesh=debug,tracemesh_core=debug"
    } else {
        "tracemesh=info,tracemesh_core=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| default.to_owned()))
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

/// Dispatches the parsed CLI arguments to the appropriate command handler.
///
/// Returns `Ok(())` on success or an [`error::CliError`]; the caller
/// prints the message and exits with the error's exit code.
fn dispatch(cli: &Cli) -> Result<(), error::CliError> {
    let config = config::load(&cli.config)?;
    let mut store = store::Store::open(&config.database.path)?;

    match &cli.command {
        Command::AddConfig { name, file } => cmd::add_config::run(&store, name, file),

        Command::GenTests => cmd::gen_tests::run(&store, &config),

        Command::Collect {
            all,
            dev,
            baud,
            fifo,
        } => cmd::collect::run(
            &mut store,
            &config,
            *all,
            dev.as_deref(),
            *baud,
            fifo.as_deref(),
        ),

        Command::Build {
            c_out,
            dot_out,
            full_dot,
        } => cmd::build::run(
            &store,
            &config,
            c_out.as_deref(),
            dot_out.as_deref(),
            *full_dot,
        ),
    }
}

/// Resets `SIGPIPE` to its default disposition (`SIG_DFL`).
///
/// Rust's runtime ignores `SIGPIPE` by default, which causes programs that
/// write to a closed pipe (e.g. `tracemesh build --c-out /dev/stdout | head`)
/// to receive an `Err(BrokenPipe)` from a write call rather than being
/// terminated silently. Restoring the default disposition makes the kernel
/// terminate the process the way standard Unix tools do.
#[cfg(unix)]
fn install_sigpipe_default() {
    // SAFETY: signal() is safe to call during single-threaded program
    // initialization before any other threads are spawned. SIG_DFL is a
    // valid handler for SIGPIPE. The return value (previous handler) is
    // discarded.
    //
    // The workspace denies `unsafe_code` globally, but this is the minimal
    // unavoidable use of libc required for SIGPIPE handling on Unix. There
    // is no safe Rust equivalent in the standard library.
    #[allow(unsafe_code)]
    {
        unsafe {
            libc::signal(libc::SIGPIPE, libc::SIG_DFL);
        }
    }
}
