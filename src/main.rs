use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use owagate::confreader::ConfReader;
use owagate::observability::init_tracing;
use owagate::state::AppState;

/// HTTP gateway for Oracle stored-procedure web APIs.
#[derive(Parser, Debug)]
#[command(name = "owagate", version, about)]
struct Cli {
    /// Oracle DSN of the configuration database (user/password@sid)
    #[arg(long)]
    dsn: String,

    /// Configuration name to request from the database
    #[arg(long)]
    conf: String,

    /// Configuration poll period, seconds
    #[arg(long = "conf_tm", default_value_t = 30)]
    conf_tm: u64,

    /// Host name reported to the configuration procedure (defaults to the
    /// machine's host name)
    #[arg(long)]
    host: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let hostname = match cli.host {
        Some(host) => host,
        None => hostname::get()
            .context("unable to determine host name")?
            .to_string_lossy()
            .into_owned(),
    };

    let base_dir = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|d| d.to_path_buf()))
        .unwrap_or_else(|| std::path::PathBuf::from("."));

    let state = AppState::new(base_dir);

    let mut reader = ConfReader::new(&cli.dsn, &cli.conf, hostname, state.clone())
        .context("invalid configuration source")?;

    // the first read is synchronous; without a configuration there is
    // nothing to serve
    let reader = tokio::task::spawn_blocking(move || {
        reader.read_and_apply().map(|_| reader)
    })
    .await
    .context("configuration reader panicked")?
    .context("unable to read the initial configuration")?;

    let reader_handle = reader.spawn(Duration::from_secs(cli.conf_tm.max(1)));

    let served = owagate::server::serve(state).await;

    reader_handle.shutdown();
    served.context("server failed")?;
    Ok(())
}
