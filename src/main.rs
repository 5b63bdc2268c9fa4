// src/main.rs

use watchpipe::{cli, logging, run};

#[tokio::main]
async fn main() {
    match run_main().await {
        Ok(Some(false)) => std::process::exit(1),
        Ok(_) => {}
        Err(err) => {
            eprintln!("watchpipe error: {err:?}");
            std::process::exit(1);
        }
    }
}

async fn run_main() -> anyhow::Result<Option<bool>> {
    let args = cli::parse();
    let once = args.once;
    logging::init_logging(args.log_level)?;
    let outcome = run(args).await?;
    // Only --once reports the run result through the exit status.
    Ok(if once { outcome } else { None })
}
