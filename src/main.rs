//! Registry Mirror
//!
//! Command-line entry point: parses arguments, installs the Ctrl-C handler and
//! prints one `<digest> <reference>` line per pushed reference.

use registry_mirror::cli::{Args, Runner};
use std::process;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    let args = Args::parse_args().from_env();
    if args.mappings.is_empty() && args.filename.is_empty() {
        Args::print_examples();
        process::exit(2);
    }
    let runner = Runner::new(args);

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let report = match runner.run(cancel).await {
        Ok(report) => report,
        Err(e) => {
            runner.output().error(&format!("{}", e));
            process::exit(2);
        }
    };

    for pushed in &report.pushed {
        println!("{}", pushed);
    }

    if let Err(e) = report.into_result() {
        eprintln!("error: {}", e);
        process::exit(1);
    }
}
