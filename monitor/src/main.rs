use clap::Parser;
use timelock_monitor::{run, Options};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = Options::parse();
    opts.logging.init();
    run(opts).await
}
