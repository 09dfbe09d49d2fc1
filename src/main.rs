use std::path::PathBuf;

use anyhow::Result;
use log::info;

use dayline::Dayline;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let db_path = std::env::var("DAYLINE_DB")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("dayline.db"));

    let app = Dayline::open(db_path).await?;
    app.start().await;
    info!("Pipeline running, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    app.stop().await;
    Ok(())
}
