use anyhow::Result;
use tracing::{error, info};

use crew::{cli, logger};

fn main() -> Result<()> {
    logger::init()?;
    info!(args = ?std::env::args().collect::<Vec<_>>(), "crew start");

    match cli::run() {
        Ok(result) => {
            info!("crew finished successfully");
            Ok(result)
        }
        Err(err) => {
            error!(error = ?err, "crew failed");
            Err(err)
        }
    }
}
