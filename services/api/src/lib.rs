mod allocate;
mod cli;
mod infra;
mod routes;
mod server;

use cv_distribution::error::AppError;

pub async fn run() -> Result<(), AppError> {
    cli::run().await
}
