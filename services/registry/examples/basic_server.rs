//! Registry server backed by a throwaway directory
//!
//! Run with: cargo run -p registry --example basic_server

use registry::RegistryBuilder;
use storage::TempDriver;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Filesystem storage in a temporary directory, removed on exit
    let driver = TempDriver::new()?;
    tracing::info!("Storing registry data in {}", driver.root());

    // Build the registry service
    let app = RegistryBuilder::new().storage(driver.into()).build();

    // Bind to address
    let addr = "127.0.0.1:5000";
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("OCI Registry listening on http://{}", addr);
    tracing::info!("Try: curl http://{}/v2/_catalog", addr);

    // Serve the registry
    axum::serve(listener, app).await?;

    Ok(())
}
