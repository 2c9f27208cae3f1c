/// Flowloom server entry point
///
/// Serves:
/// - Flow management API at /api/flows/*
/// - Execution control at /api/executions/*
/// - Webhook triggers at /webhook/{flow_id}/*
/// - Health check at /healthz

use flowloom::{config::Config, server::start_server};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Defaults to 0.0.0.0:3004 and sqlite://data/flowloom.db, overridable via FLOWLOOM_* env vars
    let config = Config::default();

    start_server(config).await?;

    Ok(())
}
