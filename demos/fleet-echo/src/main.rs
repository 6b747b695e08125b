//! Two-agent demo: a rover serves an echo method and a telemetry stream;
//! an operator finds it through the directory, calls it by capability,
//! and follows the stream.

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use convoy_core::{Aid, KeyPair};
use convoy_events::EventStream;
use convoy_fleet::{
    AgentMetadata, CapabilityDescriptor, DirectoryProvider, InMemoryDirectory, IssueOptions,
    Passport, VerifyOptions,
};
use convoy_rpc::{RpcClient, RpcClientConfig, RpcServer, RpcServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let directory = Arc::new(InMemoryDirectory::new());

    // ---- Rover: identity, passport, server, telemetry ----

    let rover_keys = KeyPair::generate();
    let rover_aid = Aid::from_public_key(&rover_keys.public_key());
    let passport = Passport::issue(
        &rover_keys,
        vec!["echo".to_string(), "telemetry".to_string()],
        &IssueOptions {
            ttl_seconds: Some(3600),
        },
    )?;
    tracing::info!(aid = %rover_aid, "rover identity ready");

    let telemetry = EventStream::new(256)?;
    let server = RpcServer::new(RpcServerConfig::default());
    server.attach_events(&telemetry);
    server.register("echo", |params, from| async move {
        tracing::info!(from = from.map(|a| a.to_string()).unwrap_or_default(), "echo called");
        Ok(params.unwrap_or(serde_json::Value::Null))
    });
    let addr = server.serve("127.0.0.1:0").await?;

    directory
        .register(
            AgentMetadata::new(rover_aid.clone(), "rover-7")
                .with_capability(CapabilityDescriptor::new("echo").with_version("1.0"))
                .with_capability(CapabilityDescriptor::new("telemetry"))
                .with_rpc_endpoint(format!("ws://{addr}")),
        )
        .await?;

    // ---- Operator: verify the passport, call by capability, subscribe ----

    if !passport.verify(&VerifyOptions::default()) {
        return Err("rover passport failed verification".into());
    }
    tracing::info!(capabilities = ?passport.capabilities, "rover passport verified");

    let provider: Arc<dyn DirectoryProvider> = Arc::clone(&directory) as Arc<dyn DirectoryProvider>;
    let operator = RpcClient::new(KeyPair::generate(), provider, RpcClientConfig::default());
    let mut remote = operator.remote_events();

    // "echo" here is a capability, not a URL: the directory routes the call.
    let reply = operator
        .request("echo", "echo", Some(serde_json::json!({"ping": 1})))
        .await?;
    tracing::info!(%reply, "rover answered");

    telemetry.emit(
        "status",
        serde_json::json!({"battery": 0.93, "pose": [1.5, -0.2, 0.0]}),
        Some(rover_aid),
    );
    let event = tokio::time::timeout(Duration::from_secs(5), remote.recv()).await??;
    tracing::info!(
        sequence = event.sequence,
        event_type = %event.event_type,
        data = %event.data,
        "telemetry received"
    );

    operator.close().await;
    server.shutdown();
    Ok(())
}
