//! Minimal TLS-terminating listener driven by the interception engine.
//!
//! Reads the ClientHello, asks the engine whether to intercept, and either
//! terminates TLS with an intercept certificate or drops the connection
//! (a real proxy would splice it upstream untouched).
//!
//! ```text
//! EGRESS_INTERCEPT_CA_CERT_PATH=ca.crt EGRESS_INTERCEPT_CA_KEY_PATH=ca.key \
//!     cargo run --example intercept_listener -- 127.0.0.1:8443
//! curl --cacert ca.crt --resolve example.com:8443:127.0.0.1 https://example.com:8443/
//! ```

use anyhow::{Context, Result};
use egress_intercept::{ClientTlsConfig, InterceptConfig, InterceptManager};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::signal;
use tokio_rustls::LazyConfigAcceptor;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config = InterceptConfig::from_env()?;
    let manager = Arc::new(InterceptManager::from_config(&config).context("MITM startup failed")?);
    let tls = Arc::new(ClientTlsConfig::new(Arc::clone(&manager), config.tls_version)?);
    info!(mode = %manager.mode(), "Interception engine ready");

    let bind_addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:8443".to_string());
    let listener = TcpListener::bind(&bind_addr).await?;
    info!("Listening on {}", bind_addr);

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer_addr)) => {
                        let manager = Arc::clone(&manager);
                        let tls = Arc::clone(&tls);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, manager, tls).await {
                                warn!(peer = %peer_addr, error = %e, "connection failed");
                            }
                        });
                    }
                    Err(e) => error!("Failed to accept connection: {}", e),
                }
            }
            _ = signal::ctrl_c() => {
                info!(stats = ?manager.stats(), "Shutdown signal received");
                break;
            }
        }
    }

    Ok(())
}

async fn handle_connection(
    stream: TcpStream,
    manager: Arc<InterceptManager>,
    tls: Arc<ClientTlsConfig>,
) -> Result<()> {
    let destination_ip = stream.local_addr()?.ip().to_string();

    let start = LazyConfigAcceptor::new(rustls::server::Acceptor::default(), stream).await?;
    let sni = start.client_hello().server_name().map(str::to_string);
    let name = sni.clone().unwrap_or_else(|| destination_ip.clone());

    if !manager.decide(&name, Some(&destination_ip)).is_intercept() {
        info!(name = %name, "pass-through (dropped by demo listener)");
        return Ok(());
    }

    let server_config = match sni {
        Some(_) => tls.server_config(),
        None => tls.server_config_for_destination(&destination_ip)?,
    };
    let mut stream = start.into_stream(server_config).await?;

    let mut buf = vec![0u8; 4096];
    let n = stream.read(&mut buf).await?;
    info!(name = %name, bytes = n, "decrypted client data");

    let body = format!("intercepted {}\n", name);
    let response = format!(
        "HTTP/1.1 200 OK\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}
