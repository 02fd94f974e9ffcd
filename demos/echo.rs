//! Echo over one multiplexed TCP connection.
//!
//! Starts a TCP listener, connects to it once and runs several concurrent
//! echo exchanges as separate streams over that single connection.
//!
//! ```text
//! cargo run --example echo
//! RUST_LOG=wsmux=debug cargo run --example echo -- config.json
//! ```
//!
//! The optional argument is a JSON session configuration, e.g.
//! `{ "stream_window": 4096, "open_timeout": 2000 }`.

use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tracing_subscriber::{fmt, EnvFilter};
use wsmux::transport::FramedTransport;
use wsmux::{Listener, Session, SessionConfig, Stream};

const MESSAGES: [&str; 3] = ["hello", "multiplexed", "world"];

fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(env_filter).with_target(false).init();
}

fn load_config() -> Result<SessionConfig, Box<dyn std::error::Error>> {
    match std::env::args().nth(1) {
        Some(path) => {
            let json = std::fs::read_to_string(&path)?;
            Ok(SessionConfig::from_json(&json)?)
        }
        None => Ok(SessionConfig::default()),
    }
}

/// Copy everything a stream receives back to it, then half-close.
async fn echo(stream: Stream) -> wsmux::Result<()> {
    let mut reader = stream.clone();
    let mut writer = stream;
    let copied = tokio::io::copy(&mut reader, &mut writer).await?;
    tracing::info!("Stream {} echoed {} bytes", writer.id(), copied);
    writer.close()
}

async fn serve(listener: impl Listener) {
    loop {
        match listener.accept().await {
            Ok(stream) => {
                tokio::spawn(async move {
                    if let Err(e) = echo(stream).await {
                        tracing::warn!("Echo failed: {}", e);
                    }
                });
            }
            Err(e) => {
                tracing::info!("Server session finished: {}", e);
                return;
            }
        }
    }
}

async fn exchange(session: &Session, message: &str) -> wsmux::Result<String> {
    let mut stream = session.open().await?;
    stream.write(message.as_bytes()).await?;
    stream.close()?;

    let mut reply = Vec::new();
    stream.read_to_end(&mut reply).await?;
    Ok(String::from_utf8_lossy(&reply).into_owned())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();
    let config = load_config()?;

    let tcp = TcpListener::bind("127.0.0.1:0").await?;
    let addr = tcp.local_addr()?;
    tracing::info!("Listening on {}", addr);

    let server_config = config.clone();
    let server = tokio::spawn(async move {
        let (socket, peer) = tcp.accept().await?;
        tracing::info!("Accepted TCP connection from {}", peer);
        let transport = FramedTransport::from_tcp(socket)?
            .with_max_message_size(server_config.max_message_size);
        let session = Session::server(transport, server_config)?;
        serve(session).await;
        Ok::<_, wsmux::MuxError>(())
    });

    let transport = FramedTransport::from_tcp(TcpStream::connect(addr).await?)?
        .with_max_message_size(config.max_message_size);
    let client = Session::client(transport, config)?;

    let replies = run_exchanges(&client).await;
    for (message, reply) in MESSAGES.iter().zip(replies) {
        match reply {
            Ok(reply) => tracing::info!("{:?} -> {:?}", message, reply),
            Err(e) => tracing::error!("{:?} failed: {}", message, e),
        }
    }

    client.close();
    server.await??;
    Ok(())
}

/// Run every exchange concurrently on the one session.
async fn run_exchanges(session: &Session) -> Vec<wsmux::Result<String>> {
    let (a, b, c) = tokio::join!(
        exchange(session, MESSAGES[0]),
        exchange(session, MESSAGES[1]),
        exchange(session, MESSAGES[2]),
    );
    vec![a, b, c]
}
