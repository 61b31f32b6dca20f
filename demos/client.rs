//! Simple WebSocket client example.
//!
//! Start any echo server on port 9001, then run:
//! `cargo run --example client -- ws://127.0.0.1:9001/`

use std::error::Error;

use rsws_client::{CloseCode, Config, ConnectionState, Message, WebSocketClient};
use tokio_util::sync::CancellationToken;

const DEFAULT_URI: &str = "ws://127.0.0.1:9001/";

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();

    let uri = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_URI.into());
    let client = WebSocketClient::new(Config::new());
    let cancel = CancellationToken::new();

    println!("Connecting to {uri}");
    client.connect(&uri).await?;
    println!("Handshake complete (protocol: {:?})", client.protocol());

    let message = "Hello, WebSocket!";
    println!("Sending: {message}");
    client.send_text(message, &cancel).await?;

    match client.receive_message(&cancel).await? {
        Message::Text(text) => println!("Received: {text}"),
        Message::Binary(data) => println!("Received binary: {} bytes", data.len()),
        other => println!("Received: {other:?}"),
    }

    println!("Closing connection...");
    client.close(CloseCode::Normal, "goodbye").await?;

    // Drain until the server's Close arrives or the close wait runs out
    while client.state() != ConnectionState::Closed {
        match client.receive_message(&cancel).await {
            Ok(Message::Close(frame)) => {
                println!("Received close confirmation: {frame:?}");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                println!("Session ended: {e}");
                break;
            }
        }
    }

    println!("Done");
    Ok(())
}
