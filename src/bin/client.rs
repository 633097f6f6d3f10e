//! Encrypted chat client - entry point
//!
//! Usage: sealchat-client [host] [port] [shared-secret]
//! The secret may also come from the SEALCHAT_SECRET environment variable.

use std::env;
use std::process;

use tracing_subscriber::EnvFilter;

use sealchat::ChatClient;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sealchat=warn")),
        )
        .init();

    let mut args = env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "127.0.0.1".to_string());
    let port: u16 = match args.next() {
        Some(raw) => raw.parse()?,
        None => 12345,
    };
    let secret = args
        .next()
        .or_else(|| env::var("SEALCHAT_SECRET").ok())
        .ok_or("missing shared secret: pass it as the third argument or set SEALCHAT_SECRET")?;

    println!("Connecting to {}:{} ...", host, port);
    let client = match ChatClient::connect(&host, port, &secret).await {
        Ok(client) => client,
        Err(err) => {
            eprintln!("Failed to connect to server: {}. Is the server running?", err);
            process::exit(1);
        }
    };

    println!("Connected! You are in the encrypted chat.");
    println!("Commands:");
    println!("  HELLO <your name>");
    println!("  JOIN <room name>");
    println!("  /rooms  /users");
    println!("  /quit  or  DISC   to leave");
    println!("\nJust type and press Enter to chat.\n");

    client.run().await?;
    Ok(())
}
