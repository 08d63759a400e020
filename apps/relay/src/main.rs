use anyhow::{bail, Context, Result};
use ses_protocol::relay::{Peer, RelayClient};
use std::env;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(4);
const PULSE: Duration = Duration::from_secs(1);

fn parse_state(arg: &str) -> Result<bool> {
    match arg {
        "1" | "on" => Ok(true),
        "0" | "off" => Ok(false),
        _ => bail!("Unknown state: {}", arg),
    }
}

async fn switch(client: &RelayClient, peer: &Peer, on: bool) -> Result<()> {
    let ack = client
        .set_relay(peer, on)
        .await
        .with_context(|| format!("switching {} relay {}", peer.url, peer.relay_id))?;
    println!("{} relay {} -> {}: {}", peer.url, peer.relay_id, if on { "ON" } else { "OFF" }, ack.body);
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 || args.len() > 4 {
        bail!("Usage: ses-relay <peer-url> [relay-id] [1|0]");
    }
    let relay_id: u8 = match args.get(2) {
        Some(id) => id.parse().with_context(|| format!("Bad relay id: {}", id))?,
        None => 0,
    };
    let peer = Peer::new(args[1].as_str(), relay_id);
    let client = RelayClient::new(TIMEOUT)?;

    match args.get(3) {
        Some(state) => switch(&client, &peer, parse_state(state)?).await,
        None => {
            switch(&client, &peer, true).await?;
            tokio::time::sleep(PULSE).await;
            switch(&client, &peer, false).await
        }
    }
}
