//! Minimal WebSocket client for exercising a running relay.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use crossbar_server::Group;
use crossbar_settings::CrossbarSettings;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

/// Listener group on the command line.
#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum GroupArg {
    /// Group A.
    A,
    /// Group B.
    B,
}

impl From<GroupArg> for Group {
    fn from(g: GroupArg) -> Self {
        match g {
            GroupArg::A => Group::A,
            GroupArg::B => Group::B,
        }
    }
}

/// Where to connect.
#[derive(Args, Debug)]
pub struct Target {
    /// Group to join.
    #[arg(long, value_enum, default_value = "a")]
    group: GroupArg,

    /// Relay host.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Full URL, overriding `--group` and `--host`.
    #[arg(long)]
    url: Option<String>,
}

impl Target {
    fn url(&self, settings: &CrossbarSettings) -> String {
        if let Some(url) = &self.url {
            return url.clone();
        }
        let port = match Group::from(self.group) {
            Group::A => settings.server.group_a_port,
            Group::B => settings.server.group_b_port,
        };
        format!("ws://{}:{port}/", self.host)
    }
}

/// Arguments for `send`.
#[derive(Args, Debug)]
pub struct SendArgs {
    #[command(flatten)]
    target: Target,

    /// Wrap each message as a bridge request (`{"type": marker, "data": {"text": ...}}`).
    #[arg(long)]
    bridge: bool,

    /// Image URL added to bridge requests.
    #[arg(long, requires = "bridge")]
    image_url: Option<String>,

    /// Seconds to keep printing replies after the last send.
    #[arg(long, default_value_t = 2)]
    wait: u64,

    /// Messages to send, in order.
    #[arg(required = true)]
    messages: Vec<String>,
}

impl SendArgs {
    fn payloads(&self, marker: &str) -> Vec<String> {
        self.messages
            .iter()
            .map(|text| {
                if !self.bridge {
                    return text.clone();
                }
                let mut data = json!({ "text": text });
                if let Some(url) = &self.image_url {
                    data["imageUrl"] = json!(url);
                }
                json!({ "type": marker, "data": data }).to_string()
            })
            .collect()
    }
}

/// Arguments for `listen`.
#[derive(Args, Debug)]
pub struct ListenArgs {
    #[command(flatten)]
    target: Target,
}

/// Send messages to a group and print replies until `--wait` elapses.
pub async fn run_send(settings: &CrossbarSettings, args: SendArgs) -> Result<()> {
    let url = args.target.url(settings);
    let (ws, _) = connect_async(url.as_str())
        .await
        .with_context(|| format!("Failed to connect to {url}"))?;
    tracing::info!(%url, "connected");
    let (mut tx, mut rx) = ws.split();

    for payload in args.payloads(&settings.bridge.request_marker) {
        tx.send(Message::text(payload.as_str()))
            .await
            .context("Failed to send message")?;
        println!("> {payload}");
    }

    let wait = tokio::time::sleep(Duration::from_secs(args.wait));
    tokio::pin!(wait);
    loop {
        tokio::select! {
            () = &mut wait => break,
            next = rx.next() => match next {
                Some(Ok(msg)) => print_message(&msg),
                Some(Err(e)) => return Err(e).context("Connection failed"),
                None => break,
            },
        }
    }

    let _ = tx.send(Message::Close(None)).await;
    Ok(())
}

/// Print every message received from a group until Ctrl-C or disconnect.
pub async fn run_listen(settings: &CrossbarSettings, args: ListenArgs) -> Result<()> {
    let url = args.target.url(settings);
    let (mut ws, _) = connect_async(url.as_str())
        .await
        .with_context(|| format!("Failed to connect to {url}"))?;
    tracing::info!(%url, "listening");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                let _ = ws.close(None).await;
                break;
            }
            next = ws.next() => match next {
                Some(Ok(msg)) => print_message(&msg),
                Some(Err(e)) => return Err(e).context("Connection failed"),
                None => break,
            },
        }
    }
    Ok(())
}

fn print_message(msg: &Message) {
    match msg {
        Message::Text(text) => println!("< {}", text.as_str()),
        Message::Binary(data) => println!("< [{} bytes]", data.len()),
        Message::Close(frame) => tracing::info!(?frame, "relay closed the connection"),
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(url: Option<&str>, group: GroupArg) -> Target {
        Target {
            group,
            host: "10.0.0.5".into(),
            url: url.map(str::to_owned),
        }
    }

    #[test]
    fn url_uses_group_port() {
        let settings = CrossbarSettings::default();
        assert_eq!(target(None, GroupArg::A).url(&settings), "ws://10.0.0.5:8675/");
        assert_eq!(target(None, GroupArg::B).url(&settings), "ws://10.0.0.5:8775/");
    }

    #[test]
    fn explicit_url_wins() {
        let settings = CrossbarSettings::default();
        let t = target(Some("ws://relay:1/x"), GroupArg::B);
        assert_eq!(t.url(&settings), "ws://relay:1/x");
    }

    #[test]
    fn bridge_payloads_wrap_text() {
        let args = SendArgs {
            target: target(None, GroupArg::A),
            bridge: true,
            image_url: Some("http://img/1.png".into()),
            wait: 0,
            messages: vec!["hi".into()],
        };
        let payloads = args.payloads("POST");
        let value: serde_json::Value = serde_json::from_str(&payloads[0]).unwrap();
        assert_eq!(value["type"], "POST");
        assert_eq!(value["data"]["text"], "hi");
        assert_eq!(value["data"]["imageUrl"], "http://img/1.png");
    }

    #[test]
    fn plain_payloads_pass_through() {
        let args = SendArgs {
            target: target(None, GroupArg::A),
            bridge: false,
            image_url: None,
            wait: 0,
            messages: vec!["one".into(), "two".into()],
        };
        assert_eq!(args.payloads("POST"), vec!["one", "two"]);
    }
}
