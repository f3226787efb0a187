//! Headless wire-protocol exerciser against a running server.
//!
//! Connects, waits for the color assignment, paints one pixel, watches
//! for the ack and the echoed broadcast, then requests a full panel sync
//! and verifies the decompressed payload.

use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use shared::{
    decompress_panel, ClientFrame, Color, ColorMode, ServerFrame, ACK_ACCEPTED, PANEL_PIXEL_BYTES,
    PANEL_SIZE,
};
use std::time::Duration;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

#[derive(Parser, Debug)]
#[command(about = "Protocol test client for the canvas server")]
struct Args {
    /// Websocket endpoint to connect to
    #[arg(long, default_value = "ws://127.0.0.1:8080/ws")]
    url: String,
    /// Admission token, appended as a query parameter when set
    #[arg(long)]
    token: Option<String>,
    /// Panel to paint and sync
    #[arg(long, default_value_t = 5)]
    panel: u16,
}

const REPLY_WAIT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let url = match &args.token {
        Some(token) => format!("{}?token={}", args.url, token),
        None => args.url.clone(),
    };

    let (ws_stream, _) = connect_async(&url).await?;
    println!("Connected to {}", args.url);
    let (mut write, mut read) = ws_stream.split();

    // The first server frame is the color assignment.
    let assigned = match next_frame(&mut read).await? {
        ServerFrame::AssignColor { color } => {
            println!("Assigned color: ({}, {}, {})", color.r, color.g, color.b);
            color
        }
        other => return Err(format!("expected AssignColor, got {}", frame_name(&other)).into()),
    };

    // Paint one pixel and expect both an ack and the echoed broadcast.
    let (x, y) = (10u8, 20u8);
    let update = ClientFrame::Update {
        panel: args.panel,
        x,
        y,
        color: None,
    };
    write
        .send(Message::Binary(
            update.encode(ColorMode::ServerAssigned).into(),
        ))
        .await?;

    let mut acked = false;
    let mut echoed: Option<Color> = None;
    while !acked || echoed.is_none() {
        match next_frame(&mut read).await? {
            ServerFrame::UpdateAck { result } => {
                println!("Update acknowledged (result {})", result);
                if result != ACK_ACCEPTED {
                    return Err(format!("unexpected ack result {}", result).into());
                }
                acked = true;
            }
            ServerFrame::Broadcast {
                panel,
                x: bx,
                y: by,
                color,
                timestamp,
            } => {
                if panel == args.panel && bx == x && by == y {
                    println!(
                        "Broadcast echoed: panel {} ({}, {}) color ({}, {}, {}) at {}",
                        panel, bx, by, color.r, color.g, color.b, timestamp
                    );
                    echoed = Some(color);
                }
            }
            other => println!("Ignoring frame: {}", frame_name(&other)),
        }
    }

    if echoed != Some(assigned) {
        return Err("broadcast color does not match the assigned color".into());
    }

    // Full panel sync round-trip.
    let request = ClientFrame::Request { panel: args.panel };
    write
        .send(Message::Binary(
            request.encode(ColorMode::ServerAssigned).into(),
        ))
        .await?;

    loop {
        if let ServerFrame::PanelSync { panel, payload } = next_frame(&mut read).await? {
            let raw = decompress_panel(&payload)?;
            println!(
                "Panel {} synced: {} compressed bytes, {} raw",
                panel,
                payload.len(),
                raw.len()
            );
            assert_eq!(raw.len(), PANEL_PIXEL_BYTES);

            let idx = (y as usize * PANEL_SIZE + x as usize) * 3;
            let pixel = Color::new(raw[idx], raw[idx + 1], raw[idx + 2]);
            if pixel != assigned {
                return Err(format!(
                    "synced pixel ({}, {}, {}) does not match assigned color",
                    pixel.r, pixel.g, pixel.b
                )
                .into());
            }
            println!("Synced pixel matches the painted color");
            break;
        }
    }

    write.send(Message::Close(None)).await?;
    println!("Done");
    Ok(())
}

/// Reads the next binary frame and decodes it, skipping transport-level
/// messages.
async fn next_frame<S>(read: &mut S) -> Result<ServerFrame, Box<dyn std::error::Error>>
where
    S: StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let message = timeout(REPLY_WAIT, read.next())
            .await
            .map_err(|_| "timed out waiting for a server frame")?
            .ok_or("connection closed")??;

        if let Message::Binary(data) = message {
            return Ok(ServerFrame::decode(&data)?);
        }
    }
}

fn frame_name(frame: &ServerFrame) -> &'static str {
    match frame {
        ServerFrame::UpdateAck { .. } => "UpdateAck",
        ServerFrame::Broadcast { .. } => "Broadcast",
        ServerFrame::PanelSync { .. } => "PanelSync",
        ServerFrame::AssignColor { .. } => "AssignColor",
    }
}
