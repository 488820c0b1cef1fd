//! MSE relay server with a synthetic source
//!
//! Run with: cargo run --example relay_server [BIND_ADDR]
//!
//! Examples:
//!   cargo run --example relay_server                    # binds to 0.0.0.0:8083
//!   cargo run --example relay_server localhost          # binds to 127.0.0.1:8083
//!   cargo run --example relay_server 127.0.0.1:9000     # binds to 127.0.0.1:9000
//!
//! The server registers one source that emits a 640x480 H.264 track with a
//! keyframe every second. Its id is printed at startup; connect with
//!
//!   ws://localhost:8083/ws?suuid=<id>
//!
//! The payloads are placeholders, so a player will receive well-formed
//! fragments it cannot decode. Useful for checking framing and lifecycle.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};

use mse_relay::{
    CodecData, DeliveryMode, H264Codec, RelayConfig, RelayServer, SourceId, StreamRegistry,
};

const SPS: &[u8] = &[0x67, 0x42, 0xC0, 0x1E, 0xDA, 0x02, 0x80, 0xF6, 0x40];
const PPS: &[u8] = &[0x68, 0xCE, 0x3C, 0x80];
const FPS: u32 = 25;

/// Parse bind address from command line argument
fn parse_bind_addr(arg: &str) -> Result<SocketAddr, String> {
    const DEFAULT_PORT: u16 = 8083;

    let normalized = arg.replace("localhost", "127.0.0.1");

    if let Ok(addr) = normalized.parse::<SocketAddr>() {
        return Ok(addr);
    }

    if let Ok(ip) = normalized.parse::<std::net::IpAddr>() {
        return Ok(SocketAddr::new(ip, DEFAULT_PORT));
    }

    Err(format!(
        "Invalid bind address: '{}'. Expected format: IP:PORT or IP or 'localhost'",
        arg
    ))
}

fn print_usage() {
    eprintln!("Usage: relay_server [BIND_ADDR]");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  BIND_ADDR    Address to bind to (default: 0.0.0.0:8083)");
}

/// One AVCC-framed NAL unit of the given type
fn access_unit(nal_type: u8, frame: u32) -> Bytes {
    let body = [0x80 | (frame & 0x7F) as u8; 32];
    let mut buf = BytesMut::with_capacity(4 + 1 + body.len());
    buf.put_u32(1 + body.len() as u32);
    buf.put_u8(0x60 | nal_type);
    buf.put_slice(&body);
    buf.freeze()
}

/// Publish synthetic frames until the process exits
async fn publish(registry: Arc<StreamRegistry>, id: SourceId, video: H264Codec) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1) / FPS);
    let mut frame: u32 = 0;

    loop {
        ticker.tick().await;

        let nal_type = if frame % FPS == 0 { 5 } else { 1 };
        let dts = Duration::from_secs(1) * frame / FPS;
        let packet = video.packet(0, dts, access_unit(nal_type, frame));
        let keyframe = packet.is_keyframe;

        let delivered = registry.broadcast(&id, packet).await;
        if keyframe {
            tracing::debug!(frame = frame, subscribers = delivered, "Keyframe published");
        }

        frame = frame.wrapping_add(1);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    let config = match args.get(1) {
        Some(addr_str) => match parse_bind_addr(addr_str) {
            Ok(addr) => RelayConfig::with_addr(addr),
            Err(e) => {
                eprintln!("Error: {}", e);
                eprintln!();
                print_usage();
                std::process::exit(1);
            }
        },
        None => RelayConfig::default(),
    };

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("mse_relay=debug".parse()?)
                .add_directive("relay_server=debug".parse()?),
        )
        .init();

    let server = RelayServer::new(config);
    let registry = Arc::clone(server.registry());

    let id = SourceId::new();
    let video = H264Codec::from_parameter_sets(Bytes::from_static(SPS), Bytes::from_static(PPS))?;
    registry.add_source(id, [DeliveryMode::Mse]).await?;
    registry.set_codecs(&id, vec![CodecData::H264(video.clone())]).await?;

    println!("Starting MSE relay on {}", server.bind_addr());
    println!("Source: ws://localhost:{}/ws?suuid={}", server.bind_addr().port(), id);
    println!();

    tokio::spawn(publish(Arc::clone(&registry), id, video));

    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    println!("Shut down");
    Ok(())
}
