//! Voltage DL/T 645 Demo
//!
//! Demonstrates the voltage_dlt645 library features including:
//! - BCD fixed-point value encoding/decoding
//! - Frame building and parsing
//! - A loopback meter server plus client reading registers over TCP
//!
//! Usage: cargo run --bin demo [config_dir]
//! Example: cargo run --bin demo config

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use voltage_dlt645::{
    bcd_to_float, bytes_to_hex_string, float_to_bcd, Demand, DiCatalog, Dlt645Value, Frame,
    MeterServer, TcpMeterClient, TcpMeterServer,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    voltage_dlt645::logging::init("info").ok();

    println!("🚀 Voltage DL/T 645 v0.1.0 Demo");
    println!("===============================\n");

    // =========================================================================
    // Part 1: BCD Fixed-Point Codec (no connection required)
    // =========================================================================
    println!("📦 Part 1: BCD Fixed-Point Codec");
    println!("---------------------------------");

    for (format, value) in [
        ("XXXXXX.XX", 1234.56f32),
        ("XX.XXXX", 75.0),
        ("XXX.X", 230.5),
        ("X.XXX", -0.987),
    ] {
        let bcd = float_to_bcd(value, format, true)?;
        let back = bcd_to_float(&bcd, format, true)?;
        println!(
            "  {:>10} {:>10} -> [{}] -> {}",
            format,
            value,
            bytes_to_hex_string(&bcd),
            back
        );
    }

    // =========================================================================
    // Part 2: Frame Codec
    // =========================================================================
    println!("\n🔄 Part 2: Frame Codec");
    println!("-----------------------");

    let address = [0x01, 0x00, 0x00, 0x00, 0x00, 0x00];
    let wire = Frame::build(address, 0x11, &0x0000_0000u32.to_le_bytes())?;
    println!("  Read request on the wire: {}", bytes_to_hex_string(&wire));

    let parsed = Frame::deserialize(&wire)?;
    println!(
        "  Parsed back: ctrl=0x{:02X}, data=[{}]",
        parsed.control,
        bytes_to_hex_string(&parsed.data)
    );

    // =========================================================================
    // Part 3: Loopback Server + Client
    // =========================================================================
    println!("\n🔌 Part 3: Loopback Meter");
    println!("--------------------------");

    let config_dir = std::env::args().nth(1).unwrap_or_else(|| "config".to_string());
    let catalog = Arc::new(DiCatalog::from_config_dir(&config_dir)?);
    println!("  Catalog loaded: {} data identifiers", catalog.len());

    let service = Arc::new(MeterServer::new(address, catalog.clone()));
    service.set00(0x0000_0000, 1234.56)?;
    service.set01(0x0101_0000, Demand::new(7.5, Local::now()))?;
    service.set02(0x0201_0100, 230.5)?;

    let server = TcpMeterServer::bind("127.0.0.1", 0, service.clone()).await?;
    let endpoint = server.local_addr()?;
    let server_task = tokio::spawn(server.run());
    println!("  Server listening on {}", endpoint);

    let mut client = TcpMeterClient::new(
        "127.0.0.1",
        endpoint.port(),
        Duration::from_secs(2),
        catalog,
    )?;
    client.set_address(address)?;

    for di in [0x0000_0000u32, 0x0101_0000, 0x0201_0100] {
        let item = client.read(di).await?;
        match &item.value {
            Dlt645Value::DemandV(demand) => {
                println!("  0x{:08X} {} = {} {}", di, item.name, demand, item.unit)
            }
            value => println!("  0x{:08X} {} = {} {}", di, item.name, value, item.unit),
        }
    }

    client.broadcast_time_sync().await?;
    println!("  Broadcast time sync sent (fire-and-forget)");

    let stats = client.stats();
    println!("\n  📊 Statistics:");
    println!(
        "    Requests: {}, Responses: {}",
        stats.requests_sent, stats.responses_received
    );
    println!(
        "    Bytes sent: {}, received: {}",
        stats.bytes_sent, stats.bytes_received
    );

    client.disconnect().await;
    server_task.abort();

    println!("\n🎉 Demo completed!");
    Ok(())
}
