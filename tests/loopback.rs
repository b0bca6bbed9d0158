//! End-to-end scenarios over a TCP loopback: a meter server and client on
//! 127.0.0.1 exercising the full frame/codec/catalog/service stack.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Local, TimeZone};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use voltage_dlt645::{
    Demand, DiCatalog, Dlt645Error, Dlt645Value, MeterServer, TcpMeterClient, TcpMeterServer,
    BROADCAST_ADDRESS,
};

const METER_ADDRESS: [u8; 6] = [0x00, 0x00, 0x00, 0x00, 0x00, 0x00];

fn catalog() -> Arc<DiCatalog> {
    let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("config");
    Arc::new(DiCatalog::from_config_dir(dir).expect("catalog loads"))
}

/// Start a server with the given address; returns the service handle, the
/// bound port and the task guard.
async fn start_server(
    address: [u8; 6],
    catalog: Arc<DiCatalog>,
) -> (Arc<MeterServer>, u16, tokio::task::JoinHandle<()>) {
    let service = Arc::new(MeterServer::new(address, catalog));
    let server = TcpMeterServer::bind("127.0.0.1", 0, service.clone())
        .await
        .expect("bind");
    let port = server.local_addr().expect("local addr").port();
    let task = tokio::spawn(async move {
        let _ = server.run().await;
    });
    (service, port, task)
}

async fn connect_client(port: u16, catalog: Arc<DiCatalog>) -> TcpMeterClient {
    let mut client =
        TcpMeterClient::new("127.0.0.1", port, Duration::from_secs(2), catalog).expect("client");
    client.connect().await.expect("connect");
    client
}

#[tokio::test]
async fn read_energy_over_loopback() {
    let catalog = catalog();
    let (service, port, server) = start_server(METER_ADDRESS, catalog.clone()).await;
    service.set00(0x0000_0000, 1234.56).unwrap();

    let mut client = connect_client(port, catalog).await;
    client.set_address(METER_ADDRESS).unwrap();

    let item = client.read00(0x0000_0000).await.unwrap();
    assert_eq!(item.di, 0x0000_0000);
    assert_eq!(item.data_format, "XXXXXX.XX");
    match item.value {
        Dlt645Value::Float(v) => assert!((v - 1234.56).abs() < 0.005),
        other => panic!("expected float value, got {:?}", other),
    }
    assert!(item.timestamp > 0);

    client.disconnect().await;
    server.abort();
}

#[tokio::test]
async fn read_demand_with_occurrence_time() {
    let catalog = catalog();
    let (service, port, server) = start_server(METER_ADDRESS, catalog.clone()).await;

    let occurred = Local.with_ymd_and_hms(2025, 3, 14, 9, 26, 0).unwrap();
    service
        .set01(0x0101_0000, Demand::new(75.0, occurred))
        .unwrap();

    let mut client = connect_client(port, catalog).await;
    client.set_address(METER_ADDRESS).unwrap();

    let item = client.read01(0x0101_0000).await.unwrap();
    assert_eq!(item.data_format, "XX.XXXX");
    match item.value {
        Dlt645Value::DemandV(demand) => {
            assert!((demand.value - 75.0).abs() < 0.0005);
            assert_eq!(demand.occur_time, occurred);
        }
        other => panic!("expected demand value, got {:?}", other),
    }

    client.disconnect().await;
    server.abort();
}

#[tokio::test]
async fn read_variable_over_loopback() {
    let catalog = catalog();
    let (service, port, server) = start_server(METER_ADDRESS, catalog.clone()).await;
    service.set02(0x0201_0100, 230.5).unwrap();

    let mut client = connect_client(port, catalog).await;
    client.set_address(METER_ADDRESS).unwrap();

    let item = client.read02(0x0201_0100).await.unwrap();
    assert_eq!(item.data_format, "XXX.X");
    assert_eq!(item.unit, "V");
    match item.value {
        Dlt645Value::Float(v) => assert!((v - 230.5).abs() < 0.05),
        other => panic!("expected float value, got {:?}", other),
    }

    client.disconnect().await;
    server.abort();
}

#[tokio::test]
async fn address_discovery_with_broadcast() {
    let device = [0x21, 0x43, 0x65, 0x87, 0x09, 0x00];
    let catalog = catalog();
    let (_service, port, server) = start_server(device, catalog.clone()).await;

    let mut client = connect_client(port, catalog).await;
    client.set_address(BROADCAST_ADDRESS).unwrap();

    let item = client.read_address().await.unwrap();
    // The client adopts the discovered address.
    assert_eq!(client.address(), device);
    match item.value {
        Dlt645Value::Text(text) => assert_eq!(text, "000987654321"),
        other => panic!("expected text value, got {:?}", other),
    }

    client.disconnect().await;
    server.abort();
}

#[tokio::test]
async fn corrupted_frame_gets_no_response() {
    let catalog = catalog();
    let (service, port, server) = start_server(METER_ADDRESS, catalog.clone()).await;
    service.set00(0x0000_0000, 42.0).unwrap();

    let mut socket = tokio::net::TcpStream::connect(("127.0.0.1", port))
        .await
        .unwrap();

    // A read request with one data bit flipped: checksum fails, the server
    // stays silent.
    let mut wire = voltage_dlt645::Frame::build(
        METER_ADDRESS,
        0x11,
        &0x0000_0000u32.to_le_bytes(),
    )
    .unwrap();
    wire[15] ^= 0x01;
    socket.write_all(&wire).await.unwrap();

    let mut buf = [0u8; 64];
    let read = tokio::time::timeout(Duration::from_millis(300), socket.read(&mut buf)).await;
    assert!(read.is_err(), "server must not answer a corrupt frame");

    // The same connection still serves a valid frame afterwards.
    let wire = voltage_dlt645::Frame::build(
        METER_ADDRESS,
        0x11,
        &0x0000_0000u32.to_le_bytes(),
    )
    .unwrap();
    socket.write_all(&wire).await.unwrap();
    let n = tokio::time::timeout(Duration::from_secs(1), socket.read(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert!(voltage_dlt645::Frame::deserialize(&buf[..n]).is_ok());

    server.abort();
}

#[tokio::test]
async fn request_timeout_is_bounded() {
    // A listener that accepts but never answers.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let silent = tokio::spawn(async move {
        let (_socket, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
    });

    let mut client =
        TcpMeterClient::new("127.0.0.1", port, Duration::from_millis(200), catalog()).unwrap();
    client.connect().await.unwrap();

    let start = Instant::now();
    let result = client.read00(0x0000_0000).await;
    let elapsed = start.elapsed();

    assert!(matches!(result, Err(Dlt645Error::Timeout { .. })));
    assert!(elapsed >= Duration::from_millis(200));
    assert!(elapsed < Duration::from_millis(600));

    silent.abort();
}

#[tokio::test]
async fn connect_to_dead_port_fails() {
    // Bind then drop to obtain a port with no listener behind it.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let mut client =
        TcpMeterClient::new("127.0.0.1", port, Duration::from_millis(200), catalog()).unwrap();

    let start = Instant::now();
    assert!(client.connect().await.is_err());
    assert!(start.elapsed() < Duration::from_millis(400));
    assert!(!client.is_connected());
}

#[tokio::test]
async fn broadcast_time_sync_fire_and_forget() {
    let catalog = catalog();
    let (service, port, server) = start_server(METER_ADDRESS, catalog.clone()).await;

    let mut client = connect_client(port, catalog).await;

    let start = Instant::now();
    client.broadcast_time_sync().await.unwrap();
    // Fire-and-forget: returns without waiting out the response timeout.
    assert!(start.elapsed() < Duration::from_millis(200));

    // The server still received and recorded the broadcast.
    for _ in 0..50 {
        if service.last_time_sync().is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let synced = service.last_time_sync().expect("server recorded time sync");
    let drift = Local::now().signed_duration_since(synced);
    assert!(drift.num_minutes().abs() <= 1);

    client.disconnect().await;
    server.abort();
}

#[tokio::test]
async fn write_address_roundtrip() {
    let catalog = catalog();
    let (service, port, server) = start_server(METER_ADDRESS, catalog.clone()).await;

    let mut client = connect_client(port, catalog).await;
    client.set_address(METER_ADDRESS).unwrap();

    let new_address = [0x11, 0x22, 0x33, 0x44, 0x55, 0x66];
    client.write_address(new_address).await.unwrap();

    assert_eq!(client.address(), new_address);
    assert_eq!(service.address(), new_address);

    client.disconnect().await;
    server.abort();
}

#[tokio::test]
async fn change_password_roundtrip() {
    let catalog = catalog();
    let (service, port, server) = start_server(METER_ADDRESS, catalog.clone()).await;
    service.set00(0x0000_0000, 5.0).unwrap();

    let mut client = connect_client(port, catalog.clone()).await;
    client.set_address(METER_ADDRESS).unwrap();

    client
        .change_password([0, 0, 0, 0], [0x12, 0x34, 0x56, 0x78])
        .await
        .unwrap();

    // The server only honors the new password now: a write-address with the
    // old password is silently dropped, so the client times out.
    let stale = TcpMeterClient::new(
        "127.0.0.1",
        port,
        Duration::from_millis(200),
        catalog.clone(),
    );
    let mut stale = stale.unwrap();
    stale.connect().await.unwrap();
    stale.set_address(METER_ADDRESS).unwrap();
    let result = stale.write_address([0x01; 6]).await;
    assert!(result.is_err());
    assert_eq!(service.address(), METER_ADDRESS);

    client.disconnect().await;
    stale.disconnect().await;
    server.abort();
}

#[tokio::test]
async fn foreign_address_is_ignored() {
    let catalog = catalog();
    let (service, port, server) = start_server([0x01; 6], catalog.clone()).await;
    service.set00(0x0000_0000, 1.0).unwrap();

    // Client configured for a different device: the server drops the frame
    // and the request times out.
    let mut client = TcpMeterClient::new(
        "127.0.0.1",
        port,
        Duration::from_millis(200),
        catalog.clone(),
    )
    .unwrap();
    client.connect().await.unwrap();
    client.set_address([0x02; 6]).unwrap();

    let result = client.read00(0x0000_0000).await;
    assert!(matches!(result, Err(Dlt645Error::Timeout { .. })));

    client.disconnect().await;
    server.abort();
}

#[tokio::test]
async fn two_clients_in_parallel() {
    let catalog = catalog();
    let (service, port, server) = start_server(METER_ADDRESS, catalog.clone()).await;
    service.set00(0x0000_0000, 111.11).unwrap();
    service.set00(0x0001_0000, 222.22).unwrap();

    let c1 = catalog.clone();
    let first = tokio::spawn(async move {
        let mut client = connect_client(port, c1).await;
        client.set_address(METER_ADDRESS).unwrap();
        for _ in 0..10 {
            let item = client.read00(0x0000_0000).await.unwrap();
            assert!(matches!(item.value, Dlt645Value::Float(v) if (v - 111.11).abs() < 0.005));
        }
        client.disconnect().await;
    });
    let c2 = catalog.clone();
    let second = tokio::spawn(async move {
        let mut client = connect_client(port, c2).await;
        client.set_address(METER_ADDRESS).unwrap();
        for _ in 0..10 {
            let item = client.read00(0x0001_0000).await.unwrap();
            assert!(matches!(item.value, Dlt645Value::Float(v) if (v - 222.22).abs() < 0.005));
        }
        client.disconnect().await;
    });

    first.await.unwrap();
    second.await.unwrap();
    server.abort();
}
