// SPDX-License-Identifier: MIT
//
// QC HL7 Simulator: Analyzer-to-Middleware Quality Control Feed
// Copyright (c) 2026 QC Simulator Contributors

//! End-to-end feed tests over loopback MLLP

use std::net::SocketAddr;
use std::sync::Arc;

use qcsim_core::config::{FeederConfig, ReceiverConfig, ReplyMode};
use qcsim_core::generator::ValueGenerator;
use qcsim_core::hl7::{self, Hl7Timestamp, ObservationFields};
use qcsim_core::receiver::Receiver;
use qcsim_core::transport::MllpClient;
use qcsim_core::{ControlBand, ControlLevel, Feeder, Measurement, TransportError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

async fn start_receiver(mode: ReplyMode) -> SocketAddr {
    let config = ReceiverConfig {
        listen_address: "127.0.0.1:0".to_string(),
        reply_mode: mode,
        ..Default::default()
    };
    let receiver = Receiver::bind(config).await.unwrap();
    let addr = receiver.local_addr().unwrap();
    tokio::spawn(receiver.run_until(std::future::pending()));
    addr
}

fn feeder_config(port: u16, count: usize) -> FeederConfig {
    FeederConfig {
        host: "127.0.0.1".to_string(),
        port,
        count_per_level: count,
        pacing_ms: 0,
        ..Default::default()
    }
}

#[tokio::test]
async fn seeded_first_value_is_encoded_and_delivered() {
    let level = Arc::new(ControlLevel::new("I", 9.70, 0.39, "003980").unwrap());
    let mut generator = ValueGenerator::for_stream(42, 0);
    let value = generator.generate(level.mean(), level.sd()).unwrap();
    assert_eq!(level.classify(value), ControlBand::InControl);

    let measurement = Measurement {
        index: 0,
        value,
        level: Arc::clone(&level),
    };
    let message = hl7::encode_measurement(&measurement, &Hl7Timestamp::now());
    let obx = message
        .text()
        .split('\r')
        .find(|segment| segment.starts_with("OBX|1|NM|"))
        .unwrap();
    assert!(obx.contains(&format!("||{:.2}|mg/dL^mg/dL^A400|", value)));

    let addr = start_receiver(ReplyMode::Echo).await;
    let response = MllpClient::default()
        .send(message.text(), "127.0.0.1", addr.port())
        .await
        .unwrap();
    assert!(!response.bytes.is_empty());

    let echoed = std::str::from_utf8(response.payload()).unwrap();
    let fields = ObservationFields::extract(echoed).unwrap();
    assert_eq!(fields.control_id, message.control_id().to_string());
    assert!((fields.value - value).abs() < 1e-9);
}

#[tokio::test]
async fn feeder_delivers_every_level_in_order() {
    let addr = start_receiver(ReplyMode::Ack).await;
    let feeder = Feeder::new(&feeder_config(addr.port(), 4)).unwrap();
    let report = feeder.run().await.unwrap();

    assert!(report.is_clean());
    assert_eq!(report.total_sent(), 8);
    assert_eq!(report.levels[0].level.tag(), "I");
    assert_eq!(report.levels[1].level.tag(), "II");

    for level in &report.levels {
        let indices: Vec<usize> = level.outcomes.iter().map(|o| o.measurement.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
        for outcome in &level.outcomes {
            let ack = std::str::from_utf8(outcome.delivery.as_ref().unwrap().payload()).unwrap();
            let expected = outcome.control_id.to_string();
            assert_eq!(hl7::ack_status(ack), Some(("AA", expected.as_str())));
        }
    }

    assert_eq!(feeder.metrics().messages_sent(), 8);
    assert!(report.latency_p95.is_some());
}

#[tokio::test]
async fn parallel_levels_reproduce_sequential_values() {
    let addr = start_receiver(ReplyMode::Ack).await;

    let sequential = Feeder::new(&feeder_config(addr.port(), 5))
        .unwrap()
        .run()
        .await
        .unwrap();

    let config = FeederConfig {
        parallel_levels: true,
        ..feeder_config(addr.port(), 5)
    };
    let parallel = Feeder::new(&config).unwrap().run().await.unwrap();

    assert!(parallel.is_clean());
    for (a, b) in sequential.levels.iter().zip(&parallel.levels) {
        let left: Vec<u64> = a.outcomes.iter().map(|o| o.measurement.value.to_bits()).collect();
        let right: Vec<u64> = b.outcomes.iter().map(|o| o.measurement.value.to_bits()).collect();
        assert_eq!(left, right);
    }
}

#[tokio::test]
async fn cancellation_between_messages_keeps_partial_report() {
    let addr = start_receiver(ReplyMode::Ack).await;
    let config = FeederConfig {
        pacing_ms: 10_000,
        ..feeder_config(addr.port(), 3)
    };
    let cancel = CancellationToken::new();
    let feeder = Feeder::new(&config)
        .unwrap()
        .with_cancellation(cancel.clone());

    let trigger = tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        cancel.cancel();
    });

    let started = std::time::Instant::now();
    let report = feeder.run().await.unwrap();
    trigger.await.unwrap();

    assert!(started.elapsed() < std::time::Duration::from_secs(5));
    assert!(report.interrupted);
    assert_eq!(report.levels[0].outcomes.len(), 1);
    assert_eq!(report.levels[1].outcomes.len(), 0);
    assert_eq!(report.total_sent(), 1);
    assert!(report.to_string().contains("1 sent, 0 failed"));
}

#[tokio::test]
async fn transport_failure_is_recorded_and_run_continues() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    // First connection is closed without a reply, later ones get a byte back.
    tokio::spawn(async move {
        let mut accepted = 0usize;
        while let Ok((mut stream, _)) = listener.accept().await {
            accepted += 1;
            let mut buf = vec![0u8; 4096];
            let _ = stream.read(&mut buf).await;
            if accepted > 1 {
                let _ = stream.write_all(b"\x0bOK\x1c\x0d").await;
            }
        }
    });

    let feeder = Feeder::new(&feeder_config(port, 3)).unwrap();
    let report = feeder.run().await.unwrap();

    assert_eq!(report.levels[0].failed_indices(), vec![0]);
    assert!(matches!(
        report.levels[0].outcomes[0].delivery,
        Err(TransportError::NoResponse) | Err(TransportError::Read(_))
    ));
    assert_eq!(report.levels[1].failed(), 0);
    assert_eq!(report.total_sent(), 5);
    assert_eq!(feeder.metrics().messages_failed(), 1);
}
