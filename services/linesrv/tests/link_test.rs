//! Device link reconnect policy and I/O serialization

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use linesrv::transport::RegisterImage;
use linesrv::{ConnectionState, DeviceLink};

use common::link_params;

#[tokio::test]
async fn test_reconnect_gives_up_after_max_attempts() {
    let image = RegisterImage::new();
    image.set_offline(true);
    let link = DeviceLink::new(link_params("plc-down"), image.factory());

    assert!(!link.try_reconnect().await);
    assert_eq!(image.connect_attempts(), 3);
    assert_eq!(link.state(), ConnectionState::Disconnected);

    let stats = link.stats();
    assert_eq!(stats.reconnect_attempts, 3);
    assert_eq!(stats.successful_reconnects, 0);
}

#[tokio::test]
async fn test_reconnect_waits_fixed_interval_between_attempts() {
    let image = RegisterImage::new();
    image.set_offline(true);
    let mut params = link_params("plc-down");
    params.reconnect_interval = Duration::from_millis(40);
    let link = DeviceLink::new(params, image.factory());

    let started = Instant::now();
    assert!(!link.try_reconnect().await);
    // three attempts, two pauses, no pause after the last attempt
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(80), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(120 + 200), "{elapsed:?}");
}

#[tokio::test]
async fn test_concurrent_reconnect_returns_immediately() {
    let image = RegisterImage::new();
    image.set_connect_delay(Duration::from_millis(150));
    let link = Arc::new(DeviceLink::new(link_params("plc-slow"), image.factory()));

    let first = {
        let link = link.clone();
        tokio::spawn(async move { link.try_reconnect().await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(link.is_reconnecting());

    let started = Instant::now();
    let second = link.try_reconnect().await;
    assert!(!second);
    assert!(started.elapsed() < Duration::from_millis(50));

    assert!(first.await.unwrap());
    assert_eq!(image.connect_attempts(), 1);
    assert_eq!(link.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_connect_is_idempotent() {
    let image = RegisterImage::new();
    let link = DeviceLink::new(link_params("plc-1"), image.factory());
    link.connect().await.unwrap();
    link.connect().await.unwrap();
    assert!(link.is_connected());
    assert_eq!(image.connect_attempts(), 2);
}

#[tokio::test]
async fn test_disconnect_always_ends_disconnected() {
    let image = RegisterImage::new();
    let link = DeviceLink::new(link_params("plc-1"), image.factory());
    link.connect().await.unwrap();
    link.disconnect().await;
    assert_eq!(link.state(), ConnectionState::Disconnected);
    // again, already disconnected
    link.disconnect().await;
    assert_eq!(link.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_failed_read_does_not_reconnect_inline() {
    let image = RegisterImage::new();
    let link = DeviceLink::new(link_params("plc-1"), image.factory());
    link.connect().await.unwrap();

    image.set_offline(true);
    assert!(link.read::<bool>("req").await.is_err());
    image.set_offline(false);
    assert!(link.read::<bool>("req").await.is_err());
    assert_eq!(image.connect_attempts(), 1);

    assert!(link.try_reconnect().await);
    assert!(link.read::<bool>("req").await.is_ok());
}

#[tokio::test]
async fn test_session_excludes_other_callers() {
    let image = RegisterImage::new();
    let link = Arc::new(DeviceLink::new(link_params("plc-1"), image.factory()));
    link.connect().await.unwrap();

    let session = link.session().await;
    let entered = Arc::new(AtomicBool::new(false));
    let waiter = {
        let link = link.clone();
        let entered = entered.clone();
        tokio::spawn(async move {
            link.write("HR1", 7u16).await.unwrap();
            entered.store(true, Ordering::SeqCst);
        })
    };

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(!entered.load(Ordering::SeqCst));

    drop(session);
    tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .unwrap()
        .unwrap();
    assert!(entered.load(Ordering::SeqCst));
    assert_eq!(image.words("HR1"), vec![7]);
}
