//! Scheduler cycles and the full line lifecycle

mod common;

use std::sync::Arc;
use std::time::Duration;

use figment::providers::{Format, Yaml};
use figment::Figment;
use linesrv::runtime::{build_line, start_line, BuildOptions, CycleReport, StationScheduler};
use linesrv::sink::{MemoryRepository, TracingLogSink};
use linesrv::station::{StationDeps, StationHandshake};
use linesrv::transport::RegisterImage;
use linesrv::{ConfigManager, ConnectionState, DeviceLink, MesSync};
use tokio_util::sync::CancellationToken;

use common::*;

fn deps(mes: Arc<RecordingMes>) -> StationDeps {
    StationDeps {
        mes: Some(Arc::new(MesSync::new(mes))),
        log: Arc::new(TracingLogSink),
        repository: None,
    }
}

/// Two stations on one link with disjoint register blocks
fn two_station_scheduler(image: &RegisterImage, mes: Arc<RecordingMes>) -> StationScheduler {
    let link = Arc::new(DeviceLink::new(link_params("plc-line"), image.factory()));
    let enter = StationHandshake::new(enter_station("op10-enter"), deps(mes.clone())).unwrap();

    let mut master_config = master_station("op40-master");
    let regs = &mut master_config.registers;
    regs.req = "HR200.0".to_string();
    regs.resp = "HR200.1".to_string();
    regs.ok = "HR200.2".to_string();
    regs.ng = "HR200.3".to_string();
    let master = StationHandshake::new(master_config, deps(mes)).unwrap();

    StationScheduler::new(link, vec![enter, master], Duration::from_millis(10))
}

async fn wait_for(image: &RegisterImage, address: &str) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !image.bit(address) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("{address} never set"));
}

#[tokio::test]
async fn test_cycle_polls_every_station() {
    let image = RegisterImage::new();
    let mes = RecordingMes::accepting();
    let mut scheduler = two_station_scheduler(&image, mes.clone());
    scheduler.link().connect().await.unwrap();

    image.set_bit(REQ, true);
    image.set_bit("HR200.0", true);
    image.set(RESISTANCE, 10.0f32);
    image.set(OK_COUNT, 1u16);

    let report = scheduler.run_cycle().await;
    assert_eq!(
        report,
        CycleReport {
            polled: 2,
            acknowledged: 2,
            resets: 0,
            failed: 0,
        }
    );
    assert!(image.bit(RESP));
    assert!(image.bit("HR200.1"));
    assert_eq!(mes.calls(), 1);
}

#[tokio::test]
async fn test_station_errors_do_not_stop_the_cycle() {
    let image = RegisterImage::new();
    let mut scheduler = two_station_scheduler(&image, RecordingMes::accepting());
    image.set_offline(true);

    // never connected and the PLC is away: both stations fail, the cycle completes
    let report = scheduler.run_cycle().await;
    assert_eq!(report.polled, 2);
    assert_eq!(report.failed, 2);

    image.set_offline(false);
    let report = scheduler.run_cycle().await;
    assert_eq!(report.failed, 0);
    assert!(scheduler.link().is_connected());
}

#[tokio::test]
async fn test_rejected_register_does_not_drop_shared_link() {
    let image = RegisterImage::new();
    let mut scheduler = two_station_scheduler(&image, RecordingMes::accepting());
    scheduler.link().connect().await.unwrap();

    // the master's req register answers with an exception, the enter station is healthy
    image.reject("HR200.0");
    image.set_bit(REQ, true);

    for _ in 0..3 {
        let report = scheduler.run_cycle().await;
        assert_eq!(report.polled, 2);
        assert_eq!(report.failed, 1);
    }

    let link = scheduler.link();
    assert_eq!(link.state(), ConnectionState::Connected);
    assert_eq!(image.connect_attempts(), 1);
    assert_eq!(link.stats().reconnect_attempts, 0);
    assert!(image.bit(RESP));
}

#[tokio::test]
async fn test_scheduler_runs_until_cancelled() {
    let image = RegisterImage::new();
    let scheduler = two_station_scheduler(&image, RecordingMes::accepting());
    let link = scheduler.link().clone();
    let token = CancellationToken::new();
    let handle = scheduler.spawn(token.clone());

    image.set_bit(REQ, true);
    wait_for(&image, RESP).await;

    image.set_bit(REQ, false);
    tokio::time::timeout(Duration::from_secs(2), async {
        while image.bit(RESP) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    token.cancel();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(link.state(), ConnectionState::Disconnected);
}

const LINE: &str = r#"
service:
  status_interval_secs: 0
mes:
  base_url: http://mes.invalid
links:
  - name: plc-line1
    transport: memory
    poll_interval_ms: 10
    stations:
      - name: op10-enter
        role: enter
        registers: { req: HR100.0, resp: HR100.1, ok: HR100.2, ng: HR100.3, sn: HR110, sn_len: 16 }
      - name: op40-master
        role: master
        identity: { resource_code: R01, station_code: OP40, work_order_code: WO-001 }
        registers: { req: HR200.0, resp: HR200.1, ok: HR200.2, ng: HR200.3, sn: HR210, sn_len: 16,
                     mismatch: HR200.5, ok_count: HR202, ng_count: HR203 }
        parameters:
          - { name: resistance, unit: ohm, address: HR220, lower: 5.0, upper: 15.0 }
"#;

#[tokio::test]
async fn test_line_lifecycle() {
    let manager = ConfigManager::from_figment(Figment::new().merge(Yaml::string(LINE))).unwrap();
    let mes = RecordingMes::accepting();
    let repository = Arc::new(MemoryRepository::new());
    let options = BuildOptions {
        mes_client: Some(mes.clone()),
        repository: Some(repository.clone()),
        ..BuildOptions::default()
    };

    let build = build_line(manager.config(), options).unwrap();
    assert_eq!(build.schedulers.len(), 1);
    assert_eq!(build.hub.len(), 2);

    let runtime = start_line(build, Duration::ZERO);
    let image = runtime.images["plc-line1"].clone();
    image.set_string("HR210", "SN-LINE-1", 16);
    image.set("HR220", 9.5f32);
    image.set("HR202", 1u16);
    image.set_bit("HR200.0", true);
    wait_for(&image, "HR200.1").await;

    assert!(image.bit("HR200.2"));
    assert_eq!(mes.calls(), 1);
    assert_eq!(mes.requests()[0].sn, "SN-LINE-1");
    assert_eq!(repository.len(), 1);

    let mut rx = runtime.hub.subscribe("op40-master").unwrap();
    let snapshot = tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| s.resp))
        .await
        .unwrap()
        .unwrap()
        .clone();
    assert!(snapshot.ok);
    assert_eq!(snapshot.sn, "SN-LINE-1");

    let links = runtime.links.clone();
    runtime.shutdown().await;
    assert!(links.iter().all(|link| !link.is_connected()));
}

#[tokio::test]
async fn test_simulate_forces_memory_links() {
    let yaml = LINE.replace("transport: memory", "transport: modbus_tcp\n    host: 10.255.255.1");
    let manager = ConfigManager::from_figment(Figment::new().merge(Yaml::string(&yaml))).unwrap();
    let options = BuildOptions {
        simulate: true,
        mes_client: Some(RecordingMes::accepting()),
        ..BuildOptions::default()
    };
    let build = build_line(manager.config(), options).unwrap();
    assert!(build.images.contains_key("plc-line1"));
}
