use std::sync::Arc;
use std::time::Duration;

use nexus_core::{ForwardEntry, ModelDatabase, ModelProfile, ModelSession};
use nexus_scheduler::{BackendClient, SchedError};

const GPU: &str = "TITAN X (Pascal)";
const MEM_PER_BATCH: u64 = 256 << 20;

fn resnet_profile() -> ModelProfile {
    let latencies = [5000.0, 7000.0, 9000.0, 11000.0, 13000.0, 15000.0, 17500.0, 20000.0];
    ModelProfile {
        profile_id: "tensorflow:resnet50:1".to_string(),
        gpu_device: GPU.to_string(),
        forward: latencies
            .iter()
            .enumerate()
            .map(|(i, &latency_us)| ForwardEntry {
                batch: i as u32 + 1,
                latency_us,
                std_us: 0.0,
                memory_bytes: (i as u64 + 1) * MEM_PER_BATCH,
            })
            .collect(),
        preprocess_us: 1000.0,
        postprocess_us: 1000.0,
    }
}

fn session(sla_ms: u32) -> ModelSession {
    ModelSession {
        framework: "tensorflow".to_string(),
        model_name: "resnet50".to_string(),
        version: 1,
        latency_sla: sla_ms,
        image_height: None,
        image_width: None,
    }
}

fn backend() -> BackendClient {
    let mut db = ModelDatabase::empty();
    db.insert(resnet_profile());
    BackendClient::new(
        1,
        "127.0.0.1:7001".to_string(),
        "http://127.0.0.1:1".to_string(),
        GPU.to_string(),
        12 << 30,
        Duration::from_secs(10),
        Arc::new(db),
    )
    .unwrap()
}

fn assert_close(a: f64, b: f64) {
    assert!((a - b).abs() < 1e-6 * b.abs().max(1.0), "{a} != {b}");
}

#[tokio::test]
async fn saturating_workload_adopts_max_throughput_plan() {
    let backend = backend();
    // max throughput at 50ms SLA is 160 req/s; 10000 req/s saturates it.
    let (config, occupancy) = backend.prepare_load_model(&session(50), 10000.0).await;
    assert_eq!(config.batch, 8);
    assert_eq!(config.max_batch, 8);
    assert_close(config.forward_latency_us, 20000.0);
    assert_eq!(config.memory_usage_bytes, 8 * MEM_PER_BATCH);
    assert_close(config.throughput, 160.0);
    assert_close(config.workload, 160.0);
    assert_close(occupancy, 1.0);
}

#[tokio::test]
async fn zero_workload_means_saturating() {
    let backend = backend();
    let (config, occupancy) = backend.prepare_load_model(&session(50), 0.0).await;
    assert_eq!(config.batch, 8);
    assert_close(occupancy, 1.0);
}

#[tokio::test]
async fn residue_workload_picks_largest_feasible_batch() {
    let backend = backend();
    let profile = resnet_profile();
    let (config, occupancy) = backend.prepare_load_model(&session(50), 50.0).await;

    // batch 2: 20000 + 7000 + 2000 = 29000us fits; batch 3: 40000 + 9000 +
    // 2000 = 51000us does not.
    assert_eq!(config.batch, 2);
    assert_eq!(config.max_batch, 8);
    let duty_cycle = 50000.0 - 7000.0 - 2000.0;
    assert_close(config.throughput, 2.0 * 1e6 / duty_cycle);
    assert_close(config.workload, 50.0);
    assert_eq!(config.memory_usage_bytes, 2 * MEM_PER_BATCH);
    assert_close(occupancy, 7000.0 / duty_cycle);

    // Chosen b satisfies the duty-cycle inequality; b + 1 must not.
    let fits = |b: u32| {
        let fwd = profile.forward_latency(b).unwrap() as f64;
        let min_duty = (b - 1) as f64 * 1e6 / 50.0;
        min_duty + fwd + 2000.0 <= 50000.0
    };
    assert!(fits(config.batch));
    assert!(!fits(config.batch + 1));
}

#[tokio::test]
async fn residue_workload_higher_rate() {
    let backend = backend();
    // 120 req/s: batch 5 needs 33333 + 13000 + 2000 = 48333us, batch 6
    // needs 41667 + 15000 + 2000 = 58667us.
    let (config, _) = backend.prepare_load_model(&session(50), 120.0).await;
    assert_eq!(config.batch, 5);
}

#[tokio::test]
async fn missing_profile_is_unservable() {
    let backend = backend();
    let other = ModelSession {
        model_name: "vgg16".to_string(),
        ..session(50)
    };
    let (config, occupancy) = backend.prepare_load_model(&other, 100.0).await;
    assert_eq!(config.batch, 0);
    assert_eq!(occupancy, 0.0);
}

#[tokio::test]
async fn infeasible_sla_is_unservable() {
    let backend = backend();
    // 5ms SLA: even batch 1 costs 1000 + 5000 + 1000 = 7000us.
    let (config, _) = backend.prepare_load_model(&session(5), 100.0).await;
    assert_eq!(config.batch, 0);
}

#[tokio::test]
async fn loaded_backend_refuses_dynamic_coload() {
    let backend = backend();
    let (config, _) = backend.prepare_load_model(&session(50), 0.0).await;
    backend.load_model(&config).await.unwrap();

    // Single-model backend invariants.
    assert_close(backend.exec_cycle_us().await, 20000.0);
    assert_close(backend.duty_cycle_us().await, 50000.0 - 20000.0);
    assert!(backend.is_dirty().await);

    let (again, occupancy) = backend.prepare_load_model(&session(50), 100.0).await;
    assert_eq!(again.batch, 0);
    assert_eq!(occupancy, 0.0);

    let err = backend.load_model(&config).await.unwrap_err();
    assert!(matches!(err, SchedError::BackendNotIdle(1)));
}

#[tokio::test]
async fn static_loader_extends_duty_cycle_additively() {
    let backend = backend();
    backend.load_model_static(&session(50), 4).await.unwrap();

    // First model: exec cycle and duty cycle are both forward(4).
    assert_close(backend.exec_cycle_us().await, 11000.0);
    assert_close(backend.duty_cycle_us().await, 11000.0);
    let table = backend.model_table().await;
    assert_eq!(table.len(), 1);
    assert_close(table[0].throughput, 4.0 * 1e6 / 11000.0);

    // Second model joins additively and every throughput is recomputed.
    backend.load_model_static(&session(100), 2).await.unwrap();
    assert_close(backend.exec_cycle_us().await, 18000.0);
    assert_close(backend.duty_cycle_us().await, 18000.0);
    let table = backend.model_table().await;
    assert_eq!(table.len(), 2);
    assert_close(table[0].throughput, 4.0 * 1e6 / 18000.0);
    assert_close(table[1].throughput, 2.0 * 1e6 / 18000.0);
    assert_close(table[1].workload, table[1].throughput);
}

#[tokio::test]
async fn static_loader_requires_a_profile() {
    let backend = backend();
    let other = ModelSession {
        model_name: "vgg16".to_string(),
        ..session(50)
    };
    let err = backend.load_model_static(&other, 4).await.unwrap_err();
    assert!(matches!(err, SchedError::ProfileMissing { .. }));
    assert!(!backend.is_dirty().await);
}
