use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate};
use futures::future::join_all;
use rust_decimal_macros::dec;
use ulid::Ulid;

use stayline::catalog::InMemoryCatalog;
use stayline::engine::{Engine, EngineError, EngineSettings};
use stayline::model::*;
use stayline::notify::NotifyHub;

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies.last().unwrap().as_secs_f64() * 1000.0,
    );
}

fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(2027, 1, 1).unwrap()
}

fn nth_stay(i: u64, nights: u64) -> Stay {
    let check_in = epoch() + Days::new(i * nights);
    Stay::new(check_in, check_in + Days::new(nights))
}

fn property() -> Property {
    Property {
        id: Ulid::new(),
        owner_id: Ulid::new(),
        nightly_base_price: dec!(120),
        cleaning_fee: dec!(45),
        min_nights: 1,
        max_nights: 30,
        max_guests: 6,
        long_stay_discount_7: Some(dec!(8)),
        long_stay_discount_30: None,
    }
}

fn request(property_id: Ulid, stay: Stay) -> BookingRequest {
    BookingRequest {
        property_id,
        guest_id: Ulid::new(),
        stay,
        guests: GuestCount::new(2, 1),
        services: Vec::new(),
        payment: Some(PaymentOutcome {
            payment_method: "card".into(),
            payment_status: PaymentStatus::Paid,
            transaction_id: Ulid::new().to_string(),
        }),
        owner_test: false,
    }
}

fn setup(catalog: &InMemoryCatalog, n: usize) -> Vec<Property> {
    let properties: Vec<Property> = (0..n).map(|_| property()).collect();
    for p in &properties {
        catalog.upsert_property(p.clone()).unwrap();
    }
    println!("  created {} properties", properties.len());
    properties
}

async fn phase1_sequential(engine: &Engine, property: &Property) {
    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n as u64 {
        let t = Instant::now();
        engine
            .create_booking(request(property.id, nth_stay(i, 2)))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

async fn phase2_concurrent(engine: Arc<Engine>, properties: &[Property]) {
    let n_per_task = 200u64;

    let start = Instant::now();
    let tasks = properties.iter().map(|p| {
        let engine = engine.clone();
        let pid = p.id;
        tokio::spawn(async move {
            for j in 0..n_per_task {
                engine
                    .create_booking(request(pid, nth_stay(j, 1)))
                    .await
                    .unwrap();
            }
        })
    });
    for h in join_all(tasks).await {
        h.unwrap();
    }

    let elapsed = start.elapsed();
    let total = properties.len() as u64 * n_per_task;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {} tasks x {n_per_task} bookings = {total} total in {:.2}s = {ops:.0} ops/sec",
        properties.len(),
        elapsed.as_secs_f64()
    );
}

async fn phase3_contention(engine: Arc<Engine>, property: &Property) {
    let rounds = 50u64;
    let racers = 32;
    let mut won = 0;
    let mut conflicts = 0;
    let start = Instant::now();

    for round in 0..rounds {
        let stay = nth_stay(round, 3);
        let tasks = (0..racers).map(|_| {
            let engine = engine.clone();
            let pid = property.id;
            tokio::spawn(async move { engine.create_booking(request(pid, stay)).await })
        });
        for result in join_all(tasks).await {
            match result.unwrap() {
                Ok(_) => won += 1,
                Err(EngineError::Conflict(_)) => conflicts += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
    }

    println!(
        "  {rounds} rounds x {racers} racers in {:.2}s: {won} won, {conflicts} conflicts",
        start.elapsed().as_secs_f64()
    );
    assert_eq!(won, rounds, "exactly one booking per contested stay");
}

async fn phase4_read_under_load(engine: Arc<Engine>, property: &Property) {
    let pid = property.id;
    let writer = {
        let engine = engine.clone();
        tokio::spawn(async move {
            for i in 0..1000u64 {
                let _ = engine.create_booking(request(pid, nth_stay(i, 1))).await;
            }
        })
    };

    let mut latencies = Vec::with_capacity(2000);
    for i in 0..2000u64 {
        let t = Instant::now();
        engine
            .check_availability(pid, nth_stay(i % 1000, 1))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }
    writer.await.unwrap();
    print_latency("availability check latency", &mut latencies);
}

async fn phase5_compaction(engine: &Engine) {
    let before = engine.wal_appends_since_compact().await;
    let start = Instant::now();
    engine.compact_wal().await.unwrap();
    println!(
        "  compacted {before} appends in {:.2}ms",
        start.elapsed().as_secs_f64() * 1000.0
    );
}

#[tokio::main]
async fn main() {
    let dir = std::env::temp_dir().join(format!("stayline_bench_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();

    println!("=== stayline stress benchmark ===");
    println!("data: {}\n", dir.display());

    println!("[setup]");
    let catalog = Arc::new(InMemoryCatalog::new());
    let properties = setup(&catalog, 12);
    let engine = Arc::new(
        Engine::new(
            dir.join("calendar.wal"),
            catalog,
            Arc::new(NotifyHub::new()),
            EngineSettings::default(),
        )
        .unwrap(),
    );

    println!("\n[phase 1] sequential booking throughput");
    phase1_sequential(&engine, &properties[0]).await;

    println!("\n[phase 2] concurrent bookings across properties");
    phase2_concurrent(engine.clone(), &properties[1..9]).await;

    println!("\n[phase 3] contention on one property");
    phase3_contention(engine.clone(), &properties[9]).await;

    println!("\n[phase 4] availability reads under write load");
    phase4_read_under_load(engine.clone(), &properties[10]).await;

    println!("\n[phase 5] WAL compaction");
    phase5_compaction(&engine).await;

    let _ = std::fs::remove_dir_all(&dir);
    println!("\n=== benchmark complete ===");
}
