//! End-to-end fan-out benchmark for huddle.
//!
//! Connects N identified clients to a running server, has every client send
//! `typing` events, and counts what comes back over real sockets.

use futures_util::{SinkExt, StreamExt};
use huddle_bench::{init_event, typing_event};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Barrier;
use tokio_tungstenite::{connect_async, tungstenite::Message};

const DEFAULT_URL: &str = "ws://127.0.0.1:3000/api/messages/ws";
const WARMUP_SECS: u64 = 2;
const BENCH_SECS: u64 = 10;

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let num_clients = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(16);
    let url = args.get(2).cloned().unwrap_or_else(|| DEFAULT_URL.to_string());

    println!("huddle end-to-end fan-out benchmark");
    println!("  server:  {}", url);
    println!("  clients: {}", num_clients);
    println!("  warmup {}s, measurement {}s", WARMUP_SECS, BENCH_SECS);
    println!();

    run_fanout_benchmark(num_clients, url).await;
}

async fn run_fanout_benchmark(num_clients: usize, url: String) {
    let sent = Arc::new(AtomicU64::new(0));
    let received = Arc::new(AtomicU64::new(0));
    let barrier = Arc::new(Barrier::new(num_clients + 1));

    let mut handles = Vec::new();

    for client_id in 0..num_clients {
        let sent = Arc::clone(&sent);
        let received = Arc::clone(&received);
        let barrier = Arc::clone(&barrier);
        let url = url.clone();

        handles.push(tokio::spawn(async move {
            if let Err(e) = run_client(client_id, &url, sent, received, barrier).await {
                eprintln!("Client {} error: {}", client_id, e);
            }
        }));
    }

    // Wait for all clients to connect
    barrier.wait().await;
    println!("All {} clients identified", num_clients);

    tokio::time::sleep(Duration::from_secs(WARMUP_SECS)).await;

    sent.store(0, Ordering::SeqCst);
    received.store(0, Ordering::SeqCst);
    let start = Instant::now();

    tokio::time::sleep(Duration::from_secs(BENCH_SECS)).await;

    let elapsed = start.elapsed().as_secs_f64();
    let total_sent = sent.load(Ordering::SeqCst);
    let total_received = received.load(Ordering::SeqCst);
    let expected = total_sent * (num_clients as u64).saturating_sub(1);

    println!();
    println!("Results");
    println!("  duration:       {:>12.2}s", elapsed);
    println!("  events sent:    {:>12}", total_sent);
    println!("  events received:{:>12}", total_received);
    println!("  send rate:      {:>12.0} ev/s", total_sent as f64 / elapsed);
    println!("  delivery rate:  {:>12.0} ev/s", total_received as f64 / elapsed);
    if expected > 0 {
        println!(
            "  delivered:      {:>11.1}%",
            total_received as f64 * 100.0 / expected as f64
        );
    }

    for handle in handles {
        handle.abort();
    }
}

async fn run_client(
    client_id: usize,
    url: &str,
    sent: Arc<AtomicU64>,
    received: Arc<AtomicU64>,
    barrier: Arc<Barrier>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (ws, _) = connect_async(url).await?;
    let (mut sender, mut receiver) = ws.split();

    let user = format!("bench-{}", client_id);
    sender
        .send(Message::Binary(init_event(&user)))
        .await?;

    // Wait for all clients to be ready
    barrier.wait().await;

    let recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            if let Ok(Message::Text(_)) = result {
                received.fetch_add(1, Ordering::Relaxed);
            }
        }
    });

    let typing = Message::Binary(typing_event(&user, true));
    loop {
        if sender.send(typing.clone()).await.is_err() {
            break;
        }
        sent.fetch_add(1, Ordering::Relaxed);
        // Small yield to not starve the receiver task
        tokio::task::yield_now().await;
    }

    recv_task.abort();
    Ok(())
}
