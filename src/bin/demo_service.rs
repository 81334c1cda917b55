// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Two simulated processes on one driver. The service process registers a
// counter service as context object; the client resolves it, calls it
// <calls> times, watches it for death, then the service process is killed.
//
// Usage:
//   demo_service [calls]
//
// Set RUST_LOG=libbinder=trace to watch the bridge work.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use libbinder::{
    Binder, BinderConfig, DeathCallback, Driver, HandlerError, LocalBinder, Parcel, ProcessState,
    RemoteHandle, FIRST_CALL_TRANSACTION,
};
use tracing_subscriber::EnvFilter;

const ADD: u32 = FIRST_CALL_TRANSACTION;
const GET: u32 = FIRST_CALL_TRANSACTION + 1;

struct CounterService {
    total: AtomicI64,
}

impl Binder for CounterService {
    fn descriptor(&self) -> &str {
        "demo.ICounter"
    }

    fn on_transact(
        &self,
        code: u32,
        data: &mut Parcel,
        reply: &mut Parcel,
        _flags: u32,
    ) -> Result<bool, HandlerError> {
        match code {
            ADD => {
                let v = data
                    .read_i64()
                    .map_err(|s| HandlerError::Exception(format!("bad ADD payload: {s}")))?;
                let total = self.total.fetch_add(v, Ordering::Relaxed) + v;
                reply.write_i64(total);
                Ok(true)
            }
            GET => {
                reply.write_i64(self.total.load(Ordering::Relaxed));
                reply.write_i32(libbinder::thread_state::calling_pid());
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

struct DeathPrinter {
    tx: Mutex<mpsc::Sender<RemoteHandle>>,
}

impl DeathCallback for DeathPrinter {
    fn binder_died(&self, who: RemoteHandle) {
        if let Ok(tx) = self.tx.lock() {
            let _ = tx.send(who);
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let calls: i64 = std::env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(10);

    let driver = Driver::new();
    let service = ProcessState::open(&driver, BinderConfig::from_env().with_uid(1000));
    let client = ProcessState::open(&driver, BinderConfig::from_env());
    println!("service pid {}, client pid {}", service.pid(), client.pid());

    let counter = LocalBinder::new(CounterService {
        total: AtomicI64::new(0),
    });
    service
        .become_context_manager(&counter)
        .expect("become context manager");

    let remote = client.context_object().expect("context object");
    println!(
        "resolved {:?} ({})",
        remote,
        remote.interface_descriptor().expect("descriptor")
    );

    for i in 1..=calls {
        let mut data = Parcel::new();
        data.write_i64(i);
        let mut reply = Parcel::new();
        client
            .invoke(&remote, ADD, &data, &mut reply, false)
            .expect("ADD");
        println!("add {i:>3} -> {}", reply.read_i64().expect("reply"));
    }

    let mut reply = Parcel::new();
    client
        .invoke(&remote, GET, &Parcel::new(), &mut reply, false)
        .expect("GET");
    let total = reply.read_i64().expect("total");
    let caller = reply.read_i32().expect("caller");
    println!("total {total}, seen from caller pid {caller}");

    let (tx, rx) = mpsc::channel();
    let watcher: Arc<dyn DeathCallback> = Arc::new(DeathPrinter { tx: Mutex::new(tx) });
    let link = client.watch_death(&remote, watcher).expect("watch_death");

    println!("killing service process {}", service.pid());
    service.kill();
    match rx.recv_timeout(Duration::from_secs(5)) {
        Ok(who) => println!("death notice for {who}"),
        Err(_) => println!("no death notice"),
    }
    println!("alive after kill: {}", remote.is_binder_alive());
    println!("unwatch after death: {:?}", client.unwatch_death(&link));
    match client.invoke(&remote, GET, &Parcel::new(), &mut Parcel::new(), false) {
        Ok(_) => println!("call after death unexpectedly succeeded"),
        Err(e) => println!("call after death: {e}"),
    }

    drop(link);
    drop(remote);
    client.run_finalizers();
    println!("client stats: {:?}", client.stats());
}
