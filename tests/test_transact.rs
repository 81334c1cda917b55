// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Tests for transactions across processes: replies, error translation,
// one-way ordering, calling identity, the context manager and the pool.

mod common;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread;
use std::time::Duration;

use common::{fn_binder, open, open_default, wait_until, Echo, WAIT};
use libbinder::{
    thread_state, BinderConfig, BinderError, BinderObject, Driver, HandlerError, LocalBinder,
    Parcel, FLAG_ONEWAY,
};

// ---------------------------------------------------------------------------
// Replies and errors
// ---------------------------------------------------------------------------

#[test]
fn sync_call_returns_reply() {
    let driver = Driver::new();
    let (server, _srt) = open_default(&driver);
    let (client, _crt) = open_default(&driver);
    let (handler, calls) = Echo::new("test.Echo");
    let b = LocalBinder::new(handler);

    let handle = server.publish_to(&b, client.pid()).expect("publish");
    let remote = client.resolve_remote(handle).expect("resolve");

    let data = Parcel::from_slice(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
    let mut reply = Parcel::new();
    let handled = client
        .invoke(&remote, 5, &data, &mut reply, false)
        .expect("invoke");
    assert!(handled);
    assert_eq!(reply.data(), data.data());

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].code, 5);
    assert_eq!(calls[0].size, 10);
    assert_eq!(calls[0].flags, 0);
}

#[test]
fn unknown_code_is_not_handled() {
    let driver = Driver::new();
    let (server, _srt) = open_default(&driver);
    let (client, _crt) = open_default(&driver);
    let b = LocalBinder::new(Echo::new("test.Unknown").0);

    let handle = server.publish_to(&b, client.pid()).expect("publish");
    let remote = client.resolve_remote(handle).expect("resolve");
    let mut reply = Parcel::new();
    let handled = client
        .invoke(&remote, 0x0fff_0000, &Parcel::new(), &mut reply, false)
        .expect("invoke");
    assert!(!handled);
}

#[test]
fn call_to_dead_process_is_dead_object() {
    let driver = Driver::new();
    let (server, _srt) = open_default(&driver);
    let (client, _crt) = open_default(&driver);
    let b = LocalBinder::new(Echo::new("test.Dead").0);

    let handle = server.publish_to(&b, client.pid()).expect("publish");
    let remote = client.resolve_remote(handle).expect("resolve");
    server.kill();

    let mut reply = Parcel::new();
    let err = client
        .invoke(&remote, 1, &Parcel::from_slice(b"x"), &mut reply, false)
        .unwrap_err();
    assert!(err.is_dead_object(), "{err}");
    let err = client
        .invoke(&remote, 1, &Parcel::new(), &mut reply, true)
        .unwrap_err();
    assert!(err.is_dead_object(), "{err}");
    let err = remote.interface_descriptor().unwrap_err();
    assert!(err.is_dead_object(), "{err}");
}

#[test]
fn buffer_exhaustion_by_parcel_size() {
    let driver = Driver::new();
    let config = BinderConfig {
        transaction_buffer_size: 1024,
        ..BinderConfig::new()
    };
    let (server, _srt) = open(&driver, config);
    let (client, _crt) = open_default(&driver);
    let b = LocalBinder::new(Echo::new("test.Buffer").0);

    let handle = server.publish_to(&b, client.pid()).expect("publish");
    let remote = client.resolve_remote(handle).expect("resolve");
    let mut reply = Parcel::new();

    let large = Parcel::from_vec(vec![0; 500 * 1024]);
    let err = client.invoke(&remote, 1, &large, &mut reply, false).unwrap_err();
    assert!(err.is_transaction_too_large(), "{err}");

    let small = Parcel::from_vec(vec![0; 2000]);
    let err = client.invoke(&remote, 1, &small, &mut reply, false).unwrap_err();
    assert_eq!(
        err,
        BinderError::DeadObject(
            "Transaction failed on small parcel; remote process probably died".into()
        )
    );

    // One-way calls get half the buffer.
    let half = Parcel::from_vec(vec![0; 600]);
    let err = client.invoke(&remote, 1, &half, &mut reply, true).unwrap_err();
    assert!(err.is_dead_object(), "{err}");
    assert!(client.invoke(&remote, 1, &half, &mut reply, false).expect("invoke"));
}

#[test]
fn server_killed_mid_call() {
    let driver = Driver::new();
    let (server, _srt) = open_default(&driver);
    let (client, _crt) = open_default(&driver);
    let entered = Arc::new(AtomicBool::new(false));
    let release = Arc::new(AtomicBool::new(false));
    let (e, r) = (Arc::clone(&entered), Arc::clone(&release));
    let b = fn_binder(move |_code: u32, _data: &mut Parcel, _reply: &mut Parcel| {
        e.store(true, Ordering::SeqCst);
        while !r.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(1));
        }
        Ok(true)
    });

    let handle = server.publish_to(&b, client.pid()).expect("publish");
    let remote = client.resolve_remote(handle).expect("resolve");

    let result = thread::scope(|s| {
        let call = s.spawn(|| {
            let mut reply = Parcel::new();
            client.invoke(&remote, 1, &Parcel::from_slice(b"ping"), &mut reply, false)
        });
        assert!(wait_until(WAIT, || entered.load(Ordering::SeqCst)));
        server.kill();
        let result = call.join().unwrap();
        release.store(true, Ordering::SeqCst);
        result
    });
    let err = result.unwrap_err();
    assert!(err.is_dead_object(), "{err}");
}

// ---------------------------------------------------------------------------
// One-way
// ---------------------------------------------------------------------------

#[test]
fn one_way_calls_run_in_order_per_object() {
    let driver = Driver::new();
    let config = BinderConfig {
        max_threads: 4,
        ..BinderConfig::new()
    };
    let (server, _srt) = open(&driver, config);
    let (client, _crt) = open_default(&driver);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    let b = fn_binder(move |_code: u32, data: &mut Parcel, _reply: &mut Parcel| {
        let n = data.read_u32().map_err(|s| HandlerError::Exception(s.to_string()))?;
        log.lock().unwrap().push(n);
        Ok(true)
    });

    let handle = server.publish_to(&b, client.pid()).expect("publish");
    let remote = client.resolve_remote(handle).expect("resolve");
    for n in 0..100u32 {
        let mut data = Parcel::new();
        data.write_u32(n);
        let mut reply = Parcel::new();
        assert!(client.invoke(&remote, 1, &data, &mut reply, true).expect("invoke"));
        assert!(reply.is_empty());
    }

    assert!(wait_until(WAIT, || seen.lock().unwrap().len() == 100));
    let seen = seen.lock().unwrap();
    assert_eq!(*seen, (0..100).collect::<Vec<u32>>());
}

#[test]
fn one_way_flag_reaches_handler() {
    let driver = Driver::new();
    let (server, _srt) = open_default(&driver);
    let (client, _crt) = open_default(&driver);
    let (handler, calls) = Echo::new("test.Flags");
    let b = LocalBinder::new(handler);

    let handle = server.publish_to(&b, client.pid()).expect("publish");
    let remote = client.resolve_remote(handle).expect("resolve");
    let mut reply = Parcel::new();
    client
        .invoke(&remote, 3, &Parcel::new(), &mut reply, true)
        .expect("invoke");
    assert!(wait_until(WAIT, || calls.lock().unwrap().len() == 1));
    assert_eq!(calls.lock().unwrap()[0].flags & FLAG_ONEWAY, FLAG_ONEWAY);
}

// ---------------------------------------------------------------------------
// Calling identity
// ---------------------------------------------------------------------------

#[test]
fn handler_sees_caller_identity() {
    let driver = Driver::new();
    let (server, _srt) = open_default(&driver);
    let (client, _crt) = open(&driver, BinderConfig::new().with_uid(10_042));
    let (handler, calls) = Echo::new("test.Identity");
    let b = LocalBinder::new(handler);

    let own_pid = thread_state::calling_pid();
    let handle = server.publish_to(&b, client.pid()).expect("publish");
    let remote = client.resolve_remote(handle).expect("resolve");
    let mut reply = Parcel::new();
    client
        .invoke(&remote, 1, &Parcel::new(), &mut reply, false)
        .expect("invoke");

    let calls = calls.lock().unwrap();
    assert_eq!(calls[0].calling_pid, client.pid());
    assert_eq!(calls[0].calling_uid, 10_042);
    // The calling thread's own view is unchanged.
    assert_eq!(thread_state::calling_pid(), own_pid);
}

#[test]
fn clear_and_restore_identity_in_handler() {
    let driver = Driver::new();
    let (server, _srt) = open(&driver, BinderConfig::new().with_uid(1_000));
    let (client, _crt) = open(&driver, BinderConfig::new().with_uid(10_077));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    let b = fn_binder(move |_code: u32, _data: &mut Parcel, _reply: &mut Parcel| {
        let token = thread_state::clear_calling_identity();
        log.lock().unwrap().push((thread_state::calling_pid(), thread_state::calling_uid()));
        thread_state::restore_calling_identity(token)
            .map_err(|e| HandlerError::Exception(e.to_string()))?;
        log.lock().unwrap().push((thread_state::calling_pid(), thread_state::calling_uid()));
        Ok(true)
    });

    let handle = server.publish_to(&b, client.pid()).expect("publish");
    let remote = client.resolve_remote(handle).expect("resolve");
    let mut reply = Parcel::new();
    assert!(client
        .invoke(&remote, 1, &Parcel::new(), &mut reply, false)
        .expect("invoke"));

    let seen = seen.lock().unwrap();
    assert_eq!(*seen, vec![(server.pid(), 1_000), (client.pid(), 10_077)]);
}

#[test]
fn restore_rejects_corrupt_token() {
    let token = (10_055i64 << 32) | 4321;
    thread_state::restore_calling_identity(token).expect("restore");
    assert_eq!(thread_state::calling_pid(), 4321);
    assert_eq!(thread_state::calling_uid(), 10_055);

    // No uid is ever allocated below 999; such a token is corrupt.
    let bad = (5i64 << 32) | 1234;
    let err = thread_state::restore_calling_identity(bad).unwrap_err();
    assert_eq!(
        err,
        BinderError::IllegalState(format!("Restoring bad calling ident: 0x{bad:x}"))
    );
    assert_eq!(thread_state::calling_pid(), 4321);

    assert_eq!(thread_state::clear_calling_identity(), token);
}

// ---------------------------------------------------------------------------
// Context manager
// ---------------------------------------------------------------------------

#[test]
fn context_manager_is_unique() {
    let driver = Driver::new();
    let (server, _srt) = open_default(&driver);
    let (rival, _rrt) = open_default(&driver);
    let (client, _crt) = open_default(&driver);

    let err = client.context_object().unwrap_err();
    assert!(matches!(err, BinderError::NoSuchElement(_)), "{err}");

    let b = LocalBinder::new(Echo::new("test.IServiceManager").0);
    server.become_context_manager(&b).expect("become");
    // Registering the same object again is harmless.
    server.become_context_manager(&b).expect("become again");

    let other = LocalBinder::new(Echo::new("test.Rival").0);
    let err = rival.become_context_manager(&other).unwrap_err();
    assert_eq!(err, BinderError::Runtime("Item already exists".into()));

    let ctx = client.context_object().expect("context");
    assert!(!ctx.is_local());
    assert_eq!(ctx.interface_descriptor().as_deref(), Ok("test.IServiceManager"));
    let mut reply = Parcel::new();
    assert!(client
        .invoke(&ctx, 9, &Parcel::from_slice(b"sm"), &mut reply, false)
        .expect("invoke"));
    assert_eq!(reply.data(), b"sm");

    let home = server.context_object().expect("context");
    assert!(home.is_local());

    // The slot frees up when its owner dies.
    server.kill();
    let err = client.context_object().unwrap_err();
    assert!(matches!(err, BinderError::NoSuchElement(_)), "{err}");
    rival.become_context_manager(&other).expect("become");
}

// ---------------------------------------------------------------------------
// Thread pool
// ---------------------------------------------------------------------------

#[test]
fn set_max_threads_rejects_zero() {
    let driver = Driver::new();
    let (server, _rt) = open_default(&driver);
    assert_eq!(server.set_max_threads(0), Err(BinderError::IllegalArgument));
    server.set_max_threads(2).expect("set");
}

#[test]
fn pool_bounded_by_max_threads() {
    let driver = Driver::new();
    let config = BinderConfig {
        max_threads: 2,
        ..BinderConfig::new()
    };
    let (server, _srt) = open(&driver, config);
    let (client, _crt) = open_default(&driver);
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (a, p) = (Arc::clone(&active), Arc::clone(&peak));
    let b = fn_binder(move |_code: u32, _data: &mut Parcel, _reply: &mut Parcel| {
        let now = a.fetch_add(1, Ordering::SeqCst) + 1;
        p.fetch_max(now, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(20));
        a.fetch_sub(1, Ordering::SeqCst);
        Ok(true)
    });

    let handle = server.publish_to(&b, client.pid()).expect("publish");
    let remote = client.resolve_remote(handle).expect("resolve");
    thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| {
                let mut reply = Parcel::new();
                assert!(client
                    .invoke(&remote, 1, &Parcel::new(), &mut reply, false)
                    .expect("invoke"));
            });
        }
    });

    assert!(peak.load(Ordering::SeqCst) <= 2);
    assert!(server.thread_count() <= 2);
    assert!(server.thread_count() >= 1);
    server.block_until_thread_available();
}

#[test]
fn nested_callback_runs_on_caller_pool() {
    let driver = Driver::new();
    let (server, _srt) = open_default(&driver);
    let config = BinderConfig {
        max_threads: 1,
        ..BinderConfig::new()
    };
    let (client, _crt) = open(&driver, config);

    let pong = fn_binder(|_code: u32, _data: &mut Parcel, reply: &mut Parcel| {
        reply.write_string("pong");
        Ok(true)
    });
    let callback: Arc<OnceLock<BinderObject>> = Arc::new(OnceLock::new());
    let cb = Arc::clone(&callback);
    let relay = fn_binder(move |code: u32, data: &mut Parcel, reply: &mut Parcel| {
        cb.get()
            .expect("callback set")
            .transact(code, data, reply, 0)
            .map_err(|e| HandlerError::Exception(e.to_string()))
    });

    let cb_handle = client.publish_to(&pong, server.pid()).expect("publish");
    let _ = callback.set(server.resolve_remote(cb_handle).expect("resolve"));
    let relay_handle = server.publish_to(&relay, client.pid()).expect("publish");
    let remote = client.resolve_remote(relay_handle).expect("resolve");

    // The client thread waits on the relay while the client's only pool
    // thread serves the call back.
    let mut reply = Parcel::new();
    assert!(client
        .invoke(&remote, 3, &Parcel::new(), &mut reply, false)
        .expect("invoke"));
    assert_eq!(reply.read_string().expect("string"), "pong");
    assert_eq!(client.thread_count(), 1);
}

#[test]
fn dropped_process_leaves_driver() {
    let driver = Driver::new();
    let (a, _art) = open_default(&driver);
    {
        let (b, _brt) = open_default(&driver);
        assert_ne!(a.pid(), b.pid());
        assert_eq!(driver.process_count(), 2);
    }
    assert_eq!(driver.process_count(), 1);
    assert!(a.is_alive());
    a.kill();
    assert!(!a.is_alive());
    assert_eq!(driver.process_count(), 0);
}
