// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Tests for the surrogate cache: one surrogate per handle, the local
// shortcut, deferred finalization, and the proxy limits.

mod common;

use std::sync::Arc;
use std::thread;

use common::{open, open_default, Echo};
use libbinder::{BinderConfig, BinderError, BinderObject, Driver, LocalBinder, Parcel};

fn echo(descriptor: &'static str) -> Arc<LocalBinder> {
    LocalBinder::new(Echo::new(descriptor).0)
}

// ---------------------------------------------------------------------------
// Dedup
// ---------------------------------------------------------------------------

#[test]
fn resolve_remote_twice_same_surrogate() {
    let driver = Driver::new();
    let (server, _srt) = open_default(&driver);
    let (client, _crt) = open_default(&driver);
    let b = echo("test.Twice");

    let handle = server.publish_to(&b, client.pid()).expect("publish");
    let r1 = client.resolve_remote(handle).expect("resolve");
    // A second copy of the reference arrives.
    server.transfer(handle, client.pid()).expect("transfer");
    let r2 = client.resolve_remote(handle).expect("resolve");

    assert!(!r1.is_local());
    assert!(r1.ptr_eq(&r2));
    assert_eq!(client.proxy_object_count(), 1);
    assert_eq!(client.binder_proxy_count(), 1);
    assert_eq!(driver.ref_count(client.pid(), handle), 1);
    assert_eq!(r1.as_proxy().map(|p| p.handle()), Some(handle));
}

#[test]
fn concurrent_resolve_remote_one_surrogate() {
    let driver = Driver::new();
    let (server, _srt) = open_default(&driver);
    let (client, _crt) = open_default(&driver);
    let b = echo("test.Race");
    let handle = server.publish_to(&b, client.pid()).expect("publish");

    let objects: Vec<BinderObject> = thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|_| s.spawn(|| client.resolve_remote(handle).expect("resolve")))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    for o in &objects[1..] {
        assert!(objects[0].ptr_eq(o));
    }
    assert_eq!(client.proxy_object_count(), 1);
    assert_eq!(client.binder_proxy_count(), 1);
}

#[test]
fn own_handle_resolves_to_local_object() {
    let driver = Driver::new();
    let (server, _srt) = open_default(&driver);
    let (client, _crt) = open_default(&driver);
    let b = echo("test.Home");

    let handle = server.publish_to(&b, client.pid()).expect("publish");
    let remote = client.resolve_remote(handle).expect("resolve");
    assert!(!remote.is_local());

    // The reference comes back home: no surrogate, the handler itself.
    client.transfer(handle, server.pid()).expect("transfer");
    let home = server.resolve_remote(handle).expect("resolve");
    assert!(home.is_local());
    assert!(Arc::ptr_eq(home.as_local().expect("local"), &b));
    assert_eq!(server.proxy_object_count(), 0);
    assert_eq!(server.binder_proxy_count(), 0);
}

#[test]
fn unknown_handle_is_no_such_element() {
    let driver = Driver::new();
    let (server, _srt) = open_default(&driver);
    let (client, _crt) = open_default(&driver);
    let (other, _ort) = open_default(&driver);
    let b = echo("test.Private");

    let handle = server.publish_to(&b, client.pid()).expect("publish");
    // `other` was never handed the reference.
    let err = other.resolve_remote(handle).unwrap_err();
    assert!(matches!(err, BinderError::NoSuchElement(_)), "{err}");
    let err = other.transfer(handle, client.pid()).unwrap_err();
    assert_eq!(err, BinderError::Security);
}

// ---------------------------------------------------------------------------
// Finalization
// ---------------------------------------------------------------------------

#[test]
fn dropped_surrogate_finalized_and_reference_released() {
    let driver = Driver::new();
    let (server, _srt) = open_default(&driver);
    let (client, _crt) = open_default(&driver);
    let b = echo("test.Finalize");
    let _keep = server.resolve_local(&b).expect("resolve");

    let handle = server.publish_to(&b, client.pid()).expect("publish");
    let remote = client.resolve_remote(handle).expect("resolve");
    assert_eq!(client.proxy_object_count(), 1);
    assert_eq!(driver.ref_count(client.pid(), handle), 1);

    drop(remote);
    client.run_finalizers();
    assert_eq!(client.pending_finalizers(), 0);
    assert_eq!(client.proxy_object_count(), 0);
    assert_eq!(client.binder_proxy_count(), 0);
    assert_eq!(driver.ref_count(client.pid(), handle), 0);

    // The reference is gone; resolving needs a fresh transfer.
    let err = client.resolve_remote(handle).unwrap_err();
    assert!(matches!(err, BinderError::NoSuchElement(_)), "{err}");
    server.transfer(handle, client.pid()).expect("transfer");
    let again = client.resolve_remote(handle).expect("resolve");
    assert!(again.ping_binder());
}

#[test]
fn clones_keep_surrogate_alive() {
    let driver = Driver::new();
    let (server, _srt) = open_default(&driver);
    let (client, _crt) = open_default(&driver);
    let b = echo("test.Clone");

    let handle = server.publish_to(&b, client.pid()).expect("publish");
    let remote = client.resolve_remote(handle).expect("resolve");
    let copy = remote.clone();
    drop(remote);
    client.run_finalizers();
    assert_eq!(client.proxy_object_count(), 1);

    let mut reply = Parcel::new();
    assert!(client
        .invoke(&copy, 1, &Parcel::from_slice(b"hi"), &mut reply, false)
        .expect("invoke"));
    assert_eq!(reply.data(), b"hi");
}

// ---------------------------------------------------------------------------
// Limits
// ---------------------------------------------------------------------------

#[test]
fn proxy_map_limit_refuses_new_surrogates() {
    let driver = Driver::new();
    let (server, _srt) = open_default(&driver);
    let config = BinderConfig {
        proxy_map_limit: 2,
        ..BinderConfig::new()
    };
    let (client, _crt) = open(&driver, config);

    let binders: Vec<_> = (0..3).map(|_| echo("test.Limit")).collect();
    let handles: Vec<_> = binders
        .iter()
        .map(|b| server.publish_to(b, client.pid()).expect("publish"))
        .collect();

    let first = client.resolve_remote(handles[0]).expect("resolve");
    let _second = client.resolve_remote(handles[1]).expect("resolve");
    let err = client.resolve_remote(handles[2]).unwrap_err();
    assert_eq!(
        err,
        BinderError::Runtime("Binder ProxyMap has too many entries: 2".into())
    );
    assert_eq!(client.proxy_object_count(), 2);

    // Room frees up once a surrogate is collected.
    drop(first);
    client.run_finalizers();
    let handle = server.publish_to(&binders[2], client.pid()).expect("publish");
    let third = client.resolve_remote(handle).expect("resolve");
    assert!(third.ping_binder());
    assert_eq!(client.proxy_object_count(), 2);
}

#[test]
fn refused_surrogate_releases_reference_on_exiting_thread() {
    let driver = Driver::new();
    let (server, _srt) = open_default(&driver);
    let config = BinderConfig {
        proxy_map_limit: 1,
        ..BinderConfig::new()
    };
    let (client, _crt) = open(&driver, config);
    let a = echo("test.Kept");
    let b = echo("test.Refused");

    let ha = server.publish_to(&a, client.pid()).expect("publish");
    let hb = server.publish_to(&b, client.pid()).expect("publish");
    let _first = client.resolve_remote(ha).expect("resolve");

    let refused = thread::scope(|s| s.spawn(|| client.resolve_remote(hb)).join().unwrap());
    assert!(matches!(refused, Err(BinderError::Runtime(_))));

    // Nothing on this thread flushes; the reference must already be gone.
    assert_eq!(driver.ref_count(client.pid(), hb), 0);
    assert_eq!(driver.ref_count(client.pid(), ha), 1);
    assert_eq!(server.local_object_count(), 1);
}

#[test]
fn proxy_count_watermarks_fire_callback() {
    let driver = Driver::new();
    let (server, _srt) = open_default(&driver);
    let config = BinderConfig {
        proxy_count_watermarks: Some((3, 1)),
        ..BinderConfig::new().with_uid(10_123)
    };
    let (client, crt) = open(&driver, config);

    let binders: Vec<_> = (0..4).map(|_| echo("test.Watermark")).collect();
    let mut remotes = Vec::new();
    for b in &binders[..2] {
        let h = server.publish_to(b, client.pid()).expect("publish");
        remotes.push(client.resolve_remote(h).expect("resolve"));
    }
    assert!(crt.proxy_limits.lock().unwrap().is_empty());

    for b in &binders[2..] {
        let h = server.publish_to(b, client.pid()).expect("publish");
        remotes.push(client.resolve_remote(h).expect("resolve"));
    }
    // Fired once on reaching the high mark, not again above it.
    assert_eq!(*crt.proxy_limits.lock().unwrap(), vec![10_123]);
    assert_eq!(client.binder_proxy_count(), 4);

    // Dropping to the low mark re-arms it.
    remotes.truncate(1);
    client.run_finalizers();
    assert_eq!(client.binder_proxy_count(), 1);
    for b in &binders[1..3] {
        let h = server.publish_to(b, client.pid()).expect("publish");
        remotes.push(client.resolve_remote(h).expect("resolve"));
    }
    assert_eq!(*crt.proxy_limits.lock().unwrap(), vec![10_123, 10_123]);
}

#[test]
fn proxy_count_callback_disabled() {
    let driver = Driver::new();
    let (server, _srt) = open_default(&driver);
    let (client, crt) = open_default(&driver);
    client.set_binder_proxy_count_watermarks(1, 0);
    client.set_binder_proxy_count_enabled(false);

    let b = echo("test.Disabled");
    let h = server.publish_to(&b, client.pid()).expect("publish");
    let _remote = client.resolve_remote(h).expect("resolve");
    assert!(crt.proxy_limits.lock().unwrap().is_empty());

    client.set_binder_proxy_count_enabled(true);
    let b2 = echo("test.Enabled");
    let h2 = server.publish_to(&b2, client.pid()).expect("publish");
    let _remote2 = client.resolve_remote(h2).expect("resolve");
    assert_eq!(crt.proxy_limits.lock().unwrap().len(), 1);
}
