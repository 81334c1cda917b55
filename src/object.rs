// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// What a handle resolves to: a surrogate for a remote object, or the local
// handler itself when the handle points back into the resolving process.

use std::sync::Arc;

use crate::death::DeathCallback;
use crate::error::BinderError;
use crate::local::LocalBinder;
use crate::parcel::Parcel;
use crate::proxy::BinderProxy;

/// A transactable object reference.
#[derive(Clone)]
pub enum BinderObject {
    Proxy(Arc<BinderProxy>),
    Local(Arc<LocalBinder>),
}

impl BinderObject {
    pub fn transact(
        &self,
        code: u32,
        data: &Parcel,
        reply: &mut Parcel,
        flags: u32,
    ) -> Result<bool, BinderError> {
        match self {
            BinderObject::Proxy(p) => p.transact(code, data, reply, flags),
            BinderObject::Local(l) => l.transact(code, data, reply, flags),
        }
    }

    pub fn ping_binder(&self) -> bool {
        match self {
            BinderObject::Proxy(p) => p.ping_binder(),
            BinderObject::Local(_) => true,
        }
    }

    pub fn is_binder_alive(&self) -> bool {
        match self {
            BinderObject::Proxy(p) => p.is_binder_alive(),
            BinderObject::Local(_) => true,
        }
    }

    pub fn interface_descriptor(&self) -> Result<String, BinderError> {
        match self {
            BinderObject::Proxy(p) => p.interface_descriptor(),
            BinderObject::Local(l) => Ok(l.descriptor().to_owned()),
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, BinderObject::Local(_))
    }

    pub fn as_proxy(&self) -> Option<&Arc<BinderProxy>> {
        match self {
            BinderObject::Proxy(p) => Some(p),
            BinderObject::Local(_) => None,
        }
    }

    pub fn as_local(&self) -> Option<&Arc<LocalBinder>> {
        match self {
            BinderObject::Local(l) => Some(l),
            BinderObject::Proxy(_) => None,
        }
    }

    /// Identity comparison.
    pub fn ptr_eq(&self, other: &BinderObject) -> bool {
        match (self, other) {
            (BinderObject::Proxy(a), BinderObject::Proxy(b)) => Arc::ptr_eq(a, b),
            (BinderObject::Local(a), BinderObject::Local(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl std::fmt::Debug for BinderObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BinderObject::Proxy(p) => f.debug_tuple("Proxy").field(&p.handle()).finish(),
            BinderObject::Local(l) => f.debug_tuple("Local").field(&l.descriptor()).finish(),
        }
    }
}

/// A registration made by `watch_death`, passed back to `unwatch_death`.
#[derive(Clone)]
pub struct DeathLink {
    pub(crate) target: BinderObject,
    pub(crate) callback: Arc<dyn DeathCallback>,
}

impl std::fmt::Debug for DeathLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeathLink").field("target", &self.target).finish_non_exhaustive()
    }
}

impl DeathLink {
    pub fn target(&self) -> &BinderObject {
        &self.target
    }

    pub fn callback(&self) -> &Arc<dyn DeathCallback> {
        &self.callback
    }
}
