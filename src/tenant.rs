use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::info;

use crate::compactor;
use crate::engine::Engine;
use crate::limits::*;
use crate::notify::NotifyHub;

struct Tenant {
    engine: Arc<Engine>,
    hub: Arc<NotifyHub>,
}

/// Per-tenant engines. Each tenant (institution or campus) gets its own
/// engine, WAL, notification hub and compactor.
/// Tenant = database name from the pgwire connection.
pub struct TenantManager {
    tenants: DashMap<String, Tenant>,
    data_dir: PathBuf,
    compact_threshold: u64,
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64) -> Self {
        Self {
            tenants: DashMap::new(),
            data_dir,
            compact_threshold,
        }
    }

    /// Get or lazily create an engine for the given tenant.
    pub fn get_or_create(&self, tenant: &str) -> io::Result<Arc<Engine>> {
        if let Some(t) = self.tenants.get(tenant) {
            return Ok(t.engine.clone());
        }
        if tenant.len() > MAX_TENANT_NAME_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "tenant name too long",
            ));
        }
        if self.tenants.len() >= MAX_TENANTS {
            return Err(io::Error::other("too many tenants"));
        }

        // The name is the WAL file stem, so it must map to exactly one file,
        // case-insensitive filesystems included
        if tenant.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "empty tenant name",
            ));
        }
        if !tenant
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid tenant name {tenant:?}: use a-z, 0-9, '_' or '-'"),
            ));
        }

        let slot = match self.tenants.entry(tenant.to_string()) {
            Entry::Occupied(existing) => return Ok(existing.get().engine.clone()),
            Entry::Vacant(slot) => slot,
        };

        let wal_path = self.data_dir.join(format!("{tenant}.wal"));
        let hub = Arc::new(NotifyHub::new());
        let engine = Arc::new(Engine::new(wal_path, hub.clone())?);

        tokio::spawn(compactor::run_compactor(
            engine.clone(),
            self.compact_threshold,
        ));

        slot.insert(Tenant {
            engine: engine.clone(),
            hub,
        });
        info!("opened tenant {tenant}");
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.tenants.len() as f64);
        Ok(engine)
    }

    /// Notification hub of a loaded tenant, for in-process subscribers.
    pub fn notify_hub(&self, tenant: &str) -> Option<Arc<NotifyHub>> {
        self.tenants.get(tenant).map(|t| t.hub.clone())
    }

    pub fn tenant_count(&self) -> usize {
        self.tenants.len()
    }
}
