//! Hard limits applied to every tenant. Requests beyond them fail with
//! `EngineError::LimitExceeded` instead of growing state without bound.

pub const MAX_RESOURCES_PER_TENANT: usize = 100_000;
pub const MAX_ENTRIES_PER_RESOURCE: usize = 50_000;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_REASON_LEN: usize = 1024;
pub const MAX_AUTHOR_LEN: usize = 256;
pub const MAX_BATCH_SIZE: usize = 1000;
/// Resources named in one availability query.
pub const MAX_IN_CLAUSE_IDS: usize = 32;

pub const MIN_VALID_YEAR: i32 = 2000;
pub const MAX_VALID_YEAR: i32 = 2100;

pub const MAX_TENANTS: usize = 256;
pub const MAX_TENANT_NAME_LEN: usize = 128;
