pub mod account;
pub mod api_key;
pub mod audit_event;
pub mod role;
pub mod session;

pub use account::{Account, AccountResponse, TwoFactorState};
pub use api_key::{ApiKey, ApiKeyInfo};
pub use audit_event::{AuditAction, AuditEvent, AuditQuery, AuditStatus, RequestContext};
pub use role::{Permission, Role, RoleWithPermissions};
pub use session::{Session, SessionInfo};
