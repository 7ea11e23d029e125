//! Permission resolution through account → role → permission links, plus
//! role and permission administration.

use chrono::Utc;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{
    AuditAction, AuditEvent, AuditStatus, Permission, RequestContext, Role, RoleWithPermissions,
};
use crate::repository::{AccountRepository, RbacRepository, StoreError};
use crate::services::audit::AuditRecorder;
use crate::services::error::{ServiceError, ServiceResult};

pub const ADMINISTRATOR_ROLE: &str = "Administrator";
pub const USER_MANAGER_ROLE: &str = "User Manager";
pub const USER_ROLE: &str = "User";

/// Default permission catalog as (resource, action, description).
const PERMISSION_CATALOG: &[(&str, &str, &str)] = &[
    ("users", "create", "Create user accounts"),
    ("users", "read", "View user accounts"),
    ("users", "update", "Modify user accounts"),
    ("users", "delete", "Delete user accounts"),
    ("roles", "create", "Create roles and assign them"),
    ("roles", "read", "View roles"),
    ("roles", "update", "Modify roles"),
    ("roles", "delete", "Delete roles"),
    ("permissions", "create", "Create permissions"),
    ("permissions", "read", "View permissions"),
    ("permissions", "delete", "Delete permissions"),
    ("system", "admin", "Administer sessions and maintenance"),
    ("audit", "read", "Read the audit trail"),
];

/// Seed roles as (name, description, permission names). `None` grants the
/// whole catalog.
const ROLE_CATALOG: &[(&str, &str, Option<&[&str]>)] = &[
    (ADMINISTRATOR_ROLE, "Full system access", None),
    (
        USER_MANAGER_ROLE,
        "Manages users and roles",
        Some(&[
            "users.create",
            "users.read",
            "users.update",
            "roles.create",
            "roles.read",
            "roles.update",
        ]),
    ),
    (USER_ROLE, "Read-only access to users", Some(&["users.read"])),
];

/// What an endpoint requires of its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    Permission(&'static str),
    Role(&'static str),
}

impl std::fmt::Display for Requirement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Requirement::Permission(p) => write!(f, "permission '{}'", p),
            Requirement::Role(r) => write!(f, "role '{}'", r),
        }
    }
}

/// Changes to apply to a role; `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct RoleUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub permission_ids: Option<Vec<Uuid>>,
}

#[derive(Clone)]
pub struct PermissionService {
    rbac: Arc<dyn RbacRepository>,
    accounts: Arc<dyn AccountRepository>,
    audit: AuditRecorder,
}

impl PermissionService {
    pub fn new(
        rbac: Arc<dyn RbacRepository>,
        accounts: Arc<dyn AccountRepository>,
        audit: AuditRecorder,
    ) -> Self {
        Self {
            rbac,
            accounts,
            audit,
        }
    }

    // ==================== Resolution ====================

    /// Union of permissions across every role the account holds.
    pub async fn effective_permissions(&self, account_id: Uuid) -> ServiceResult<Vec<Permission>> {
        Ok(self.rbac.account_permissions(account_id).await?)
    }

    pub async fn effective_permission_names(&self, account_id: Uuid) -> ServiceResult<BTreeSet<String>> {
        Ok(self
            .effective_permissions(account_id)
            .await?
            .into_iter()
            .map(|p| p.name)
            .collect())
    }

    pub async fn has_permission(&self, account_id: Uuid, permission: &str) -> ServiceResult<bool> {
        Ok(self
            .effective_permissions(account_id)
            .await?
            .iter()
            .any(|p| p.name == permission))
    }

    pub async fn has_role(&self, account_id: Uuid, role_name: &str) -> ServiceResult<bool> {
        Ok(self
            .rbac
            .account_roles(account_id)
            .await?
            .iter()
            .any(|r| r.name == role_name))
    }

    pub async fn account_roles(&self, account_id: Uuid) -> ServiceResult<Vec<Role>> {
        Ok(self.rbac.account_roles(account_id).await?)
    }

    /// Evaluated against current assignments on every call.
    pub async fn satisfies(&self, account_id: Uuid, requirement: Requirement) -> ServiceResult<bool> {
        match requirement {
            Requirement::Permission(name) => self.has_permission(account_id, name).await,
            Requirement::Role(name) => self.has_role(account_id, name).await,
        }
    }

    // ==================== Permission Administration ====================

    pub async fn list_permissions(&self) -> ServiceResult<Vec<Permission>> {
        Ok(self.rbac.list_permissions().await?)
    }

    pub async fn create_permission(
        &self,
        resource: &str,
        action: &str,
        description: Option<String>,
        ctx: &RequestContext,
        actor: Uuid,
    ) -> ServiceResult<Permission> {
        let permission = Permission::new(resource, action, description);

        if self
            .rbac
            .find_permission_by_name(&permission.name)
            .await?
            .is_some()
        {
            return Err(ServiceError::Conflict(format!(
                "Permission '{}' already exists",
                permission.name
            )));
        }
        self.rbac.insert_permission(&permission).await?;

        self.audit
            .record(
                AuditEvent::new(AuditAction::PermissionCreated, AuditStatus::Success, ctx)
                    .account(actor)
                    .resource("permission", permission.id)
                    .details(json!({ "name": permission.name })),
            )
            .await;

        Ok(permission)
    }

    pub async fn delete_permission(
        &self,
        id: Uuid,
        ctx: &RequestContext,
        actor: Uuid,
    ) -> ServiceResult<()> {
        let permission = self
            .rbac
            .find_permission_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Permission not found".to_string()))?;

        self.rbac.delete_permission(id).await?;

        self.audit
            .record(
                AuditEvent::new(AuditAction::PermissionDeleted, AuditStatus::Success, ctx)
                    .account(actor)
                    .resource("permission", id)
                    .details(json!({ "name": permission.name })),
            )
            .await;

        Ok(())
    }

    // ==================== Role Administration ====================

    pub async fn get_role(&self, id: Uuid) -> ServiceResult<RoleWithPermissions> {
        let role = self.find_role(id).await?;
        let permissions = self.rbac.role_permissions(id).await?;
        Ok(RoleWithPermissions { role, permissions })
    }

    pub async fn list_roles(&self) -> ServiceResult<Vec<RoleWithPermissions>> {
        let mut roles = Vec::new();
        for role in self.rbac.list_roles().await? {
            let permissions = self.rbac.role_permissions(role.id).await?;
            roles.push(RoleWithPermissions { role, permissions });
        }
        Ok(roles)
    }

    pub async fn create_role(
        &self,
        name: String,
        description: Option<String>,
        permission_ids: &[Uuid],
        ctx: &RequestContext,
        actor: Uuid,
    ) -> ServiceResult<RoleWithPermissions> {
        if self.rbac.find_role_by_name(&name).await?.is_some() {
            return Err(ServiceError::Conflict(format!("Role '{}' already exists", name)));
        }
        self.ensure_permissions_exist(permission_ids).await?;

        let role = Role::new(name, description, false);
        self.rbac.insert_role(&role).await?;
        self.rbac.set_role_permissions(role.id, permission_ids).await?;

        self.audit
            .record(
                AuditEvent::new(AuditAction::RoleCreated, AuditStatus::Success, ctx)
                    .account(actor)
                    .resource("role", role.id)
                    .details(json!({ "name": role.name, "permission_ids": permission_ids })),
            )
            .await;

        self.get_role(role.id).await
    }

    pub async fn update_role(
        &self,
        id: Uuid,
        update: RoleUpdate,
        ctx: &RequestContext,
        actor: Uuid,
    ) -> ServiceResult<RoleWithPermissions> {
        let mut role = self.find_role(id).await?;
        if role.is_system {
            return Err(ServiceError::Forbidden(
                "System roles cannot be modified".to_string(),
            ));
        }

        if let Some(name) = update.name {
            if name != role.name {
                if self.rbac.find_role_by_name(&name).await?.is_some() {
                    return Err(ServiceError::Conflict(format!(
                        "Role '{}' already exists",
                        name
                    )));
                }
                role.name = name;
            }
        }
        if let Some(description) = update.description {
            role.description = Some(description);
        }
        if let Some(ids) = &update.permission_ids {
            self.ensure_permissions_exist(ids).await?;
        }

        role.updated_at = Utc::now();
        self.rbac.update_role(&role).await?;
        if let Some(ids) = &update.permission_ids {
            self.rbac.set_role_permissions(id, ids).await?;
        }

        self.audit
            .record(
                AuditEvent::new(AuditAction::RoleUpdated, AuditStatus::Success, ctx)
                    .account(actor)
                    .resource("role", id)
                    .details(json!({ "name": role.name })),
            )
            .await;

        self.get_role(id).await
    }

    pub async fn delete_role(&self, id: Uuid, ctx: &RequestContext, actor: Uuid) -> ServiceResult<()> {
        let role = self.find_role(id).await?;
        if role.is_system {
            return Err(ServiceError::Forbidden(
                "System roles cannot be deleted".to_string(),
            ));
        }

        let members = self.rbac.count_role_members(id).await?;
        if members > 0 {
            return Err(ServiceError::Conflict(format!(
                "Role is assigned to {} account(s)",
                members
            )));
        }

        self.rbac.delete_role(id).await?;

        self.audit
            .record(
                AuditEvent::new(AuditAction::RoleDeleted, AuditStatus::Success, ctx)
                    .account(actor)
                    .resource("role", id)
                    .details(json!({ "name": role.name })),
            )
            .await;

        Ok(())
    }

    /// Idempotent; returns whether the assignment is new.
    pub async fn assign_role(
        &self,
        account_id: Uuid,
        role_id: Uuid,
        ctx: &RequestContext,
        actor: Uuid,
    ) -> ServiceResult<bool> {
        self.ensure_account_exists(account_id).await?;
        let role = self.find_role(role_id).await?;

        let created = self.rbac.assign_role(account_id, role_id).await?;
        if created {
            self.audit
                .record(
                    AuditEvent::new(AuditAction::RoleAssigned, AuditStatus::Success, ctx)
                        .account(actor)
                        .resource("account", account_id)
                        .details(json!({ "role_id": role_id, "role": role.name })),
                )
                .await;
        }
        Ok(created)
    }

    /// Idempotent; returns whether an assignment was removed.
    pub async fn remove_role(
        &self,
        account_id: Uuid,
        role_id: Uuid,
        ctx: &RequestContext,
        actor: Uuid,
    ) -> ServiceResult<bool> {
        self.ensure_account_exists(account_id).await?;
        let role = self.find_role(role_id).await?;

        let removed = self.rbac.remove_role(account_id, role_id).await?;
        if removed {
            self.audit
                .record(
                    AuditEvent::new(AuditAction::RoleRemoved, AuditStatus::Success, ctx)
                        .account(actor)
                        .resource("account", account_id)
                        .details(json!({ "role_id": role_id, "role": role.name })),
                )
                .await;
        }
        Ok(removed)
    }

    // ==================== Bootstrap ====================

    /// Creates the default permission catalog and system roles. Safe to run
    /// on every start: everything is matched by unique name first.
    pub async fn seed_defaults(&self) -> ServiceResult<()> {
        let mut catalog = Vec::with_capacity(PERMISSION_CATALOG.len());
        for (resource, action, description) in PERMISSION_CATALOG {
            let name = Permission::canonical_name(resource, action);
            let permission = match self.rbac.find_permission_by_name(&name).await? {
                Some(existing) => existing,
                None => {
                    let permission =
                        Permission::new(resource, action, Some(description.to_string()));
                    match self.rbac.insert_permission(&permission).await {
                        Ok(()) => permission,
                        // Another instance seeded it first.
                        Err(StoreError::Duplicate(_)) => self
                            .rbac
                            .find_permission_by_name(&name)
                            .await?
                            .ok_or_else(|| ServiceError::NotFound(name.clone()))?,
                        Err(e) => return Err(e.into()),
                    }
                }
            };
            catalog.push(permission);
        }

        for (name, description, grants) in ROLE_CATALOG {
            let role = match self.rbac.find_role_by_name(name).await? {
                Some(existing) => existing,
                None => {
                    let role = Role::new(name.to_string(), Some(description.to_string()), true);
                    match self.rbac.insert_role(&role).await {
                        Ok(()) => role,
                        Err(StoreError::Duplicate(_)) => self
                            .rbac
                            .find_role_by_name(name)
                            .await?
                            .ok_or_else(|| ServiceError::NotFound(name.to_string()))?,
                        Err(e) => return Err(e.into()),
                    }
                }
            };

            if !role.is_system {
                tracing::warn!(role = %name, "Seed role exists but is not system-protected; leaving it untouched");
                continue;
            }

            let ids: Vec<Uuid> = catalog
                .iter()
                .filter(|p| grants.is_none_or(|g| g.contains(&p.name.as_str())))
                .map(|p| p.id)
                .collect();
            self.rbac.set_role_permissions(role.id, &ids).await?;
        }

        tracing::info!(
            permissions = catalog.len(),
            roles = ROLE_CATALOG.len(),
            "Default roles and permissions seeded"
        );
        Ok(())
    }

    async fn find_role(&self, id: Uuid) -> ServiceResult<Role> {
        self.rbac
            .find_role_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Role not found".to_string()))
    }

    pub async fn find_role_by_name(&self, name: &str) -> ServiceResult<Role> {
        self.rbac
            .find_role_by_name(name)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Role '{}' not found", name)))
    }

    async fn ensure_account_exists(&self, account_id: Uuid) -> ServiceResult<()> {
        self.accounts
            .find_account_by_id(account_id)
            .await?
            .map(|_| ())
            .ok_or_else(|| ServiceError::NotFound("User not found".to_string()))
    }

    async fn ensure_permissions_exist(&self, ids: &[Uuid]) -> ServiceResult<()> {
        for id in ids {
            if self.rbac.find_permission_by_id(*id).await?.is_none() {
                return Err(ServiceError::NotFound(format!("Permission {} not found", id)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Account;
    use crate::repository::MemoryStore;

    async fn setup() -> (Arc<MemoryStore>, PermissionService, Uuid) {
        let store = Arc::new(MemoryStore::new());
        let service = PermissionService::new(
            store.clone(),
            store.clone(),
            AuditRecorder::new(store.clone()),
        );
        service.seed_defaults().await.expect("seed");

        let account = Account::new(
            "bob@example.com".to_string(),
            None,
            "Bob".to_string(),
            "hash".to_string(),
        );
        store.insert_account(&account).await.expect("insert");
        (store, service, account.id)
    }

    #[tokio::test]
    async fn seeding_twice_creates_no_duplicates() -> Result<(), anyhow::Error> {
        let (store, service, _) = setup().await;
        service.seed_defaults().await?;

        assert_eq!(store.list_permissions().await?.len(), PERMISSION_CATALOG.len());
        assert_eq!(store.list_roles().await?.len(), 3);

        let admin = service.find_role_by_name(ADMINISTRATOR_ROLE).await?;
        assert!(admin.is_system);
        assert_eq!(
            store.role_permissions(admin.id).await?.len(),
            PERMISSION_CATALOG.len()
        );
        Ok(())
    }

    #[tokio::test]
    async fn effective_permissions_are_the_union_of_roles() -> Result<(), anyhow::Error> {
        let (_, service, account) = setup().await;
        let ctx = RequestContext::default();
        let user = service.find_role_by_name(USER_ROLE).await?;
        let manager = service.find_role_by_name(USER_MANAGER_ROLE).await?;

        assert!(!service.has_permission(account, "users.read").await?);

        service.assign_role(account, user.id, &ctx, account).await?;
        service.assign_role(account, manager.id, &ctx, account).await?;

        let names = service.effective_permission_names(account).await?;
        assert_eq!(names.len(), 6);
        assert!(names.contains("users.read"));
        assert!(names.contains("roles.update"));
        assert!(!names.contains("users.delete"));

        // users.read is still granted by User Manager.
        service.remove_role(account, user.id, &ctx, account).await?;
        assert!(service.has_permission(account, "users.read").await?);
        assert!(service.has_role(account, USER_MANAGER_ROLE).await?);
        assert!(!service.has_role(account, USER_ROLE).await?);
        Ok(())
    }

    #[tokio::test]
    async fn assignment_is_idempotent() -> Result<(), anyhow::Error> {
        let (_, service, account) = setup().await;
        let ctx = RequestContext::default();
        let user = service.find_role_by_name(USER_ROLE).await?;

        assert!(service.assign_role(account, user.id, &ctx, account).await?);
        assert!(!service.assign_role(account, user.id, &ctx, account).await?);
        Ok(())
    }

    #[tokio::test]
    async fn system_roles_are_immutable() -> Result<(), anyhow::Error> {
        let (_, service, account) = setup().await;
        let ctx = RequestContext::default();
        let admin = service.find_role_by_name(ADMINISTRATOR_ROLE).await?;

        let err = service.delete_role(admin.id, &ctx, account).await.unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));

        let err = service
            .update_role(
                admin.id,
                RoleUpdate {
                    name: Some("Root".to_string()),
                    ..Default::default()
                },
                &ctx,
                account,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));
        Ok(())
    }

    #[tokio::test]
    async fn role_in_use_cannot_be_deleted() -> Result<(), anyhow::Error> {
        let (_, service, account) = setup().await;
        let ctx = RequestContext::default();
        let read = service
            .list_permissions()
            .await?
            .into_iter()
            .find(|p| p.name == "audit.read")
            .expect("seeded");

        let auditors = service
            .create_role("Auditor".to_string(), None, &[read.id], &ctx, account)
            .await?;
        assert_eq!(auditors.permissions.len(), 1);

        service.assign_role(account, auditors.role.id, &ctx, account).await?;
        let err = service
            .delete_role(auditors.role.id, &ctx, account)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));

        service.remove_role(account, auditors.role.id, &ctx, account).await?;
        service.delete_role(auditors.role.id, &ctx, account).await?;
        Ok(())
    }

    #[tokio::test]
    async fn unknown_permission_id_rejected_on_create() {
        let (_, service, account) = setup().await;
        let err = service
            .create_role(
                "Broken".to_string(),
                None,
                &[Uuid::new_v4()],
                &RequestContext::default(),
                account,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn duplicate_permission_is_a_conflict() {
        let (_, service, account) = setup().await;
        let err = service
            .create_permission("users", "read", None, &RequestContext::default(), account)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
    }
}
