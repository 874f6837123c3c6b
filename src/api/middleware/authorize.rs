//! Per-route authorization gates.
//!
//! A route requires at most one gate. Stronger gates imply the weaker ones:
//! `Permission` checks activation first, and activation checks authentication first.

use axum::{
    extract::{Request, State},
    middleware::{from_fn_with_state, Next},
    response::{IntoResponse, Response},
    routing::MethodRouter,
};
use std::sync::Arc;

use crate::api::error::ApiError;
use crate::data::{PermissionRepository, Principal};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Gate {
    Authenticated,
    Activated,
    Permission(&'static str),
}

impl Gate {
    /// Run the gate chain for `principal`, loading permissions only when required.
    ///
    /// # Errors
    /// Returns the first failing gate's error, or `StoreFault` if permissions cannot be loaded.
    pub async fn check(
        &self,
        principal: &Principal,
        permissions: &dyn PermissionRepository,
    ) -> Result<(), ApiError> {
        if principal.is_anonymous() {
            return Err(ApiError::AuthenticationRequired);
        }
        if *self == Self::Authenticated {
            return Ok(());
        }

        if !principal.activated() {
            return Err(ApiError::AccountNotActivated);
        }
        let Self::Permission(code) = self else {
            return Ok(());
        };

        let held = permissions.permissions_for_user(principal.id()).await?;
        if held.includes(code) {
            Ok(())
        } else {
            Err(ApiError::NotPermitted)
        }
    }
}

#[derive(Clone)]
struct GateState {
    gate: Gate,
    permissions: Arc<dyn PermissionRepository>,
}

async fn enforce(State(state): State<GateState>, request: Request, next: Next) -> Response {
    let principal = request
        .extensions()
        .get::<Principal>()
        .cloned()
        .unwrap_or(Principal::Anonymous);
    match state.gate.check(&principal, state.permissions.as_ref()).await {
        Ok(()) => next.run(request).await,
        Err(err) => err.into_response(),
    }
}

/// Put `route` behind `gate`; the check runs only for requests that match the route.
pub fn gated<S>(
    gate: Gate,
    permissions: Arc<dyn PermissionRepository>,
    route: MethodRouter<S>,
) -> MethodRouter<S>
where
    S: Clone + Send + Sync + 'static,
{
    route.route_layer(from_fn_with_state(GateState { gate, permissions }, enforce))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{
        memory::MemoryStore, NewUser, Permissions, StoreError, User, UserRepository,
    };
    use async_trait::async_trait;

    async fn user(store: &MemoryStore, activated: bool, codes: &[&str]) -> Principal {
        let mut user = UserRepository::insert(
            store,
            &NewUser {
                name: "Alice".to_string(),
                email: "alice@example.com".to_string(),
                password_hash: String::new(),
            },
        )
        .await
        .unwrap();
        if activated {
            user.activated = true;
            user = UserRepository::update(store, &user).await.unwrap();
        }
        for code in codes {
            store.add_permission_for_user(user.id, code).await.unwrap();
        }
        Principal::User(user)
    }

    #[tokio::test]
    async fn anonymous_fails_every_gate_with_authentication_required() {
        let store = MemoryStore::new();
        for gate in [
            Gate::Authenticated,
            Gate::Activated,
            Gate::Permission("movies:read"),
        ] {
            let result = gate.check(&Principal::Anonymous, &store).await;
            assert!(matches!(result, Err(ApiError::AuthenticationRequired)));
        }
    }

    #[tokio::test]
    async fn unactivated_user_passes_only_authenticated_gate() {
        let store = MemoryStore::new();
        let principal = user(&store, false, &["movies:read"]).await;
        assert!(Gate::Authenticated.check(&principal, &store).await.is_ok());
        assert!(matches!(
            Gate::Activated.check(&principal, &store).await,
            Err(ApiError::AccountNotActivated)
        ));
        assert!(matches!(
            Gate::Permission("movies:read").check(&principal, &store).await,
            Err(ApiError::AccountNotActivated)
        ));
    }

    #[tokio::test]
    async fn permission_gate_checks_membership() {
        let store = MemoryStore::new();
        let principal = user(&store, true, &["movies:read"]).await;
        assert!(Gate::Activated.check(&principal, &store).await.is_ok());
        assert!(Gate::Permission("movies:read")
            .check(&principal, &store)
            .await
            .is_ok());
        assert!(matches!(
            Gate::Permission("movies:write").check(&principal, &store).await,
            Err(ApiError::NotPermitted)
        ));
    }

    struct BrokenPermissions;

    #[async_trait]
    impl PermissionRepository for BrokenPermissions {
        async fn permissions_for_user(&self, _user_id: i64) -> Result<Permissions, StoreError> {
            Err(StoreError::Timeout(std::time::Duration::from_secs(3)))
        }

        async fn add_permission_for_user(&self, _user_id: i64, _code: &str) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn permission_load_failure_is_reported() {
        let principal = Principal::User(User {
            id: 1,
            created_at: chrono::Utc::now(),
            name: "Alice".to_string(),
            email: "alice@example.com".to_string(),
            password_hash: String::new(),
            activated: true,
            version: 1,
        });
        let result = Gate::Permission("movies:read")
            .check(&principal, &BrokenPermissions)
            .await;
        assert!(matches!(result, Err(ApiError::StoreFault(_))));
    }
}
