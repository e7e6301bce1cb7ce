use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tracing::debug;

use crate::{api::ScopedStore, error::GatekeeperError};

#[derive(Debug, Clone)]
struct SecretObject {
    value: String,
    owner: String,
    permissions: HashSet<String>,
}

/// In-memory secret table shared by every request handler.
///
/// Each operation holds the table lock for its whole check-and-update. Nothing is persisted.
#[derive(Clone, Default)]
pub struct SecretStore {
    inner: Arc<Mutex<HashMap<String, SecretObject>>>,
}

impl SecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle acting with `token` on every call.
    pub fn scoped(&self, token: impl Into<String>) -> ScopedStore {
        ScopedStore::new(self.clone(), token.into())
    }

    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table().is_empty()
    }

    /// Read `item`; `caller` must be allowed to.
    pub fn get(&self, item: &str, caller: &str) -> Result<String, GatekeeperError> {
        let table = self.table();
        match table.get(item) {
            Some(obj) if obj.permissions.contains(caller) => Ok(obj.value.clone()),
            _ => Err(GatekeeperError::NotFoundOrDenied),
        }
    }

    /// Create `item` owned (and readable) by `owner`. Never overwrites.
    pub fn create(&self, item: &str, value: &str, owner: &str) -> Result<(), GatekeeperError> {
        let mut table = self.table();
        if table.contains_key(item) {
            return Err(GatekeeperError::PermissionDenied);
        }
        table.insert(
            item.to_string(),
            SecretObject {
                value: value.to_string(),
                owner: owner.to_string(),
                permissions: HashSet::from([owner.to_string()]),
            },
        );
        debug!(item, "object created");
        Ok(())
    }

    pub fn set(&self, item: &str, value: &str, caller: &str) -> Result<(), GatekeeperError> {
        let mut table = self.table();
        owned(&mut table, item, caller)?.value = value.to_string();
        debug!(item, "object updated");
        Ok(())
    }

    pub fn delete(&self, item: &str, caller: &str) -> Result<(), GatekeeperError> {
        let mut table = self.table();
        owned(&mut table, item, caller)?;
        table.remove(item);
        debug!(item, "object deleted");
        Ok(())
    }

    pub fn add_access(
        &self,
        item: &str,
        caller: &str,
        grantee: &str,
    ) -> Result<(), GatekeeperError> {
        let mut table = self.table();
        owned(&mut table, item, caller)?
            .permissions
            .insert(grantee.to_string());
        debug!(item, "access granted");
        Ok(())
    }

    pub fn remove_access(
        &self,
        item: &str,
        caller: &str,
        grantee: &str,
    ) -> Result<(), GatekeeperError> {
        let mut table = self.table();
        owned(&mut table, item, caller)?.permissions.remove(grantee);
        debug!(item, "access revoked");
        Ok(())
    }

    /// Hand `item` to `new_owner`, who also becomes a reader. The caller keeps any read access
    /// it had but loses control.
    pub fn switch_owner(
        &self,
        item: &str,
        caller: &str,
        new_owner: &str,
    ) -> Result<(), GatekeeperError> {
        let mut table = self.table();
        let obj = owned(&mut table, item, caller)?;
        obj.owner = new_owner.to_string();
        obj.permissions.insert(new_owner.to_string());
        debug!(item, "owner switched");
        Ok(())
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, SecretObject>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn owned<'a>(
    table: &'a mut HashMap<String, SecretObject>,
    item: &str,
    caller: &str,
) -> Result<&'a mut SecretObject, GatekeeperError> {
    match table.get_mut(item) {
        Some(obj) if obj.owner == caller => Ok(obj),
        _ => Err(GatekeeperError::PermissionDenied),
    }
}
