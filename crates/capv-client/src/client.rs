use crate::{ListParams, Result};
use async_trait::async_trait;
use capv_core::{ObjectKey, Resource};

/// Typed access to the resource store
#[async_trait]
pub trait Client: Send + Sync + 'static {
    /// Get one object; `NotFound` when absent
    async fn get<R: Resource>(&self, key: &ObjectKey) -> Result<R>;

    /// List objects of a kind matching `params`, ordered by namespace then name
    async fn list<R: Resource>(&self, params: &ListParams) -> Result<Vec<R>>;

    /// Create an object; `AlreadyExists` when the key is taken
    async fn create<R: Resource>(&self, resource: R) -> Result<R>;

    /// Replace metadata and spec. Status is kept from the stored object.
    /// A set resourceVersion must match the stored one, else `Conflict`.
    async fn update<R: Resource>(&self, resource: R) -> Result<R>;

    /// Replace only the status, with the same optimistic lock as `update`
    async fn update_status<R: Resource>(&self, resource: R) -> Result<R>;

    /// Delete an object, or mark it for deletion when it carries finalizers
    async fn delete<R: Resource>(&self, key: &ObjectKey) -> Result<()>;

    /// Get one object, mapping `NotFound` to `None`
    async fn get_opt<R: Resource>(&self, key: &ObjectKey) -> Result<Option<R>> {
        match self.get::<R>(key).await {
            Ok(resource) => Ok(Some(resource)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }
}
