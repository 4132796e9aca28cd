// Model Store Port (Interface)

use crate::domain::{BlockItem, ObjectClass};
use crate::error::Result;
use async_trait::async_trait;

/// Streaming "all objects of a class" cursor
///
/// Callers must call `close` once done, whether or not the listing was
/// exhausted.
#[async_trait]
pub trait ObjectListing: Send {
    /// Next object, `None` once exhausted
    async fn next(&mut self) -> Result<Option<BlockItem>>;

    /// Release the underlying resources. Closing twice is allowed.
    async fn close(&mut self) -> Result<()>;
}

/// Model collaborator: bulk lookups and streaming listings
#[async_trait]
pub trait ModelService: Send + Sync {
    /// Fetch lightweight projections for `ids`, preserving order
    ///
    /// Ids that cannot be read come back as unreadable items carrying the
    /// cause instead of failing the whole call.
    async fn retrieve_lite(&self, class: ObjectClass, ids: &[String]) -> Result<Vec<BlockItem>>;

    /// Open a listing over every object of `class`
    async fn list_all(&self, class: ObjectClass) -> Result<Box<dyn ObjectListing>>;
}
