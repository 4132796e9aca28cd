// ObjectSource - lazy enumeration of a job's target population

use crate::domain::{BlockItem, Filter, ObjectClass, ObjectRef, ObjectSelector};
use crate::error::{AppError, Result};
use crate::port::{IndexService, JobStore, ModelService, ObjectListing, Sorter, Sublist};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

/// Pull-based sequence of object references
#[async_trait]
pub trait ObjectCursor: Send {
    async fn next_item(&mut self) -> Result<Option<BlockItem>>;

    /// Release underlying resources; safe to call more than once
    async fn close(&mut self) -> Result<()>;
}

/// Enumeration over one of the supported selector kinds
pub enum ObjectSource {
    Empty,
    Index(IndexCursor),
    List(ListCursor),
    Listing(ListingCursor),
}

impl ObjectSource {
    /// Open the cursor for `selector`. Nothing is fetched until the first pull.
    pub async fn open(
        selector: &ObjectSelector,
        index: Arc<dyn IndexService>,
        model: Arc<dyn ModelService>,
        job_store: Arc<dyn JobStore>,
        page_size: usize,
    ) -> Result<Self> {
        if page_size == 0 {
            return Err(AppError::Validation("page size must be at least 1".to_string()));
        }

        let source = match selector {
            ObjectSelector::None => ObjectSource::Empty,
            ObjectSelector::Filter { class, filter } => ObjectSource::Index(IndexCursor {
                index,
                class: *class,
                filter: filter.clone(),
                page_size: page_size as u64,
                offset: 0,
                buffer: VecDeque::new(),
                exhausted: false,
            }),
            ObjectSelector::List { class, ids } => ObjectSource::List(ListCursor {
                model,
                job_store,
                class: *class,
                ids: ids.clone(),
                position: 0,
                page_size,
                buffer: VecDeque::new(),
            }),
            ObjectSelector::All { class: ObjectClass::Job } => {
                return Err(AppError::Validation(
                    "listing every job is not a valid job target".to_string(),
                ));
            }
            ObjectSelector::All { class } => {
                let listing = model.list_all(*class).await?;
                ObjectSource::Listing(ListingCursor {
                    listing,
                    closed: false,
                })
            }
        };
        Ok(source)
    }
}

#[async_trait]
impl ObjectCursor for ObjectSource {
    async fn next_item(&mut self) -> Result<Option<BlockItem>> {
        match self {
            ObjectSource::Empty => Ok(None),
            ObjectSource::Index(cursor) => cursor.next_item().await,
            ObjectSource::List(cursor) => cursor.next_item().await,
            ObjectSource::Listing(cursor) => cursor.next_item().await,
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self {
            ObjectSource::Listing(cursor) => cursor.close().await,
            _ => Ok(()),
        }
    }
}

/// Paged identifier search, sorted by id for stable pagination
pub struct IndexCursor {
    index: Arc<dyn IndexService>,
    class: ObjectClass,
    filter: Filter,
    page_size: u64,
    offset: u64,
    buffer: VecDeque<String>,
    exhausted: bool,
}

impl IndexCursor {
    async fn fill(&mut self) -> Result<()> {
        let page = self
            .index
            .find_ids(
                self.class,
                &self.filter,
                &Sorter::by_id_ascending(),
                Sublist::new(self.offset, self.page_size),
            )
            .await?;
        debug!(
            class = %self.class,
            offset = self.offset,
            fetched = page.ids.len(),
            total = page.total_count,
            "Fetched index page"
        );

        if page.ids.is_empty() {
            self.exhausted = true;
            return Ok(());
        }
        self.offset += page.ids.len() as u64;
        if self.offset >= page.total_count {
            self.exhausted = true;
        }
        self.buffer.extend(page.ids);
        Ok(())
    }
}

#[async_trait]
impl ObjectCursor for IndexCursor {
    async fn next_item(&mut self) -> Result<Option<BlockItem>> {
        if self.buffer.is_empty() && !self.exhausted {
            self.fill().await?;
        }
        Ok(self
            .buffer
            .pop_front()
            .map(|id| BlockItem::readable(ObjectRef::new(self.class, id))))
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Explicit id list, resolved in page-sized chunks
///
/// Job ids are resolved against the job store, everything else against the
/// model store.
pub struct ListCursor {
    model: Arc<dyn ModelService>,
    job_store: Arc<dyn JobStore>,
    class: ObjectClass,
    ids: Vec<String>,
    position: usize,
    page_size: usize,
    buffer: VecDeque<BlockItem>,
}

impl ListCursor {
    async fn fill(&mut self) -> Result<()> {
        let end = (self.position + self.page_size).min(self.ids.len());
        let chunk = &self.ids[self.position..end];

        let items = if self.class == ObjectClass::Job {
            let mut items = Vec::with_capacity(chunk.len());
            for id in chunk {
                let reference = ObjectRef::new(ObjectClass::Job, id.clone());
                let item = match self.job_store.find_by_id(id).await? {
                    Some(_) => BlockItem::readable(reference),
                    None => BlockItem::unreadable(reference, format!("job {} not found", id)),
                };
                items.push(item);
            }
            items
        } else {
            self.model.retrieve_lite(self.class, chunk).await?
        };

        self.position = end;
        self.buffer.extend(items);
        Ok(())
    }
}

#[async_trait]
impl ObjectCursor for ListCursor {
    async fn next_item(&mut self) -> Result<Option<BlockItem>> {
        if self.buffer.is_empty() && self.position < self.ids.len() {
            self.fill().await?;
        }
        Ok(self.buffer.pop_front())
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Streaming listing; closed on exhaustion or explicitly
pub struct ListingCursor {
    listing: Box<dyn ObjectListing>,
    closed: bool,
}

#[async_trait]
impl ObjectCursor for ListingCursor {
    async fn next_item(&mut self) -> Result<Option<BlockItem>> {
        if self.closed {
            return Ok(None);
        }
        let item = self.listing.next().await?;
        if item.is_none() {
            self.close().await?;
        }
        Ok(item)
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.listing.close().await
    }
}
