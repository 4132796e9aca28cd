// Index/Search Port (Interface)

use crate::domain::{Filter, ObjectClass};
use crate::error::Result;
use async_trait::async_trait;

/// Sort key for paged queries
///
/// Stable pagination needs a total order, so the engine always sorts by id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sorter {
    pub field: String,
    pub ascending: bool,
}

impl Sorter {
    pub fn by_id_ascending() -> Self {
        Self {
            field: "id".to_string(),
            ascending: true,
        }
    }
}

/// Page window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sublist {
    pub offset: u64,
    pub limit: u64,
}

impl Sublist {
    pub fn new(offset: u64, limit: u64) -> Self {
        Self { offset, limit }
    }
}

/// Identifier-level projection of one result page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexPage {
    pub ids: Vec<String>,
    pub offset: u64,
    pub total_count: u64,
}

/// Search collaborator used to enumerate filtered populations
#[async_trait]
pub trait IndexService: Send + Sync {
    /// Return one page of matching identifiers plus the total hit count
    async fn find_ids(
        &self,
        class: ObjectClass,
        filter: &Filter,
        sorter: &Sorter,
        sublist: Sublist,
    ) -> Result<IndexPage>;

    /// Count matching objects
    async fn count(&self, class: ObjectClass, filter: &Filter) -> Result<u64> {
        let page = self
            .find_ids(class, filter, &Sorter::by_id_ascending(), Sublist::new(0, 0))
            .await?;
        Ok(page.total_count)
    }
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::domain::{BlockItem, ObjectRef};
    use crate::error::AppError;
    use crate::port::model::{ModelService, ObjectListing};
    use std::collections::{BTreeMap, HashSet, VecDeque};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone)]
    pub struct CatalogObject {
        pub class: ObjectClass,
        pub id: String,
        pub fields: BTreeMap<String, String>,
    }

    /// In-memory index + model store
    #[derive(Default)]
    pub struct InMemoryCatalog {
        objects: Mutex<Vec<CatalogObject>>,
        unreadable: Mutex<HashSet<String>>,
        fail_enumeration: AtomicBool,
        page_requests: Mutex<Vec<Sublist>>,
        retrieve_chunks: Mutex<Vec<usize>>,
        listings_opened: Arc<AtomicUsize>,
        listings_closed: Arc<AtomicUsize>,
    }

    impl InMemoryCatalog {
        pub fn new() -> Self {
            Self::default()
        }

        /// Catalog with `count` objects of `class`, ids `obj-00001`...
        pub fn with_objects(class: ObjectClass, count: usize) -> Self {
            let catalog = Self::new();
            for id in Self::object_ids(count) {
                catalog.insert(class, id, BTreeMap::new());
            }
            catalog
        }

        /// Ids generated by `with_objects`, in enumeration order
        pub fn object_ids(count: usize) -> Vec<String> {
            (1..=count).map(|i| format!("obj-{:05}", i)).collect()
        }

        pub fn insert(&self, class: ObjectClass, id: impl Into<String>, fields: BTreeMap<String, String>) {
            self.objects.lock().unwrap().push(CatalogObject {
                class,
                id: id.into(),
                fields,
            });
        }

        pub fn mark_unreadable(&self, id: impl Into<String>) {
            self.unreadable.lock().unwrap().insert(id.into());
        }

        /// Make every subsequent enumeration call fail
        pub fn fail_enumeration(&self) {
            self.fail_enumeration.store(true, Ordering::SeqCst);
        }

        pub fn page_requests(&self) -> Vec<Sublist> {
            self.page_requests.lock().unwrap().clone()
        }

        pub fn retrieve_chunks(&self) -> Vec<usize> {
            self.retrieve_chunks.lock().unwrap().clone()
        }

        pub fn listings_opened(&self) -> usize {
            self.listings_opened.load(Ordering::SeqCst)
        }

        pub fn listings_closed(&self) -> usize {
            self.listings_closed.load(Ordering::SeqCst)
        }

        fn check_enumeration(&self) -> Result<()> {
            if self.fail_enumeration.load(Ordering::SeqCst) {
                return Err(AppError::Enumeration("catalog unavailable".to_string()));
            }
            Ok(())
        }

        fn sorted_ids(&self, class: ObjectClass, filter: &Filter) -> Vec<String> {
            let mut ids: Vec<String> = self
                .objects
                .lock()
                .unwrap()
                .iter()
                .filter(|o| o.class == class)
                .filter(|o| {
                    filter.matches(|field| match field {
                        "id" => Some(o.id.clone()),
                        other => o.fields.get(other).cloned(),
                    })
                })
                .map(|o| o.id.clone())
                .collect();
            ids.sort();
            ids
        }

        fn item_for(&self, class: ObjectClass, id: &str, known: bool) -> BlockItem {
            let reference = ObjectRef::new(class, id);
            if self.unreadable.lock().unwrap().contains(id) {
                BlockItem::unreadable(reference, "object is unreadable")
            } else if !known {
                BlockItem::unreadable(reference, format!("{} {} not found", class, id))
            } else {
                BlockItem::readable(reference)
            }
        }
    }

    #[async_trait]
    impl IndexService for InMemoryCatalog {
        async fn find_ids(
            &self,
            class: ObjectClass,
            filter: &Filter,
            sorter: &Sorter,
            sublist: Sublist,
        ) -> Result<IndexPage> {
            self.check_enumeration()?;
            self.page_requests.lock().unwrap().push(sublist);

            let mut ids = self.sorted_ids(class, filter);
            if !sorter.ascending {
                ids.reverse();
            }
            let total_count = ids.len() as u64;
            let page = ids
                .into_iter()
                .skip(sublist.offset as usize)
                .take(sublist.limit as usize)
                .collect();

            Ok(IndexPage {
                ids: page,
                offset: sublist.offset,
                total_count,
            })
        }
    }

    #[async_trait]
    impl ModelService for InMemoryCatalog {
        async fn retrieve_lite(&self, class: ObjectClass, ids: &[String]) -> Result<Vec<BlockItem>> {
            self.check_enumeration()?;
            self.retrieve_chunks.lock().unwrap().push(ids.len());

            let known: HashSet<String> = self.sorted_ids(class, &Filter::all()).into_iter().collect();
            Ok(ids
                .iter()
                .map(|id| self.item_for(class, id, known.contains(id)))
                .collect())
        }

        async fn list_all(&self, class: ObjectClass) -> Result<Box<dyn ObjectListing>> {
            self.check_enumeration()?;
            self.listings_opened.fetch_add(1, Ordering::SeqCst);

            let items = self
                .sorted_ids(class, &Filter::all())
                .iter()
                .map(|id| self.item_for(class, id, true))
                .collect();
            Ok(Box::new(VecListing {
                items,
                closed: false,
                close_counter: self.listings_closed.clone(),
            }))
        }
    }

    struct VecListing {
        items: VecDeque<BlockItem>,
        closed: bool,
        close_counter: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ObjectListing for VecListing {
        async fn next(&mut self) -> Result<Option<BlockItem>> {
            if self.closed {
                return Err(AppError::Enumeration("listing already closed".to_string()));
            }
            Ok(self.items.pop_front())
        }

        async fn close(&mut self) -> Result<()> {
            if !self.closed {
                self.closed = true;
                self.close_counter.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }
    }
}
