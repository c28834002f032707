//! Cursor-accumulating reads for list-shaped resources.
//!
//! Pages are appended in fetch order and never reloaded or reordered; the
//! observable item list is the concatenation of all loaded pages.
//!
//! ```text
//! Empty -> LoadingFirst -> Loaded -> LoadingNext -> Loaded -> ... -> Exhausted
//! ```

use futures::future::BoxFuture;
use std::future::Future;
use tokio::sync::mpsc;
use tracing::debug;

use crate::gateway::{Cursor, GatewayError, Page};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfiniteStatus {
  /// No page loaded yet
  Empty,
  LoadingFirst,
  /// At least one page loaded and more are available
  Loaded,
  LoadingNext,
  /// The last loaded page had no next cursor
  Exhausted,
}

type PageFetcherFn<T> = Box<dyn Fn(Option<Cursor>) -> BoxFuture<'static, Result<Page<T>, GatewayError>> + Send + Sync>;

/// Paginated query that grows one page at a time.
pub struct InfiniteQuery<T> {
  fetcher: PageFetcherFn<T>,
  pages: Vec<Page<T>>,
  status: InfiniteStatus,
  receiver: Option<mpsc::UnboundedReceiver<Result<Page<T>, GatewayError>>>,
  error: Option<GatewayError>,
}

impl<T: Send + 'static> InfiniteQuery<T> {
  /// Create a query whose pages come from `fetcher`. The first call receives
  /// `None`; later calls receive the previous page's next cursor.
  pub fn new<F, Fut>(fetcher: F) -> Self
  where
    F: Fn(Option<Cursor>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Page<T>, GatewayError>> + Send + 'static,
  {
    Self {
      fetcher: Box::new(move |cursor| Box::pin(fetcher(cursor))),
      pages: Vec::new(),
      status: InfiniteStatus::Empty,
      receiver: None,
      error: None,
    }
  }

  pub fn status(&self) -> InfiniteStatus {
    self.status
  }

  pub fn pages(&self) -> &[Page<T>] {
    &self.pages
  }

  /// All loaded items, page by page in fetch order.
  pub fn items(&self) -> impl Iterator<Item = &T> {
    self.pages.iter().flat_map(|page| page.items.iter())
  }

  pub fn item_count(&self) -> usize {
    self.pages.iter().map(|page| page.items.len()).sum()
  }

  /// True iff the most recently loaded page carries a next cursor.
  pub fn has_next_page(&self) -> bool {
    self
      .pages
      .last()
      .is_some_and(|page| page.next_cursor.is_some())
  }

  pub fn is_loading(&self) -> bool {
    matches!(
      self.status,
      InfiniteStatus::LoadingFirst | InfiniteStatus::LoadingNext
    )
  }

  pub fn is_fetching_next_page(&self) -> bool {
    self.status == InfiniteStatus::LoadingNext
  }

  /// Error from the most recent page request, cleared by the next success.
  pub fn error(&self) -> Option<&GatewayError> {
    self.error.as_ref()
  }

  /// Request the next page.
  ///
  /// Returns `false` without issuing a request when a page is already loading
  /// or the sequence is exhausted.
  pub fn fetch_next_page(&mut self) -> bool {
    let (cursor, status) = match self.status {
      InfiniteStatus::LoadingFirst | InfiniteStatus::LoadingNext | InfiniteStatus::Exhausted => {
        return false;
      }
      InfiniteStatus::Empty => (None, InfiniteStatus::LoadingFirst),
      InfiniteStatus::Loaded => {
        let cursor = self.pages.last().and_then(|page| page.next_cursor.clone());
        (cursor, InfiniteStatus::LoadingNext)
      }
    };

    debug!(?cursor, "fetching page");
    let (tx, rx) = mpsc::unbounded_channel();
    self.receiver = Some(rx);
    self.status = status;

    let future = (self.fetcher)(cursor);
    tokio::spawn(async move {
      let result = future.await;
      // Ignore send errors - the query may have been dropped
      let _ = tx.send(result);
    });
    true
  }

  /// Pick up a finished page without blocking. Returns `true` if state changed.
  pub fn poll(&mut self) -> bool {
    let receiver = match &mut self.receiver {
      Some(rx) => rx,
      None => return false,
    };

    match receiver.try_recv() {
      Ok(result) => {
        self.apply(result);
        true
      }
      Err(mpsc::error::TryRecvError::Empty) => false,
      Err(mpsc::error::TryRecvError::Disconnected) => {
        self.apply(Err(GatewayError::cancelled()));
        true
      }
    }
  }

  /// Wait for the pending page, if any. Returns `true` if state changed.
  pub async fn settle(&mut self) -> bool {
    let Some(receiver) = self.receiver.as_mut() else {
      return false;
    };
    let result = receiver
      .recv()
      .await
      .unwrap_or_else(|| Err(GatewayError::cancelled()));
    self.apply(result);
    true
  }

  /// Request the next page and wait for it.
  pub async fn load_next_page(&mut self) -> Result<(), GatewayError> {
    if !self.fetch_next_page() {
      return Ok(());
    }
    self.settle().await;
    match &self.error {
      Some(err) => Err(err.clone()),
      None => Ok(()),
    }
  }

  fn apply(&mut self, result: Result<Page<T>, GatewayError>) {
    self.receiver = None;
    match result {
      Ok(page) => {
        self.status = if page.next_cursor.is_some() {
          InfiniteStatus::Loaded
        } else {
          InfiniteStatus::Exhausted
        };
        self.pages.push(page);
        self.error = None;
      }
      Err(err) => {
        debug!("page request failed: {}", err);
        self.status = if self.pages.is_empty() {
          InfiniteStatus::Empty
        } else {
          InfiniteStatus::Loaded
        };
        self.error = Some(err);
      }
    }
  }
}

impl<T: std::fmt::Debug> std::fmt::Debug for InfiniteQuery<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("InfiniteQuery")
      .field("status", &self.status)
      .field("pages", &self.pages)
      .field("error", &self.error)
      .finish_non_exhaustive()
  }
}
