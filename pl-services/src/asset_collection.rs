//! Batched, cancellable asset collection.
//!
//! A scan walks one conversation's visible history newest first, in pages,
//! on the sync context. Every message is categorized through the
//! [`CategoryCache`] and tested against each filter. Matches found in a page
//! are handed to the UI context as ids, re-fetched there, appended to the
//! accumulated results and reported as one [`CollectionEvent::Fetched`].
//! When the history is exhausted a single [`CollectionEvent::Finished`]
//! follows and the channel closes.
//!
//! Jobs on a context run in submission order, so page deliveries reach the
//! UI context in page order and the finish job always runs after the last
//! delivery.
//!
//! A storage error on either side fails the scan: paging stops, results
//! delivered so far are dropped and `Finished` reports `NoAssetsToFetch`
//! for every filter.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use pl_core::config::CollectionConfig;
use pl_core::constants::DEFAULT_ASSET_FETCH_COUNT;
use pl_core::error::{PlError, PlResult};
use pl_models::queries::{self, MessageCursor};
use pl_models::{CategoryMatch, Message};

use crate::category_cache::CategoryCache;
use crate::classifier::{ContentClassifier, DefaultClassifier};
use crate::context::{ContextStack, ContextState, ManagedContext};

static NEXT_SCAN_ID: AtomicU64 = AtomicU64::new(1);

/// Outcome of a scan, overall or for one filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchResult {
    Success,
    NoAssetsToFetch,
}

impl std::fmt::Display for FetchResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchResult::Success => write!(f, "success"),
            FetchResult::NoAssetsToFetch => write!(f, "no assets to fetch"),
        }
    }
}

/// What a scan reports to its consumer.
#[derive(Debug, Clone)]
pub enum CollectionEvent {
    /// New matches from one page, keyed by filter. Only filters that gained
    /// at least one match appear. Messages are loaded on the UI context.
    Fetched {
        matches: HashMap<CategoryMatch, Vec<Message>>,
        has_more_to_fetch: bool,
    },
    /// Terminal event. `result` is `Success` when any filter matched.
    Finished {
        result: FetchResult,
        per_filter: HashMap<CategoryMatch, FetchResult>,
    },
}

/// Tunables for one scan.
#[derive(Clone)]
pub struct ScanOptions {
    pub page_size: usize,
    pub classifier: Arc<dyn ContentClassifier>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_ASSET_FETCH_COUNT,
            classifier: Arc::new(DefaultClassifier),
        }
    }
}

impl ScanOptions {
    pub fn from_config(config: &CollectionConfig) -> Self {
        Self {
            page_size: config.page_size,
            ..Self::default()
        }
    }
}

struct Shared {
    id: u64,
    conversation_id: i64,
    torn_down: AtomicBool,
    done_fetching: AtomicBool,
    /// Set when any page could not be categorized or loaded. The scan then
    /// stops paging and finishes with nothing.
    failed: AtomicBool,
    assets: Mutex<HashMap<CategoryMatch, Vec<Message>>>,
}

impl Shared {
    fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }

    fn has_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    fn assets(&self) -> MutexGuard<'_, HashMap<CategoryMatch, Vec<Message>>> {
        self.assets.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to a running (or finished) scan. Cheap to clone.
#[derive(Clone)]
pub struct AssetCollection {
    shared: Arc<Shared>,
}

impl AssetCollection {
    /// Start scanning `conversation_id` with the default options.
    pub fn start(
        contexts: &ContextStack,
        conversation_id: i64,
        matches: Vec<CategoryMatch>,
    ) -> (Self, mpsc::UnboundedReceiver<CollectionEvent>) {
        Self::start_with(contexts, conversation_id, matches, ScanOptions::default())
    }

    /// Start scanning with explicit options. The scan begins immediately on
    /// the sync context.
    pub fn start_with(
        contexts: &ContextStack,
        conversation_id: i64,
        matches: Vec<CategoryMatch>,
        options: ScanOptions,
    ) -> (Self, mpsc::UnboundedReceiver<CollectionEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            id: NEXT_SCAN_ID.fetch_add(1, Ordering::Relaxed),
            conversation_id,
            torn_down: AtomicBool::new(false),
            done_fetching: AtomicBool::new(false),
            failed: AtomicBool::new(false),
            assets: Mutex::new(HashMap::new()),
        });

        let mut filters = Vec::with_capacity(matches.len());
        for filter in matches {
            if !filters.contains(&filter) {
                filters.push(filter);
            }
        }

        info!(
            scan = shared.id,
            conversation_id,
            filters = filters.len(),
            page_size = options.page_size,
            "asset collection started"
        );

        let scan = Scan {
            matched: filters.iter().map(|f| (*f, false)).collect(),
            filters,
            shared: shared.clone(),
            ui: contexts.ui.clone(),
            sync: contexts.sync.clone(),
            cache: CategoryCache::new(options.classifier),
            page_size: options.page_size.max(1),
            cursor: None,
            sender,
        };
        contexts.sync.perform(move |state| scan.begin(state));

        (Self { shared }, receiver)
    }

    /// Stop the scan. No event is sent after this returns, even for pages
    /// already handed to the UI context. Idempotent.
    pub fn tear_down(&self) {
        if !self.shared.torn_down.swap(true, Ordering::SeqCst) {
            debug!(scan = self.shared.id, "asset collection torn down");
        }
        self.shared.done_fetching.store(true, Ordering::SeqCst);
    }

    /// True once the scan finished, found nothing or was torn down.
    pub fn done_fetching(&self) -> bool {
        self.shared.done_fetching.load(Ordering::SeqCst)
    }

    pub fn conversation_id(&self) -> i64 {
        self.shared.conversation_id
    }

    /// Results accumulated so far for `filter`, newest first. The messages
    /// were loaded on the UI context. Empty after a scan that failed.
    pub fn assets(&self, filter: &CategoryMatch) -> Vec<Message> {
        self.shared.assets().get(filter).cloned().unwrap_or_default()
    }
}

/// Scan state, moved from one sync job to the next.
struct Scan {
    shared: Arc<Shared>,
    ui: ManagedContext,
    sync: ManagedContext,
    cache: CategoryCache,
    filters: Vec<CategoryMatch>,
    /// Whether each filter has matched anything yet.
    matched: HashMap<CategoryMatch, bool>,
    page_size: usize,
    cursor: Option<MessageCursor>,
    sender: mpsc::UnboundedSender<CollectionEvent>,
}

/// Ids matched by each filter within one page, in filter order.
type PageMatches = Vec<(CategoryMatch, Vec<i64>)>;

impl Scan {
    fn begin(mut self, state: &mut ContextState) {
        if self.shared.is_torn_down() {
            return;
        }

        let total = match queries::count_messages_for_conversation(
            state.conn(),
            self.shared.conversation_id,
        ) {
            Ok(total) => total.max(0) as usize,
            Err(e) => return self.abort(e),
        };

        if total == 0 || self.filters.is_empty() {
            debug!(scan = self.shared.id, total, "nothing to scan");
            return self.finish();
        }

        if total <= self.page_size {
            // Whole history fits in one page: scan it once and finish.
            match queries::messages_for_conversation_cursor(
                state.conn(),
                self.shared.conversation_id,
                None,
                total,
            ) {
                Ok(mut messages) => match self.categorize(state, &mut messages) {
                    Ok(page) => {
                        self.deliver(page, false);
                        self.finish();
                    }
                    Err(e) => self.abort(e),
                },
                Err(e) => self.abort(e),
            }
            return;
        }

        self.next_page(state);
    }

    fn next_page(mut self, state: &mut ContextState) {
        if self.shared.is_torn_down() {
            debug!(scan = self.shared.id, "scan stopped before next page");
            return;
        }
        if self.shared.has_failed() {
            return self.abort(PlError::Internal(
                "matches of an earlier page could not be loaded".into(),
            ));
        }

        let fetched = queries::messages_for_conversation_cursor(
            state.conn(),
            self.shared.conversation_id,
            self.cursor,
            self.page_size + 1,
        );
        let mut messages = match fetched {
            Ok(messages) => messages,
            Err(e) => return self.abort(e),
        };

        let has_more = messages.len() > self.page_size;
        messages.truncate(self.page_size);
        self.cursor = messages.last().and_then(MessageCursor::after);

        let page = match self.categorize(state, &mut messages) {
            Ok(page) => page,
            Err(e) => return self.abort(e),
        };
        self.deliver(page, has_more);

        if has_more && self.cursor.is_some() {
            let sync = self.sync.clone();
            sync.perform(move |state| self.next_page(state));
        } else {
            self.finish();
        }
    }

    /// Match one page against every filter. Any message that cannot be
    /// categorized fails the whole page.
    fn categorize(&mut self, state: &ContextState, messages: &mut [Message]) -> PlResult<PageMatches> {
        let mut page: PageMatches = self.filters.iter().map(|f| (*f, Vec::new())).collect();

        for message in messages.iter_mut() {
            let Some(id) = message.id else { continue };
            let category = self.cache.category(state.conn(), message).map_err(|e| {
                warn!(scan = self.shared.id, message_id = id, "failed to categorize: {e}");
                e
            })?;
            for (filter, ids) in page.iter_mut() {
                if filter.matches(category) {
                    ids.push(id);
                }
            }
        }

        page.retain(|(_, ids)| !ids.is_empty());
        for (filter, _) in &page {
            self.matched.insert(*filter, true);
        }
        Ok(page)
    }

    /// Hand one page of matches to the UI context.
    fn deliver(&self, page: PageMatches, has_more_to_fetch: bool) {
        if page.is_empty() {
            return;
        }
        let shared = self.shared.clone();
        let sender = self.sender.clone();
        self.ui.perform(move |state| {
            if shared.is_torn_down() || shared.has_failed() {
                return;
            }

            let mut delivered = HashMap::with_capacity(page.len());
            for (filter, ids) in page {
                match state.fetch_messages(&ids) {
                    Ok(messages) if !messages.is_empty() => {
                        delivered.insert(filter, messages);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        // No partial page. The finish job reports the failure.
                        warn!(scan = shared.id, "failed to load matches on ui context: {e}");
                        shared.failed.store(true, Ordering::SeqCst);
                        return;
                    }
                }
            }
            if delivered.is_empty() {
                return;
            }

            {
                let mut assets = shared.assets();
                for (filter, messages) in &delivered {
                    assets.entry(*filter).or_default().extend(messages.iter().cloned());
                }
            }
            let _ = sender.send(CollectionEvent::Fetched {
                matches: delivered,
                has_more_to_fetch,
            });
        });
    }

    fn finish(self) {
        let per_filter: HashMap<CategoryMatch, FetchResult> = self
            .matched
            .iter()
            .map(|(filter, matched)| {
                let result = if *matched {
                    FetchResult::Success
                } else {
                    FetchResult::NoAssetsToFetch
                };
                (*filter, result)
            })
            .collect();
        let result = if self.matched.values().any(|m| *m) {
            FetchResult::Success
        } else {
            FetchResult::NoAssetsToFetch
        };
        self.post_finished(result, per_filter);
    }

    fn abort(self, error: PlError) {
        warn!(scan = self.shared.id, "asset collection aborted: {error}");
        self.shared.failed.store(true, Ordering::SeqCst);
        self.post_finished(FetchResult::NoAssetsToFetch, HashMap::new());
    }

    /// Queue the terminal event behind every delivery already on the UI
    /// context. A failed scan drops what it delivered and reports nothing.
    fn post_finished(self, result: FetchResult, per_filter: HashMap<CategoryMatch, FetchResult>) {
        let Scan {
            shared,
            ui,
            sender,
            filters,
            ..
        } = self;
        ui.perform(move |_state| {
            shared.done_fetching.store(true, Ordering::SeqCst);
            let (result, per_filter) = if shared.has_failed() {
                shared.assets().clear();
                let none = filters
                    .iter()
                    .map(|f| (*f, FetchResult::NoAssetsToFetch))
                    .collect();
                (FetchResult::NoAssetsToFetch, none)
            } else {
                (result, per_filter)
            };
            if shared.is_torn_down() {
                return;
            }
            info!(scan = shared.id, %result, "asset collection finished");
            let _ = sender.send(CollectionEvent::Finished { result, per_filter });
        });
    }
}

/// Scan a conversation in a single pass on the calling thread. Used by
/// tools that do not run the contexts.
pub fn collect_unbatched(
    conn: &rusqlite::Connection,
    cache: &CategoryCache,
    conversation_id: i64,
    filters: &[CategoryMatch],
) -> PlResult<HashMap<CategoryMatch, Vec<Message>>> {
    let total = queries::count_messages_for_conversation(conn, conversation_id)?.max(0) as usize;
    let mut messages = queries::messages_for_conversation_cursor(conn, conversation_id, None, total)?;

    let mut result: HashMap<CategoryMatch, Vec<Message>> = HashMap::new();
    for message in messages.iter_mut() {
        let category = cache.category(conn, message)?;
        for filter in filters {
            if filter.matches(category) {
                result.entry(*filter).or_default().push(message.clone());
            }
        }
    }
    Ok(result)
}
