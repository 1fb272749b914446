//! Asset collection command.

use std::collections::HashMap;

use console::style;
use tracing::debug;

use pl_core::config::ConfigHandle;
use pl_core::error::PlResult;
use pl_models::{CategoryMatch, Conversation, Database, Message, MessageCategory};
use pl_services::asset_collection::{
    collect_unbatched, AssetCollection, CollectionEvent, FetchResult, ScanOptions,
};
use pl_services::category_cache::CategoryCache;
use pl_services::context::ContextStack;
use pl_services::event_bus::EventBus;
use crate::OutputFormat;

/// Outcome of either scan mode, ready to print.
struct Collected {
    result: FetchResult,
    per_filter: HashMap<CategoryMatch, FetchResult>,
    assets: HashMap<CategoryMatch, Vec<Message>>,
}

impl Collected {
    fn result_for(&self, filter: &CategoryMatch) -> FetchResult {
        self.per_filter
            .get(filter)
            .copied()
            .unwrap_or(FetchResult::NoAssetsToFetch)
    }

    fn assets_for(&self, filter: &CategoryMatch) -> &[Message] {
        self.assets.get(filter).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Build one filter per `include` expression, all sharing `exclude`.
fn parse_filters(include: &[String], exclude: Option<&str>) -> PlResult<Vec<CategoryMatch>> {
    let excluding: MessageCategory = exclude.unwrap_or("").parse()?;
    include
        .iter()
        .map(|expr| Ok(CategoryMatch::new(expr.parse()?, excluding)))
        .collect()
}

/// Per-filter outcome of a finished single-pass scan.
fn outcome_of(filters: &[CategoryMatch], assets: HashMap<CategoryMatch, Vec<Message>>) -> Collected {
    let per_filter: HashMap<_, _> = filters
        .iter()
        .map(|filter| {
            let found = assets.get(filter).is_some_and(|m| !m.is_empty());
            let result = if found {
                FetchResult::Success
            } else {
                FetchResult::NoAssetsToFetch
            };
            (*filter, result)
        })
        .collect();
    let result = if per_filter.values().any(|r| *r == FetchResult::Success) {
        FetchResult::Success
    } else {
        FetchResult::NoAssetsToFetch
    };
    Collected {
        result,
        per_filter,
        assets,
    }
}

/// Scan in one pass on this thread, without starting the contexts.
fn run_unbatched(db: &Database, conversation: i64, filters: &[CategoryMatch]) -> PlResult<Collected> {
    let conn = db.conn()?;
    let assets = collect_unbatched(&conn, &CategoryCache::default(), conversation, filters)?;
    debug!(conversation, filters = filters.len(), "single-pass scan finished");
    Ok(outcome_of(filters, assets))
}

/// Run a paged scan on the contexts, printing each batch as it arrives.
async fn run_batched(
    db: &Database,
    conversation: i64,
    filters: &[CategoryMatch],
    options: ScanOptions,
    format: OutputFormat,
) -> PlResult<Collected> {
    let contexts = ContextStack::new(db, EventBus::default())?;
    let (collection, mut events) =
        AssetCollection::start_with(&contexts, conversation, filters.to_vec(), options);

    let mut pages = 0usize;
    let mut outcome = None;
    while let Some(event) = events.recv().await {
        match event {
            CollectionEvent::Fetched { matches, has_more_to_fetch } => {
                pages += 1;
                let found: usize = matches.values().map(Vec::len).sum();
                debug!(page = pages, found, has_more_to_fetch, "assets fetched");
                if let OutputFormat::Text = format {
                    println!(
                        "  {} batch {}: {} match(es){}",
                        style("...").dim(),
                        pages,
                        found,
                        if has_more_to_fetch { ", more to fetch" } else { "" }
                    );
                }
            }
            CollectionEvent::Finished { result, per_filter } => {
                outcome = Some((result, per_filter));
            }
        }
    }
    collection.tear_down();
    contexts.shutdown();

    let (result, per_filter) = outcome.unwrap_or((FetchResult::NoAssetsToFetch, HashMap::new()));
    let assets = filters
        .iter()
        .map(|filter| (*filter, collection.assets(filter)))
        .collect();
    Ok(Collected {
        result,
        per_filter,
        assets,
    })
}

pub async fn run(
    config: ConfigHandle,
    conversation: i64,
    include: Vec<String>,
    exclude: Option<String>,
    page_size: Option<usize>,
    unbatched: bool,
    format: OutputFormat,
) -> PlResult<()> {
    let filters = parse_filters(&include, exclude.as_deref())?;
    let mut options = ScanOptions::from_config(&config.read().await.collection);
    if let Some(page_size) = page_size {
        options.page_size = page_size;
    }

    let db = super::init_database(&config).await?;
    {
        let conn = db.conn()?;
        Conversation::get(&conn, conversation)?;
    }

    let collected = if unbatched {
        run_unbatched(&db, conversation, &filters)?
    } else {
        run_batched(&db, conversation, &filters, options, format).await?
    };

    match format {
        OutputFormat::Json => {
            let rows: Vec<_> = filters
                .iter()
                .map(|filter| {
                    serde_json::json!({
                        "filter": filter,
                        "result": collected.result_for(filter),
                        "message_ids": collected.assets_for(filter).iter().filter_map(|m| m.id).collect::<Vec<_>>(),
                    })
                })
                .collect();
            println!("{}", serde_json::json!({
                "conversation_id": conversation,
                "unbatched": unbatched,
                "result": collected.result,
                "filters": rows,
            }));
        }
        OutputFormat::Text => {
            println!();
            println!("{}", style("Asset Collection").bold().underlined());
            println!("  Conversation:  {}", conversation);
            println!("  Mode:          {}", if unbatched { "single pass" } else { "batched" });
            println!("  Result:        {}", collected.result);
            println!();

            let mut table = super::new_table();
            table.set_header(vec!["Filter", "Result", "Matches", "Newest"]);
            for filter in &filters {
                let assets = collected.assets_for(filter);
                table.add_row(vec![
                    filter.to_string(),
                    collected.result_for(filter).to_string(),
                    assets.len().to_string(),
                    assets
                        .first()
                        .map(|m| super::truncate(&m.preview(), 40))
                        .unwrap_or_else(|| "-".to_string()),
                ]);
            }
            println!("{table}");
        }
    }

    Ok(())
}
