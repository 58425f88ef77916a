//! Entity enumeration over the paginated catalog listing API.

use std::future::Future;
use std::sync::Arc;

use tokio::task::JoinSet;

use catbatch_types::{EntityKey, Granularity, RetryPolicy, ServiceError};

use crate::retry::{with_retry, Attempt};
use crate::service::{CatalogService, Page};

/// Names returned by one listing, and whether every page was fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    pub items: Vec<String>,
    pub complete: bool,
}

impl Default for Listing {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            complete: true,
        }
    }
}

/// Keys discovered by [`enumerate`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Enumeration {
    /// Keys at the requested granularity, in listing order.
    pub keys: Vec<EntityKey>,
    /// Table keys walked on the way down (database keys for database runs).
    pub listing: Vec<EntityKey>,
    /// Listings that ended early after a failed page.
    pub incomplete_listings: u64,
    /// Names the service returned that are not valid key components.
    pub invalid_names: u64,
}

/// Follow continuation tokens until the service reports none.
async fn paginate<F, Fut>(retry: &RetryPolicy, label: &str, mut fetch: F) -> Listing
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Page, ServiceError>>,
{
    let mut listing = Listing::default();
    let mut token: Option<String> = None;
    loop {
        let report = with_retry(retry, label, |_| fetch(token.clone())).await;
        let page = match report.outcome {
            Attempt::Succeeded(page) => page,
            Attempt::Skipped(err) => {
                tracing::warn!(listing = label, error = %err, "Listed resource not found");
                return listing;
            }
            Attempt::Exhausted(err) | Attempt::Failed(err) => {
                tracing::error!(
                    listing = label,
                    fetched = listing.items.len(),
                    attempts = report.attempts,
                    error = %err,
                    "Listing failed, continuing with partial results"
                );
                listing.complete = false;
                return listing;
            }
        };

        tracing::debug!(listing = label, count = page.names.len(), "Fetched page");
        let next = page.continuation().map(str::to_string);
        listing.items.extend(page.names);
        match next {
            Some(next) if token.as_deref() == Some(next.as_str()) => {
                tracing::error!(
                    listing = label,
                    token = next,
                    "Service repeated a continuation token, stopping"
                );
                listing.complete = false;
                return listing;
            }
            Some(next) => token = Some(next),
            None => return listing,
        }
    }
}

pub async fn list_databases(service: &dyn CatalogService, retry: &RetryPolicy) -> Listing {
    let listing = paginate(retry, "list_databases", |token| async move {
        service.list_databases(token.as_deref()).await
    })
    .await;
    tracing::info!(count = listing.items.len(), "Total databases fetched");
    listing
}

pub async fn list_tables(
    service: &dyn CatalogService,
    retry: &RetryPolicy,
    database: &str,
) -> Listing {
    let label = format!("list_tables({database})");
    let listing = paginate(retry, &label, |token| async move {
        service.list_tables(database, token.as_deref()).await
    })
    .await;
    tracing::info!(
        database,
        count = listing.items.len(),
        "Total tables fetched"
    );
    listing
}

/// Column names of one table, from a single non-paginated call.
pub async fn list_columns(
    service: &dyn CatalogService,
    retry: &RetryPolicy,
    database: &str,
    table: &str,
) -> Listing {
    let label = format!("get_table({database}.{table})");
    let report = with_retry(retry, &label, |_| service.get_table(database, table)).await;
    match report.outcome {
        Attempt::Succeeded(meta) => Listing {
            items: meta.columns.into_iter().map(|c| c.name).collect(),
            complete: true,
        },
        Attempt::Skipped(err) => {
            tracing::warn!(database, table, error = %err, "Table not found");
            Listing::default()
        }
        Attempt::Exhausted(err) | Attempt::Failed(err) => {
            tracing::error!(database, table, error = %err, "Failed to fetch columns");
            Listing {
                items: Vec::new(),
                complete: false,
            }
        }
    }
}

/// Run `f` over `inputs` with at most `concurrency` tasks in flight.
///
/// Results keep input order. Tasks that panic are logged and dropped; their
/// count is returned alongside.
async fn fan_out<I, T, F, Fut>(inputs: Vec<I>, concurrency: usize, f: F) -> (Vec<T>, u64)
where
    I: Send + 'static,
    T: Send + 'static,
    F: Fn(I) -> Fut,
    Fut: Future<Output = T> + Send + 'static,
{
    let limit = concurrency.max(1);
    let mut set = JoinSet::new();
    let mut results = Vec::with_capacity(inputs.len());
    let mut panicked = 0u64;

    let mut collect = |joined: Result<(usize, T), tokio::task::JoinError>| match joined {
        Ok(pair) => results.push(pair),
        Err(e) => {
            tracing::error!(error = %e, "Listing task panicked");
            panicked += 1;
        }
    };

    for (idx, input) in inputs.into_iter().enumerate() {
        if set.len() >= limit {
            if let Some(joined) = set.join_next().await {
                collect(joined);
            }
        }
        let fut = f(input);
        set.spawn(async move { (idx, fut.await) });
    }
    while let Some(joined) = set.join_next().await {
        collect(joined);
    }

    results.sort_by_key(|(idx, _)| *idx);
    (results.into_iter().map(|(_, t)| t).collect(), panicked)
}

/// Turn listed names into keys, dropping names that cannot be keys.
fn keys_from<F>(names: Vec<String>, out: &mut Enumeration, make: F) -> Vec<EntityKey>
where
    F: Fn(&str) -> Result<EntityKey, catbatch_types::KeyError>,
{
    names
        .into_iter()
        .filter_map(|name| match make(&name) {
            Ok(key) => Some(key),
            Err(e) => {
                tracing::warn!(name, error = %e, "Ignoring listed name");
                out.invalid_names += 1;
                None
            }
        })
        .collect()
}

/// Walk the catalog down to `granularity`.
///
/// `databases` restricts the walk; empty means every listed database. Tables
/// of different databases and columns of different tables are listed
/// concurrently, at most `concurrency` at a time.
pub async fn enumerate(
    service: Arc<dyn CatalogService>,
    retry: RetryPolicy,
    granularity: Granularity,
    databases: &[String],
    concurrency: usize,
) -> Enumeration {
    let mut out = Enumeration::default();

    let db_names = if databases.is_empty() {
        let listing = list_databases(service.as_ref(), &retry).await;
        if !listing.complete {
            out.incomplete_listings += 1;
        }
        listing.items
    } else {
        databases.to_vec()
    };
    let db_keys = keys_from(db_names, &mut out, EntityKey::database);

    if granularity == Granularity::Database {
        out.listing.clone_from(&db_keys);
        out.keys = db_keys;
        return out;
    }

    let (per_db, panicked) = fan_out(db_keys, concurrency, |db| {
        let service = Arc::clone(&service);
        let retry = retry;
        async move {
            let listing = list_tables(service.as_ref(), &retry, db.database_name()).await;
            (db, listing)
        }
    })
    .await;
    out.incomplete_listings += panicked;

    let mut table_keys = Vec::new();
    for (db, listing) in per_db {
        if !listing.complete {
            out.incomplete_listings += 1;
        }
        let db_name = db.database_name();
        table_keys.extend(keys_from(listing.items, &mut out, |t| {
            EntityKey::table(db_name, t)
        }));
    }

    if granularity == Granularity::Table {
        out.listing.clone_from(&table_keys);
        out.keys = table_keys;
        return out;
    }

    out.listing.clone_from(&table_keys);
    let (per_table, panicked) = fan_out(table_keys, concurrency, |table| {
        let service = Arc::clone(&service);
        let retry = retry;
        async move {
            let listing = match table.table_name() {
                Some(name) => {
                    list_columns(service.as_ref(), &retry, table.database_name(), name).await
                }
                None => Listing::default(),
            };
            (table, listing)
        }
    })
    .await;
    out.incomplete_listings += panicked;

    for (table, listing) in per_table {
        if !listing.complete {
            out.incomplete_listings += 1;
        }
        let db_name = table.database_name();
        let table_name = table.table_name().unwrap_or_default();
        let columns = keys_from(listing.items, &mut out, |c| {
            EntityKey::column(db_name, table_name, c)
        });
        out.keys.extend(columns);
    }

    tracing::info!(
        granularity = %granularity,
        keys = out.keys.len(),
        incomplete_listings = out.incomplete_listings,
        "Enumeration finished"
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::memory::{CallKind, InMemoryCatalog};

    fn retry() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(10))
    }

    fn catalog(page_size: usize) -> Arc<InMemoryCatalog> {
        let catalog = InMemoryCatalog::default().with_page_size(page_size);
        for t in ["t1", "t2", "t3", "t4", "t5"] {
            catalog.add_table("db1", t, &["c1", "c2"]);
        }
        catalog.add_table("db2", "only", &["x"]);
        Arc::new(catalog)
    }

    #[tokio::test]
    async fn list_tables_follows_tokens() {
        let catalog = catalog(2);
        let listing = list_tables(catalog.as_ref(), &retry(), "db1").await;
        assert!(listing.complete);
        assert_eq!(listing.items, vec!["t1", "t2", "t3", "t4", "t5"]);
        assert_eq!(catalog.calls(CallKind::ListTables, "db1"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_listing_is_incomplete() {
        let catalog = catalog(2);
        catalog.fail(
            CallKind::ListTables,
            "db1",
            ServiceError::throttled("Throttling", "slow down"),
            None,
        );
        let listing = list_tables(catalog.as_ref(), &retry(), "db1").await;
        assert!(!listing.complete);
        assert!(listing.items.is_empty());
        assert_eq!(catalog.calls(CallKind::ListTables, "db1"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_page_failure_is_retried() {
        let catalog = catalog(2);
        catalog.fail(
            CallKind::ListTables,
            "db1",
            ServiceError::unavailable("Unavailable", "blip"),
            Some(1),
        );
        let listing = list_tables(catalog.as_ref(), &retry(), "db1").await;
        assert!(listing.complete);
        assert_eq!(listing.items.len(), 5);
    }

    #[tokio::test]
    async fn enumerate_tables_of_all_databases() {
        let catalog = catalog(2);
        let service: Arc<dyn CatalogService> = catalog.clone();
        let result = enumerate(service, retry(), Granularity::Table, &[], 4).await;
        assert_eq!(result.keys.len(), 6);
        assert_eq!(result.keys[0].to_string(), "db1,t1");
        assert_eq!(result.keys[5].to_string(), "db2,only");
        assert_eq!(result.incomplete_listings, 0);
        assert_eq!(result.listing, result.keys);
    }

    #[tokio::test]
    async fn enumerate_columns_of_selected_database() {
        let service: Arc<dyn CatalogService> = catalog(10);
        let result = enumerate(
            service,
            retry(),
            Granularity::Column,
            &["db2".to_string()],
            2,
        )
        .await;
        let keys: Vec<String> = result.keys.iter().map(ToString::to_string).collect();
        assert_eq!(keys, vec!["db2,only,x"]);
        assert_eq!(result.listing.len(), 1);
    }

    #[tokio::test]
    async fn unknown_selected_database_yields_nothing() {
        let service: Arc<dyn CatalogService> = catalog(10);
        let result = enumerate(
            service,
            retry(),
            Granularity::Table,
            &["ghost".to_string()],
            2,
        )
        .await;
        assert!(result.keys.is_empty());
        assert_eq!(result.incomplete_listings, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_database_listing_is_counted_incomplete() {
        let catalog = catalog(10);
        catalog.fail(
            CallKind::ListTables,
            "db2",
            ServiceError::internal("InternalService", "boom"),
            None,
        );
        let service: Arc<dyn CatalogService> = catalog;
        let result = enumerate(service, retry(), Granularity::Table, &[], 2).await;
        assert_eq!(result.keys.len(), 5);
        assert_eq!(result.incomplete_listings, 1);
    }

    #[tokio::test]
    async fn fan_out_keeps_input_order() {
        let (out, panicked) = fan_out((0..20u64).collect(), 3, |n| async move {
            tokio::time::sleep(Duration::from_millis(20 - n)).await;
            n * 2
        })
        .await;
        assert_eq!(panicked, 0);
        assert_eq!(out, (0..20u64).map(|n| n * 2).collect::<Vec<_>>());
    }

    struct SecondPageFails;

    #[async_trait::async_trait]
    impl CatalogService for SecondPageFails {
        async fn list_databases(&self, token: Option<&str>) -> Result<Page, ServiceError> {
            match token {
                None => Ok(Page {
                    names: vec!["a".into(), "b".into()],
                    next_token: Some("p2".into()),
                }),
                Some(_) => Err(ServiceError::access_denied("AccessDenied", "expired")),
            }
        }
        async fn list_tables(&self, _: &str, _: Option<&str>) -> Result<Page, ServiceError> {
            unimplemented!()
        }
        async fn get_table(
            &self,
            _: &str,
            _: &str,
        ) -> Result<crate::service::TableMetadata, ServiceError> {
            unimplemented!()
        }
        async fn get_schedule_settings(
            &self,
            _: &str,
            _: &str,
        ) -> Result<crate::service::ScheduleSettings, ServiceError> {
            unimplemented!()
        }
        async fn grant_access(
            &self,
            _: &EntityKey,
            _: &crate::service::GrantRequest,
        ) -> Result<(), ServiceError> {
            unimplemented!()
        }
        async fn create_or_update_schedule(
            &self,
            _: &EntityKey,
            _: &crate::service::ScheduleRequest,
        ) -> Result<(), ServiceError> {
            unimplemented!()
        }
        async fn stop_schedule(&self, _: &EntityKey) -> Result<(), ServiceError> {
            unimplemented!()
        }
        async fn delete_statistics(&self, _: &EntityKey) -> Result<(), ServiceError> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn failed_second_page_keeps_first_page() {
        let listing = list_databases(&SecondPageFails, &retry()).await;
        assert!(!listing.complete);
        assert_eq!(listing.items, vec!["a", "b"]);
    }
}
