//! Ports to the platform's resource and subscription stores.
//!
//! The dispatch core only depends on the paginated list and point lookup
//! contracts defined here. Concrete bindings (RPC, SQL) are injected by the
//! embedding application.

use crate::core::{
    Environment, Experiment, ExperimentStatus, Feature, MauCount, Project, SourceType,
    Subscription,
};
use crate::error::StoreError;
use async_trait::async_trait;
use std::future::Future;

#[cfg(any(test, feature = "test-utils"))]
pub mod memory;

/// Page size used by every list call issued from this crate.
pub const LIST_PAGE_SIZE: usize = 500;

/// Pagination parameters of a list call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ListRequest {
    pub page_size: usize,
    /// Opaque cursor returned by the previous page. Empty for the first page.
    pub cursor: String,
}

/// One page of a list call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: String,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, next_cursor: impl Into<String>) -> Self {
        Self {
            items,
            next_cursor: next_cursor.into(),
        }
    }
}

/// Filters for environment listing.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EnvironmentFilter {
    pub project_id: Option<String>,
    pub archived: Option<bool>,
}

/// Filters for feature listing.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FeatureFilter {
    pub archived: Option<bool>,
}

/// Filters for experiment listing.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExperimentFilter {
    /// Only experiments in one of these statuses. Empty means any status.
    pub statuses: Vec<ExperimentStatus>,
    pub archived: Option<bool>,
}

#[async_trait]
pub trait EnvironmentStore: Send + Sync {
    /// Looks up an environment by its namespace.
    ///
    /// # Returns
    /// * `Err(StoreError::NotFound)` if the environment no longer exists
    async fn get_environment_by_namespace(&self, namespace: &str)
        -> Result<Environment, StoreError>;

    async fn list_environments(
        &self,
        request: ListRequest,
        filter: &EnvironmentFilter,
    ) -> Result<Page<Environment>, StoreError>;

    async fn list_projects(&self, request: ListRequest) -> Result<Page<Project>, StoreError>;
}

#[async_trait]
pub trait FeatureStore: Send + Sync {
    async fn list_features(
        &self,
        environment_id: &str,
        request: ListRequest,
        filter: &FeatureFilter,
    ) -> Result<Page<Feature>, StoreError>;
}

#[async_trait]
pub trait ExperimentStore: Send + Sync {
    async fn list_experiments(
        &self,
        environment_id: &str,
        request: ListRequest,
        filter: &ExperimentFilter,
    ) -> Result<Page<Experiment>, StoreError>;
}

#[async_trait]
pub trait UsageStore: Send + Sync {
    /// Returns the event and user counts of an environment for a month key
    /// formatted as `YYYYMM`.
    async fn get_mau_count(
        &self,
        environment_id: &str,
        year_month: &str,
    ) -> Result<MauCount, StoreError>;
}

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Lists enabled subscriptions of one environment that listen to any of
    /// the given source types.
    async fn list_enabled_subscriptions(
        &self,
        environment_id: &str,
        source_types: &[SourceType],
        request: ListRequest,
    ) -> Result<Page<Subscription>, StoreError>;

    /// Lists enabled admin-scope subscriptions that listen to any of the
    /// given source types.
    async fn list_enabled_admin_subscriptions(
        &self,
        source_types: &[SourceType],
        request: ListRequest,
    ) -> Result<Page<Subscription>, StoreError>;
}

/// Drains a paginated list call.
///
/// Pages are requested with `page_size` until one comes back with fewer items
/// than requested.
pub async fn collect_all<T, F, Fut>(page_size: usize, mut fetch: F) -> Result<Vec<T>, StoreError>
where
    F: FnMut(ListRequest) -> Fut,
    Fut: Future<Output = Result<Page<T>, StoreError>>,
{
    let mut items = Vec::new();
    let mut cursor = String::new();
    loop {
        let page = fetch(ListRequest {
            page_size,
            cursor: std::mem::take(&mut cursor),
        })
        .await?;
        let fetched = page.items.len();
        items.extend(page.items);
        if fetched < page_size {
            return Ok(items);
        }
        cursor = page.next_cursor;
    }
}
