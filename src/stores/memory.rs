//! In-memory store implementations for tests.
//!
//! Cursors are stringified offsets. Every store records how many list calls
//! it served and can be told to fail its next calls.

use super::{
    EnvironmentFilter, EnvironmentStore, ExperimentFilter, ExperimentStore, FeatureFilter,
    FeatureStore, ListRequest, Page, SubscriptionStore, UsageStore,
};
use crate::core::{Environment, Experiment, Feature, MauCount, Project, SourceType, Subscription};
use crate::error::StoreError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

fn paginate<T: Clone>(items: Vec<T>, request: &ListRequest) -> Result<Page<T>, StoreError> {
    let offset = if request.cursor.is_empty() {
        0
    } else {
        request
            .cursor
            .parse::<usize>()
            .map_err(|_| StoreError::Internal(format!("bad cursor {:?}", request.cursor)))?
    };
    let page_size = request.page_size.max(1);
    let end = (offset + page_size).min(items.len());
    let page = items.get(offset..end).map(<[T]>::to_vec).unwrap_or_default();
    Ok(Page::new(page, end.to_string()))
}

/// Environments and projects keyed by namespace.
#[derive(Default)]
pub struct MemoryEnvironmentStore {
    environments: Mutex<Vec<(String, Environment)>>,
    projects: Mutex<Vec<Project>>,
    lookup_error: Mutex<Option<StoreError>>,
    list_error: Mutex<Option<StoreError>>,
    lookups: AtomicUsize,
}

impl MemoryEnvironmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an environment reachable by `namespace`.
    pub fn add_environment(&self, namespace: &str, environment: Environment) {
        self.environments
            .lock()
            .unwrap()
            .push((namespace.to_string(), environment));
    }

    pub fn add_project(&self, project: Project) {
        self.projects.lock().unwrap().push(project);
    }

    /// Makes every namespace lookup fail with `error`.
    pub fn fail_lookups_with(&self, error: StoreError) {
        *self.lookup_error.lock().unwrap() = Some(error);
    }

    /// Makes every list call fail with `error`.
    pub fn fail_lists_with(&self, error: StoreError) {
        *self.list_error.lock().unwrap() = Some(error);
    }

    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EnvironmentStore for MemoryEnvironmentStore {
    async fn get_environment_by_namespace(
        &self,
        namespace: &str,
    ) -> Result<Environment, StoreError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.lookup_error.lock().unwrap().clone() {
            return Err(error);
        }
        self.environments
            .lock()
            .unwrap()
            .iter()
            .find(|(ns, _)| ns == namespace)
            .map(|(_, env)| env.clone())
            .ok_or_else(|| StoreError::NotFound(format!("environment {namespace}")))
    }

    async fn list_environments(
        &self,
        request: ListRequest,
        filter: &EnvironmentFilter,
    ) -> Result<Page<Environment>, StoreError> {
        if let Some(error) = self.list_error.lock().unwrap().clone() {
            return Err(error);
        }
        let matching: Vec<Environment> = self
            .environments
            .lock()
            .unwrap()
            .iter()
            .map(|(_, env)| env)
            .filter(|env| filter.archived.map_or(true, |archived| env.archived == archived))
            .filter(|env| {
                filter
                    .project_id
                    .as_deref()
                    .map_or(true, |project_id| env.project_id == project_id)
            })
            .cloned()
            .collect();
        paginate(matching, &request)
    }

    async fn list_projects(&self, request: ListRequest) -> Result<Page<Project>, StoreError> {
        if let Some(error) = self.list_error.lock().unwrap().clone() {
            return Err(error);
        }
        let projects = self.projects.lock().unwrap().clone();
        paginate(projects, &request)
    }
}

/// Feature flags keyed by environment id.
#[derive(Default)]
pub struct MemoryFeatureStore {
    features: Mutex<HashMap<String, Vec<Feature>>>,
    failing_environments: Mutex<HashMap<String, StoreError>>,
    list_calls: AtomicUsize,
}

impl MemoryFeatureStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_feature(&self, environment_id: &str, feature: Feature) {
        self.features
            .lock()
            .unwrap()
            .entry(environment_id.to_string())
            .or_default()
            .push(feature);
    }

    /// Makes list calls for one environment fail with `error`.
    pub fn fail_environment_with(&self, environment_id: &str, error: StoreError) {
        self.failing_environments
            .lock()
            .unwrap()
            .insert(environment_id.to_string(), error);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FeatureStore for MemoryFeatureStore {
    async fn list_features(
        &self,
        environment_id: &str,
        request: ListRequest,
        filter: &FeatureFilter,
    ) -> Result<Page<Feature>, StoreError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.failing_environments.lock().unwrap().get(environment_id) {
            return Err(error.clone());
        }
        let matching: Vec<Feature> = self
            .features
            .lock()
            .unwrap()
            .get(environment_id)
            .into_iter()
            .flatten()
            .filter(|f| filter.archived.map_or(true, |archived| f.archived == archived))
            .cloned()
            .collect();
        paginate(matching, &request)
    }
}

/// Experiments keyed by environment id.
#[derive(Default)]
pub struct MemoryExperimentStore {
    experiments: Mutex<HashMap<String, Vec<Experiment>>>,
}

impl MemoryExperimentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_experiment(&self, environment_id: &str, experiment: Experiment) {
        self.experiments
            .lock()
            .unwrap()
            .entry(environment_id.to_string())
            .or_default()
            .push(experiment);
    }
}

#[async_trait]
impl ExperimentStore for MemoryExperimentStore {
    async fn list_experiments(
        &self,
        environment_id: &str,
        request: ListRequest,
        filter: &ExperimentFilter,
    ) -> Result<Page<Experiment>, StoreError> {
        let matching: Vec<Experiment> = self
            .experiments
            .lock()
            .unwrap()
            .get(environment_id)
            .into_iter()
            .flatten()
            .filter(|e| filter.statuses.is_empty() || filter.statuses.contains(&e.status))
            .cloned()
            .collect();
        paginate(matching, &request)
    }
}

/// Monthly usage keyed by `(environment id, YYYYMM)`.
#[derive(Default)]
pub struct MemoryUsageStore {
    counts: Mutex<HashMap<(String, String), MauCount>>,
    requests: Mutex<Vec<(String, String)>>,
}

impl MemoryUsageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_count(&self, environment_id: &str, year_month: &str, count: MauCount) {
        self.counts
            .lock()
            .unwrap()
            .insert((environment_id.to_string(), year_month.to_string()), count);
    }

    /// The `(environment id, YYYYMM)` pairs requested so far.
    pub fn requests(&self) -> Vec<(String, String)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl UsageStore for MemoryUsageStore {
    async fn get_mau_count(
        &self,
        environment_id: &str,
        year_month: &str,
    ) -> Result<MauCount, StoreError> {
        let key = (environment_id.to_string(), year_month.to_string());
        self.requests.lock().unwrap().push(key.clone());
        Ok(self
            .counts
            .lock()
            .unwrap()
            .get(&key)
            .copied()
            .unwrap_or_default())
    }
}

/// Subscriptions; admin-scope ones have an empty environment id.
#[derive(Default)]
pub struct MemorySubscriptionStore {
    subscriptions: Mutex<Vec<Subscription>>,
    list_error: Mutex<Option<StoreError>>,
    list_calls: AtomicUsize,
}

impl MemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_subscription(&self, subscription: Subscription) {
        self.subscriptions.lock().unwrap().push(subscription);
    }

    pub fn fail_lists_with(&self, error: StoreError) {
        *self.list_error.lock().unwrap() = Some(error);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    fn matching(
        &self,
        environment_id: &str,
        source_types: &[SourceType],
    ) -> Result<Vec<Subscription>, StoreError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.list_error.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(self
            .subscriptions
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.enabled && s.environment_id == environment_id)
            .filter(|s| s.source_types.iter().any(|st| source_types.contains(st)))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SubscriptionStore for MemorySubscriptionStore {
    async fn list_enabled_subscriptions(
        &self,
        environment_id: &str,
        source_types: &[SourceType],
        request: ListRequest,
    ) -> Result<Page<Subscription>, StoreError> {
        paginate(self.matching(environment_id, source_types)?, &request)
    }

    async fn list_enabled_admin_subscriptions(
        &self,
        source_types: &[SourceType],
        request: ListRequest,
    ) -> Result<Page<Subscription>, StoreError> {
        paginate(self.matching("", source_types)?, &request)
    }
}
