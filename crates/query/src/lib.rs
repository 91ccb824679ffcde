#![forbid(unsafe_code)]

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};

use machine_monitor_observe::NoopSink;
use machine_monitor_types::{
    FetchError, FilterValue, Filters, Observation, ObservabilitySink, Page, QueryRequest,
    SortDirection,
};
use serde::Serialize;

pub type FetchFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, FetchError>> + Send + 'a>>;

/// Loads one page of a resource. Implementations own transport and decoding.
pub trait Fetcher: Send + Sync {
    type Item: Send;

    fn fetch(&self, request: QueryRequest) -> FetchFuture<'_, Page<Self::Item>>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoordinatorError {
    #[error("{resource} query state lock poisoned")]
    StatePoisoned { resource: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryDefaults {
    pub filters: Filters,
    pub sort_field: String,
    pub sort_direction: SortDirection,
    pub page: u64,
    pub page_size: u64,
}

impl QueryDefaults {
    pub fn new(sort_field: impl Into<String>, page_size: u64) -> Self {
        Self {
            filters: Filters::new(),
            sort_field: sort_field.into(),
            sort_direction: SortDirection::Desc,
            page: 1,
            page_size,
        }
    }

    pub fn with_direction(mut self, sort_direction: SortDirection) -> Self {
        self.sort_direction = sort_direction;
        self
    }

    pub fn with_filters(mut self, filters: Filters) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_page(mut self, page: u64) -> Self {
        self.page = page;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    Idle,
    Loading,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryState<T> {
    pub filters: Filters,
    pub sort_field: String,
    pub sort_direction: SortDirection,
    pub page: u64,
    pub page_size: u64,
    pub total: u64,
    pub items: Vec<T>,
    pub loading: bool,
    pub error: Option<String>,
    pub request_token: u64,
}

impl<T> QueryState<T> {
    fn initial(defaults: &QueryDefaults, request_token: u64) -> Self {
        Self {
            filters: defaults.filters.clone(),
            sort_field: defaults.sort_field.clone(),
            sort_direction: defaults.sort_direction,
            page: defaults.page,
            page_size: defaults.page_size,
            total: 0,
            items: Vec::new(),
            loading: false,
            error: None,
            request_token,
        }
    }

    /// Loading wins over a stored error while a request is in flight.
    pub fn status(&self) -> QueryStatus {
        if self.loading {
            QueryStatus::Loading
        } else if self.error.is_some() {
            QueryStatus::Error
        } else {
            QueryStatus::Idle
        }
    }

    pub fn request(&self) -> QueryRequest {
        QueryRequest {
            filters: self.filters.clone(),
            page: self.page,
            page_size: self.page_size,
            sort_field: self.sort_field.clone(),
            sort_direction: self.sort_direction,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchOutcome {
    Applied,
    Failed,
    /// A newer request was issued while this one was in flight.
    Stale,
}

/// Owns the filter/sort/page state of one list resource and applies only the
/// newest response. Clones share state, so a handle can be moved into tasks.
pub struct QueryCoordinator<T> {
    resource: String,
    fetcher: Arc<dyn Fetcher<Item = T>>,
    sink: Arc<dyn ObservabilitySink>,
    defaults: QueryDefaults,
    state: Arc<Mutex<QueryState<T>>>,
}

impl<T> Clone for QueryCoordinator<T> {
    fn clone(&self) -> Self {
        Self {
            resource: self.resource.clone(),
            fetcher: Arc::clone(&self.fetcher),
            sink: Arc::clone(&self.sink),
            defaults: self.defaults.clone(),
            state: Arc::clone(&self.state),
        }
    }
}

impl<T> QueryCoordinator<T>
where
    T: Clone + Send + 'static,
{
    /// Sets the initial state without fetching. Page and page size are
    /// clamped to at least one.
    pub fn new(fetcher: Arc<dyn Fetcher<Item = T>>, mut defaults: QueryDefaults) -> Self {
        defaults.page = defaults.page.max(1);
        defaults.page_size = defaults.page_size.max(1);
        let state = QueryState::initial(&defaults, 0);
        Self {
            resource: "query".to_string(),
            fetcher,
            sink: Arc::new(NoopSink),
            defaults,
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = resource.into();
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn ObservabilitySink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn defaults(&self) -> &QueryDefaults {
        &self.defaults
    }

    pub fn snapshot(&self) -> Result<QueryState<T>, CoordinatorError> {
        Ok(self.lock_state()?.clone())
    }

    pub async fn fetch(&self) -> Result<FetchOutcome, CoordinatorError> {
        let (token, request) = {
            let mut state = self.lock_state()?;
            state.request_token = state.request_token.saturating_add(1);
            state.loading = true;
            state.error = None;
            (state.request_token, state.request())
        };

        let in_flight = InFlight {
            state: self.state.as_ref(),
            token,
            settled: false,
        };
        let result = self.fetcher.fetch(request).await;
        in_flight.settle();

        let mut state = self.lock_state()?;
        let current_token = state.request_token;
        if current_token != token {
            drop(state);
            self.sink.observe(&Observation::StaleResponseDropped {
                resource: &self.resource,
                token,
                current_token,
            });
            return Ok(FetchOutcome::Stale);
        }

        match result {
            Ok(page) => {
                state.items = page.items;
                state.total = page.total;
                state.loading = false;
                Ok(FetchOutcome::Applied)
            }
            Err(error) => {
                let message = error.to_string();
                state.error = Some(message.clone());
                state.loading = false;
                drop(state);
                self.sink.observe(&Observation::FetchFailed {
                    resource: &self.resource,
                    token,
                    error: &message,
                });
                Ok(FetchOutcome::Failed)
            }
        }
    }

    /// Blank text values are dropped; flags and numbers always pass.
    pub async fn submit_search(&self, filters: Filters) -> Result<FetchOutcome, CoordinatorError> {
        {
            let mut state = self.lock_state()?;
            state.filters = filters
                .into_iter()
                .filter(|(_, value)| !FilterValue::is_blank(value))
                .collect();
            state.page = 1;
        }
        self.fetch().await
    }

    pub async fn clear_search(&self) -> Result<FetchOutcome, CoordinatorError> {
        {
            let mut state = self.lock_state()?;
            state.filters.clear();
            state.page = 1;
        }
        self.fetch().await
    }

    /// A new page size restarts from the first page; otherwise `page` is
    /// adopted as given.
    pub async fn change_page(
        &self,
        page: u64,
        page_size: u64,
    ) -> Result<FetchOutcome, CoordinatorError> {
        {
            let mut state = self.lock_state()?;
            let page_size = page_size.max(1);
            if page_size != state.page_size {
                state.page_size = page_size;
                state.page = 1;
            } else {
                state.page = page.max(1);
            }
        }
        self.fetch().await
    }

    /// Selecting the current field toggles the direction; a new field starts
    /// descending on the first page.
    pub async fn change_sort(&self, field: &str) -> Result<FetchOutcome, CoordinatorError> {
        {
            let mut state = self.lock_state()?;
            if state.sort_field == field {
                state.sort_direction = state.sort_direction.toggled();
            } else {
                state.sort_field = field.to_string();
                state.sort_direction = SortDirection::Desc;
                state.page = 1;
            }
        }
        self.fetch().await
    }

    /// Restores the defaults and invalidates any request still in flight.
    pub fn reset(&self) -> Result<(), CoordinatorError> {
        let mut state = self.lock_state()?;
        let request_token = state.request_token.saturating_add(1);
        *state = QueryState::initial(&self.defaults, request_token);
        Ok(())
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, QueryState<T>>, CoordinatorError> {
        self.state
            .lock()
            .map_err(|_| CoordinatorError::StatePoisoned {
                resource: self.resource.clone(),
            })
    }
}

/// Clears `loading` when a `fetch()` future is dropped before its response
/// arrives, unless a newer request has taken over the state.
struct InFlight<'a, T> {
    state: &'a Mutex<QueryState<T>>,
    token: u64,
    settled: bool,
}

impl<T> InFlight<'_, T> {
    fn settle(mut self) {
        self.settled = true;
    }
}

impl<T> Drop for InFlight<'_, T> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        if state.request_token == self.token {
            state.loading = false;
        }
    }
}
