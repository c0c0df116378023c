//! Status queries over the lifecycle mapping
//!
//! The free functions are plain reads. The `*Selector` types are bound to one
//! operation key at construction and memoise their last result, keyed on the
//! identity of the operation type's record table. Since the reducer updates
//! tables copy-on-write, notifications for other operation types never
//! invalidate a selector.
//!
//! All queries accept any [`HasAsyncActions`] state; a state without a
//! lifecycle mapping reads as empty.

use crate::error::ErrorInfo;
use crate::state::{HasAsyncActions, OperationRecords, StatusRecord};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

fn table<S>(state: &S, operation_type: &str) -> Option<Arc<OperationRecords<S::Payload>>>
where
    S: HasAsyncActions + ?Sized,
{
    state
        .async_actions()
        .and_then(|actions| actions.records(operation_type))
        .map(Arc::clone)
}

fn lookup<'a, P>(
    records: Option<&'a OperationRecords<P>>,
    identifier: Option<&str>,
) -> Option<&'a StatusRecord<P>> {
    records?.get(identifier.unwrap_or_default())
}

fn pending_in<P>(
    records: Option<&OperationRecords<P>>,
    identifier: Option<&str>,
    default_if_unknown: bool,
) -> bool {
    match records {
        None => default_if_unknown,
        Some(_) => lookup(records, identifier).is_some_and(|r| r.pending),
    }
}

fn initial_pending_in<P>(
    records: Option<&OperationRecords<P>>,
    identifier: Option<&str>,
    default_if_unknown: bool,
) -> bool {
    lookup(records, identifier).map_or(default_if_unknown, |r| r.pending && !r.completed)
}

fn error_in<P>(records: Option<&OperationRecords<P>>, identifier: Option<&str>) -> Option<ErrorInfo> {
    lookup(records, identifier).and_then(|r| r.error.clone())
}

fn all_pending_in<P>(records: Option<&OperationRecords<P>>) -> Vec<String> {
    records
        .map(|records| {
            records
                .iter()
                .filter(|(_, record)| record.pending)
                .map(|(identifier, _)| identifier.clone())
                .collect()
        })
        .unwrap_or_default()
}

fn cached_in<P: Clone>(
    records: Option<&OperationRecords<P>>,
    identifier: Option<&str>,
    ttl_seconds: Option<u64>,
    now_epoch_seconds: i64,
) -> Option<P> {
    lookup(records, identifier)
        .and_then(|r| r.cached_response.as_ref())
        .filter(|cached| cached.is_fresh(ttl_seconds, now_epoch_seconds))
        .map(|cached| cached.value.clone())
}

/// True if the key's record is pending
///
/// Returns `default_if_unknown` when the operation type has never been
/// recorded; a known type without a record for this identifier is not pending.
pub fn is_pending<S>(
    state: &S,
    operation_type: &str,
    identifier: Option<&str>,
    default_if_unknown: bool,
) -> bool
where
    S: HasAsyncActions + ?Sized,
{
    let records = table(state, operation_type);
    pending_in(records.as_deref(), identifier, default_if_unknown)
}

/// True if the key is pending and has never completed
///
/// Tells a first load apart from a refresh. Returns `default_if_unknown` when
/// the key has no record.
pub fn is_initial_request_pending<S>(
    state: &S,
    operation_type: &str,
    identifier: Option<&str>,
    default_if_unknown: bool,
) -> bool
where
    S: HasAsyncActions + ?Sized,
{
    let records = table(state, operation_type);
    initial_pending_in(records.as_deref(), identifier, default_if_unknown)
}

/// The normalised error of the key's last failure
pub fn error<S>(state: &S, operation_type: &str, identifier: Option<&str>) -> Option<ErrorInfo>
where
    S: HasAsyncActions + ?Sized,
{
    let records = table(state, operation_type);
    error_in(records.as_deref(), identifier)
}

/// Identifiers of every pending record of an operation type, in insertion order
pub fn all_pending_identifiers<S>(state: &S, operation_type: &str) -> Vec<String>
where
    S: HasAsyncActions + ?Sized,
{
    let records = table(state, operation_type);
    all_pending_in(records.as_deref())
}

/// The key's cached response, if present and fresh
///
/// With `ttl_seconds`, an entry is fresh while
/// `now_epoch_seconds - captured_at_epoch_seconds < ttl_seconds`.
pub fn cached_value<S>(
    state: &S,
    operation_type: &str,
    identifier: Option<&str>,
    ttl_seconds: Option<u64>,
    now_epoch_seconds: i64,
) -> Option<S::Payload>
where
    S: HasAsyncActions + ?Sized,
    S::Payload: Clone,
{
    let records = table(state, operation_type);
    cached_in(records.as_deref(), identifier, ttl_seconds, now_epoch_seconds)
}

/// Last input and output of a memoised selector
struct Memo<P, O> {
    input: Option<Weak<OperationRecords<P>>>,
    stamp: i64,
    output: O,
}

impl<P, O> Memo<P, O> {
    fn matches(&self, input: Option<&Arc<OperationRecords<P>>>, stamp: i64) -> bool {
        let same_table = match (&self.input, input) {
            (None, None) => true,
            (Some(last), Some(current)) => std::ptr::eq(last.as_ptr(), Arc::as_ptr(current)),
            _ => false,
        };
        same_table && self.stamp == stamp
    }
}

/// Single-entry cache shared by the selector types
///
/// Holds only a weak reference to the last table, so it never forces the
/// reducer to copy a table it would otherwise update in place.
struct Memoized<P, O> {
    last: Mutex<Option<Memo<P, O>>>,
    recomputations: AtomicUsize,
}

impl<P, O: Clone> Memoized<P, O> {
    const fn new() -> Self {
        Self {
            last: Mutex::new(None),
            recomputations: AtomicUsize::new(0),
        }
    }

    fn get_or_compute<F>(&self, input: Option<Arc<OperationRecords<P>>>, stamp: i64, compute: F) -> O
    where
        F: FnOnce(Option<&OperationRecords<P>>) -> O,
    {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(memo) = last.as_ref().filter(|memo| memo.matches(input.as_ref(), stamp)) {
            return memo.output.clone();
        }

        self.recomputations.fetch_add(1, Ordering::Relaxed);
        let output = compute(input.as_deref());
        *last = Some(Memo {
            input: input.as_ref().map(Arc::downgrade),
            stamp,
            output: output.clone(),
        });
        output
    }

    fn recomputations(&self) -> usize {
        self.recomputations.load(Ordering::Relaxed)
    }
}

impl<P, O> std::fmt::Debug for Memoized<P, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memoized")
            .field("recomputations", &self.recomputations.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Memoised [`is_pending`] bound to one key
///
/// ```
/// use async_lifecycle_core::selectors::IsPendingSelector;
/// use async_lifecycle_core::{AsyncActionState, StatusRecord};
///
/// let selector = IsPendingSelector::new("GET_FOOS", Some("foo"), false);
/// let state = AsyncActionState::<()>::new().with_record("GET_FOOS", Some("foo"), StatusRecord::pending());
///
/// assert!(selector.select(&state));
/// assert!(selector.select(&state));
/// assert_eq!(selector.recomputations(), 1);
/// ```
#[derive(Debug)]
pub struct IsPendingSelector<P> {
    operation_type: String,
    identifier: Option<String>,
    default_if_unknown: bool,
    memo: Memoized<P, bool>,
}

impl<P> IsPendingSelector<P> {
    /// Bind the selector to a key
    #[must_use]
    pub fn new(operation_type: impl Into<String>, identifier: Option<&str>, default_if_unknown: bool) -> Self {
        Self {
            operation_type: operation_type.into(),
            identifier: identifier.map(str::to_owned),
            default_if_unknown,
            memo: Memoized::new(),
        }
    }

    /// Evaluate against `state`
    pub fn select<S>(&self, state: &S) -> bool
    where
        S: HasAsyncActions<Payload = P> + ?Sized,
    {
        self.memo.get_or_compute(table(state, &self.operation_type), 0, |records| {
            pending_in(records, self.identifier.as_deref(), self.default_if_unknown)
        })
    }

    /// How many times the result was computed rather than reused
    #[must_use]
    pub fn recomputations(&self) -> usize {
        self.memo.recomputations()
    }
}

/// Memoised [`is_initial_request_pending`] bound to one key
#[derive(Debug)]
pub struct IsInitialRequestPendingSelector<P> {
    operation_type: String,
    identifier: Option<String>,
    default_if_unknown: bool,
    memo: Memoized<P, bool>,
}

impl<P> IsInitialRequestPendingSelector<P> {
    /// Bind the selector to a key
    #[must_use]
    pub fn new(operation_type: impl Into<String>, identifier: Option<&str>, default_if_unknown: bool) -> Self {
        Self {
            operation_type: operation_type.into(),
            identifier: identifier.map(str::to_owned),
            default_if_unknown,
            memo: Memoized::new(),
        }
    }

    /// Evaluate against `state`
    pub fn select<S>(&self, state: &S) -> bool
    where
        S: HasAsyncActions<Payload = P> + ?Sized,
    {
        self.memo.get_or_compute(table(state, &self.operation_type), 0, |records| {
            initial_pending_in(records, self.identifier.as_deref(), self.default_if_unknown)
        })
    }

    /// How many times the result was computed rather than reused
    #[must_use]
    pub fn recomputations(&self) -> usize {
        self.memo.recomputations()
    }
}

/// Memoised [`error`] bound to one key
#[derive(Debug)]
pub struct ErrorSelector<P> {
    operation_type: String,
    identifier: Option<String>,
    memo: Memoized<P, Option<ErrorInfo>>,
}

impl<P> ErrorSelector<P> {
    /// Bind the selector to a key
    #[must_use]
    pub fn new(operation_type: impl Into<String>, identifier: Option<&str>) -> Self {
        Self {
            operation_type: operation_type.into(),
            identifier: identifier.map(str::to_owned),
            memo: Memoized::new(),
        }
    }

    /// Evaluate against `state`
    pub fn select<S>(&self, state: &S) -> Option<ErrorInfo>
    where
        S: HasAsyncActions<Payload = P> + ?Sized,
    {
        self.memo.get_or_compute(table(state, &self.operation_type), 0, |records| {
            error_in(records, self.identifier.as_deref())
        })
    }

    /// How many times the result was computed rather than reused
    #[must_use]
    pub fn recomputations(&self) -> usize {
        self.memo.recomputations()
    }
}

/// Memoised [`all_pending_identifiers`] bound to one operation type
#[derive(Debug)]
pub struct AllPendingSelector<P> {
    operation_type: String,
    memo: Memoized<P, Vec<String>>,
}

impl<P> AllPendingSelector<P> {
    /// Bind the selector to an operation type
    #[must_use]
    pub fn new(operation_type: impl Into<String>) -> Self {
        Self {
            operation_type: operation_type.into(),
            memo: Memoized::new(),
        }
    }

    /// Evaluate against `state`
    pub fn select<S>(&self, state: &S) -> Vec<String>
    where
        S: HasAsyncActions<Payload = P> + ?Sized,
    {
        self.memo
            .get_or_compute(table(state, &self.operation_type), 0, all_pending_in)
    }

    /// How many times the result was computed rather than reused
    #[must_use]
    pub fn recomputations(&self) -> usize {
        self.memo.recomputations()
    }
}

/// Memoised [`cached_value`] bound to one key and TTL
///
/// Also keyed on the evaluation time, since freshness depends on it.
#[derive(Debug)]
pub struct CachedResponseSelector<P> {
    operation_type: String,
    identifier: Option<String>,
    ttl_seconds: Option<u64>,
    memo: Memoized<P, Option<P>>,
}

impl<P: Clone> CachedResponseSelector<P> {
    /// Bind the selector to a key and TTL
    #[must_use]
    pub fn new(operation_type: impl Into<String>, identifier: Option<&str>, ttl_seconds: Option<u64>) -> Self {
        Self {
            operation_type: operation_type.into(),
            identifier: identifier.map(str::to_owned),
            ttl_seconds,
            memo: Memoized::new(),
        }
    }

    /// Evaluate against `state` at `now_epoch_seconds`
    pub fn select<S>(&self, state: &S, now_epoch_seconds: i64) -> Option<P>
    where
        S: HasAsyncActions<Payload = P> + ?Sized,
    {
        self.memo.get_or_compute(
            table(state, &self.operation_type),
            now_epoch_seconds,
            |records| cached_in(records, self.identifier.as_deref(), self.ttl_seconds, now_epoch_seconds),
        )
    }

    /// How many times the result was computed rather than reused
    #[must_use]
    pub fn recomputations(&self) -> usize {
        self.memo.recomputations()
    }
}
