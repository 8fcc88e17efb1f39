//! Keyed values produced by a source and refreshed on a recurrence.
//!
//! A transient is registered once with the source that computes it. Reads
//! return the stored value and fall back to running the source when nothing
//! is stored yet; [`TransientRegistry::spawn_refresh`] keeps every entry
//! fresh in the background. Concurrent misses on the same key each run the
//! source; there is no single-flight coordination.

use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::lock::RecoverLock;

const SOURCE: &str = "cache::transient";
const TARGET: &str = "pinfeed::transient";

pub const METRIC_TRANSIENT_REFRESH: &str = "pinfeed_transient_refresh_total";

#[derive(Debug, Error)]
pub enum TransientError {
    #[error("invalid transient key `{0}`")]
    InvalidKey(String),
    #[error("transient `{0}` is already registered")]
    Duplicate(String),
    #[error("transient `{0}` is not registered")]
    UnknownKey(String),
    #[error("invalid transient recurrence `{0}`")]
    InvalidRecurrence(String),
    #[error("transient source failed: {0}")]
    Source(#[source] Box<dyn StdError + Send + Sync>),
}

impl TransientError {
    pub fn source_failure(err: impl StdError + Send + Sync + 'static) -> Self {
        Self::Source(Box::new(err))
    }
}

/// How often a transient is recomputed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recurrence {
    Hourly,
    TwiceDaily,
    Daily,
    Every(Duration),
}

impl Recurrence {
    pub fn interval(self) -> Duration {
        match self {
            Recurrence::Hourly => Duration::from_secs(60 * 60),
            Recurrence::TwiceDaily => Duration::from_secs(12 * 60 * 60),
            Recurrence::Daily => Duration::from_secs(24 * 60 * 60),
            Recurrence::Every(interval) => interval,
        }
    }
}

impl FromStr for Recurrence {
    type Err = TransientError;

    /// Accepts `hourly`, `twicedaily`, `daily`, or a number of seconds.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "hourly" => Ok(Recurrence::Hourly),
            "twicedaily" => Ok(Recurrence::TwiceDaily),
            "daily" => Ok(Recurrence::Daily),
            other => match other.parse::<u64>() {
                Ok(seconds) if seconds > 0 => Ok(Recurrence::Every(Duration::from_secs(seconds))),
                _ => Err(TransientError::InvalidRecurrence(raw.to_string())),
            },
        }
    }
}

impl fmt::Display for Recurrence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recurrence::Hourly => f.write_str("hourly"),
            Recurrence::TwiceDaily => f.write_str("twicedaily"),
            Recurrence::Daily => f.write_str("daily"),
            Recurrence::Every(interval) => write!(f, "{}", interval.as_secs()),
        }
    }
}

/// Computes the value of a transient.
#[async_trait]
pub trait TransientSource<T>: Send + Sync {
    async fn load(&self) -> Result<T, TransientError>;
}

/// Lowercase ASCII alphanumerics, `_` and `-`; everything else is dropped.
pub fn sanitize_key(raw: &str) -> String {
    raw.chars()
        .map(|ch| ch.to_ascii_lowercase())
        .filter(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || *ch == '_' || *ch == '-')
        .collect()
}

struct TransientEntry<T> {
    source: Arc<dyn TransientSource<T>>,
    recurrence: Recurrence,
    value: RwLock<Option<T>>,
}

pub struct TransientRegistry<T> {
    entries: RwLock<HashMap<String, Arc<TransientEntry<T>>>>,
}

impl<T> Default for TransientRegistry<T> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<T> TransientRegistry<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `source` under the sanitized form of `key`, which is returned.
    pub fn register(
        &self,
        key: &str,
        source: Arc<dyn TransientSource<T>>,
        recurrence: Recurrence,
    ) -> Result<String, TransientError> {
        let sanitized = sanitize_key(key);
        if sanitized.is_empty() {
            return Err(TransientError::InvalidKey(key.to_string()));
        }

        let mut entries = self.entries.write_or_recover(SOURCE, "register");
        if entries.contains_key(&sanitized) {
            return Err(TransientError::Duplicate(sanitized));
        }

        entries.insert(
            sanitized.clone(),
            Arc::new(TransientEntry {
                source,
                recurrence,
                value: RwLock::new(None),
            }),
        );
        Ok(sanitized)
    }

    pub fn is_registered(&self, key: &str) -> bool {
        self.entries
            .read_or_recover(SOURCE, "is_registered")
            .contains_key(&sanitize_key(key))
    }

    fn entry(&self, key: &str) -> Result<(String, Arc<TransientEntry<T>>), TransientError> {
        let sanitized = sanitize_key(key);
        self.entries
            .read_or_recover(SOURCE, "entry")
            .get(&sanitized)
            .cloned()
            .map(|entry| (sanitized, entry))
            .ok_or_else(|| TransientError::UnknownKey(key.to_string()))
    }

    /// Stored value, computing it first when nothing is stored.
    pub async fn get(&self, key: &str) -> Result<T, TransientError> {
        let (sanitized, entry) = self.entry(key)?;
        if let Some(value) = entry.value.read_or_recover(SOURCE, "get").clone() {
            return Ok(value);
        }

        debug!(target = TARGET, key = %sanitized, "transient miss");
        Self::refresh(&sanitized, &entry).await
    }

    /// Recompute the value now, replacing whatever was stored.
    pub async fn update(&self, key: &str) -> Result<T, TransientError> {
        let (sanitized, entry) = self.entry(key)?;
        Self::refresh(&sanitized, &entry).await
    }

    async fn refresh(key: &str, entry: &TransientEntry<T>) -> Result<T, TransientError> {
        let value = entry.source.load().await?;
        *entry.value.write_or_recover(SOURCE, "refresh") = Some(value.clone());
        counter!(METRIC_TRANSIENT_REFRESH).increment(1);
        debug!(target = TARGET, key, "transient refreshed");
        Ok(value)
    }

    /// Spawn one task per registered transient that recomputes it on its
    /// recurrence. The first refresh happens one interval from now.
    pub fn spawn_refresh(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let snapshot: Vec<(String, Recurrence)> = self
            .entries
            .read_or_recover(SOURCE, "spawn_refresh")
            .iter()
            .map(|(key, entry)| (key.clone(), entry.recurrence))
            .collect();

        snapshot
            .into_iter()
            .map(|(key, recurrence)| {
                let registry = Arc::clone(self);
                tokio::spawn(async move {
                    let mut interval = tokio::time::interval(recurrence.interval());
                    interval.tick().await; // Skip the first immediate tick
                    loop {
                        interval.tick().await;
                        if let Err(err) = registry.update(&key).await {
                            warn!(
                                target = TARGET,
                                key = %key,
                                error = %err,
                                "background transient refresh failed"
                            );
                        }
                    }
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct CountingSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TransientSource<usize> for CountingSource {
        async fn load(&self) -> Result<usize, TransientError> {
            Ok(self.calls.fetch_add(1, Ordering::SeqCst) + 1)
        }
    }

    fn counting() -> Arc<CountingSource> {
        Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
        })
    }

    #[test]
    fn keys_are_sanitized() {
        assert_eq!(sanitize_key("Front Page/Home_1-a!"), "frontpagehome_1-a");
        assert_eq!(sanitize_key("???"), "");
    }

    #[test]
    fn recurrence_parses_named_schedules_and_seconds() {
        assert_eq!("hourly".parse::<Recurrence>().ok(), Some(Recurrence::Hourly));
        assert_eq!(
            " TwiceDaily ".parse::<Recurrence>().ok(),
            Some(Recurrence::TwiceDaily)
        );
        assert_eq!(
            "90".parse::<Recurrence>().ok(),
            Some(Recurrence::Every(Duration::from_secs(90)))
        );
        assert!(matches!(
            "weekly".parse::<Recurrence>(),
            Err(TransientError::InvalidRecurrence(_))
        ));
        assert!("0".parse::<Recurrence>().is_err());
    }

    #[test]
    fn registration_rejects_empty_and_duplicate_keys() {
        let registry = TransientRegistry::<usize>::new();

        assert!(matches!(
            registry.register("!!", counting(), Recurrence::Hourly),
            Err(TransientError::InvalidKey(_))
        ));

        let key = registry
            .register("Home Feed", counting(), Recurrence::Hourly)
            .expect("registered");
        assert_eq!(key, "homefeed");
        assert!(registry.is_registered("HOME feed"));

        assert!(matches!(
            registry.register("homefeed", counting(), Recurrence::Daily),
            Err(TransientError::Duplicate(_))
        ));
    }

    #[tokio::test]
    async fn get_computes_once_and_update_recomputes() {
        let registry = TransientRegistry::<usize>::new();
        let source = counting();
        registry
            .register("home", source.clone(), Recurrence::Hourly)
            .expect("registered");

        assert_eq!(registry.get("home").await.expect("value"), 1);
        assert_eq!(registry.get("home").await.expect("value"), 1);
        assert_eq!(registry.update("home").await.expect("value"), 2);
        assert_eq!(registry.get("home").await.expect("value"), 2);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unknown_keys_are_reported() {
        let registry = TransientRegistry::<usize>::new();
        assert!(matches!(
            registry.get("missing").await,
            Err(TransientError::UnknownKey(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn background_refresh_runs_on_recurrence() {
        let registry = Arc::new(TransientRegistry::<usize>::new());
        let source = counting();
        registry
            .register(
                "home",
                source.clone(),
                Recurrence::Every(Duration::from_secs(10)),
            )
            .expect("registered");

        let handles = registry.spawn_refresh();
        assert_eq!(handles.len(), 1);

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert_eq!(registry.get("home").await.expect("value"), 2);

        for handle in handles {
            handle.abort();
        }
    }
}
