//! In-memory look-aside cache with Redis string, sorted-set and expiry
//! semantics.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lookaside_core::{CacheError, CacheResult};

use super::traits::{CacheCommand, CacheReply, LookasideCache, Pipeline};

#[derive(Debug, Clone)]
enum Data {
    Str(String),
    /// Kept sorted by (score, member), as Redis orders ties lexicographically.
    ZSet(Vec<(f64, String)>),
}

#[derive(Debug, Clone)]
struct Entry {
    data: Data,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-memory [`LookasideCache`].
///
/// A pipeline runs under a single lock, so it is atomic with respect to other
/// pipelines. Connectivity and failure can be toggled to exercise the
/// fallback paths.
#[derive(Debug)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
    connected: AtomicBool,
    failing: AtomicBool,
    commands: AtomicU64,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            connected: AtomicBool::new(true),
            failing: AtomicBool::new(false),
            commands: AtomicU64::new(0),
        }
    }
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// While failing, every pipeline errors without touching the data.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Commands executed so far, failed pipelines excluded.
    pub fn commands_executed(&self) -> u64 {
        self.commands.load(Ordering::SeqCst)
    }

    /// Whether a live entry exists at `key`.
    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        self.entries
            .lock()
            .map(|entries| entries.get(key).is_some_and(|e| !e.is_expired(now)))
            .unwrap_or(false)
    }

    /// Drop `key` behind the data-access layer's back.
    pub fn remove_key(&self, key: &str) -> bool {
        self.entries
            .lock()
            .map(|mut entries| entries.remove(key).is_some())
            .unwrap_or(false)
    }

    /// Live keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .entries
            .lock()
            .map(|entries| {
                entries
                    .iter()
                    .filter(|(_, e)| !e.is_expired(now))
                    .map(|(k, _)| k.clone())
                    .collect()
            })
            .unwrap_or_default();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.keys().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }
}

#[async_trait]
impl LookasideCache for MemoryCache {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn execute(&self, pipeline: Pipeline) -> CacheResult<Vec<CacheReply>> {
        if !self.is_connected() {
            return Err(CacheError::Disconnected);
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(CacheError::Command {
                reason: "injected failure".to_string(),
            });
        }

        let mut entries = self.entries.lock().map_err(|_| CacheError::Command {
            reason: "cache lock poisoned".to_string(),
        })?;
        let now = Instant::now();
        entries.retain(|_, entry| !entry.is_expired(now));

        // Run against a scratch copy so a failing command leaves no partial
        // effects behind.
        let mut scratch = entries.clone();
        let commands = pipeline.into_commands();
        let mut replies = Vec::with_capacity(commands.len());
        for command in commands {
            replies.push(apply(&mut scratch, command, now)?);
        }
        self.commands
            .fetch_add(replies.len() as u64, Ordering::SeqCst);
        *entries = scratch;
        Ok(replies)
    }
}

fn apply(
    entries: &mut HashMap<String, Entry>,
    command: CacheCommand,
    now: Instant,
) -> CacheResult<CacheReply> {
    match command {
        CacheCommand::Get { key } => match entries.get(&key) {
            None => Ok(CacheReply::Nil),
            Some(Entry {
                data: Data::Str(value),
                ..
            }) => Ok(CacheReply::Value(value.clone())),
            Some(_) => Err(CacheError::WrongType { key }),
        },
        CacheCommand::Set { key, value, ttl } => {
            entries.insert(
                key,
                Entry {
                    data: Data::Str(value),
                    expires_at: ttl.map(|ttl| now + ttl),
                },
            );
            Ok(CacheReply::Ok)
        }
        CacheCommand::Del { key } => Ok(CacheReply::Integer(i64::from(
            entries.remove(&key).is_some(),
        ))),
        CacheCommand::ZAdd { key, members } => {
            let entry = entries.entry(key.clone()).or_insert_with(|| Entry {
                data: Data::ZSet(Vec::new()),
                expires_at: None,
            });
            let Data::ZSet(set) = &mut entry.data else {
                return Err(CacheError::WrongType { key });
            };
            let mut added = 0;
            for (score, member) in members {
                match set.iter().position(|(_, m)| *m == member) {
                    Some(i) => set[i].0 = score,
                    None => {
                        set.push((score, member));
                        added += 1;
                    }
                }
            }
            set.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
            Ok(CacheReply::Integer(added))
        }
        CacheCommand::ZRange {
            key,
            start,
            stop,
            with_scores,
        } => {
            let set = match entries.get(&key) {
                None => return Ok(empty_range(with_scores)),
                Some(Entry {
                    data: Data::ZSet(set),
                    ..
                }) => set,
                Some(_) => return Err(CacheError::WrongType { key }),
            };
            let Some((from, to)) = resolve_range(set.len(), start, stop) else {
                return Ok(empty_range(with_scores));
            };
            let slice = &set[from..=to];
            Ok(if with_scores {
                CacheReply::Scored(slice.iter().map(|(s, m)| (m.clone(), *s)).collect())
            } else {
                CacheReply::Members(slice.iter().map(|(_, m)| m.clone()).collect())
            })
        }
        CacheCommand::ZRemRangeByRank { key, start, stop } => {
            let set = match entries.get_mut(&key) {
                None => return Ok(CacheReply::Integer(0)),
                Some(Entry {
                    data: Data::ZSet(set),
                    ..
                }) => set,
                Some(_) => return Err(CacheError::WrongType { key }),
            };
            let Some((from, to)) = resolve_range(set.len(), start, stop) else {
                return Ok(CacheReply::Integer(0));
            };
            set.drain(from..=to);
            if set.is_empty() {
                entries.remove(&key);
            }
            Ok(CacheReply::Integer((to - from + 1) as i64))
        }
        CacheCommand::Expire { key, ttl } => {
            if !entries.contains_key(&key) {
                return Ok(CacheReply::Integer(0));
            }
            if ttl.is_zero() {
                entries.remove(&key);
            } else if let Some(entry) = entries.get_mut(&key) {
                entry.expires_at = Some(now + ttl);
            }
            Ok(CacheReply::Integer(1))
        }
        CacheCommand::Ttl { key } => Ok(CacheReply::Integer(match entries.get(&key) {
            None => -2,
            Some(Entry {
                expires_at: None, ..
            }) => -1,
            Some(Entry {
                expires_at: Some(at),
                ..
            }) => round_secs(at.saturating_duration_since(now)),
        })),
    }
}

fn empty_range(with_scores: bool) -> CacheReply {
    if with_scores {
        CacheReply::Scored(Vec::new())
    } else {
        CacheReply::Members(Vec::new())
    }
}

/// Resolve Redis-style inclusive indices, negatives counting from the end.
fn resolve_range(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len || stop < 0 {
        return None;
    }
    Some((start as usize, stop as usize))
}

fn round_secs(remaining: Duration) -> i64 {
    ((remaining.as_millis() + 500) / 1000) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_and_ttl() {
        let cache = MemoryCache::new();
        cache
            .set("prefix.users!user-1", "{}", Some(Duration::from_secs(60)))
            .await
            .unwrap();
        assert_eq!(
            cache.get("prefix.users!user-1").await.unwrap(),
            Some("{}".to_string())
        );
        assert_eq!(
            cache.ttl("prefix.users!user-1").await.unwrap(),
            Some(Duration::from_secs(60))
        );
        assert_eq!(cache.get("missing").await.unwrap(), None);
        assert_eq!(cache.ttl("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_clears_previous_expiry() {
        let cache = MemoryCache::new();
        cache.set("k", "a", Some(Duration::from_secs(5))).await.unwrap();
        cache.set("k", "b", None).await.unwrap();
        let replies = cache.execute(Pipeline::new().ttl("k")).await.unwrap();
        assert_eq!(replies, vec![CacheReply::Integer(-1)]);
    }

    #[tokio::test]
    async fn test_sorted_set_ordering_and_ranges() {
        let cache = MemoryCache::new();
        cache
            .execute(
                Pipeline::new()
                    .zadd("z", 2.0, "c")
                    .zadd("z", 0.0, "a")
                    .zadd("z", 1.0, "b"),
            )
            .await
            .unwrap();
        assert_eq!(cache.zrange("z", 0, -1).await.unwrap(), vec!["a", "b", "c"]);
        assert_eq!(
            cache.zrange_with_scores("z", -1, -1).await.unwrap(),
            vec![("c".to_string(), 2.0)]
        );
        assert!(cache.zrange("z", 5, 10).await.unwrap().is_empty());
        assert!(cache.zrange("missing", 0, -1).await.unwrap().is_empty());

        // Re-adding a member moves it rather than duplicating it.
        cache.zadd("z", 5.0, "a").await.unwrap();
        assert_eq!(cache.zrange("z", 0, -1).await.unwrap(), vec!["b", "c", "a"]);
    }

    #[tokio::test]
    async fn test_zremrangebyrank_keeps_top_member() {
        let cache = MemoryCache::new();
        let replies = cache
            .execute(
                Pipeline::new()
                    .zadd("z", 1.0, "b")
                    .zadd("z", 0.0, "a")
                    .zadd("z", 2.0, "c")
                    .zremrangebyrank("z", 0, -2),
            )
            .await
            .unwrap();
        assert_eq!(replies[3], CacheReply::Integer(2));
        assert_eq!(
            cache.zrange_with_scores("z", 0, -1).await.unwrap(),
            vec![("c".to_string(), 2.0)]
        );

        // A single member is left alone; removing everything drops the key.
        let replies = cache
            .execute(
                Pipeline::new()
                    .zremrangebyrank("z", 0, -2)
                    .zremrangebyrank("missing", 0, -1),
            )
            .await
            .unwrap();
        assert_eq!(replies, vec![CacheReply::Integer(0), CacheReply::Integer(0)]);
        cache
            .execute(Pipeline::new().zremrangebyrank("z", 0, -1))
            .await
            .unwrap();
        assert!(!cache.contains("z"));

        cache.set("s", "v", None).await.unwrap();
        assert!(matches!(
            cache.execute(Pipeline::new().zremrangebyrank("s", 0, -1)).await,
            Err(CacheError::WrongType { .. })
        ));
    }

    #[tokio::test]
    async fn test_wrong_type_fails_whole_pipeline() {
        let cache = MemoryCache::new();
        cache.zadd("z", 0.0, "a").await.unwrap();
        assert!(matches!(
            cache.get("z").await,
            Err(CacheError::WrongType { .. })
        ));

        let result = cache
            .execute(Pipeline::new().set("fresh", "1").zadd("fresh", 0.0, "x"))
            .await;
        assert!(result.is_err());
        assert!(!cache.contains("fresh"));
    }

    #[tokio::test]
    async fn test_expire_and_expiry() {
        let cache = MemoryCache::new();
        cache.set("k", "v", None).await.unwrap();
        cache.expire("k", Duration::from_millis(20)).await.unwrap();
        assert!(cache.contains("k"));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!cache.contains("k"));
        assert_eq!(cache.get("k").await.unwrap(), None);

        let replies = cache
            .execute(Pipeline::new().expire("absent", Duration::from_secs(1)))
            .await
            .unwrap();
        assert_eq!(replies, vec![CacheReply::Integer(0)]);
    }

    #[tokio::test]
    async fn test_disconnected_and_failing() {
        let cache = MemoryCache::new();
        cache.set_connected(false);
        assert!(!cache.is_connected());
        assert!(matches!(
            cache.get("k").await,
            Err(CacheError::Disconnected)
        ));

        cache.set_connected(true);
        cache.set_failing(true);
        assert!(matches!(
            cache.get("k").await,
            Err(CacheError::Command { .. })
        ));
        assert_eq!(cache.commands_executed(), 0);
    }

    #[test]
    fn test_resolve_range() {
        assert_eq!(resolve_range(3, 0, -1), Some((0, 2)));
        assert_eq!(resolve_range(3, -1, -1), Some((2, 2)));
        assert_eq!(resolve_range(3, -10, 1), Some((0, 1)));
        assert_eq!(resolve_range(3, 2, 1), None);
        assert_eq!(resolve_range(0, 0, -1), None);
    }
}
