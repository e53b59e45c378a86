//! Redis-backed look-aside cache.
//!
//! Pipelines are sent as MULTI/EXEC transactions over a
//! [`ConnectionManager`], which reconnects on its own. After a failed round trip the cache reports
//! itself disconnected for a short cool-down so callers go straight to the
//! store instead of queueing behind a dead connection.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lookaside_core::{CacheError, CacheResult};
use redis::aio::ConnectionManager;
use redis::{from_redis_value, Value as RedisValue};

use super::traits::{CacheCommand, CacheReply, LookasideCache, Pipeline};

const DEFAULT_COOL_DOWN: Duration = Duration::from_secs(1);

/// [`LookasideCache`] over a Redis connection.
pub struct RedisCache {
    connection: ConnectionManager,
    last_failure: Mutex<Option<Instant>>,
    cool_down: Duration,
}

impl RedisCache {
    /// Connect to `url` (e.g. `redis://127.0.0.1/`).
    pub async fn connect(url: &str) -> CacheResult<Self> {
        let client = redis::Client::open(url).map_err(|e| command_error(e, &[]))?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| command_error(e, &[]))?;
        Ok(Self::from_connection(connection))
    }

    pub fn from_connection(connection: ConnectionManager) -> Self {
        Self {
            connection,
            last_failure: Mutex::new(None),
            cool_down: DEFAULT_COOL_DOWN,
        }
    }

    /// How long to report disconnected after a failed round trip.
    pub fn with_cool_down(mut self, cool_down: Duration) -> Self {
        self.cool_down = cool_down;
        self
    }

    fn record_outcome(&self, failed: bool) {
        if let Ok(mut last_failure) = self.last_failure.lock() {
            *last_failure = failed.then(Instant::now);
        }
    }
}

impl std::fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCache")
            .field("cool_down", &self.cool_down)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl LookasideCache for RedisCache {
    fn is_connected(&self) -> bool {
        self.last_failure
            .lock()
            .map(|last| last.map_or(true, |at| at.elapsed() >= self.cool_down))
            .unwrap_or(false)
    }

    async fn execute(&self, pipeline: Pipeline) -> CacheResult<Vec<CacheReply>> {
        let commands = pipeline.into_commands();
        if commands.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for command in &commands {
            match command {
                CacheCommand::Get { key } => {
                    pipe.cmd("GET").arg(key);
                }
                CacheCommand::Set { key, value, ttl } => {
                    pipe.cmd("SET").arg(key).arg(value);
                    if let Some(ttl) = ttl {
                        pipe.arg("PX").arg(ttl.as_millis() as u64);
                    }
                }
                CacheCommand::Del { key } => {
                    pipe.cmd("DEL").arg(key);
                }
                CacheCommand::ZAdd { key, members } => {
                    pipe.cmd("ZADD").arg(key);
                    for (score, member) in members {
                        pipe.arg(*score).arg(member);
                    }
                }
                CacheCommand::ZRange {
                    key,
                    start,
                    stop,
                    with_scores,
                } => {
                    pipe.cmd("ZRANGE").arg(key).arg(*start).arg(*stop);
                    if *with_scores {
                        pipe.arg("WITHSCORES");
                    }
                }
                CacheCommand::ZRemRangeByRank { key, start, stop } => {
                    pipe.cmd("ZREMRANGEBYRANK").arg(key).arg(*start).arg(*stop);
                }
                CacheCommand::Expire { key, ttl } => {
                    pipe.cmd("PEXPIRE").arg(key).arg(ttl.as_millis() as u64);
                }
                CacheCommand::Ttl { key } => {
                    pipe.cmd("TTL").arg(key);
                }
            }
        }

        let mut connection = self.connection.clone();
        let values: Vec<RedisValue> = match pipe.query_async(&mut connection).await {
            Ok(values) => {
                self.record_outcome(false);
                values
            }
            Err(e) => {
                if e.is_io_error() || e.is_connection_dropped() || e.is_timeout() {
                    self.record_outcome(true);
                }
                return Err(command_error(e, &commands));
            }
        };

        if values.len() != commands.len() {
            return Err(CacheError::UnexpectedReply {
                command: "pipeline".to_string(),
            });
        }
        commands
            .iter()
            .zip(values)
            .map(|(command, value)| convert(command, value))
            .collect()
    }
}

fn convert(command: &CacheCommand, value: RedisValue) -> CacheResult<CacheReply> {
    let decode = |e: redis::RedisError| CacheError::Decode {
        key: command_key(command).to_string(),
        reason: e.to_string(),
    };
    Ok(match command {
        CacheCommand::Get { .. } => {
            let value: Option<String> = from_redis_value(&value).map_err(decode)?;
            value.map_or(CacheReply::Nil, CacheReply::Value)
        }
        CacheCommand::Set { .. } => CacheReply::Ok,
        CacheCommand::ZRange {
            with_scores: false, ..
        } => {
            let members: Vec<String> = from_redis_value(&value).map_err(decode)?;
            CacheReply::Members(members)
        }
        CacheCommand::ZRange {
            with_scores: true, ..
        } => {
            let members: Vec<(String, f64)> = from_redis_value(&value).map_err(decode)?;
            CacheReply::Scored(members)
        }
        CacheCommand::Del { .. }
        | CacheCommand::ZAdd { .. }
        | CacheCommand::ZRemRangeByRank { .. }
        | CacheCommand::Expire { .. }
        | CacheCommand::Ttl { .. } => {
            let n: i64 = from_redis_value(&value).map_err(decode)?;
            CacheReply::Integer(n)
        }
    })
}

fn command_key(command: &CacheCommand) -> &str {
    match command {
        CacheCommand::Get { key }
        | CacheCommand::Set { key, .. }
        | CacheCommand::Del { key }
        | CacheCommand::ZAdd { key, .. }
        | CacheCommand::ZRange { key, .. }
        | CacheCommand::ZRemRangeByRank { key, .. }
        | CacheCommand::Expire { key, .. }
        | CacheCommand::Ttl { key } => key,
    }
}

/// Keys a WRONGTYPE reply can come from. Redis does not say which command
/// of a transaction failed, so every type-checked key is named.
fn typed_keys(commands: &[CacheCommand]) -> String {
    let mut keys: Vec<&str> = Vec::new();
    for command in commands {
        let typed = matches!(
            command,
            CacheCommand::Get { .. }
                | CacheCommand::ZAdd { .. }
                | CacheCommand::ZRange { .. }
                | CacheCommand::ZRemRangeByRank { .. }
        );
        let key = command_key(command);
        if typed && !keys.contains(&key) {
            keys.push(key);
        }
    }
    keys.join(",")
}

fn command_error(e: redis::RedisError, commands: &[CacheCommand]) -> CacheError {
    if e.code() == Some("WRONGTYPE") {
        return CacheError::WrongType {
            key: typed_keys(commands),
        };
    }
    CacheError::Command {
        reason: e.to_string(),
    }
}
