//! Look-aside cache backend trait and pipelined commands.
//!
//! A backend implements a single primitive, [`LookasideCache::execute`],
//! which runs a [`Pipeline`] as one unit and returns one [`CacheReply`] per
//! command, in order. The single-command helpers are built on top of it.

use std::time::Duration;

use async_trait::async_trait;
use lookaside_core::{CacheError, CacheResult};

/// One cache command.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheCommand {
    Get {
        key: String,
    },
    Set {
        key: String,
        value: String,
        ttl: Option<Duration>,
    },
    Del {
        key: String,
    },
    ZAdd {
        key: String,
        members: Vec<(f64, String)>,
    },
    ZRange {
        key: String,
        start: i64,
        stop: i64,
        with_scores: bool,
    },
    /// Remove members by rank, inclusive, negatives counting from the end.
    ZRemRangeByRank {
        key: String,
        start: i64,
        stop: i64,
    },
    Expire {
        key: String,
        ttl: Duration,
    },
    Ttl {
        key: String,
    },
}

impl CacheCommand {
    /// Command name, for logs and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Get { .. } => "GET",
            Self::Set { .. } => "SET",
            Self::Del { .. } => "DEL",
            Self::ZAdd { .. } => "ZADD",
            Self::ZRange { .. } => "ZRANGE",
            Self::ZRemRangeByRank { .. } => "ZREMRANGEBYRANK",
            Self::Expire { .. } => "EXPIRE",
            Self::Ttl { .. } => "TTL",
        }
    }
}

/// Reply to one cache command.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheReply {
    Nil,
    Ok,
    Value(String),
    Integer(i64),
    Members(Vec<String>),
    Scored(Vec<(String, f64)>),
}

impl CacheReply {
    /// GET reply: `Nil` is a miss.
    pub fn into_value(self) -> CacheResult<Option<String>> {
        match self {
            Self::Nil => Ok(None),
            Self::Value(value) => Ok(Some(value)),
            _ => Err(unexpected("GET")),
        }
    }

    pub fn into_members(self) -> CacheResult<Vec<String>> {
        match self {
            Self::Members(members) => Ok(members),
            Self::Nil => Ok(Vec::new()),
            _ => Err(unexpected("ZRANGE")),
        }
    }

    pub fn into_scored(self) -> CacheResult<Vec<(String, f64)>> {
        match self {
            Self::Scored(members) => Ok(members),
            Self::Nil => Ok(Vec::new()),
            _ => Err(unexpected("ZRANGE WITHSCORES")),
        }
    }

    pub fn into_integer(self) -> CacheResult<i64> {
        match self {
            Self::Integer(n) => Ok(n),
            _ => Err(unexpected("integer reply")),
        }
    }
}

fn unexpected(command: &str) -> CacheError {
    CacheError::UnexpectedReply {
        command: command.to_string(),
    }
}

/// An ordered batch of commands executed as one unit.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Pipeline {
    commands: Vec<CacheCommand>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(mut self, key: impl Into<String>) -> Self {
        self.commands.push(CacheCommand::Get { key: key.into() });
        self
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.commands.push(CacheCommand::Set {
            key: key.into(),
            value: value.into(),
            ttl: None,
        });
        self
    }

    pub fn set_ex(mut self, key: impl Into<String>, value: impl Into<String>, ttl: Duration) -> Self {
        self.commands.push(CacheCommand::Set {
            key: key.into(),
            value: value.into(),
            ttl: Some(ttl),
        });
        self
    }

    pub fn del(mut self, key: impl Into<String>) -> Self {
        self.commands.push(CacheCommand::Del { key: key.into() });
        self
    }

    pub fn zadd(mut self, key: impl Into<String>, score: f64, member: impl Into<String>) -> Self {
        self.commands.push(CacheCommand::ZAdd {
            key: key.into(),
            members: vec![(score, member.into())],
        });
        self
    }

    /// ZADD of several `(score, member)` pairs in one command.
    pub fn zadd_multiple(mut self, key: impl Into<String>, members: Vec<(f64, String)>) -> Self {
        self.commands.push(CacheCommand::ZAdd {
            key: key.into(),
            members,
        });
        self
    }

    pub fn zrange(mut self, key: impl Into<String>, start: i64, stop: i64) -> Self {
        self.commands.push(CacheCommand::ZRange {
            key: key.into(),
            start,
            stop,
            with_scores: false,
        });
        self
    }

    pub fn zrange_with_scores(mut self, key: impl Into<String>, start: i64, stop: i64) -> Self {
        self.commands.push(CacheCommand::ZRange {
            key: key.into(),
            start,
            stop,
            with_scores: true,
        });
        self
    }

    pub fn zremrangebyrank(mut self, key: impl Into<String>, start: i64, stop: i64) -> Self {
        self.commands.push(CacheCommand::ZRemRangeByRank {
            key: key.into(),
            start,
            stop,
        });
        self
    }

    pub fn expire(mut self, key: impl Into<String>, ttl: Duration) -> Self {
        self.commands.push(CacheCommand::Expire {
            key: key.into(),
            ttl,
        });
        self
    }

    pub fn ttl(mut self, key: impl Into<String>) -> Self {
        self.commands.push(CacheCommand::Ttl { key: key.into() });
        self
    }

    /// Append every command of `other`.
    pub fn extend(mut self, other: Pipeline) -> Self {
        self.commands.extend(other.commands);
        self
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn commands(&self) -> &[CacheCommand] {
        &self.commands
    }

    pub fn into_commands(self) -> Vec<CacheCommand> {
        self.commands
    }
}

/// Look-aside cache backend.
///
/// This trait abstracts over Redis-like backends offering strings, sorted
/// sets and per-key expiry. Implementations should be thread-safe and
/// support concurrent access.
///
/// `is_connected` is consulted before every use; a disconnected cache is
/// skipped entirely rather than called.
#[async_trait]
pub trait LookasideCache: Send + Sync {
    /// Whether the backend is currently usable.
    fn is_connected(&self) -> bool;

    /// Execute every command of `pipeline` as one unit.
    ///
    /// Returns exactly one reply per command, in order.
    async fn execute(&self, pipeline: Pipeline) -> CacheResult<Vec<CacheReply>>;

    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        single(self.execute(Pipeline::new().get(key)).await?)?.into_value()
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()> {
        let pipeline = match ttl {
            Some(ttl) => Pipeline::new().set_ex(key, value, ttl),
            None => Pipeline::new().set(key, value),
        };
        single(self.execute(pipeline).await?).map(|_| ())
    }

    async fn del(&self, key: &str) -> CacheResult<()> {
        single(self.execute(Pipeline::new().del(key)).await?).map(|_| ())
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> CacheResult<()> {
        single(self.execute(Pipeline::new().zadd(key, score, member)).await?).map(|_| ())
    }

    async fn zrange(&self, key: &str, start: i64, stop: i64) -> CacheResult<Vec<String>> {
        single(self.execute(Pipeline::new().zrange(key, start, stop)).await?)?.into_members()
    }

    async fn zrange_with_scores(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> CacheResult<Vec<(String, f64)>> {
        single(
            self.execute(Pipeline::new().zrange_with_scores(key, start, stop))
                .await?,
        )?
        .into_scored()
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<()> {
        single(self.execute(Pipeline::new().expire(key, ttl)).await?).map(|_| ())
    }

    /// Remaining time to live; `None` if the key is missing or never expires.
    async fn ttl(&self, key: &str) -> CacheResult<Option<Duration>> {
        let seconds = single(self.execute(Pipeline::new().ttl(key)).await?)?.into_integer()?;
        Ok((seconds >= 0).then(|| Duration::from_secs(seconds as u64)))
    }
}

fn single(replies: Vec<CacheReply>) -> CacheResult<CacheReply> {
    let mut replies = replies.into_iter();
    match (replies.next(), replies.next()) {
        (Some(reply), None) => Ok(reply),
        _ => Err(CacheError::Command {
            reason: "expected exactly one reply".to_string(),
        }),
    }
}
