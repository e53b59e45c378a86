//! Cache representation of a single record.
//!
//! Plain entries are strings holding the JSON payload. Versioned entries are
//! sorted sets whose members are JSON payloads scored by their version. Each
//! write trims the set down to its highest-scored member, which is only
//! trusted when the version inside the payload equals its score. The two representations are not
//! interchangeable: reading one with the other's command is a cache error.

use std::time::Duration;

use lookaside_core::{embedded_version, CacheResult, Record};

use crate::cache::{CacheReply, Pipeline};
use crate::context::{decode_record, encode_record};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode<'a> {
    Plain,
    /// Versioned under the named attribute.
    Versioned(&'a str),
}

impl Mode<'_> {
    /// Append the read command for the entry at `key`.
    pub(crate) fn lookup(&self, pipeline: Pipeline, key: &str) -> Pipeline {
        match self {
            Self::Plain => pipeline.get(key),
            Self::Versioned(_) => pipeline.zrange_with_scores(key, -1, -1),
        }
    }

    /// Interpret the reply to [`Mode::lookup`]. `Ok(None)` is a miss,
    /// including a stale versioned entry.
    pub(crate) fn decode(&self, key: &str, reply: CacheReply) -> CacheResult<Option<Record>> {
        match self {
            Self::Plain => match reply.into_value()? {
                Some(payload) => decode_record(key, &payload).map(Some),
                None => Ok(None),
            },
            Self::Versioned(version_attr) => {
                let mut members = reply.into_scored()?;
                let Some((payload, score)) = members.pop() else {
                    return Ok(None);
                };
                if !members.is_empty() {
                    return Ok(None);
                }
                let item = decode_record(key, &payload)?;
                match embedded_version(&item, version_attr) {
                    Some(version) if version as f64 == score => Ok(Some(item)),
                    _ => {
                        tracing::debug!(key, score, "Stale versioned cache entry");
                        Ok(None)
                    }
                }
            }
        }
    }

    /// Commands that store `item` at `key` for `ttl`.
    ///
    /// Returns `None` for a versioned item without a valid version; such an
    /// item is never cached.
    pub(crate) fn store(
        &self,
        key: &str,
        item: &Record,
        ttl: Duration,
    ) -> CacheResult<Option<Pipeline>> {
        let payload = encode_record(key, item)?;
        Ok(match self {
            Self::Plain => Some(Pipeline::new().set(key, payload).expire(key, ttl)),
            Self::Versioned(version_attr) => embedded_version(item, version_attr).map(|version| {
                Pipeline::new()
                    .zadd(key, version as f64, payload)
                    .zremrangebyrank(key, 0, -2)
                    .expire(key, ttl)
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheCommand;
    use lookaside_core::json;

    fn item(value: lookaside_core::Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_plain_decode() {
        let reply = CacheReply::Value(r#"{"id":"user-1"}"#.to_string());
        let decoded = Mode::Plain.decode("k", reply).unwrap();
        assert_eq!(decoded, Some(item(json!({"id": "user-1"}))));
        assert_eq!(Mode::Plain.decode("k", CacheReply::Nil).unwrap(), None);
        assert!(Mode::Plain
            .decode("k", CacheReply::Value("{".to_string()))
            .is_err());
    }

    #[test]
    fn test_versioned_decode_checks_score() {
        let mode = Mode::Versioned("iv");
        let fresh = CacheReply::Scored(vec![(r#"{"id":"a","iv":2}"#.to_string(), 2.0)]);
        assert!(mode.decode("k", fresh).unwrap().is_some());

        let stale = CacheReply::Scored(vec![(r#"{"id":"a","iv":1}"#.to_string(), 2.0)]);
        assert_eq!(mode.decode("k", stale).unwrap(), None);

        let unversioned = CacheReply::Scored(vec![(r#"{"id":"a"}"#.to_string(), 0.0)]);
        assert_eq!(mode.decode("k", unversioned).unwrap(), None);

        assert_eq!(mode.decode("k", CacheReply::Scored(vec![])).unwrap(), None);
    }

    #[test]
    fn test_modes_reject_each_others_replies() {
        let versioned_reply = CacheReply::Scored(vec![("{}".to_string(), 0.0)]);
        assert!(Mode::Plain.decode("k", versioned_reply).is_err());
        let plain_reply = CacheReply::Value("{}".to_string());
        assert!(Mode::Versioned("iv").decode("k", plain_reply).is_err());
    }

    #[test]
    fn test_store_commands() {
        let ttl = Duration::from_secs(60);
        let record = item(json!({"id": "a", "iv": 3}));

        let plain = Mode::Plain
            .store("k", &record, ttl)
            .unwrap()
            .unwrap();
        assert_eq!(plain.commands()[0].name(), "SET");
        assert_eq!(plain.commands()[1].name(), "EXPIRE");

        let versioned = Mode::Versioned("iv")
            .store("k", &record, ttl)
            .unwrap()
            .unwrap();
        assert!(matches!(
            &versioned.commands()[0],
            CacheCommand::ZAdd { members, .. } if members[0].0 == 3.0
        ));
        assert_eq!(
            versioned.commands()[1],
            CacheCommand::ZRemRangeByRank {
                key: "k".to_string(),
                start: 0,
                stop: -2,
            }
        );

        let unversioned = item(json!({"id": "a"}));
        assert!(Mode::Versioned("iv")
            .store("k", &unversioned, ttl)
            .unwrap()
            .is_none());
    }
}
