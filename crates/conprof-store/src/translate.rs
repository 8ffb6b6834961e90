//! Translation between wire messages and the storage engine's native model.
//!
//! Matcher translation is all-or-nothing: the first matcher that cannot be
//! translated fails the whole call and nothing is returned.

use conprof_proto::storepb::{self, chunk, label_matcher};

use crate::error::{Error, Result};
use crate::storage::{ChunkMeta, Encoding, Label, Labels, MatchType, Matcher};

/// Wire matchers to engine matchers.
pub fn matchers_from_pb(ms: &[storepb::LabelMatcher]) -> Result<Vec<Matcher>> {
    ms.iter().map(matcher_from_pb).collect()
}

pub fn matcher_from_pb(m: &storepb::LabelMatcher) -> Result<Matcher> {
    let match_type = match label_matcher::Type::try_from(m.r#type) {
        Ok(label_matcher::Type::Eq) => MatchType::Equal,
        Ok(label_matcher::Type::Neq) => MatchType::NotEqual,
        Ok(label_matcher::Type::Re) => MatchType::Regexp,
        Ok(label_matcher::Type::Nre) => MatchType::NotRegexp,
        Err(_) => return Err(Error::UnknownMatcherType(m.r#type)),
    };
    Matcher::new(match_type, m.name.clone(), m.value.clone())
}

/// Engine matchers to wire matchers.
pub fn matchers_to_pb(ms: &[Matcher]) -> Vec<storepb::LabelMatcher> {
    ms.iter().map(matcher_to_pb).collect()
}

pub fn matcher_to_pb(m: &Matcher) -> storepb::LabelMatcher {
    let r#type = match m.match_type {
        MatchType::Equal => label_matcher::Type::Eq,
        MatchType::NotEqual => label_matcher::Type::Neq,
        MatchType::Regexp => label_matcher::Type::Re,
        MatchType::NotRegexp => label_matcher::Type::Nre,
    };
    storepb::LabelMatcher::new(r#type, m.name.clone(), m.value.clone())
}

/// Engine labels to wire labels, keeping the engine's canonical order.
pub fn labels_to_pb(labels: &Labels) -> Vec<storepb::Label> {
    labels
        .iter()
        .map(|l| storepb::Label::new(l.name.clone(), l.value.clone()))
        .collect()
}

pub fn labels_from_pb(labels: &[storepb::Label]) -> Result<Labels> {
    Labels::new(
        labels
            .iter()
            .map(|l| Label::new(l.name.clone(), l.value.clone())),
    )
}

/// Wire encoding of an engine encoding: the engine identifier minus one.
pub fn encoding_to_pb(encoding: Encoding) -> Result<chunk::Encoding> {
    let code = i32::from(encoding.code()) - 1;
    chunk::Encoding::try_from(code).map_err(|_| Error::InvalidChunkEncoding(encoding.code()))
}

/// Copies an engine chunk into its wire form.
pub fn chunk_to_pb(meta: &ChunkMeta) -> Result<storepb::Chunk> {
    let chunk = meta
        .chunk
        .as_ref()
        .ok_or(Error::ChunkNotPopulated(meta.reference))?;

    Ok(storepb::Chunk {
        min_time: meta.min_time,
        max_time: meta.max_time,
        r#type: encoding_to_pb(chunk.encoding)? as i32,
        data: chunk.data.clone(),
    })
}
