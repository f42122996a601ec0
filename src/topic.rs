// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Topic filter parsing and wildcard matching.

use crate::error::{Error, ErrorKind};

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TopicPart {
    /// Special internal part, like `$SYS`. Topics starting with `$` are
    /// only matched by filters naming that level explicitly.
    Internal(String),

    /// Normal part.
    Str(String),

    /// Empty part.
    Empty,

    /// `#` char, matches any remaining parts. Must be the final part.
    MultiWildcard,

    /// `+` char, matches exactly one part.
    SingleWildcard,
}

/// A parsed topic filter, e.g. `sensors/+/temperature` or `sport/#`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TopicFilter {
    filter: String,
    parts: Vec<TopicPart>,
}

impl TopicFilter {
    /// Parse and validate a topic filter string.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTopicFilter` if the filter is empty, uses `#` at a
    /// non-final level, or mixes wildcard chars into a normal level.
    pub fn parse(s: &str) -> Result<Self, Error> {
        if s.is_empty() {
            return Err(Error::new(
                ErrorKind::InvalidTopicFilter,
                "topic: Empty topic filter",
            ));
        }

        let levels: Vec<&str> = s.split('/').collect();
        let last = levels.len() - 1;
        let mut parts = Vec::with_capacity(levels.len());
        for (index, level) in levels.iter().enumerate() {
            let part = match *level {
                "#" => {
                    // The multi-level wildcard character MUST be the last
                    // character in the Topic Filter [MQTT-4.7.1-2].
                    if index != last {
                        return Err(Error::from_string(
                            ErrorKind::InvalidTopicFilter,
                            format!("topic: `#` is not the final level in: {s}"),
                        ));
                    }
                    TopicPart::MultiWildcard
                }
                "+" => TopicPart::SingleWildcard,
                "" => TopicPart::Empty,
                _ => {
                    // The wildcard characters can be used only to denote
                    // a whole level [MQTT-4.7.1-3].
                    if level.contains(['+', '#']) {
                        return Err(Error::from_string(
                            ErrorKind::InvalidTopicFilter,
                            format!("topic: Wildcard inside level `{level}` in: {s}"),
                        ));
                    }
                    if level.starts_with('$') && index == 0 {
                        TopicPart::Internal((*level).to_string())
                    } else {
                        TopicPart::Str((*level).to_string())
                    }
                }
            };
            parts.push(part);
        }

        Ok(Self {
            filter: s.to_string(),
            parts,
        })
    }

    #[inline]
    pub fn filter(&self) -> &str {
        &self.filter
    }

    /// Whether `topic` matches this filter.
    pub fn is_match(&self, topic: &str) -> bool {
        let levels: Vec<&str> = topic.split('/').collect();

        // Topics beginning with `$` are not matched by filters starting
        // with a wildcard [MQTT-4.7.2-1].
        if levels.first().is_some_and(|level| level.starts_with('$'))
            && matches!(
                self.parts.first(),
                Some(TopicPart::SingleWildcard | TopicPart::MultiWildcard)
            )
        {
            return false;
        }

        let mut index = 0;
        for part in &self.parts {
            match part {
                TopicPart::MultiWildcard => return true,
                TopicPart::SingleWildcard => {
                    if index >= levels.len() {
                        return false;
                    }
                    index += 1;
                }
                TopicPart::Str(s) | TopicPart::Internal(s) => {
                    if index >= levels.len() || levels[index] != s {
                        return false;
                    }
                    index += 1;
                }
                TopicPart::Empty => {
                    if index >= levels.len() || !levels[index].is_empty() {
                        return false;
                    }
                    index += 1;
                }
            }
        }
        index == levels.len()
    }
}

/// Whether `topic` is acceptable as the topic name of a PUBLISH packet.
///
/// Topic names must be non-empty and must not contain wildcard chars.
pub fn is_pub_topic_valid(topic: &str) -> bool {
    !topic.is_empty() && !topic.contains(['+', '#'])
}
