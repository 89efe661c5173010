use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::ApiError;

/// Attribute words (`=key=value`) of one reply sentence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Row(BTreeMap<String, String>);

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Like [`Row::get`], but treats an empty value as absent.
    pub fn get_non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|v| !v.is_empty())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    Re,
    Done,
    Trap,
    Fatal,
    Empty,
}

/// One parsed reply sentence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub kind: ReplyKind,
    pub tag: Option<String>,
    pub attributes: Row,
    /// Free-form words; `!fatal` carries its reason this way.
    pub message: Option<String>,
}

impl Response {
    pub fn parse(words: Vec<String>) -> Result<Self, ApiError> {
        let mut iter = words.into_iter();
        let head = iter
            .next()
            .ok_or_else(|| ApiError::Protocol("empty reply sentence".to_string()))?;
        let kind = match head.as_str() {
            "!re" => ReplyKind::Re,
            "!done" => ReplyKind::Done,
            "!trap" => ReplyKind::Trap,
            "!fatal" => ReplyKind::Fatal,
            "!empty" => ReplyKind::Empty,
            other => {
                return Err(ApiError::Protocol(format!("unexpected reply word '{other}'")))
            }
        };

        let mut tag = None;
        let mut attributes = Row::new();
        let mut message: Option<String> = None;
        for word in iter {
            if let Some(value) = word.strip_prefix(".tag=") {
                tag = Some(value.to_string());
            } else if let Some(rest) = word.strip_prefix('=') {
                match rest.split_once('=') {
                    Some((key, value)) => attributes.insert(key, value),
                    None => attributes.insert(rest, ""),
                }
            } else {
                message = Some(match message {
                    Some(existing) => format!("{existing} {word}"),
                    None => word,
                });
            }
        }

        Ok(Self {
            kind,
            tag,
            attributes,
            message,
        })
    }

    /// Converts a `!trap` sentence into the matching error.
    pub fn into_trap(self) -> ApiError {
        let category = self
            .attributes
            .get("category")
            .and_then(|c| c.parse().ok());
        let message = self
            .attributes
            .get("message")
            .map(str::to_string)
            .or(self.message)
            .unwrap_or_else(|| "unspecified error".to_string());
        ApiError::Trap { message, category }
    }
}

/// The full answer to one command: all `!re` rows plus the `!done` attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reply {
    pub rows: Vec<Row>,
    pub done: Row,
}

impl Reply {
    /// The `=ret=` value of the `!done` sentence, used by `add` and `count-only`.
    pub fn ret(&self) -> Option<&str> {
        self.done.get("ret")
    }
}

/// Builds the words for a command sentence.
pub fn command_words(command: &str, params: &[(&str, &str)], tag: Option<&str>) -> Vec<String> {
    let mut words = Vec::with_capacity(params.len() + 2);
    words.push(command.to_string());
    for (key, value) in params {
        words.push(format!("={key}={value}"));
    }
    if let Some(tag) = tag {
        words.push(format!(".tag={tag}"));
    }
    words
}
