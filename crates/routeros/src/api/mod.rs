pub mod codec;
pub mod sentence;

pub use sentence::{command_words, Reply, ReplyKind, Response, Row};
