pub mod codec;
pub mod collector;
pub mod query;
pub mod reader;
pub mod search;
pub mod writer;

#[cfg(test)]
mod testing;

pub use codec::{EncodedSpan, SpanEncoder, decode_span, encode_span};
pub use reader::{LogsSpanReader, ReaderConfig};
pub use writer::LogsSpanWriter;
