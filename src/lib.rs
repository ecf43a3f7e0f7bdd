//! Longan - streaming chunker and generic tree reader for large XML documents
//!
//! This library solves two related problems for processing large,
//! repetitively-structured XML:
//!
//! - **Generic trees**: unmarshal arbitrary, schema-less XML into a [`Node`]
//!   tree preserving element names, attributes, text, and child order, then
//!   reshape it with [`Node::to_map`] and [`Node::split`].
//! - **Byte-range chunking**: locate the exact byte boundaries of repeated
//!   elements inside a seekable stream with [`chunk`] and [`chunk_all`], so
//!   bulk processing can slice file segments without ever materializing the
//!   whole document.
//!
//! Both sides share one hard problem: tracking nested-element balance over a
//! raw token stream, including elements that nest children with the same tag
//! name. The tokenizer is `quick-xml`; matching is by local
//! (namespace-stripped) name only, and no well-formedness validation is
//! performed beyond what the tokenizer reports.
//!
//! # Example - Chunking a stream and parsing each segment
//!
//! ```
//! use std::io::Cursor;
//! use longan::{Node, chunk_all};
//!
//! let xml = "<library><book>b1</book><book>b2</book><book>b3</book><book>b4</book></library>";
//! let mut stream = Cursor::new(xml.as_bytes());
//!
//! // Byte segments, each holding at least two complete <book> elements.
//! let segments = chunk_all(&mut stream, "book", 2)?;
//! assert_eq!(segments.len(), 2);
//!
//! // Each segment slices out of the stream independently.
//! let bytes = segments[0].read_from(&mut stream)?;
//! let first = Node::from_reader(&bytes[..])?;
//! assert_eq!(first.name, "book");
//! assert_eq!(first.text, "b1");
//! # Ok::<(), longan::Error>(())
//! ```
//!
//! # Concurrency
//!
//! Every operation is synchronous and mutates the seek position of the
//! caller-owned stream. Sharing one stream handle across logical callers is
//! unsupported; open independent handles over the same data instead.

pub mod chunk;
pub mod error;
pub mod node;

// Re-exports for convenience
pub use chunk::{Segment, chunk, chunk_all, close_boundary, estimate_size, open_boundary};
pub use error::{Error, Result};
pub use node::Node;
