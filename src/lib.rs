//! EWF/LEF forensic container: segment-file framing, the chunk store, and
//! the logical-evidence record tree, composed behind [`handle::Handle`].
//!
//! A segment-file directory and section framer ([`section`], [`segment`]),
//! an offset table and compressed/delta chunk store ([`offset_table`],
//! [`chunk`], [`codec`]), a virtual byte stream over the chunk grid
//! ([`stream`]), acquisition/hash/session metadata ([`metadata`]), the
//! logical-evidence record parser ([`lef`]), and the public composition
//! ([`handle`]).

pub mod chunk;
pub mod codec;
pub mod error;
pub mod handle;
pub mod lef;
pub mod metadata;
pub mod offset_table;
pub mod section;
pub mod segment;
pub mod stream;

pub use error::{EwfError, Result};
pub use handle::{CreateOptions, EwfFormat, Handle};
