#![forbid(unsafe_code)]

//! Attribute-path patterns.
//!
//! A pattern names the attributes a listener cares about, possibly through
//! a chain of links (`owner.address.city`), alternations (`[a,b].c`),
//! recursion (`children*.name`), prefix and metadata selection
//! (`max_+editable`) and collection item tracking (`items[]`).
//!
//! ```
//! let tree = facets_path::parse("owner.[name,age]").unwrap();
//! let owner = tree.segment(tree.root()).unwrap();
//! assert_eq!(owner.name(), "owner");
//! assert!(owner.notifies());
//! ```

pub mod cache;
pub mod parser;
pub mod syntax;

pub use cache::{CacheStats, PatternCache};
pub use parser::{SyntaxError, parse};
pub use syntax::{MetadataFilter, NodeId, Segment, SegmentFlags, SyntaxNode, SyntaxTree};
