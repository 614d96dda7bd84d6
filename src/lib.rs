//! Overpass QL parsing, tag matching and SQL generation.
//!
//! ```
//! use std::collections::HashMap;
//!
//! let query = overpass_ql::parse(r#"node["shop"="supermarket"](50.7,7.1,50.8,7.2); out;"#)?;
//!
//! let selectors = query.first_selectors()?;
//! let tags = HashMap::from([("shop".to_string(), "supermarket".to_string())]);
//! assert_eq!(selectors.matches(&tags), Some(vec!["shop".to_string()]));
//!
//! let sql = selectors.to_sql("postgres", 4326, None)?;
//! assert!(sql.starts_with("tags->>'shop' = 'supermarket' AND ST_Intersects("));
//!
//! assert_eq!(
//!     query.to_overpass(),
//!     "node[shop=supermarket](50.7,7.1,50.8,7.2);\nout;"
//! );
//! # Ok::<(), overpass_ql::Error>(())
//! ```

pub mod error;
pub mod overpass;
pub mod sql;

pub use error::{Error, LexError, ParseError, Result};
pub use overpass::{Query, SelectorSet, SetIndex, parse};
pub use sql::{Dialect, KeyEscaper, SqlDialect, SqlOptions, WrapKeys};
