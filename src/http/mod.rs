//! HTTP request handling shared by the context and the connector.
//!
//! # Data Flow
//! ```text
//! connector (accept, keep-alive, dispatch to executor)
//!     → compression_opt_out_filter → compression → body limit → Server header
//!     → context router
//!         → character_encoding_filter → session tracking
//!         → application routes | static resources
//!     → error_report.rs for responses the container generates itself
//! ```

pub mod error_report;
pub mod filters;

pub use error_report::error_response;
pub use filters::{character_encoding_filter, compression_opt_out_filter, RequestEncoding};
