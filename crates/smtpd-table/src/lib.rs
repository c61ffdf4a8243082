//! Engine for implementing OpenSMTPD table processes.
//!
//! A table answers lookup queries for the host: aliases, domains,
//! credentials and friends. The host speaks a line-oriented protocol over
//! the process stdio; this crate hides it behind handler registration.
//! Build a [`Table`], install async handlers per [`Service`], then hand
//! the process over to [`Table::dispatch`].
//!
//! ```no_run
//! use smtpd_table::{Service, Table, TableError};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), TableError> {
//!     let mut table = Table::new();
//!     table.on_lookup(Service::Alias, |_ctx, key| async move {
//!         Ok(match key.as_str() {
//!             "postmaster" => Some("root".to_string()),
//!             _ => None,
//!         })
//!     });
//!     table.dispatch().await
//! }
//! ```
//!
//! Every query runs on its own tokio task, so a slow backend lookup does
//! not hold up the queries behind it; replies correlate by the opaque
//! token the host sends, not by order.

pub mod dispatch;
pub mod service;

pub use dispatch::{QueryContext, Table, TableError, TABLE_PROTOCOL_VERSION};
pub use service::{Service, UnknownService};
