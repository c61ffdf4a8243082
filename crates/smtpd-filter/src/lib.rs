//! Engine for implementing OpenSMTPD filter processes.
//!
//! The host spawns the filter and speaks a line-oriented protocol over its
//! stdio: a `config|…` prelude, a registration exchange, then a stream of
//! `report` events (passive) and `filter` requests (each answered with a
//! verdict). This crate hides the protocol behind callback registration:
//! build a [`Filter`], install callbacks on its [`SmtpIn`]/[`SmtpOut`]
//! halves, then hand the process over to [`Filter::dispatch`].
//!
//! ```no_run
//! use smtpd_filter::{Filter, FilterError, Response};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), FilterError> {
//!     let mut filter = Filter::<()>::new();
//!     filter.smtp_in().filter().on_mail_from(|_ts, _session, from| {
//!         if from.ends_with("@spam.example") {
//!             Response::reject("550 go away")
//!         } else {
//!             Response::proceed()
//!         }
//!     });
//!     filter.dispatch().await?;
//!     Ok(())
//! }
//! ```
//!
//! Filter callbacks run inline on the dispatch task: a verdict is
//! latency-sensitive and ordered, so a callback that blocks stalls the
//! whole SMTP session. Keep them short.

pub mod dispatch;
pub mod events;
pub mod response;
pub mod session;

pub use dispatch::{Filter, FilterError, SmtpIn, SmtpOut, FILTER_PROTOCOL_VERSION};
pub use events::{Filtering, Reporting};
pub use response::Response;
pub use session::{InvalidSessionId, Session, SessionId};
