//! leap: client engine for the LEAP line-oriented JSON-over-TLS protocol.
//!
//! This crate defines:
//! - The message codec ([`Request`], [`Response`], [`CommuniqueType`], [`ResponseStatus`])
//! - The body-type catalog ([`Body`] and its shapes)
//! - The stream framer ([`LineBuffer`])
//! - The connection manager ([`LeapClient`])
//! - The dial seam ([`Dial`], [`TlsDialer`]) and tag source ([`TagSource`])
//!
//! # Architecture
//!
//! ```text
//!                  ┌──────────────────────────────────┐
//!                  │            LeapClient            │
//!                  ├──────────────────────────────────┤
//!                  │  conn: Mutex<Option<Conn>>       │
//!                  │  table: CorrelationTable         │
//!                  │    pending: tag -> oneshot tx    │
//!                  │    subscriptions: tag -> handler │
//!                  └───────────┬──────────────────────┘
//!                              │
//!                        reader task
//!                              │
//!          TLS read ─► LineBuffer ─► Response::decode ─► dispatch
//!                                                           │
//!        ┌──────────────────────┬───────────────────────────┤
//!   tagged, pending?      tagged, subscribed?          untagged?
//!        │                      │                           │
//!  resolve one-shot      invoke persistent           fan out to the
//!  waiter                callback                    unsolicited observers
//! ```
//!
//! Every request carries an opaque client tag; responses are matched to
//! requests solely by tag, never by arrival order. A tag whose initial
//! subscribe response succeeds is promoted to a durable subscription and all
//! later messages bearing it are routed to the subscription's callback.

mod body;
mod client;
mod dial;
mod error;
mod message;
mod parser;
mod table;
mod tag;

pub use body::*;
pub use client::*;
pub use dial::*;
pub use error::*;
pub use message::*;
pub use parser::*;
pub use tag::*;
