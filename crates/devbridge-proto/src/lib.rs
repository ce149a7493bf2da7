//! # devbridge Protocol
//!
//! Wire-level pieces shared by the driver and the transports.
//!
//! ## Topics
//!
//! - `/devices/{device}/meta/name`: device title
//! - `/devices/{device}/controls/{control}`: current control value (retained)
//! - `/devices/{device}/controls/{control}/on`: command to the control
//! - `/devices/{device}/controls/{control}/meta/{type,order,max}`: control metadata
//!
//! ## Matching
//!
//! Subscription patterns use `+` for a single segment and `#` for the rest of
//! the topic. [`topic_match`] is the one routing rule every transport obeys.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod matcher;
pub mod message;
pub mod topics;

pub use matcher::topic_match;
pub use message::{Message, QoS};
pub use topics::{ParsedTopic, TopicError, TopicKind};
