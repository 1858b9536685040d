//! In-process realtime hub: typed, topic-scoped row-change streams.
//!
//! Every subscription is keyed by a [`Topic`](agora_types::events::Topic)
//! and owned through a [`Subscription`] handle. Dropping or explicitly
//! unsubscribing the handle tears the subscription down, and topics without
//! subscribers are pruned so they stop costing anything on publish.

pub mod hub;
pub mod subscription;

pub use hub::Hub;
pub use subscription::Subscription;
