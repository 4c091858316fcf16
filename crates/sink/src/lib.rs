//! Result sinks
//!
//! Consumers of per-cycle results: logs, channels, files and webhooks.

#![warn(missing_docs)]

pub mod trait_;
pub mod builtin;
pub mod jsonl;
pub mod webhook;

pub use trait_::{ResultSink, SinkError};
pub use builtin::{LogSink, ChannelSink, CallbackSink, FanoutSink};
pub use jsonl::JsonLinesSink;
pub use webhook::WebhookSink;
