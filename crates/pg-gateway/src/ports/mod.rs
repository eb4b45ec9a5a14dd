//! Ports for the gateway.
//!
//! The schema engine is an outbound port: the gateway hands it operations and
//! request context, and never interprets how they are executed.

pub mod outbound;

pub use outbound::{EngineOptions, GraphQLRequest, SchemaEngine};
