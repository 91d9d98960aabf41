//! PostgreSQL integration
//!
//! Pooled connections ([`PostgresClient`]) and the [`PostgresStore`]
//! implementation of the relational store used for real runs.

pub mod adapter;
pub mod client;

pub use adapter::PostgresStore;
pub use client::PostgresClient;
