#![doc = "registry-sync-core: keeps a slim local mirror of a package registry in sync with its change feed."]

//! The pipeline tails the registry's ordered change feed from a persisted
//! cursor, re-fetches every changed package, projects it down to the fields
//! downstream consumers need and overwrites it in a cache. Delivery is
//! at-least-once; every write is an idempotent whole-record overwrite.
//!
//! # Usage
//! Build an [`origin::RegistryClient`], a [`feed::CouchChangeFeed`] and a
//! [`cache`] backend, then hand them to [`synchronise::synchronise`].

pub mod cache;
pub mod checkpoint;
pub mod config;
pub mod consumer;
pub mod contract;
pub mod error;
pub mod feed;
pub mod origin;
pub mod package_sync;
pub mod projector;
pub mod store;
pub mod sweeper;
pub mod synchronise;
pub mod watchdog;
