//! Mirrors Kubernetes objects into per-namespace caches and turns their
//! add/update/delete notifications into normalized resource events.

pub mod config;
pub mod controller;
pub mod domain;
pub mod error;
pub mod events;
pub mod k8s;
pub mod reader;

pub use error::{Error, Result};
