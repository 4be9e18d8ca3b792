//! GitHub REST API client and payload types.

pub mod api;
