//! groupgate - session auth, OAuth sign-in and hierarchical group permissions
//!
//! Groups form a tree addressed by materialized paths. A user's rights come
//! from CASL-style rules built out of their group memberships, checked by
//! axum guards and again by handlers on the concrete subject.

pub mod auth;
pub mod cli;
pub mod config;
pub mod config_validator;
pub mod directory;
pub mod http_server;
pub mod observability;
pub mod permissions;
