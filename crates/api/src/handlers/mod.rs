//! The concrete handlers the compiler wires into trees.

pub mod arg_filter;
pub mod args;
pub mod auth;
pub mod basic;
pub mod cors;
pub mod docs;
pub mod file;
pub mod query;
pub mod resource;
