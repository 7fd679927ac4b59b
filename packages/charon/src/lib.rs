//! Library for `charon`.
//!
//! This library is not intended to be used directly and is unsupported in
//! that configuration. It's only a library to enable sharing code in
//! `charon` with benchmarks and integration tests in the `charon` repository.

pub mod cache;
pub mod config;
pub mod fs;
pub mod hash;
pub mod lister;
pub mod metadata;
pub mod mirror;
pub mod path;
pub mod prefetch;
pub mod progress;
pub mod resolve;
pub mod subprocess;
pub mod validate;
