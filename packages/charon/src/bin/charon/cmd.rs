pub mod cache;
pub mod prefetch;
pub mod resolve;
pub mod validate;
