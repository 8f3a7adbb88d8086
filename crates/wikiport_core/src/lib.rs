pub mod client;
pub mod config;
pub mod convert;
pub mod cookies;
pub mod error;
pub mod index;
pub mod media;
pub mod navigation;
pub mod runtime;
pub mod source;
pub mod sync;
pub mod transpile;

#[cfg(test)]
mod testing;
