pub mod auth;
pub mod config;
pub mod dicomweb;
pub mod domain;
pub mod error;
pub mod http;
pub mod output;
pub mod progress;
pub mod retriever;
pub mod store;

#[cfg(test)]
mod testing;
