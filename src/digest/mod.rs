pub mod audit;
pub mod bullets;
pub mod chunk_processor;
pub mod chunking;
pub mod config;
pub mod diagnostics;
pub mod finalizer;
pub mod links;
pub mod message;
pub mod paths;
pub mod pipeline;
pub mod provider;
pub mod relationship;
pub mod retry;
pub mod similarity;
pub mod text_cleaner;
pub mod util;
pub mod validator;

#[cfg(test)]
pub(crate) mod testing;
