// Core modules implementing parsing, fan-out, cache state, storage, and error modeling.
pub mod cache;
pub mod error;
pub mod fanout;
pub mod file_store;
pub mod lines;
pub mod model;
pub mod notify;
pub mod rows;
pub mod source;
pub mod store;
