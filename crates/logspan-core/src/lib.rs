pub mod context;
pub mod engine;
pub mod error;
pub mod field;
pub mod observer;
pub mod storage;
pub mod time;
pub mod trace;
