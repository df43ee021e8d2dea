#![forbid(unsafe_code)]

pub mod connection_cache;
pub mod decision_cache;
pub mod dispatcher;
pub mod health_monitor;
pub mod interception_queue;
pub mod packet;
pub mod policy;
mod recovery;
pub mod retry;
pub mod verdict_engine;
