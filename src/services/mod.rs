pub mod batch;
pub mod cache_writer;
pub mod classifiers;
pub mod enqueue;
pub mod queue;
pub mod runner;
pub mod storage;
