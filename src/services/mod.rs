pub mod charts;
pub mod cleaner;
pub mod export;
pub mod file_loader;
pub mod llm_agent;
pub mod sanitizer;
pub mod statistics;
pub mod storage;
pub mod summary;
