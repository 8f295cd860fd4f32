pub mod common;

mod ai_ban_pipeline_test;
mod incremental_cache_test;
