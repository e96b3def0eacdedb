// TableSleuth - app/mod.rs
//
// Application layer: definition loading, run orchestration, output sink.
// Dependencies: core, platform, util.

pub mod config_mgr;
pub mod pipeline;
pub mod sink;
