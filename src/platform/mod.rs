// TableSleuth - platform/mod.rs
//
// Platform abstraction layer.
// Dependencies: standard library, util, directories, walkdir, glob, memmap2.
// Must NOT depend on: core, app.

pub mod config;
pub mod fs;
