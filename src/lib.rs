// Library root
// -----------
// The binary (`main.rs`) is a thin wrapper; the pieces live here so they
// can be tested without a terminal or a network.
//
// Module responsibilities:
// - `config`: persisted API key and privacy waiver (shared TOML file).
// - `sample`: a file read from disk together with its SHA-256.
// - `api`: HTTP transport plus the scan and report calls.
// - `poll`: waits for a report with a fixed delay and an overall timeout.
// - `ui`: consent prompt, spinner and report rendering.
// - `cli`: argument parsing and the per-sample workflow.
pub mod api;
pub mod cli;
pub mod config;
pub mod poll;
pub mod sample;
pub mod ui;
