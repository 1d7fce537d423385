//! trialscope-cli: logging setup and table rendering for the `scope` binary.

pub mod logging;
pub mod output;
