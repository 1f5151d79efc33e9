//! Scenario tests for nanopipe, driven through a stub runner

mod helpers;

mod missing_parameter;
mod piped_failure;
mod success_chain;
