//! End-to-end scenarios driving a real guard over a temporary directory.

mod harness;
mod scenarios;
