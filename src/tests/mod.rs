//! Cross-module scenario tests: the submission engine, block synchronizer
//! and mempool checker driven against scripted mock nodes.

pub mod support;

mod resubmit;
mod submission;
