//! # fewshot
//!
//! Episodic training and validation loops for few-shot classifiers on top
//! of [dfdx], plus a small runner that trains a reference model on a
//! synthetic class pool.
//!
//! Everything in [fewshot_core] is re-exported here; [runner] holds the
//! pieces the `fewshot` binary is made of.

pub use fewshot_core::*;

pub mod runner;

pub mod prelude {
    pub use fewshot_core::prelude::*;
}
