pub use arrayvec::*;
pub use boolinator::Boolinator;
pub use derive_more;
pub use itertools::*;
pub use parking_lot;
pub use rand::prelude::*;
pub use smallvec::*;
pub use strum;
pub use thiserror::{self, Error};

pub use lazy_static::lazy_static;
pub use logging::{
    self, prelude::*, slog_kv_debug, slog_kv_display, slog_value_debug, slog_value_display,
};
#[cfg(feature = "metrics")]
pub use metrics::{
    self, counter_metric, declare_counter_metric, declare_gauge_metric, gauge_metric,
};

// common imports that annoyingly get resolved to other pub exports of std/core
// https://github.com/intellij-rust/intellij-rust/issues/5654
pub use std::{
    error::Error,
    fmt::{Debug, Display, Formatter, Result as FmtResult},
    hash::Hash,
    iter::{empty, once},
    marker::PhantomData,
};

pub type BoxedResult<T> = Result<T, Box<dyn Error>>;

pub mod panic;
pub mod random;

pub fn seeded_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}
