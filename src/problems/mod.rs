//! Problems shipped with the crate.

pub mod pair_sum;
