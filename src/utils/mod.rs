//! helpers shared across the crate
pub mod byte_order;
pub mod digest;
pub mod fs_size_calculator;
#[cfg(test)]
pub(crate) mod init_test_environment;
pub mod time_util;
pub mod traits;
