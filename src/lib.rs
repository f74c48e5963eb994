pub mod cluster;
pub mod config;
pub mod error;
pub mod generator;
pub mod pusher;
pub mod resolver;
pub mod seed;
pub mod telemetry;
pub mod test_utils;
pub mod types;

#[cfg(test)]
extern crate quickcheck;
#[cfg(test)]
#[macro_use(quickcheck)]
extern crate quickcheck_macros;
