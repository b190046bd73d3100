//! The `utils` module collects the pieces shared by every layer of the relay:
//! the error taxonomy, logging setup and identifier sources.

pub mod error;
pub mod ids;
pub mod logging;

#[cfg(test)]
mod tests;
