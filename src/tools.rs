pub mod executor;

pub use executor::{CommandOutcome, CommandRunner};
