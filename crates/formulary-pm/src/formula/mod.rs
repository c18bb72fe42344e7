//! Formula model: the declarative description of one installable package.
//!
//! Formulas are parsed from JSON or TOML, validated once, and handed to the
//! runner as immutable values. Validation rejects placeholder checksums before
//! anything touches the network.

mod catalog;
mod digest;
#[allow(clippy::module_inception)]
mod formula;
mod step;

pub use catalog::Catalog;
pub use digest::{Digest, DigestAlgorithm, DigestError};
pub use formula::{validate_key, Formula, FormulaDefinition};
pub use step::{InstallStep, TestCommand};
