pub mod aligner;
pub mod bitmap;
pub mod coverage;
pub mod enumerator;
pub mod error;
pub mod fasta;
pub mod interval;
pub mod iupac;
pub mod pairwise;
pub mod pipeline;
pub mod projector;
pub mod report;
pub mod screen;
pub mod search;
pub mod selector;
pub mod types;

pub use aligner::*;
pub use coverage::*;
pub use enumerator::*;
pub use error::*;
pub use fasta::*;
pub use pipeline::*;
pub use projector::*;
pub use report::*;
pub use screen::*;
pub use search::*;
pub use selector::*;
pub use types::*;
