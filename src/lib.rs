//! Guidescreen - CRISPR guide set design
//!
//! Designs the smallest set of guide RNAs that cuts every gene of a family:
//! candidates are enumerated from conserved alignment regions, screened for
//! off-target hits, and a minimum covering set is selected.

pub mod design;

pub use design::*;
