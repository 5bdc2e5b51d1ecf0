//! Discovery and cataloging of resources inside a mirror.
//!
//! A [`Pipeline`] walks a mirror looking for resource roots (directories
//! holding one of a [`ResourceKind`]'s sentinel files). For each one found
//! it runs an inner pass over the resource's files with a [`Scanner`],
//! typically a [`Union`] of:
//!
//! - [`ManifestScanner`], recording a digest of every file;
//! - [`NameScanner`], warning about awkward file names;
//! - [`MetadataScanner`], reading or generating the resource's descriptor.
//!
//! The walk can be suspended after any resource by saving
//! [`Pipeline::position`] and resumed later with [`Pipeline::seek`].

mod cursor;
pub mod error;
mod manifest;
pub mod metadata;
mod names;
mod pipeline;
mod report;
mod resource;
mod visitor;

pub use crate::manifest::ManifestScanner;
pub use crate::metadata::{CommandGenerator, Generator, MetadataScanner, Mode};
pub use crate::names::NameScanner;
pub use crate::pipeline::Pipeline;
pub use crate::report::{Phase, Problem, Severity};
pub use crate::resource::{ROOT_POSITION, Resource, ResourceKind};
pub use crate::visitor::{Content, Scanner, Union};
