mod corpus;
mod error;
mod midi_importer;
mod midi_writer;
mod model;
mod splitter;
mod suitability;
mod util;

#[cfg(test)]
mod fixtures;

pub use corpus::*;
pub use error::*;
pub use midi_importer::*;
pub use midi_writer::*;
pub use model::config::*;
pub use model::instrumentation::*;
pub use model::note::*;
pub use model::pianoroll::*;
pub use splitter::*;
pub use suitability::*;
pub use util::*;
