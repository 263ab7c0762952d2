pub mod config;
pub mod instrumentation;
pub mod note;
pub mod pianoroll;
