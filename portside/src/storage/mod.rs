//! Local storage: data-dir layout and settings

pub mod layout;
pub mod settings;
