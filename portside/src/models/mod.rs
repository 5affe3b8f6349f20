//! Data model for the deployment core

pub mod application;
pub mod artifact;
pub mod deployment;
pub mod host;
pub mod release;
