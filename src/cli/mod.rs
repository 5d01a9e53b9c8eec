// src/cli/mod.rs

pub mod dispatcher;
pub mod render;
