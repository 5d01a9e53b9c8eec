// src/core/mod.rs

pub mod arg_parser;
pub mod compiler;
pub mod declaration;
pub mod parameters;
pub mod registry;
pub mod resolver;
pub mod settings;
