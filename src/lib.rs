#[macro_use]
pub mod logger;

pub mod canvas;
pub mod cli;
pub mod components;
pub mod io;
pub mod ipc;
pub mod ops;
pub mod project;
pub mod settings;
