pub mod input;
pub mod tools;
