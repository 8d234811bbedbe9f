extern crate clap;
extern crate gcfs;

pub mod cli;
pub mod dump;
pub mod edit;
pub mod error;
pub mod info;
pub mod tree;
pub mod utils;
