#![doc = include_str!("../README.md")]

pub mod config;
pub mod error;
pub mod id_management;
pub mod node;
