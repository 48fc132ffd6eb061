#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! BIG-IP controller
//!
//! Reconciles declarative virtual-server definitions stored in config maps
//! into the running configuration of an external BIG-IP, by watching config
//! maps, services and endpoints across a set of namespaces and emitting a
//! complete snapshot of the active virtual servers to an out-of-process
//! config driver.

pub mod annotations;
pub mod config;
pub mod informers;
pub mod k8s;
pub mod manager;
pub mod queue;
pub mod vservers;
pub mod writer;
