//! `imagecheck` runner: environment-driven entry point around
//! [`imagecheck_exec::Provisioner`].

pub mod runner;
pub mod settings;
