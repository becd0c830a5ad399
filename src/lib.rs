//! A deterministic [WASM-4](https://wasm4.org) compatible fantasy console.
//!
//! Carts run on [`WasmiBackend`], which implements the full WASM-4 import
//! table on a 64 KiB linear memory. Console logic that does not depend on
//! the engine (rasterizer, sound chip, disk) lives in [`core`]. On top of
//! that sit [`State`] snapshots and [rollback netplay](netplay).
//!
//! ```no_run
//! use netcart::{Backend, RuntimeConfig, WasmiBackend};
//!
//! # fn main() -> anyhow::Result<()> {
//! let cart = std::fs::read("cart.wasm")?;
//! let mut backend = WasmiBackend::from_bytes(&cart, &RuntimeConfig::default())?;
//! backend.call_start();
//! for _ in 0..60 {
//!     backend.call_update();
//! }
//! std::fs::write("cart.state", backend.save_state().to_bytes()?)?;
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

pub mod config;
pub mod core;
pub mod error;
pub mod netplay;
pub mod patch;
pub mod state;
pub mod wasmi_backend;

#[doc(inline)]
pub use crate::{
    config::RuntimeConfig,
    core::{Backend, Sink, Source},
    error::{CrashReason, LoadError, NetplayError, PatchError, StateError},
    state::State,
    wasmi_backend::WasmiBackend,
};
