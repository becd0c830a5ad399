//! Engine independent console logic.
//!
//! Everything in here operates on plain byte regions through the [`Source`]
//! and [`Sink`] traits, so it can be driven by the wasmi host as well as by
//! tests that use plain arrays.

pub mod audio;
pub mod disk;
pub mod framebuffer;
pub mod trace;
pub mod utils;
pub mod wasm4;
pub mod z85;

use crate::{error::StateError, state::State};

/// Common trait for WebAssembly backends.
///
/// Everything the netplay layer and presentation code need from a running
/// cart goes through this trait.
pub trait Backend {
    /// Call the cart's `update()` function.
    /// See [Callbacks](https://wasm4.org/docs/reference/functions#callbacks)
    fn call_update(&mut self);
    /// Call the cart's `start()` function.
    /// See [Callbacks](https://wasm4.org/docs/reference/functions#callbacks)
    fn call_start(&mut self);
    /// Read the content of the [FRAMEBUFFER](https://wasm4.org/docs/reference/memory#framebuffer)
    /// memory region and the palette.
    fn read_screen(&self, framebuffer: &mut [u8; wasm4::FRAMEBUFFER_SIZE], palette: &mut [u8; 16]);
    /// Provide the content of the [SYSTEM_FLAGS](https://wasm4.org/docs/reference/memory#system_flags) register.
    fn read_system_flags(&self) -> u8;
    /// Set one of the four [GAMEPADS](https://wasm4.org/docs/reference/memory#gamepads)
    /// registers.
    fn set_gamepad(&mut self, player: usize, buttons: u8);
    /// Set the [MOUSE_X](https://wasm4.org/docs/reference/memory#mouse_x),
    /// [MOUSE_Y](https://wasm4.org/docs/reference/memory#mouse_y) and
    /// [MOUSE_BUTTONS](https://wasm4.org/docs/reference/memory#mouse_buttons)
    /// registers.
    fn set_mouse(&mut self, x: i16, y: i16, buttons: u8);
    /// Set the NETPLAY register. `None` marks a local session.
    fn set_netplay(&mut self, local_player: Option<usize>);
    /// While muted, `tone` calls and audio ticks are dropped.
    fn set_muted(&mut self, muted: bool);
    /// Capture memory, globals and disk.
    fn save_state(&self) -> State;
    /// Restore a previously captured [`State`].
    fn load_state(&mut self, state: &State) -> Result<(), StateError>;
}

/// Common trait for reading from game memory.
///
/// A [`Source<T>`] reads from a cart's memory subregion that is
/// defined by the Source's provider. For instance, a [`Source<u8>`] provided
/// for reading the frame buffer will cover reading the frame buffer,
/// but no other regions, where offset 0 marks the first framebuffer byte.
pub trait Source<T>
where
    T: Copy,
{
    /// Read memory at the specified offset, relative to the start
    /// of the memory subregion the [`Source<T>`] covers.
    fn item_at(&self, offset: usize) -> Option<T>;

    /// Like [`item_at`](Source::item_at), but reads multiple values.
    fn items_at<const L: usize>(&self, offset: usize) -> Option<[T; L]>;
}

impl<T: Copy> Source<T> for [T] {
    fn item_at(&self, offset: usize) -> Option<T> {
        self.get(offset).copied()
    }

    fn items_at<const L: usize>(&self, offset: usize) -> Option<[T; L]> {
        self.get(offset..offset.checked_add(L)?)
            .and_then(|s| s.try_into().ok())
    }
}

impl<T: Copy> Source<T> for Vec<T> {
    fn item_at(&self, offset: usize) -> Option<T> {
        self.as_slice().item_at(offset)
    }

    fn items_at<const L: usize>(&self, offset: usize) -> Option<[T; L]> {
        self.as_slice().items_at(offset)
    }
}

impl<const N: usize, T: Copy> Source<T> for [T; N] {
    fn item_at(&self, offset: usize) -> Option<T> {
        self.as_slice().item_at(offset)
    }

    fn items_at<const L: usize>(&self, offset: usize) -> Option<[T; L]> {
        self.as_slice().items_at(offset)
    }
}

/// Common trait for writing to game memory.
///
/// A [`Sink<T>`] writes to a cart's memory region that is defined by the Sink's provider.
/// Like [`Source<T>`], a [`Sink<T>`] may only cover a specific memory subregion.
pub trait Sink<T>
where
    T: Copy,
{
    /// Write memory at the specified offset, relative to the start
    /// of the memory subregion the [`Sink<T>`] covers. Writes past the end
    /// are ignored.
    fn set_item_at(&mut self, offset: usize, item: T);

    /// Fill the entire memory subregion with values of T by
    /// cloning `item`
    fn fill(&mut self, item: T);
}

impl<T: Copy> Sink<T> for [T] {
    fn set_item_at(&mut self, offset: usize, item: T) {
        if let Some(slot) = self.get_mut(offset) {
            *slot = item;
        }
    }

    fn fill(&mut self, item: T) {
        <[T]>::fill(self, item)
    }
}

impl<T: Copy> Sink<T> for Vec<T> {
    fn set_item_at(&mut self, offset: usize, item: T) {
        self.as_mut_slice().set_item_at(offset, item)
    }

    fn fill(&mut self, item: T) {
        <[T]>::fill(self, item)
    }
}

impl<const N: usize, T: Copy> Sink<T> for [T; N] {
    fn set_item_at(&mut self, offset: usize, item: T) {
        self.as_mut_slice().set_item_at(offset, item)
    }

    fn fill(&mut self, item: T) {
        <[T]>::fill(self, item)
    }
}
