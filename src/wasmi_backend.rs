//! The WASM host, running carts on the [wasmi](https://docs.rs/wasmi) interpreter.

use std::ops::Range;

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, error, info, warn};
use wasmi::{
    core::{F32, F64},
    Caller, Engine, Extern, ExternType, Func, Global, Instance, Linker, Memory, MemoryType,
    Module, Mutability, Store, TypedFunc, Value,
};

use crate::{
    config::RuntimeConfig,
    core::{
        audio::{command_queue, AudioInterface, CommandReceiver},
        disk::{Disk, DiskManager},
        framebuffer::{self, BlitFlags},
        trace, utils, wasm4, Backend,
    },
    error::{CrashReason, LoadError, StateError, CRASH_TITLE},
    patch,
    state::State,
};

/// Everything host functions can reach besides linear memory.
struct HostState {
    disk: Disk,
    audio: AudioInterface,
}

/// A cart instance together with its memory, disk and audio queue.
pub struct WasmiBackend {
    config: RuntimeConfig,
    engine: Engine,
    store: Store<HostState>,
    memory: Memory,
    instance: Option<Instance>,
    start: Option<TypedFunc<(), ()>>,
    update: Option<TypedFunc<(), ()>>,
    global_names: Vec<String>,
    cart: Option<Vec<u8>>,
    crashed: Option<CrashReason>,
    audio_receiver: Option<CommandReceiver>,
}

impl WasmiBackend {
    /// Create a host with no cart loaded and an in-memory disk.
    pub fn new(config: &RuntimeConfig) -> Result<Self, LoadError> {
        let engine = Engine::default();
        let (audio, audio_receiver) = command_queue(config.audio_queue_capacity);
        let state = HostState {
            disk: Disk::default(),
            audio,
        };
        let (store, memory) = new_store(&engine, state)?;

        Ok(Self {
            config: config.clone(),
            engine,
            store,
            memory,
            instance: None,
            start: None,
            update: None,
            global_names: Vec::new(),
            cart: None,
            crashed: None,
            audio_receiver: Some(audio_receiver),
        })
    }

    /// Create a host and load `bytes` into it.
    pub fn from_bytes(bytes: &[u8], config: &RuntimeConfig) -> Result<Self, LoadError> {
        let mut backend = Self::new(config)?;
        backend.load(bytes)?;
        Ok(backend)
    }

    /// Replace the disk, reading its content from `manager`.
    pub fn set_disk_manager(&mut self, manager: Box<dyn DiskManager>) {
        self.store.data_mut().disk = Disk::new(manager);
    }

    pub fn disk(&self) -> &Disk {
        &self.store.data().disk
    }

    pub fn audio(&self) -> &AudioInterface {
        &self.store.data().audio
    }

    /// Take the receiving end of the audio command queue to feed a
    /// [`Synthesizer`](crate::core::audio::Synthesizer).
    ///
    /// Until it is taken, queued commands are discarded every frame.
    pub fn take_audio_receiver(&mut self) -> Option<CommandReceiver> {
        self.audio_receiver.take()
    }

    /// Load a cart, replacing the current one and all of memory.
    ///
    /// Only an oversized cart is an error. Anything going wrong while
    /// compiling, linking or initializing the cart puts the host in the
    /// crashed state instead, see [`WasmiBackend::crash_reason`].
    pub fn load(&mut self, bytes: &[u8]) -> Result<(), LoadError> {
        if bytes.len() > self.config.max_cart_size {
            if self.config.enforce_size_limit {
                return Err(LoadError::CartTooLarge {
                    size: bytes.len(),
                    limit: self.config.max_cart_size,
                });
            }
            warn!(
                "cart is larger than {} bytes, make sure the release build is small enough to be bundled",
                self.config.max_cart_size
            );
        }

        let cart = if self.config.export_globals {
            match patch::export_globals(bytes) {
                Ok(patched) => patched.into_owned(),
                Err(err) => {
                    warn!("could not export globals: {}", err);
                    bytes.to_vec()
                }
            }
        } else {
            bytes.to_vec()
        };

        self.cart = Some(cart);
        self.instantiate()
    }

    /// Load the current cart again from scratch.
    pub fn reboot(&mut self) -> Result<(), LoadError> {
        if self.cart.is_none() {
            return Ok(());
        }
        self.instantiate()
    }

    /// Restore the default registers and leave the crashed state.
    ///
    /// With `zero_memory` all of memory is cleared first.
    pub fn reset(&mut self, zero_memory: bool) {
        let mem = self.memory.data_mut(&mut self.store);
        if zero_memory {
            mem.fill(0);
        }
        utils::write_default_registers(mem);
        self.crashed = None;
    }

    /// Why the cart stopped running, `None` while it runs.
    pub fn crash_reason(&self) -> Option<&CrashReason> {
        self.crashed.as_ref()
    }

    pub fn is_running(&self) -> bool {
        self.update.is_some() && self.crashed.is_none()
    }

    /// The whole linear memory.
    pub fn memory(&self) -> &[u8] {
        self.memory.data(&self.store)
    }

    pub fn memory_mut(&mut self) -> &mut [u8] {
        self.memory.data_mut(&mut self.store)
    }

    fn instantiate(&mut self) -> Result<(), LoadError> {
        // carry disk and audio over into a fresh store and memory
        let state = HostState {
            disk: std::mem::take(&mut self.store.data_mut().disk),
            audio: self.store.data().audio.clone(),
        };
        let (store, memory) = new_store(&self.engine, state)?;
        self.store = store;
        self.memory = memory;
        self.instance = None;
        self.start = None;
        self.update = None;
        self.global_names.clear();
        self.crashed = None;

        let module = match &self.cart {
            Some(cart) => Module::new(&self.engine, &cart[..]),
            None => return Ok(()),
        };
        let module = match module {
            Ok(module) => module,
            Err(err) => {
                self.crash(CrashReason::classify(&err.to_string(), true), &err.to_string());
                return Ok(());
            }
        };

        let instance = match self.link(&module) {
            Ok(instance) => instance,
            Err(err) => {
                self.crash(CrashReason::classify(&err, false), &err);
                return Ok(());
            }
        };

        self.global_names = module
            .exports()
            .filter(|export| matches!(export.ty(), ExternType::Global(_)))
            .map(|export| export.name().to_string())
            .collect();
        self.start = instance.get_typed_func::<(), ()>(&self.store, "start").ok();
        self.update = instance.get_typed_func::<(), ()>(&self.store, "update").ok();
        self.instance = Some(instance);
        debug!(
            "cart instantiated with {} exported globals",
            self.global_names.len()
        );

        if self.update.is_none() {
            self.crash(
                CrashReason::MissingExport("update".to_string()),
                "the cart does not export an update function",
            );
            return Ok(());
        }

        // WASI entry points, not to be confused with the `start` callback
        for name in ["_start", "_initialize"] {
            let Ok(func) = instance.get_typed_func::<(), ()>(&self.store, name) else {
                continue;
            };
            if let Err(err) = func.call(&mut self.store, ()) {
                self.crash(CrashReason::classify(&err.to_string(), false), &err.to_string());
                return Ok(());
            }
        }

        Ok(())
    }

    fn link(&mut self, module: &Module) -> Result<Instance, String> {
        let mut linker = <Linker<HostState>>::new(&self.engine);
        linker
            .define("env", "memory", self.memory)
            .map_err(|e| e.to_string())?;

        let store = &mut self.store;
        let memory = self.memory;
        let env: [(&str, Func); 17] = [
            ("blit", blit(store, memory)),
            ("blitSub", blit_sub(store, memory)),
            ("line", line(store, memory)),
            ("hline", hline(store, memory)),
            ("vline", vline(store, memory)),
            ("oval", oval(store, memory)),
            ("rect", rect(store, memory)),
            ("text", text(store, memory)),
            ("textUtf8", text_utf8(store, memory)),
            ("textUtf16", text_utf16(store, memory)),
            ("tone", tone(store)),
            ("diskr", diskr(store, memory)),
            ("diskw", diskw(store, memory)),
            ("trace", trace(store, memory)),
            ("traceUtf8", trace_utf8(store, memory)),
            ("traceUtf16", trace_utf16(store, memory)),
            ("tracef", tracef(store, memory)),
        ];

        for (name, func) in env {
            linker
                .define("env", name, func)
                .map_err(|e| e.to_string())?;
        }

        linker
            .instantiate(&mut self.store, module)
            .and_then(|pre| pre.start(&mut self.store))
            .map_err(|e| e.to_string())
    }

    fn crash(&mut self, reason: CrashReason, detail: &str) {
        error!("cart crashed ({:?}): {}", reason, detail);
        let message = reason.screen_message();
        utils::draw_crash_screen(self.memory_mut(), CRASH_TITLE, &message);
        self.crashed = Some(reason);
    }

    fn call_guest(&mut self, func: Option<TypedFunc<(), ()>>) {
        let Some(func) = func else {
            return;
        };
        if let Err(err) = func.call(&mut self.store, ()) {
            let detail = err.to_string();
            self.crash(CrashReason::classify(&detail, false), &detail);
        }
    }

    fn global(&self, name: &str) -> Option<Global> {
        self.instance?
            .get_export(&self.store, name)
            .and_then(Extern::into_global)
    }
}

fn new_store(engine: &Engine, state: HostState) -> Result<(Store<HostState>, Memory), LoadError> {
    let mut store = Store::new(engine, state);
    let memory_type = MemoryType::new(1, Some(1)).map_err(|e| LoadError::Engine(e.to_string()))?;
    let memory =
        Memory::new(&mut store, memory_type).map_err(|e| LoadError::Engine(e.to_string()))?;
    utils::write_default_registers(memory.data_mut(&mut store));
    Ok((store, memory))
}

fn global_to_string(value: &Value) -> Option<String> {
    match value {
        Value::I32(v) => Some(v.to_string()),
        Value::I64(v) => Some(v.to_string()),
        Value::F32(v) => Some(f32::from(*v).to_string()),
        Value::F64(v) => Some(f64::from(*v).to_string()),
        _ => None,
    }
}

fn global_from_string(current: &Value, text: &str) -> Option<Value> {
    match current {
        Value::I32(_) => text.parse().ok().map(Value::I32),
        Value::I64(_) => text.parse().ok().map(Value::I64),
        Value::F32(_) => text.parse::<f32>().ok().map(|v| Value::F32(F32::from(v))),
        Value::F64(_) => text.parse::<f64>().ok().map(|v| Value::F64(F64::from(v))),
        _ => None,
    }
}

impl Backend for WasmiBackend {
    fn call_update(&mut self) {
        if let Some(receiver) = &self.audio_receiver {
            while receiver.try_recv().is_ok() {}
        }

        if !self.is_running() {
            return;
        }

        if self.read_system_flags() & wasm4::SYSTEM_PRESERVE_FRAMEBUFFER == 0 {
            let (_, fb) = utils::screen_mut(self.memory_mut());
            framebuffer::clear(fb);
        }

        self.call_guest(self.update.clone());
        self.store.data().audio.tick();
    }

    fn call_start(&mut self) {
        if self.is_running() {
            self.call_guest(self.start.clone());
        }
    }

    fn read_screen(&self, framebuffer: &mut [u8; wasm4::FRAMEBUFFER_SIZE], palette: &mut [u8; 16]) {
        let mem = self.memory();
        framebuffer.copy_from_slice(
            &mem[wasm4::FRAMEBUFFER_ADDR..wasm4::FRAMEBUFFER_ADDR + wasm4::FRAMEBUFFER_SIZE],
        );
        palette.copy_from_slice(&mem[wasm4::PALETTE_ADDR..wasm4::PALETTE_ADDR + 16]);
    }

    fn read_system_flags(&self) -> u8 {
        self.memory()[wasm4::SYSTEM_FLAGS_ADDR]
    }

    fn set_gamepad(&mut self, player: usize, buttons: u8) {
        if player < wasm4::PLAYER_COUNT {
            self.memory_mut()[wasm4::GAMEPAD1_ADDR + player] = buttons;
        }
    }

    fn set_mouse(&mut self, x: i16, y: i16, buttons: u8) {
        let mem = self.memory_mut();
        LittleEndian::write_i16(&mut mem[wasm4::MOUSE_X_ADDR..], x);
        LittleEndian::write_i16(&mut mem[wasm4::MOUSE_Y_ADDR..], y);
        mem[wasm4::MOUSE_BUTTONS_ADDR] = buttons;
    }

    fn set_netplay(&mut self, local_player: Option<usize>) {
        self.memory_mut()[wasm4::NETPLAY_ADDR] = match local_player {
            Some(player) => wasm4::NETPLAY_ACTIVE | (player as u8 & 0b11),
            None => 0,
        };
    }

    fn set_muted(&mut self, muted: bool) {
        self.store.data().audio.set_muted(muted);
    }

    fn save_state(&self) -> State {
        let globals = self
            .global_names
            .iter()
            .filter_map(|name| {
                let global = self.global(name)?;
                let value = global_to_string(&global.get(&self.store))?;
                Some((name.clone(), value))
            })
            .collect();

        State {
            memory: self.memory().to_vec(),
            globals,
            disk: self.disk().bytes().to_vec(),
        }
    }

    fn load_state(&mut self, state: &State) -> Result<(), StateError> {
        if state.memory.len() != wasm4::MEMORY_SIZE {
            return Err(StateError::MemorySize {
                expected: wasm4::MEMORY_SIZE,
                actual: state.memory.len(),
            });
        }
        if state.disk.len() > wasm4::STORAGE_SIZE {
            return Err(StateError::DiskSize(state.disk.len()));
        }
        if self.instance.is_none() && !state.globals.is_empty() {
            return Err(StateError::NotRunning);
        }

        // check every global before touching anything
        let mut globals = Vec::with_capacity(state.globals.len());
        for (name, text) in &state.globals {
            let global = self
                .global(name)
                .ok_or_else(|| StateError::UnknownGlobal(name.clone()))?;
            if global.ty(&self.store).mutability() == Mutability::Const {
                continue;
            }
            let value = global_from_string(&global.get(&self.store), text).ok_or_else(|| {
                StateError::BadGlobalValue {
                    name: name.clone(),
                    value: text.clone(),
                }
            })?;
            globals.push((global, value));
        }

        self.memory_mut().copy_from_slice(&state.memory);
        for (global, value) in globals {
            if let Err(err) = global.set(&mut self.store, value) {
                warn!("failed to restore global: {}", err);
            }
        }
        self.store.data_mut().disk.restore(&state.disk);

        // the snapshot predates any crash that happened since
        if self.update.is_some() {
            self.crashed = None;
        }
        Ok(())
    }
}

/// Clamp a guest pointer range to linear memory.
fn guest_range(mem_len: usize, ptr: u32, len: u32, what: &str) -> Range<usize> {
    let start = (ptr as usize).min(mem_len);
    let end = start.saturating_add(len as usize).min(mem_len);
    if end - start < len as usize {
        warn!("{}: {:#x}+{} reaches past the end of memory", what, ptr, len);
    }
    start..end
}

fn blit(store: &mut Store<HostState>, memory: Memory) -> Func {
    Func::wrap(
        store,
        move |mut caller: Caller<'_, HostState>,
              sprite: u32,
              x: i32,
              y: i32,
              width: u32,
              height: u32,
              flags: u32| {
            draw_sprite(
                memory.data_mut(&mut caller),
                sprite,
                x,
                y,
                width,
                height,
                0,
                0,
                width,
                flags,
            )
        },
    )
}

fn blit_sub(store: &mut Store<HostState>, memory: Memory) -> Func {
    Func::wrap(
        store,
        move |mut caller: Caller<'_, HostState>,
              sprite: u32,
              x: i32,
              y: i32,
              width: u32,
              height: u32,
              src_x: u32,
              src_y: u32,
              stride: u32,
              flags: u32| {
            draw_sprite(
                memory.data_mut(&mut caller),
                sprite,
                x,
                y,
                width,
                height,
                src_x,
                src_y,
                stride,
                flags,
            )
        },
    )
}

#[allow(clippy::too_many_arguments)]
fn draw_sprite(
    mem: &mut [u8],
    ptr: u32,
    x: i32,
    y: i32,
    width: u32,
    height: u32,
    src_x: u32,
    src_y: u32,
    stride: u32,
    flags: u32,
) {
    let flags = BlitFlags::from(flags);
    let len = framebuffer::sprite_len(width, height, src_x, src_y, stride, flags);
    let len = u32::try_from(len).unwrap_or(u32::MAX);
    let range = guest_range(mem.len(), ptr, len, "blit");
    let sprite = mem[range].to_vec();

    let (draw_colors, fb) = utils::screen_mut(mem);
    framebuffer::blit_sub(
        fb,
        &sprite[..],
        x,
        y,
        width,
        height,
        src_x,
        src_y,
        stride,
        flags,
        draw_colors,
    );
}

fn line(store: &mut Store<HostState>, memory: Memory) -> Func {
    Func::wrap(
        store,
        move |mut caller: Caller<'_, HostState>, x1: i32, y1: i32, x2: i32, y2: i32| {
            let (draw_colors, fb) = utils::screen_mut(memory.data_mut(&mut caller));
            framebuffer::line(fb, draw_colors, x1, y1, x2, y2);
        },
    )
}

fn hline(store: &mut Store<HostState>, memory: Memory) -> Func {
    Func::wrap(
        store,
        move |mut caller: Caller<'_, HostState>, x: i32, y: i32, len: u32| {
            let (draw_colors, fb) = utils::screen_mut(memory.data_mut(&mut caller));
            framebuffer::hline(fb, draw_colors, x, y, len);
        },
    )
}

fn vline(store: &mut Store<HostState>, memory: Memory) -> Func {
    Func::wrap(
        store,
        move |mut caller: Caller<'_, HostState>, x: i32, y: i32, len: u32| {
            let (draw_colors, fb) = utils::screen_mut(memory.data_mut(&mut caller));
            framebuffer::vline(fb, draw_colors, x, y, len);
        },
    )
}

fn oval(store: &mut Store<HostState>, memory: Memory) -> Func {
    Func::wrap(
        store,
        move |mut caller: Caller<'_, HostState>, x: i32, y: i32, width: u32, height: u32| {
            let (draw_colors, fb) = utils::screen_mut(memory.data_mut(&mut caller));
            framebuffer::oval(fb, draw_colors, x, y, width, height);
        },
    )
}

fn rect(store: &mut Store<HostState>, memory: Memory) -> Func {
    Func::wrap(
        store,
        move |mut caller: Caller<'_, HostState>, x: i32, y: i32, width: u32, height: u32| {
            let (draw_colors, fb) = utils::screen_mut(memory.data_mut(&mut caller));
            framebuffer::rect(fb, draw_colors, x, y, width, height);
        },
    )
}

fn text(store: &mut Store<HostState>, memory: Memory) -> Func {
    Func::wrap(
        store,
        move |mut caller: Caller<'_, HostState>, ptr: u32, x: i32, y: i32| {
            let mem = memory.data_mut(&mut caller);
            let start = (ptr as usize).min(mem.len());
            let chars: Vec<u8> = mem[start..].iter().copied().take_while(|&c| c != 0).collect();
            let (draw_colors, fb) = utils::screen_mut(mem);
            framebuffer::text(fb, draw_colors, &chars, x, y);
        },
    )
}

fn text_utf8(store: &mut Store<HostState>, memory: Memory) -> Func {
    Func::wrap(
        store,
        move |mut caller: Caller<'_, HostState>, ptr: u32, len: u32, x: i32, y: i32| {
            let mem = memory.data_mut(&mut caller);
            let chars = mem[guest_range(mem.len(), ptr, len, "textUtf8")].to_vec();
            let (draw_colors, fb) = utils::screen_mut(mem);
            framebuffer::text(fb, draw_colors, &chars, x, y);
        },
    )
}

fn text_utf16(store: &mut Store<HostState>, memory: Memory) -> Func {
    Func::wrap(
        store,
        move |mut caller: Caller<'_, HostState>, ptr: u32, len: u32, x: i32, y: i32| {
            let mem = memory.data_mut(&mut caller);
            let range = guest_range(mem.len(), ptr, len, "textUtf16");
            let chars: Vec<u16> = mem[range]
                .chunks_exact(2)
                .map(LittleEndian::read_u16)
                .collect();
            let (draw_colors, fb) = utils::screen_mut(mem);
            framebuffer::text_utf16(fb, draw_colors, &chars, x, y);
        },
    )
}

fn tone(store: &mut Store<HostState>) -> Func {
    Func::wrap(
        store,
        |caller: Caller<'_, HostState>, frequency: u32, duration: u32, volume: u32, flags: u32| {
            caller.data().audio.tone(frequency, duration, volume, flags);
        },
    )
}

fn diskr(store: &mut Store<HostState>, memory: Memory) -> Func {
    Func::wrap(
        store,
        move |mut caller: Caller<'_, HostState>, dest: u32, size: u32| -> u32 {
            let (mem, state) = memory.data_and_store_mut(&mut caller);
            let range = guest_range(mem.len(), dest, size, "diskr");
            state.disk.read(&mut mem[range]) as u32
        },
    )
}

fn diskw(store: &mut Store<HostState>, memory: Memory) -> Func {
    Func::wrap(
        store,
        move |mut caller: Caller<'_, HostState>, src: u32, size: u32| -> u32 {
            let (mem, state) = memory.data_and_store_mut(&mut caller);
            let range = guest_range(mem.len(), src, size, "diskw");
            state.disk.write(&mem[range]) as u32
        },
    )
}

fn trace(store: &mut Store<HostState>, memory: Memory) -> Func {
    Func::wrap(store, move |caller: Caller<'_, HostState>, ptr: u32| {
        let mem = memory.data(&caller);
        info!(target: "cart", "{}", trace::c_string(mem, ptr as usize));
    })
}

fn trace_utf8(store: &mut Store<HostState>, memory: Memory) -> Func {
    Func::wrap(
        store,
        move |caller: Caller<'_, HostState>, ptr: u32, len: u32| {
            let mem = memory.data(&caller);
            let bytes = &mem[guest_range(mem.len(), ptr, len, "traceUtf8")];
            info!(target: "cart", "{}", String::from_utf8_lossy(bytes));
        },
    )
}

fn trace_utf16(store: &mut Store<HostState>, memory: Memory) -> Func {
    Func::wrap(
        store,
        move |caller: Caller<'_, HostState>, ptr: u32, len: u32| {
            let mem = memory.data(&caller);
            let bytes = &mem[guest_range(mem.len(), ptr, len, "traceUtf16")];
            info!(target: "cart", "{}", trace::utf16_lossy(bytes));
        },
    )
}

fn tracef(store: &mut Store<HostState>, memory: Memory) -> Func {
    Func::wrap(
        store,
        move |caller: Caller<'_, HostState>, fmt: u32, args: u32| {
            let mem = memory.data(&caller);
            info!(target: "cart", "{}", trace::tracef(mem, fmt as usize, args as usize));
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        audio::AudioCommand,
        disk::MemoryDisk,
        framebuffer::get_pixel,
        wasm4::{FRAMEBUFFER_ADDR, FRAMEBUFFER_SIZE, USER_MEMORY_ADDR},
    };

    fn cart(body: &str) -> Vec<u8> {
        wat::parse_str(format!(
            r#"(module
                (import "env" "memory" (memory 1 1))
                {body})"#
        ))
        .unwrap()
    }

    fn backend(body: &str) -> WasmiBackend {
        WasmiBackend::from_bytes(&cart(body), &RuntimeConfig::default()).unwrap()
    }

    fn fb(backend: &WasmiBackend) -> &[u8] {
        &backend.memory()[FRAMEBUFFER_ADDR..FRAMEBUFFER_ADDR + FRAMEBUFFER_SIZE]
    }

    const COUNTER: &str = r#"
        (global $count (mut i32) (i32.const 0))
        (func (export "update")
            (global.set $count (i32.add (global.get $count) (i32.const 1)))
            (i32.store (i32.const 0x19a0) (global.get $count)))"#;

    fn counter_value(backend: &WasmiBackend) -> u32 {
        LittleEndian::read_u32(&backend.memory()[USER_MEMORY_ADDR..])
    }

    #[test]
    fn power_on_registers() {
        let backend = backend(r#"(func (export "update"))"#);
        let mem = backend.memory();
        assert_eq!(utils::default_palette(), mem[wasm4::PALETTE_ADDR..wasm4::PALETTE_ADDR + 16]);
        assert_eq!(0x1203, utils::draw_colors(mem));
        assert_eq!(0x7fff, LittleEndian::read_i16(&mem[wasm4::MOUSE_X_ADDR..]));
        assert_eq!(0x7fff, LittleEndian::read_i16(&mem[wasm4::MOUSE_Y_ADDR..]));
        assert!(backend.is_running());
    }

    #[test]
    fn counter_runs() {
        let mut backend = backend(COUNTER);
        backend.call_start();
        for _ in 0..60 {
            backend.call_update();
        }
        assert_eq!(60, counter_value(&backend));
    }

    #[test]
    fn draw_imports() {
        let mut backend = backend(
            r#"
            (import "env" "rect" (func $rect (param i32 i32 i32 i32)))
            (import "env" "line" (func $line (param i32 i32 i32 i32)))
            (func (export "update")
                (call $rect (i32.const 10) (i32.const 10) (i32.const 4) (i32.const 4))
                (call $line (i32.const 0) (i32.const 100) (i32.const 50) (i32.const 100)))"#,
        );
        backend.call_update();

        let fb = fb(&backend);
        // default draw colors fill with palette 2 and leave the outline transparent
        assert_eq!(Some(2), get_pixel(fb, 11, 11));
        assert_eq!(Some(2), get_pixel(fb, 10, 10));
        assert_eq!(Some(0), get_pixel(fb, 14, 10));
        assert_eq!(Some(2), get_pixel(fb, 25, 100));
        assert_eq!(Some(0), get_pixel(fb, 60, 100));
    }

    #[test]
    fn framebuffer_clears_unless_preserved() {
        let mut backend = backend(
            r#"
            (import "env" "hline" (func $hline (param i32 i32 i32)))
            (func (export "start")
                (call $hline (i32.const 0) (i32.const 0) (i32.const 8)))
            (func (export "update")
                (i32.store8 (i32.const 0x1f) (i32.const 1)))"#,
        );
        backend.call_start();
        assert_eq!(Some(2), get_pixel(fb(&backend), 0, 0));

        backend.call_update();
        assert_eq!(Some(0), get_pixel(fb(&backend), 0, 0));

        backend.memory_mut()[FRAMEBUFFER_ADDR] = 0xff;
        backend.call_update();
        assert_eq!(0xff, fb(&backend)[0]);
    }

    #[test]
    fn blit_and_text() {
        let mut backend = backend(
            r#"
            (import "env" "blit" (func $blit (param i32 i32 i32 i32 i32 i32)))
            (import "env" "text" (func $text (param i32 i32 i32)))
            (data (i32.const 0x2000) "\80\00\00\00\00\00\00\00")
            (data (i32.const 0x2100) "A\00")
            (func (export "update")
                (i32.store16 (i32.const 0x14) (i32.const 0x0040))
                (call $blit (i32.const 0x2000) (i32.const 5) (i32.const 5) (i32.const 8) (i32.const 8) (i32.const 0))
                (call $text (i32.const 0x2100) (i32.const 20) (i32.const 20))
                ;; a sprite reaching past the end of memory must not trap
                (call $blit (i32.const 0xfffe) (i32.const 50) (i32.const 50) (i32.const 64) (i32.const 64) (i32.const 1)))"#,
        );
        backend.call_update();
        assert!(backend.is_running());

        let fb = fb(&backend);
        assert_eq!(Some(3), get_pixel(fb, 5, 5));
        assert_eq!(Some(0), get_pixel(fb, 6, 5));
        // the glyph of 'A' stays transparent, its background is drawn
        assert_eq!(Some(3), get_pixel(fb, 20, 21));
        assert_eq!(Some(0), get_pixel(fb, 21, 21));
    }

    #[test]
    fn unreachable_crashes() {
        let mut backend = backend(
            r#"
            (global $count (mut i32) (i32.const 0))
            (func (export "update")
                (global.set $count (i32.add (global.get $count) (i32.const 1)))
                (if (i32.eq (global.get $count) (i32.const 3)) (then unreachable)))"#,
        );
        for _ in 0..5 {
            backend.call_update();
        }
        assert_eq!(Some(&CrashReason::Unreachable), backend.crash_reason());
        assert_eq!(
            utils::palette_bytes(utils::CRASH_PALETTE),
            backend.memory()[wasm4::PALETTE_ADDR..wasm4::PALETTE_ADDR + 16]
        );

        // guest code is no longer called
        let count = backend.save_state().globals["__global_0"].clone();
        assert_eq!("3", count);
        backend.call_update();
        assert_eq!(count, backend.save_state().globals["__global_0"]);

        backend.reset(false);
        assert!(backend.is_running());
        assert_eq!(utils::default_palette(), backend.memory()[wasm4::PALETTE_ADDR..wasm4::PALETTE_ADDR + 16]);
    }

    #[test]
    fn out_of_bounds_crashes() {
        let mut backend = backend(
            r#"(func (export "update") (drop (i32.load (i32.const 0x10000))))"#,
        );
        backend.call_update();
        assert_eq!(Some(&CrashReason::OutOfBounds), backend.crash_reason());
    }

    #[test]
    fn load_failures_crash() {
        let backend = backend(r#"(func (export "start"))"#);
        assert_eq!(
            Some(&CrashReason::MissingExport("update".into())),
            backend.crash_reason()
        );

        let backend = backend_from(cart(
            r#"(import "env" "teleport" (func (param i32)))
               (func (export "update"))"#,
        ));
        assert_eq!(Some(&CrashReason::MissingImport), backend.crash_reason());

        let backend = backend_from(b"\0asm\x01\0\0\0\x01\x05garbage".to_vec());
        assert_eq!(Some(&CrashReason::Corrupt), backend.crash_reason());
    }

    fn backend_from(bytes: Vec<u8>) -> WasmiBackend {
        WasmiBackend::from_bytes(&bytes, &RuntimeConfig::default()).unwrap()
    }

    #[test]
    fn size_limit() {
        let mut bytes = cart(r#"(func (export "update"))"#);
        // pad with a custom section
        bytes.extend_from_slice(&[0, 0x80, 0x80, 0x04, 0]);
        bytes.resize(bytes.len() + 0x10000 - 1, 0);

        let config = RuntimeConfig::default();
        assert!(matches!(
            WasmiBackend::from_bytes(&bytes, &config),
            Err(LoadError::CartTooLarge { .. })
        ));

        let config = config.with_enforce_size_limit(false);
        let backend = WasmiBackend::from_bytes(&bytes, &config).unwrap();
        assert!(backend.is_running());
    }

    #[test]
    fn disk_round_trip() {
        let storage = MemoryDisk::default();
        let body = r#"
            (import "env" "diskr" (func $diskr (param i32 i32) (result i32)))
            (import "env" "diskw" (func $diskw (param i32 i32) (result i32)))
            (data (i32.const 0x2000) "\2a\00\00\00")
            (func (export "start")
                (i32.store (i32.const 0x3000) (call $diskr (i32.const 0x3004) (i32.const 64))))
            (func (export "update")
                (drop (call $diskw (i32.const 0x2000) (i32.const 4))))"#;

        let mut first = WasmiBackend::new(&RuntimeConfig::default()).unwrap();
        first.set_disk_manager(Box::new(storage.clone()));
        first.load(&cart(body)).unwrap();
        first.call_start();
        assert_eq!(0, LittleEndian::read_u32(&first.memory()[0x3000..]));
        first.call_update();
        assert!(storage.content().is_some());

        let mut second = WasmiBackend::new(&RuntimeConfig::default()).unwrap();
        second.set_disk_manager(Box::new(storage));
        second.load(&cart(body)).unwrap();
        second.call_start();
        assert_eq!(4, LittleEndian::read_u32(&second.memory()[0x3000..]));
        assert_eq!(0x2a, second.memory()[0x3004]);
    }

    #[test]
    fn tones_and_ticks_are_queued() {
        let mut backend = backend(
            r#"
            (import "env" "tone" (func $tone (param i32 i32 i32 i32)))
            (func (export "update")
                (call $tone (i32.const 440) (i32.const 10) (i32.const 100) (i32.const 2)))"#,
        );
        let receiver = backend.take_audio_receiver().unwrap();
        backend.call_update();

        let commands: Vec<AudioCommand> = receiver.try_iter().collect();
        assert_eq!(2, commands.len());
        assert!(matches!(commands[0], AudioCommand::Tone(tone) if tone.start_freq == 440.0));
        assert_eq!(AudioCommand::Tick, commands[1]);

        backend.set_muted(true);
        backend.call_update();
        assert_eq!(0, receiver.try_iter().count());
    }

    #[test]
    fn input_registers() {
        let mut backend = backend(r#"(func (export "update"))"#);
        backend.set_gamepad(2, wasm4::BUTTON_UP | wasm4::BUTTON_1);
        backend.set_gamepad(7, 0xff);
        backend.set_mouse(-3, 150, wasm4::MOUSE_LEFT);
        backend.set_netplay(Some(1));

        let mem = backend.memory();
        assert_eq!(65, mem[wasm4::GAMEPAD3_ADDR]);
        assert_eq!(0, mem[wasm4::GAMEPAD4_ADDR]);
        assert_eq!(-3, LittleEndian::read_i16(&mem[wasm4::MOUSE_X_ADDR..]));
        assert_eq!(150, LittleEndian::read_i16(&mem[wasm4::MOUSE_Y_ADDR..]));
        assert_eq!(wasm4::MOUSE_LEFT, mem[wasm4::MOUSE_BUTTONS_ADDR]);
        assert_eq!(0b101, mem[wasm4::NETPLAY_ADDR]);

        backend.set_netplay(None);
        assert_eq!(0, backend.memory()[wasm4::NETPLAY_ADDR]);
    }

    #[test]
    fn save_reset_restore() {
        let mut backend = backend(COUNTER);
        for _ in 0..60 {
            backend.call_update();
        }
        let state = backend.save_state();
        assert_eq!(Some("60"), state.globals.get("__global_0").map(String::as_str));

        backend.reboot().unwrap();
        backend.call_update();
        assert_eq!(1, counter_value(&backend));

        backend.load_state(&state).unwrap();
        assert_eq!(60, counter_value(&backend));
        backend.call_update();
        assert_eq!(61, counter_value(&backend));
    }

    #[test]
    fn globals_of_every_type() {
        let mut backend = backend(
            r#"
            (global $a (mut i64) (i64.const -5))
            (global $b (mut f32) (f32.const 0.1))
            (global $c (mut f64) (f64.const 1e300))
            (global $k i32 (i32.const 9))
            (export "k" (global $k))
            (func (export "update")
                (global.set $a (i64.const 0))
                (global.set $b (f32.const 0))
                (global.set $c (f64.const 0)))"#,
        );
        let state = backend.save_state();
        assert_eq!("-5", state.globals["__global_0"]);
        assert_eq!("0.1", state.globals["__global_1"]);
        assert_eq!("9", state.globals["k"]);

        backend.call_update();
        assert_ne!(state, backend.save_state());

        // immutable globals are recorded but skipped on restore
        let mut edited = state.clone();
        edited.globals.insert("k".into(), "10".into());
        backend.load_state(&edited).unwrap();
        assert_eq!(state, backend.save_state());
    }

    #[test]
    fn invalid_states_are_rejected() {
        let mut backend = backend(COUNTER);
        backend.call_update();
        let before = backend.save_state();

        let mut state = before.clone();
        state.globals.insert("missing".into(), "1".into());
        state.memory[USER_MEMORY_ADDR] = 99;
        assert!(matches!(
            backend.load_state(&state),
            Err(StateError::UnknownGlobal(_))
        ));

        let mut state = before.clone();
        state.globals.insert("__global_0".into(), "one".into());
        assert!(matches!(
            backend.load_state(&state),
            Err(StateError::BadGlobalValue { .. })
        ));

        let state = State {
            memory: vec![0; 10],
            ..before.clone()
        };
        assert!(matches!(
            backend.load_state(&state),
            Err(StateError::MemorySize { .. })
        ));

        // nothing was applied
        assert_eq!(before, backend.save_state());
    }

    #[test]
    fn bad_pointers_never_trap() {
        let mut backend = backend(
            r#"
            (import "env" "trace" (func $trace (param i32)))
            (import "env" "traceUtf8" (func $traceUtf8 (param i32 i32)))
            (import "env" "traceUtf16" (func $traceUtf16 (param i32 i32)))
            (import "env" "tracef" (func $tracef (param i32 i32)))
            (import "env" "textUtf8" (func $textUtf8 (param i32 i32 i32 i32)))
            (import "env" "textUtf16" (func $textUtf16 (param i32 i32 i32 i32)))
            (import "env" "diskr" (func $diskr (param i32 i32) (result i32)))
            (import "env" "diskw" (func $diskw (param i32 i32) (result i32)))
            (func (export "update")
                (call $trace (i32.const -1))
                (call $traceUtf8 (i32.const 0xfff0) (i32.const 1000))
                (call $traceUtf16 (i32.const -4) (i32.const -1))
                (call $tracef (i32.const 0xffff) (i32.const -1))
                (call $textUtf8 (i32.const 0xfff0) (i32.const 1000) (i32.const 0) (i32.const 0))
                (call $textUtf16 (i32.const -2) (i32.const 7) (i32.const 0) (i32.const 0))
                (drop (call $diskw (i32.const 0xfffe) (i32.const 100)))
                (drop (call $diskr (i32.const 0xffff) (i32.const 100))))"#,
        );
        backend.call_update();
        assert!(backend.is_running());
        assert_eq!(2, backend.disk().len());
    }
}
