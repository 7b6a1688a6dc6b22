//! Lua bundle runtime
//!
//! A bundle's `main.lua` returns a table holding the descriptor fields and
//! the `load`/`start` lifecycle functions. Each play-through evaluates the
//! source in its own restricted Lua state. Calls from Lua into the context
//! are buffered and applied to the real `MicrogameContext` in order once the
//! Lua call returns; getters read a snapshot taken just before the call.

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::task::Poll;

use mlua::{Function, IntoLuaMulti, Lua, LuaOptions, StdLib, Table, Value, Variadic};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use tracing::{info, warn};

use microgame_core::context::{AssetKind, MicrogameContext};
use microgame_core::erased::{ErasedMicrogame, MicrogameError};
use microgame_core::state_machine::{Phase, UndecidedFinish, WinState};
use microgame_core::typed::{
    Color, DescriptorError, InputEvent, InputKind, MicrogameDescriptor, Rgb,
};

/// Allocation cap for one bundle's Lua state
pub const LUA_MEMORY_LIMIT: usize = 16 * 1024 * 1024;

/// Where a bundle lives; supplies descriptor defaults
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleOrigin {
    pub author: String,
    pub name: String,
    pub dir: PathBuf,
}

impl BundleOrigin {
    pub fn new(author: impl Into<String>, name: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            author: author.into(),
            name: name.into(),
            dir: dir.into(),
        }
    }

    fn chunk_name(&self) -> String {
        format!("{}/{}/{}", self.author, self.name, crate::loader::ENTRY_FILE)
    }

    fn url_prefix(&self) -> String {
        self.dir.to_string_lossy().replace('\\', "/")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("Lua error: {0}")]
    Lua(String),
    #[error("Bundle must return a table, got {0}")]
    NotATable(&'static str),
    #[error("Missing required field `{0}`")]
    MissingField(&'static str),
    #[error("Field `{field}` must be {expected}")]
    FieldType {
        field: &'static str,
        expected: &'static str,
    },
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
}

/// mlua errors are not `Send + Sync`; keep the message only
fn lua_err(e: mlua::Error) -> ScriptError {
    ScriptError::Lua(e.to_string())
}

#[derive(Debug, Clone, Copy, Default)]
struct Snapshot {
    difficulty: u8,
    speed: f32,
    duration: f32,
    time_left: f32,
    elapsed: f32,
    win_state: WinState,
    timed_out: bool,
    running: bool,
    undecided_finish: UndecidedFinish,
}

impl Snapshot {
    fn capture(ctx: &MicrogameContext) -> Self {
        Self {
            difficulty: ctx.difficulty().level(),
            speed: ctx.speed(),
            duration: ctx.duration(),
            time_left: ctx.time_left(),
            elapsed: ctx.elapsed(),
            win_state: ctx.win_state(),
            timed_out: ctx.timed_out(),
            running: !matches!(ctx.phase(), Phase::Loading | Phase::Finished),
            undecided_finish: ctx.state().undecided_finish(),
        }
    }
}

enum Command {
    Win,
    Lose,
    Finish,
    Wait(f32, Function),
    Asset(AssetKind, String, String),
}

#[derive(Default)]
struct Handlers {
    update: Option<Function>,
    input: Option<Function>,
    beat: Option<Function>,
    timeout: Option<Function>,
}

#[derive(Default)]
struct Bridge {
    snapshot: Snapshot,
    commands: Vec<Command>,
    handlers: Handlers,
    rng: Option<ChaCha20Rng>,
}

impl Bridge {
    fn enter(&mut self, ctx: &mut MicrogameContext) {
        self.snapshot = Snapshot::capture(ctx);
        if self.rng.is_none() {
            self.rng = Some(ChaCha20Rng::seed_from_u64(ctx.rng().gen()));
        }
    }

    /// Queue a decision; the snapshot follows so later getters agree
    fn decide(&mut self, outcome: WinState) -> bool {
        self.commands.push(match outcome {
            WinState::Won => Command::Win,
            _ => Command::Lose,
        });
        let applies = self.snapshot.running && !self.snapshot.win_state.is_decided();
        if applies {
            self.snapshot.win_state = outcome;
        }
        applies
    }

    /// Queue a finish; later calls in the same Lua call see it finished
    fn finish(&mut self) {
        self.commands.push(Command::Finish);
        if !self.snapshot.running {
            return;
        }
        if !self.snapshot.win_state.is_decided()
            && self.snapshot.undecided_finish == UndecidedFinish::Lose
        {
            self.snapshot.win_state = WinState::Lost;
        }
        self.snapshot.running = false;
    }
}

struct LuaRuntime {
    lua: Lua,
    ctx_table: Table,
    bridge: Rc<RefCell<Bridge>>,
    label: String,
}

impl LuaRuntime {
    fn invoke(
        self: &Rc<Self>,
        ctx: &mut MicrogameContext,
        function: &Function,
        args: impl IntoLuaMulti,
    ) -> Result<Value, MicrogameError> {
        self.bridge.borrow_mut().enter(ctx);
        let result = function.call::<Value>(args);
        self.flush(ctx);
        result.map_err(|e| MicrogameError::Script(format!("{}: {}", self.label, e)))
    }

    /// Apply queued context calls in the order Lua made them
    fn flush(self: &Rc<Self>, ctx: &mut MicrogameContext) {
        let commands = std::mem::take(&mut self.bridge.borrow_mut().commands);
        for command in commands {
            match command {
                Command::Win => {
                    ctx.win();
                }
                Command::Lose => {
                    ctx.lose();
                }
                Command::Finish => {
                    ctx.finish();
                }
                Command::Wait(seconds, callback) => {
                    let runtime = Rc::clone(self);
                    ctx.wait(seconds, move |ctx| {
                        let args = runtime.ctx_table.clone();
                        runtime.invoke(ctx, &callback, args).map(|_| ())
                    });
                }
                Command::Asset(AssetKind::Sprite, name, path) => ctx.load_sprite(name, &path),
                Command::Asset(AssetKind::Sound, name, path) => ctx.load_sound(name, &path),
                Command::Asset(AssetKind::Font, name, path) => ctx.load_font(name, &path),
            }
        }
    }

    fn handler(&self, pick: impl Fn(&Handlers) -> Option<Function>) -> Option<Function> {
        pick(&self.bridge.borrow().handlers)
    }
}

impl Drop for LuaRuntime {
    fn drop(&mut self) {
        // Handlers and queued waits hold references back into the Lua state
        if let Ok(mut bridge) = self.bridge.try_borrow_mut() {
            bridge.handlers = Handlers::default();
            bridge.commands.clear();
        }
    }
}

/// One play-through's instance of a Lua bundle
pub struct LuaMicrogame {
    runtime: Rc<LuaRuntime>,
    descriptor: MicrogameDescriptor,
    load: Option<Function>,
    start: Function,
    rgb: Option<Function>,
}

impl LuaMicrogame {
    /// Evaluate `source` in a fresh state and read its export table
    pub fn from_source(source: &str, origin: &BundleOrigin) -> Result<Self, ScriptError> {
        let label = format!("{}:{}", origin.author, origin.name);
        let lua = sandbox(&label)?;

        let export = match lua
            .load(source)
            .set_name(origin.chunk_name())
            .eval::<Value>()
            .map_err(lua_err)?
        {
            Value::Table(table) => table,
            other => return Err(ScriptError::NotATable(other.type_name())),
        };

        let (descriptor, rgb) = read_descriptor(&export, origin)?;
        descriptor.validate()?;
        let start = optional_function(&export, "start")?.ok_or(ScriptError::MissingField("start"))?;
        let load = optional_function(&export, "load")?;

        let bridge = Rc::new(RefCell::new(Bridge::default()));
        let ctx_table = context_table(&lua, &bridge).map_err(lua_err)?;

        Ok(Self {
            runtime: Rc::new(LuaRuntime {
                lua,
                ctx_table,
                bridge,
                label,
            }),
            descriptor,
            load,
            start,
            rgb,
        })
    }

    fn call_handler(
        &self,
        ctx: &mut MicrogameContext,
        pick: impl Fn(&Handlers) -> Option<Function>,
        args: impl IntoLuaMulti,
    ) -> Result<(), MicrogameError> {
        match self.runtime.handler(pick) {
            Some(handler) => self.runtime.invoke(ctx, &handler, args).map(|_| ()),
            None => Ok(()),
        }
    }
}

impl ErasedMicrogame for LuaMicrogame {
    fn descriptor(&self) -> &MicrogameDescriptor {
        &self.descriptor
    }

    fn load(&mut self, ctx: &mut MicrogameContext) -> Poll<Result<(), MicrogameError>> {
        let Some(load) = self.load.clone() else {
            return Poll::Ready(Ok(()));
        };
        let args = self.runtime.ctx_table.clone();
        match self.runtime.invoke(ctx, &load, args) {
            Ok(Value::Boolean(false)) => Poll::Pending,
            Ok(_) => Poll::Ready(Ok(())),
            Err(error) => Poll::Ready(Err(error)),
        }
    }

    fn start(&mut self, ctx: &mut MicrogameContext) -> Result<(), MicrogameError> {
        let args = self.runtime.ctx_table.clone();
        self.runtime.invoke(ctx, &self.start, args).map(|_| ())
    }

    fn update(&mut self, ctx: &mut MicrogameContext, dt: f32) -> Result<(), MicrogameError> {
        let args = (self.runtime.ctx_table.clone(), dt);
        self.call_handler(ctx, |h| h.update.clone(), args)
    }

    fn input(
        &mut self,
        ctx: &mut MicrogameContext,
        event: &InputEvent,
    ) -> Result<(), MicrogameError> {
        let event = event_table(&self.runtime.lua, event)
            .map_err(|e| MicrogameError::Script(e.to_string()))?;
        let args = (self.runtime.ctx_table.clone(), event);
        self.call_handler(ctx, |h| h.input.clone(), args)
    }

    fn beat(&mut self, ctx: &mut MicrogameContext, beat: i64) -> Result<(), MicrogameError> {
        let args = (self.runtime.ctx_table.clone(), beat);
        self.call_handler(ctx, |h| h.beat.clone(), args)
    }

    fn timeout(&mut self, ctx: &mut MicrogameContext) -> Result<(), MicrogameError> {
        let args = self.runtime.ctx_table.clone();
        self.call_handler(ctx, |h| h.timeout.clone(), args)
    }

    fn rgb(&self, ctx: &MicrogameContext) -> Color {
        let Some(function) = &self.rgb else {
            return match self.descriptor.rgb {
                Rgb::Fixed(color) => color,
                Rgb::Computed => Color::BLACK,
            };
        };

        self.runtime.bridge.borrow_mut().snapshot = Snapshot::capture(ctx);
        let result = function
            .call::<Value>(self.runtime.ctx_table.clone())
            .map_err(lua_err)
            .and_then(|value| color_from_value(&value));

        let discarded = std::mem::take(&mut self.runtime.bridge.borrow_mut().commands);
        if !discarded.is_empty() {
            warn!(bundle = %self.runtime.label, "rgb must not change the play-through; ignored {} calls", discarded.len());
        }

        result.unwrap_or_else(|error| {
            warn!(bundle = %self.runtime.label, "rgb failed: {}", error);
            Color::BLACK
        })
    }
}

/// Lua state with only the pure libraries loaded
fn sandbox(label: &str) -> Result<Lua, ScriptError> {
    let lua = Lua::new_with(
        StdLib::TABLE | StdLib::STRING | StdLib::MATH | StdLib::UTF8 | StdLib::COROUTINE,
        LuaOptions::default(),
    )
    .map_err(lua_err)?;
    lua.set_memory_limit(LUA_MEMORY_LIMIT).map_err(lua_err)?;

    let globals = lua.globals();
    for name in ["dofile", "loadfile"] {
        globals.set(name, Value::Nil).map_err(lua_err)?;
    }

    let label = label.to_string();
    let print = lua
        .create_function(move |_, values: Variadic<Value>| {
            let line = values.iter().map(describe).collect::<Vec<_>>().join("\t");
            info!(target: "microgame::script", bundle = %label, "{}", line);
            Ok(())
        })
        .map_err(lua_err)?;
    globals.set("print", print).map_err(lua_err)?;

    Ok(lua)
}

fn describe(value: &Value) -> String {
    match value {
        Value::Nil => "nil".to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.to_string_lossy(),
        other => format!("<{}>", other.type_name()),
    }
}

fn read_descriptor(
    export: &Table,
    origin: &BundleOrigin,
) -> Result<(MicrogameDescriptor, Option<Function>), ScriptError> {
    let prompt = optional_string(export, "prompt")?.ok_or(ScriptError::MissingField("prompt"))?;
    let duration = match export.get::<Value>("duration").map_err(lua_err)? {
        Value::Integer(seconds) => seconds as f32,
        Value::Number(seconds) => seconds as f32,
        Value::Nil => return Err(ScriptError::MissingField("duration")),
        _ => {
            return Err(ScriptError::FieldType {
                field: "duration",
                expected: "a number",
            })
        }
    };
    let input = match optional_string(export, "input")? {
        Some(kind) => kind.parse::<InputKind>()?,
        None => InputKind::Keys,
    };
    let (rgb, rgb_fn) = match export.get::<Value>("rgb").map_err(lua_err)? {
        Value::Nil => (Rgb::Fixed(Color::BLACK), None),
        Value::Function(function) => (Rgb::Computed, Some(function)),
        other => (Rgb::Fixed(color_from_value(&other)?), None),
    };

    let descriptor = MicrogameDescriptor {
        prompt,
        name: optional_string(export, "name")?.unwrap_or_else(|| origin.name.clone()),
        author: optional_string(export, "author")?.unwrap_or_else(|| origin.author.clone()),
        pack: optional_string(export, "pack")?,
        rgb,
        duration,
        input,
        url_prefix: optional_string(export, "url_prefix")?.unwrap_or_else(|| origin.url_prefix()),
    };
    Ok((descriptor, rgb_fn))
}

fn optional_string(table: &Table, field: &'static str) -> Result<Option<String>, ScriptError> {
    match table.get::<Value>(field).map_err(lua_err)? {
        Value::Nil => Ok(None),
        Value::String(s) => Ok(Some(s.to_string_lossy())),
        _ => Err(ScriptError::FieldType {
            field,
            expected: "a string",
        }),
    }
}

fn optional_function(table: &Table, field: &'static str) -> Result<Option<Function>, ScriptError> {
    match table.get::<Value>(field).map_err(lua_err)? {
        Value::Nil => Ok(None),
        Value::Function(function) => Ok(Some(function)),
        _ => Err(ScriptError::FieldType {
            field,
            expected: "a function",
        }),
    }
}

/// Accepts `{r, g, b}` or `{r = .., g = .., b = ..}`, components 0-255
fn color_from_value(value: &Value) -> Result<Color, ScriptError> {
    let invalid = ScriptError::FieldType {
        field: "rgb",
        expected: "a color table or a function",
    };
    let Value::Table(table) = value else {
        return Err(invalid);
    };

    let mut parts = [0u8; 3];
    for (slot, (index, key)) in parts.iter_mut().zip([(1, "r"), (2, "g"), (3, "b")]) {
        let component = match table.get::<Option<f64>>(index).map_err(lua_err)? {
            Some(component) => Some(component),
            None => table.get::<Option<f64>>(key).map_err(lua_err)?,
        };
        let component = component.ok_or(ScriptError::FieldType {
            field: "rgb",
            expected: "three color components",
        })?;
        *slot = component.round().clamp(0.0, 255.0) as u8;
    }
    Ok(Color::new(parts[0], parts[1], parts[2]))
}

fn event_table(lua: &Lua, event: &InputEvent) -> mlua::Result<Table> {
    let table = lua.create_table()?;
    match event {
        InputEvent::KeyDown { key } => {
            table.set("type", "key_down")?;
            table.set("key", key.as_str())?;
        }
        InputEvent::KeyUp { key } => {
            table.set("type", "key_up")?;
            table.set("key", key.as_str())?;
        }
        InputEvent::MouseMove { x, y } => {
            table.set("type", "mouse_move")?;
            table.set("x", *x)?;
            table.set("y", *y)?;
        }
        InputEvent::Click { x, y } => {
            table.set("type", "click")?;
            table.set("x", *x)?;
            table.set("y", *y)?;
        }
    }
    Ok(table)
}

fn getter<R, F>(lua: &Lua, bridge: &Rc<RefCell<Bridge>>, read: F) -> mlua::Result<Function>
where
    F: Fn(&Snapshot) -> R + 'static,
    R: IntoLuaMulti,
{
    let bridge = Rc::clone(bridge);
    lua.create_function(move |_, ()| Ok(read(&bridge.borrow().snapshot)))
}

fn handler_setter(
    lua: &Lua,
    bridge: &Rc<RefCell<Bridge>>,
    slot: fn(&mut Handlers) -> &mut Option<Function>,
) -> mlua::Result<Function> {
    let bridge = Rc::clone(bridge);
    lua.create_function(move |_, handler: Function| {
        *slot(&mut bridge.borrow_mut().handlers) = Some(handler);
        Ok(())
    })
}

fn asset_loader(
    lua: &Lua,
    bridge: &Rc<RefCell<Bridge>>,
    kind: AssetKind,
) -> mlua::Result<Function> {
    let bridge = Rc::clone(bridge);
    lua.create_function(move |_, (name, path): (String, String)| {
        bridge
            .borrow_mut()
            .commands
            .push(Command::Asset(kind, name, path));
        Ok(())
    })
}

/// The `ctx` table handed to every Lua call
fn context_table(lua: &Lua, bridge: &Rc<RefCell<Bridge>>) -> mlua::Result<Table> {
    let ctx = lua.create_table()?;

    let b = Rc::clone(bridge);
    ctx.set(
        "win",
        lua.create_function(move |_, ()| Ok(b.borrow_mut().decide(WinState::Won)))?,
    )?;
    let b = Rc::clone(bridge);
    ctx.set(
        "lose",
        lua.create_function(move |_, ()| Ok(b.borrow_mut().decide(WinState::Lost)))?,
    )?;
    let b = Rc::clone(bridge);
    ctx.set(
        "finish",
        lua.create_function(move |_, ()| {
            b.borrow_mut().finish();
            Ok(())
        })?,
    )?;
    let b = Rc::clone(bridge);
    ctx.set(
        "wait",
        lua.create_function(move |_, (seconds, callback): (f32, Function)| {
            b.borrow_mut().commands.push(Command::Wait(seconds, callback));
            Ok(())
        })?,
    )?;

    ctx.set("load_sprite", asset_loader(lua, bridge, AssetKind::Sprite)?)?;
    ctx.set("load_sound", asset_loader(lua, bridge, AssetKind::Sound)?)?;
    ctx.set("load_font", asset_loader(lua, bridge, AssetKind::Font)?)?;

    ctx.set("on_update", handler_setter(lua, bridge, |h| &mut h.update)?)?;
    ctx.set("on_input", handler_setter(lua, bridge, |h| &mut h.input)?)?;
    ctx.set("on_beat", handler_setter(lua, bridge, |h| &mut h.beat)?)?;
    ctx.set("on_timeout", handler_setter(lua, bridge, |h| &mut h.timeout)?)?;

    ctx.set("difficulty", getter(lua, bridge, |s| s.difficulty)?)?;
    ctx.set("speed", getter(lua, bridge, |s| s.speed)?)?;
    ctx.set("duration", getter(lua, bridge, |s| s.duration)?)?;
    ctx.set("time_left", getter(lua, bridge, |s| s.time_left)?)?;
    ctx.set("elapsed", getter(lua, bridge, |s| s.elapsed)?)?;
    ctx.set("timed_out", getter(lua, bridge, |s| s.timed_out)?)?;
    ctx.set("win_state", getter(lua, bridge, |s| s.win_state.as_option())?)?;

    let b = Rc::clone(bridge);
    ctx.set(
        "random",
        lua.create_function(move |_, (lo, hi): (Option<i64>, Option<i64>)| {
            let mut bridge = b.borrow_mut();
            let rng = bridge
                .rng
                .get_or_insert_with(|| ChaCha20Rng::seed_from_u64(0));
            match (lo, hi) {
                (None, None) => Ok(Value::Number(rng.gen::<f64>())),
                (Some(hi), None) if hi >= 1 => Ok(Value::Integer(rng.gen_range(1..=hi))),
                (Some(lo), Some(hi)) if lo <= hi => Ok(Value::Integer(rng.gen_range(lo..=hi))),
                _ => Err(mlua::Error::runtime("random: interval is empty")),
            }
        })?,
    )?;

    Ok(ctx)
}
