use tracing::{debug, error, instrument, trace};

use crate::bytecode::Op;
use crate::bytecode::assembly::Assembly;
use crate::lang::types::WORD_SIZE;
use crate::runtime::bindings::NativeBindings;
use crate::runtime::fun_callback::{
    CallbackError, FunCallbackContext, PropertyAccess, PropertyCallbackContext,
};
use crate::runtime::runtime_error::{
    RuntimeError, VmError, bad_address, division_by_zero, index_out_of_bounds, stack_underflow,
};
use crate::runtime::state::{BsVmState, Frame};

/// Configuration for the VM
#[derive(Debug, Clone)]
pub struct VmConfig {
    /// Maximum call frames (default: 1024)
    pub max_call_depth: usize,
    /// Maximum operand stack depth in words (default: 65536)
    pub max_stack_words: usize,
    /// Maximum ops per `run` or `execute_function` (None = unlimited)
    pub max_steps: Option<usize>,
    /// RAM grows in pages of this many bytes (default: 512)
    pub ram_page_size: usize,
    /// Hard RAM ceiling (default: 16 MiB)
    pub max_ram_bytes: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            max_call_depth: 1024,
            max_stack_words: 64 * 1024,
            max_steps: None,
            ram_page_size: 512,
            max_ram_bytes: 16 * 1024 * 1024,
        }
    }
}

/// Executes one assembly against any number of states. The VM itself holds
/// no mutable data; everything a run changes lives in [`BsVmState`].
pub struct BsVm<'a> {
    assembly: &'a Assembly,
    bindings: &'a NativeBindings,
    config: VmConfig,
}

pub(crate) fn words_to_bytes(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}

pub(crate) fn bytes_to_words(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks(4)
        .map(|c| {
            let mut w = [0u8; 4];
            w[..c.len()].copy_from_slice(c);
            u32::from_le_bytes(w)
        })
        .collect()
}

impl<'a> BsVm<'a> {
    pub fn new(assembly: &'a Assembly, bindings: &'a NativeBindings) -> Self {
        Self::with_config(assembly, bindings, VmConfig::default())
    }

    pub fn with_config(
        assembly: &'a Assembly,
        bindings: &'a NativeBindings,
        config: VmConfig,
    ) -> Self {
        BsVm {
            assembly,
            bindings,
            config,
        }
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    // =========================================================================
    // Entry points
    // =========================================================================

    /// Resets `state`, initializes the global frame and runs the global code.
    /// On success the state is bound to this assembly and functions may be
    /// executed on it.
    #[instrument(skip_all, fields(serial = self.assembly.serial))]
    pub fn run(&self, state: &mut BsVmState) -> Result<(), RuntimeError> {
        state.reset();
        for s in &self.assembly.strings {
            state.push_string(s.clone());
        }
        state.notify(|l| l.on_runtime_begin());

        let global_size = self.assembly.global_frame_size as usize;
        if let Err(e) = self.grow_ram(state, global_size) {
            return Err(self.crash(state, e));
        }
        state.ram_top = global_size;

        for global in &self.assembly.globals {
            let Some(init) = &global.init else { continue };
            match state.ram_slice_mut(global.offset as usize, init.len()) {
                Some(dst) => dst.copy_from_slice(init),
                None => {
                    let e = bad_address(global.offset, init.len());
                    return Err(self.crash(state, e));
                }
            }
        }
        state.notify(|l| l.on_stack_initialized());

        debug!(global_frame = global_size, "running global code");
        if let Err(e) = self.exec(state, 0, None) {
            let e = self.unwind(state, e).with_context("<global>");
            return Err(self.crash(state, e));
        }

        state.stack.clear();
        state.initialized = Some(self.assembly.serial);
        state.notify(|l| l.on_runtime_exit());
        Ok(())
    }

    /// Calls the function at `bind_point` with packed arguments `input` and
    /// writes its packed return value to `output`. Nothing is written to
    /// `output` unless the call succeeds.
    pub fn execute_function(
        &self,
        state: &mut BsVmState,
        bind_point: i32,
        input: &[u8],
        output: &mut [u8],
    ) -> Result<(), VmError> {
        let function = self
            .assembly
            .function(bind_point)
            .ok_or(VmError::InvalidBindPoint(bind_point))?;

        if state.initialized != Some(self.assembly.serial) || !state.frames.is_empty() {
            return Err(VmError::StateNotReady);
        }
        if input.len() != function.arg_size as usize {
            error!(
                function = %function.name,
                expected = function.arg_size,
                got = input.len(),
                "input size mismatch"
            );
            return Err(VmError::InputSizeMismatch {
                expected: function.arg_size as usize,
                got: input.len(),
            });
        }
        if output.len() != function.ret_size as usize {
            error!(
                function = %function.name,
                expected = function.ret_size,
                got = output.len(),
                "output size mismatch"
            );
            return Err(VmError::OutputSizeMismatch {
                expected: function.ret_size as usize,
                got: output.len(),
            });
        }

        trace!(function = %function.name, "execute_function");
        let result = (|| {
            for word in bytes_to_words(input) {
                self.push(state, word)?;
            }
            let entry = self.call(state, bind_point as u32, usize::MAX)?;
            self.exec(state, entry, Some(0))?;
            self.pop_words(state, function.ret_size as usize / 4)
        })();

        match result {
            Ok(words) => {
                output.copy_from_slice(&words_to_bytes(&words));
                Ok(())
            }
            Err(e) => {
                let e = self.unwind(state, e);
                Err(VmError::Runtime(self.crash(state, e)))
            }
        }
    }

    /// Bytes of the extern global at `bind_point` in an initialized state.
    pub fn read_global<'s>(
        &self,
        state: &'s BsVmState,
        bind_point: i32,
    ) -> Result<&'s [u8], VmError> {
        let global = self
            .assembly
            .global(bind_point)
            .ok_or(VmError::InvalidBindPoint(bind_point))?;
        if state.initialized != Some(self.assembly.serial) {
            return Err(VmError::StateNotReady);
        }
        state
            .ram_slice(global.offset as usize, global.size as usize)
            .ok_or(VmError::StateNotReady)
    }

    pub fn write_global(
        &self,
        state: &mut BsVmState,
        bind_point: i32,
        value: &[u8],
    ) -> Result<(), VmError> {
        let global = self
            .assembly
            .global(bind_point)
            .ok_or(VmError::InvalidBindPoint(bind_point))?;
        if state.initialized != Some(self.assembly.serial) {
            return Err(VmError::StateNotReady);
        }
        if value.len() != global.size as usize {
            return Err(VmError::InputSizeMismatch {
                expected: global.size as usize,
                got: value.len(),
            });
        }
        let dst = state
            .ram_slice_mut(global.offset as usize, value.len())
            .ok_or(VmError::StateNotReady)?;
        dst.copy_from_slice(value);
        Ok(())
    }

    // =========================================================================
    // Failure handling
    // =========================================================================

    /// Attaches the call stack, innermost frame first.
    fn unwind(&self, state: &BsVmState, mut err: RuntimeError) -> RuntimeError {
        for frame in state.frames.iter().rev() {
            let name = self
                .assembly
                .functions
                .get(frame.function as usize)
                .map_or("<unknown>", |f| f.name.as_str());
            err = err.with_context(name);
        }
        err
    }

    /// Drops everything above the global frame so the state stays usable.
    fn crash(&self, state: &mut BsVmState, err: RuntimeError) -> RuntimeError {
        error!(error = %err.message, "script crashed");
        state.stack.clear();
        state.frames.clear();
        state.ram_top = (self.assembly.global_frame_size as usize).min(state.ram.len());
        state.notify(|l| l.on_crash(&err));
        err
    }

    // =========================================================================
    // Stack and memory helpers
    // =========================================================================

    fn push(&self, state: &mut BsVmState, word: u32) -> Result<(), RuntimeError> {
        if state.stack.len() >= self.config.max_stack_words {
            return Err(RuntimeError::new(&format!(
                "stack overflow: more than {} words",
                self.config.max_stack_words
            )));
        }
        state.stack.push(word);
        Ok(())
    }

    fn push_words(&self, state: &mut BsVmState, words: &[u32]) -> Result<(), RuntimeError> {
        if state.stack.len() + words.len() > self.config.max_stack_words {
            return Err(RuntimeError::new(&format!(
                "stack overflow: more than {} words",
                self.config.max_stack_words
            )));
        }
        state.stack.extend_from_slice(words);
        Ok(())
    }

    fn pop(&self, state: &mut BsVmState) -> Result<u32, RuntimeError> {
        state
            .stack
            .pop()
            .ok_or_else(|| stack_underflow(1, 0))
    }

    fn pop_i32(&self, state: &mut BsVmState) -> Result<i32, RuntimeError> {
        Ok(self.pop(state)? as i32)
    }

    fn pop_f32(&self, state: &mut BsVmState) -> Result<f32, RuntimeError> {
        Ok(f32::from_bits(self.pop(state)?))
    }

    /// Pops `n` words, keeping their stack order.
    fn pop_words(&self, state: &mut BsVmState, n: usize) -> Result<Vec<u32>, RuntimeError> {
        let len = state.stack.len();
        if len < n {
            return Err(stack_underflow(n, len));
        }
        Ok(state.stack.split_off(len - n))
    }

    fn pop_floats(&self, state: &mut BsVmState, n: usize) -> Result<Vec<f32>, RuntimeError> {
        Ok(self
            .pop_words(state, n)?
            .into_iter()
            .map(f32::from_bits)
            .collect())
    }

    fn push_floats(&self, state: &mut BsVmState, values: &[f32]) -> Result<(), RuntimeError> {
        let words: Vec<u32> = values.iter().map(|v| v.to_bits()).collect();
        self.push_words(state, &words)
    }

    /// Makes RAM at least `needed` bytes, rounded up to whole pages.
    fn grow_ram(&self, state: &mut BsVmState, needed: usize) -> Result<(), RuntimeError> {
        if needed <= state.ram.len() {
            return Ok(());
        }
        if needed > self.config.max_ram_bytes {
            return Err(RuntimeError::new(&format!(
                "out of memory: {} bytes requested, limit is {}",
                needed, self.config.max_ram_bytes
            )));
        }
        let page = self.config.ram_page_size.max(1);
        let size = needed.div_ceil(page) * page;
        state.ram.resize(size.min(self.config.max_ram_bytes), 0);
        Ok(())
    }

    fn check_range(&self, state: &BsVmState, addr: u32, len: usize) -> Result<usize, RuntimeError> {
        let start = addr as usize;
        match start.checked_add(len) {
            Some(end) if end <= state.ram_top => Ok(start),
            _ => Err(bad_address(addr, len)),
        }
    }

    fn load(&self, state: &BsVmState, addr: u32, words: usize) -> Result<Vec<u32>, RuntimeError> {
        let start = self.check_range(state, addr, words * 4)?;
        Ok(bytes_to_words(&state.ram[start..start + words * 4]))
    }

    fn store_word(&self, state: &mut BsVmState, addr: usize, word: u32) -> Result<(), RuntimeError> {
        let dst = state
            .ram
            .get_mut(addr..addr + WORD_SIZE)
            .ok_or_else(|| bad_address(addr as u32, WORD_SIZE))?;
        dst.copy_from_slice(&word.to_le_bytes());
        Ok(())
    }

    // =========================================================================
    // Calls
    // =========================================================================

    /// Moves the arguments of `function` from the stack into a fresh zeroed
    /// frame and returns the entry ip.
    fn call(
        &self,
        state: &mut BsVmState,
        function: u32,
        return_ip: usize,
    ) -> Result<usize, RuntimeError> {
        let entry = self.assembly.functions.get(function as usize).ok_or_else(|| {
            RuntimeError::new(&format!("call to unknown function #{}", function))
        })?;

        if state.frames.len() >= self.config.max_call_depth {
            return Err(RuntimeError::new(&format!(
                "call depth limit exceeded ({}) - possible infinite recursion in '{}'",
                self.config.max_call_depth, entry.name
            )));
        }

        if entry.arg_size > entry.frame_size {
            return Err(RuntimeError::new(&format!(
                "'{}' takes {} bytes of arguments but has a frame of {}",
                entry.name, entry.arg_size, entry.frame_size
            )));
        }
        let args = self.pop_words(state, entry.arg_size as usize / 4)?;
        let fp = state.ram_top;
        let top = fp + entry.frame_size as usize;
        self.grow_ram(state, top)?;
        state.ram[fp..top].fill(0);
        for (i, word) in args.into_iter().enumerate() {
            self.store_word(state, fp + i * 4, word)?;
        }

        state.frames.push(Frame {
            return_ip,
            fp,
            saved_top: fp,
            function,
        });
        state.ram_top = top;
        Ok(entry.entry as usize)
    }

    fn call_native(&self, state: &mut BsVmState, index: u32) -> Result<(), RuntimeError> {
        let native = self.assembly.natives.get(index as usize).ok_or_else(|| {
            RuntimeError::new(&format!("call to unknown native #{}", index))
        })?;
        let callback = self.bindings.functions.get(index as usize).ok_or_else(|| {
            RuntimeError::new(&format!("native '{}' is not bound", native.name))
        })?;

        let input = words_to_bytes(&self.pop_words(state, native.arg_size as usize / 4)?);
        let mut output = vec![0u8; native.ret_size as usize];
        callback(&mut FunCallbackContext::new(state, &input, &mut output)).map_err(|e| {
            RuntimeError::new(&format!("native '{}' failed: {}", native.name, e))
        })?;
        self.push_words(state, &bytes_to_words(&output))
    }

    fn access_property(
        &self,
        state: &mut BsVmState,
        accessor: u32,
        property: u32,
        object: i32,
        access: PropertyAccess,
        buffer: &mut [u8],
    ) -> Result<(), RuntimeError> {
        let class = self.assembly.accessors.get(accessor as usize).ok_or_else(|| {
            RuntimeError::new(&format!("unknown accessor #{}", accessor))
        })?;
        let prop = class.properties.get(property as usize).ok_or_else(|| {
            RuntimeError::new(&format!(
                "unknown property #{} of '{}'",
                property, class.class_name
            ))
        })?;

        let Some(Some(callback)) = self.bindings.accessors.get(accessor as usize) else {
            error!(class = %class.class_name, property = %prop.name, "class has no accessor");
            buffer.fill(0);
            return Ok(());
        };

        let mut ctx = PropertyCallbackContext {
            state,
            object,
            property: prop,
            access,
            buffer,
        };
        match callback(&mut ctx) {
            Ok(()) => Ok(()),
            Err(CallbackError::UnknownProperty(name)) => {
                error!(class = %class.class_name, property = %name, "unknown property");
                ctx.buffer.fill(0);
                Ok(())
            }
            Err(e) => Err(RuntimeError::new(&format!(
                "property '{}.{}' failed: {}",
                class.class_name, prop.name, e
            ))),
        }
    }

    // =========================================================================
    // Interpreter loop
    // =========================================================================

    fn jump(&self, ip: usize, offset: i32) -> Result<usize, RuntimeError> {
        let target = ip as i64 + offset as i64;
        if target < 0 || target as usize >= self.assembly.code.len() {
            return Err(RuntimeError::new(&format!(
                "jump out of bounds: ip={}, offset={}, target={}",
                ip, offset, target
            )));
        }
        Ok(target as usize)
    }

    /// Runs from `ip` until `Exit`, or until a `Ret` brings the frame stack
    /// back to `base` frames. Global code has no base: only `Exit` ends it.
    fn exec(
        &self,
        state: &mut BsVmState,
        mut ip: usize,
        base: Option<usize>,
    ) -> Result<(), RuntimeError> {
        let code = &self.assembly.code;
        let mut steps = 0usize;

        loop {
            if let Some(max) = self.config.max_steps {
                steps += 1;
                if steps > max {
                    return Err(RuntimeError::new(&format!(
                        "step limit exceeded ({})",
                        max
                    )));
                }
            }

            let op = code.get(ip).ok_or_else(|| {
                RuntimeError::new(&format!("instruction pointer {} outside of code", ip))
            })?;

            match op {
                // literals
                Op::PushInt(n) => self.push(state, *n as u32)?,
                Op::PushFloat(f) => self.push(state, f.to_bits())?,
                Op::PushStr(i) => self.push(state, i + 1)?,
                Op::PushZero(n) => {
                    let n = (*n as usize).min(self.config.max_stack_words + 1);
                    self.push_words(state, &vec![0; n])?;
                }
                Op::Pop(n) => {
                    self.pop_words(state, *n as usize)?;
                }

                // memory
                Op::LocalAddr(offset) => {
                    let frame = state.frames.last().ok_or_else(|| {
                        RuntimeError::new("local address outside of a function")
                    })?;
                    let addr = u32::try_from(frame.fp)
                        .ok()
                        .and_then(|fp| fp.checked_add(*offset))
                        .ok_or_else(|| bad_address(*offset, WORD_SIZE))?;
                    self.push(state, addr)?;
                }
                Op::GlobalAddr(offset) => self.push(state, *offset)?,
                Op::AddrOffset(n) => {
                    let addr = self.pop(state)?;
                    self.push(state, addr.wrapping_add(*n))?;
                }
                Op::IndexAddr { stride, count } => {
                    let index = self.pop_i32(state)?;
                    let addr = self.pop(state)?;
                    if index < 0 || index as u32 >= *count {
                        return Err(index_out_of_bounds(index, *count));
                    }
                    self.push(state, addr.wrapping_add((index as u32).wrapping_mul(*stride)))?;
                }
                Op::Load(n) => {
                    let addr = self.pop(state)?;
                    let words = self.load(state, addr, *n as usize)?;
                    self.push_words(state, &words)?;
                }
                Op::Store(n) => {
                    let addr = self.pop(state)?;
                    let words = self.pop_words(state, *n as usize)?;
                    let start = self.check_range(state, addr, words.len() * 4)?;
                    for (i, word) in words.into_iter().enumerate() {
                        self.store_word(state, start + i * 4, word)?;
                    }
                }
                Op::StoreLanes(lanes) => {
                    let addr = self.pop(state)?;
                    let words = self.pop_words(state, lanes.len())?;
                    for (lane, word) in lanes.iter().zip(words) {
                        let at = addr.wrapping_add(*lane as u32 * 4);
                        let start = self.check_range(state, at, 4)?;
                        self.store_word(state, start, word)?;
                    }
                }

                // integer arithmetic
                Op::IAdd | Op::ISub | Op::IMul | Op::IDiv | Op::IMod => {
                    let b = self.pop_i32(state)?;
                    let a = self.pop_i32(state)?;
                    let result = match op {
                        Op::IAdd => a.wrapping_add(b),
                        Op::ISub => a.wrapping_sub(b),
                        Op::IMul => a.wrapping_mul(b),
                        Op::IDiv => {
                            if b == 0 {
                                return Err(division_by_zero());
                            }
                            a.wrapping_div(b)
                        }
                        _ => {
                            if b == 0 {
                                return Err(division_by_zero());
                            }
                            a.wrapping_rem(b)
                        }
                    };
                    self.push(state, result as u32)?;
                }
                Op::INeg => {
                    let a = self.pop_i32(state)?;
                    self.push(state, a.wrapping_neg() as u32)?;
                }

                Op::IEq | Op::INe | Op::ILt | Op::IGt | Op::ILe | Op::IGe => {
                    let b = self.pop_i32(state)?;
                    let a = self.pop_i32(state)?;
                    let result = match op {
                        Op::IEq => a == b,
                        Op::INe => a != b,
                        Op::ILt => a < b,
                        Op::IGt => a > b,
                        Op::ILe => a <= b,
                        _ => a >= b,
                    };
                    self.push(state, result as u32)?;
                }

                // float arithmetic
                Op::FAdd | Op::FSub | Op::FMul | Op::FDiv => {
                    let b = self.pop_f32(state)?;
                    let a = self.pop_f32(state)?;
                    let result = match op {
                        Op::FAdd => a + b,
                        Op::FSub => a - b,
                        Op::FMul => a * b,
                        _ => a / b,
                    };
                    self.push(state, result.to_bits())?;
                }
                Op::FNeg => {
                    let a = self.pop_f32(state)?;
                    self.push(state, (-a).to_bits())?;
                }

                Op::FEq | Op::FNe | Op::FLt | Op::FGt | Op::FLe | Op::FGe => {
                    let b = self.pop_f32(state)?;
                    let a = self.pop_f32(state)?;
                    let result = match op {
                        Op::FEq => a == b,
                        Op::FNe => a != b,
                        Op::FLt => a < b,
                        Op::FGt => a > b,
                        Op::FLe => a <= b,
                        _ => a >= b,
                    };
                    self.push(state, result as u32)?;
                }

                // vectors
                Op::VAdd(n) | Op::VSub(n) | Op::VMul(n) | Op::VDiv(n) => {
                    let b = self.pop_floats(state, *n as usize)?;
                    let a = self.pop_floats(state, *n as usize)?;
                    let lanes: Vec<f32> = a
                        .iter()
                        .zip(&b)
                        .map(|(x, y)| match op {
                            Op::VAdd(_) => x + y,
                            Op::VSub(_) => x - y,
                            Op::VMul(_) => x * y,
                            _ => x / y,
                        })
                        .collect();
                    self.push_floats(state, &lanes)?;
                }
                Op::VNeg(n) => {
                    let a = self.pop_floats(state, *n as usize)?;
                    let lanes: Vec<f32> = a.iter().map(|x| -x).collect();
                    self.push_floats(state, &lanes)?;
                }

                // logic
                Op::And => {
                    let b = self.pop(state)?;
                    let a = self.pop(state)?;
                    self.push(state, (a != 0 && b != 0) as u32)?;
                }
                Op::Or => {
                    let b = self.pop(state)?;
                    let a = self.pop(state)?;
                    self.push(state, (a != 0 || b != 0) as u32)?;
                }
                Op::Not => {
                    let a = self.pop(state)?;
                    self.push(state, (a == 0) as u32)?;
                }

                // conversions
                Op::IToF => {
                    let a = self.pop_i32(state)?;
                    self.push(state, (a as f32).to_bits())?;
                }
                Op::FToI => {
                    let a = self.pop_f32(state)?;
                    self.push(state, (a as i32) as u32)?;
                }
                Op::Splat(n) => {
                    let a = self.pop(state)?;
                    self.push_words(state, &vec![a; *n as usize])?;
                }

                // lanes
                Op::Swizzle { width, lanes } => {
                    let v = self.pop_words(state, *width as usize)?;
                    let mut out = Vec::with_capacity(lanes.len());
                    for lane in lanes {
                        let word = v.get(*lane as usize).ok_or_else(|| {
                            RuntimeError::new(&format!(
                                "swizzle lane {} out of range for {} lanes",
                                lane, width
                            ))
                        })?;
                        out.push(*word);
                    }
                    self.push_words(state, &out)?;
                }
                Op::Extract { total, offset, len } => {
                    let v = self.pop_words(state, *total as usize)?;
                    let (start, end) = (*offset as usize, *offset as usize + *len as usize);
                    let part = v.get(start..end).ok_or_else(|| {
                        RuntimeError::new(&format!(
                            "extract of words {}..{} from a value of {}",
                            start, end, total
                        ))
                    })?;
                    self.push_words(state, part)?;
                }

                // control flow
                Op::Jump(offset) => {
                    ip = self.jump(ip, *offset)?;
                    continue;
                }
                Op::JumpIfFalse(offset) => {
                    if self.pop(state)? == 0 {
                        ip = self.jump(ip, *offset)?;
                        continue;
                    }
                }
                Op::Call(function) => {
                    ip = self.call(state, *function, ip + 1)?;
                    continue;
                }
                Op::CallNative(index) => self.call_native(state, *index)?,
                Op::Ret(_) => {
                    let frame = state
                        .frames
                        .pop()
                        .ok_or_else(|| RuntimeError::new("return outside of a function"))?;
                    state.ram_top = frame.saved_top;
                    if Some(state.frames.len()) == base {
                        return Ok(());
                    }
                    ip = frame.return_ip;
                    continue;
                }
                Op::Exit => return Ok(()),

                // host objects
                Op::ReadProp {
                    accessor,
                    property,
                    words,
                } => {
                    let object = self.pop_i32(state)?;
                    let mut buffer = vec![0u8; *words as usize * 4];
                    self.access_property(
                        state,
                        *accessor,
                        *property,
                        object,
                        PropertyAccess::Read,
                        &mut buffer,
                    )?;
                    self.push_words(state, &bytes_to_words(&buffer))?;
                }
                Op::WriteProp {
                    accessor,
                    property,
                    words,
                } => {
                    let object = self.pop_i32(state)?;
                    let mut buffer = words_to_bytes(&self.pop_words(state, *words as usize)?);
                    self.access_property(
                        state,
                        *accessor,
                        *property,
                        object,
                        PropertyAccess::Write,
                        &mut buffer,
                    )?;
                }
            }

            ip += 1;
        }
    }
}
