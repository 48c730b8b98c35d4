use std::any::Any;

use crate::runtime::runtime_error::RuntimeError;

/// Lifecycle notifications from the VM. Every method is optional.
pub trait RuntimeListener: Send {
    fn on_runtime_begin(&mut self) {}

    /// The global frame is allocated and externs hold their initial values.
    fn on_stack_initialized(&mut self) {}

    /// Global code ran to completion.
    fn on_runtime_exit(&mut self) {}

    fn on_crash(&mut self, _error: &RuntimeError) {}
}

/// A dynamically sized object referenced from script memory by handle.
pub struct HeapElement {
    pub object: Box<dyn Any + Send>,
    pub type_name: String,
}

impl std::fmt::Debug for HeapElement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeapElement")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Frame {
    pub return_ip: usize,
    /// Start of this call's frame in RAM.
    pub fp: usize,
    /// RAM top to restore when the frame is popped.
    pub saved_top: usize,
    pub function: u32,
}

/// Everything one execution context of a compiled script owns: RAM with
/// the global frame and call frames, the operand stack, the heap and the
/// host's user context.
///
/// One assembly may run against many states. A state remembers which
/// assembly initialized it; functions can only be executed on a state that
/// the same assembly has run.
#[derive(Default)]
pub struct BsVmState {
    pub(crate) ram: Vec<u8>,
    pub(crate) ram_top: usize,
    pub(crate) stack: Vec<u32>,
    pub(crate) frames: Vec<Frame>,
    heap: Vec<HeapElement>,
    user_context: Option<Box<dyn Any + Send>>,
    listener: Option<Box<dyn RuntimeListener>>,
    pub(crate) initialized: Option<u64>,
}

impl BsVmState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops RAM, stack and heap. The user context and listener survive.
    pub fn reset(&mut self) {
        self.ram.clear();
        self.ram_top = 0;
        self.stack.clear();
        self.frames.clear();
        self.heap.clear();
        self.initialized = None;
    }

    /// Serial of the assembly that last ran on this state.
    pub fn initialized_by(&self) -> Option<u64> {
        self.initialized
    }

    /// Operand stack depth in words. Zero between calls.
    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    pub fn ram_size(&self) -> usize {
        self.ram.len()
    }

    // =========================================================================
    // Heap
    // =========================================================================

    /// Registers an object and returns its handle. Handles start at 1.
    pub fn push_heap_element(&mut self, object: Box<dyn Any + Send>, type_name: &str) -> i32 {
        self.heap.push(HeapElement {
            object,
            type_name: type_name.to_string(),
        });
        self.heap.len() as i32
    }

    pub fn push_string(&mut self, text: impl Into<String>) -> i32 {
        self.push_heap_element(Box::new(text.into()), "string")
    }

    pub fn heap_element(&self, handle: i32) -> Option<&HeapElement> {
        let index = usize::try_from(handle).ok()?.checked_sub(1)?;
        self.heap.get(index)
    }

    pub fn heap_object<T: Any>(&self, handle: i32) -> Option<&T> {
        self.heap_element(handle)?.object.downcast_ref::<T>()
    }

    pub fn heap_object_mut<T: Any>(&mut self, handle: i32) -> Option<&mut T> {
        let index = usize::try_from(handle).ok()?.checked_sub(1)?;
        self.heap.get_mut(index)?.object.downcast_mut::<T>()
    }

    pub fn heap_string(&self, handle: i32) -> Option<&str> {
        self.heap_object::<String>(handle).map(String::as_str)
    }

    pub fn heap_len(&self) -> usize {
        self.heap.len()
    }

    // =========================================================================
    // Host channels
    // =========================================================================

    pub fn set_user_context<T: Any + Send>(&mut self, context: T) {
        self.user_context = Some(Box::new(context));
    }

    pub fn user_context<T: Any>(&self) -> Option<&T> {
        self.user_context.as_ref()?.downcast_ref::<T>()
    }

    pub fn user_context_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.user_context.as_mut()?.downcast_mut::<T>()
    }

    pub fn take_user_context(&mut self) -> Option<Box<dyn Any + Send>> {
        self.user_context.take()
    }

    pub fn set_runtime_listener(&mut self, listener: Box<dyn RuntimeListener>) {
        self.listener = Some(listener);
    }

    pub(crate) fn notify(&mut self, event: impl FnOnce(&mut dyn RuntimeListener)) {
        if let Some(listener) = self.listener.as_deref_mut() {
            event(listener);
        }
    }

    // =========================================================================
    // Global frame
    // =========================================================================

    pub(crate) fn ram_slice(&self, offset: usize, len: usize) -> Option<&[u8]> {
        self.ram.get(offset..offset.checked_add(len)?)
    }

    pub(crate) fn ram_slice_mut(&mut self, offset: usize, len: usize) -> Option<&mut [u8]> {
        self.ram.get_mut(offset..offset.checked_add(len)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct Counter {
        objects: Vec<String>,
    }

    #[test]
    fn test_heap_handles() {
        let mut state = BsVmState::new();
        let a = state.push_string("one");
        let b = state.push_heap_element(Box::new(7u64), "u64");
        assert_eq!((a, b), (1, 2));
        assert_eq!(state.heap_string(a), Some("one"));
        assert_eq!(state.heap_string(b), None);
        assert_eq!(state.heap_object::<u64>(b), Some(&7));
        assert!(state.heap_element(0).is_none());
        assert_eq!(state.heap_element(b).map(|e| e.type_name.as_str()), Some("u64"));
    }

    #[test]
    fn test_reset_keeps_user_context() {
        let mut state = BsVmState::new();
        state.set_user_context(Counter {
            objects: vec!["cube".to_string()],
        });
        state.push_string("temp");
        state.reset();
        assert_eq!(state.heap_len(), 0);
        let ctx = state.user_context::<Counter>().unwrap();
        assert_eq!(ctx.objects, vec!["cube".to_string()]);
        assert!(state.user_context::<String>().is_none());
    }

    #[test]
    fn test_listener_is_notified() {
        struct Log(Arc<Mutex<Vec<&'static str>>>);
        impl RuntimeListener for Log {
            fn on_runtime_begin(&mut self) {
                self.0.lock().unwrap().push("begin");
            }
        }

        let events = Arc::new(Mutex::new(Vec::new()));
        let mut state = BsVmState::new();
        state.notify(|l| l.on_runtime_exit());
        state.set_runtime_listener(Box::new(Log(events.clone())));
        state.notify(|l| l.on_runtime_begin());
        state.notify(|l| l.on_runtime_exit());
        assert_eq!(*events.lock().unwrap(), vec!["begin"]);
    }
}
