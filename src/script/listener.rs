//! Host hooks into compilation.

pub use crate::frontend::preprocessor::FileIncluder;

/// Receives compilation progress and every error as it is reported.
/// All methods are optional.
pub trait CompilerListener: Send {
    fn on_compilation_begin(&mut self) {}

    /// `token` is the offending token's text, empty when there is none.
    fn on_compilation_error(&mut self, _line: usize, _message: &str, _token: &str) {}

    fn on_compilation_end(&mut self, _success: bool) {}
}

/// Reads includes from the filesystem, relative to a root directory.
#[derive(Debug, Clone)]
pub struct DirIncluder {
    root: std::path::PathBuf,
}

impl DirIncluder {
    pub fn new(root: impl Into<std::path::PathBuf>) -> Self {
        DirIncluder { root: root.into() }
    }
}

impl FileIncluder for DirIncluder {
    fn open(&mut self, path: &str) -> std::io::Result<String> {
        std::fs::read_to_string(self.root.join(path))
    }
}
