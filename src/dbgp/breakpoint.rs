use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex};

/// Handles are allocated above this value.
const HANDLE_BASE: u32 = 10000;

/// Client side breakpoint identifier, never reused until the registry is cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BreakpointHandle(pub u32);

impl Display for BreakpointHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Breakpoint {
    pub handle: BreakpointHandle,
    /// Local file path.
    pub file: String,
    pub line: u32,
    /// Condition, evaluated by engine.
    pub expression: Option<String>,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum BreakpointError {
    #[error("breakpoint {0} not found")]
    NotFound(BreakpointHandle),
}

/// Set of breakpoints known to the client, shared between all sessions.
#[derive(Debug)]
pub struct BreakpointRegistry {
    breakpoints: BTreeMap<BreakpointHandle, Breakpoint>,
    last_handle: u32,
}

pub type SharedRegistry = Arc<Mutex<BreakpointRegistry>>;

impl Default for BreakpointRegistry {
    fn default() -> Self {
        Self {
            breakpoints: BTreeMap::new(),
            last_handle: HANDLE_BASE,
        }
    }
}

impl BreakpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedRegistry {
        Arc::new(Mutex::new(Self::default()))
    }

    pub fn add(
        &mut self,
        file: impl Into<String>,
        line: u32,
        expression: Option<String>,
    ) -> BreakpointHandle {
        self.last_handle += 1;
        let handle = BreakpointHandle(self.last_handle);
        self.breakpoints.insert(
            handle,
            Breakpoint {
                handle,
                file: file.into(),
                line,
                expression: expression.filter(|e| !e.is_empty()),
            },
        );
        handle
    }

    pub fn remove(&mut self, handle: BreakpointHandle) -> Result<Breakpoint, BreakpointError> {
        self.breakpoints
            .remove(&handle)
            .ok_or(BreakpointError::NotFound(handle))
    }

    /// Return the most recently added breakpoint at the location.
    pub fn find_by_location(&self, file: &str, line: u32) -> Option<BreakpointHandle> {
        self.breakpoints
            .values()
            .rev()
            .find(|bp| bp.file == file && bp.line == line)
            .map(|bp| bp.handle)
    }

    pub fn get(&self, handle: BreakpointHandle) -> Option<&Breakpoint> {
        self.breakpoints.get(&handle)
    }

    pub fn list(&self) -> Vec<BreakpointHandle> {
        self.breakpoints.keys().copied().collect()
    }

    pub fn snapshot(&self) -> Vec<Breakpoint> {
        self.breakpoints.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.breakpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakpoints.is_empty()
    }

    /// Remove all breakpoints and restart handle numbering.
    pub fn clear(&mut self) {
        self.breakpoints.clear();
        self.last_handle = HANDLE_BASE;
    }
}
