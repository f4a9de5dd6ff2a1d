//! Host platform capability
//!
//! The runner captures one of these at construction instead of querying the
//! OS ad hoc, so tests and embedding hosts can pin the behavior.

/// Platform facts the runner branches on
pub trait Platform: Send + Sync + std::fmt::Debug {
    fn is_windows(&self) -> bool;

    /// Whether children are started as session leaders and terminated by
    /// signalling their whole process group
    fn supports_process_groups(&self) -> bool {
        !self.is_windows()
    }

    /// Line ending written to the child in text mode
    fn line_ending(&self) -> &'static str {
        if self.is_windows() {
            "\r\n"
        } else {
            "\n"
        }
    }
}

/// The platform this binary was built for
#[derive(Debug, Clone, Copy, Default)]
pub struct HostPlatform;

impl Platform for HostPlatform {
    fn is_windows(&self) -> bool {
        cfg!(windows)
    }
}

/// A platform pinned by the caller
#[derive(Debug, Clone, Copy)]
pub struct FixedPlatform {
    pub windows: bool,
}

impl Platform for FixedPlatform {
    fn is_windows(&self) -> bool {
        self.windows
    }
}
