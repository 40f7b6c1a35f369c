/// Host lifecycle signals that caches and downloaders react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SystemEvent {
    /// The process is under memory pressure.
    MemoryWarning,
    /// The host application moved to the background.
    EnterBackground,
}
