//! `hull init` — container init; only the runtime itself invokes this.

/// Executes the container init. Returns only if the command could not be
/// started.
///
/// # Errors
///
/// Returns an error if the command cannot be read or executed.
pub fn execute() -> anyhow::Result<()> {
    let never = hull_runtime::init::run()?;
    match never {}
}
