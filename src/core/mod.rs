pub mod borg;
pub mod checks;
pub mod classifier;
pub mod compose;
pub mod config;
pub mod hooks;
pub mod notify;
pub mod orchestrator;
pub mod runner;

pub use checks::{HostSystem, LocalSystem, PreconditionChecker};
pub use compose::ComposeStack;
pub use config::{Configuration, Secrets};
pub use hooks::Hook;
pub use notify::{Notifications, Notifier};
pub use orchestrator::{Orchestrator, RunReport, Stage};
pub use runner::{CommandResult, CommandRunner, CommandSpec, ShellRunner};
