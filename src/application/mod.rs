pub mod design;
pub mod lifecycle;
pub mod skills;

pub use design::DesignSource;
pub use lifecycle::{
    install_interrupt_handler, Collaborators, FailedTask, RunManager, RunOptions, RunOutcome,
    RunReport,
};
