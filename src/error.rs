use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum WitError {
    #[error("failed to load config from {path}")]
    ConfigLoad {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config from {path}: {message}")]
    ConfigParse { path: String, message: String },

    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("persistence error: {message}")]
    Store { message: String },

    #[error("no such VM: {name}")]
    #[diagnostic(help("the VM may have been retired or never configured"))]
    UnknownVm { name: String },

    #[error("no such job: {id}")]
    UnknownJob { id: i64 },

    #[error("hypervisor domain '{domain}' is already owned by VM '{owner}'")]
    #[diagnostic(help("the scheduler will retry the claim on a later pass"))]
    DomainBusy { domain: String, owner: String },

    #[error("hypervisor error on VM '{vm}': {message}")]
    #[diagnostic(help("{hint}"))]
    Hypervisor { vm: String, message: String, hint: String },

    #[error("VM agent error on VM '{vm}': {message}")]
    VmAgent { vm: String, message: String },

    #[error("child process handshake failed for VM '{vm}': {message}")]
    #[diagnostic(help("the parent may have died before publishing the child pid"))]
    ChildHandshake { vm: String, message: String },

    #[error("job '{id}' cannot be restarted from status {status}")]
    #[diagnostic(help("restart is only permitted from a terminal, non-queued/running status"))]
    RestartNotPermitted { id: i64, status: String },

    #[error("control channel protocol error: {message}")]
    Protocol { message: String },

    #[error("{command} is not yet implemented")]
    NotImplemented { command: String },
}

pub type WitResult<T> = Result<T, WitError>;
