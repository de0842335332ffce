//! Integer error codes shared by the wire protocol and CLI callers.
//!
//! Every typed error in the workspace maps onto one of these codes so a
//! front-end can print `code` plus [`strerror`] without knowing the error
//! type that produced it.

pub const SUCCESS: i32 = 0;
pub const ERROR: i32 = -1;

/// Caller passed an argument that can never be valid (e.g. controller role).
pub const INVALID_ARGUMENT: i32 = 22;

// ── Transport ─────────────────────────────────────────────────────

pub const UNEXPECTED_MSG_ERROR: i32 = 1000;
pub const COMMUNICATIONS_CONNECTION_ERROR: i32 = 1001;
pub const COMMUNICATIONS_SEND_ERROR: i32 = 1002;
pub const COMMUNICATIONS_RECEIVE_ERROR: i32 = 1003;
pub const COMMUNICATIONS_SHUTDOWN_ERROR: i32 = 1004;
pub const PROTOCOL_VERSION_ERROR: i32 = 1005;
pub const PROTOCOL_MALFORMED_ERROR: i32 = 1006;
pub const PEER_CLOSED_ERROR: i32 = 1007;

pub const NO_CHANGE_IN_DATA: i32 = 1900;

// ── Controller request errors ─────────────────────────────────────

pub const INVALID_PARTITION_NAME: i32 = 2000;
pub const ACCESS_DENIED: i32 = 2002;
pub const TOO_MANY_REQUESTED_CPUS: i32 = 2005;
pub const INVALID_JOB_ID: i32 = 2017;
pub const INVALID_NODE_NAME: i32 = 2018;
pub const WRITING_TO_FILE: i32 = 2019;
pub const ALREADY_DONE: i32 = 2021;
pub const DISABLED: i32 = 2030;
pub const PARTITION_IN_USE: i32 = 2031;
pub const INVALID_TRIGGER_ID: i32 = 2040;
pub const IN_STANDBY_MODE: i32 = 2050;

// ── Plugins ───────────────────────────────────────────────────────

pub const PLUGIN_OPEN_ERROR: i32 = 3000;
pub const PLUGIN_NOT_A_PLUGIN: i32 = 3001;
pub const PLUGIN_INIT_FAILED: i32 = 3002;
pub const PLUGIN_SYMBOL_MISSING: i32 = 3003;
pub const PLUGIN_ALREADY_ACTIVE: i32 = 3004;
pub const PLUGIN_NOT_FOUND: i32 = 3005;

/// Human-readable text for an error code.
pub fn strerror(code: i32) -> &'static str {
    match code {
        SUCCESS => "No error",
        ERROR => "Unspecified error",
        INVALID_ARGUMENT => "Invalid argument",
        UNEXPECTED_MSG_ERROR => "Unexpected message received",
        COMMUNICATIONS_CONNECTION_ERROR => "Communication connection failure",
        COMMUNICATIONS_SEND_ERROR => "Message send failure",
        COMMUNICATIONS_RECEIVE_ERROR => "Message receive failure",
        COMMUNICATIONS_SHUTDOWN_ERROR => "Communication shutdown failure",
        PROTOCOL_VERSION_ERROR => "Protocol version error",
        PROTOCOL_MALFORMED_ERROR => "Malformed message",
        PEER_CLOSED_ERROR => "Connection closed by peer",
        NO_CHANGE_IN_DATA => "Data has not changed since time specified",
        INVALID_PARTITION_NAME => "Invalid partition name specified",
        ACCESS_DENIED => "Access/permission denied",
        TOO_MANY_REQUESTED_CPUS => "More processors requested than permitted",
        INVALID_JOB_ID => "Invalid job id specified",
        INVALID_NODE_NAME => "Invalid node name specified",
        WRITING_TO_FILE => "I/O error writing script/environment to file",
        ALREADY_DONE => "Job/step already completing or completed",
        DISABLED => "Requested operation is presently disabled",
        PARTITION_IN_USE => "Partition has active jobs",
        INVALID_TRIGGER_ID => "Invalid trigger id specified",
        IN_STANDBY_MODE => "Controller is in standby mode",
        PLUGIN_OPEN_ERROR => "Plugin library could not be opened",
        PLUGIN_NOT_A_PLUGIN => "Library is not a plugin",
        PLUGIN_INIT_FAILED => "Plugin initialization failed",
        PLUGIN_SYMBOL_MISSING => "Plugin is missing a required symbol",
        PLUGIN_ALREADY_ACTIVE => "Plugin is already active",
        PLUGIN_NOT_FOUND => "Plugin not found",
        _ => "Unknown error",
    }
}
