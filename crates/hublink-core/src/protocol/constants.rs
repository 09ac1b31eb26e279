//! Hub wire protocol constants.

use std::time::Duration;

/// Line terminator appended to every outbound message.
pub const TERMINATOR: &[u8] = b"\r";

/// Control byte that asks an interactive hub to switch to structured mode.
pub const READY_PROBE: &[u8] = b"\x04";

/// Prefix of the line a hub emits once structured mode is up.
pub const READY_MARKER: &str = r#"{"m":0"#;

/// Substring printed when a running program is terminated.
pub const SYSTEM_EXIT_MARKER: &str = "SystemExit:";

pub const DEFAULT_BAUD_RATE: u32 = 115_200;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(5000);
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_millis(2000);

/// Length of generated correlation ids.
pub const CORRELATION_ID_LEN: usize = 4;

/// Number of program slots on the hub.
pub const SLOT_COUNT: u32 = 20;
pub const MAX_SLOT: u32 = SLOT_COUNT - 1;

/// Project id the hub expects on python uploads.
pub const PYTHON_PROJECT_ID: &str = "ScctlpwQVu64";
pub const PYTHON_PROGRAM_TYPE: &str = "python";

// Methods
pub const GET_HUB_INFO: &str = "get_hub_info";
pub const GET_STORAGE_STATUS: &str = "get_storage_status";
pub const PROGRAM_EXECUTE: &str = "program_execute";
pub const PROGRAM_TERMINATE: &str = "program_terminate";
pub const MOVE_PROJECT: &str = "move_project";
pub const REMOVE_PROJECT: &str = "remove_project";
pub const START_WRITE_PROGRAM: &str = "start_write_program";
pub const WRITE_PACKAGE: &str = "write_package";
