//! States of the acquisition controller
//!
//! The controller is an explicit finite-state machine: one state per
//! setup, acquisition, teardown and recovery step, with the user hooks
//! keyed by the state id strings below.

/// All states of the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Start,
    CreateContext,
    CreateSockets,
    BindSockets,
    CreateControlUnit,
    CreateDigitizer,
    ReadConfig,
    ConfigureDigitizer,
    AllocateMemory,
    PublishStatus,
    ReceiveCommands,
    StartAcquisition,
    AcquisitionReceiveCommands,
    ReadData,
    PublishEvents,
    AcquisitionPublishStatus,
    StopPublishEvents,
    StopAcquisition,
    ClearMemory,
    DestroyDigitizer,
    DestroyControlUnit,
    CloseSockets,
    DestroyContext,
    Stop,
    // Reconfiguration branch
    RecreateDigitizer,
    ReconfigureClearMemory,
    ReconfigureDestroyDigitizer,
    // Automatic restart branch
    RestartPublishEvents,
    RestartStopAcquisition,
    RestartClearMemory,
    RestartDestroyDigitizer,
    RestartCreateDigitizer,
    RestartConfigureDigitizer,
    RestartAllocateMemory,
    // Error leaves
    AcquisitionError,
    CommunicationError,
    ParseError,
    ConfigureError,
    DigitizerError,
}

impl State {
    /// The stable id used for logging and for the user-hook keys
    pub fn id(&self) -> &'static str {
        match self {
            State::Start => "start",
            State::CreateContext => "create_context",
            State::CreateSockets => "create_sockets",
            State::BindSockets => "bind_sockets",
            State::CreateControlUnit => "create_control_unit",
            State::CreateDigitizer => "create_digitizer",
            State::ReadConfig => "read_config",
            State::ConfigureDigitizer => "configure_digitizer",
            State::AllocateMemory => "allocate_memory",
            State::PublishStatus => "publish_status",
            State::ReceiveCommands => "receive_commands",
            State::StartAcquisition => "start_acquisition",
            State::AcquisitionReceiveCommands => "acquisition_receive_commands",
            State::ReadData => "read_data",
            State::PublishEvents => "publish_events",
            State::AcquisitionPublishStatus => "acquisition_publish_status",
            State::StopPublishEvents => "stop_publish_events",
            State::StopAcquisition => "stop_acquisition",
            State::ClearMemory => "clear_memory",
            State::DestroyDigitizer => "destroy_digitizer",
            State::DestroyControlUnit => "destroy_control_unit",
            State::CloseSockets => "close_sockets",
            State::DestroyContext => "destroy_context",
            State::Stop => "stop",
            State::RecreateDigitizer => "recreate_digitizer",
            State::ReconfigureClearMemory => "reconfigure_clear_memory",
            State::ReconfigureDestroyDigitizer => "reconfigure_destroy_digitizer",
            State::RestartPublishEvents => "restart_publish_events",
            State::RestartStopAcquisition => "restart_stop_acquisition",
            State::RestartClearMemory => "restart_clear_memory",
            State::RestartDestroyDigitizer => "restart_destroy_digitizer",
            State::RestartCreateDigitizer => "restart_create_digitizer",
            State::RestartConfigureDigitizer => "restart_configure_digitizer",
            State::RestartAllocateMemory => "restart_allocate_memory",
            State::AcquisitionError => "acquisition_error",
            State::CommunicationError => "communication_error",
            State::ParseError => "parse_error",
            State::ConfigureError => "configure_error",
            State::DigitizerError => "digitizer_error",
        }
    }

    /// Whether this state belongs to the teardown sequence
    ///
    /// The termination override must not re-enter `clear_memory` while
    /// the unwind is already in progress.
    pub fn is_closing(&self) -> bool {
        matches!(
            self,
            State::ClearMemory
                | State::DestroyDigitizer
                | State::DestroyControlUnit
                | State::CloseSockets
                | State::DestroyContext
                | State::Stop
        )
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_stable() {
        assert_eq!(State::ConfigureDigitizer.id(), "configure_digitizer");
        assert_eq!(State::AcquisitionError.id(), "acquisition_error");
        assert_eq!(format!("{}", State::ReadData), "read_data");
    }

    #[test]
    fn closing_states() {
        assert!(State::ClearMemory.is_closing());
        assert!(State::Stop.is_closing());
        assert!(!State::ReadData.is_closing());
        assert!(!State::RestartClearMemory.is_closing());
    }
}
